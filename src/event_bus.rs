/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) from the algorithm and block server
//! threads and passes each one to the handlers registered for its type.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers for each event type. Handlers of the same type are called in the order they were registered.
#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) apply_new_epoch_handlers: Vec<HandlerPtr<ApplyNewEpochEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) reject_batch_handlers: Vec<HandlerPtr<RejectBatchEvent>>,
    pub(crate) receive_block_request_handlers: Vec<HandlerPtr<ReceiveBlockRequestEvent>>,
    pub(crate) send_block_response_handlers: Vec<HandlerPtr<SendBlockResponseEvent>>,
    pub(crate) ceremony_phase_change_handlers: Vec<HandlerPtr<CeremonyPhaseChangeEvent>>,
}

impl EventHandlers {
    /// Register the default CSV [loggers](crate::logging) in front of any user handlers.
    pub(crate) fn add_default_loggers(&mut self) {
        self.commit_block_handlers.insert(0, CommitBlockEvent::get_logger());
        self.apply_new_epoch_handlers.insert(0, ApplyNewEpochEvent::get_logger());
        self.propose_handlers.insert(0, ProposeEvent::get_logger());
        self.vote_handlers.insert(0, VoteEvent::get_logger());
        self.receive_proposal_handlers.insert(0, ReceiveProposalEvent::get_logger());
        self.receive_vote_handlers.insert(0, ReceiveVoteEvent::get_logger());
        self.start_round_handlers.insert(0, StartRoundEvent::get_logger());
        self.round_timeout_handlers.insert(0, RoundTimeoutEvent::get_logger());
        self.start_sync_handlers.insert(0, StartSyncEvent::get_logger());
        self.end_sync_handlers.insert(0, EndSyncEvent::get_logger());
        self.reject_batch_handlers.insert(0, RejectBatchEvent::get_logger());
        self.receive_block_request_handlers
            .insert(0, ReceiveBlockRequestEvent::get_logger());
        self.send_block_response_handlers
            .insert(0, SendBlockResponseEvent::get_logger());
        self.ceremony_phase_change_handlers
            .insert(0, CeremonyPhaseChangeEvent::get_logger());
    }

    /// Whether any handler at all is registered. If not, the replica does not start the event bus.
    pub(crate) fn is_empty(&self) -> bool {
        self.commit_block_handlers.is_empty()
            && self.apply_new_epoch_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.start_round_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.reject_batch_handlers.is_empty()
            && self.receive_block_request_handlers.is_empty()
            && self.send_block_response_handlers.is_empty()
            && self.ceremony_phase_change_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitBlock(e) => self.commit_block_handlers.iter().for_each(|h| h(&e)),
            Event::ApplyNewEpoch(e) => self.apply_new_epoch_handlers.iter().for_each(|h| h(&e)),
            Event::Propose(e) => self.propose_handlers.iter().for_each(|h| h(&e)),
            Event::Vote(e) => self.vote_handlers.iter().for_each(|h| h(&e)),
            Event::ReceiveProposal(e) => self.receive_proposal_handlers.iter().for_each(|h| h(&e)),
            Event::ReceiveVote(e) => self.receive_vote_handlers.iter().for_each(|h| h(&e)),
            Event::StartRound(e) => self.start_round_handlers.iter().for_each(|h| h(&e)),
            Event::RoundTimeout(e) => self.round_timeout_handlers.iter().for_each(|h| h(&e)),
            Event::StartSync(e) => self.start_sync_handlers.iter().for_each(|h| h(&e)),
            Event::EndSync(e) => self.end_sync_handlers.iter().for_each(|h| h(&e)),
            Event::RejectBatch(e) => self.reject_batch_handlers.iter().for_each(|h| h(&e)),
            Event::ReceiveBlockRequest(e) => {
                self.receive_block_request_handlers.iter().for_each(|h| h(&e))
            }
            Event::SendBlockResponse(e) => {
                self.send_block_response_handlers.iter().for_each(|h| h(&e))
            }
            Event::CeremonyPhaseChange(e) => {
                self.ceremony_phase_change_handlers.iter().for_each(|h| h(&e))
            }
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // All publishers are gone: the replica is shutting down.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
