/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by the node core, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! algorithm thread and the block server on a channel and handed to user-registered handlers by the
//! [event bus](crate::event_bus) thread.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    ceremony::types::CeremonyPhase,
    consensus::{
        messages::{Proposal, Vote},
        types::Step,
    },
    downloader::types::BatchRejection,
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, CryptoHash, EpochNumber, RoundNumber},
        validator_set::ValidatorSet,
    },
};

pub enum Event {
    // Events that change persistent state.
    CommitBlock(CommitBlockEvent),
    ApplyNewEpoch(ApplyNewEpochEvent),
    // Events that involve broadcasting a consensus message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    // Events that involve receiving a consensus message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    // Round events.
    StartRound(StartRoundEvent),
    RoundTimeout(RoundTimeoutEvent),
    // Downloader events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    RejectBatch(RejectBatchEvent),
    // Block server events.
    ReceiveBlockRequest(ReceiveBlockRequestEvent),
    SendBlockResponse(SendBlockResponseEvent),
    // Ceremony events.
    CeremonyPhaseChange(CeremonyPhaseChangeEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown.
            let _ = event_publisher.send(self);
        }
    }
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    /// Whether the block was committed by the downloader rather than by this replica's own voting.
    pub synced: bool,
}

pub struct ApplyNewEpochEvent {
    pub timestamp: SystemTime,
    pub epoch: EpochNumber,
    pub validator_set: ValidatorSet,
    pub kept_previous_set: bool,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: Vote,
}

pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub proposer: Option<VerifyingKey>,
}

pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub step: Step,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub peer_height: BlockHeight,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub blocks_synced: u64,
}

pub struct RejectBatchEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub reason: BatchRejection,
}

pub struct ReceiveBlockRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub from_height: BlockHeight,
    pub count: u32,
}

pub struct SendBlockResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub from_height: BlockHeight,
    pub blocks: usize,
}

pub struct CeremonyPhaseChangeEvent {
    pub timestamp: SystemTime,
    pub epoch: EpochNumber,
    pub phase: CeremonyPhase,
}
