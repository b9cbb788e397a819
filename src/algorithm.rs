/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, the driving force of a replica.
//!
//! The thread owns every component that reads or writes the chain state: the [consensus
//! engine](crate::consensus), the [downloader](crate::downloader), and the [`CommitPath`] with the
//! [validation ceremony](crate::ceremony) inside it. Having a single owner makes it the single writer of
//! the chain state, so the engine and the downloader never race to commit a height.
//!
//! Each iteration of the loop:
//! 1. Receives at most one [`ProgressMessage`], waiting no later than the current round's deadline, and
//!    hands it to the component it is for.
//! 2. Lets the downloader fire its deadlines (response timeout, probe timer, backoff).
//! 3. Tells the engine whether the downloader is syncing, and lets the engine fire the current step's
//!    timeout.
//! 4. Publishes the resulting state on the [`StatusBoard`].
//!
//! Whenever the downloader commits blocks, the engine abandons its current height and starts deciding the
//! height above the new head.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    app::App,
    chain_state::pluggables::KVStore,
    clock::Clock,
    commit::CommitPath,
    consensus::{
        implementation::{ConsensusEngine, ConsensusError},
        messages::ConsensusMessage,
    },
    downloader::implementation::{Downloader, DownloaderError},
    networking::{
        messages::ProgressMessage,
        network::Network,
        receiving::{ProgressMessageReceiveError, ProgressMessageStub},
    },
    pools::AddOutcome,
    status::StatusBoard,
    types::{crypto_primitives::VerifyingKey, data_types::ChainID},
};

/// Upper bound on how long the loop waits for a message, so that the downloader's deadlines are checked
/// regularly even when the current round's deadline is far away.
const MAX_WAIT: Duration = Duration::from_millis(50);

pub(crate) struct Algorithm<K: KVStore, N: Network + 'static, A: App<K>, C: Clock> {
    chain_id: ChainID,
    app: A,
    path: CommitPath<K, N>,
    engine: ConsensusEngine<N>,
    downloader: Downloader<N>,
    progress_msg_stub: ProgressMessageStub,
    status: StatusBoard,
    clock: C,
    shutdown_signal: Receiver<()>,
}

impl<K: KVStore, N: Network + 'static, A: App<K>, C: Clock> Algorithm<K, N, A, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chain_id: ChainID,
        app: A,
        path: CommitPath<K, N>,
        engine: ConsensusEngine<N>,
        downloader: Downloader<N>,
        progress_msg_stub: ProgressMessageStub,
        status: StatusBoard,
        clock: C,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            chain_id,
            app,
            path,
            engine,
            downloader,
            progress_msg_stub,
            status,
            clock,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = self.execute() {
                log::error!("Algorithm thread halted: {:?}", err);
            }
        })
    }

    fn execute(&mut self) -> Result<(), AlgorithmError> {
        self.engine
            .start_height(&mut self.path, &mut self.app, &self.clock)?;
        self.publish_status();

        loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return Ok(()),
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Algorithm thread disconnected from main thread")
                }
            }

            // 1. Handle a message, if one arrives before the round's deadline.
            let wait = self
                .engine
                .round_state()
                .deadline
                .saturating_duration_since(self.clock.now())
                .min(MAX_WAIT);
            let height = self.engine.round_state().height;
            match self.progress_msg_stub.recv(self.chain_id, height, wait) {
                Ok((origin, msg)) => self.on_receive_msg(origin, msg)?,
                Err(ProgressMessageReceiveError::Timeout) => (),
                Err(ProgressMessageReceiveError::Disconnected) => return Ok(()),
            }

            // 2. Fire the downloader's deadlines.
            self.downloader.tick(self.path.head(), &self.clock);

            // 3. Fire the round's timeout, unless syncing suspends it.
            self.engine.set_syncing(self.downloader.is_syncing());
            self.engine
                .tick(&mut self.path, &mut self.app, &self.clock)?;

            // 4. Publish what happened.
            self.publish_status();
        }
    }

    fn on_receive_msg(&mut self, origin: VerifyingKey, msg: ProgressMessage) -> Result<(), AlgorithmError> {
        match msg {
            ProgressMessage::ConsensusMessage(ConsensusMessage::Proposal(proposal)) => {
                self.engine.on_proposal_received(
                    &origin,
                    proposal,
                    &mut self.path,
                    &mut self.app,
                    &self.clock,
                )?;
            }
            ProgressMessage::ConsensusMessage(ConsensusMessage::Vote(vote)) => {
                self.engine.on_vote_received(
                    &origin,
                    vote,
                    &mut self.path,
                    &mut self.app,
                    &self.clock,
                )?;
            }
            ProgressMessage::CeremonyMessage(submission) => {
                let outcome = self.path.ceremony_mut().on_submission(submission);
                if outcome != AddOutcome::Accepted {
                    log::debug!("Ceremony submission from {:?} not pooled: {:?}", origin, outcome);
                }
            }
            ProgressMessage::BlockResponse(response) => {
                let applied = self.downloader.on_block_response(
                    &origin,
                    response,
                    &mut self.path,
                    &mut self.app,
                    &self.clock,
                )?;
                if applied > 0 {
                    self.engine.set_syncing(self.downloader.is_syncing());
                    self.engine
                        .start_height(&mut self.path, &mut self.app, &self.clock)?;
                }
            }
            ProgressMessage::HeaderAnnouncement(announcement) => {
                self.downloader.on_header_announcement(
                    &origin,
                    announcement,
                    self.path.head(),
                    &self.clock,
                );
            }
        }
        Ok(())
    }

    fn publish_status(&self) {
        let head = self.path.head();
        let ceremony = self.path.ceremony();
        self.status.update(|status| {
            status.head_height = head.height;
            status.head_hash = head.hash;
            status.round = Some(self.engine.round_state().summary());
            status.epoch = ceremony.epoch();
            status.ceremony_phase = ceremony.phase();
            status.sync = Some(self.downloader.status());
        });
    }
}

/// Fatal errors of the algorithm thread.
#[derive(Debug)]
pub(crate) enum AlgorithmError {
    ConsensusError(ConsensusError),
    DownloaderError(DownloaderError),
}

impl From<ConsensusError> for AlgorithmError {
    fn from(value: ConsensusError) -> Self {
        AlgorithmError::ConsensusError(value)
    }
}

impl From<DownloaderError> for AlgorithmError {
    fn from(value: DownloaderError) -> Self {
        AlgorithmError::DownloaderError(value)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        clock::SystemClock,
        consensus::{
            implementation::ConsensusConfiguration,
            types::{RoundTimeouts, Step},
        },
        downloader::{
            messages::{BlockResponse, HeaderAnnouncement},
            types::DownloaderConfiguration,
        },
        networking::sending::SenderHandle,
        testing::{self, certified_chain, AcceptAll, RecordingNetwork, CHAIN_ID},
        types::data_types::{BlockHeight, ChainWeight, CryptoHash, RoundNumber},
    };

    fn wait_until(description: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting until {}", description);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn block_responses_are_applied_while_syncing_holds_the_round() {
        let validators = testing::keypairs(3);
        let network = RecordingNetwork::default();
        let path = testing::commit_path(&testing::validator_set_of(&validators), network.clone());
        let clock = SystemClock;

        let config = ConsensusConfiguration {
            chain_id: CHAIN_ID,
            keypair: testing::keypairs(1).remove(0),
            timeouts: RoundTimeouts {
                propose: Duration::from_millis(10),
                prevote: Duration::from_millis(10),
                precommit: Duration::from_millis(10),
                increment: Duration::ZERO,
            },
            max_ceremony_transactions: 16,
        };
        let engine =
            ConsensusEngine::new(config, &path, &clock, SenderHandle::new(network.clone()), None)
                .unwrap();
        let downloader = Downloader::new(
            CHAIN_ID,
            DownloaderConfiguration {
                response_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            SenderHandle::new(network.clone()),
            &clock,
            None,
        );

        let (to_algorithm, progress_msgs) = mpsc::channel();
        let (shutdown, shutdown_signal) = mpsc::channel();
        let status = StatusBoard::new(path.head().height, path.head().hash);
        let algorithm_thread = Algorithm::new(
            CHAIN_ID,
            AcceptAll,
            path,
            engine,
            downloader,
            ProgressMessageStub::new(progress_msgs, 100),
            status.clone(),
            clock,
            shutdown_signal,
        )
        .start();

        let peer = testing::keypairs(1).remove(0);
        let announcement = HeaderAnnouncement {
            chain_id: CHAIN_ID,
            height: BlockHeight::new(3),
            weight: ChainWeight::of_height(BlockHeight::new(3)),
            head: CryptoHash::zero(),
        };
        to_algorithm
            .send((peer.public(), ProgressMessage::HeaderAnnouncement(announcement)))
            .unwrap();
        wait_until("a block request is sent", || {
            network.block_requests() == vec![peer.public()]
        });

        // Every step of round 0 expires; syncing keeps the round at its precommit step.
        thread::sleep(Duration::from_millis(200));
        let held = status.get();
        assert!(held.is_syncing());
        assert_eq!(
            held.round.map(|round| (round.round, round.step)),
            Some((RoundNumber::init(), Step::Precommit))
        );

        let response = BlockResponse {
            chain_id: CHAIN_ID,
            from_height: BlockHeight::new(1),
            blocks: certified_chain(&validators, &testing::genesis(), 3),
        };
        to_algorithm
            .send((peer.public(), ProgressMessage::BlockResponse(response)))
            .unwrap();
        wait_until("the batch is applied", || {
            status.get().head_height == BlockHeight::new(3)
        });

        shutdown.send(()).unwrap();
        algorithm_thread.join().unwrap();
    }
}
