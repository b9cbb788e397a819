/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of the round-based consensus protocol.
//!
//! Main type: [`ConsensusEngine`].
//!
//! ## Rounds
//!
//! Each height is decided in one or more rounds. A round goes through the following steps:
//! 1. **Propose / AwaitingProposal**: the round's proposer broadcasts a [`Proposal`]; everyone else waits
//!    for it. When a valid proposal arrives, the replica prevotes for its block. If the step times out, the
//!    replica prevotes nil.
//! 2. **Prevote**: once a quorum of prevotes for a block is collected, the replica locks on the block and
//!    precommits it. A quorum of nil prevotes, or a timeout, makes the replica precommit nil.
//! 3. **Precommit**: a quorum of precommits for a block, in any round of the height, commits the block. A
//!    quorum of nil precommits, or a timeout, starts the next round.
//!
//! ## Locking
//!
//! After precommitting a block, the replica is locked on it for the rest of the height: it re-proposes the
//! locked block whenever it is the proposer, and prevotes nil for every other block, unless that block is
//! re-proposed with a prevote quorum from a round no earlier than the lock's.
//!
//! ## Driving the engine
//!
//! The engine never blocks and owns no timers. The algorithm thread calls its event handlers
//! ([`on_proposal_received`](ConsensusEngine::on_proposal_received),
//! [`on_vote_received`](ConsensusEngine::on_vote_received)) as messages arrive, and
//! [`tick`](ConsensusEngine::tick) whenever the current step's deadline may have passed.

use std::{
    collections::{HashMap, HashSet},
    sync::mpsc::Sender,
    time::SystemTime,
};

use crate::{
    app::{
        App, ProduceBlockRequest, ProduceBlockResponse, ValidateBlockRequest, ValidateBlockResponse,
    },
    chain_state::{pluggables::KVStore, state::ChainStateError},
    clock::Clock,
    commit::{CommitError, CommitPath},
    consensus::{
        eligibility::{eligibility_proof, select_proposer, selection_seed},
        messages::{CommitCertificate, Proposal, Vote, VoteStep},
        types::{Lock, RoundState, RoundTimeouts, Step},
    },
    events::{
        Event, ProposeEvent, ReceiveProposalEvent, ReceiveVoteEvent, RoundTimeoutEvent,
        StartRoundEvent, VoteEvent,
    },
    networking::{network::Network, sending::SenderHandle},
    pools::{
        proposals::{ProposalContext, ProposalPool},
        votes::VotePool,
        AddOutcome,
    },
    types::{
        block::{Block, BlockContents},
        crypto_primitives::{Keypair, VerifyingKey},
        data_types::{ChainID, CryptoHash, RoundNumber, Timestamp},
        update_sets::AppStateUpdates,
    },
};

/// A single participant in the consensus protocol.
pub(crate) struct ConsensusEngine<N: Network> {
    config: ConsensusConfiguration,
    head: Block,
    round_state: RoundState,
    proposals: ProposalPool,
    votes: VotePool,
    // Votes this replica has cast at the current height.
    voted: HashSet<(RoundNumber, VoteStep)>,
    // The app's verdicts on blocks proposed at the current height.
    validity: HashMap<CryptoHash, Validity>,
    syncing: bool,
    sender_handle: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

enum Validity {
    Valid(Option<AppStateUpdates>),
    Invalid,
}

impl<N: Network> ConsensusEngine<N> {
    /// Create an engine positioned at the height after the committed head of `path`. The first round only
    /// starts when [`start_height`](Self::start_height) is called.
    pub(crate) fn new<K: KVStore>(
        config: ConsensusConfiguration,
        path: &CommitPath<K, N>,
        clock: &impl Clock,
        sender_handle: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, ConsensusError> {
        let head = path.head().clone();
        let height = head.height + 1;
        let round_state = RoundState {
            height,
            round: RoundNumber::init(),
            step: Step::AwaitingProposal,
            deadline: clock.now() + config.timeouts.timeout(Step::AwaitingProposal, RoundNumber::init()),
            validator_set: path.validator_set_of(height)?,
            parent: head.hash,
            proposer: None,
            lock: None,
        };
        Ok(Self {
            config,
            head,
            round_state,
            proposals: ProposalPool::new(),
            votes: VotePool::new(),
            voted: HashSet::new(),
            validity: HashMap::new(),
            syncing: false,
            sender_handle,
            event_publisher,
        })
    }

    /// Start deciding the height after the current committed head, beginning at round 0.
    ///
    /// Called once when the algorithm thread starts, and again whenever the downloader has moved the head.
    pub(crate) fn start_height<K: KVStore>(
        &mut self,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        self.enter_height(path, app, clock)?;
        self.progress(path, app, clock)
    }

    /// Validate `proposal` and store it in the proposal pool. If it is the proposal the current round is
    /// waiting for, prevote on it.
    pub(crate) fn on_proposal_received<K: KVStore>(
        &mut self,
        origin: &VerifyingKey,
        proposal: Proposal,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<AddOutcome, ConsensusError> {
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: clock.system_time(),
            origin: *origin,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        let (height, round) = (proposal.height, proposal.round);
        let ctx = ProposalContext {
            chain_id: self.config.chain_id,
            height: self.round_state.height,
            round: self.round_state.round,
            parent: &self.head,
            validator_set: &self.round_state.validator_set,
        };
        let outcome = self.proposals.add(proposal, &ctx);
        if outcome != AddOutcome::Accepted {
            log::debug!(
                "Proposal for height {}, round {} not added: {:?}",
                height,
                round,
                outcome
            );
            return Ok(outcome);
        }

        self.progress(path, app, clock)?;
        Ok(outcome)
    }

    /// Add `vote` to the vote pool and act on any quorum it completes.
    pub(crate) fn on_vote_received<K: KVStore>(
        &mut self,
        origin: &VerifyingKey,
        vote: Vote,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<AddOutcome, ConsensusError> {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: clock.system_time(),
            origin: *origin,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        let (height, round, step) = (vote.height, vote.round, vote.step);
        let outcome = self.votes.add(
            vote,
            self.config.chain_id,
            &self.round_state.validator_set,
            self.round_state.height,
            self.round_state.round,
        );
        if outcome != AddOutcome::Accepted {
            log::debug!(
                "{:?} for height {}, round {} not added: {:?}",
                step,
                height,
                round,
                outcome
            );
            return Ok(outcome);
        }

        self.progress(path, app, clock)?;
        Ok(outcome)
    }

    /// Fire the timeout of the current step if its deadline has passed at `clock.now()`.
    ///
    /// While the replica is syncing, an expired precommit step does not start the next round.
    pub(crate) fn tick<K: KVStore>(
        &mut self,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        if clock.now() < self.round_state.deadline {
            return Ok(());
        }

        let step = self.round_state.step;
        match step {
            Step::AwaitingProposal | Step::Propose => {
                self.publish_timeout(step, clock);
                self.cast_vote(VoteStep::Prevote, None, clock);
                self.enter_step(Step::Prevote, clock);
            }
            Step::Prevote => {
                self.publish_timeout(step, clock);
                self.cast_vote(VoteStep::Precommit, None, clock);
                self.enter_step(Step::Precommit, clock);
            }
            Step::Precommit => {
                if self.syncing {
                    // Re-armed: the algorithm thread waits on this deadline.
                    self.enter_step(Step::Precommit, clock);
                    return Ok(());
                }
                self.publish_timeout(step, clock);
                self.start_round(self.round_state.round + 1, path, app, clock)?;
            }
            Step::Commit => return Ok(()),
        }

        self.progress(path, app, clock)
    }

    /// Suspend (or resume) round advancement while the downloader is fetching blocks.
    pub(crate) fn set_syncing(&mut self, syncing: bool) {
        self.syncing = syncing;
    }

    pub(crate) fn round_state(&self) -> &RoundState {
        &self.round_state
    }

    fn enter_height<K: KVStore>(
        &mut self,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        self.head = path.head().clone();
        let height = self.head.height + 1;
        self.round_state.height = height;
        self.round_state.parent = self.head.hash;
        self.round_state.validator_set = path.validator_set_of(height)?;
        self.round_state.lock = None;
        self.proposals.prune(height);
        self.votes.prune(height);
        self.voted.clear();
        self.validity.clear();

        self.start_round(RoundNumber::init(), path, app, clock)
    }

    fn start_round<K: KVStore>(
        &mut self,
        round: RoundNumber,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        let seed = selection_seed(&self.head.hash, self.round_state.height, round);
        let proposer = select_proposer(&self.round_state.validator_set, &seed);
        let i_am_proposer = proposer == Some(self.config.keypair.public());

        self.round_state.round = round;
        self.round_state.proposer = proposer;
        self.enter_step(
            if i_am_proposer {
                Step::Propose
            } else {
                Step::AwaitingProposal
            },
            clock,
        );

        Event::StartRound(StartRoundEvent {
            timestamp: clock.system_time(),
            height: self.round_state.height,
            round,
            proposer,
        })
        .publish(&self.event_publisher);

        if i_am_proposer {
            self.propose(path, app, clock);
        }
        Ok(())
    }

    /// Broadcast a proposal for the current round: the locked block if there is one, otherwise a new block
    /// produced by the app.
    fn propose<K: KVStore>(
        &mut self,
        path: &CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) {
        let (height, round) = (self.round_state.height, self.round_state.round);
        let seed = selection_seed(&self.head.hash, height, round);
        let proof = eligibility_proof(&self.config.keypair, &seed);

        let (block, locked_round) = match &self.round_state.lock {
            Some(lock) => (lock.block.clone(), Some(lock.round)),
            None => {
                let produce_block_request =
                    ProduceBlockRequest::new(height, &self.head, path.chain_state().snapshot());
                let ProduceBlockResponse {
                    transactions,
                    state_root,
                    app_state_updates,
                } = app.produce_block(produce_block_request);

                let ceremony_transactions = path
                    .ceremony()
                    .submissions_for_block(height, self.config.max_ceremony_transactions);

                let block = Block::new(
                    &self.config.keypair,
                    BlockContents {
                        height,
                        parent_hash: self.head.hash,
                        state_root,
                        timestamp: timestamp_of(clock.system_time()),
                        eligibility_proof: proof,
                        transactions,
                        ceremony_transactions,
                    },
                );
                self.validity
                    .insert(block.hash, Validity::Valid(app_state_updates));
                (block, None)
            }
        };

        let proposal = Proposal::new(
            &self.config.keypair,
            self.config.chain_id,
            round,
            locked_round,
            proof,
            block,
        );
        self.sender_handle.broadcast(proposal.clone());

        Event::Propose(ProposeEvent {
            timestamp: clock.system_time(),
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        let ctx = ProposalContext {
            chain_id: self.config.chain_id,
            height,
            round,
            parent: &self.head,
            validator_set: &self.round_state.validator_set,
        };
        let outcome = self.proposals.add(proposal, &ctx);
        if outcome != AddOutcome::Accepted {
            log::warn!("Own proposal for height {}, round {} not added: {:?}", height, round, outcome);
        }
    }

    /// Take steps until none of the rules below applies.
    fn progress<K: KVStore>(
        &mut self,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        while self.step_once(path, app, clock)? {}
        Ok(())
    }

    /// Apply the first rule that applies, in order of priority. Returns whether one did.
    fn step_once<K: KVStore>(
        &mut self,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<bool, ConsensusError> {
        let (height, round) = (self.round_state.height, self.round_state.round);

        // 1. Commit a block that a quorum precommitted in any round of this height.
        for (precommit_round, block) in self
            .votes
            .precommit_quorums(height, &self.round_state.validator_set)
        {
            if let Some(block) = self.known_block(&block) {
                self.commit(precommit_round, block, path, app, clock)?;
                return Ok(true);
            }
        }

        // 2. Move past a round in which a quorum precommitted nil.
        if !self.syncing {
            let nil_round = self
                .votes
                .rounds(height, VoteStep::Precommit)
                .into_iter()
                .filter(|precommit_round| *precommit_round >= round)
                .filter(|precommit_round| {
                    self.votes.quorum_value(
                        height,
                        *precommit_round,
                        VoteStep::Precommit,
                        &self.round_state.validator_set,
                    ) == Some(None)
                })
                .max();
            if let Some(nil_round) = nil_round {
                self.start_round(nil_round + 1, path, app, clock)?;
                return Ok(true);
            }
        }

        // 3. Prevote on the proposal of this round.
        if self.round_state.step.is_awaiting_proposal() {
            if let Some(proposal) = self.proposals.get(height, round).cloned() {
                let locked_on_other = match &self.round_state.lock {
                    Some(lock) if lock.block.hash != proposal.block.hash => {
                        !self.has_polka_since(lock.round, &proposal)
                    }
                    _ => false,
                };
                let prevote = if !locked_on_other && self.is_valid(&proposal.block, path, app) {
                    Some(proposal.block.hash)
                } else {
                    None
                };
                self.cast_vote(VoteStep::Prevote, prevote, clock);
                self.enter_step(Step::Prevote, clock);
                return Ok(true);
            }
        }

        // 4. Lock and precommit on a prevote quorum of this round.
        if self.round_state.step == Step::Prevote {
            if let Some(value) = self.votes.quorum_value(
                height,
                round,
                VoteStep::Prevote,
                &self.round_state.validator_set,
            ) {
                let precommit = match value.and_then(|block| self.known_block(&block)) {
                    Some(block) if self.is_valid(&block, path, app) => {
                        let hash = block.hash;
                        self.round_state.lock = Some(Lock { round, block });
                        Some(hash)
                    }
                    _ => None,
                };
                self.cast_vote(VoteStep::Precommit, precommit, clock);
                self.enter_step(Step::Precommit, clock);
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Commit `block`, which a quorum precommitted in `round`, through the shared commit path, then start
    /// the next height.
    fn commit<K: KVStore>(
        &mut self,
        round: RoundNumber,
        block: Block,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<(), ConsensusError> {
        let height = self.round_state.height;
        if !self.is_valid(&block, path, app) {
            return Err(ConsensusError::CommittedBlockRejected { block: block.hash });
        }
        let app_state_updates = match self.validity.remove(&block.hash) {
            Some(Validity::Valid(app_state_updates)) => app_state_updates,
            _ => None,
        };
        let certificate = CommitCertificate {
            chain_id: self.config.chain_id,
            height,
            round,
            block: block.hash,
            precommits: self
                .votes
                .votes_for(height, round, VoteStep::Precommit, &Some(block.hash)),
        };

        self.round_state.step = Step::Commit;
        match path.commit(block, certificate, app_state_updates, false, clock) {
            Ok(()) => {}
            Err(err) if err.is_already_committed() => {
                log::debug!("Height {} was committed by the downloader first", height)
            }
            Err(err) => return Err(err.into()),
        }

        self.enter_height(path, app, clock)
    }

    /// Sign and broadcast a vote, and count it in the vote pool. Does nothing if the replica is not a
    /// validator of the current height, or has already cast a vote of `step` in the current round.
    fn cast_vote(&mut self, step: VoteStep, block: Option<CryptoHash>, clock: &impl Clock) {
        let (height, round) = (self.round_state.height, self.round_state.round);
        if !self
            .round_state
            .validator_set
            .contains(&self.config.keypair.public())
            || !self.voted.insert((round, step))
        {
            return;
        }

        let vote = Vote::new(
            &self.config.keypair,
            self.config.chain_id,
            height,
            round,
            step,
            block,
        );
        self.sender_handle.broadcast(vote.clone());
        self.votes.add(
            vote.clone(),
            self.config.chain_id,
            &self.round_state.validator_set,
            height,
            round,
        );

        Event::Vote(VoteEvent {
            timestamp: clock.system_time(),
            vote,
        })
        .publish(&self.event_publisher);
    }

    /// Whether `proposal` re-proposes a block that a quorum prevoted in a round at or after `lock_round`
    /// and before the proposal's round. Such a proposal releases a lock on another block.
    fn has_polka_since(&self, lock_round: RoundNumber, proposal: &Proposal) -> bool {
        let Some(polka_round) = proposal.locked_round else {
            return false;
        };
        polka_round >= lock_round
            && polka_round < proposal.round
            && self.votes.quorum_value(
                proposal.height,
                polka_round,
                VoteStep::Prevote,
                &self.round_state.validator_set,
            ) == Some(Some(proposal.block.hash))
    }

    fn enter_step(&mut self, step: Step, clock: &impl Clock) {
        self.round_state.step = step;
        self.round_state.deadline =
            clock.now() + self.config.timeouts.timeout(step, self.round_state.round);
    }

    fn publish_timeout(&self, step: Step, clock: &impl Clock) {
        Event::RoundTimeout(RoundTimeoutEvent {
            timestamp: clock.system_time(),
            height: self.round_state.height,
            round: self.round_state.round,
            step,
        })
        .publish(&self.event_publisher);
    }

    /// A block of the current height with hash `block` that this replica has seen, either in a proposal or
    /// as its lock.
    fn known_block(&self, block: &CryptoHash) -> Option<Block> {
        match &self.round_state.lock {
            Some(lock) if &lock.block.hash == block => Some(lock.block.clone()),
            _ => self
                .proposals
                .block(self.round_state.height, block)
                .cloned(),
        }
    }

    /// Ask the app whether `block` is valid, remembering the verdict for the rest of the height.
    fn is_valid<K: KVStore>(
        &mut self,
        block: &Block,
        path: &CommitPath<K, N>,
        app: &mut impl App<K>,
    ) -> bool {
        if !self.validity.contains_key(&block.hash) {
            let validate_block_request =
                ValidateBlockRequest::new(block, path.chain_state().snapshot());
            let validity = match app.validate_block(validate_block_request) {
                ValidateBlockResponse::Valid { app_state_updates } => {
                    Validity::Valid(app_state_updates)
                }
                ValidateBlockResponse::Invalid => {
                    log::warn!(
                        "App rejected block {} proposed at height {}",
                        block.hash,
                        block.height
                    );
                    Validity::Invalid
                }
            };
            self.validity.insert(block.hash, validity);
        }
        matches!(self.validity.get(&block.hash), Some(Validity::Valid(_)))
    }
}

fn timestamp_of(time: SystemTime) -> Timestamp {
    Timestamp::new(
        time.duration_since(SystemTime::UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0),
    )
}

/// Configuration parameters for the [`ConsensusEngine`].
#[derive(Clone)]
pub(crate) struct ConsensusConfiguration {
    pub(crate) chain_id: ChainID,
    pub(crate) keypair: Keypair,
    pub(crate) timeouts: RoundTimeouts,
    pub(crate) max_ceremony_transactions: usize,
}

/// The different ways a call to a method of the [`ConsensusEngine`] can fail. All of them are fatal to
/// the algorithm thread.
#[derive(Debug)]
pub enum ConsensusError {
    ChainStateError(ChainStateError),
    CommitError(CommitError),
    /// A quorum precommitted a block that this replica's app considers invalid.
    CommittedBlockRejected { block: CryptoHash },
}

impl From<ChainStateError> for ConsensusError {
    fn from(value: ChainStateError) -> Self {
        ConsensusError::ChainStateError(value)
    }
}

impl From<CommitError> for ConsensusError {
    fn from(value: CommitError) -> Self {
        ConsensusError::CommitError(value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand_core::OsRng;

    use super::*;
    use crate::{
        consensus::eligibility::{eligibility_proof, select_proposer, selection_seed},
        testing::{self, AcceptAll, ManualClock, MemStore, RecordingNetwork, CHAIN_ID},
        types::{
            crypto_primitives::SigningKey,
            data_types::{BlockHeight, SignatureBytes},
        },
    };

    /// Three validators of weight 1, watched by an engine that is not one of them, so that every vote in
    /// a test comes from the test itself.
    struct Fixture {
        validators: Vec<Keypair>,
        genesis: Block,
        engine: ConsensusEngine<RecordingNetwork>,
        path: CommitPath<MemStore, RecordingNetwork>,
        app: AcceptAll,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            Self::build(false)
        }

        /// Four validators of weight 1, the last of which is the engine.
        fn voting() -> Self {
            Self::build(true)
        }

        fn build(engine_votes: bool) -> Self {
            let mut validators = testing::keypairs(3);
            let engine_keypair = Keypair::new(SigningKey::generate(&mut OsRng));
            if engine_votes {
                validators.push(engine_keypair.clone());
            }
            let genesis = testing::genesis();
            let validator_set = testing::validator_set_of(&validators);
            let mut path = testing::commit_path(&validator_set, RecordingNetwork::default());

            let clock = ManualClock::new();
            let config = ConsensusConfiguration {
                chain_id: CHAIN_ID,
                keypair: engine_keypair,
                timeouts: RoundTimeouts::default(),
                max_ceremony_transactions: 16,
            };
            let mut engine = ConsensusEngine::new(
                config,
                &path,
                &clock,
                SenderHandle::new(RecordingNetwork::default()),
                None,
            )
            .unwrap();
            let mut app = AcceptAll;
            engine.start_height(&mut path, &mut app, &clock).unwrap();

            Fixture {
                validators,
                genesis,
                engine,
                path,
                app,
                clock,
            }
        }

        /// A block for height 1 produced by validator `producer`. Blocks with different `tag`s differ.
        fn block_by(&self, producer: usize, tag: u8) -> Block {
            Block::new(
                &self.validators[producer],
                BlockContents {
                    height: BlockHeight::new(1),
                    parent_hash: self.genesis.hash,
                    state_root: CryptoHash::new([tag; 32]),
                    timestamp: Timestamp::new(1),
                    eligibility_proof: SignatureBytes::zero(),
                    transactions: Vec::new(),
                    ceremony_transactions: Vec::new(),
                },
            )
        }

        /// The engine's own prevote in `round`, if it cast one.
        fn own_prevote(&self, round: RoundNumber) -> Option<Option<CryptoHash>> {
            let me = self.engine.config.keypair.public_bytes();
            self.engine
                .votes
                .tally(BlockHeight::new(1), round, VoteStep::Prevote)
                .into_keys()
                .find(|value| {
                    self.engine
                        .votes
                        .votes_for(BlockHeight::new(1), round, VoteStep::Prevote, value)
                        .iter()
                        .any(|vote| vote.voter == me)
                })
        }

        fn proposer_of(&self, round: RoundNumber) -> &Keypair {
            let seed = selection_seed(&self.genesis.hash, BlockHeight::new(1), round);
            let proposer =
                select_proposer(&self.engine.round_state().validator_set, &seed).unwrap();
            self.validators
                .iter()
                .find(|validator| validator.public() == proposer)
                .unwrap()
        }

        /// Deliver a valid proposal for height 1 in `round`, and return its block hash.
        fn deliver_proposal(&mut self, round: RoundNumber) -> CryptoHash {
            let proposer = self.proposer_of(round).clone();
            let seed = selection_seed(&self.genesis.hash, BlockHeight::new(1), round);
            let proof = eligibility_proof(&proposer, &seed);
            let block = Block::new(
                &proposer,
                BlockContents {
                    height: BlockHeight::new(1),
                    parent_hash: self.genesis.hash,
                    state_root: CryptoHash::zero(),
                    timestamp: Timestamp::new(1),
                    eligibility_proof: proof,
                    transactions: Vec::new(),
                    ceremony_transactions: Vec::new(),
                },
            );
            let hash = block.hash;
            let proposal = Proposal::new(&proposer, CHAIN_ID, round, None, proof, block);
            let outcome = self
                .engine
                .on_proposal_received(
                    &proposer.public(),
                    proposal,
                    &mut self.path,
                    &mut self.app,
                    &self.clock,
                )
                .unwrap();
            assert_eq!(outcome, AddOutcome::Accepted);
            hash
        }

        fn deliver_vote(
            &mut self,
            voter: usize,
            round: RoundNumber,
            step: VoteStep,
            block: Option<CryptoHash>,
        ) {
            let voter = self.validators[voter].clone();
            let vote = Vote::new(&voter, CHAIN_ID, BlockHeight::new(1), round, step, block);
            self.engine
                .on_vote_received(
                    &voter.public(),
                    vote,
                    &mut self.path,
                    &mut self.app,
                    &self.clock,
                )
                .unwrap();
        }

        fn expire_step(&mut self) {
            self.clock.advance(Duration::from_secs(30));
            self.engine
                .tick(&mut self.path, &mut self.app, &self.clock)
                .unwrap();
        }
    }

    #[test]
    fn two_of_three_votes_do_not_commit_and_the_round_times_out() {
        let mut fixture = Fixture::new();
        let round = RoundNumber::init();
        let block = fixture.deliver_proposal(round);
        assert_eq!(fixture.engine.round_state().step, Step::Prevote);

        for voter in 0..2 {
            fixture.deliver_vote(voter, round, VoteStep::Prevote, Some(block));
            fixture.deliver_vote(voter, round, VoteStep::Precommit, Some(block));
        }
        assert_eq!(fixture.engine.round_state().step, Step::Prevote);
        assert_eq!(fixture.path.head().height, BlockHeight::new(0));

        // Prevote timeout, then precommit timeout.
        fixture.expire_step();
        assert_eq!(fixture.engine.round_state().step, Step::Precommit);
        fixture.expire_step();

        let round_state = fixture.engine.round_state();
        assert_eq!(round_state.height, BlockHeight::new(1));
        assert_eq!(round_state.round, RoundNumber::new(1));
        assert!(round_state.step.is_awaiting_proposal());
        assert_eq!(fixture.path.head().height, BlockHeight::new(0));
    }

    #[test]
    fn three_of_three_precommits_commit_the_block() {
        let mut fixture = Fixture::new();
        let round = RoundNumber::init();
        let block = fixture.deliver_proposal(round);

        for voter in 0..3 {
            fixture.deliver_vote(voter, round, VoteStep::Precommit, Some(block));
        }

        assert_eq!(fixture.path.head().hash, block);
        assert_eq!(fixture.engine.round_state().height, BlockHeight::new(2));
        assert_eq!(fixture.engine.round_state().round, RoundNumber::init());
    }

    #[test]
    fn duplicate_votes_do_not_add_weight() {
        let mut fixture = Fixture::new();
        let round = RoundNumber::init();
        let block = fixture.deliver_proposal(round);

        for _ in 0..3 {
            fixture.deliver_vote(0, round, VoteStep::Precommit, Some(block));
            fixture.deliver_vote(1, round, VoteStep::Precommit, Some(block));
        }

        assert_eq!(fixture.path.head().height, BlockHeight::new(0));
    }

    #[test]
    fn nil_precommit_quorum_starts_the_next_round() {
        let mut fixture = Fixture::new();
        let round = RoundNumber::init();
        fixture.deliver_proposal(round);

        for voter in 0..3 {
            fixture.deliver_vote(voter, round, VoteStep::Precommit, None);
        }

        assert_eq!(fixture.engine.round_state().round, RoundNumber::new(1));
        assert_eq!(fixture.path.head().height, BlockHeight::new(0));
    }

    #[test]
    fn syncing_suspends_round_advancement() {
        let mut fixture = Fixture::new();
        fixture.engine.set_syncing(true);

        // Propose timeout, then prevote timeout, then a precommit timeout that does nothing.
        fixture.expire_step();
        fixture.expire_step();
        fixture.expire_step();

        let round_state = fixture.engine.round_state();
        assert_eq!(round_state.round, RoundNumber::init());
        assert_eq!(round_state.step, Step::Precommit);
        assert!(round_state.deadline > fixture.clock.now());

        fixture.engine.set_syncing(false);
        fixture.expire_step();
        assert_eq!(fixture.engine.round_state().round, RoundNumber::new(1));
    }

    /// Lock the engine on a block in round 0, move to a later round proposed by someone else, and have that
    /// proposer re-propose another block from the round before. Returns the re-proposed block's hash and
    /// the engine's prevote.
    fn relock_scenario(with_prevote_quorum: bool) -> (CryptoHash, Option<Option<CryptoHash>>) {
        let mut fixture = Fixture::voting();
        let me = fixture.engine.config.keypair.public();
        let round = (2..)
            .map(RoundNumber::new)
            .find(|round| fixture.proposer_of(*round).public() != me)
            .unwrap();
        let polka_round = RoundNumber::new(round.int() - 1);

        let locked = fixture.block_by(0, 1);
        fixture.engine.round_state.lock = Some(Lock {
            round: RoundNumber::init(),
            block: locked,
        });
        for voter in 0..3 {
            fixture.deliver_vote(voter, polka_round, VoteStep::Precommit, None);
        }
        assert_eq!(fixture.engine.round_state().round, round);
        assert!(fixture.engine.round_state().step.is_awaiting_proposal());

        let relocked = fixture.block_by(1, 2);
        if with_prevote_quorum {
            for voter in 0..3 {
                fixture.deliver_vote(voter, polka_round, VoteStep::Prevote, Some(relocked.hash));
            }
        }

        let proposer = fixture.proposer_of(round).clone();
        let seed = selection_seed(&fixture.genesis.hash, BlockHeight::new(1), round);
        let proof = eligibility_proof(&proposer, &seed);
        let hash = relocked.hash;
        let proposal = Proposal::new(&proposer, CHAIN_ID, round, Some(polka_round), proof, relocked);
        let outcome = fixture
            .engine
            .on_proposal_received(
                &proposer.public(),
                proposal,
                &mut fixture.path,
                &mut fixture.app,
                &fixture.clock,
            )
            .unwrap();
        assert_eq!(outcome, AddOutcome::Accepted);

        (hash, fixture.own_prevote(round))
    }

    #[test]
    fn later_prevote_quorum_releases_the_lock() {
        let (relocked, prevote) = relock_scenario(true);
        assert_eq!(prevote, Some(Some(relocked)));
    }

    #[test]
    fn lock_holds_without_a_later_prevote_quorum() {
        let (_, prevote) = relock_scenario(false);
        assert_eq!(prevote, Some(None));
    }
}
