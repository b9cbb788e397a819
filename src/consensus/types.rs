/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that track the progress of the consensus engine through heights, rounds and steps.

use std::time::{Duration, Instant};

use crate::types::{
    block::Block,
    crypto_primitives::VerifyingKey,
    data_types::{BlockHeight, CryptoHash, RoundNumber},
    validator_set::ValidatorSet,
};

/// Step of a round.
///
/// A round starts in `Propose` if this replica is the round's proposer, and in `AwaitingProposal`
/// otherwise. Both end with a prevote (for the proposal, or nil on timeout). `Commit` is entered once a
/// precommit quorum for a block is seen and lasts until the next height starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    AwaitingProposal,
    Propose,
    Prevote,
    Precommit,
    Commit,
}

impl Step {
    pub fn is_awaiting_proposal(&self) -> bool {
        matches!(self, Step::AwaitingProposal | Step::Propose)
    }
}

/// A block this replica precommitted, and the round in which it did so. While locked, the replica
/// prevotes nil for every other block at the same height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lock {
    pub round: RoundNumber,
    pub block: Block,
}

/// State of the current round.
#[derive(Clone, Debug)]
pub struct RoundState {
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub step: Step,
    pub deadline: Instant,
    /// The validator set of `height`, fixed before any vote for `height` is evaluated.
    pub validator_set: ValidatorSet,
    pub parent: CryptoHash,
    pub proposer: Option<VerifyingKey>,
    /// Lock carried across rounds of the same height.
    pub lock: Option<Lock>,
}

impl RoundState {
    pub fn summary(&self) -> RoundStateSummary {
        RoundStateSummary {
            height: self.height,
            round: self.round,
            step: self.step,
            proposer: self.proposer,
            locked_block: self.lock.as_ref().map(|lock| lock.block.hash),
        }
    }
}

/// A cloneable summary of [`RoundState`] published on the status board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundStateSummary {
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub step: Step,
    pub proposer: Option<VerifyingKey>,
    pub locked_block: Option<CryptoHash>,
}

/// Step timeouts. Each grows linearly with the round number: `base + round * increment`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundTimeouts {
    pub propose: Duration,
    pub prevote: Duration,
    pub precommit: Duration,
    pub increment: Duration,
}

impl RoundTimeouts {
    pub fn timeout(&self, step: Step, round: RoundNumber) -> Duration {
        let base = match step {
            Step::AwaitingProposal | Step::Propose => self.propose,
            Step::Prevote => self.prevote,
            Step::Precommit | Step::Commit => self.precommit,
        };
        base.saturating_add(self.increment.saturating_mul(round.int()))
    }
}

impl Default for RoundTimeouts {
    fn default() -> Self {
        RoundTimeouts {
            propose: Duration::from_secs(3),
            prevote: Duration::from_secs(1),
            precommit: Duration::from_secs(1),
            increment: Duration::from_millis(500),
        }
    }
}
