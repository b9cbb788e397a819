/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used by the validation ceremony: its phases, the schedule that maps block heights to phases,
//! and the aggregated results of an epoch.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{BlockHeight, EpochNumber, VerifyingKeyBytes},
    validator_set::ValidatorSet,
};

use super::messages::Session;

/// Phase of the validation ceremony. Phases only ever move forward within an epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub enum CeremonyPhase {
    Idle,
    FlipSubmission,
    ShortSession,
    LongSession,
    Aggregation,
}

impl CeremonyPhase {
    /// The answer session that is open during this phase, if any.
    pub fn session(&self) -> Option<Session> {
        match self {
            CeremonyPhase::ShortSession => Some(Session::Short),
            CeremonyPhase::LongSession => Some(Session::Long),
            _ => None,
        }
    }
}

/// Static parameters of the ceremony.
///
/// Heights `1..=epoch_length` belong to epoch 0, the next `epoch_length` heights to epoch 1, and so on.
/// The `*_start` fields are positions inside an epoch (1 is the first block of the epoch, `epoch_length` the
/// last) at which each phase begins. The last block of an epoch is its boundary block: committing it
/// closes the epoch and produces the next validator set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CeremonySchedule {
    pub epoch_length: u64,
    pub flip_submission_start: u64,
    pub short_session_start: u64,
    pub long_session_start: u64,
    pub aggregation_start: u64,

    /// Number of flips an identity must submit to be able to pass.
    pub required_flips: u32,
    /// Number of flips each identity is assigned in the short session.
    pub short_session_flips: u32,
    /// Number of flips each identity is assigned in the long session.
    pub long_session_flips: u32,
    /// Minimum percentage of agreeing answers an identity needs to pass.
    pub pass_threshold_percent: u8,
}

impl Default for CeremonySchedule {
    fn default() -> Self {
        CeremonySchedule {
            epoch_length: 100,
            flip_submission_start: 10,
            short_session_start: 40,
            long_session_start: 50,
            aggregation_start: 80,
            required_flips: 1,
            short_session_flips: 3,
            long_session_flips: 6,
            pass_threshold_percent: 75,
        }
    }
}

impl CeremonySchedule {
    /// Check that every phase lasts at least one block and that all phases fit in an epoch.
    pub fn is_valid(&self) -> bool {
        1 <= self.flip_submission_start
            && self.flip_submission_start < self.short_session_start
            && self.short_session_start < self.long_session_start
            && self.long_session_start < self.aggregation_start
            && self.aggregation_start <= self.epoch_length
            && self.pass_threshold_percent <= 100
    }

    pub fn epoch_of(&self, height: BlockHeight) -> EpochNumber {
        if height == BlockHeight::genesis() {
            EpochNumber::new(0)
        } else {
            EpochNumber::new((height.int() - 1) / self.epoch_length)
        }
    }

    /// Position of `height` inside its epoch, from 1 to `epoch_length`. Genesis is at position 0.
    pub fn position_in_epoch(&self, height: BlockHeight) -> u64 {
        if height == BlockHeight::genesis() {
            0
        } else {
            (height.int() - 1) % self.epoch_length + 1
        }
    }

    pub fn is_epoch_boundary(&self, height: BlockHeight) -> bool {
        height.int() > 0 && height.int() % self.epoch_length == 0
    }

    pub fn first_height_of(&self, epoch: EpochNumber) -> BlockHeight {
        BlockHeight::new(epoch.int() * self.epoch_length + 1)
    }

    /// The boundary block of `epoch`.
    pub fn last_height_of(&self, epoch: EpochNumber) -> BlockHeight {
        BlockHeight::new((epoch.int() + 1) * self.epoch_length)
    }

    /// The phase that the block at `height` belongs to. Ceremony transactions are only counted if they
    /// are included in a block of the matching phase.
    pub fn phase_at(&self, height: BlockHeight) -> CeremonyPhase {
        let position = self.position_in_epoch(height);
        if position < self.flip_submission_start {
            CeremonyPhase::Idle
        } else if position < self.short_session_start {
            CeremonyPhase::FlipSubmission
        } else if position < self.long_session_start {
            CeremonyPhase::ShortSession
        } else if position < self.aggregation_start {
            CeremonyPhase::LongSession
        } else {
            CeremonyPhase::Aggregation
        }
    }

    /// Number of flips assigned in `session`.
    pub fn session_flips(&self, session: Session) -> usize {
        match session {
            Session::Short => self.short_session_flips as usize,
            Session::Long => self.long_session_flips as usize,
        }
    }
}

/// How one identity fared in the ceremony of an epoch.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IdentityScore {
    pub identity: VerifyingKeyBytes,
    pub flips_submitted: u32,
    /// Assigned flips that reached a majority.
    pub judged_flips: u32,
    /// Answers that matched the majority of a judged flip.
    pub agreeing_answers: u32,
    pub passed: bool,
}

/// The aggregated outcome of the ceremony of `epoch`, frozen when the epoch's boundary block is committed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CeremonyResults {
    pub epoch: EpochNumber,
    pub scores: Vec<IdentityScore>,
    /// Whether nobody passed and the validator set of `epoch` was carried over unchanged.
    pub kept_previous_set: bool,
}

impl CeremonyResults {
    pub fn passed(&self) -> impl Iterator<Item = &VerifyingKeyBytes> {
        self.scores
            .iter()
            .filter(|score| score.passed)
            .map(|score| &score.identity)
    }
}

/// Output of [`apply_new_epoch`](super::implementation::ValidationCeremony::apply_new_epoch): the validator
/// set of `next_epoch` and the results it was derived from. Persisted in the same write batch as the
/// boundary block.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochTransition {
    pub next_epoch: EpochNumber,
    pub validator_set: ValidatorSet,
    pub results: CeremonyResults,
}
