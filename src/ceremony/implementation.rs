/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validation ceremony state machine.
//!
//! Main type: [`ValidationCeremony`].
//!
//! ## Flow of an epoch
//!
//! The ceremony only ever advances on committed heights. For every committed block, the commit path calls:
//! 1. [`on_block`](ValidationCeremony::on_block), which records the ceremony transactions included in the
//!    block that match the phase of its height,
//! 2. [`apply_new_epoch`](ValidationCeremony::apply_new_epoch), which at the epoch boundary aggregates the
//!    epoch's submissions into [`CeremonyResults`] and the next validator set,
//! 3. [`on_new_height`](ValidationCeremony::on_new_height), which moves the phase forward to the phase of
//!    the next height.
//!
//! ## Flip assignment
//!
//! Once the last block of the flip submission phase is committed, its hash becomes the assignment seed.
//! Every identity is then assigned the flips it did not author, ranked by `SHA256(seed ‖ identity ‖
//! flip_hash)`: the first `short_session_flips` of them in the short session, and the next
//! `long_session_flips` in the long session.
//!
//! ## Aggregation
//!
//! A flip's verdict is the majority of the answers given to it. A flip with as many `Human` as `NotHuman`
//! answers (including none at all) has no verdict and is not judged. An identity passes if it submitted
//! at least `required_flips` flips, answered at least one of the flips assigned to it, and agreed with the
//! verdict of at least `pass_threshold_percent` percent of its judged assigned flips. An assigned flip
//! left unanswered counts as a disagreement.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    chain_state::{camera::ChainStateSnapshot, pluggables::KVGet, state::ChainStateError},
    pools::AddOutcome,
    types::{
        block::Block,
        crypto_primitives::{hash_parts, VerifyingKey},
        data_types::{BlockHeight, ChainID, CryptoHash, EpochNumber, VerifyingKeyBytes},
        validator_set::ValidatorSet,
    },
};

use super::{
    messages::{Answer, CeremonyMessage, Session},
    pool::SubmissionPool,
    types::{CeremonyPhase, CeremonyResults, CeremonySchedule, EpochTransition, IdentityScore},
};

pub struct ValidationCeremony {
    chain_id: ChainID,
    schedule: CeremonySchedule,
    epoch: EpochNumber,
    phase: CeremonyPhase,
    last_applied_epoch: Option<EpochNumber>,
    state: EpochState,
    pool: SubmissionPool,
}

/// Everything recorded from the committed blocks of the current epoch.
#[derive(Default)]
struct EpochState {
    /// Flip hash to author.
    flips: BTreeMap<CryptoHash, VerifyingKeyBytes>,
    assignment_seed: Option<CryptoHash>,
    /// The first answer list of each author in each session.
    answers: HashMap<(VerifyingKeyBytes, Session), Vec<(CryptoHash, Answer)>>,
}

impl ValidationCeremony {
    /// Create a ceremony positioned at the first height after genesis.
    pub fn new(chain_id: ChainID, schedule: CeremonySchedule) -> Self {
        let phase = schedule.phase_at(BlockHeight::new(1));
        Self {
            chain_id,
            schedule,
            epoch: EpochNumber::new(0),
            phase,
            last_applied_epoch: None,
            state: EpochState::default(),
            pool: SubmissionPool::new(chain_id),
        }
    }

    /// Rebuild the ceremony state of the epoch the next height belongs to by replaying the epoch's committed
    /// blocks.
    pub fn initialize<S: KVGet>(
        &mut self,
        chain_state: &ChainStateSnapshot<S>,
    ) -> Result<(), CeremonyError> {
        let head_height = chain_state.head_height()?;
        let next_height = head_height + 1;
        self.epoch = self.schedule.epoch_of(next_height);
        self.phase = self.schedule.phase_at(next_height);
        self.last_applied_epoch = chain_state.last_applied_epoch()?;
        self.state = EpochState::default();
        self.pool.drop_epochs_before(self.epoch);

        let validator_set = chain_state.validator_set(self.epoch)?;
        let mut height = self.schedule.first_height_of(self.epoch);
        while height <= head_height {
            let block = chain_state
                .block_at_height(height)?
                .ok_or(ChainStateError::BlockAtHeightExpectedButNotFound { height })?;
            self.on_block(&block, &validator_set);
            height += 1;
        }
        log::debug!(
            "Ceremony of epoch {} resumed at height {} in phase {:?}",
            self.epoch,
            next_height,
            self.phase
        );
        Ok(())
    }

    /// Record the ceremony transactions of a newly committed `block`. `validator_set` is the validator set of
    /// the block's height; submissions by anyone else are ignored.
    pub fn on_block(&mut self, block: &Block, validator_set: &ValidatorSet) {
        self.pool.remove_included(&block.ceremony_transactions);
        if self.schedule.epoch_of(block.height) != self.epoch {
            return;
        }

        let phase = self.schedule.phase_at(block.height);
        for submission in &block.ceremony_transactions {
            if submission.chain_id() != self.chain_id
                || submission.epoch() != self.epoch
                || !is_member(validator_set, &submission.author())
                || !submission.is_correctly_signed()
            {
                continue;
            }
            match submission {
                CeremonyMessage::FlipSubmission(flip) if phase == CeremonyPhase::FlipSubmission => {
                    self.state.flips.entry(flip.flip_hash()).or_insert(flip.author);
                }
                CeremonyMessage::FlipAnswer(answer) if phase.session() == Some(answer.session) => {
                    self.state
                        .answers
                        .entry((answer.author, answer.session))
                        .or_insert_with(|| answer.answers.clone());
                }
                _ => log::debug!(
                    "Ignoring ceremony transaction outside of its phase at height {}",
                    block.height
                ),
            }
        }

        if self.state.assignment_seed.is_none()
            && self.schedule.phase_at(block.height + 1) == CeremonyPhase::ShortSession
        {
            self.state.assignment_seed = Some(block.hash);
        }
    }

    /// Move to the phase of `next_height`, the height that is decided next. Returns the new phase if it
    /// changed.
    pub fn on_new_height(&mut self, next_height: BlockHeight) -> Option<CeremonyPhase> {
        let epoch = self.schedule.epoch_of(next_height);
        if epoch != self.epoch {
            self.start_epoch(epoch);
        }

        let phase = self.schedule.phase_at(next_height);
        if phase != self.phase {
            self.phase = phase;
            Some(phase)
        } else {
            None
        }
    }

    /// At the boundary height of an epoch, aggregate the epoch's submissions and return the validator set
    /// of the next epoch: the identities of `validator_set` that passed, with their current powers. If
    /// nobody passed, `validator_set` is carried over.
    ///
    /// Returns `None` if `height` is not a boundary or if the epoch was already applied, so each boundary
    /// produces exactly one transition.
    pub fn apply_new_epoch(
        &mut self,
        height: BlockHeight,
        validator_set: &ValidatorSet,
    ) -> Result<Option<EpochTransition>, CeremonyError> {
        if !self.schedule.is_epoch_boundary(height) {
            return Ok(None);
        }
        let epoch = self.schedule.epoch_of(height);
        if self.last_applied_epoch.map_or(false, |applied| applied >= epoch) {
            return Ok(None);
        }
        if epoch != self.epoch {
            return Err(CeremonyError::EpochMismatch {
                expected: self.epoch,
                found: epoch,
            });
        }

        let mut results = self.aggregate(validator_set);
        let mut next_validator_set = ValidatorSet::new();
        for (validator, power) in validator_set.validators_and_powers() {
            if results.passed().any(|identity| identity == validator.as_bytes()) {
                next_validator_set.put(&validator, power);
            }
        }
        if next_validator_set.is_empty() {
            log::warn!(
                "No identity passed the ceremony of epoch {}, keeping its validator set",
                epoch
            );
            results.kept_previous_set = true;
            next_validator_set = validator_set.clone();
        }

        self.last_applied_epoch = Some(epoch);
        self.start_epoch(epoch + 1);
        self.phase = CeremonyPhase::Idle;

        Ok(Some(EpochTransition {
            next_epoch: epoch + 1,
            validator_set: next_validator_set,
            results,
        }))
    }

    /// The flips assigned to `identity` in `session`. Empty until the assignment seed is known.
    pub fn assignment(&self, identity: &VerifyingKeyBytes, session: Session) -> Vec<CryptoHash> {
        let Some(seed) = self.state.assignment_seed else {
            return Vec::new();
        };
        let mut ranked: Vec<(CryptoHash, CryptoHash)> = self
            .state
            .flips
            .iter()
            .filter(|(_, author)| *author != identity)
            .map(|(flip, _)| (hash_parts(&[&seed.bytes(), identity, &flip.bytes()]), *flip))
            .collect();
        ranked.sort();

        let skip = match session {
            Session::Short => 0,
            Session::Long => self.schedule.session_flips(Session::Short),
        };
        ranked
            .into_iter()
            .skip(skip)
            .take(self.schedule.session_flips(session))
            .map(|(_, flip)| flip)
            .collect()
    }

    /// Score every identity in `validator_set` on the submissions recorded so far.
    pub fn aggregate(&self, validator_set: &ValidatorSet) -> CeremonyResults {
        // Only answers to assigned flips count, and only the first answer to each flip.
        let mut counted: HashMap<VerifyingKeyBytes, Vec<(CryptoHash, Answer)>> = HashMap::new();
        for ((author, session), answers) in &self.state.answers {
            let assigned: HashSet<CryptoHash> = self.assignment(author, *session).into_iter().collect();
            let mut seen = HashSet::new();
            let valid = counted.entry(*author).or_default();
            for (flip, answer) in answers {
                if assigned.contains(flip) && seen.insert(*flip) {
                    valid.push((*flip, *answer));
                }
            }
        }

        let mut tallies: HashMap<CryptoHash, (u32, u32)> = HashMap::new();
        for (flip, answer) in counted.values().flatten() {
            let tally = tallies.entry(*flip).or_default();
            match answer {
                Answer::Human => tally.0 += 1,
                Answer::NotHuman => tally.1 += 1,
            }
        }
        let verdicts: HashMap<CryptoHash, Answer> = tallies
            .into_iter()
            .filter_map(|(flip, (human, not_human))| match human.cmp(&not_human) {
                std::cmp::Ordering::Greater => Some((flip, Answer::Human)),
                std::cmp::Ordering::Less => Some((flip, Answer::NotHuman)),
                std::cmp::Ordering::Equal => None,
            })
            .collect();

        let scores = validator_set
            .validators()
            .map(|validator| {
                let identity = validator.to_bytes();
                let flips_submitted = self
                    .state
                    .flips
                    .values()
                    .filter(|author| **author == identity)
                    .count() as u32;
                let assigned: HashSet<CryptoHash> = [Session::Short, Session::Long]
                    .into_iter()
                    .flat_map(|session| self.assignment(&identity, session))
                    .collect();
                let answers = counted.get(&identity).map(Vec::as_slice).unwrap_or(&[]);
                // Assigned flips left unanswered count against the identity.
                let judged_flips = assigned
                    .iter()
                    .filter(|flip| verdicts.contains_key(*flip))
                    .count() as u32;
                let agreeing_answers = answers
                    .iter()
                    .filter(|(flip, answer)| verdicts.get(flip) == Some(answer))
                    .count() as u32;
                let answered = assigned.is_empty() || !answers.is_empty();
                let passed = flips_submitted >= self.schedule.required_flips
                    && answered
                    && agreeing_answers as u64 * 100
                        >= self.schedule.pass_threshold_percent as u64 * judged_flips as u64;
                IdentityScore {
                    identity,
                    flips_submitted,
                    judged_flips,
                    agreeing_answers,
                    passed,
                }
            })
            .collect();

        CeremonyResults {
            epoch: self.epoch,
            scores,
            kept_previous_set: false,
        }
    }

    /// Pool a ceremony submission received from a peer.
    pub fn on_submission(&mut self, submission: CeremonyMessage) -> AddOutcome {
        self.pool.add(submission, self.epoch)
    }

    /// Pending submissions that a proposer of `height` should include in its block.
    pub fn submissions_for_block(&self, height: BlockHeight, limit: usize) -> Vec<CeremonyMessage> {
        if self.schedule.epoch_of(height) != self.epoch {
            return Vec::new();
        }
        self.pool
            .take(self.epoch, self.schedule.phase_at(height), limit)
    }

    pub fn phase(&self) -> CeremonyPhase {
        self.phase
    }

    pub fn epoch(&self) -> EpochNumber {
        self.epoch
    }

    pub fn schedule(&self) -> &CeremonySchedule {
        &self.schedule
    }

    pub fn last_applied_epoch(&self) -> Option<EpochNumber> {
        self.last_applied_epoch
    }

    pub fn flips(&self) -> usize {
        self.state.flips.len()
    }

    fn start_epoch(&mut self, epoch: EpochNumber) {
        self.epoch = epoch;
        self.state = EpochState::default();
        self.pool.drop_epochs_before(epoch);
    }
}

fn is_member(validator_set: &ValidatorSet, identity: &VerifyingKeyBytes) -> bool {
    VerifyingKey::from_bytes(identity)
        .map(|validator| validator_set.contains(&validator))
        .unwrap_or(false)
}

/// The ways the validation ceremony can fail.
#[derive(Debug)]
pub enum CeremonyError {
    ChainStateError(ChainStateError),
    /// `apply_new_epoch` was called for the boundary of an epoch the ceremony is not in.
    EpochMismatch {
        expected: EpochNumber,
        found: EpochNumber,
    },
}

impl From<ChainStateError> for CeremonyError {
    fn from(value: ChainStateError) -> Self {
        CeremonyError::ChainStateError(value)
    }
}
