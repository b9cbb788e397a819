/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pending ceremony submissions received from peers, waiting to be included in a block.

use std::collections::HashSet;

use crate::{
    pools::AddOutcome,
    types::data_types::{ChainID, CryptoHash, EpochNumber},
};

use super::{messages::CeremonyMessage, types::CeremonyPhase};

pub struct SubmissionPool {
    chain_id: ChainID,
    // In order of arrival.
    pending: Vec<(CryptoHash, CeremonyMessage)>,
    known: HashSet<CryptoHash>,
}

impl SubmissionPool {
    pub fn new(chain_id: ChainID) -> Self {
        Self {
            chain_id,
            pending: Vec::new(),
            known: HashSet::new(),
        }
    }

    /// Add a submission gossiped for `current_epoch`. Submissions for other epochs are not kept.
    pub fn add(&mut self, submission: CeremonyMessage, current_epoch: EpochNumber) -> AddOutcome {
        if submission.chain_id() != self.chain_id || !submission.is_correctly_signed() {
            return AddOutcome::Invalid;
        }
        if submission.epoch() < current_epoch {
            return AddOutcome::Stale;
        }
        if submission.epoch() > current_epoch {
            return AddOutcome::Future;
        }

        let id = submission.submission_id();
        if !self.known.insert(id) {
            return AddOutcome::Duplicate;
        }
        self.pending.push((id, submission));
        AddOutcome::Accepted
    }

    /// Up to `limit` pending submissions of `epoch` that count if included in a block of `phase`, oldest
    /// first. The submissions stay in the pool until [`remove_included`](Self::remove_included) is called.
    pub fn take(&self, epoch: EpochNumber, phase: CeremonyPhase, limit: usize) -> Vec<CeremonyMessage> {
        self.pending
            .iter()
            .map(|(_, submission)| submission)
            .filter(|submission| submission.epoch() == epoch)
            .filter(|submission| match submission {
                CeremonyMessage::FlipSubmission(_) => phase == CeremonyPhase::FlipSubmission,
                CeremonyMessage::FlipAnswer(answer) => phase.session() == Some(answer.session),
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Forget submissions that were included in a committed block. They are remembered as known so that
    /// re-gossiped copies are not pooled again.
    pub fn remove_included(&mut self, included: &[CeremonyMessage]) {
        let ids: HashSet<CryptoHash> = included
            .iter()
            .map(|submission| submission.submission_id())
            .collect();
        self.pending.retain(|(id, _)| !ids.contains(id));
        self.known.extend(ids);
    }

    /// Drop everything that belongs to an epoch before `epoch`.
    pub fn drop_epochs_before(&mut self, epoch: EpochNumber) {
        self.pending
            .retain(|(_, submission)| submission.epoch() >= epoch);
        self.known = self.pending.iter().map(|(id, _)| *id).collect();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
