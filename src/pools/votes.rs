/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The vote pool, which collects prevotes and precommits and tallies them by power.

use std::collections::{BTreeMap, HashMap};

use crate::{
    consensus::messages::{Vote, VoteStep},
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, ChainID, CryptoHash, Power, RoundNumber, TotalPower},
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
    },
};

use super::AddOutcome;

/// How many rounds beyond the engine's current round a vote may be for and still be pooled.
pub const MAX_ROUND_LEAD: u32 = 16;

/// Votes for the current height, grouped by (height, round, step).
///
/// Each validator is counted at most once per (height, round, step). A second, different vote from the
/// same validator (an equivocation) is reported as `Duplicate` and ignored.
#[derive(Default)]
pub struct VotePool {
    votes: BTreeMap<(BlockHeight, RoundNumber, VoteStep), HashMap<VerifyingKey, (Vote, Power)>>,
}

impl VotePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vote received while the engine is deciding `frontier` in `round`. `validator_set` must be the
    /// validator set of `frontier`.
    ///
    /// Votes for earlier rounds of `frontier` are kept, since a block precommitted in any round commits.
    /// Votes more than [`MAX_ROUND_LEAD`] rounds ahead are reported as `Future` and dropped.
    pub fn add(
        &mut self,
        vote: Vote,
        chain_id: ChainID,
        validator_set: &ValidatorSet,
        frontier: BlockHeight,
        round: RoundNumber,
    ) -> AddOutcome {
        if vote.chain_id != chain_id {
            return AddOutcome::Invalid;
        }
        if vote.height < frontier {
            return AddOutcome::Stale;
        }
        if vote.height > frontier || vote.round > round + MAX_ROUND_LEAD {
            return AddOutcome::Future;
        }
        let Some(voter) = vote.signer() else {
            return AddOutcome::Invalid;
        };
        let Some(power) = validator_set.power(&voter).copied() else {
            return AddOutcome::Invalid;
        };
        if !vote.is_correct(&voter) {
            return AddOutcome::Invalid;
        }

        let votes = self
            .votes
            .entry((vote.height, vote.round, vote.step))
            .or_default();
        if votes.contains_key(&voter) {
            return AddOutcome::Duplicate;
        }
        votes.insert(voter, (vote, power));
        AddOutcome::Accepted
    }

    /// Total power behind each value (a block, or nil) voted for at (`height`, `round`, `step`).
    pub fn tally(
        &self,
        height: BlockHeight,
        round: RoundNumber,
        step: VoteStep,
    ) -> HashMap<Option<CryptoHash>, TotalPower> {
        let mut tally: HashMap<Option<CryptoHash>, TotalPower> = HashMap::new();
        if let Some(votes) = self.votes.get(&(height, round, step)) {
            for (vote, power) in votes.values() {
                *tally.entry(vote.block).or_default() += *power;
            }
        }
        tally
    }

    /// Total power of every vote at (`height`, `round`, `step`), regardless of value.
    pub fn total(&self, height: BlockHeight, round: RoundNumber, step: VoteStep) -> TotalPower {
        let mut total = TotalPower::new(0);
        if let Some(votes) = self.votes.get(&(height, round, step)) {
            for (_, power) in votes.values() {
                total += *power;
            }
        }
        total
    }

    /// The value, if any, that a quorum of `validator_set` voted for at (`height`, `round`, `step`).
    ///
    /// Returns `Some(None)` for a nil quorum.
    pub fn quorum_value(
        &self,
        height: BlockHeight,
        round: RoundNumber,
        step: VoteStep,
        validator_set: &ValidatorSet,
    ) -> Option<Option<CryptoHash>> {
        self.tally(height, round, step)
            .into_iter()
            .find(|(_, power)| validator_set.is_quorum(*power))
            .map(|(value, _)| value)
    }

    /// All votes for `block` at (`height`, `round`, `step`), ordered by voter.
    pub fn votes_for(
        &self,
        height: BlockHeight,
        round: RoundNumber,
        step: VoteStep,
        block: &Option<CryptoHash>,
    ) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .votes
            .get(&(height, round, step))
            .map(|votes| {
                votes
                    .values()
                    .filter(|(vote, _)| &vote.block == block)
                    .map(|(vote, _)| vote.clone())
                    .collect()
            })
            .unwrap_or_default();
        votes.sort_by_key(|vote| vote.voter);
        votes
    }

    /// Every round at `height` in which a quorum of precommits for some block has been collected, with the
    /// block. Lowest round first.
    pub fn precommit_quorums(
        &self,
        height: BlockHeight,
        validator_set: &ValidatorSet,
    ) -> Vec<(RoundNumber, CryptoHash)> {
        self.votes
            .keys()
            .filter(|(vote_height, _, step)| *vote_height == height && *step == VoteStep::Precommit)
            .filter_map(|(_, round, _)| {
                match self.quorum_value(height, *round, VoteStep::Precommit, validator_set) {
                    Some(Some(block)) => Some((*round, block)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Rounds at `height` in which at least one vote of `step` was collected, lowest first.
    pub fn rounds(&self, height: BlockHeight, step: VoteStep) -> Vec<RoundNumber> {
        self.votes
            .keys()
            .filter(|(vote_height, _, vote_step)| *vote_height == height && *vote_step == step)
            .map(|(_, round, _)| *round)
            .collect()
    }

    /// Drop every vote for a height below `frontier`.
    pub fn prune(&mut self, frontier: BlockHeight) {
        self.votes = self
            .votes
            .split_off(&(frontier, RoundNumber::init(), VoteStep::Prevote));
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use rand_core::OsRng;

    const CHAIN_ID: ChainID = ChainID::new(0);

    fn setup(n: usize) -> (Vec<Keypair>, ValidatorSet) {
        let keypairs: Vec<Keypair> = (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect();
        let mut validator_set = ValidatorSet::new();
        for keypair in &keypairs {
            validator_set.put(&keypair.public(), Power::new(1));
        }
        (keypairs, validator_set)
    }

    fn prevote(keypair: &Keypair, height: u64, block: Option<CryptoHash>) -> Vote {
        Vote::new(
            keypair,
            CHAIN_ID,
            BlockHeight::new(height),
            RoundNumber::init(),
            VoteStep::Prevote,
            block,
        )
    }

    /// Add `vote` while the engine is in round 0 of `frontier`.
    fn add(pool: &mut VotePool, vote: Vote, validator_set: &ValidatorSet, frontier: u64) -> AddOutcome {
        pool.add(
            vote,
            CHAIN_ID,
            validator_set,
            BlockHeight::new(frontier),
            RoundNumber::init(),
        )
    }

    #[test]
    fn two_of_three_is_not_a_quorum() {
        let (keypairs, validator_set) = setup(3);
        let mut pool = VotePool::new();
        let block = Some(CryptoHash::new([1u8; 32]));
        let height = BlockHeight::new(1);

        for keypair in &keypairs[0..2] {
            let outcome = add(&mut pool, prevote(keypair, 1, block), &validator_set, 1);
            assert_eq!(outcome, AddOutcome::Accepted);
        }
        assert_eq!(
            pool.quorum_value(height, RoundNumber::init(), VoteStep::Prevote, &validator_set),
            None
        );

        add(&mut pool, prevote(&keypairs[2], 1, block), &validator_set, 1);
        assert_eq!(
            pool.quorum_value(height, RoundNumber::init(), VoteStep::Prevote, &validator_set),
            Some(block)
        );
        assert_eq!(
            pool.votes_for(height, RoundNumber::init(), VoteStep::Prevote, &block).len(),
            3
        );
    }

    #[test]
    fn equivocating_voter_is_counted_once() {
        let (keypairs, validator_set) = setup(3);
        let mut pool = VotePool::new();
        let height = BlockHeight::new(1);
        let first = prevote(&keypairs[0], 1, Some(CryptoHash::new([1u8; 32])));
        let second = prevote(&keypairs[0], 1, None);

        assert_eq!(add(&mut pool, first, &validator_set, 1), AddOutcome::Accepted);
        assert_eq!(add(&mut pool, second, &validator_set, 1), AddOutcome::Duplicate);
        assert_eq!(
            pool.total(height, RoundNumber::init(), VoteStep::Prevote),
            TotalPower::new(1)
        );
        assert_eq!(
            pool.tally(height, RoundNumber::init(), VoteStep::Prevote).get(&None),
            None
        );
    }

    #[test]
    fn outsiders_and_bad_signatures_are_invalid() {
        let (keypairs, validator_set) = setup(3);
        let (outsiders, _) = setup(1);
        let mut pool = VotePool::new();

        let outsider_vote = prevote(&outsiders[0], 1, None);
        assert_eq!(add(&mut pool, outsider_vote, &validator_set, 1), AddOutcome::Invalid);

        let mut forged = prevote(&keypairs[0], 1, None);
        forged.voter = keypairs[1].public_bytes();
        assert_eq!(add(&mut pool, forged, &validator_set, 1), AddOutcome::Invalid);
        assert!(pool.is_empty());
    }

    #[test]
    fn votes_are_classified_by_height_and_pruned() {
        let (keypairs, validator_set) = setup(3);
        let mut pool = VotePool::new();

        let stale = prevote(&keypairs[0], 1, None);
        assert_eq!(add(&mut pool, stale, &validator_set, 2), AddOutcome::Stale);
        let future = prevote(&keypairs[0], 3, None);
        assert_eq!(add(&mut pool, future, &validator_set, 2), AddOutcome::Future);
        let current = prevote(&keypairs[0], 2, None);
        assert_eq!(add(&mut pool, current, &validator_set, 2), AddOutcome::Accepted);

        pool.prune(BlockHeight::new(3));
        assert!(pool.is_empty());
    }

    #[test]
    fn votes_far_beyond_the_current_round_are_dropped() {
        let (keypairs, validator_set) = setup(3);
        let mut pool = VotePool::new();
        let height = BlockHeight::new(1);
        let current = RoundNumber::new(2);
        let precommit = |keypair: &Keypair, round: RoundNumber| {
            Vote::new(keypair, CHAIN_ID, height, round, VoteStep::Precommit, None)
        };

        let furthest = precommit(&keypairs[0], current + MAX_ROUND_LEAD);
        assert_eq!(
            pool.add(furthest, CHAIN_ID, &validator_set, height, current),
            AddOutcome::Accepted
        );
        let too_far = precommit(&keypairs[1], current + (MAX_ROUND_LEAD + 1));
        assert_eq!(
            pool.add(too_far, CHAIN_ID, &validator_set, height, current),
            AddOutcome::Future
        );
        let earlier = precommit(&keypairs[2], RoundNumber::init());
        assert_eq!(
            pool.add(earlier, CHAIN_ID, &validator_set, height, current),
            AddOutcome::Accepted
        );
        assert_eq!(pool.rounds(height, VoteStep::Precommit).len(), 2);
    }
}
