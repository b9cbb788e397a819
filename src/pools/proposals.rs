/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The proposal pool, which keeps one canonical proposal per (height, round).

use std::collections::BTreeMap;

use crate::{
    consensus::{
        eligibility::{eligibility_value, is_valid_proof, select_proposer, selection_seed},
        messages::Proposal,
    },
    types::{
        block::Block,
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, ChainID, CryptoHash, RoundNumber},
        signed_messages::SignedMessage,
        validator_set::ValidatorSet,
    },
};

use super::AddOutcome;

/// What a proposal is validated against: the engine's current height and round, the head it must extend,
/// and the validator set of the height.
pub struct ProposalContext<'a> {
    pub chain_id: ChainID,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub parent: &'a Block,
    pub validator_set: &'a ValidatorSet,
}

/// Proposals for the current height, for the current and future rounds.
///
/// The first valid proposal observed for a round is canonical. It is only replaced by a valid proposal
/// with a strictly lower eligibility value.
#[derive(Default)]
pub struct ProposalPool {
    proposals: BTreeMap<(BlockHeight, RoundNumber), Proposal>,
}

impl ProposalPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, proposal: Proposal, ctx: &ProposalContext) -> AddOutcome {
        if proposal.chain_id != ctx.chain_id {
            return AddOutcome::Invalid;
        }
        if proposal.height < ctx.height
            || (proposal.height == ctx.height && proposal.round < ctx.round)
        {
            return AddOutcome::Stale;
        }
        if proposal.height > ctx.height {
            return AddOutcome::Future;
        }
        let Some(proposer) = check_proposal(&proposal, ctx) else {
            return AddOutcome::Invalid;
        };

        let seed = selection_seed(&ctx.parent.hash, proposal.height, proposal.round);
        let key = (proposal.height, proposal.round);
        match self.proposals.get(&key) {
            Some(existing) if existing.block.hash == proposal.block.hash => AddOutcome::Duplicate,
            Some(existing) => {
                let existing_value = existing
                    .signer()
                    .map(|signer| eligibility_value(&seed, &signer));
                let new_value = eligibility_value(&seed, &proposer);
                if existing_value.map_or(true, |existing_value| new_value < existing_value) {
                    self.proposals.insert(key, proposal);
                    AddOutcome::Accepted
                } else {
                    AddOutcome::Duplicate
                }
            }
            None => {
                self.proposals.insert(key, proposal);
                AddOutcome::Accepted
            }
        }
    }

    pub fn get(&self, height: BlockHeight, round: RoundNumber) -> Option<&Proposal> {
        self.proposals.get(&(height, round))
    }

    /// Find a proposal of any round at `height` whose block has hash `block`.
    pub fn block(&self, height: BlockHeight, block: &CryptoHash) -> Option<&Block> {
        self.proposals
            .range((height, RoundNumber::init())..)
            .take_while(|((proposal_height, _), _)| *proposal_height == height)
            .map(|(_, proposal)| &proposal.block)
            .find(|proposed_block| &proposed_block.hash == block)
    }

    /// Drop every proposal for a height below `frontier`.
    pub fn prune(&mut self, frontier: BlockHeight) {
        self.proposals = self.proposals.split_off(&(frontier, RoundNumber::init()));
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Validate everything about `proposal` except its height and round, returning its signer.
fn check_proposal(proposal: &Proposal, ctx: &ProposalContext) -> Option<VerifyingKey> {
    let proposer = proposal.signer()?;
    let seed = selection_seed(&ctx.parent.hash, proposal.height, proposal.round);
    if select_proposer(ctx.validator_set, &seed) != Some(proposer)
        || !proposal.is_correct(&proposer)
        || !is_valid_proof(&proposer, &seed, &proposal.eligibility_proof)
    {
        return None;
    }

    let block = &proposal.block;
    if block.height != proposal.height
        || block.parent_hash != ctx.parent.hash
        || !block.is_well_formed()
        || !block.is_correctly_signed()
    {
        return None;
    }

    // The block was produced by the proposer of the round it was created in.
    match proposal.locked_round {
        Some(locked_round) if locked_round >= proposal.round => return None,
        None if block.proposer != proposal.proposer => return None,
        _ => {}
    }
    let block_seed = selection_seed(&ctx.parent.hash, block.height, proposal.block_round());
    let block_proposer = block.proposer_key()?;
    if select_proposer(ctx.validator_set, &block_seed) != Some(block_proposer)
        || !is_valid_proof(&block_proposer, &block_seed, &block.eligibility_proof)
    {
        return None;
    }

    Some(proposer)
}
