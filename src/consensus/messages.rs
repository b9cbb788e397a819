/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages sent between validators by the consensus engine, and the [`CommitCertificate`] formed
//! out of them.

use std::collections::HashSet;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::{serialized, Keypair},
    data_types::*,
    signed_messages::SignedMessage,
    validator_set::ValidatorSet,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub enum VoteStep {
    Prevote,
    Precommit,
}

/// Messages of the consensus protocol.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn chain_id(&self) -> ChainID {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.chain_id,
            ConsensusMessage::Vote(vote) => vote.chain_id,
        }
    }

    pub fn height(&self) -> BlockHeight {
        match self {
            ConsensusMessage::Proposal(proposal) => proposal.height,
            ConsensusMessage::Vote(vote) => vote.height,
        }
    }
}

impl From<Proposal> for ConsensusMessage {
    fn from(proposal: Proposal) -> Self {
        ConsensusMessage::Proposal(proposal)
    }
}

impl From<Vote> for ConsensusMessage {
    fn from(vote: Vote) -> Self {
        ConsensusMessage::Vote(vote)
    }
}

/// A block proposed for `height` in `round`.
///
/// `proposer` is the validator that sends the proposal, and `eligibility_proof` is its signature over the
/// selection seed of (`height`, `round`). When the proposer is locked, it re-proposes its locked block,
/// which was created in `locked_round` and may have been produced by a different validator.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub chain_id: ChainID,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub locked_round: Option<RoundNumber>,
    pub proposer: VerifyingKeyBytes,
    pub eligibility_proof: SignatureBytes,
    pub block: Block,
    pub signature: SignatureBytes,
}

impl Proposal {
    pub fn new(
        keypair: &Keypair,
        chain_id: ChainID,
        round: RoundNumber,
        locked_round: Option<RoundNumber>,
        eligibility_proof: SignatureBytes,
        block: Block,
    ) -> Self {
        let proposer = keypair.public_bytes();
        let height = block.height;
        let message = serialized(&(
            chain_id,
            height,
            round,
            locked_round,
            proposer,
            eligibility_proof,
            block.hash,
        ));
        Proposal {
            chain_id,
            height,
            round,
            locked_round,
            proposer,
            eligibility_proof,
            block,
            signature: keypair.sign(&message),
        }
    }

    /// The round in which `block` was created.
    pub fn block_round(&self) -> RoundNumber {
        self.locked_round.unwrap_or(self.round)
    }
}

impl SignedMessage for Proposal {
    fn message_bytes(&self) -> Vec<u8> {
        serialized(&(
            self.chain_id,
            self.height,
            self.round,
            self.locked_round,
            self.proposer,
            self.eligibility_proof,
            self.block.hash,
        ))
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> VerifyingKeyBytes {
        self.proposer
    }
}

/// A prevote or precommit for `block` (or for nil, if `block` is `None`).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub chain_id: ChainID,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub step: VoteStep,
    pub block: Option<CryptoHash>,
    pub voter: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl Vote {
    pub fn new(
        keypair: &Keypair,
        chain_id: ChainID,
        height: BlockHeight,
        round: RoundNumber,
        step: VoteStep,
        block: Option<CryptoHash>,
    ) -> Self {
        let message = serialized(&(chain_id, height, round, step, block));
        Vote {
            chain_id,
            height,
            round,
            step,
            block,
            voter: keypair.public_bytes(),
            signature: keypair.sign(&message),
        }
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        serialized(&(self.chain_id, self.height, self.round, self.step, self.block))
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> VerifyingKeyBytes {
        self.voter
    }
}

/// The precommits of a quorum of validators for `block` at (`height`, `round`). Proof that `block` was
/// committed, verifiable by any replica that knows the validator set of `height`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitCertificate {
    pub chain_id: ChainID,
    pub height: BlockHeight,
    pub round: RoundNumber,
    pub block: CryptoHash,
    pub precommits: Vec<Vote>,
}

impl CommitCertificate {
    /// Check that the certificate certifies `block` at `height` and that its precommits are correctly
    /// signed, come from distinct members of `validator_set`, and together carry a quorum of power.
    pub fn is_valid_for(
        &self,
        chain_id: ChainID,
        height: BlockHeight,
        block: &CryptoHash,
        validator_set: &ValidatorSet,
    ) -> bool {
        if self.chain_id != chain_id || self.height != height || &self.block != block {
            return false;
        }

        let mut counted = HashSet::new();
        let mut total_power = TotalPower::new(0);
        for precommit in &self.precommits {
            if precommit.chain_id != chain_id
                || precommit.height != height
                || precommit.round != self.round
                || precommit.step != VoteStep::Precommit
                || precommit.block != Some(*block)
            {
                return false;
            }
            let Some(voter) = precommit.signer() else {
                return false;
            };
            let Some(power) = validator_set.power(&voter) else {
                return false;
            };
            if !precommit.is_correct(&voter) {
                return false;
            }
            if counted.insert(precommit.voter) {
                total_power += *power;
            }
        }

        validator_set.is_quorum(total_power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::SigningKey;
    use rand_core::OsRng;

    fn keypairs(n: usize) -> Vec<Keypair> {
        (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect()
    }

    fn validator_set_of(keypairs: &[Keypair]) -> ValidatorSet {
        let mut validator_set = ValidatorSet::new();
        for keypair in keypairs {
            validator_set.put(&keypair.public(), Power::new(1));
        }
        validator_set
    }

    fn certificate_from(keypairs: &[Keypair], block: CryptoHash) -> CommitCertificate {
        CommitCertificate {
            chain_id: ChainID::new(0),
            height: BlockHeight::new(1),
            round: RoundNumber::init(),
            block,
            precommits: keypairs
                .iter()
                .map(|keypair| {
                    Vote::new(
                        keypair,
                        ChainID::new(0),
                        BlockHeight::new(1),
                        RoundNumber::init(),
                        VoteStep::Precommit,
                        Some(block),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn certificate_needs_a_quorum_of_distinct_voters() {
        let keypairs = keypairs(3);
        let validator_set = validator_set_of(&keypairs);
        let block = CryptoHash::new([5u8; 32]);

        let full = certificate_from(&keypairs, block);
        assert!(full.is_valid_for(ChainID::new(0), BlockHeight::new(1), &block, &validator_set));

        let two = certificate_from(&keypairs[0..2], block);
        assert!(!two.is_valid_for(ChainID::new(0), BlockHeight::new(1), &block, &validator_set));

        let mut repeated = two.clone();
        repeated.precommits.push(repeated.precommits[0].clone());
        assert!(!repeated.is_valid_for(ChainID::new(0), BlockHeight::new(1), &block, &validator_set));
    }

    #[test]
    fn certificate_rejects_outsiders_and_other_blocks() {
        let keypairs = keypairs(4);
        let validator_set = validator_set_of(&keypairs[0..3]);
        let block = CryptoHash::new([5u8; 32]);

        let with_outsider = certificate_from(&keypairs[1..4], block);
        assert!(!with_outsider.is_valid_for(ChainID::new(0), BlockHeight::new(1), &block, &validator_set));

        let full = certificate_from(&keypairs[0..3], block);
        let other = CryptoHash::new([6u8; 32]);
        assert!(!full.is_valid_for(ChainID::new(0), BlockHeight::new(1), &other, &validator_set));
    }
}
