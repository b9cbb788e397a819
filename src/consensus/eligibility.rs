/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic proposer selection.
//!
//! Every (height, round) has a selection seed derived from the parent block's hash. Each validator's
//! eligibility value for the round is `SHA256(seed ‖ verifying_key)`, and the validator with the lowest
//! value is the proposer. A proposer proves that it knows it was selected by signing the seed; that
//! signature is the eligibility proof carried by proposals and blocks.
//!
//! Selection ignores voting power. Identities that failed the previous ceremony are not in the validator
//! set and can therefore never be selected.

use crate::types::{
    crypto_primitives::{hash_parts, verify_signature, Keypair, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, RoundNumber, SignatureBytes},
    validator_set::ValidatorSet,
};

pub fn selection_seed(parent: &CryptoHash, height: BlockHeight, round: RoundNumber) -> CryptoHash {
    hash_parts(&[
        &parent.bytes(),
        &height.to_le_bytes(),
        &round.int().to_le_bytes(),
    ])
}

pub fn eligibility_value(seed: &CryptoHash, validator: &VerifyingKey) -> CryptoHash {
    hash_parts(&[&seed.bytes(), &validator.to_bytes()])
}

/// The validator with the lowest eligibility value under `seed`, or `None` if the set is empty.
pub fn select_proposer(validator_set: &ValidatorSet, seed: &CryptoHash) -> Option<VerifyingKey> {
    validator_set
        .validators()
        .min_by_key(|validator| eligibility_value(seed, validator))
        .copied()
}

pub fn eligibility_proof(keypair: &Keypair, seed: &CryptoHash) -> SignatureBytes {
    keypair.sign(&seed.bytes())
}

pub fn is_valid_proof(validator: &VerifyingKey, seed: &CryptoHash, proof: &SignatureBytes) -> bool {
    verify_signature(validator, &seed.bytes(), proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{crypto_primitives::SigningKey, data_types::Power};
    use rand_core::OsRng;

    #[test]
    fn selection_is_deterministic_and_varies_with_round() {
        let keypairs: Vec<Keypair> = (0..8)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect();
        let mut validator_set = ValidatorSet::new();
        for keypair in &keypairs {
            validator_set.put(&keypair.public(), Power::new(1));
        }

        let parent = CryptoHash::new([3u8; 32]);
        let seed = selection_seed(&parent, BlockHeight::new(1), RoundNumber::init());
        let proposer = select_proposer(&validator_set, &seed).unwrap();
        assert_eq!(select_proposer(&validator_set, &seed), Some(proposer));

        let lowest = validator_set
            .validators()
            .map(|validator| eligibility_value(&seed, validator))
            .min()
            .unwrap();
        assert_eq!(eligibility_value(&seed, &proposer), lowest);

        // With 8 validators, at least one of 16 rounds picks someone else.
        let differs = (1..16).any(|round| {
            let seed = selection_seed(&parent, BlockHeight::new(1), RoundNumber::new(round));
            select_proposer(&validator_set, &seed) != Some(proposer)
        });
        assert!(differs);
    }

    #[test]
    fn proofs_only_verify_for_the_signer_and_seed() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let other = Keypair::new(SigningKey::generate(&mut OsRng));
        let seed = selection_seed(&CryptoHash::zero(), BlockHeight::new(2), RoundNumber::new(1));
        let proof = eligibility_proof(&keypair, &seed);

        assert!(is_valid_proof(&keypair.public(), &seed, &proof));
        assert!(!is_valid_proof(&other.public(), &seed, &proof));
        let other_seed = selection_seed(&CryptoHash::zero(), BlockHeight::new(2), RoundNumber::new(2));
        assert!(!is_valid_proof(&keypair.public(), &other_seed, &proof));
    }

    #[test]
    fn empty_set_has_no_proposer() {
        assert!(select_proposer(&ValidatorSet::new(), &CryptoHash::zero()).is_none());
    }
}
