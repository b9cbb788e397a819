/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and its methods.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::ceremony::messages::CeremonyMessage;

use super::{
    crypto_primitives::{hash_parts, serialized, verify_signature, Keypair, VerifyingKey},
    data_types::*,
};

/// A block of the chain. Immutable once created and identified by its `hash`.
///
/// ## Hashes
///
/// `transactions_hash` commits to both the application `transactions` and the `ceremony_transactions`.
/// `hash` is the SHA256 hash over the header fields (everything except `hash`, the transaction lists
/// and `signature`), and is what the proposer signs.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub hash: CryptoHash,
    pub parent_hash: CryptoHash,
    pub state_root: CryptoHash,
    pub timestamp: Timestamp,
    pub proposer: VerifyingKeyBytes,
    pub eligibility_proof: SignatureBytes,
    pub transactions_hash: CryptoHash,
    pub transactions: Vec<Transaction>,
    pub ceremony_transactions: Vec<CeremonyMessage>,
    pub signature: SignatureBytes,
}

/// Everything a proposer decides about a block before signing it.
pub struct BlockContents {
    pub height: BlockHeight,
    pub parent_hash: CryptoHash,
    pub state_root: CryptoHash,
    pub timestamp: Timestamp,
    pub eligibility_proof: SignatureBytes,
    pub transactions: Vec<Transaction>,
    pub ceremony_transactions: Vec<CeremonyMessage>,
}

impl Block {
    /// Create a new block signed by `keypair`.
    pub fn new(keypair: &Keypair, contents: BlockContents) -> Block {
        let proposer = keypair.public_bytes();
        let transactions_hash =
            Block::compute_transactions_hash(&contents.transactions, &contents.ceremony_transactions);
        let hash = Block::compute_hash(
            contents.height,
            &contents.parent_hash,
            &contents.state_root,
            contents.timestamp,
            &proposer,
            &contents.eligibility_proof,
            &transactions_hash,
        );
        Block {
            height: contents.height,
            hash,
            parent_hash: contents.parent_hash,
            state_root: contents.state_root,
            timestamp: contents.timestamp,
            proposer,
            eligibility_proof: contents.eligibility_proof,
            transactions_hash,
            transactions: contents.transactions,
            ceremony_transactions: contents.ceremony_transactions,
            signature: keypair.sign(&hash.bytes()),
        }
    }

    /// The genesis block. It has no proposer, no transactions and is never signed; replicas agree on it
    /// by construction.
    pub fn genesis(state_root: CryptoHash, timestamp: Timestamp) -> Block {
        let transactions_hash = Block::compute_transactions_hash(&[], &[]);
        let proposer = [0u8; 32];
        let hash = Block::compute_hash(
            BlockHeight::genesis(),
            &CryptoHash::zero(),
            &state_root,
            timestamp,
            &proposer,
            &SignatureBytes::zero(),
            &transactions_hash,
        );
        Block {
            height: BlockHeight::genesis(),
            hash,
            parent_hash: CryptoHash::zero(),
            state_root,
            timestamp,
            proposer,
            eligibility_proof: SignatureBytes::zero(),
            transactions_hash,
            transactions: Vec::new(),
            ceremony_transactions: Vec::new(),
            signature: SignatureBytes::zero(),
        }
    }

    pub fn compute_hash(
        height: BlockHeight,
        parent_hash: &CryptoHash,
        state_root: &CryptoHash,
        timestamp: Timestamp,
        proposer: &VerifyingKeyBytes,
        eligibility_proof: &SignatureBytes,
        transactions_hash: &CryptoHash,
    ) -> CryptoHash {
        hash_parts(&[&serialized(&(
            height,
            parent_hash,
            state_root,
            timestamp,
            proposer,
            eligibility_proof,
            transactions_hash,
        ))])
    }

    pub fn compute_transactions_hash(
        transactions: &[Transaction],
        ceremony_transactions: &[CeremonyMessage],
    ) -> CryptoHash {
        hash_parts(&[
            &serialized(&transactions.to_vec()),
            &serialized(&ceremony_transactions.to_vec()),
        ])
    }

    pub fn is_genesis(&self) -> bool {
        self.height == BlockHeight::genesis()
    }

    pub fn proposer_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.proposer).ok()
    }

    /// Check that `hash` and `transactions_hash` are consistent with the rest of the block.
    pub fn is_well_formed(&self) -> bool {
        let transactions_hash =
            Block::compute_transactions_hash(&self.transactions, &self.ceremony_transactions);
        transactions_hash == self.transactions_hash
            && self.hash
                == Block::compute_hash(
                    self.height,
                    &self.parent_hash,
                    &self.state_root,
                    self.timestamp,
                    &self.proposer,
                    &self.eligibility_proof,
                    &self.transactions_hash,
                )
    }

    /// Check that `signature` is the proposer's signature over `hash`.
    pub fn is_correctly_signed(&self) -> bool {
        match self.proposer_key() {
            Some(proposer) => verify_signature(&proposer, &self.hash.bytes(), &self.signature),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto_primitives::SigningKey;
    use rand_core::OsRng;

    fn block_at(keypair: &Keypair, height: u64) -> Block {
        Block::new(
            keypair,
            BlockContents {
                height: BlockHeight::new(height),
                parent_hash: CryptoHash::new([1u8; 32]),
                state_root: CryptoHash::new([2u8; 32]),
                timestamp: Timestamp::new(10),
                eligibility_proof: SignatureBytes::zero(),
                transactions: vec![Transaction::new(vec![1, 2, 3])],
                ceremony_transactions: Vec::new(),
            },
        )
    }

    #[test]
    fn new_block_is_well_formed_and_signed() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let block = block_at(&keypair, 4);
        assert!(block.is_well_formed());
        assert!(block.is_correctly_signed());
    }

    #[test]
    fn tampered_transactions_break_the_block() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let mut block = block_at(&keypair, 4);
        block.transactions.push(Transaction::new(vec![9]));
        assert!(!block.is_well_formed());
    }

    #[test]
    fn signature_from_another_key_is_rejected() {
        let keypair = Keypair::new(SigningKey::generate(&mut OsRng));
        let other = Keypair::new(SigningKey::generate(&mut OsRng));
        let mut block = block_at(&keypair, 4);
        block.signature = other.sign(&block.hash.bytes());
        assert!(block.is_well_formed());
        assert!(!block.is_correctly_signed());
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Block::genesis(CryptoHash::zero(), Timestamp::new(0));
        let b = Block::genesis(CryptoHash::zero(), Timestamp::new(0));
        assert_eq!(a.hash, b.hash);
        assert!(a.is_genesis());
    }
}
