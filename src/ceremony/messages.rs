/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages that identities submit during the validation ceremony.
//!
//! Ceremony messages travel twice: first as peer messages that land in the
//! [`SubmissionPool`](super::pool::SubmissionPool), then inside a block's `ceremony_transactions`. Only
//! the copy inside a committed block is counted by the [`ValidationCeremony`](super::implementation::ValidationCeremony),
//! so that every replica aggregates exactly the same data.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    crypto_primitives::{hash_parts, serialized, Keypair},
    data_types::{ChainID, CryptoHash, EpochNumber, SignatureBytes, VerifyingKeyBytes},
    signed_messages::SignedMessage,
};

/// Classification an identity gives to a flip it was assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Answer {
    Human,
    NotHuman,
}

/// The two answer sessions of a ceremony.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub enum Session {
    Short,
    Long,
}

/// An encrypted puzzle ("flip") submitted by `author` for `epoch`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FlipSubmission {
    pub chain_id: ChainID,
    pub epoch: EpochNumber,
    pub author: VerifyingKeyBytes,
    pub payload: Vec<u8>,
    pub signature: SignatureBytes,
}

impl FlipSubmission {
    pub fn new(keypair: &Keypair, chain_id: ChainID, epoch: EpochNumber, payload: Vec<u8>) -> Self {
        let author = keypair.public_bytes();
        let message = serialized(&(chain_id, epoch, author, &payload));
        FlipSubmission {
            chain_id,
            epoch,
            author,
            payload,
            signature: keypair.sign(&message),
        }
    }

    /// The identity of the flip. Identical payloads from different authors are different flips.
    pub fn flip_hash(&self) -> CryptoHash {
        hash_parts(&[&self.author, &self.payload])
    }
}

impl SignedMessage for FlipSubmission {
    fn message_bytes(&self) -> Vec<u8> {
        serialized(&(self.chain_id, self.epoch, self.author, &self.payload))
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> VerifyingKeyBytes {
        self.author
    }
}

/// The answers `author` gives to the flips assigned to it for one `session` of `epoch`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FlipAnswer {
    pub chain_id: ChainID,
    pub epoch: EpochNumber,
    pub session: Session,
    pub author: VerifyingKeyBytes,
    pub answers: Vec<(CryptoHash, Answer)>,
    pub signature: SignatureBytes,
}

impl FlipAnswer {
    pub fn new(
        keypair: &Keypair,
        chain_id: ChainID,
        epoch: EpochNumber,
        session: Session,
        answers: Vec<(CryptoHash, Answer)>,
    ) -> Self {
        let author = keypair.public_bytes();
        let message = serialized(&(chain_id, epoch, session, author, &answers));
        FlipAnswer {
            chain_id,
            epoch,
            session,
            author,
            answers,
            signature: keypair.sign(&message),
        }
    }
}

impl SignedMessage for FlipAnswer {
    fn message_bytes(&self) -> Vec<u8> {
        serialized(&(self.chain_id, self.epoch, self.session, self.author, &self.answers))
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }

    fn signer_bytes(&self) -> VerifyingKeyBytes {
        self.author
    }
}

/// A ceremony submission, either gossiped between peers or included in a block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CeremonyMessage {
    FlipSubmission(FlipSubmission),
    FlipAnswer(FlipAnswer),
}

impl CeremonyMessage {
    pub fn chain_id(&self) -> ChainID {
        match self {
            CeremonyMessage::FlipSubmission(flip) => flip.chain_id,
            CeremonyMessage::FlipAnswer(answer) => answer.chain_id,
        }
    }

    pub fn epoch(&self) -> EpochNumber {
        match self {
            CeremonyMessage::FlipSubmission(flip) => flip.epoch,
            CeremonyMessage::FlipAnswer(answer) => answer.epoch,
        }
    }

    pub fn author(&self) -> VerifyingKeyBytes {
        match self {
            CeremonyMessage::FlipSubmission(flip) => flip.author,
            CeremonyMessage::FlipAnswer(answer) => answer.author,
        }
    }

    pub fn is_correctly_signed(&self) -> bool {
        match self {
            CeremonyMessage::FlipSubmission(flip) => flip.is_correctly_self_signed(),
            CeremonyMessage::FlipAnswer(answer) => answer.is_correctly_self_signed(),
        }
    }

    /// Identity used to deduplicate submissions: one entry per flip, and one answer list per author and session.
    pub fn submission_id(&self) -> CryptoHash {
        match self {
            CeremonyMessage::FlipSubmission(flip) => flip.flip_hash(),
            CeremonyMessage::FlipAnswer(answer) => hash_parts(&[
                &answer.author,
                &answer.epoch.to_le_bytes(),
                &serialized(&answer.session),
            ]),
        }
    }
}

impl From<FlipSubmission> for CeremonyMessage {
    fn from(value: FlipSubmission) -> Self {
        CeremonyMessage::FlipSubmission(value)
    }
}

impl From<FlipAnswer> for CeremonyMessage {
    fn from(value: FlipAnswer) -> Self {
        CeremonyMessage::FlipAnswer(value)
    }
}
