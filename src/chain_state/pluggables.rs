/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable chain state persistence.
//!
//! Library users provide the key-value store by implementing [`KVStore`]. The default methods of
//! [`KVGet`] know how each [state variable](super::variables) is laid out and deserialize it.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::{
    ceremony::types::CeremonyResults,
    consensus::messages::CommitCertificate,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, EpochNumber},
        validator_set::{ValidatorSet, ValidatorSetBytes},
    },
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

fn deserialize_at<T: BorshDeserialize>(bytes: Vec<u8>, key: Key) -> Result<T, KVGetError> {
    T::deserialize(&mut bytes.as_slice())
        .map_err(|err| KVGetError::DeserializeValueError { key, source: err })
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Blocks ↓↓↓ */

    fn block(&self, block: &CryptoHash) -> Result<Option<Block>, KVGetError> {
        match self.get(&concat(&variables::BLOCKS, &block.bytes())) {
            Some(bytes) => Ok(Some(deserialize_at(bytes, Key::Block { block: *block })?)),
            None => Ok(None),
        }
    }

    fn block_at_height(&self, height: BlockHeight) -> Result<Option<CryptoHash>, KVGetError> {
        match self.get(&concat(&variables::BLOCK_AT_HEIGHT, &height.to_le_bytes())) {
            Some(bytes) => Ok(Some(deserialize_at(bytes, Key::BlockAtHeight { height })?)),
            None => Ok(None),
        }
    }

    fn commit_certificate(
        &self,
        block: &CryptoHash,
    ) -> Result<Option<CommitCertificate>, KVGetError> {
        match self.get(&concat(&variables::COMMIT_CERTIFICATES, &block.bytes())) {
            Some(bytes) => Ok(Some(deserialize_at(
                bytes,
                Key::CommitCertificate { block: *block },
            )?)),
            None => Ok(None),
        }
    }

    fn head_block(&self) -> Result<Option<CryptoHash>, KVGetError> {
        match self.get(&variables::HEAD_BLOCK) {
            Some(bytes) => Ok(Some(deserialize_at(bytes, Key::HeadBlock)?)),
            None => Ok(None),
        }
    }

    /* ↓↓↓ Validator Sets ↓↓↓ */

    fn validator_set(&self, epoch: EpochNumber) -> Result<Option<ValidatorSet>, KVGetError> {
        match self.get(&concat(&variables::VALIDATOR_SETS, &epoch.to_le_bytes())) {
            Some(bytes) => {
                let validator_set_bytes: ValidatorSetBytes =
                    deserialize_at(bytes, Key::ValidatorSet { epoch })?;
                let validator_set = ValidatorSet::try_from(validator_set_bytes).map_err(|err| {
                    KVGetError::Ed25519DalekError {
                        key: Key::ValidatorSet { epoch },
                        source: err,
                    }
                })?;
                Ok(Some(validator_set))
            }
            None => Ok(None),
        }
    }

    /* ↓↓↓ Ceremony ↓↓↓ */

    fn ceremony_results(&self, epoch: EpochNumber) -> Result<Option<CeremonyResults>, KVGetError> {
        match self.get(&concat(&variables::CEREMONY_RESULTS, &epoch.to_le_bytes())) {
            Some(bytes) => Ok(Some(deserialize_at(bytes, Key::CeremonyResults { epoch })?)),
            None => Ok(None),
        }
    }

    fn last_applied_epoch(&self) -> Result<Option<EpochNumber>, KVGetError> {
        match self.get(&variables::LAST_APPLIED_EPOCH) {
            Some(bytes) => Ok(Some(deserialize_at(bytes, Key::LastAppliedEpoch)?)),
            None => Ok(None),
        }
    }

    /* ↓↓↓ Committed App State ↓↓↓ */

    fn committed_app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(&concat(&variables::COMMITTED_APP_STATE, key))
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found,
/// 3. There was an error when processing Ed25519Dalek keypairs or signatures.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError {
        key: Key,
        source: std::io::Error,
    },
    ValueExpectedButNotFound {
        key: Key,
    },
    Ed25519DalekError {
        key: Key,
        source: ed25519_dalek::SignatureError,
    },
}

/// Error when trying to serialize a value before setting it into the key value store.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug)]
pub enum Key {
    Block { block: CryptoHash },
    BlockAtHeight { height: BlockHeight },
    CommitCertificate { block: CryptoHash },
    HeadBlock,
    ValidatorSet { epoch: EpochNumber },
    CeremonyResults { epoch: EpochNumber },
    LastAppliedEpoch,
    CommittedAppState { key: Vec<u8> },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Block { block } => write!(f, "Block {}", block),
            Key::BlockAtHeight { height } => write!(f, "Block at height {}", height),
            Key::CommitCertificate { block } => write!(f, "Commit Certificate for block {}", block),
            Key::HeadBlock => write!(f, "Head Block"),
            Key::ValidatorSet { epoch } => write!(f, "Validator Set of epoch {}", epoch),
            Key::CeremonyResults { epoch } => write!(f, "Ceremony Results of epoch {}", epoch),
            Key::LastAppliedEpoch => write!(f, "Last Applied Epoch"),
            Key::CommittedAppState { key } => write!(f, "Committed App State for key {:#?}", key),
        }
    }
}
