/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! General purpose, read-only interface for querying the chain state.

use crate::{
    ceremony::types::CeremonyResults,
    consensus::messages::CommitCertificate,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, EpochNumber},
        validator_set::ValidatorSet,
    },
};

use super::{
    pluggables::{KVGet, KVStore},
    state::ChainStateError,
};

/// A factory for [`ChainStateSnapshot`]s. Cheap to clone and safe to hand to other threads.
#[derive(Clone)]
pub struct ChainStateCamera<K: KVStore>(K);

impl<K: KVStore> ChainStateCamera<K> {
    pub fn new(kv_store: K) -> Self {
        ChainStateCamera(kv_store)
    }

    pub fn snapshot(&self) -> ChainStateSnapshot<K::Snapshot<'_>> {
        ChainStateSnapshot(self.0.snapshot())
    }
}

/// A read-only view into the chain state that is guaranteed to stay unchanged.
pub struct ChainStateSnapshot<S: KVGet>(pub(super) S);

impl<S: KVGet> ChainStateSnapshot<S> {
    pub(crate) fn new(kv_snapshot: S) -> Self {
        ChainStateSnapshot(kv_snapshot)
    }

    pub fn block(&self, block: &CryptoHash) -> Result<Option<Block>, ChainStateError> {
        Ok(self.0.block(block)?)
    }

    pub fn block_at_height(&self, height: BlockHeight) -> Result<Option<Block>, ChainStateError> {
        match self.0.block_at_height(height)? {
            Some(block) => Ok(Some(
                self.0
                    .block(&block)?
                    .ok_or(ChainStateError::BlockExpectedButNotFound { block })?,
            )),
            None => Ok(None),
        }
    }

    pub fn commit_certificate(
        &self,
        block: &CryptoHash,
    ) -> Result<Option<CommitCertificate>, ChainStateError> {
        Ok(self.0.commit_certificate(block)?)
    }

    /// Get the committed block with the greatest height.
    pub fn head_block(&self) -> Result<Block, ChainStateError> {
        let head = self
            .0
            .head_block()?
            .ok_or(ChainStateError::NotInitialized)?;
        self.0
            .block(&head)?
            .ok_or(ChainStateError::BlockExpectedButNotFound { block: head })
    }

    pub fn head_height(&self) -> Result<BlockHeight, ChainStateError> {
        Ok(self.head_block()?.height)
    }

    pub fn is_initialized(&self) -> Result<bool, ChainStateError> {
        Ok(self.0.head_block()?.is_some())
    }

    /// Get the validator set that votes on the blocks of `epoch`.
    pub fn validator_set(&self, epoch: EpochNumber) -> Result<ValidatorSet, ChainStateError> {
        self.0
            .validator_set(epoch)?
            .ok_or(ChainStateError::ValidatorSetExpectedButNotFound { epoch })
    }

    pub fn ceremony_results(
        &self,
        epoch: EpochNumber,
    ) -> Result<Option<CeremonyResults>, ChainStateError> {
        Ok(self.0.ceremony_results(epoch)?)
    }

    pub fn last_applied_epoch(&self) -> Result<Option<EpochNumber>, ChainStateError> {
        Ok(self.0.last_applied_epoch()?)
    }

    pub fn committed_app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.committed_app_state(key)
    }

    /// Get up to `limit` consecutive committed blocks starting at `height`, each with its commit
    /// certificate. Stops early at the head. Used to serve block requests.
    pub fn blocks_from_height(
        &self,
        height: BlockHeight,
        limit: u32,
    ) -> Result<Vec<(Block, CommitCertificate)>, ChainStateError> {
        let mut res = Vec::with_capacity(limit as usize);
        // The genesis block has no certificate and is never served.
        let mut cursor = if height == BlockHeight::genesis() {
            height + 1
        } else {
            height
        };
        while res.len() < limit as usize {
            let Some(block) = self.block_at_height(cursor)? else {
                break;
            };
            let certificate = self.0.commit_certificate(&block.hash)?.ok_or(
                ChainStateError::CertificateExpectedButNotFound { block: block.hash },
            )?;
            res.push((block, certificate));
            cursor += 1;
        }
        Ok(res)
    }
}
