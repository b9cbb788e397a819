/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single writer of the chain state.

use crate::{
    ceremony::types::EpochTransition,
    consensus::messages::CommitCertificate,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, EpochNumber},
        update_sets::AppStateUpdates,
        validator_set::ValidatorSet,
    },
};

use super::{
    camera::{ChainStateCamera, ChainStateSnapshot},
    pluggables::{KVGetError, KVSetError, KVStore},
    write_batch::ChainStateWriteBatch,
};

/// Everything that is written when one block is committed. All of it lands in a single write batch.
pub struct BlockCommit {
    pub block: Block,
    pub certificate: CommitCertificate,
    pub app_state_updates: Option<AppStateUpdates>,

    /// Set when `block` closes an epoch.
    pub epoch_transition: Option<EpochTransition>,
}

/// Read and write handle to the chain state, owned by the algorithm thread.
///
/// Only [`commit`](Self::commit) mutates committed data, and it only ever extends the head by exactly one
/// block, so at most one block is committed per height.
pub struct ChainState<K: KVStore>(K);

impl<K: KVStore> ChainState<K> {
    pub(crate) fn new(kv_store: K) -> Self {
        ChainState(kv_store)
    }

    /// Write the genesis block, the validator set of epoch 0 and the initial app state into `kv_store`,
    /// unless the store has already been initialized.
    pub fn initialize(
        kv_store: &mut K,
        genesis: &Block,
        validator_set: &ValidatorSet,
        initial_app_state: &AppStateUpdates,
    ) -> Result<(), ChainStateError> {
        if ChainStateSnapshot::new(kv_store.snapshot()).is_initialized()? {
            return Ok(());
        }

        let mut wb = ChainStateWriteBatch::<K::WriteBatch>::new();
        wb.set_block(genesis)?;
        wb.set_block_at_height(genesis.height, &genesis.hash)?;
        wb.set_head_block(&genesis.hash)?;
        wb.set_validator_set(EpochNumber::new(0), validator_set)?;
        wb.apply_app_state_updates(initial_app_state);
        kv_store.write(wb.0);
        Ok(())
    }

    pub fn snapshot(&self) -> ChainStateSnapshot<K::Snapshot<'_>> {
        ChainStateSnapshot::new(self.0.snapshot())
    }

    pub fn camera(&self) -> ChainStateCamera<K> {
        ChainStateCamera::new(self.0.clone())
    }

    pub fn head_block(&self) -> Result<Block, ChainStateError> {
        self.snapshot().head_block()
    }

    pub fn block_at_height(&self, height: BlockHeight) -> Result<Option<Block>, ChainStateError> {
        self.snapshot().block_at_height(height)
    }

    pub fn validator_set(&self, epoch: EpochNumber) -> Result<ValidatorSet, ChainStateError> {
        self.snapshot().validator_set(epoch)
    }

    pub fn last_applied_epoch(&self) -> Result<Option<EpochNumber>, ChainStateError> {
        self.snapshot().last_applied_epoch()
    }

    /// Atomically commit `commit.block` on top of the current head, together with its certificate, its
    /// app state updates and, at an epoch boundary, the next epoch's validator set and ceremony results.
    pub fn commit(&mut self, commit: BlockCommit) -> Result<(), ChainStateError> {
        let head = self.head_block()?;
        if commit.block.height <= head.height {
            return Err(ChainStateError::HeightAlreadyCommitted {
                height: commit.block.height,
            });
        }
        if commit.block.height != head.height + 1 || commit.block.parent_hash != head.hash {
            return Err(ChainStateError::DoesNotExtendHead {
                block: commit.block.hash,
                head: head.hash,
            });
        }

        let mut wb = ChainStateWriteBatch::<K::WriteBatch>::new();
        wb.set_block(&commit.block)?;
        wb.set_block_at_height(commit.block.height, &commit.block.hash)?;
        wb.set_commit_certificate(&commit.certificate)?;
        wb.set_head_block(&commit.block.hash)?;
        if let Some(app_state_updates) = &commit.app_state_updates {
            wb.apply_app_state_updates(app_state_updates);
        }
        if let Some(transition) = &commit.epoch_transition {
            wb.set_validator_set(transition.next_epoch, &transition.validator_set)?;
            wb.set_ceremony_results(&transition.results)?;
            wb.set_last_applied_epoch(transition.results.epoch)?;
        }

        self.0.write(wb.0);
        Ok(())
    }
}

/// Errors that may be encountered when reading or writing the chain state. All of them are fatal to the
/// algorithm thread, except `HeightAlreadyCommitted`, which callers may treat as a no-op.
#[derive(Debug)]
pub enum ChainStateError {
    /// Error when trying to get a value from the chain state's underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// Error when trying set a value into the chain state's underlying key value store.
    KVSetError(KVSetError),

    /// The store has no head block; [`ChainState::initialize`] was never called on it.
    NotInitialized,

    /// A block is referenced by the chain state (e.g., by height) but its body is missing.
    BlockExpectedButNotFound { block: CryptoHash },

    /// A height at or below the head has no committed block.
    BlockAtHeightExpectedButNotFound { height: BlockHeight },

    /// A committed non-genesis block has no commit certificate.
    CertificateExpectedButNotFound { block: CryptoHash },

    /// The validator set of an epoch that has started was never written.
    ValidatorSetExpectedButNotFound { epoch: EpochNumber },

    /// A block was committed at a height that already has a committed block.
    HeightAlreadyCommitted { height: BlockHeight },

    /// A block was committed that is not the child of the current head.
    DoesNotExtendHead { block: CryptoHash, head: CryptoHash },
}

impl From<KVGetError> for ChainStateError {
    fn from(value: KVGetError) -> Self {
        ChainStateError::KVGetError(value)
    }
}

impl From<KVSetError> for ChainStateError {
    fn from(value: KVSetError) -> Self {
        ChainStateError::KVSetError(value)
    }
}
