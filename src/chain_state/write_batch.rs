/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`ChainStateWriteBatch`], which forms the keys of chain state variables and serializes their values
//! before setting them in a user-provided [`WriteBatch`].

use borsh::BorshSerialize;

use crate::{
    ceremony::types::CeremonyResults,
    consensus::messages::CommitCertificate,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, EpochNumber},
        update_sets::AppStateUpdates,
        validator_set::{ValidatorSet, ValidatorSetBytes},
    },
};

use super::{
    pluggables::{KVSetError, Key, WriteBatch},
    variables::{self, concat},
};

fn serialize_at<T: BorshSerialize>(value: &T, key: Key) -> Result<Vec<u8>, KVSetError> {
    value
        .try_to_vec()
        .map_err(|err| KVSetError::SerializeValueError { key, source: err })
}

pub struct ChainStateWriteBatch<W: WriteBatch>(pub(super) W);

impl<W: WriteBatch> ChainStateWriteBatch<W> {
    pub(crate) fn new() -> ChainStateWriteBatch<W> {
        ChainStateWriteBatch(W::new())
    }

    pub fn set_block(&mut self, block: &Block) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::BLOCKS, &block.hash.bytes()),
            &serialize_at(block, Key::Block { block: block.hash })?,
        );
        Ok(())
    }

    pub fn set_block_at_height(
        &mut self,
        height: BlockHeight,
        block: &CryptoHash,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::BLOCK_AT_HEIGHT, &height.to_le_bytes()),
            &serialize_at(block, Key::BlockAtHeight { height })?,
        );
        Ok(())
    }

    pub fn set_commit_certificate(
        &mut self,
        certificate: &CommitCertificate,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::COMMIT_CERTIFICATES, &certificate.block.bytes()),
            &serialize_at(
                certificate,
                Key::CommitCertificate {
                    block: certificate.block,
                },
            )?,
        );
        Ok(())
    }

    pub fn set_head_block(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        self.0
            .set(&variables::HEAD_BLOCK, &serialize_at(block, Key::HeadBlock)?);
        Ok(())
    }

    pub fn set_validator_set(
        &mut self,
        epoch: EpochNumber,
        validator_set: &ValidatorSet,
    ) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::VALIDATOR_SETS, &epoch.to_le_bytes()),
            &serialize_at(
                &ValidatorSetBytes::from(validator_set),
                Key::ValidatorSet { epoch },
            )?,
        );
        Ok(())
    }

    pub fn set_ceremony_results(&mut self, results: &CeremonyResults) -> Result<(), KVSetError> {
        self.0.set(
            &concat(&variables::CEREMONY_RESULTS, &results.epoch.to_le_bytes()),
            &serialize_at(
                results,
                Key::CeremonyResults {
                    epoch: results.epoch,
                },
            )?,
        );
        Ok(())
    }

    pub fn set_last_applied_epoch(&mut self, epoch: EpochNumber) -> Result<(), KVSetError> {
        self.0.set(
            &variables::LAST_APPLIED_EPOCH,
            &serialize_at(&epoch, Key::LastAppliedEpoch)?,
        );
        Ok(())
    }

    pub fn apply_app_state_updates(&mut self, app_state_updates: &AppStateUpdates) {
        for (key, value) in app_state_updates.inserts() {
            self.0
                .set(&concat(&variables::COMMITTED_APP_STATE, key), value);
        }

        for key in app_state_updates.deletes() {
            self.0
                .delete(&concat(&variables::COMMITTED_APP_STATE, key));
        }
    }
}
