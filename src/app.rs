/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`App`] trait, the node core's interface to the application that owns the transaction pool and
//! the state transition function.
//!
//! The core treats transactions as opaque bytes. When the replica is the proposer of a round, it calls
//! [`App::produce_block`] to get the transactions and the resulting state root of the next block; when it
//! receives a proposal, and when the downloader applies a fetched block, it calls [`App::validate_block`].
//!
//! ## Determinism
//!
//! `validate_block` must be a pure function of the proposed block and the committed app state it is given:
//! every replica must reach the same verdict and the same [`AppStateUpdates`] for the same block, or
//! replicas' app states will diverge.

use crate::{
    chain_state::{
        camera::ChainStateSnapshot,
        pluggables::KVStore,
    },
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash, Transaction},
        update_sets::AppStateUpdates,
    },
};

pub trait App<K: KVStore>: Send + 'static {
    fn produce_block(&mut self, request: ProduceBlockRequest<K>) -> ProduceBlockResponse;
    fn validate_block(&mut self, request: ValidateBlockRequest<K>) -> ValidateBlockResponse;
}

pub struct ProduceBlockRequest<'a, K: KVStore> {
    height: BlockHeight,
    parent_block: &'a Block,
    chain_state: ChainStateSnapshot<K::Snapshot<'a>>,
}

impl<'a, K: KVStore> ProduceBlockRequest<'a, K> {
    pub(crate) fn new(
        height: BlockHeight,
        parent_block: &'a Block,
        chain_state: ChainStateSnapshot<K::Snapshot<'a>>,
    ) -> Self {
        Self {
            height,
            parent_block,
            chain_state,
        }
    }

    /// Height of the block to be produced.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// The current head, which the produced block will extend.
    pub fn parent_block(&self) -> &Block {
        self.parent_block
    }

    /// Committed app state as of `parent_block`.
    pub fn app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.chain_state.committed_app_state(key)
    }

    pub fn chain_state(&self) -> &ChainStateSnapshot<K::Snapshot<'a>> {
        &self.chain_state
    }
}

pub struct ProduceBlockResponse {
    pub transactions: Vec<Transaction>,
    /// The app's state root after executing `transactions` on top of the parent block.
    pub state_root: CryptoHash,
    pub app_state_updates: Option<AppStateUpdates>,
}

pub struct ValidateBlockRequest<'a, K: KVStore> {
    proposed_block: &'a Block,
    chain_state: ChainStateSnapshot<K::Snapshot<'a>>,
}

impl<'a, K: KVStore> ValidateBlockRequest<'a, K> {
    pub(crate) fn new(
        proposed_block: &'a Block,
        chain_state: ChainStateSnapshot<K::Snapshot<'a>>,
    ) -> Self {
        Self {
            proposed_block,
            chain_state,
        }
    }

    pub fn proposed_block(&self) -> &Block {
        self.proposed_block
    }

    /// Committed app state as of the parent of `proposed_block`.
    pub fn app_state(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.chain_state.committed_app_state(key)
    }

    pub fn chain_state(&self) -> &ChainStateSnapshot<K::Snapshot<'a>> {
        &self.chain_state
    }
}

pub enum ValidateBlockResponse {
    /// The block's transactions are valid and its `state_root` is the result of executing them.
    Valid {
        app_state_updates: Option<AppStateUpdates>,
    },

    Invalid,
}

