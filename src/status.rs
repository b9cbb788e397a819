/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A shared snapshot of what the algorithm thread is doing, for the RPC layer to read.

use std::sync::{Arc, RwLock};

use crate::{
    ceremony::types::CeremonyPhase,
    consensus::types::RoundStateSummary,
    downloader::types::SyncStatus,
    types::data_types::{BlockHeight, CryptoHash, EpochNumber},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    pub head_height: BlockHeight,
    pub head_hash: CryptoHash,
    pub round: Option<RoundStateSummary>,
    pub epoch: EpochNumber,
    pub ceremony_phase: CeremonyPhase,
    pub sync: Option<SyncStatus>,
}

impl NodeStatus {
    fn new(head_height: BlockHeight, head_hash: CryptoHash) -> Self {
        NodeStatus {
            head_height,
            head_hash,
            round: None,
            epoch: EpochNumber::new(0),
            ceremony_phase: CeremonyPhase::Idle,
            sync: None,
        }
    }

    /// Whether the downloader is catching up with a peer.
    pub fn is_syncing(&self) -> bool {
        self.sync.as_ref().is_some_and(|sync| sync.syncing)
    }
}

/// Cloneable handle to the [`NodeStatus`]. Written only by the algorithm thread.
#[derive(Clone)]
pub struct StatusBoard(Arc<RwLock<NodeStatus>>);

impl StatusBoard {
    pub(crate) fn new(head_height: BlockHeight, head_hash: CryptoHash) -> Self {
        StatusBoard(Arc::new(RwLock::new(NodeStatus::new(head_height, head_hash))))
    }

    /// A copy of the latest status.
    pub fn get(&self) -> NodeStatus {
        match self.0.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update(&self, update: impl FnOnce(&mut NodeStatus)) {
        match self.0.write() {
            Ok(mut status) => update(&mut status),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}
