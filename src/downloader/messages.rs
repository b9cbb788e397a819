/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between the [downloader](super::implementation::Downloader) of a lagging replica
//! and the [block servers](super::server::BlockServer) of its peers.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    consensus::messages::CommitCertificate,
    types::{
        block::Block,
        data_types::{BlockHeight, ChainID, ChainWeight, CryptoHash},
    },
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    BlockRequest(BlockRequest),
    BlockResponse(BlockResponse),
    HeaderRequest(HeaderRequest),
    HeaderAnnouncement(HeaderAnnouncement),
}

impl SyncMessage {
    pub fn chain_id(&self) -> ChainID {
        match self {
            SyncMessage::BlockRequest(msg) => msg.chain_id,
            SyncMessage::BlockResponse(msg) => msg.chain_id,
            SyncMessage::HeaderRequest(msg) => msg.chain_id,
            SyncMessage::HeaderAnnouncement(msg) => msg.chain_id,
        }
    }
}

/// Request for up to `count` committed blocks starting at `from_height`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockRequest {
    pub chain_id: ChainID,
    pub from_height: BlockHeight,
    pub count: u32,
}

/// A committed block together with the precommits that finalized it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CertifiedBlock {
    pub block: Block,
    pub certificate: CommitCertificate,
}

/// Answer to a [`BlockRequest`]. `blocks` is empty if the server has nothing at `from_height`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockResponse {
    pub chain_id: ChainID,
    pub from_height: BlockHeight,
    pub blocks: Vec<CertifiedBlock>,
}

/// Asks every peer to send a [`HeaderAnnouncement`] of its head.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HeaderRequest {
    pub chain_id: ChainID,
}

/// Advertises the head of the sender's chain.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HeaderAnnouncement {
    pub chain_id: ChainID,
    pub height: BlockHeight,
    pub weight: ChainWeight,
    pub head: CryptoHash,
}
