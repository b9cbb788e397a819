/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant used by the node core.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    ceremony::messages::{CeremonyMessage, FlipAnswer, FlipSubmission},
    consensus::messages::{ConsensusMessage, Proposal, Vote},
    downloader::messages::{
        BlockRequest, BlockResponse, HeaderAnnouncement, HeaderRequest, SyncMessage,
    },
    types::data_types::{BlockHeight, ChainID},
};

/// All message variants sent through the [`Network`](super::network::Network).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`ConsensusMessage`].
    ConsensusMessage(ConsensusMessage),

    /// See: [`SyncMessage`].
    SyncMessage(SyncMessage),

    /// See: [`CeremonyMessage`].
    CeremonyMessage(CeremonyMessage),
}

impl Message {
    pub fn chain_id(&self) -> ChainID {
        match self {
            Message::ConsensusMessage(msg) => msg.chain_id(),
            Message::SyncMessage(msg) => msg.chain_id(),
            Message::CeremonyMessage(msg) => msg.chain_id(),
        }
    }
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Proposal(value))
    }
}

impl From<Vote> for Message {
    fn from(value: Vote) -> Self {
        Message::ConsensusMessage(ConsensusMessage::Vote(value))
    }
}

impl From<BlockRequest> for Message {
    fn from(value: BlockRequest) -> Self {
        Message::SyncMessage(SyncMessage::BlockRequest(value))
    }
}

impl From<BlockResponse> for Message {
    fn from(value: BlockResponse) -> Self {
        Message::SyncMessage(SyncMessage::BlockResponse(value))
    }
}

impl From<HeaderRequest> for Message {
    fn from(value: HeaderRequest) -> Self {
        Message::SyncMessage(SyncMessage::HeaderRequest(value))
    }
}

impl From<HeaderAnnouncement> for Message {
    fn from(value: HeaderAnnouncement) -> Self {
        Message::SyncMessage(SyncMessage::HeaderAnnouncement(value))
    }
}

impl From<FlipSubmission> for Message {
    fn from(value: FlipSubmission) -> Self {
        Message::CeremonyMessage(CeremonyMessage::FlipSubmission(value))
    }
}

impl From<FlipAnswer> for Message {
    fn from(value: FlipAnswer) -> Self {
        Message::CeremonyMessage(CeremonyMessage::FlipAnswer(value))
    }
}

impl From<CeremonyMessage> for Message {
    fn from(value: CeremonyMessage) -> Self {
        Message::CeremonyMessage(value)
    }
}

/// Message variants processed by the [`algorithm`](crate::algorithm) thread.
#[derive(Clone, Debug)]
pub enum ProgressMessage {
    ConsensusMessage(ConsensusMessage),
    CeremonyMessage(CeremonyMessage),
    BlockResponse(BlockResponse),
    HeaderAnnouncement(HeaderAnnouncement),
}

impl ProgressMessage {
    pub fn chain_id(&self) -> ChainID {
        match self {
            ProgressMessage::ConsensusMessage(msg) => msg.chain_id(),
            ProgressMessage::CeremonyMessage(msg) => msg.chain_id(),
            ProgressMessage::BlockResponse(msg) => msg.chain_id,
            ProgressMessage::HeaderAnnouncement(msg) => msg.chain_id,
        }
    }

    /// Get the height the inner message is about, if it is a consensus message.
    pub fn height(&self) -> Option<BlockHeight> {
        match self {
            ProgressMessage::ConsensusMessage(msg) => Some(msg.height()),
            _ => None,
        }
    }
}

/// Message variants processed by the [block server](crate::downloader::server::BlockServer) thread.
#[derive(Clone, Debug)]
pub enum ServerRequest {
    BlockRequest(BlockRequest),
    HeaderRequest(HeaderRequest),
}
