/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via replica's
//! [config](crate::replica::Configuration).
//!
//! The node core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, Id5u7f6, fNGCJyk, 12, 0
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the origin of the proposal.
//! - The fourth value is the first seven characters of the Base64 encoding of the hash of the proposed
//!   block.
//! - The fifth and sixth values are the height and round of the proposal.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const APPLY_NEW_EPOCH: &str = "ApplyNewEpoch";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";

pub const START_ROUND: &str = "StartRound";
pub const ROUND_TIMEOUT: &str = "RoundTimeout";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const REJECT_BATCH: &str = "RejectBatch";
pub const RECEIVE_BLOCK_REQUEST: &str = "ReceiveBlockRequest";
pub const SEND_BLOCK_RESPONSE: &str = "SendBlockResponse";

pub const CEREMONY_PHASE_CHANGE: &str = "CeremonyPhaseChange";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                if commit_block_event.synced { "synced" } else { "voted" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyNewEpochEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_new_epoch_event: &ApplyNewEpochEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPLY_NEW_EPOCH,
                secs_since_unix_epoch(apply_new_epoch_event.timestamp),
                apply_new_epoch_event.epoch,
                apply_new_epoch_event.validator_set.len(),
                apply_new_epoch_event.kept_previous_set
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.proposal.block.hash.bytes()),
                propose_event.proposal.height,
                propose_event.proposal.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {:?}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.vote.step,
                vote_block_info(&vote_event.vote.block),
                vote_event.vote.height,
                vote_event.vote.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_proposal_event.proposal.block.hash.bytes()),
                receive_proposal_event.proposal.height,
                receive_proposal_event.proposal.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {:?}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.origin.to_bytes()),
                receive_vote_event.vote.step,
                vote_block_info(&receive_vote_event.vote.block),
                receive_vote_event.vote.height,
                receive_vote_event.vote.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.height,
                start_round_event.round,
                match &start_round_event.proposer {
                    Some(proposer) => first_seven_base64_chars(&proposer.to_bytes()),
                    None => String::from("none"),
                }
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_timeout_event: &RoundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                ROUND_TIMEOUT,
                secs_since_unix_epoch(round_timeout_event.timestamp),
                round_timeout_event.height,
                round_timeout_event.round,
                round_timeout_event.step
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                first_seven_base64_chars(&start_sync_event.peer.to_bytes()),
                start_sync_event.peer_height
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                end_sync_event.blocks_synced
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectBatchEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_batch_event: &RejectBatchEvent| {
            log::warn!(
                "{}, {}, {}, {:?}",
                REJECT_BATCH,
                secs_since_unix_epoch(reject_batch_event.timestamp),
                first_seven_base64_chars(&reject_batch_event.peer.to_bytes()),
                reject_batch_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBlockRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_block_request_event: &ReceiveBlockRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_BLOCK_REQUEST,
                secs_since_unix_epoch(receive_block_request_event.timestamp),
                first_seven_base64_chars(&receive_block_request_event.peer.to_bytes()),
                receive_block_request_event.from_height,
                receive_block_request_event.count
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendBlockResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_block_response_event: &SendBlockResponseEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_BLOCK_RESPONSE,
                secs_since_unix_epoch(send_block_response_event.timestamp),
                first_seven_base64_chars(&send_block_response_event.peer.to_bytes()),
                send_block_response_event.from_height,
                send_block_response_event.blocks
            )
        };
        Box::new(logger)
    }
}

impl Logger for CeremonyPhaseChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |phase_change_event: &CeremonyPhaseChangeEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                CEREMONY_PHASE_CHANGE,
                secs_since_unix_epoch(phase_change_event.timestamp),
                phase_change_event.epoch,
                phase_change_event.phase
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn vote_block_info(block: &Option<crate::types::data_types::CryptoHash>) -> String {
    match block {
        Some(block) => first_seven_base64_chars(&block.bytes()),
        None => String::from("nil"),
    }
}
