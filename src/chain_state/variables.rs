/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each chain state variable is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Blocks|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`Block`](crate::types::block::Block)|Every committed block, keyed by its hash.|
//! |Block at Height|[`BlockHeight`](crate::types::data_types::BlockHeight) -> [`CryptoHash`](crate::types::data_types::CryptoHash)|The hash of the block committed at each height.|
//! |Commit Certificates|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`CommitCertificate`](crate::consensus::messages::CommitCertificate)|The precommits that finalized each non-genesis block.|
//! |Head Block|[`CryptoHash`](crate::types::data_types::CryptoHash)|The committed block with the greatest height.|
//! |Validator Sets|[`EpochNumber`](crate::types::data_types::EpochNumber) -> [`ValidatorSetBytes`](crate::types::validator_set::ValidatorSetBytes)|The validator set that votes on the blocks of each epoch.|
//! |Ceremony Results|[`EpochNumber`](crate::types::data_types::EpochNumber) -> [`CeremonyResults`](crate::ceremony::types::CeremonyResults)|The aggregated outcome of the ceremony that closed each epoch.|
//! |Last Applied Epoch|[`EpochNumber`](crate::types::data_types::EpochNumber)|The most recent epoch whose validator set was produced by `apply_new_epoch`.|
//! |Committed App State|[`Vec<u8>`] -> [`Vec<u8>`]|The app state after applying every committed block.|
//!
//! # Persistence of state variables
//!
//! Single values are stored at one-byte, constant keys sharing the variable's name. Mappings of the form
//! "`A` -> `B`" are stored at the concatenation of the variable's one-byte prefix and the little-endian
//! bytes (or raw bytes, for hashes and app state keys) of the `A` value. All values are Borsh-serialized,
//! except for committed app state values, which are stored as given by the app.

pub const BLOCKS: [u8; 1] = [0];
pub const BLOCK_AT_HEIGHT: [u8; 1] = [1];
pub const COMMIT_CERTIFICATES: [u8; 1] = [2];
pub const HEAD_BLOCK: [u8; 1] = [3];
pub const VALIDATOR_SETS: [u8; 1] = [4];
pub const CEREMONY_RESULTS: [u8; 1] = [5];
pub const LAST_APPLIED_EPOCH: [u8; 1] = [6];
pub const COMMITTED_APP_STATE: [u8; 1] = [7];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
