/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus and chain-synchronization core of a proof-of-personhood blockchain node.
//!
//! A replica decides blocks with a round-based BFT protocol ([`consensus`]), catches up with peers that
//! are ahead of it ([`downloader`]), and runs a periodic [validation ceremony](ceremony) whose results
//! decide the validator set of the next epoch. Networking, storage and the application are pluggable
//! through the [`Network`](networking::network::Network), [`KVStore`](chain_state::pluggables::KVStore)
//! and [`App`](app::App) traits. See [`replica`] for how to put a replica together and start it.

pub mod app;

pub mod ceremony;

pub mod chain_state;

pub mod clock;

pub mod consensus;

pub mod downloader;

pub mod events;

pub mod networking;

pub mod pools;

pub mod replica;

pub mod status;

pub mod types;

pub(crate) mod algorithm;

pub(crate) mod commit;

pub(crate) mod event_bus;

pub(crate) mod logging;

#[cfg(test)]
pub(crate) mod testing;
