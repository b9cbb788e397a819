/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain synchronization between replicas.
//!
//! A lagging replica's [`Downloader`](implementation::Downloader) fetches committed blocks from the
//! [`BlockServer`](server::BlockServer) of a peer that is ahead, verifies them, and commits them through
//! the same path the consensus engine uses.

pub(crate) mod implementation;

pub mod messages;

pub(crate) mod server;

pub mod types;
