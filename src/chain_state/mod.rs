/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persisted, committed state of the chain.
//!
//! The chain state holds the committed blocks and their commit certificates, the validator set of each
//! epoch, the ceremony results of each closed epoch and the committed app state. It is written only by
//! the algorithm thread through [`ChainState`](state::ChainState), whose [`commit`](state::ChainState::commit)
//! is the one path through which both the consensus engine and the downloader advance the chain. Every
//! other thread reads it through a [`ChainStateCamera`](camera::ChainStateCamera).

pub mod camera;

pub mod pluggables;

pub mod state;

pub mod variables;

pub mod write_batch;
