/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pools of pending consensus messages that feed the consensus engine.

pub mod proposals;

pub mod votes;

/// Classification of a message offered to a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored. The caller should re-evaluate the engine's state.
    Accepted,
    /// Already known, or superseded by a message the pool prefers.
    Duplicate,
    /// Failed validation and was dropped.
    Invalid,
    /// For a height (or round) the engine has already left.
    Stale,
    /// For a height the engine has not reached yet, or a round too far ahead of its current one.
    Future,
}
