/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The round-based block consensus protocol.
//!
//! The protocol is split into:
//! 1. [`eligibility`]: deterministic, hash-based selection of the proposer of each round.
//! 2. [`messages`]: proposals, votes and the commit certificates built from precommits.
//! 3. [`types`]: round state, steps and timeouts.
//! 4. [`implementation`]: the event-driven engine that drives each height through its rounds.

pub mod eligibility;

pub(crate) mod implementation;

pub mod messages;

pub mod types;
