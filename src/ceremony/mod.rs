/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The validation ceremony: a proof-of-personhood procedure that runs once per epoch and decides which
//! identities form the validator set of the next epoch.
//!
//! The ceremony is split into:
//! 1. [`messages`]: flips and answers submitted by identities.
//! 2. [`types`]: the phase schedule and the aggregated results.
//! 3. [`pool`]: gossiped submissions waiting to be included in a block.
//! 4. [`implementation`]: the [`ValidationCeremony`](implementation::ValidationCeremony) state machine,
//!    driven by committed blocks.

pub mod implementation;

pub mod messages;

pub mod pool;

pub mod types;
