/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait, implemented by the library user's peer-to-peer transport.

use crate::types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet};

use super::messages::Message;

pub trait Network: Clone + Send {
    /// Inform the network provider the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Inform the networking provider of the validator set of a new epoch.
    fn update_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers (including listeners) without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}

/// Handle for informing the Network Provider about validator set changes.
///
/// The network provider may want to establish connections to validators that join the set at an epoch
/// boundary, and drop connections to identities that failed the ceremony.
#[derive(Clone)]
pub(crate) struct ValidatorSetUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> ValidatorSetUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_validator_set(&mut self, validator_set: ValidatorSet) {
        self.network.update_validator_set(validator_set)
    }
}
