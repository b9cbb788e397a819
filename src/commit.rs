/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The commit path shared by the consensus engine and the downloader.
//!
//! Whether a block was decided by this replica's own voting or fetched from a peer, it is committed
//! through [`CommitPath::commit`], which:
//! 1. Lets the [`ValidationCeremony`] record the block's ceremony transactions.
//! 2. At an epoch boundary, calls [`apply_new_epoch`](ValidationCeremony::apply_new_epoch) to get the
//!    next epoch's validator set.
//! 3. Writes the block, its certificate, its app state updates and the epoch transition (if any) to the
//!    chain state in one write batch.
//! 4. Informs the network of the new validator set, moves the ceremony to the next height, and publishes
//!    the corresponding events.

use std::sync::mpsc::Sender;

use crate::{
    ceremony::implementation::{CeremonyError, ValidationCeremony},
    chain_state::{
        pluggables::KVStore,
        state::{BlockCommit, ChainState, ChainStateError},
    },
    clock::Clock,
    consensus::messages::CommitCertificate,
    events::{ApplyNewEpochEvent, CeremonyPhaseChangeEvent, CommitBlockEvent, Event},
    networking::network::{Network, ValidatorSetUpdateHandle},
    types::{
        block::Block, data_types::BlockHeight, update_sets::AppStateUpdates,
        validator_set::ValidatorSet,
    },
};

/// Owner of everything that changes when a block is committed. Lives on the algorithm thread, which
/// makes it the single writer of the chain state.
pub(crate) struct CommitPath<K: KVStore, N: Network> {
    chain_state: ChainState<K>,
    ceremony: ValidationCeremony,
    head: Block,
    validator_set_update_handle: ValidatorSetUpdateHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, N: Network> CommitPath<K, N> {
    pub(crate) fn new(
        chain_state: ChainState<K>,
        mut ceremony: ValidationCeremony,
        validator_set_update_handle: ValidatorSetUpdateHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, CommitError> {
        let head = chain_state.head_block()?;
        ceremony.initialize(&chain_state.snapshot())?;
        Ok(Self {
            chain_state,
            ceremony,
            head,
            validator_set_update_handle,
            event_publisher,
        })
    }

    /// Commit `block` on top of the current head.
    ///
    /// `synced` records whether the block came from the downloader rather than from this replica's own
    /// voting, and is only used for the emitted event.
    pub(crate) fn commit(
        &mut self,
        block: Block,
        certificate: CommitCertificate,
        app_state_updates: Option<AppStateUpdates>,
        synced: bool,
        clock: &impl Clock,
    ) -> Result<(), CommitError> {
        if block.height <= self.head.height {
            return Err(ChainStateError::HeightAlreadyCommitted {
                height: block.height,
            }
            .into());
        }
        if block.height != self.head.height + 1 || block.parent_hash != self.head.hash {
            return Err(ChainStateError::DoesNotExtendHead {
                block: block.hash,
                head: self.head.hash,
            }
            .into());
        }

        // 1. Record the block's ceremony transactions, and close the epoch if the block is its boundary.
        let validator_set = self.validator_set_of(block.height)?;
        self.ceremony.on_block(&block, &validator_set);
        let epoch_transition = self.ceremony.apply_new_epoch(block.height, &validator_set)?;

        // 2. Persist everything in one write batch.
        self.chain_state.commit(BlockCommit {
            block: block.clone(),
            certificate,
            app_state_updates,
            epoch_transition: epoch_transition.clone(),
        })?;

        Event::CommitBlock(CommitBlockEvent {
            timestamp: clock.system_time(),
            block: block.hash,
            height: block.height,
            synced,
        })
        .publish(&self.event_publisher);

        // 3. Let the network and the event handlers know about the new epoch.
        if let Some(transition) = epoch_transition {
            self.validator_set_update_handle
                .update_validator_set(transition.validator_set.clone());
            Event::ApplyNewEpoch(ApplyNewEpochEvent {
                timestamp: clock.system_time(),
                epoch: transition.next_epoch,
                validator_set: transition.validator_set,
                kept_previous_set: transition.results.kept_previous_set,
            })
            .publish(&self.event_publisher);
        }

        if let Some(phase) = self.ceremony.on_new_height(block.height + 1) {
            Event::CeremonyPhaseChange(CeremonyPhaseChangeEvent {
                timestamp: clock.system_time(),
                epoch: self.ceremony.epoch(),
                phase,
            })
            .publish(&self.event_publisher);
        }

        self.head = block;
        Ok(())
    }

    /// The validator set that votes on, and certifies, the block at `height`.
    pub(crate) fn validator_set_of(&self, height: BlockHeight) -> Result<ValidatorSet, ChainStateError> {
        let epoch = self.ceremony.schedule().epoch_of(height);
        self.chain_state.validator_set(epoch)
    }

    pub(crate) fn head(&self) -> &Block {
        &self.head
    }

    pub(crate) fn chain_state(&self) -> &ChainState<K> {
        &self.chain_state
    }

    pub(crate) fn ceremony(&self) -> &ValidationCeremony {
        &self.ceremony
    }

    pub(crate) fn ceremony_mut(&mut self) -> &mut ValidationCeremony {
        &mut self.ceremony
    }
}

/// The ways committing a block can fail. Every variant is fatal to the algorithm thread, except a
/// [`ChainStateError::HeightAlreadyCommitted`], which means another path committed the height first.
#[derive(Debug)]
pub enum CommitError {
    ChainStateError(ChainStateError),
    CeremonyError(CeremonyError),
}

impl CommitError {
    /// Whether the height was already committed, which callers may treat as a no-op.
    pub fn is_already_committed(&self) -> bool {
        matches!(
            self,
            CommitError::ChainStateError(ChainStateError::HeightAlreadyCommitted { .. })
        )
    }
}

impl From<ChainStateError> for CommitError {
    fn from(value: ChainStateError) -> Self {
        CommitError::ChainStateError(value)
    }
}

impl From<CeremonyError> for CommitError {
    fn from(value: CeremonyError) -> Self {
        CommitError::CeremonyError(value)
    }
}
