/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and initialize the storage of a replica.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [`ReplicaSpec`],
//! - The function to [start](ReplicaSpec::start) a [`Replica`] given its specification,
//! - The function to [initialize](Replica::initialize) the replica's chain state,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Validators and listeners
//!
//! Only the identities in the validator set of a height propose and vote at that height. Every other
//! replica, including identities that failed the last validation ceremony, follows consensus as a
//! listener: it collects the votes, commits the decided blocks, and catches up through its downloader
//! when it falls behind. Replicas move between the two roles automatically as epochs change.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .app(app)
//!     .network(network)
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.app(...)`
//! - `.network(...)`
//! - `.kv_store(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters register user-defined handlers for events from [`crate::events`]:
//! - `.on_commit_block(...)`
//! - `.on_apply_new_epoch(...)`
//! - `.on_propose(...)`
//! - `.on_vote(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_receive_vote(...)`
//! - `.on_start_round(...)`
//! - `.on_round_timeout(...)`
//! - `.on_start_sync(...)`
//! - `.on_end_sync(...)`
//! - `.on_reject_batch(...)`
//! - `.on_receive_block_request(...)`
//! - `.on_send_block_response(...)`
//! - `.on_ceremony_phase_change(...)`
//!
//! The replica's [configuration](Configuration) is also built with the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(keypair)
//!     .chain_id(ChainID::new(0))
//!     .round_timeouts(RoundTimeouts::default())
//!     .ceremony_schedule(CeremonySchedule::default())
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    algorithm::Algorithm,
    app::App,
    ceremony::{implementation::ValidationCeremony, types::CeremonySchedule},
    chain_state::{
        camera::ChainStateCamera,
        pluggables::KVStore,
        state::{ChainState, ChainStateError},
    },
    clock::SystemClock,
    commit::{CommitError, CommitPath},
    consensus::{
        implementation::{ConsensusConfiguration, ConsensusEngine, ConsensusError},
        types::RoundTimeouts,
    },
    downloader::{
        implementation::Downloader,
        server::{BlockServer, BlockServerConfiguration},
        types::DownloaderConfiguration,
    },
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    networking::{
        network::{Network, ValidatorSetUpdateHandle},
        receiving::{start_polling, ProgressMessageStub},
        sending::SenderHandle,
    },
    status::{NodeStatus, StatusBoard},
    types::{
        block::Block,
        crypto_primitives::{Keypair, SigningKey},
        data_types::ChainID,
        update_sets::AppStateUpdates,
        validator_set::ValidatorSet,
    },
};

/// Stores the user-defined parameters required to start the replica.
///
/// ## Chain ID
///
/// Each chain is identified by a [chain ID](ChainID), which is included in every message and certificate
/// so that messages meant for one chain are never mistaken for messages of another. Avoid operating a
/// validator on two chains with the same keypair and the same chain ID.
///
/// ## Ceremony schedule
///
/// Every replica of a chain must use the same [`CeremonySchedule`], otherwise replicas will disagree on
/// which ceremony transactions count and on the validator set of the next epoch.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.chain_id(...)`
    - `.log_events(...)`

    Optional:
    - `.round_timeouts(...)`
    - `.ceremony_schedule(...)`
    - `.max_ceremony_transactions(...)`
    - `.sync_batch_size(...)`
    - `.sync_response_timeout(...)`
    - `.sync_probe_interval(...)`
    - `.sync_backoff_base(...)`
    - `.sync_backoff_max(...)`
    - `.peer_flag_duration(...)`
    - `.advertise_interval(...)`
    - `.progress_msg_buffer_capacity(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the chain ID of the blockchain. Required."))]
    pub chain_id: ChainID,
    #[builder(default, setter(doc = "Set the base step timeouts and their per-round increment. Optional."))]
    pub round_timeouts: RoundTimeouts,
    #[builder(default, setter(doc = "Set the epoch length and the phase schedule of the validation ceremony. Optional."))]
    pub ceremony_schedule: CeremonySchedule,
    #[builder(default = 64, setter(doc = "Set the maximum number of ceremony transactions included in a proposed block. Optional."))]
    pub max_ceremony_transactions: usize,
    #[builder(default = 32, setter(doc = "Set the maximum number of blocks requested from, or served to, a peer at once. Optional."))]
    pub sync_batch_size: u32,
    #[builder(default = Duration::from_secs(3), setter(doc = "Set how long to wait for a block response. Optional."))]
    pub sync_response_timeout: Duration,
    #[builder(default = Duration::from_secs(5), setter(doc = "Set how often to ask peers for their heads. Optional."))]
    pub sync_probe_interval: Duration,
    #[builder(default = Duration::from_millis(250), setter(doc = "Set the delay before the first retry after a failed batch. Optional."))]
    pub sync_backoff_base: Duration,
    #[builder(default = Duration::from_secs(8), setter(doc = "Set the maximum delay between retries. Optional."))]
    pub sync_backoff_max: Duration,
    #[builder(default = Duration::from_secs(60), setter(doc = "Set how long a peer that sent a bad batch is excluded from syncing. Optional."))]
    pub peer_flag_duration: Duration,
    #[builder(default = Duration::from_secs(2), setter(doc = "Set how often the block server announces the local head. Optional."))]
    pub advertise_interval: Duration,
    #[builder(default = 1024, setter(doc = "Set the maximum number of consensus messages of future heights kept in the message buffer. Optional."))]
    pub progress_msg_buffer_capacity: usize,
    #[builder(setter(doc = "Enable the default event loggers? Required."))]
    pub log_events: bool,
}

struct ComponentConfigurations {
    consensus: ConsensusConfiguration,
    downloader: DownloaderConfiguration,
    block_server: BlockServerConfiguration,
}

impl From<&Configuration> for ComponentConfigurations {
    fn from(config: &Configuration) -> Self {
        ComponentConfigurations {
            consensus: ConsensusConfiguration {
                chain_id: config.chain_id,
                keypair: Keypair::new(config.me.clone()),
                timeouts: config.round_timeouts.clone(),
                max_ceremony_transactions: config.max_ceremony_transactions,
            },
            downloader: DownloaderConfiguration {
                batch_size: config.sync_batch_size,
                response_timeout: config.sync_response_timeout,
                probe_interval: config.sync_probe_interval,
                backoff_base: config.sync_backoff_base,
                backoff_max: config.sync_backoff_max,
                flag_duration: config.peer_flag_duration,
            },
            block_server: BlockServerConfiguration {
                chain_id: config.chain_id,
                batch_size: config.sync_batch_size,
                advertise_interval: config.advertise_interval,
                poll_interval: Duration::from_millis(50),
            },
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run the [`Replica`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.app(...)`
    - `.network(...)`
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_commit_block(...)`
    - `.on_apply_new_epoch(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_start_round(...)`
    - `.on_round_timeout(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_reject_batch(...)`
    - `.on_receive_block_request(...)`
    - `.on_send_block_response(...)`
    - `.on_ceremony_phase_change(...)`
"))]
pub struct ReplicaSpec<K: KVStore, A: App<K> + 'static, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the application code to be run on the blockchain. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the implementation of the replica's key-value store. The argument must implement the [KVStore](crate::chain_state::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyNewEpochEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyNewEpochEvent>),
    doc = "Register a handler closure to be invoked after a new epoch's validator set is applied. Optional."))]
    on_apply_new_epoch: Option<HandlerPtr<ApplyNewEpochEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica starts a round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after a step of the current round times out. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica starts catching up with a peer. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica stops syncing. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBatchEvent>),
    doc = "Register a handler closure to be invoked after the replica rejects a batch of blocks from a peer. Optional."))]
    on_reject_batch: Option<HandlerPtr<RejectBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBlockRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBlockRequestEvent>),
    doc = "Register a handler closure to be invoked after the block server receives a block request. Optional."))]
    on_receive_block_request: Option<HandlerPtr<ReceiveBlockRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendBlockResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendBlockResponseEvent>),
    doc = "Register a handler closure to be invoked after the block server sends a block response. Optional."))]
    on_send_block_response: Option<HandlerPtr<SendBlockResponseEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CeremonyPhaseChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CeremonyPhaseChangeEvent>),
    doc = "Register a handler closure to be invoked after the validation ceremony enters a new phase. Optional."))]
    on_ceremony_phase_change: Option<HandlerPtr<CeremonyPhaseChangeEvent>>,
}

impl<K: KVStore, A: App<K> + 'static, N: Network + 'static> ReplicaSpec<K, A, N> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to them
    /// in a [`Replica`] struct.
    ///
    /// Fails if the chain state has not been [initialized](Replica::initialize), or cannot be read.
    pub fn start(mut self) -> Result<Replica<K>, ReplicaError> {
        let chain_id = self.configuration.chain_id;
        let configs = ComponentConfigurations::from(&self.configuration);
        let event_handlers = self.event_handlers();

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        // The commit path replays the current epoch into the ceremony before anything else runs.
        let chain_state = ChainState::new(self.kv_store.clone());
        let ceremony = ValidationCeremony::new(chain_id, self.configuration.ceremony_schedule.clone());
        let path = CommitPath::new(
            chain_state,
            ceremony,
            ValidatorSetUpdateHandle::new(self.network.clone()),
            event_publisher.clone(),
        )?;
        self.network
            .init_validator_set(path.validator_set_of(path.head().height + 1)?);

        let clock = SystemClock;
        let status = StatusBoard::new(path.head().height, path.head().hash);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, progress_msgs, server_requests) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let (block_server_shutdown, block_server_shutdown_receiver) = mpsc::channel();
        let block_server = BlockServer::new(
            configs.block_server,
            ChainStateCamera::new(self.kv_store.clone()),
            server_requests,
            self.network.clone(),
            block_server_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let engine = ConsensusEngine::new(
            configs.consensus,
            &path,
            &clock,
            SenderHandle::new(self.network.clone()),
            event_publisher.clone(),
        )?;
        let downloader = Downloader::new(
            chain_id,
            configs.downloader,
            SenderHandle::new(self.network.clone()),
            &clock,
            event_publisher,
        );

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = Algorithm::new(
            chain_id,
            self.app,
            path,
            engine,
            downloader,
            ProgressMessageStub::new(progress_msgs, self.configuration.progress_msg_buffer_capacity),
            status.clone(),
            clock,
            algorithm_shutdown_receiver,
        )
        .start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Replica {
            chain_state_camera: ChainStateCamera::new(self.kv_store),
            status,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            block_server: Some(block_server),
            block_server_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }

    fn event_handlers(&mut self) -> EventHandlers {
        let mut handlers = EventHandlers {
            commit_block_handlers: self.on_commit_block.take().into_iter().collect(),
            apply_new_epoch_handlers: self.on_apply_new_epoch.take().into_iter().collect(),
            propose_handlers: self.on_propose.take().into_iter().collect(),
            vote_handlers: self.on_vote.take().into_iter().collect(),
            receive_proposal_handlers: self.on_receive_proposal.take().into_iter().collect(),
            receive_vote_handlers: self.on_receive_vote.take().into_iter().collect(),
            start_round_handlers: self.on_start_round.take().into_iter().collect(),
            round_timeout_handlers: self.on_round_timeout.take().into_iter().collect(),
            start_sync_handlers: self.on_start_sync.take().into_iter().collect(),
            end_sync_handlers: self.on_end_sync.take().into_iter().collect(),
            reject_batch_handlers: self.on_reject_batch.take().into_iter().collect(),
            receive_block_request_handlers: self
                .on_receive_block_request
                .take()
                .into_iter()
                .collect(),
            send_block_response_handlers: self.on_send_block_response.take().into_iter().collect(),
            ceremony_phase_change_handlers: self
                .on_ceremony_phase_change
                .take()
                .into_iter()
                .collect(),
        };
        if self.configuration.log_events {
            handlers.add_default_loggers();
        }
        handlers
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<K: KVStore> {
    chain_state_camera: ChainStateCamera<K>,
    status: StatusBoard,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    block_server: Option<JoinHandle<()>>,
    block_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore> Replica<K> {
    /// Write the genesis block, the validator set of epoch 0 and the initial app state into `kv_store`.
    /// Does nothing if the store was already initialized, so a restarted replica resumes from its
    /// persisted head.
    pub fn initialize(
        mut kv_store: K,
        genesis: &Block,
        initial_validator_set: &ValidatorSet,
        initial_app_state: &AppStateUpdates,
    ) -> Result<(), ChainStateError> {
        ChainState::initialize(&mut kv_store, genesis, initial_validator_set, initial_app_state)
    }

    /// Returns a [`ChainStateCamera`] which can be used to read the committed chain state.
    pub fn chain_state_camera(&self) -> &ChainStateCamera<K> {
        &self.chain_state_camera
    }

    /// Returns the latest status published by the algorithm thread.
    pub fn status(&self) -> NodeStatus {
        self.status.get()
    }
}

impl<K: KVStore> Drop for Replica<K> {
    fn drop(&mut self) {
        // The order matters: the algorithm and block server threads receive messages from the poller, and
        // assume that it outlives them.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.algorithm_shutdown.send(());
        if let Some(algorithm) = self.algorithm.take() {
            let _ = algorithm.join();
        }

        let _ = self.block_server_shutdown.send(());
        if let Some(block_server) = self.block_server.take() {
            let _ = block_server.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}

/// The ways [`ReplicaSpec::start`] can fail.
#[derive(Debug)]
pub enum ReplicaError {
    ChainStateError(ChainStateError),
    CommitError(CommitError),
    ConsensusError(ConsensusError),
}

impl From<ChainStateError> for ReplicaError {
    fn from(value: ChainStateError) -> Self {
        ReplicaError::ChainStateError(value)
    }
}

impl From<CommitError> for ReplicaError {
    fn from(value: CommitError) -> Self {
        ReplicaError::CommitError(value)
    }
}

impl From<ConsensusError> for ReplicaError {
    fn from(value: ConsensusError) -> Self {
        ReplicaError::ConsensusError(value)
    }
}
