/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use pop_consensus::{
    ceremony::types::CeremonySchedule,
    consensus::types::RoundTimeouts,
    events::{ApplyNewEpochEvent, CommitBlockEvent, EndSyncEvent, StartSyncEvent},
    replica::{Configuration, Replica, ReplicaSpec},
    status::NodeStatus,
    types::{
        block::Block,
        crypto_primitives::SigningKey,
        data_types::{BlockHeight, ChainID, EpochNumber, Timestamp, VerifyingKeyBytes},
        validator_set::ValidatorSet,
    },
};

use super::{
    counter_app::{CounterApp, COUNTER_KEY},
    logging::{first_seven_base64_chars, log_with_context},
    mem_db::MemDB,
    network::NetworkStub,
};

pub(crate) const CHAIN_ID: ChainID = ChainID::new(0);

/// The genesis block shared by every replica of a test cluster.
pub(crate) fn genesis() -> Block {
    Block::genesis(CounterApp::state_root(0), Timestamp::new(0))
}

/// Timeouts short enough for a test to recover from a failed round within a second or two.
pub(crate) fn test_timeouts() -> RoundTimeouts {
    RoundTimeouts {
        propose: Duration::from_millis(600),
        prevote: Duration::from_millis(300),
        precommit: Duration::from_millis(300),
        increment: Duration::from_millis(100),
    }
}

/// Poll `condition` every 100 milliseconds until it holds. Panics with `description` if it does not hold
/// within `timeout`.
pub(crate) fn wait_until(description: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    log_with_context(None, &format!("Waiting until {}.", description));
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() > deadline {
            panic!("Timed out waiting until {}", description);
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// What a node's event handlers saw, for the test to assert on.
#[derive(Default)]
pub(crate) struct Observations {
    pub(crate) synced_commits: u64,
    pub(crate) sync_sessions: u64,
    pub(crate) blocks_synced: u64,
    pub(crate) epochs: Vec<(EpochNumber, bool)>,
}

/// Things the nodes of a cluster have in common:
/// - Genesis block and initial validator set.
/// - Configuration, apart from the keypair.
/// - The queue of increments submitted to the cluster.
///
/// Things that they differ in:
/// - App instance.
/// - Network stub.
/// - KVStore.
/// - Keypair.
pub(crate) struct Node {
    verifying_key: VerifyingKeyBytes,
    kv_store: MemDB,
    observations: Arc<Mutex<Observations>>,
    replica: Replica<MemDB>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        tx_queue: Arc<Mutex<Vec<u64>>>,
        initial_validator_set: &ValidatorSet,
        ceremony_schedule: CeremonySchedule,
    ) -> Node {
        Self::with_store(
            keypair,
            network,
            tx_queue,
            initial_validator_set,
            ceremony_schedule,
            MemDB::new(),
        )
    }

    /// Start a node on `kv_store`. If the store was already initialized, the node resumes from the head
    /// persisted in it.
    pub(crate) fn with_store(
        keypair: SigningKey,
        network: NetworkStub,
        tx_queue: Arc<Mutex<Vec<u64>>>,
        initial_validator_set: &ValidatorSet,
        ceremony_schedule: CeremonySchedule,
        kv_store: MemDB,
    ) -> Node {
        Replica::initialize(
            kv_store.clone(),
            &genesis(),
            initial_validator_set,
            &CounterApp::initial_app_state(),
        )
        .unwrap();

        let verifying_key = keypair.verifying_key().to_bytes();
        let observations = Arc::new(Mutex::new(Observations::default()));

        let configuration = Configuration::builder()
            .me(keypair)
            .chain_id(CHAIN_ID)
            .round_timeouts(test_timeouts())
            .ceremony_schedule(ceremony_schedule)
            .sync_batch_size(8)
            .sync_response_timeout(Duration::from_secs(1))
            .sync_probe_interval(Duration::from_millis(500))
            .sync_backoff_base(Duration::from_millis(100))
            .sync_backoff_max(Duration::from_secs(1))
            .peer_flag_duration(Duration::from_secs(5))
            .advertise_interval(Duration::from_millis(500))
            .log_events(false)
            .build();

        let replica = ReplicaSpec::builder()
            .app(CounterApp::new(tx_queue))
            .network(network)
            .kv_store(kv_store.clone())
            .configuration(configuration)
            .on_commit_block(commit_block_handler(verifying_key, observations.clone()))
            .on_apply_new_epoch(apply_new_epoch_handler(verifying_key, observations.clone()))
            .on_start_sync(start_sync_handler(verifying_key, observations.clone()))
            .on_end_sync(end_sync_handler(verifying_key, observations.clone()))
            .build()
            .start()
            .unwrap();

        Node {
            verifying_key,
            kv_store,
            observations,
            replica,
        }
    }

    pub(crate) fn counter(&self) -> u64 {
        CounterApp::decode_counter(
            self.replica
                .chain_state_camera()
                .snapshot()
                .committed_app_state(&COUNTER_KEY),
        )
        .unwrap()
    }

    pub(crate) fn head(&self) -> Block {
        self.replica
            .chain_state_camera()
            .snapshot()
            .head_block()
            .unwrap()
    }

    pub(crate) fn block_at_height(&self, height: BlockHeight) -> Option<Block> {
        self.replica
            .chain_state_camera()
            .snapshot()
            .block_at_height(height)
            .unwrap()
    }

    pub(crate) fn validator_set(&self, epoch: EpochNumber) -> ValidatorSet {
        self.replica
            .chain_state_camera()
            .snapshot()
            .validator_set(epoch)
            .unwrap()
    }

    pub(crate) fn status(&self) -> NodeStatus {
        self.replica.status()
    }

    pub(crate) fn observations(&self) -> MutexGuard<'_, Observations> {
        self.observations.lock().unwrap()
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKeyBytes {
        self.verifying_key
    }

    /// Stop the replica's threads and hand back its store, so that the test can restart it.
    pub(crate) fn shut_down(self) -> MemDB {
        drop(self.replica);
        self.kv_store
    }
}

fn commit_block_handler(
    verifying_key: VerifyingKeyBytes,
    observations: Arc<Mutex<Observations>>,
) -> impl Fn(&CommitBlockEvent) + Send + 'static {
    move |commit_block_event| {
        if commit_block_event.synced {
            observations.lock().unwrap().synced_commits += 1;
        }
        log_with_context(
            Some(verifying_key),
            &format!(
                "Committed block, height: {}, hash: {}, synced: {}",
                commit_block_event.height,
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.synced
            ),
        );
    }
}

fn apply_new_epoch_handler(
    verifying_key: VerifyingKeyBytes,
    observations: Arc<Mutex<Observations>>,
) -> impl Fn(&ApplyNewEpochEvent) + Send + 'static {
    move |apply_new_epoch_event| {
        observations.lock().unwrap().epochs.push((
            apply_new_epoch_event.epoch,
            apply_new_epoch_event.kept_previous_set,
        ));
        log_with_context(
            Some(verifying_key),
            &format!(
                "Applied new epoch: {}, validators: {}, kept previous set: {}",
                apply_new_epoch_event.epoch,
                apply_new_epoch_event.validator_set.len(),
                apply_new_epoch_event.kept_previous_set
            ),
        );
    }
}

fn start_sync_handler(
    verifying_key: VerifyingKeyBytes,
    observations: Arc<Mutex<Observations>>,
) -> impl Fn(&StartSyncEvent) + Send + 'static {
    move |start_sync_event| {
        observations.lock().unwrap().sync_sessions += 1;
        log_with_context(
            Some(verifying_key),
            &format!(
                "Started syncing with {}, peer height: {}",
                first_seven_base64_chars(&start_sync_event.peer.to_bytes()),
                start_sync_event.peer_height
            ),
        );
    }
}

fn end_sync_handler(
    verifying_key: VerifyingKeyBytes,
    observations: Arc<Mutex<Observations>>,
) -> impl Fn(&EndSyncEvent) + Send + 'static {
    move |end_sync_event| {
        observations.lock().unwrap().blocks_synced += end_sync_event.blocks_synced;
        log_with_context(
            Some(verifying_key),
            &format!("Stopped syncing, blocks synced: {}", end_sync_event.blocks_synced),
        );
    }
}
