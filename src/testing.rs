/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory stand-ins for the pluggable traits, shared by the unit tests of the algorithm thread's
//! components.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use rand_core::OsRng;

use crate::{
    app::{App, ProduceBlockRequest, ProduceBlockResponse, ValidateBlockRequest, ValidateBlockResponse},
    ceremony::{implementation::ValidationCeremony, types::CeremonySchedule},
    chain_state::{
        pluggables::{KVGet, KVStore, WriteBatch},
        state::ChainState,
    },
    clock::Clock,
    commit::CommitPath,
    consensus::messages::{CommitCertificate, Vote, VoteStep},
    downloader::messages::{CertifiedBlock, SyncMessage},
    networking::{
        messages::Message,
        network::{Network, ValidatorSetUpdateHandle},
    },
    types::{
        block::{Block, BlockContents},
        crypto_primitives::{Keypair, SigningKey, VerifyingKey},
        data_types::{ChainID, CryptoHash, Power, RoundNumber, SignatureBytes, Timestamp},
        update_sets::AppStateUpdates,
        validator_set::ValidatorSet,
    },
};

pub(crate) const CHAIN_ID: ChainID = ChainID::new(0);

#[derive(Clone, Default)]
pub(crate) struct MemStore(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl KVGet for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }
}

impl KVStore for MemStore {
    type WriteBatch = MemBatch;
    type Snapshot<'a> = MemStore;

    fn write(&mut self, wb: MemBatch) {
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.0 {
            match value {
                Some(value) => map.insert(key, value),
                None => map.remove(&key),
            };
        }
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().clear();
    }

    fn snapshot<'b>(&'b self) -> MemStore {
        self.clone()
    }
}

#[derive(Default)]
pub(crate) struct MemBatch(Vec<(Vec<u8>, Option<Vec<u8>>)>);

impl WriteBatch for MemBatch {
    fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.0.push((key.to_vec(), None));
    }
}

/// Records every message handed to it, and never receives anything.
#[derive(Clone, Default)]
pub(crate) struct RecordingNetwork {
    /// `(None, msg)` for broadcasts, `(Some(peer), msg)` for direct sends.
    sent: Arc<Mutex<Vec<(Option<VerifyingKey>, Message)>>>,
}

impl RecordingNetwork {
    /// Peers that were sent a block request, in order.
    pub(crate) fn block_requests(&self) -> Vec<VerifyingKey> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(peer, msg)| match (peer, msg) {
                (Some(peer), Message::SyncMessage(SyncMessage::BlockRequest(_))) => Some(*peer),
                _ => None,
            })
            .collect()
    }
}

impl Network for RecordingNetwork {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn broadcast(&mut self, message: Message) {
        self.sent.lock().unwrap().push((None, message));
    }

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        self.sent.lock().unwrap().push((Some(peer), message));
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        None
    }
}

pub(crate) struct ManualClock(pub(crate) Instant);

impl ManualClock {
    pub(crate) fn new() -> Self {
        ManualClock(Instant::now())
    }

    pub(crate) fn advance(&mut self, by: Duration) {
        self.0 += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1)
    }
}

/// Produces empty blocks and accepts every block.
pub(crate) struct AcceptAll;

impl<K: KVStore> App<K> for AcceptAll {
    fn produce_block(&mut self, _: ProduceBlockRequest<K>) -> ProduceBlockResponse {
        ProduceBlockResponse {
            transactions: Vec::new(),
            state_root: CryptoHash::zero(),
            app_state_updates: None,
        }
    }

    fn validate_block(&mut self, _: ValidateBlockRequest<K>) -> ValidateBlockResponse {
        ValidateBlockResponse::Valid {
            app_state_updates: None,
        }
    }
}

pub(crate) fn keypairs(n: usize) -> Vec<Keypair> {
    (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
        .collect()
}

pub(crate) fn validator_set_of(keypairs: &[Keypair]) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for keypair in keypairs {
        validator_set.put(&keypair.public(), Power::new(1));
    }
    validator_set
}

pub(crate) fn genesis() -> Block {
    Block::genesis(CryptoHash::zero(), Timestamp::new(0))
}

/// A commit path over a fresh in-memory store, initialized with `genesis()` and `validator_set`.
pub(crate) fn commit_path<N: Network>(
    validator_set: &ValidatorSet,
    network: N,
) -> CommitPath<MemStore, N> {
    let mut kv_store = MemStore::default();
    ChainState::initialize(&mut kv_store, &genesis(), validator_set, &AppStateUpdates::new()).unwrap();
    CommitPath::new(
        ChainState::new(kv_store),
        ValidationCeremony::new(CHAIN_ID, CeremonySchedule::default()),
        ValidatorSetUpdateHandle::new(network),
        None,
    )
    .unwrap()
}

/// A block on top of `parent`, proposed by `proposer` and certified by the precommits of `voters`.
pub(crate) fn certified_child(proposer: &Keypair, voters: &[Keypair], parent: &Block) -> CertifiedBlock {
    certified_child_with_root(proposer, voters, parent, CryptoHash::zero())
}

/// Like [`certified_child`], with a chosen state root so that siblings get distinct hashes.
pub(crate) fn certified_child_with_root(
    proposer: &Keypair,
    voters: &[Keypair],
    parent: &Block,
    state_root: CryptoHash,
) -> CertifiedBlock {
    let block = Block::new(
        proposer,
        BlockContents {
            height: parent.height + 1,
            parent_hash: parent.hash,
            state_root,
            timestamp: Timestamp::new(1),
            eligibility_proof: SignatureBytes::zero(),
            transactions: Vec::new(),
            ceremony_transactions: Vec::new(),
        },
    );
    let certificate = certificate_for(voters, &block);
    CertifiedBlock { block, certificate }
}

pub(crate) fn certificate_for(voters: &[Keypair], block: &Block) -> CommitCertificate {
    CommitCertificate {
        chain_id: CHAIN_ID,
        height: block.height,
        round: RoundNumber::init(),
        block: block.hash,
        precommits: voters
            .iter()
            .map(|voter| {
                Vote::new(
                    voter,
                    CHAIN_ID,
                    block.height,
                    RoundNumber::init(),
                    VoteStep::Precommit,
                    Some(block.hash),
                )
            })
            .collect(),
    }
}

/// `len` certified blocks extending `head`.
pub(crate) fn certified_chain(validators: &[Keypair], head: &Block, len: usize) -> Vec<CertifiedBlock> {
    let mut blocks: Vec<CertifiedBlock> = Vec::new();
    for _ in 0..len {
        let parent = blocks.last().map(|certified| &certified.block).unwrap_or(head);
        let child = certified_child(&validators[0], validators, parent);
        blocks.push(child);
    }
    blocks
}
