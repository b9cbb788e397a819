/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`CounterApp`], a simple implementation of [`App`] used by the integration tests.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use pop_consensus::{
    app::{
        App, ProduceBlockRequest, ProduceBlockResponse, ValidateBlockRequest, ValidateBlockResponse,
    },
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, Transaction},
        update_sets::AppStateUpdates,
    },
};

use super::mem_db::MemDB;

/// The key in the app state where the counter is stored.
pub(crate) const COUNTER_KEY: [u8; 1] = [0];

/// An app whose state is a single counter, and whose transactions are increments numbered from 1. A
/// block may only contain the increments that directly follow the committed counter, in order, and its
/// state root is the hash of the resulting counter.
///
/// Increments stay in the `tx_queue` after being proposed, so an increment proposed in a round that
/// fails is proposed again in a later one. Replicas of a test cluster share a single queue.
///
/// `produce_block` sleeps for 50 milliseconds, which keeps the block rate of a test cluster low enough to
/// read its logs.
pub(crate) struct CounterApp {
    tx_queue: Arc<Mutex<Vec<u64>>>,
}

impl CounterApp {
    pub(crate) fn new(tx_queue: Arc<Mutex<Vec<u64>>>) -> CounterApp {
        CounterApp { tx_queue }
    }

    fn increment(nonce: u64) -> Transaction {
        Transaction::new(nonce.to_le_bytes().to_vec())
    }

    pub(crate) fn initial_app_state() -> AppStateUpdates {
        let mut state = AppStateUpdates::new();
        state.insert(COUNTER_KEY.to_vec(), 0u64.to_le_bytes().to_vec());
        state
    }

    pub(crate) fn state_root(counter: u64) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(b"counter");
        hasher.update(counter.to_le_bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    pub(crate) fn decode_counter(bytes: Option<Vec<u8>>) -> Option<u64> {
        Some(u64::from_le_bytes(bytes?.try_into().ok()?))
    }

    /// Apply `transactions` on top of `counter`. Returns `None` if any transaction is malformed.
    fn execute(counter: u64, transactions: &[Transaction]) -> Option<(u64, Option<AppStateUpdates>)> {
        let mut next = counter;
        for transaction in transactions {
            let nonce = u64::from_le_bytes(transaction.bytes().as_slice().try_into().ok()?);
            if nonce != next + 1 {
                return None;
            }
            next = nonce;
        }

        let updates = if next != counter {
            let mut updates = AppStateUpdates::new();
            updates.insert(COUNTER_KEY.to_vec(), next.to_le_bytes().to_vec());
            Some(updates)
        } else {
            None
        };
        Some((next, updates))
    }
}

impl App<MemDB> for CounterApp {
    fn produce_block(&mut self, request: ProduceBlockRequest<MemDB>) -> ProduceBlockResponse {
        thread::sleep(Duration::from_millis(50));

        let counter = Self::decode_counter(request.app_state(&COUNTER_KEY)).unwrap();
        let mut pending: Vec<u64> = self
            .tx_queue
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|nonce| *nonce > counter)
            .collect();
        pending.sort_unstable();
        let transactions: Vec<Transaction> = pending
            .into_iter()
            .zip(counter + 1..)
            .take_while(|(nonce, expected)| nonce == expected)
            .map(|(nonce, _)| Self::increment(nonce))
            .collect();
        let (next, app_state_updates) = Self::execute(counter, &transactions).unwrap();

        ProduceBlockResponse {
            transactions,
            state_root: Self::state_root(next),
            app_state_updates,
        }
    }

    fn validate_block(&mut self, request: ValidateBlockRequest<MemDB>) -> ValidateBlockResponse {
        let Some(counter) = Self::decode_counter(request.app_state(&COUNTER_KEY)) else {
            return ValidateBlockResponse::Invalid;
        };
        let block = request.proposed_block();
        match Self::execute(counter, &block.transactions) {
            Some((next, app_state_updates)) if block.state_root == Self::state_root(next) => {
                ValidateBlockResponse::Valid { app_state_updates }
            }
            _ => ValidateBlockResponse::Invalid,
        }
    }
}
