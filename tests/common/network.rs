/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    collections::{HashMap, HashSet},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use pop_consensus::{
    networking::{messages::Message, network::Network},
    types::{crypto_primitives::VerifyingKey, validator_set::ValidatorSet},
};

/// A mock network stub which passes messages from and to threads using channels.
///
/// Peers in the `disconnected` set neither send nor receive, which lets tests cut a replica off and
/// reconnect it later.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, Message)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
    disconnected: Arc<Mutex<HashSet<VerifyingKey>>>,
}

impl NetworkStub {
    fn is_cut_off(&self, peer: &VerifyingKey) -> bool {
        let disconnected = self.disconnected.lock().unwrap();
        disconnected.contains(&self.my_verifying_key) || disconnected.contains(peer)
    }
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn update_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        if self.is_cut_off(&peer) {
            return;
        }
        if let Some(inbox) = self.all_peers.get(&peer) {
            let _ = inbox.send((self.my_verifying_key, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (peer, inbox) in &self.all_peers {
            if *peer != self.my_verifying_key && !self.is_cut_off(peer) {
                let _ = inbox.send((self.my_verifying_key, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Handle to the set of peers that are cut off from the mock network.
#[derive(Clone)]
pub(crate) struct Partition(Arc<Mutex<HashSet<VerifyingKey>>>);

impl Partition {
    pub(crate) fn disconnect(&self, peer: VerifyingKey) {
        self.0.lock().unwrap().insert(peer);
    }

    pub(crate) fn reconnect(&self, peer: &VerifyingKey) {
        self.0.lock().unwrap().remove(peer);
    }
}

pub(crate) fn mock_network(
    peers: impl Iterator<Item = VerifyingKey>,
) -> (Vec<NetworkStub>, Partition) {
    let disconnected = Arc::new(Mutex::new(HashSet::new()));
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    let stubs = peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            disconnected: disconnected.clone(),
        })
        .collect();

    (stubs, Partition(disconnected))
}
