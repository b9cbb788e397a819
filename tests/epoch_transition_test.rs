/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::LevelFilter;
use rand_core::OsRng;

use pop_consensus::{
    ceremony::types::CeremonySchedule,
    types::{
        crypto_primitives::SigningKey,
        data_types::{BlockHeight, EpochNumber, Power},
        validator_set::ValidatorSet,
    },
};

mod common;

use common::{
    logging::setup_logger,
    network::mock_network,
    node::{wait_until, Node},
};

/// A schedule with 6-block epochs, so that a test cluster crosses a few epoch boundaries quickly.
fn short_schedule() -> CeremonySchedule {
    CeremonySchedule {
        epoch_length: 6,
        flip_submission_start: 1,
        short_session_start: 2,
        long_session_start: 3,
        aggregation_start: 5,
        ..CeremonySchedule::default()
    }
}

/// Runs a cluster through two epoch boundaries without anyone taking part in the validation ceremony,
/// and checks that every replica applies both epochs, keeping the validator set since nobody passed.
#[test]
fn epoch_transition_without_participants_keeps_validator_set() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let (network_stubs, _) = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));

    let mut initial_validator_set = ValidatorSet::new();
    for keypair in &keypairs {
        initial_validator_set.put(&keypair.verifying_key(), Power::new(1));
    }

    let schedule = short_schedule();
    assert!(schedule.is_valid());

    let tx_queue = Arc::new(Mutex::new(Vec::new()));
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(network_stubs)
        .map(|(keypair, network)| {
            Node::new(
                keypair,
                network,
                tx_queue.clone(),
                &initial_validator_set,
                schedule.clone(),
            )
        })
        .collect();

    // Heights 6 and 12 close epochs 0 and 1.
    wait_until(
        "every replica commits height 13",
        Duration::from_secs(120),
        || nodes.iter().all(|node| node.head().height >= BlockHeight::new(13)),
    );

    for node in &nodes {
        wait_until("the replica's handlers saw both epochs", Duration::from_secs(5), || {
            node.observations().epochs.len() >= 2
        });
        let epochs = node.observations().epochs.clone();
        assert_eq!(epochs[0], (EpochNumber::new(1), true));
        assert_eq!(epochs[1], (EpochNumber::new(2), true));

        assert_eq!(node.validator_set(EpochNumber::new(1)), initial_validator_set);
        assert_eq!(node.validator_set(EpochNumber::new(2)), initial_validator_set);

        wait_until("the status board shows epoch 2", Duration::from_secs(5), || {
            node.status().epoch >= EpochNumber::new(2)
        });
    }
}
