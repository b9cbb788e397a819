/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about validator sets.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{collections::HashMap, slice};

use super::data_types::{Power, TotalPower, VerifyingKeyBytes};

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

/// Stores the identities of validators and their voting powers.
///
/// A validator set is derived from the shared chain state at every epoch boundary and is immutable
/// for the duration of an epoch.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their
/// `VerifyingKey`s, and avails the methods [`validators`](ValidatorSet::validators),
/// [`validators_and_powers`](ValidatorSet::validators_and_powers), and
/// [`position`](ValidatorSet::position) that users can use to get them in this order.
///
/// ## Limits to total power
///
/// Users must make sure that the total power of the validator set does not exceed `u128::MAX/2`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorSet {
    // The verifying keys of validators are included here in ascending order.
    validators: Vec<VerifyingKey>,
    powers: HashMap<VerifyingKey, Power>,
}

impl Default for ValidatorSet {
    // Create an empty validator set.
    fn default() -> Self {
        ValidatorSet::new()
    }
}

impl ValidatorSet {
    /// Create an empty validator set.
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
            powers: HashMap::new(),
        }
    }

    /// Put a `validator` with the specified `power` into the validator set, placing them in a position that
    /// preserves the [ordering of validators](Self#ordering-of-validators).
    ///
    /// If `validator` already exists in the validator set, this function updates its power instead.
    pub fn put(&mut self, validator: &VerifyingKey, power: Power) {
        if !self.contains(validator) {
            let validator_bytes = validator.to_bytes();
            if let Err(insert_pos) = self
                .validators
                .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            {
                self.validators.insert(insert_pos, *validator);
            }
        }

        self.powers.insert(*validator, power);
    }

    /// Remove `validator` from the validator set, if it actually is in the validator set.
    pub fn remove(&mut self, validator: &VerifyingKey) -> Option<(VerifyingKey, Power)> {
        let validator_bytes = validator.to_bytes();
        if let Ok(pos) = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            self.validators.remove(pos);
            self.powers.remove_entry(validator)
        } else {
            None
        }
    }

    /// Get the power of the specified `validator` inside the validator set.
    pub fn power(&self, validator: &VerifyingKey) -> Option<&Power> {
        self.powers.get(validator)
    }

    /// Get the sum of the powers of all of the validators inside the validator set.
    pub fn total_power(&self) -> TotalPower {
        let mut total_power = TotalPower::new(0);
        for power in self.powers.values() {
            total_power += *power
        }
        total_power
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.powers.contains_key(validator)
    }

    /// Get an iterator through validators' verifying keys which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get a vector containing each validator and its power, in ascending order of the validators' verifying keys.
    pub fn validators_and_powers(&self) -> Vec<(VerifyingKey, Power)> {
        self.validators
            .iter()
            .filter_map(|v| self.powers.get(v).map(|power| (*v, *power)))
            .collect()
    }

    /// Get the number of validators currently in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the index of the given `validator` in the [sorted order](Self#ordering-of-validators) of
    /// `VerifyingKey`s in the validator set, if it is actually in the validator set.
    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        let validator_bytes = validator.to_bytes();
        self.validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
            .ok()
    }

    /// Compute the total power that a tally must match or exceed (`>=`) in order to count as a quorum
    /// under the validator set, i.e., strictly more than two thirds of the total power.
    pub fn quorum(&self) -> TotalPower {
        quorum_threshold(self.total_power())
    }

    /// Check whether `power` is a quorum of this validator set.
    pub fn is_quorum(&self, power: TotalPower) -> bool {
        is_quorum(power, self.total_power())
    }
}

/// The smallest power that is strictly greater than two thirds of `total_power`.
///
/// Saturates instead of overflowing when `total_power` exceeds `u128::MAX/2`.
pub fn quorum_threshold(total_power: TotalPower) -> TotalPower {
    TotalPower::new(total_power.int().saturating_mul(2) / 3 + 1)
}

/// Check whether `power` is a quorum out of `total_power`.
pub fn is_quorum(power: TotalPower, total_power: TotalPower) -> bool {
    power >= quorum_threshold(total_power)
}

/// Intermediate representation of [`ValidatorSet`] for safe serialization and deserialization.
///
/// To serialize an instance of `ValidatorSet`, convert it a `ValidatorSetBytes` using the former type's
/// implementation of `From<&ValidatorSet>`, then, serialize the `ValidatorSetBytes` using Borsh.
/// Reverse the steps to deserialize a `ValidatorSet`.
///
/// Instances of this type are not guaranteed to contain valid Ed25519 verifying keys, and therefore
/// conversion from this type into `ValidatorSet` using `TryFrom` is fallible.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSetBytes {
    // In ascending order of verifying key bytes.
    validators_and_powers: Vec<(VerifyingKeyBytes, Power)>,
}

impl TryFrom<ValidatorSetBytes> for ValidatorSet {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: ValidatorSetBytes) -> Result<Self, Self::Error> {
        let mut validator_set = ValidatorSet::new();
        for (verifying_key_bytes, power) in value.validators_and_powers {
            let verifying_key = VerifyingKey::from_bytes(&verifying_key_bytes)?;
            validator_set.put(&verifying_key, power);
        }
        Ok(validator_set)
    }
}

impl From<&ValidatorSet> for ValidatorSetBytes {
    fn from(value: &ValidatorSet) -> Self {
        ValidatorSetBytes {
            validators_and_powers: value
                .validators_and_powers()
                .into_iter()
                .map(|(validator, power)| (validator.to_bytes(), power))
                .collect(),
        }
    }
}
