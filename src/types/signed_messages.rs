/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`SignedMessage`] trait, implemented by every message whose authenticity the core checks.

use super::{
    crypto_primitives::{verify_signature, VerifyingKey},
    data_types::{SignatureBytes, VerifyingKeyBytes},
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against a `VerifyingKey`.
pub trait SignedMessage: Clone {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Get the bytes of the verifying key of the signer the message claims to be signed by.
    fn signer_bytes(&self) -> VerifyingKeyBytes;

    /// Get the verifying key of the claimed signer, if its bytes are a valid Ed25519 point.
    fn signer(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signer_bytes()).ok()
    }

    /// Verify that `signature_bytes` is a signature created by `verifying_key` over `message_bytes`.
    fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        verify_signature(verifying_key, &self.message_bytes(), &self.signature_bytes())
    }

    /// Verify that the message is correctly signed by the signer it claims.
    fn is_correctly_self_signed(&self) -> bool {
        match self.signer() {
            Some(signer) => self.is_correct(&signer),
            None => false,
        }
    }
}
