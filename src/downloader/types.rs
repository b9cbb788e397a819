/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::time::Duration;

use crate::types::{crypto_primitives::VerifyingKey, data_types::BlockHeight};

/// What the [`Downloader`](super::implementation::Downloader) is doing.
///
/// `Idle → Probing → Fetching → Verifying → Applying → Idle`. `Verifying` and `Applying` only last for
/// the duration of a single call, so observers mostly see the other three.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Probing,
    Fetching,
    Verifying,
    Applying,
}

/// Why a batch of blocks received from a peer was rejected. Every rejection flags the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchRejection {
    /// The peer advertised a head above ours but sent no blocks.
    Empty,
    /// The batch does not start at the height that was requested.
    WrongStart,
    /// A block's parent hash is not the hash of the block before it.
    BrokenLinkage,
    /// Heights in the batch are not consecutive.
    NonContiguous,
    /// A block's hash does not match its contents.
    MalformedBlock,
    /// A block is not signed by its proposer.
    BadSignature,
    /// A block's commit certificate does not carry a quorum of valid precommits for it.
    InvalidCertificate,
    /// The app considers a block invalid.
    RejectedByApp,
    /// The response came from a peer we did not ask.
    UnexpectedPeer,
    /// The peer did not respond before the deadline.
    Timeout,
}

/// Tunables of the [`Downloader`](super::implementation::Downloader).
#[derive(Clone, Debug)]
pub struct DownloaderConfiguration {
    /// Maximum number of blocks requested at once.
    pub batch_size: u32,
    pub response_timeout: Duration,
    /// How often to broadcast a header request when no announcement arrives.
    pub probe_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// How long a peer that sent a bad batch is excluded from syncing.
    pub flag_duration: Duration,
}

impl Default for DownloaderConfiguration {
    fn default() -> Self {
        DownloaderConfiguration {
            batch_size: 32,
            response_timeout: Duration::from_secs(3),
            probe_interval: Duration::from_secs(5),
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(8),
            flag_duration: Duration::from_secs(60),
        }
    }
}

impl DownloaderConfiguration {
    /// Delay before the `attempts`-th retry: `min(backoff_base * 2^(attempts - 1), backoff_max)`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// A cloneable summary of the downloader's state, published on the status board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: SyncState,
    pub syncing: bool,
    pub peer: Option<VerifyingKey>,
    pub best_peer_height: Option<BlockHeight>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let config = DownloaderConfiguration {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(u32::MAX), Duration::from_millis(500));
    }
}
