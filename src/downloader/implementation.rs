/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain downloader, which brings a lagging replica up to the head of its peers.
//!
//! ## Probing
//!
//! Peers advertise their head in [`HeaderAnnouncement`]s, either periodically or in answer to a
//! [`HeaderRequest`]. The downloader broadcasts a header request every `probe_interval`, and reconsiders
//! syncing whenever an announcement arrives.
//!
//! ## Fetching, verifying and applying
//!
//! When a peer advertises a heavier chain (by weight, then height) the downloader asks it for a batch of
//! blocks starting right above the local head. A batch is verified in full before anything is applied:
//! heights must be consecutive, the first block must extend the local head, every block must link to
//! the one before it, and every block must be well formed and signed by its proposer. Commit certificates
//! of blocks in the epoch of the first block are checked against that epoch's validator set at the same
//! time. Blocks past the epoch's boundary are certified by a validator set that only exists once the
//! boundary is committed, so their certificates are checked while applying. The app then validates each
//! block, and the block goes through the [`CommitPath`].
//!
//! ## Failures
//!
//! A rejected batch or a timed out request flags the peer, which is then excluded for `flag_duration`.
//! The next attempt, against another peer, is delayed by an exponential backoff.

use std::{
    collections::HashMap,
    sync::mpsc::Sender,
    time::Instant,
};

use rand::seq::SliceRandom;

use crate::{
    app::{App, ValidateBlockRequest, ValidateBlockResponse},
    chain_state::{pluggables::KVStore, state::ChainStateError},
    clock::Clock,
    commit::{CommitError, CommitPath},
    events::{EndSyncEvent, Event, RejectBatchEvent, StartSyncEvent},
    networking::{network::Network, sending::SenderHandle},
    types::{
        block::Block,
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, ChainID, ChainWeight},
        validator_set::ValidatorSet,
    },
};

use super::{
    messages::{BlockRequest, BlockResponse, CertifiedBlock, HeaderAnnouncement, HeaderRequest},
    types::{BatchRejection, DownloaderConfiguration, SyncState, SyncStatus},
};

pub(crate) struct Downloader<N: Network> {
    chain_id: ChainID,
    config: DownloaderConfiguration,
    sender_handle: SenderHandle<N>,
    state: SyncState,
    // Latest head advertised by each peer.
    peer_heads: HashMap<VerifyingKey, (BlockHeight, ChainWeight)>,
    // Peers excluded from syncing, and until when.
    flagged: HashMap<VerifyingKey, Instant>,
    request: Option<PendingRequest>,
    session: Option<SyncSession>,
    next_probe: Instant,
    retry_at: Option<Instant>,
    attempts: u32,
    event_publisher: Option<Sender<Event>>,
}

struct PendingRequest {
    peer: VerifyingKey,
    from_height: BlockHeight,
    deadline: Instant,
}

struct SyncSession {
    blocks_synced: u64,
}

impl<N: Network> Downloader<N> {
    pub(crate) fn new(
        chain_id: ChainID,
        config: DownloaderConfiguration,
        sender_handle: SenderHandle<N>,
        clock: &impl Clock,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            chain_id,
            config,
            sender_handle,
            state: SyncState::Idle,
            peer_heads: HashMap::new(),
            flagged: HashMap::new(),
            request: None,
            session: None,
            next_probe: clock.now(),
            retry_at: None,
            attempts: 0,
            event_publisher,
        }
    }

    /// Whether the downloader is in the middle of catching up. While it is, the consensus engine does
    /// not advance rounds.
    pub(crate) fn is_syncing(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state,
            syncing: self.is_syncing(),
            peer: self.request.as_ref().map(|request| request.peer),
            best_peer_height: self.peer_heads.values().map(|(height, _)| *height).max(),
        }
    }

    /// Record the head advertised by `origin`, and start fetching from the best peer if it is ahead.
    pub(crate) fn on_header_announcement(
        &mut self,
        origin: &VerifyingKey,
        announcement: HeaderAnnouncement,
        head: &Block,
        clock: &impl Clock,
    ) {
        if announcement.chain_id != self.chain_id {
            return;
        }
        self.peer_heads
            .insert(*origin, (announcement.height, announcement.weight));
        if self.state == SyncState::Probing {
            self.state = SyncState::Idle;
        }
        self.try_fetch(head, clock);
    }

    /// Fire the deadlines of the downloader: the response timeout of the pending request, the periodic
    /// probe, and the end of a backoff.
    pub(crate) fn tick(&mut self, head: &Block, clock: &impl Clock) {
        let now = clock.now();

        if let Some(request) = &self.request {
            if now >= request.deadline {
                let peer = request.peer;
                self.reject(peer, BatchRejection::Timeout, clock);
            }
        }

        if now >= self.next_probe {
            self.sender_handle.broadcast(HeaderRequest {
                chain_id: self.chain_id,
            });
            self.next_probe = now + self.config.probe_interval;
            if self.state == SyncState::Idle {
                self.state = SyncState::Probing;
            }
        }

        self.try_fetch(head, clock);
    }

    /// Verify and apply a batch of blocks. Returns how many blocks were committed.
    ///
    /// A rejected batch is not an error: the peer is flagged and nothing is committed, except for blocks
    /// before a bad certificate or app verdict past an epoch boundary. Only failures of the chain state
    /// are returned as errors.
    pub(crate) fn on_block_response<K: KVStore>(
        &mut self,
        origin: &VerifyingKey,
        response: BlockResponse,
        path: &mut CommitPath<K, N>,
        app: &mut impl App<K>,
        clock: &impl Clock,
    ) -> Result<u64, DownloaderError> {
        let Some(request) = &self.request else {
            log::debug!("Ignoring unrequested block response from {:?}", origin);
            return Ok(0);
        };
        if &request.peer != origin {
            self.publish_rejection(*origin, BatchRejection::UnexpectedPeer, clock);
            return Ok(0);
        }
        if response.chain_id != self.chain_id || response.from_height != request.from_height {
            self.reject(*origin, BatchRejection::WrongStart, clock);
            return Ok(0);
        }
        self.request = None;

        // The engine may have committed some of the requested heights in the meantime.
        let head_height = path.head().height;
        let blocks: Vec<CertifiedBlock> = response
            .blocks
            .into_iter()
            .filter(|certified| certified.block.height > head_height)
            .collect();
        if blocks.is_empty() && response.from_height <= head_height {
            self.state = SyncState::Idle;
            self.try_fetch(&path.head().clone(), clock);
            return Ok(0);
        }

        self.state = SyncState::Verifying;
        let first_height = head_height + 1;
        let schedule = path.ceremony().schedule();
        let epoch_end = schedule.last_height_of(schedule.epoch_of(first_height));
        let epoch_validators = path.validator_set_of(first_height)?;
        if let Err(rejection) =
            verify_batch(self.chain_id, path.head(), &blocks, &epoch_validators, epoch_end)
        {
            self.reject(*origin, rejection, clock);
            return Ok(0);
        }

        self.state = SyncState::Applying;
        let mut applied = 0;
        for CertifiedBlock { block, certificate } in blocks {
            if block.height > epoch_end {
                let validator_set = path.validator_set_of(block.height)?;
                if !certificate.is_valid_for(self.chain_id, block.height, &block.hash, &validator_set) {
                    self.reject(*origin, BatchRejection::InvalidCertificate, clock);
                    self.add_synced(applied);
                    return Ok(applied);
                }
            }

            let validate_block_request =
                ValidateBlockRequest::new(&block, path.chain_state().snapshot());
            let app_state_updates = match app.validate_block(validate_block_request) {
                ValidateBlockResponse::Valid { app_state_updates } => app_state_updates,
                ValidateBlockResponse::Invalid => {
                    self.reject(*origin, BatchRejection::RejectedByApp, clock);
                    self.add_synced(applied);
                    return Ok(applied);
                }
            };

            match path.commit(block, certificate, app_state_updates, true, clock) {
                Ok(()) => applied += 1,
                Err(err) if err.is_already_committed() => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.attempts = 0;
        self.retry_at = None;
        self.state = SyncState::Idle;
        self.add_synced(applied);
        self.try_fetch(&path.head().clone(), clock);
        Ok(applied)
    }

    /// If no request is pending and no backoff is running, request the next batch from the best peer
    /// that is ahead of `head`. Ends the sync session if no peer is ahead.
    fn try_fetch(&mut self, head: &Block, clock: &impl Clock) {
        let now = clock.now();
        if self.request.is_some() || self.retry_at.is_some_and(|retry_at| now < retry_at) {
            return;
        }
        self.flagged.retain(|_, until| *until > now);

        let Some((peer, peer_height)) = self.best_peer(head) else {
            if let Some(session) = self.session.take() {
                Event::EndSync(EndSyncEvent {
                    timestamp: clock.system_time(),
                    blocks_synced: session.blocks_synced,
                })
                .publish(&self.event_publisher);
            }
            self.attempts = 0;
            self.retry_at = None;
            return;
        };

        if self.session.is_none() {
            self.session = Some(SyncSession { blocks_synced: 0 });
            Event::StartSync(StartSyncEvent {
                timestamp: clock.system_time(),
                peer,
                peer_height,
            })
            .publish(&self.event_publisher);
        }

        let from_height = head.height + 1;
        self.sender_handle.send(
            peer,
            BlockRequest {
                chain_id: self.chain_id,
                from_height,
                count: self.config.batch_size,
            },
        );
        self.request = Some(PendingRequest {
            peer,
            from_height,
            deadline: now + self.config.response_timeout,
        });
        self.state = SyncState::Fetching;
    }

    /// The unflagged peer with the heaviest chain (then the highest head) above `head`. Ties are broken
    /// at random.
    fn best_peer(&self, head: &Block) -> Option<(VerifyingKey, BlockHeight)> {
        let local = (ChainWeight::of_height(head.height), head.height);
        let candidates: Vec<(VerifyingKey, BlockHeight, ChainWeight)> = self
            .peer_heads
            .iter()
            .filter(|(peer, _)| !self.flagged.contains_key(*peer))
            .filter(|(_, (height, weight))| (*weight, *height) > local)
            .map(|(peer, (height, weight))| (*peer, *height, *weight))
            .collect();

        let best = candidates
            .iter()
            .map(|(_, height, weight)| (*weight, *height))
            .max()?;
        let best_peers: Vec<&(VerifyingKey, BlockHeight, ChainWeight)> = candidates
            .iter()
            .filter(|(_, height, weight)| (*weight, *height) == best)
            .collect();
        best_peers
            .choose(&mut rand::thread_rng())
            .map(|(peer, height, _)| (*peer, *height))
    }

    fn reject(&mut self, peer: VerifyingKey, rejection: BatchRejection, clock: &impl Clock) {
        let now = clock.now();
        log::warn!("Rejecting batch from {:?}: {:?}", peer, rejection);
        self.publish_rejection(peer, rejection, clock);

        self.flagged.insert(peer, now + self.config.flag_duration);
        self.request = None;
        self.attempts = self.attempts.saturating_add(1);
        self.retry_at = Some(now + self.config.backoff(self.attempts));
        self.state = SyncState::Idle;
    }

    fn publish_rejection(&self, peer: VerifyingKey, reason: BatchRejection, clock: &impl Clock) {
        Event::RejectBatch(RejectBatchEvent {
            timestamp: clock.system_time(),
            peer,
            reason,
        })
        .publish(&self.event_publisher);
    }

    fn add_synced(&mut self, blocks: u64) {
        if let Some(session) = &mut self.session {
            session.blocks_synced += blocks;
        }
    }
}

/// Check that `blocks` form a chain extending `head`, and that every block is well formed and signed.
///
/// The commit certificates of blocks up to `epoch_end` must carry a quorum of `validator_set`. Later
/// blocks only need a certificate that names them.
pub(crate) fn verify_batch(
    chain_id: ChainID,
    head: &Block,
    blocks: &[CertifiedBlock],
    validator_set: &ValidatorSet,
    epoch_end: BlockHeight,
) -> Result<(), BatchRejection> {
    let Some(first) = blocks.first() else {
        return Err(BatchRejection::Empty);
    };
    if first.block.height != head.height + 1 {
        return Err(BatchRejection::WrongStart);
    }

    let mut parent = head;
    for CertifiedBlock { block, certificate } in blocks {
        if block.height != parent.height + 1 {
            return Err(BatchRejection::NonContiguous);
        }
        if block.parent_hash != parent.hash {
            return Err(BatchRejection::BrokenLinkage);
        }
        if !block.is_well_formed() {
            return Err(BatchRejection::MalformedBlock);
        }
        if !block.is_correctly_signed() {
            return Err(BatchRejection::BadSignature);
        }
        if certificate.block != block.hash || certificate.height != block.height {
            return Err(BatchRejection::InvalidCertificate);
        }
        if block.height <= epoch_end
            && !certificate.is_valid_for(chain_id, block.height, &block.hash, validator_set)
        {
            return Err(BatchRejection::InvalidCertificate);
        }
        parent = block;
    }
    Ok(())
}

/// The ways the downloader can fail. Both are fatal to the algorithm thread.
#[derive(Debug)]
pub enum DownloaderError {
    ChainStateError(ChainStateError),
    CommitError(CommitError),
}

impl From<ChainStateError> for DownloaderError {
    fn from(value: ChainStateError) -> Self {
        DownloaderError::ChainStateError(value)
    }
}

impl From<CommitError> for DownloaderError {
    fn from(value: CommitError) -> Self {
        DownloaderError::CommitError(value)
    }
}
