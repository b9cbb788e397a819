/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`BlockServer`], which serves committed blocks to the
//! [downloaders](super::implementation::Downloader) of lagging peers.
//!
//! The server's responsibilities are to:
//! 1. Respond to [`BlockRequest`]s with committed blocks and their commit certificates, starting at the
//!    requested height. The number of blocks sent back is capped by the configured batch size.
//! 2. Respond to [`HeaderRequest`]s with a [`HeaderAnnouncement`] of the local head.
//! 3. Broadcast a [`HeaderAnnouncement`] periodically, and whenever the local head changes, so that
//!    lagging peers learn that they should sync.
//!
//! The server reads the chain state through a [`ChainStateCamera`] and runs on its own thread, so serving
//! peers never delays the algorithm thread.

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    chain_state::{camera::ChainStateCamera, pluggables::KVStore, state::ChainStateError},
    events::{Event, ReceiveBlockRequestEvent, SendBlockResponseEvent},
    networking::{
        messages::ServerRequest,
        network::Network,
        receiving::{BlockServerStub, ServerRequestReceiveError},
        sending::SenderHandle,
    },
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{ChainID, ChainWeight, CryptoHash},
    },
};

use super::messages::{BlockRequest, BlockResponse, CertifiedBlock, HeaderAnnouncement};

pub(crate) struct BlockServer<N: Network + 'static, K: KVStore> {
    config: BlockServerConfiguration,
    camera: ChainStateCamera<K>,
    receiver: BlockServerStub,
    sender: SenderHandle<N>,
    last_advertisement: Option<(Instant, CryptoHash)>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, K: KVStore> BlockServer<N, K> {
    pub(crate) fn new(
        config: BlockServerConfiguration,
        camera: ChainStateCamera<K>,
        requests: Receiver<(VerifyingKey, ServerRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            config,
            camera,
            receiver: BlockServerStub::new(requests),
            sender: SenderHandle::new(network),
            last_advertisement: None,
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Block server thread disconnected from main thread")
                }
            }

            // 1. Respond to a request, if one arrives soon.
            match self.receiver.recv_request(self.config.poll_interval) {
                Ok((origin, request)) => {
                    if let Err(err) = self.on_request(origin, request) {
                        log::error!("Block server failed to read the chain state: {:?}", err);
                    }
                }
                Err(ServerRequestReceiveError::NotAvailable) => (),
                Err(ServerRequestReceiveError::Disconnected) => return,
            }

            // 2. Advertise the head if it changed or the advertise interval has passed.
            if let Err(err) = self.advertise_if_needed() {
                log::error!("Block server failed to read the head block: {:?}", err);
            }
        })
    }

    fn on_request(&mut self, origin: VerifyingKey, request: ServerRequest) -> Result<(), ChainStateError> {
        match request {
            ServerRequest::BlockRequest(BlockRequest {
                chain_id,
                from_height,
                count,
            }) => {
                if chain_id != self.config.chain_id {
                    return Ok(());
                }
                Event::ReceiveBlockRequest(ReceiveBlockRequestEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    from_height,
                    count,
                })
                .publish(&self.event_publisher);

                let limit = count.min(self.config.batch_size);
                let blocks: Vec<CertifiedBlock> = self
                    .camera
                    .snapshot()
                    .blocks_from_height(from_height, limit)?
                    .into_iter()
                    .map(|(block, certificate)| CertifiedBlock { block, certificate })
                    .collect();
                let sent = blocks.len();

                self.sender.send(
                    origin,
                    BlockResponse {
                        chain_id,
                        from_height,
                        blocks,
                    },
                );

                Event::SendBlockResponse(SendBlockResponseEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    from_height,
                    blocks: sent,
                })
                .publish(&self.event_publisher);
            }
            ServerRequest::HeaderRequest(request) => {
                if request.chain_id != self.config.chain_id {
                    return Ok(());
                }
                let announcement = self.head_announcement()?;
                self.sender.send(origin, announcement);
            }
        }
        Ok(())
    }

    fn advertise_if_needed(&mut self) -> Result<(), ChainStateError> {
        let announcement = self.head_announcement()?;
        let due = match self.last_advertisement {
            None => true,
            Some((at, head)) => {
                head != announcement.head || at.elapsed() >= self.config.advertise_interval
            }
        };
        if due {
            self.last_advertisement = Some((Instant::now(), announcement.head));
            self.sender.broadcast(announcement);
        }
        Ok(())
    }

    fn head_announcement(&self) -> Result<HeaderAnnouncement, ChainStateError> {
        let head = self.camera.snapshot().head_block()?;
        Ok(HeaderAnnouncement {
            chain_id: self.config.chain_id,
            height: head.height,
            weight: ChainWeight::of_height(head.height),
            head: head.hash,
        })
    }
}

/// Immutable parameters that define the behaviour of the [`BlockServer`].
pub(crate) struct BlockServerConfiguration {
    pub(crate) chain_id: ChainID,
    pub(crate) batch_size: u32,
    pub(crate) advertise_interval: Duration,
    /// How long to wait for a request before checking whether to advertise.
    pub(crate) poll_interval: Duration,
}
