/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    downloader::messages::SyncMessage,
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, ChainID},
    },
};

use super::{
    messages::{Message, ProgressMessage, ServerRequest},
    network::Network,
};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into receiver
/// handles.
///
/// The kinds of messages that the poller distributes are:
/// 1. Progress messages (consensus and ceremony messages, block responses and header announcements),
///    processed by the [`Algorithm`](crate::algorithm::Algorithm)'s execute loop, and
/// 2. Block and header requests, processed by the [`BlockServer`](crate::downloader::server::BlockServer).
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, ProgressMessage)>,
    Receiver<(VerifyingKey, ServerRequest)>,
) {
    let (to_progress_msg_receiver, progress_msg_receiver) = mpsc::channel();
    let (to_server_request_receiver, server_request_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            let _ = match msg {
                Message::ConsensusMessage(c_msg) => to_progress_msg_receiver
                    .send((origin, ProgressMessage::ConsensusMessage(c_msg)))
                    .is_ok(),
                Message::CeremonyMessage(c_msg) => to_progress_msg_receiver
                    .send((origin, ProgressMessage::CeremonyMessage(c_msg)))
                    .is_ok(),
                Message::SyncMessage(s_msg) => match s_msg {
                    SyncMessage::BlockResponse(res) => to_progress_msg_receiver
                        .send((origin, ProgressMessage::BlockResponse(res)))
                        .is_ok(),
                    SyncMessage::HeaderAnnouncement(ann) => to_progress_msg_receiver
                        .send((origin, ProgressMessage::HeaderAnnouncement(ann)))
                        .is_ok(),
                    SyncMessage::BlockRequest(req) => to_server_request_receiver
                        .send((origin, ServerRequest::BlockRequest(req)))
                        .is_ok(),
                    SyncMessage::HeaderRequest(req) => to_server_request_receiver
                        .send((origin, ServerRequest::HeaderRequest(req)))
                        .is_ok(),
                },
            };
        } else {
            thread::yield_now()
        }
    });

    (poller_thread, progress_msg_receiver, server_request_receiver)
}

/// A receiving end for [`ProgressMessage`]s.
///
/// ## Height-aware buffering
///
/// `ProgressMessageStub` inspects the height of incoming consensus messages to decide whether to:
/// 1. Return it from `recv` for immediate processing (messages for the current height).
/// 2. Place it in its buffer for processing once the replica reaches its height (future heights).
/// 3. Discard it (past heights).
///
/// Ceremony messages, block responses and header announcements are not tied to a height and are returned
/// immediately.
///
/// ## Buffer management
///
/// The buffer holds at most `capacity` messages. When it is full, messages of the highest buffered height
/// are evicted first, and a message for a height above every buffered height is dropped.
pub(crate) struct ProgressMessageStub {
    receiver: Receiver<(VerifyingKey, ProgressMessage)>,
    msg_buffer: ProgressMessageBuffer,
}

impl ProgressMessageStub {
    pub(crate) fn new(
        receiver: Receiver<(VerifyingKey, ProgressMessage)>,
        msg_buffer_capacity: usize,
    ) -> ProgressMessageStub {
        Self {
            receiver,
            msg_buffer: ProgressMessageBuffer::new(msg_buffer_capacity),
        }
    }

    /// Receive a message matching `chain_id` that can be processed at `cur_height`, waiting at most
    /// `timeout`.
    pub(crate) fn recv(
        &mut self,
        chain_id: ChainID,
        cur_height: BlockHeight,
        timeout: Duration,
    ) -> Result<(VerifyingKey, ProgressMessage), ProgressMessageReceiveError> {
        self.msg_buffer.remove_expired_msgs(cur_height);

        if let Some((sender, msg)) = self.msg_buffer.get_msg(&cur_height) {
            return Ok((sender, msg));
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Once the deadline has passed, still drain whatever is already queued.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = if remaining.is_zero() {
                match self.receiver.try_recv() {
                    Ok(received) => received,
                    Err(TryRecvError::Empty) => return Err(ProgressMessageReceiveError::Timeout),
                    Err(TryRecvError::Disconnected) => {
                        return Err(ProgressMessageReceiveError::Disconnected)
                    }
                }
            } else {
                match self.receiver.recv_timeout(remaining) {
                    Ok(received) => received,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(ProgressMessageReceiveError::Timeout)
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(ProgressMessageReceiveError::Disconnected)
                    }
                }
            };

            let (sender, msg) = received;
            if msg.chain_id() != chain_id {
                continue;
            }
            match msg.height() {
                Some(height) if height > cur_height => {
                    self.msg_buffer.insert(height, sender, msg);
                }
                Some(height) if height < cur_height => (),
                _ => return Ok((sender, msg)),
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum ProgressMessageReceiveError {
    Timeout,
    Disconnected,
}

/// Message buffer for consensus messages of future heights.
struct ProgressMessageBuffer {
    capacity: usize,
    len: usize,
    buffer: BTreeMap<BlockHeight, VecDeque<(VerifyingKey, ProgressMessage)>>,
}

impl ProgressMessageBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: 0,
            buffer: BTreeMap::new(),
        }
    }

    /// Returns whether the message was inserted.
    fn insert(&mut self, height: BlockHeight, sender: VerifyingKey, msg: ProgressMessage) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.len >= self.capacity {
            let Some(max_height) = self.buffer.keys().next_back().copied() else {
                return false;
            };
            if height >= max_height {
                return false;
            }
            self.remove_one_of(max_height);
        }

        self.buffer
            .entry(height)
            .or_insert_with(VecDeque::new)
            .push_back((sender, msg));
        self.len += 1;
        true
    }

    fn get_msg(&mut self, height: &BlockHeight) -> Option<(VerifyingKey, ProgressMessage)> {
        let msg_queue = self.buffer.get_mut(height)?;
        let msg = msg_queue.pop_front();
        if msg_queue.is_empty() {
            self.buffer.remove(height);
        }
        if msg.is_some() {
            self.len -= 1;
        }
        msg
    }

    fn remove_one_of(&mut self, height: BlockHeight) {
        if let Some(msg_queue) = self.buffer.get_mut(&height) {
            if msg_queue.pop_back().is_some() {
                self.len -= 1;
            }
            if msg_queue.is_empty() {
                self.buffer.remove(&height);
            }
        }
    }

    /// Remove all messages for heights lower than the current height.
    fn remove_expired_msgs(&mut self, cur_height: BlockHeight) {
        self.buffer = self.buffer.split_off(&cur_height);
        self.len = self.buffer.values().map(|queue| queue.len()).sum();
    }
}

/// A receiving end for block and header requests, polled by the block server.
pub(crate) struct BlockServerStub {
    requests: Receiver<(VerifyingKey, ServerRequest)>,
}

impl BlockServerStub {
    pub(crate) fn new(requests: Receiver<(VerifyingKey, ServerRequest)>) -> BlockServerStub {
        BlockServerStub { requests }
    }

    /// Receive a [`ServerRequest`] if one arrives within `timeout`.
    pub(crate) fn recv_request(
        &self,
        timeout: Duration,
    ) -> Result<(VerifyingKey, ServerRequest), ServerRequestReceiveError> {
        match self.requests.recv_timeout(timeout) {
            Ok((origin, request)) => Ok((origin, request)),
            Err(RecvTimeoutError::Disconnected) => Err(ServerRequestReceiveError::Disconnected),
            Err(RecvTimeoutError::Timeout) => Err(ServerRequestReceiveError::NotAvailable),
        }
    }
}

#[derive(Debug)]
pub enum ServerRequestReceiveError {
    Disconnected,
    NotAvailable,
}
