//! Output channels: bounded frame queues between a running pipeline and the host
//!
//! Each sink of an opened pipeline gets one channel. The device side holds a
//! [`FrameSender`], the host side an [`OutputChannel`]. Sending never blocks: a
//! full queue costs a frame (per [`OverflowPolicy`]) instead of stalling the
//! producer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::config::OverflowPolicy;
use crate::error::{ChannelError, DeviceError};
use crate::frame::Frame;

struct ChannelShared {
    name: String,
    closed: AtomicBool,
    failure: Mutex<Option<DeviceError>>,
    dropped: AtomicU64,
}

impl ChannelShared {
    fn disconnected_error(&self) -> ChannelError {
        if self.closed.load(Ordering::Acquire) {
            return ChannelError::Closed;
        }
        let failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        match failure.as_ref() {
            Some(err) => ChannelError::Device(err.clone()),
            None => ChannelError::Closed,
        }
    }
}

/// Create a connected channel pair with room for `capacity` frames.
pub(crate) fn output_channel(
    name: impl Into<String>,
    capacity: usize,
    policy: OverflowPolicy,
) -> (OutputChannel, FrameSender) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let shared = Arc::new(ChannelShared {
        name: name.into(),
        closed: AtomicBool::new(false),
        failure: Mutex::new(None),
        dropped: AtomicU64::new(0),
    });
    let channel = OutputChannel {
        shared: Arc::clone(&shared),
        rx: rx.clone(),
    };
    let sender = FrameSender {
        shared,
        tx,
        evict: rx,
        policy,
        next_seq: 0,
    };
    (channel, sender)
}

/// Named queue of frames produced by one pipeline sink.
///
/// Frames come out in production order, each exactly once. The sequence stops
/// for good once the owning binding is closed or the device fails.
///
/// Clones are handles to the same queue: a frame is taken by exactly one of
/// them, and closing the binding ends all of them.
#[derive(Clone)]
pub struct OutputChannel {
    shared: Arc<ChannelShared>,
    rx: Receiver<Frame>,
}

impl OutputChannel {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait up to `timeout` for the next frame.
    pub fn get(&self, timeout: Duration) -> Result<Frame, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.is_closed() {
                    Err(ChannelError::Closed)
                } else {
                    Err(ChannelError::Timeout)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.shared.disconnected_error()),
        }
    }

    /// Take the next frame if one is queued; `Timeout` means the queue is empty.
    pub fn try_get(&self) -> Result<Frame, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match self.rx.try_recv() {
            Ok(frame) => Ok(frame),
            Err(TryRecvError::Empty) => Err(ChannelError::Timeout),
            Err(TryRecvError::Disconnected) => Err(self.shared.disconnected_error()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Frames discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn receiver(&self) -> &Receiver<Frame> {
        &self.rx
    }

    pub(crate) fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(channel = %self.shared.name, "output channel closed");
        }
    }
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("name", &self.shared.name)
            .field("queued", &self.rx.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Device-side end of an [`OutputChannel`].
pub struct FrameSender {
    shared: Arc<ChannelShared>,
    tx: Sender<Frame>,
    // Producer-held receiver used to evict the oldest frame on overflow.
    evict: Receiver<Frame>,
    policy: OverflowPolicy,
    next_seq: u64,
}

impl FrameSender {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether the host side has been closed; producers may stop early.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Queue a frame without blocking.
    ///
    /// Stamps the next sequence number. Returns `false` when the frame (or, with
    /// [`OverflowPolicy::DropOldest`], an older one) was dropped.
    pub fn send(&mut self, frame: Frame) -> bool {
        let frame = frame.with_sequence_num(self.next_seq);
        self.next_seq += 1;

        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(frame)) => {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        self.record_drop(frame.sequence_num());
                    }
                    OverflowPolicy::DropOldest => {
                        if let Ok(old) = self.evict.try_recv() {
                            self.record_drop(old.sequence_num());
                        }
                        if let Err(TrySendError::Full(frame) | TrySendError::Disconnected(frame)) =
                            self.tx.try_send(frame)
                        {
                            self.record_drop(frame.sequence_num());
                        }
                    }
                }
                false
            }
        }
    }

    /// Terminate the channel with a device error.
    ///
    /// Frames already queued are still delivered; afterwards `get` reports `err`.
    pub fn fail(self, err: DeviceError) {
        tracing::warn!(channel = %self.shared.name, "output channel failed: {err}");
        let mut failure = self.shared.failure.lock().unwrap_or_else(|e| e.into_inner());
        failure.get_or_insert(err);
    }

    fn record_drop(&self, sequence_num: u64) {
        let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(channel = %self.shared.name, sequence_num, total, "queue full, frame dropped");
    }
}
