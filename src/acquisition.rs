//! Acquisition loop
//!
//! Runs on its own named thread, pulls frames from every output channel of a
//! [`DeviceBinding`] and hands each one to a callback. The loop owns the
//! binding from `start` on and closes it exactly once, whatever ends the run:
//! cancellation, the stop condition, every channel closing, a device error or
//! a panicking callback.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use depthai_session::{AcquisitionLoop, DeviceBinding, PipelineDescriptor, PlatformEnv,
//! #     SessionConfig, SimulatedBackend, StopAfterFrames};
//! # fn run(env: PlatformEnv) -> depthai_session::Result<()> {
//! let config = SessionConfig::default();
//! let binding = DeviceBinding::open(
//!     Arc::new(SimulatedBackend::new()),
//!     PipelineDescriptor::color_preview(),
//!     &env,
//!     &config,
//! )?;
//! let mut acquisition = AcquisitionLoop::new(config);
//! acquisition.start(binding, |name, frame| println!("{name}: {}", frame.describe()), StopAfterFrames(10))?;
//! let report = acquisition.join()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Select;

use crate::config::SessionConfig;
use crate::device::DeviceBinding;
use crate::error::{ChannelError, DeviceError, Error, Result};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

/// Shared stop flag. Checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Running counters, visible to the stop condition.
#[derive(Debug, Clone)]
pub struct LoopStats {
    /// Frames dispatched to the callback.
    pub frames: u64,
    pub per_channel: HashMap<String, u64>,
    /// Iterations where no channel became ready in time.
    pub timeouts: u64,
    started: Instant,
}

impl LoopStats {
    fn new() -> Self {
        Self {
            frames: 0,
            per_channel: HashMap::new(),
            timeouts: 0,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn frames_on(&self, channel: &str) -> u64 {
        self.per_channel.get(channel).copied().unwrap_or(0)
    }
}

/// Decides, after each frame and each idle wait, whether the loop is done.
pub trait StopCondition {
    fn should_stop(&mut self, stats: &LoopStats) -> bool;
}

impl<F> StopCondition for F
where
    F: FnMut(&LoopStats) -> bool,
{
    fn should_stop(&mut self, stats: &LoopStats) -> bool {
        self(stats)
    }
}

/// Stop once this many frames have been dispatched in total.
#[derive(Debug, Clone, Copy)]
pub struct StopAfterFrames(pub u64);

impl StopCondition for StopAfterFrames {
    fn should_stop(&mut self, stats: &LoopStats) -> bool {
        stats.frames >= self.0
    }
}

/// Run until cancelled or until every channel closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl StopCondition for Never {
    fn should_stop(&mut self, _stats: &LoopStats) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    StopCondition,
    AllChannelsClosed,
    CallbackPanicked,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub reason: StopReason,
    pub frames: u64,
    pub per_channel: HashMap<String, u64>,
    pub timeouts: u64,
    /// Frames lost to queue overflow.
    pub dropped: u64,
    pub elapsed: Duration,
}

struct LoopShared {
    state: AtomicU8,
}

impl LoopShared {
    fn set(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }
}

pub struct AcquisitionLoop {
    config: SessionConfig,
    shared: Arc<LoopShared>,
    token: CancellationToken,
    handle: Option<JoinHandle<Result<LoopReport>>>,
}

impl AcquisitionLoop {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(LoopShared {
                state: AtomicU8::new(LoopState::Idle as u8),
            }),
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Take ownership of `binding` and start acquiring on a new thread.
    ///
    /// A loop runs once. Calling `start` again fails with
    /// [`Error::LoopAlreadyStarted`] and closes the binding passed in. An
    /// invalid configuration fails with [`Error::Config`], closes the binding
    /// and leaves the loop `Idle`.
    pub fn start<F, S>(&mut self, binding: DeviceBinding, on_frame: F, stop: S) -> Result<()>
    where
        F: FnMut(&str, Frame) + Send + 'static,
        S: StopCondition + Send + 'static,
    {
        self.config.validate()?;
        if self
            .shared
            .state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::LoopAlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let token = self.token.clone();
        let timeout = self.config.get_timeout();

        let spawned = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run(binding, on_frame, stop, token, timeout, &shared));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                // The closure, and with it the binding, was dropped and closed.
                self.shared.set(LoopState::Stopped);
                Err(Error::Io(e))
            }
        }
    }

    /// Ask the loop to stop. It notices within one `get` timeout.
    pub fn cancel(&self) {
        self.token.cancel();
        let _ = self.shared.state.compare_exchange(
            LoopState::Running as u8,
            LoopState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// A token that cancels this loop from anywhere, including the callback.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> LoopState {
        self.shared.get()
    }

    /// Wait for the loop thread to finish.
    ///
    /// A device error that ended the run is returned as `Err(Error::Device)`;
    /// the binding is closed by then either way.
    pub fn join(&mut self) -> Result<LoopReport> {
        let handle = self.handle.take().ok_or(Error::LoopNotStarted)?;
        handle.join().map_err(|_| Error::LoopPanicked)?
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.token.cancel();
            let _ = handle.join();
        }
    }
}

fn run<F, S>(
    mut binding: DeviceBinding,
    mut on_frame: F,
    mut stop: S,
    token: CancellationToken,
    timeout: Duration,
    shared: &LoopShared,
) -> Result<LoopReport>
where
    F: FnMut(&str, Frame),
    S: StopCondition,
{
    let device_id = binding.device().id.clone();
    tracing::info!(device = %device_id, channels = binding.channels().len(), "acquisition loop started");

    let mut stats = LoopStats::new();
    let outcome = acquire(&binding, &mut on_frame, &mut stop, &token, timeout, &mut stats);

    if shared.get() == LoopState::Running {
        shared.set(LoopState::Stopping);
    }
    let dropped = binding.dropped_frames();
    if let Err(e) = binding.close() {
        tracing::warn!(device = %device_id, "closing binding failed: {e}");
    }
    shared.set(LoopState::Stopped);

    match outcome {
        Ok(reason) => {
            tracing::info!(device = %device_id, ?reason, frames = stats.frames, dropped, "acquisition loop stopped");
            Ok(LoopReport {
                reason,
                frames: stats.frames,
                elapsed: stats.elapsed(),
                per_channel: stats.per_channel,
                timeouts: stats.timeouts,
                dropped,
            })
        }
        Err(e) => {
            tracing::error!(device = %device_id, frames = stats.frames, "acquisition loop failed: {e}");
            Err(Error::Device(e))
        }
    }
}

fn acquire<F, S>(
    binding: &DeviceBinding,
    on_frame: &mut F,
    stop: &mut S,
    token: &CancellationToken,
    timeout: Duration,
    stats: &mut LoopStats,
) -> std::result::Result<StopReason, DeviceError>
where
    F: FnMut(&str, Frame),
    S: StopCondition,
{
    let channels = binding.channels();
    let mut active = vec![true; channels.len()];

    loop {
        if token.is_cancelled() {
            return Ok(StopReason::Cancelled);
        }
        if !active.contains(&true) {
            return Ok(StopReason::AllChannelsClosed);
        }

        let mut select = Select::new();
        for (channel, _) in channels.iter().zip(&active).filter(|(_, live)| **live) {
            select.recv(channel.receiver());
        }
        if select.ready_timeout(timeout).is_err() {
            stats.timeouts += 1;
            if stop.should_stop(stats) {
                return Ok(StopReason::StopCondition);
            }
            continue;
        }

        for (channel, live) in channels.iter().zip(active.iter_mut()) {
            if !*live {
                continue;
            }
            match channel.try_get() {
                Ok(frame) => {
                    let name = channel.name();
                    stats.frames += 1;
                    *stats.per_channel.entry(name.to_string()).or_insert(0) += 1;

                    if catch_unwind(AssertUnwindSafe(|| on_frame(name, frame))).is_err() {
                        tracing::error!(channel = name, "frame callback panicked");
                        return Ok(StopReason::CallbackPanicked);
                    }
                    if stop.should_stop(stats) {
                        return Ok(StopReason::StopCondition);
                    }
                }
                Err(ChannelError::Timeout) => {}
                Err(ChannelError::Closed) => {
                    tracing::debug!(channel = channel.name(), "channel closed, retiring");
                    *live = false;
                }
                Err(ChannelError::Device(e)) => return Err(e),
            }
        }
    }
}
