//! In-process device backend
//!
//! Behaves like a set of attached cameras without touching USB: pipelines are
//! "compiled" by deriving each sink's frame format from its upstream source,
//! and frames are test patterns. Useful for tests and for running host code on
//! machines without hardware.
//!
//! Frames are produced either on demand ([`EmissionMode::Manual`], via
//! [`SimulatedBackend::emit`]) or by a producer thread at a fixed interval
//! ([`EmissionMode::Continuous`]).
//!
//! Clones share state, so a test can keep one handle while the binding owns
//! another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{DeviceBackend, DeviceInfo, DeviceProtocol, RunningPipeline};
use crate::common::{ColorOrder, ImageFrameType};
use crate::error::DeviceError;
use crate::frame::{Frame, TestPattern};
use crate::pipeline::{PipelineDescriptor, SourceKind};
use crate::queue::FrameSender;
use crate::usb::{UsbContext, UsbTransport};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmissionMode {
    /// Frames are produced only by [`SimulatedBackend::emit`].
    #[default]
    Manual,
    /// A producer thread emits one frame per output every `interval`.
    Continuous { interval: Duration },
}

struct SimOutput {
    sender: FrameSender,
    width: u32,
    height: u32,
    format: ImageFrameType,
}

type Outputs = Arc<Mutex<Vec<SimOutput>>>;

struct SimInner {
    instance: u64,
    device_count: usize,
    mode: EmissionMode,
    pattern: TestPattern,
    reject_context: AtomicBool,
    fail_next_start: Mutex<Option<DeviceError>>,
    last_context: Mutex<Option<UsbContext>>,
    context_calls: AtomicUsize,
    start_count: AtomicUsize,
    stop_count: AtomicUsize,
    next_run: AtomicU64,
    active: Mutex<HashMap<u64, Outputs>>,
}

#[derive(Clone)]
pub struct SimulatedBackend {
    inner: Arc<SimInner>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// One device, manual emission.
    pub fn new() -> Self {
        Self::with_config(1, EmissionMode::Manual, TestPattern::Gradient)
    }

    pub fn with_config(device_count: usize, mode: EmissionMode, pattern: TestPattern) -> Self {
        Self {
            inner: Arc::new(SimInner {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                device_count,
                mode,
                pattern,
                reject_context: AtomicBool::new(false),
                fail_next_start: Mutex::new(None),
                last_context: Mutex::new(None),
                context_calls: AtomicUsize::new(0),
                start_count: AtomicUsize::new(0),
                stop_count: AtomicUsize::new(0),
                next_run: AtomicU64::new(0),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A backend that finds no hardware.
    pub fn without_devices() -> Self {
        Self::with_config(0, EmissionMode::Manual, TestPattern::Gradient)
    }

    pub fn continuous(interval: Duration) -> Self {
        Self::with_config(1, EmissionMode::Continuous { interval }, TestPattern::Gradient)
    }

    /// Make `set_platform_context` refuse every context.
    pub fn set_reject_context(&self, reject: bool) {
        self.inner.reject_context.store(reject, Ordering::Relaxed);
    }

    /// Make the next `start` fail with `err`.
    pub fn fail_next_start(&self, err: DeviceError) {
        *self.inner.fail_next_start.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    /// Push one frame to every output of every running pipeline.
    ///
    /// Returns how many outputs received a frame.
    pub fn emit(&self) -> usize {
        let runs: Vec<Outputs> = {
            let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
            active.values().cloned().collect()
        };
        runs.iter()
            .map(|outputs| emit_into(outputs, self.inner.pattern))
            .sum()
    }

    /// Simulate unplugging: every running output fails with `Disconnected`.
    pub fn disconnect(&self) {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        for outputs in active.values() {
            let drained: Vec<SimOutput> = {
                let mut outputs = outputs.lock().unwrap_or_else(|e| e.into_inner());
                outputs.drain(..).collect()
            };
            for output in drained {
                output.sender.fail(DeviceError::Disconnected);
            }
        }
    }

    /// End one output of every running pipeline, leaving the others streaming.
    ///
    /// Frames already queued on it are still delivered; afterwards its channel
    /// reports `Closed`. Returns how many outputs were ended.
    pub fn close_output(&self, name: &str) -> usize {
        let active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut closed = 0;
        for outputs in active.values() {
            let mut outputs = outputs.lock().unwrap_or_else(|e| e.into_inner());
            let before = outputs.len();
            outputs.retain(|output| output.sender.name() != name);
            closed += before - outputs.len();
        }
        tracing::debug!(output = name, closed, "simulated output closed");
        closed
    }

    pub fn context_calls(&self) -> usize {
        self.inner.context_calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<UsbContext> {
        *self.inner.last_context.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start_count(&self) -> usize {
        self.inner.start_count.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.inner.stop_count.load(Ordering::SeqCst)
    }

    /// Pipelines started and not yet stopped.
    pub fn running(&self) -> usize {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn device_infos(&self) -> Vec<DeviceInfo> {
        (0..self.inner.device_count)
            .map(|i| DeviceInfo {
                id: format!("sim-{}-{}", self.inner.instance, i),
                name: format!("Simulated OAK {i}"),
                protocol: DeviceProtocol::Simulated,
            })
            .collect()
    }
}

fn emit_into(outputs: &Outputs, pattern: TestPattern) -> usize {
    let mut outputs = outputs.lock().unwrap_or_else(|e| e.into_inner());
    for output in outputs.iter_mut() {
        let frame = Frame::test_pattern(output.width, output.height, output.format, pattern);
        output.sender.send(frame);
    }
    outputs.len()
}

/// Frame geometry and format a sink receives, derived from its upstream source.
fn output_format(descriptor: &PipelineDescriptor, sink_name: &str) -> Result<(u32, u32, ImageFrameType), DeviceError> {
    let sink = descriptor
        .sink_by_name(sink_name)
        .ok_or_else(|| DeviceError::Backend(format!("no sink named '{sink_name}'")))?;
    let upstream = descriptor
        .upstream_of(sink.id())
        .ok_or_else(|| DeviceError::Backend(format!("sink '{sink_name}' has no upstream node")))?;
    let kind = upstream
        .source_kind()
        .ok_or_else(|| DeviceError::Backend(format!("sink '{sink_name}' is fed by another sink")))?;
    let params = upstream.params().cloned().unwrap_or_default();
    let (width, height) = params.preview_size;

    let format = match kind {
        SourceKind::ColorCamera => match (params.interleaved, params.color_order) {
            (true, ColorOrder::Rgb) => ImageFrameType::RGB888i,
            (true, ColorOrder::Bgr) => ImageFrameType::BGR888i,
            (false, ColorOrder::Rgb) => ImageFrameType::RGB888p,
            (false, ColorOrder::Bgr) => ImageFrameType::BGR888p,
        },
        SourceKind::MonoCamera => ImageFrameType::GRAY8,
        SourceKind::StereoDepth => ImageFrameType::RAW16,
    };
    Ok((width, height, format))
}

impl UsbTransport for SimulatedBackend {
    fn set_platform_context(&self, ctx: UsbContext) -> Result<(), DeviceError> {
        self.inner.context_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.reject_context.load(Ordering::Relaxed) {
            return Err(DeviceError::NoContext);
        }
        *self.inner.last_context.lock().unwrap_or_else(|e| e.into_inner()) = Some(ctx);
        Ok(())
    }
}

impl DeviceBackend for SimulatedBackend {
    fn discover(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.device_infos())
    }

    fn start(
        &self,
        device: &DeviceInfo,
        descriptor: &PipelineDescriptor,
        outputs: Vec<FrameSender>,
    ) -> Result<Box<dyn RunningPipeline>, DeviceError> {
        if let Some(err) = self
            .inner
            .fail_next_start
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(err);
        }
        if !self.device_infos().iter().any(|d| d.id == device.id) {
            return Err(DeviceError::NotFound);
        }

        let mut compiled = Vec::with_capacity(outputs.len());
        for sender in outputs {
            let (width, height, format) = output_format(descriptor, sender.name())?;
            tracing::debug!(device = %device.id, output = sender.name(), width, height, %format, "compiled output");
            compiled.push(SimOutput {
                sender,
                width,
                height,
                format,
            });
        }

        let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let outputs: Outputs = Arc::new(Mutex::new(compiled));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = match self.inner.mode {
            EmissionMode::Manual => None,
            EmissionMode::Continuous { interval } => {
                let outputs = Arc::clone(&outputs);
                let stop = Arc::clone(&stop);
                let pattern = self.inner.pattern;
                let handle = std::thread::Builder::new()
                    .name(format!("{}-producer", device.id))
                    .spawn(move || {
                        while !stop.load(Ordering::Acquire) {
                            std::thread::sleep(interval);
                            if stop.load(Ordering::Acquire) || emit_into(&outputs, pattern) == 0 {
                                break;
                            }
                        }
                    })
                    .map_err(|e| DeviceError::Backend(format!("failed to spawn producer: {e}")))?;
                Some(handle)
            }
        };

        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, Arc::clone(&outputs));
        self.inner.start_count.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimPipeline {
            backend: Arc::clone(&self.inner),
            run_id,
            outputs,
            stop,
            worker,
            stopped: false,
        }))
    }
}

struct SimPipeline {
    backend: Arc<SimInner>,
    run_id: u64,
    outputs: Outputs,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

impl SimPipeline {
    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.backend
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
        // Dropping the senders disconnects every output channel.
        self.outputs.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl RunningPipeline for SimPipeline {
    fn stop(&mut self) {
        self.backend.stop_count.fetch_add(1, Ordering::SeqCst);
        self.shutdown();
    }
}

impl Drop for SimPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
