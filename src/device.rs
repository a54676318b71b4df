//! Device binding: a pipeline descriptor compiled onto one physical device
//!
//! Opening a binding takes an exclusive lease on the device. The lease, the
//! running pipeline and the output channels live exactly as long as the
//! binding stays open; [`DeviceBinding::close`] (or dropping the binding)
//! releases all of them once.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use crate::backend::{DeviceBackend, DeviceInfo, RunningPipeline};
use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::pipeline::PipelineDescriptor;
use crate::queue::{output_channel, OutputChannel};
use crate::usb::PlatformEnv;

/// Device ids currently owned by an open binding, process-wide.
static LEASES: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Exclusive ownership of one device id. Released on drop.
struct DeviceLease {
    device_id: String,
}

impl DeviceLease {
    fn acquire(device_id: &str) -> Option<Self> {
        let mut leases = LEASES.lock().unwrap_or_else(|e| e.into_inner());
        if leases.insert(device_id.to_string()) {
            Some(Self {
                device_id: device_id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        LEASES
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.device_id);
        tracing::debug!(device = %self.device_id, "device lease released");
    }
}

/// An open pipeline on a leased device.
pub struct DeviceBinding {
    backend: Arc<dyn DeviceBackend>,
    descriptor: PipelineDescriptor,
    device: DeviceInfo,
    channels: Vec<OutputChannel>,
    running: Option<Box<dyn RunningPipeline>>,
    lease: Option<DeviceLease>,
}

impl DeviceBinding {
    /// Compile `descriptor` onto a device and start it.
    ///
    /// On success there is exactly one output channel per sink, in sink
    /// creation order. On failure nothing stays allocated: no lease, no
    /// running pipeline.
    pub fn open(
        backend: Arc<dyn DeviceBackend>,
        descriptor: PipelineDescriptor,
        env: &PlatformEnv,
        config: &SessionConfig,
    ) -> Result<Self> {
        let ctx = env.usb_context().ok_or(DeviceError::NoContext)?;
        backend.set_platform_context(ctx)?;

        config.validate()?;
        descriptor.validate()?;

        let devices = backend.discover()?;
        let candidates: Vec<&DeviceInfo> = match config.device_id.as_deref() {
            Some(id) => devices.iter().filter(|d| d.id == id).collect(),
            None => devices.iter().collect(),
        };
        if candidates.is_empty() {
            tracing::warn!(requested = ?config.device_id, found = devices.len(), "no matching device");
            return Err(DeviceError::NotFound.into());
        }

        let (device, lease) = candidates
            .iter()
            .find_map(|d| DeviceLease::acquire(&d.id).map(|lease| ((*d).clone(), lease)))
            .ok_or_else(|| DeviceError::InUse(candidates[0].id.clone()))?;

        let (channels, senders): (Vec<_>, Vec<_>) = descriptor
            .sinks()
            .map(|sink| output_channel(sink.alias(), config.queue_size, config.overflow))
            .unzip();

        // `lease` is dropped on the error path, releasing the device.
        let running = backend.start(&device, &descriptor, senders)?;

        tracing::info!(
            device = %device.id,
            nodes = descriptor.nodes().len(),
            channels = channels.len(),
            "device binding opened"
        );

        Ok(Self {
            backend,
            descriptor,
            device,
            channels,
            running: Some(running),
            lease: Some(lease),
        })
    }

    /// Stop the pipeline, close every channel and release the device.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub fn close(&mut self) -> Result<()> {
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        for channel in &self.channels {
            channel.close();
        }
        if let Some(mut running) = self.running.take() {
            running.stop();
        }
        drop(lease);
        tracing::info!(device = %self.device.id, dropped = self.dropped_frames(), "device binding closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lease.is_some()
    }

    pub fn channels(&self) -> &[OutputChannel] {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&OutputChannel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// Frames lost to overflow across all channels.
    pub fn dropped_frames(&self) -> u64 {
        self.channels.iter().map(|c| c.dropped()).sum()
    }

    /// Whether some open binding in this process currently owns `device_id`.
    pub fn is_device_bound(device_id: &str) -> bool {
        LEASES
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(device_id)
    }
}

impl Drop for DeviceBinding {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBinding")
            .field("device", &self.device)
            .field("channels", &self.channels)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::error::Error;
    use crate::usb::UsbContext;
    use std::ffi::c_void;

    fn env() -> PlatformEnv {
        // Any non-null address stands in for the platform handle.
        let ctx = UsbContext::from_raw(std::ptr::NonNull::<c_void>::dangling().as_ptr()).unwrap();
        PlatformEnv::new().with_usb_context(ctx)
    }

    #[test]
    fn test_open_and_close_once() {
        let sim = SimulatedBackend::new();
        let mut binding = DeviceBinding::open(
            Arc::new(sim.clone()),
            PipelineDescriptor::color_preview(),
            &env(),
            &SessionConfig::default(),
        )
        .unwrap();

        let id = binding.device().id.clone();
        assert!(DeviceBinding::is_device_bound(&id));
        assert_eq!(binding.channel_names(), vec!["preview"]);

        binding.close().unwrap();
        binding.close().unwrap();
        drop(binding);

        assert!(!DeviceBinding::is_device_bound(&id));
        assert_eq!(sim.start_count(), 1);
        assert_eq!(sim.stop_count(), 1);
    }

    #[test]
    fn test_second_binding_is_in_use() {
        let sim = SimulatedBackend::new();
        let backend: Arc<dyn DeviceBackend> = Arc::new(sim.clone());
        let config = SessionConfig::default();
        let first = DeviceBinding::open(backend.clone(), PipelineDescriptor::color_preview(), &env(), &config).unwrap();

        let err = DeviceBinding::open(backend.clone(), PipelineDescriptor::color_preview(), &env(), &config).unwrap_err();
        assert!(matches!(err, Error::Device(DeviceError::InUse(_))));

        drop(first);
        assert!(DeviceBinding::open(backend, PipelineDescriptor::color_preview(), &env(), &config).is_ok());
    }

    #[test]
    fn test_failed_start_releases_lease() {
        let sim = SimulatedBackend::new();
        sim.fail_next_start(DeviceError::Backend("firmware refused".to_string()));
        let id = sim.discover().unwrap()[0].id.clone();

        let err = DeviceBinding::open(
            Arc::new(sim.clone()),
            PipelineDescriptor::color_preview(),
            &env(),
            &SessionConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Device(DeviceError::Backend(_))));
        assert!(!DeviceBinding::is_device_bound(&id));
        assert_eq!(sim.running(), 0);
    }

    #[test]
    fn test_requested_device_must_exist() {
        let config = SessionConfig::default().with_device_id("no-such-device");
        let err = DeviceBinding::open(
            Arc::new(SimulatedBackend::new()),
            PipelineDescriptor::color_preview(),
            &env(),
            &config,
        )
        .unwrap_err();
        assert_eq!(err.device_error(), Some(&DeviceError::NotFound));
    }

    #[test]
    fn test_unlinked_sink_is_rejected_before_discovery() {
        let sim = SimulatedBackend::new();
        let mut pipeline = PipelineDescriptor::new();
        pipeline.add_sink("orphan").unwrap();

        let err = DeviceBinding::open(Arc::new(sim.clone()), pipeline, &env(), &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidLink(_)));
        assert_eq!(sim.start_count(), 0);
    }
}
