//! Host boundary
//!
//! Flat, handle-based surface for embedding in another runtime: sessions are
//! plain `u64` ids and frames come out as owned byte buffers, so no internal
//! type crosses the boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::backend::DeviceBackend;
use crate::config::SessionConfig;
use crate::device::DeviceBinding;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::pipeline::PipelineDescriptor;
use crate::usb::PlatformEnv;

/// Greeting returned across the boundary as a liveness check.
///
/// Names the language of the implementation behind the boundary.
pub fn greeting() -> &'static str {
    "Hello from Rust"
}

/// A frame as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFrame {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub sequence: u64,
    pub data: Vec<u8>,
}

impl From<Frame> for HostFrame {
    fn from(frame: Frame) -> Self {
        Self {
            width: frame.width(),
            height: frame.height(),
            format: frame.format().name().to_string(),
            sequence: frame.sequence_num(),
            data: frame.into_bytes(),
        }
    }
}

pub struct Host {
    backend: Arc<dyn DeviceBackend>,
    env: PlatformEnv,
    config: SessionConfig,
    sessions: Mutex<HashMap<u64, Arc<Mutex<DeviceBinding>>>>,
    next_session: AtomicU64,
}

impl Host {
    pub fn new(backend: Arc<dyn DeviceBackend>, env: PlatformEnv, config: SessionConfig) -> Self {
        Self {
            backend,
            env,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Open `descriptor` on a device and return its session id.
    pub fn open(&self, descriptor: PipelineDescriptor) -> Result<u64> {
        let binding = DeviceBinding::open(Arc::clone(&self.backend), descriptor, &self.env, &self.config)?;
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session, Arc::new(Mutex::new(binding)));
        tracing::debug!(session, "host session opened");
        Ok(session)
    }

    /// Open the single-camera color preview graph.
    pub fn open_preview(&self) -> Result<u64> {
        self.open(PipelineDescriptor::color_preview())
    }

    fn session(&self, session: u64) -> Result<Arc<Mutex<DeviceBinding>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session)
            .cloned()
            .ok_or(Error::UnknownSession(session))
    }

    /// Wait up to `timeout_ms` for the next frame on `channel`.
    ///
    /// The wait holds no session lock, so a concurrent [`close`](Self::close)
    /// ends it early with `ChannelError::Closed`.
    pub fn get(&self, session: u64, channel: &str, timeout_ms: u64) -> Result<HostFrame> {
        let channel = {
            let binding = self.session(session)?;
            let binding = binding.lock().unwrap_or_else(|e| e.into_inner());
            binding
                .channel(channel)
                .cloned()
                .ok_or_else(|| Error::UnknownChannel(channel.to_string()))?
        };
        let frame = channel.get(Duration::from_millis(timeout_ms))?;
        Ok(frame.into())
    }

    pub fn channel_names(&self, session: u64) -> Result<Vec<String>> {
        let binding = self.session(session)?;
        let names = binding.lock().unwrap_or_else(|e| e.into_inner()).channel_names();
        Ok(names)
    }

    /// Close a session. Unknown or already-closed ids are not an error.
    pub fn close(&self, session: u64) -> Result<()> {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session);
        match removed {
            Some(binding) => {
                tracing::debug!(session, "host session closed");
                binding.lock().unwrap_or_else(|e| e.into_inner()).close()
            }
            None => Ok(()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        let sessions: Vec<u64> = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        for session in sessions {
            let _ = self.close(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::error::ChannelError;
    use crate::usb::UsbContext;
    use std::ffi::c_void;

    fn host(sim: &SimulatedBackend) -> Host {
        let ctx = UsbContext::from_raw(std::ptr::NonNull::<c_void>::dangling().as_ptr()).unwrap();
        Host::new(
            Arc::new(sim.clone()),
            PlatformEnv::new().with_usb_context(ctx),
            SessionConfig::default(),
        )
    }

    #[test]
    fn test_greeting() {
        assert_eq!(greeting(), "Hello from Rust");
    }

    #[test]
    fn test_preview_session_round_trip() {
        let sim = SimulatedBackend::new();
        let host = host(&sim);
        let session = host.open_preview().unwrap();
        assert_eq!(host.channel_names(session).unwrap(), vec!["preview"]);

        assert!(matches!(
            host.get(session, "preview", 10),
            Err(Error::Channel(ChannelError::Timeout))
        ));
        sim.emit();
        let frame = host.get(session, "preview", 100).unwrap();
        assert_eq!((frame.width, frame.height), (300, 300));
        assert_eq!(frame.format, "BGR888i");
        assert_eq!(frame.data.len(), 300 * 300 * 3);

        host.close(session).unwrap();
        host.close(session).unwrap();
        assert_eq!(sim.stop_count(), 1);
    }

    #[test]
    fn test_close_interrupts_pending_get() {
        let sim = SimulatedBackend::new();
        let host = Arc::new(host(&sim));
        let session = host.open_preview().unwrap();

        let waiter = Arc::clone(&host);
        let pending = std::thread::spawn(move || waiter.get(session, "preview", u64::MAX));
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        host.close(session).unwrap();
        let result = pending.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Channel(ChannelError::Closed))));
        assert!(matches!(
            host.get(session, "preview", 10),
            Err(Error::UnknownSession(_))
        ));
        assert_eq!(sim.stop_count(), 1);
    }

    #[test]
    fn test_unknown_ids() {
        let sim = SimulatedBackend::new();
        let host = host(&sim);
        assert!(matches!(host.get(42, "preview", 1), Err(Error::UnknownSession(42))));

        let session = host.open_preview().unwrap();
        assert!(matches!(
            host.get(session, "depth", 1),
            Err(Error::UnknownChannel(name)) if name == "depth"
        ));
        assert!(host.close(42).is_ok());
    }
}
