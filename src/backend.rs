//! Seam to the vision SDK
//!
//! A [`DeviceBackend`] enumerates devices and compiles a pipeline descriptor
//! onto one of them. The rest of the crate never talks to hardware directly.

pub mod simulated;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::pipeline::PipelineDescriptor;
use crate::queue::FrameSender;
use crate::usb::UsbTransport;

pub use simulated::{EmissionMode, SimulatedBackend};

/// Link protocol a device was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceProtocol {
    UsbVsc,
    TcpIp,
    Simulated,
}

/// A discoverable device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier (MXID on real hardware). Used for exclusive ownership.
    pub id: String,
    pub name: String,
    pub protocol: DeviceProtocol,
}

/// The SDK collaborator: device enumeration plus pipeline start.
pub trait DeviceBackend: UsbTransport + Send + Sync {
    /// List devices currently reachable.
    fn discover(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Compile `descriptor` onto `device` and start streaming.
    ///
    /// `outputs` holds one sender per sink, named after the sink. The backend
    /// owns them from here on; they must all be dropped by the time
    /// [`RunningPipeline::stop`] returns, or when this call fails.
    fn start(
        &self,
        device: &DeviceInfo,
        descriptor: &PipelineDescriptor,
        outputs: Vec<FrameSender>,
    ) -> Result<Box<dyn RunningPipeline>, DeviceError>;
}

/// A pipeline running on a device.
pub trait RunningPipeline: Send {
    /// Stop streaming and release the device side. Called at most once.
    fn stop(&mut self);
}
