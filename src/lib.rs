pub mod acquisition;
pub mod backend;
pub mod common;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod host;
pub mod pipeline;
pub mod queue;
pub mod usb;

// Re-export main types for convenience
pub use crate::acquisition::{
    AcquisitionLoop, CancellationToken, LoopReport, LoopState, LoopStats, Never, StopAfterFrames,
    StopCondition, StopReason,
};
pub use crate::backend::{DeviceBackend, DeviceInfo, DeviceProtocol, EmissionMode, RunningPipeline, SimulatedBackend};
pub use crate::common::{CameraBoardSocket, ColorOrder, ImageFrameType};
pub use crate::config::{OverflowPolicy, SessionConfig, CONFIG_ENV_VAR};
pub use crate::device::DeviceBinding;
pub use crate::error::{ChannelError, DeviceError, Error, InvalidLinkError, Result};
pub use crate::frame::{Frame, TestPattern};
pub use crate::host::{greeting, Host, HostFrame};
pub use crate::pipeline::{Link, Node, NodeId, NodeKind, PipelineDescriptor, SourceKind, SourceParams};
pub use crate::queue::{FrameSender, OutputChannel};
pub use crate::usb::{PlatformEnv, UsbContext, UsbTransport};
