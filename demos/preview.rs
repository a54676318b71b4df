use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;

use depthai_session::{
    AcquisitionLoop, DeviceBinding, EmissionMode, PipelineDescriptor, PlatformEnv, Result,
    SessionConfig, SimulatedBackend, StopAfterFrames, TestPattern,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SessionConfig::from_env()?;

    // Desktop USB stacks enumerate on their own; the simulator only needs a non-null handle.
    let mut platform_handle = 0u8;
    let env = PlatformEnv::from_raw(&mut platform_handle as *mut u8 as *mut c_void);

    let backend = SimulatedBackend::with_config(
        1,
        EmissionMode::Continuous {
            interval: Duration::from_millis(33),
        },
        TestPattern::Checkerboard,
    );
    let binding = DeviceBinding::open(Arc::new(backend), PipelineDescriptor::color_preview(), &env, &config)?;
    println!("Bound {} with channels {:?}", binding.device().id, binding.channel_names());

    let mut acquisition = AcquisitionLoop::new(config);
    acquisition.start(
        binding,
        |channel, frame| println!("{channel}: {} ({} bytes)", frame.describe(), frame.byte_len()),
        StopAfterFrames(10),
    )?;

    let report = acquisition.join()?;
    println!(
        "Stopped ({:?}) after {} frames, {} dropped, {:?}",
        report.reason, report.frames, report.dropped, report.elapsed
    );

    Ok(())
}
