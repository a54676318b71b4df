use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use depthai_session::{
    ChannelError, DeviceBackend, DeviceBinding, DeviceError, Error, ImageFrameType, OverflowPolicy,
    PipelineDescriptor, PlatformEnv, SessionConfig, SimulatedBackend, SourceKind, SourceParams,
    UsbContext,
};

const WAIT: Duration = Duration::from_millis(50);

fn platform_env() -> PlatformEnv {
    let ctx = UsbContext::from_raw(NonNull::<c_void>::dangling().as_ptr()).expect("non-null handle");
    PlatformEnv::new().with_usb_context(ctx)
}

fn open(sim: &SimulatedBackend, pipeline: PipelineDescriptor, config: &SessionConfig) -> depthai_session::Result<DeviceBinding> {
    DeviceBinding::open(Arc::new(sim.clone()), pipeline, &platform_env(), config)
}

#[test]
fn color_preview_delivers_each_frame_once() -> depthai_session::Result<()> {
    let sim = SimulatedBackend::new();
    let binding = open(&sim, PipelineDescriptor::color_preview(), &SessionConfig::default())?;

    assert_eq!(binding.channels().len(), 1);
    let preview = binding.channel("preview").expect("preview channel");

    assert_eq!(preview.get(WAIT).unwrap_err(), ChannelError::Timeout);

    assert_eq!(sim.emit(), 1);
    let frame = preview.get(WAIT)?;
    assert_eq!(frame.format(), ImageFrameType::BGR888i);
    assert_eq!(frame.byte_len(), 300 * 300 * 3);
    assert_eq!(frame.sequence_num(), 0);

    assert_eq!(preview.get(WAIT).unwrap_err(), ChannelError::Timeout);
    Ok(())
}

#[test]
fn one_channel_per_sink() -> depthai_session::Result<()> {
    let mut pipeline = PipelineDescriptor::new();
    let color = pipeline.add_source(SourceKind::ColorCamera, SourceParams::new().preview_size(64, 64));
    let mono = pipeline.add_source(SourceKind::MonoCamera, SourceParams::new().preview_size(64, 40));
    for (source, name) in [(color, "rgb"), (color, "rgb-copy"), (mono, "left")] {
        let sink = pipeline.add_sink(name)?;
        pipeline.link(source, sink)?;
    }

    let sim = SimulatedBackend::new();
    let binding = open(&sim, pipeline, &SessionConfig::default())?;
    assert_eq!(binding.channel_names(), vec!["rgb", "rgb-copy", "left"]);

    sim.emit();
    let left = binding.channel("left").expect("left channel").get(WAIT)?;
    assert_eq!(left.format(), ImageFrameType::GRAY8);
    assert_eq!((left.width(), left.height()), (64, 40));
    Ok(())
}

#[test]
fn close_twice_releases_once() -> depthai_session::Result<()> {
    let sim = SimulatedBackend::new();
    let mut binding = open(&sim, PipelineDescriptor::color_preview(), &SessionConfig::default())?;
    let device_id = binding.device().id.clone();

    binding.close()?;
    binding.close()?;

    assert!(!binding.is_open());
    assert!(!DeviceBinding::is_device_bound(&device_id));
    assert_eq!(sim.stop_count(), 1);
    assert_eq!(
        binding.channel("preview").expect("preview channel").get(WAIT).unwrap_err(),
        ChannelError::Closed
    );

    drop(binding);
    assert_eq!(sim.stop_count(), 1);
    Ok(())
}

#[test]
fn sequence_numbers_strictly_increase() -> depthai_session::Result<()> {
    let sim = SimulatedBackend::new();
    let config = SessionConfig::default()
        .with_queue_size(3)
        .with_overflow(OverflowPolicy::DropOldest);
    let binding = open(&sim, PipelineDescriptor::color_preview(), &config)?;
    let preview = binding.channel("preview").expect("preview channel");

    let mut seen = Vec::new();
    for round in 0..4 {
        for _ in 0..=round + 2 {
            sim.emit();
        }
        while let Ok(frame) = preview.try_get() {
            seen.push(frame.sequence_num());
        }
    }

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "not strictly increasing: {seen:?}");
    assert!(binding.dropped_frames() > 0);
    Ok(())
}

#[test]
fn open_without_context_fails_cleanly() {
    let sim = SimulatedBackend::new();
    let device_id = sim.discover().expect("discover")[0].id.clone();

    let err = DeviceBinding::open(
        Arc::new(sim.clone()),
        PipelineDescriptor::color_preview(),
        &PlatformEnv::new(),
        &SessionConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::Device(DeviceError::NoContext)));
    assert!(!DeviceBinding::is_device_bound(&device_id));
    assert_eq!(sim.context_calls(), 0);
    assert_eq!(sim.start_count(), 0);
}

#[test]
fn rejected_context_is_no_context() {
    let sim = SimulatedBackend::new();
    sim.set_reject_context(true);

    let err = open(&sim, PipelineDescriptor::color_preview(), &SessionConfig::default()).unwrap_err();
    assert_eq!(err.device_error(), Some(&DeviceError::NoContext));
    assert_eq!(sim.start_count(), 0);
}

#[test]
fn platform_context_reaches_the_transport() -> depthai_session::Result<()> {
    let sim = SimulatedBackend::new();
    let env = platform_env();
    let _binding = DeviceBinding::open(Arc::new(sim.clone()), PipelineDescriptor::color_preview(), &env, &SessionConfig::default())?;

    assert_eq!(sim.context_calls(), 1);
    assert_eq!(sim.last_context(), env.usb_context());
    Ok(())
}

#[test]
fn no_devices_is_not_found() {
    let sim = SimulatedBackend::without_devices();
    let err = open(&sim, PipelineDescriptor::color_preview(), &SessionConfig::default()).unwrap_err();
    assert_eq!(err.device_error(), Some(&DeviceError::NotFound));
}

#[test]
fn disconnect_surfaces_after_queued_frames() -> depthai_session::Result<()> {
    let sim = SimulatedBackend::new();
    let binding = open(&sim, PipelineDescriptor::color_preview(), &SessionConfig::default())?;
    let preview = binding.channel("preview").expect("preview channel");

    sim.emit();
    sim.disconnect();

    assert!(preview.get(WAIT).is_ok());
    assert_eq!(
        preview.get(WAIT).unwrap_err(),
        ChannelError::Device(DeviceError::Disconnected)
    );
    Ok(())
}
