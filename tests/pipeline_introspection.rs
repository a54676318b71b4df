use depthai_session::pipeline::{PipelineConnectionInfo, PipelineDescriptor};
use depthai_session::{ColorOrder, InvalidLinkError, NodeId, SourceKind, SourceParams};

#[test]
fn pipeline_schema_and_connections_without_hardware() -> depthai_session::Result<()> {
    // Building and inspecting a descriptor never needs a device.
    let mut pipeline = PipelineDescriptor::new();
    let left = pipeline.add_source(SourceKind::MonoCamera, SourceParams::new().preview_size(640, 400));
    let depth = pipeline.add_source(SourceKind::StereoDepth, SourceParams::new().preview_size(640, 400));
    let color = pipeline.add_source(
        SourceKind::ColorCamera,
        SourceParams::new().interleaved(true).color_order(ColorOrder::Rgb),
    );
    let depth_out = pipeline.add_sink("depth")?;
    let rgb_out = pipeline.add_sink("rgb")?;

    pipeline.link_ports(left, "out", depth, "left")?;
    pipeline.link(depth, depth_out)?;
    pipeline.link(color, rgb_out)?;
    pipeline.validate()?;

    let nodes = pipeline.all_nodes();
    assert_eq!(nodes.len(), 5);
    assert!(nodes.iter().any(|n| n.name == "StereoDepth"));
    assert_eq!(nodes.iter().filter(|n| n.name == "XLinkOut").count(), 2);

    let conns = pipeline.connections();
    assert!(
        conns
            .iter()
            .any(|c: &PipelineConnectionInfo| c.output_name == "out" && c.input_name == "left"),
        "expected the mono -> stereo link in connections()"
    );
    assert!(conns.iter().any(|c| c.output_name == "depth" && c.input_id == depth_out.0));

    // Schema uses the device-side field names.
    let schema = pipeline.schema_json()?;
    assert!(schema.is_object(), "schema should be a JSON object");
    let first = &schema["connections"][0];
    assert!(first.get("outputId").is_some() && first.get("inputName").is_some());

    let rebuilt = PipelineDescriptor::from_schema_json(&schema)?;
    assert_eq!(rebuilt.connections(), conns);
    assert_eq!(rebuilt.all_nodes(), nodes);

    Ok(())
}

#[test]
fn link_to_unknown_node_leaves_descriptor_unmodified() {
    let mut pipeline = PipelineDescriptor::color_preview();
    let before = pipeline.clone();
    let cam = pipeline.sources().next().map(|n| n.id()).unwrap();

    let err = pipeline.link(cam, NodeId(99)).unwrap_err();
    assert_eq!(err, InvalidLinkError::UnknownNode(NodeId(99)));
    assert_eq!(pipeline, before);
}

#[test]
fn schema_with_invalid_link_is_rejected() {
    let mut pipeline = PipelineDescriptor::color_preview();
    pipeline.add_sink("spare").unwrap();
    let mut schema = pipeline.schema_json().unwrap();

    // Point a second connection at the already-fed preview sink.
    let conns = schema["connections"].as_array_mut().unwrap();
    let mut duplicate = conns[0].clone();
    duplicate["outputName"] = "video".into();
    conns.push(duplicate);

    let err = PipelineDescriptor::from_schema_json(&schema).unwrap_err();
    assert!(matches!(
        err,
        depthai_session::Error::InvalidLink(InvalidLinkError::SinkAlreadyLinked(_))
    ));
}
