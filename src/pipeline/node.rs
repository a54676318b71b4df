use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{CameraBoardSocket, ColorOrder};

/// Identifier of a node inside one [`PipelineDescriptor`](super::PipelineDescriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of device-side producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    ColorCamera,
    MonoCamera,
    StereoDepth,
}

impl SourceKind {
    /// Native node type name (e.g. `"ColorCamera"`).
    pub fn type_name(self) -> &'static str {
        match self {
            SourceKind::ColorCamera => "ColorCamera",
            SourceKind::MonoCamera => "MonoCamera",
            SourceKind::StereoDepth => "StereoDepth",
        }
    }

    /// Output port used by [`PipelineDescriptor::link`](super::PipelineDescriptor::link).
    pub fn default_output(self) -> &'static str {
        match self {
            SourceKind::ColorCamera => "preview",
            SourceKind::MonoCamera => "out",
            SourceKind::StereoDepth => "depth",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Source(SourceKind),
    /// Terminal node exposed to the host as a named output channel.
    Sink,
}

/// Source node parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceParams {
    pub board_socket: CameraBoardSocket,
    pub interleaved: bool,
    pub preview_size: (u32, u32),
    pub fps: f32,
    pub color_order: ColorOrder,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            board_socket: CameraBoardSocket::Auto,
            interleaved: false,
            preview_size: (300, 300),
            fps: 30.0,
            color_order: ColorOrder::Bgr,
        }
    }
}

impl SourceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board_socket(mut self, socket: CameraBoardSocket) -> Self {
        self.board_socket = socket;
        self
    }

    pub fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    pub fn preview_size(mut self, width: u32, height: u32) -> Self {
        self.preview_size = (width, height);
        self
    }

    pub fn fps(mut self, fps: f32) -> Self {
        self.fps = fps;
        self
    }

    pub fn color_order(mut self, order: ColorOrder) -> Self {
        self.color_order = order;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) alias: String,
    pub(crate) params: Option<SourceParams>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Sink name, or a generated alias (`colorcamera_0`) for sources.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn params(&self) -> Option<&SourceParams> {
        self.params.as_ref()
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.kind, NodeKind::Sink)
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        match self.kind {
            NodeKind::Source(kind) => Some(kind),
            NodeKind::Sink => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Source(kind) => kind.type_name(),
            NodeKind::Sink => "XLinkOut",
        }
    }
}

/// Directed connection `from.from_port -> to.to_port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: NodeId,
    pub from_port: String,
    pub to: NodeId,
    pub to_port: String,
}
