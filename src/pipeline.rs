pub mod node;

pub use node::{Link, Node, NodeId, NodeKind, SourceKind, SourceParams};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, InvalidLinkError, Result};

/// Input port name used by [`PipelineDescriptor::link`].
pub const DEFAULT_INPUT_PORT: &str = "input";

/// Lightweight node information returned by [`PipelineDescriptor`] introspection helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNodeInfo {
    pub id: u32,
    pub alias: String,
    /// Node type name (e.g. `"ColorCamera"`, `"XLinkOut"`).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<SourceParams>,
}

/// Connection between two nodes (output -> input) in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConnectionInfo {
    #[serde(rename = "outputId")]
    pub output_id: u32,
    #[serde(rename = "outputName")]
    pub output_name: String,
    #[serde(rename = "inputId")]
    pub input_id: u32,
    #[serde(rename = "inputName")]
    pub input_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PipelineSchema {
    nodes: Vec<PipelineNodeInfo>,
    connections: Vec<PipelineConnectionInfo>,
}

/// Declarative description of a device pipeline: source and sink nodes plus the
/// links between them.
///
/// Building a descriptor has no side effects; nothing touches a device until the
/// descriptor is handed to [`DeviceBinding::open`](crate::device::DeviceBinding::open),
/// which takes it by value so it can no longer change.
///
/// # Example
/// ```ignore
/// let mut pipeline = PipelineDescriptor::new();
/// let cam = pipeline.add_source(SourceKind::ColorCamera, SourceParams::new().interleaved(true));
/// let out = pipeline.add_sink("preview")?;
/// pipeline.link(cam, out)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineDescriptor {
    nodes: Vec<Node>,
    links: Vec<Link>,
    next_id: u32,
}

impl PipelineDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// One interleaved color camera whose `preview` output feeds a sink named `"preview"`.
    pub fn color_preview() -> Self {
        let mut pipeline = Self::new();
        let cam = pipeline.add_source(SourceKind::ColorCamera, SourceParams::new().interleaved(true));
        let out = pipeline.push_node(NodeKind::Sink, "preview".to_string(), None);
        pipeline.links.push(Link {
            from: cam,
            from_port: SourceKind::ColorCamera.default_output().to_string(),
            to: out,
            to_port: DEFAULT_INPUT_PORT.to_string(),
        });
        pipeline
    }

    pub fn add_source(&mut self, kind: SourceKind, params: SourceParams) -> NodeId {
        let alias = format!("{}_{}", kind.type_name().to_lowercase(), self.next_id);
        self.push_node(NodeKind::Source(kind), alias, Some(params))
    }

    /// Add a sink. Its name becomes the name of the output channel.
    pub fn add_sink(&mut self, name: impl Into<String>) -> std::result::Result<NodeId, InvalidLinkError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidLinkError::EmptySinkName);
        }
        if self.sinks().any(|n| n.alias == name) {
            return Err(InvalidLinkError::DuplicateSink(name));
        }
        Ok(self.push_node(NodeKind::Sink, name, None))
    }

    /// Link `from`'s default output to `to`'s `"input"` port.
    pub fn link(&mut self, from: NodeId, to: NodeId) -> std::result::Result<(), InvalidLinkError> {
        let from_port = self
            .node(from)
            .and_then(Node::source_kind)
            .map(SourceKind::default_output)
            .unwrap_or("out")
            .to_string();
        self.link_ports(from, from_port, to, DEFAULT_INPUT_PORT)
    }

    /// Link `from.from_port -> to.to_port`.
    ///
    /// On error the descriptor is left untouched.
    pub fn link_ports(
        &mut self,
        from: NodeId,
        from_port: impl Into<String>,
        to: NodeId,
        to_port: impl Into<String>,
    ) -> std::result::Result<(), InvalidLinkError> {
        let from_node = self.node(from).ok_or(InvalidLinkError::UnknownNode(from))?;
        let to_node = self.node(to).ok_or(InvalidLinkError::UnknownNode(to))?;

        if from_node.is_sink() {
            return Err(InvalidLinkError::SinkNotTerminal(from));
        }
        if from == to {
            return Err(InvalidLinkError::SelfLink(from));
        }

        let link = Link {
            from,
            from_port: from_port.into(),
            to,
            to_port: to_port.into(),
        };
        if self.links.contains(&link) {
            return Err(InvalidLinkError::DuplicateLink {
                from,
                from_port: link.from_port,
                to,
                to_port: link.to_port,
            });
        }
        if to_node.is_sink() && self.links.iter().any(|l| l.to == to) {
            return Err(InvalidLinkError::SinkAlreadyLinked(to));
        }
        if self.reachable(to, from) {
            return Err(InvalidLinkError::Cycle { from, to });
        }

        self.links.push(link);
        Ok(())
    }

    /// Check that the graph can be compiled: every sink is fed by exactly one node.
    pub fn validate(&self) -> std::result::Result<(), InvalidLinkError> {
        for sink in self.sinks() {
            if !self.links.iter().any(|l| l.to == sink.id) {
                return Err(InvalidLinkError::UnconnectedSink(sink.id));
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_sink())
    }

    pub fn sources(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_sink())
    }

    pub fn sink_by_name(&self, name: &str) -> Option<&Node> {
        self.sinks().find(|n| n.alias == name)
    }

    /// The node directly linked into `sink`, if any. Not followed further upstream.
    pub fn upstream_of(&self, sink: NodeId) -> Option<&Node> {
        self.links
            .iter()
            .find(|l| l.to == sink)
            .and_then(|l| self.node(l.from))
    }

    pub fn all_nodes(&self) -> Vec<PipelineNodeInfo> {
        self.nodes
            .iter()
            .map(|n| PipelineNodeInfo {
                id: n.id.0,
                alias: n.alias.clone(),
                name: n.type_name().to_string(),
                params: n.params.clone(),
            })
            .collect()
    }

    pub fn connections(&self) -> Vec<PipelineConnectionInfo> {
        self.links
            .iter()
            .map(|l| PipelineConnectionInfo {
                output_id: l.from.0,
                output_name: l.from_port.clone(),
                input_id: l.to.0,
                input_name: l.to_port.clone(),
            })
            .collect()
    }

    /// Pipeline schema (nodes + connections) as JSON.
    pub fn schema_json(&self) -> Result<serde_json::Value> {
        let schema = PipelineSchema {
            nodes: self.all_nodes(),
            connections: self.connections(),
        };
        Ok(serde_json::to_value(schema)?)
    }

    /// Rebuild a descriptor from [`schema_json`](Self::schema_json) output.
    ///
    /// Nodes and links are replayed through the regular builder operations, so
    /// a schema describing an invalid graph is rejected the same way.
    pub fn from_schema_json(value: &serde_json::Value) -> Result<Self> {
        let schema: PipelineSchema = serde_json::from_value(value.clone())?;
        let mut pipeline = Self::new();
        let mut ids = HashMap::with_capacity(schema.nodes.len());

        for info in &schema.nodes {
            let id = match info.name.as_str() {
                "XLinkOut" => pipeline.add_sink(info.alias.clone())?,
                name => {
                    let kind = match name {
                        "ColorCamera" => SourceKind::ColorCamera,
                        "MonoCamera" => SourceKind::MonoCamera,
                        "StereoDepth" => SourceKind::StereoDepth,
                        other => return Err(Error::Config(format!("unknown node type '{other}'"))),
                    };
                    pipeline.add_source(kind, info.params.clone().unwrap_or_default())
                }
            };
            ids.insert(info.id, id);
        }

        for conn in &schema.connections {
            let from = *ids
                .get(&conn.output_id)
                .ok_or(InvalidLinkError::UnknownNode(NodeId(conn.output_id)))?;
            let to = *ids
                .get(&conn.input_id)
                .ok_or(InvalidLinkError::UnknownNode(NodeId(conn.input_id)))?;
            pipeline.link_ports(from, conn.output_name.clone(), to, conn.input_name.clone())?;
        }

        pipeline.validate()?;
        Ok(pipeline)
    }

    fn push_node(&mut self, kind: NodeKind, alias: String, params: Option<SourceParams>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.push(Node { id, kind, alias, params });
        id
    }

    /// Whether `target` can be reached from `start` following links forward.
    fn reachable(&self, start: NodeId, target: NodeId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.links.iter().filter(|l| l.from == id).map(|l| l.to));
            }
        }
        false
    }
}
