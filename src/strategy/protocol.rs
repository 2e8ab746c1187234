//! Host ⇄ worker message protocol
//!
//! Every message is an envelope `{"type": ..., "payload": ...}`. Inside the
//! process the typed enums travel over channels by value; the JSON form is
//! what `graphforce worker` speaks on stdin/stdout.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, StructuralError};
use crate::model::{EdgeSnapshot, NodePosition, NodeSnapshot};
use crate::settings::{Settings, SettingsPatch};

/// Messages from the host to the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum HostMessage {
    /// Replace the whole graph and settings
    Init {
        #[serde(default)]
        nodes: Vec<NodeSnapshot>,
        #[serde(default)]
        edges: Vec<EdgeSnapshot>,
        #[serde(default)]
        settings: Settings,
    },
    Start,
    Stop,
    Kick {
        intensity: f64,
    },
    UpdateSettings {
        settings: SettingsPatch,
    },
    AddNode {
        node: NodeSnapshot,
    },
    RemoveNode {
        node_id: String,
    },
    AddEdge {
        edge: EdgeSnapshot,
    },
    RemoveEdge {
        source_id: String,
        target_id: String,
    },
    UpdateNodeState {
        node_id: String,
        is_fixed: bool,
        is_pinned: bool,
        #[serde(default, with = "xyz", skip_serializing_if = "Option::is_none")]
        position: Option<DVec3>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mass: Option<f64>,
    },
}

/// `{x, y, z}` objects for optional positions, matching `positionsUpdate`
mod xyz {
    use glam::DVec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Xyz {
        x: f64,
        y: f64,
        z: f64,
    }

    pub fn serialize<S: Serializer>(
        position: &Option<DVec3>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        position
            .map(|p| Xyz {
                x: p.x,
                y: p.y,
                z: p.z,
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DVec3>, D::Error> {
        let position = Option::<Xyz>::deserialize(deserializer)?;
        Ok(position.map(|p| DVec3::new(p.x, p.y, p.z)))
    }
}

impl HostMessage {
    /// Wire name of this message
    pub fn name(&self) -> &'static str {
        match self {
            HostMessage::Init { .. } => "init",
            HostMessage::Start => "start",
            HostMessage::Stop => "stop",
            HostMessage::Kick { .. } => "kick",
            HostMessage::UpdateSettings { .. } => "updateSettings",
            HostMessage::AddNode { .. } => "addNode",
            HostMessage::RemoveNode { .. } => "removeNode",
            HostMessage::AddEdge { .. } => "addEdge",
            HostMessage::RemoveEdge { .. } => "removeEdge",
            HostMessage::UpdateNodeState { .. } => "updateNodeState",
        }
    }
}

/// Messages from the simulation back to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum WorkerMessage {
    /// Positions after one step
    PositionsUpdate {
        positions: Vec<NodePosition>,
        energy: f64,
    },
    /// The layout settled; no more updates until re-energized
    Stopped { energy: f64 },
    /// A mutation was rejected inside the worker
    Rejected { error: StructuralError },
    /// A message could not be processed at all
    Error { message: String },
}

/// Encode a host message as one JSON line
pub fn encode_host(message: &HostMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a host message from JSON
pub fn decode_host(text: &str) -> Result<HostMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a worker message as one JSON line
pub fn encode_worker(message: &WorkerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a worker message from JSON
pub fn decode_worker(text: &str) -> Result<WorkerMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
