use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, SessionId};
use crate::messages::GenerationMetrics;
use crate::state::LifecycleState;

/// Events emitted by the orchestrator during a generation cycle.
///
/// Everything except `StatusChanged` is addressed to the client that
/// submitted the request; status changes go to every connected client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "chunk")]
    Chunk {
        client_id: ClientId,
        session_id: SessionId,
        delta: String,
    },

    #[serde(rename = "title_assigned")]
    TitleAssigned {
        client_id: ClientId,
        session_id: SessionId,
        title: String,
    },

    #[serde(rename = "generation_complete")]
    GenerationComplete {
        client_id: ClientId,
        session_id: SessionId,
        text: String,
        metrics: GenerationMetrics,
    },

    /// Exactly one per successful stop request.
    #[serde(rename = "generation_stopped")]
    GenerationStopped {
        client_id: ClientId,
        session_id: Option<SessionId>,
    },

    #[serde(rename = "error")]
    Error {
        client_id: ClientId,
        session_id: Option<SessionId>,
        message: String,
    },

    #[serde(rename = "audio_ready")]
    AudioReady {
        client_id: ClientId,
        session_id: SessionId,
        file: String,
    },

    #[serde(rename = "status_changed")]
    StatusChanged { state: LifecycleState },
}

impl ChatEvent {
    /// Recipient of the event, or `None` for broadcasts.
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Self::Chunk { client_id, .. }
            | Self::TitleAssigned { client_id, .. }
            | Self::GenerationComplete { client_id, .. }
            | Self::GenerationStopped { client_id, .. }
            | Self::Error { client_id, .. }
            | Self::AudioReady { client_id, .. } => Some(client_id),
            Self::StatusChanged { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Chunk { session_id, .. }
            | Self::TitleAssigned { session_id, .. }
            | Self::GenerationComplete { session_id, .. }
            | Self::AudioReady { session_id, .. } => Some(session_id),
            Self::GenerationStopped { session_id, .. } | Self::Error { session_id, .. } => {
                session_id.as_ref()
            }
            Self::StatusChanged { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::TitleAssigned { .. } => "title_assigned",
            Self::GenerationComplete { .. } => "generation_complete",
            Self::GenerationStopped { .. } => "generation_stopped",
            Self::Error { .. } => "error",
            Self::AudioReady { .. } => "audio_ready",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}
