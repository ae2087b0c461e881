use deskchat_render::{RenderPipeline, escape_html};
use deskchat_transport::{BackendReply, TransportError, TransportResult};

use crate::chat::message::TurnId;

pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error.";
pub const EMPTY_RESPONSE_MESSAGE: &str = "Something went wrong.";
pub const BACKEND_ERROR_PREFIX: &str = "Error: ";

/// Emitted when the user submits a prompt for the active conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub turn: TurnId,
    pub content: String,
}

impl Submit {
    pub fn new(turn: TurnId, content: impl Into<String>) -> Self {
        Self {
            turn,
            content: content.into(),
        }
    }
}

/// How one turn resolved, mapped into chat domain language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Untrusted markdown from the backend.
    Reply(String),
    BackendError(String),
    EmptyResponse,
    /// The request never produced a usable payload.
    TransportFailed { stage: &'static str },
}

impl TurnOutcome {
    pub fn from_transport(result: TransportResult<BackendReply>) -> Self {
        match result {
            Ok(BackendReply::Response(text)) => Self::Reply(text),
            Ok(BackendReply::Error(text)) => Self::BackendError(text),
            Ok(BackendReply::Empty) => Self::EmptyResponse,
            Err(error) => Self::transport_failed(&error),
        }
    }

    fn transport_failed(error: &TransportError) -> Self {
        Self::TransportFailed {
            stage: error.stage(),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Reply(_))
    }

    /// HTML for the assistant message that records this outcome.
    ///
    /// Only replies go through the render pipeline; status lines are escaped text.
    pub fn to_message_html(&self, pipeline: &RenderPipeline) -> String {
        match self {
            Self::Reply(text) => pipeline.render(text),
            Self::BackendError(text) => escape_html(&format!("{BACKEND_ERROR_PREFIX}{text}")),
            Self::EmptyResponse => EMPTY_RESPONSE_MESSAGE.to_string(),
            Self::TransportFailed { .. } => CONNECTION_ERROR_MESSAGE.to_string(),
        }
    }
}
