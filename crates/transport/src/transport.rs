use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use snafu::Snafu;

pub const DEFAULT_CHAT_METHOD: &str = "ai_integration.api.chat.send_message";
pub const DEFAULT_EMBEDDINGS_METHOD: &str = "ai_integration.ai_integration.doctype.ai_integration_settings.ai_integration_settings.generate_all_embeddings";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Embedding jobs run synchronously on some backends and can take minutes.
pub const DEFAULT_EMBEDDINGS_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: String,
    pub api_key: String,
    pub api_secret: String,
    pub chat_method: String,
    pub embeddings_method: String,
    pub request_timeout: Duration,
    pub embeddings_timeout: Duration,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().trim_end_matches('/').to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            chat_method: DEFAULT_CHAT_METHOD.to_string(),
            embeddings_method: DEFAULT_EMBEDDINGS_METHOD.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            embeddings_timeout: DEFAULT_EMBEDDINGS_TIMEOUT,
        }
    }

    pub fn with_credentials(
        mut self,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.api_key = api_key.into().trim().to_string();
        self.api_secret = api_secret.into().trim().to_string();
        self
    }

    pub fn with_chat_method(mut self, method: impl Into<String>) -> Self {
        self.chat_method = method.into().trim().to_string();
        self
    }

    pub fn with_embeddings_method(mut self, method: impl Into<String>) -> Self {
        self.embeddings_method = method.into().trim().to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_embeddings_timeout(mut self, timeout: Duration) -> Self {
        self.embeddings_timeout = timeout;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// `{endpoint}/api/method/{method}`, the whitelisted RPC route.
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/api/method/{}", self.endpoint, method.trim_matches('/'))
    }
}

/// What the backend said about one chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendReply {
    /// Markdown answer text, still untrusted.
    Response(String),
    /// The backend handled the call but reported an application error.
    Error(String),
    /// Neither a response nor an error was present.
    Empty,
}

impl BackendReply {
    /// Interprets a decoded RPC body.
    ///
    /// Accepts `{"message": {"response": ..}}`, `{"message": {"error": ..}}` and
    /// the bare `{"message": "text"}` shape; anything else is [`BackendReply::Empty`].
    pub fn from_payload(payload: &Value) -> Self {
        match payload.get("message") {
            Some(Value::Object(message)) => {
                if let Some(text) = message.get("response").and_then(truthy_text) {
                    Self::Response(text)
                } else if let Some(text) = message.get("error").and_then(truthy_text) {
                    Self::Error(text)
                } else {
                    Self::Empty
                }
            }
            Some(Value::String(text)) if !text.is_empty() => Self::Response(text.clone()),
            _ => Self::Empty,
        }
    }
}

fn truthy_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("no backend endpoint configured"))]
    MissingEndpoint { stage: &'static str },
    #[snafu(display("api key and api secret must be configured together"))]
    IncompleteCredentials { stage: &'static str },
    #[snafu(display("rpc method for `{stage}` is empty"))]
    MissingMethod { stage: &'static str },
    #[snafu(display("refusing to send an empty chat message"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    Http {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode backend payload on `{stage}`, {source}"))]
    DecodePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl TransportError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingEndpoint { stage }
            | Self::IncompleteCredentials { stage }
            | Self::MissingMethod { stage }
            | Self::EmptyMessage { stage }
            | Self::Http { stage, .. }
            | Self::Status { stage, .. }
            | Self::DecodePayload { stage, .. } => stage,
        }
    }
}

/// Sends one chat message and resolves to the backend's reply.
///
/// The returned future owns everything it needs so callers can hold it across
/// mutations of their own state.
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, message: &str) -> BoxFuture<'static, TransportResult<BackendReply>>;
}

/// Starts backend-side embedding generation. Fire and forget on the backend;
/// the future resolves once the job was accepted.
pub trait EmbeddingTrigger: Send + Sync {
    fn generate_embeddings(&self) -> BoxFuture<'static, TransportResult<()>>;
}
