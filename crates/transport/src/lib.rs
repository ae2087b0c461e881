#![deny(unsafe_code)]

//! Backend transport for chat turns and embedding jobs.

use std::sync::Arc;

mod frappe;
mod transport;

pub use frappe::{FRAPPE_TRANSPORT_NAME, FrappeTransport};
pub use transport::{
    BackendReply, BoxFuture, ChatTransport, DEFAULT_CHAT_METHOD, DEFAULT_EMBEDDINGS_METHOD,
    DEFAULT_EMBEDDINGS_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, EmbeddingTrigger, TransportConfig,
    TransportError, TransportResult,
};

/// Builds the chat transport for a configured backend.
pub fn create_transport(config: TransportConfig) -> TransportResult<Arc<dyn ChatTransport>> {
    Ok(Arc::new(FrappeTransport::new(config)?))
}

/// Builds the embedding trigger for a configured backend.
pub fn create_embedding_trigger(
    config: TransportConfig,
) -> TransportResult<Arc<dyn EmbeddingTrigger>> {
    Ok(Arc::new(FrappeTransport::new(config)?))
}
