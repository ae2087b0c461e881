use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use snafu::{ResultExt, ensure};

use super::transport::{
    BackendReply, BoxFuture, ChatTransport, DecodePayloadSnafu, EmbeddingTrigger, EmptyMessageSnafu,
    HttpSnafu, IncompleteCredentialsSnafu, MissingEndpointSnafu, MissingMethodSnafu, StatusSnafu,
    TransportConfig, TransportResult,
};

pub const FRAPPE_TRANSPORT_NAME: &str = "frappe";

/// Calls whitelisted methods on a Frappe site over `/api/method/*`.
#[derive(Debug, Clone)]
pub struct FrappeTransport {
    config: TransportConfig,
    client: Client,
}

impl FrappeTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        ensure!(
            !config.endpoint.is_empty(),
            MissingEndpointSnafu {
                stage: "frappe-transport-new",
            }
        );
        ensure!(
            config.api_key.is_empty() == config.api_secret.is_empty(),
            IncompleteCredentialsSnafu {
                stage: "frappe-transport-new",
            }
        );
        ensure!(
            !config.chat_method.is_empty(),
            MissingMethodSnafu { stage: "chat" }
        );

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context(HttpSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn post(&self, method: &str) -> RequestBuilder {
        let request = self
            .client
            .post(self.config.method_url(method))
            .header("Accept", "application/json");

        if self.config.has_credentials() {
            request.header(
                "Authorization",
                format!("token {}:{}", self.config.api_key, self.config.api_secret),
            )
        } else {
            request
        }
    }

    async fn call(request: RequestBuilder, method: String) -> TransportResult<Value> {
        tracing::debug!(method = %method, "opening backend rpc request");

        let response = request.send().await.context(HttpSnafu {
            stage: "send-rpc-request",
        })?;
        let status = response.status();
        let body = response.text().await.context(HttpSnafu {
            stage: "read-rpc-response",
        })?;

        if !status.is_success() {
            tracing::warn!(
                method = %method,
                status = status.as_u16(),
                body_len = body.len(),
                "backend rpc returned non-success status"
            );
            return StatusSnafu {
                stage: "rpc-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context(DecodePayloadSnafu {
            stage: "decode-rpc-response",
        })
    }

    async fn send_message(
        request: RequestBuilder,
        message: String,
        method: String,
    ) -> TransportResult<BackendReply> {
        ensure!(
            !message.is_empty(),
            EmptyMessageSnafu {
                stage: "send-chat-message",
            }
        );

        let payload = Self::call(request, method).await.inspect_err(|error| {
            tracing::warn!(stage = error.stage(), error = %error, "chat request failed");
        })?;
        Ok(BackendReply::from_payload(&payload))
    }

    async fn request_embeddings(request: RequestBuilder, method: String) -> TransportResult<()> {
        ensure!(
            !method.is_empty(),
            MissingMethodSnafu {
                stage: "generate-embeddings",
            }
        );

        tracing::info!(method = %method, "requesting embedding generation");
        Self::call(request, method.clone()).await?;
        tracing::info!(method = %method, "embedding generation accepted by backend");
        Ok(())
    }
}

impl ChatTransport for FrappeTransport {
    fn name(&self) -> &str {
        FRAPPE_TRANSPORT_NAME
    }

    fn send(&self, message: &str) -> BoxFuture<'static, TransportResult<BackendReply>> {
        let message = message.trim().to_string();
        let method = self.config.chat_method.clone();
        let request = self.post(&method).json(&json!({ "message": message }));
        Box::pin(Self::send_message(request, message, method))
    }
}

impl EmbeddingTrigger for FrappeTransport {
    fn generate_embeddings(&self) -> BoxFuture<'static, TransportResult<()>> {
        let method = self.config.embeddings_method.clone();
        // Overrides the client-wide chat timeout for this one call.
        let request = self.post(&method).timeout(self.config.embeddings_timeout);
        Box::pin(Self::request_embeddings(request, method))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    use super::*;
    use crate::transport::TransportError;

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = socket.read(&mut chunk).await.expect("read request");
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            let text = String::from_utf8_lossy(&buffer).to_string();
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buffer.len() >= header_end + 4 + content_length {
                return text;
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    /// Serves exactly one HTTP response and hands back the raw request it saw.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("listener address");
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept connection");
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            let _ = socket.shutdown().await;
            let _ = request_tx.send(request);
        });

        (format!("http://{address}"), request_rx)
    }

    fn transport(endpoint: &str) -> FrappeTransport {
        FrappeTransport::new(
            TransportConfig::new(endpoint)
                .with_credentials("key", "secret")
                .with_request_timeout(Duration::from_secs(5)),
        )
        .expect("valid config")
    }

    #[tokio::test]
    async fn posts_message_and_reads_response() {
        let (endpoint, request_rx) =
            serve_once("200 OK", r#"{"message":{"response":"You have **12** open invoices."}}"#).await;

        let reply = transport(&endpoint)
            .send("  How many invoices are open?  ")
            .await
            .expect("reply");
        assert_eq!(
            reply,
            BackendReply::Response("You have **12** open invoices.".to_string())
        );

        let request = request_rx.await.expect("captured request");
        assert!(request.starts_with("POST /api/method/ai_integration.api.chat.send_message "));
        assert!(request.to_ascii_lowercase().contains("authorization: token key:secret"));
        assert!(request.ends_with(r#"{"message":"How many invoices are open?"}"#));
    }

    #[tokio::test]
    async fn backend_error_payload_is_not_a_transport_error() {
        let (endpoint, _request_rx) =
            serve_once("200 OK", r#"{"message":{"error":"Gemini quota exceeded"}}"#).await;
        let reply = transport(&endpoint).send("hi").await.expect("reply");
        assert_eq!(reply, BackendReply::Error("Gemini quota exceeded".to_string()));
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let (endpoint, _request_rx) =
            serve_once("500 Internal Server Error", r#"{"exc_type":"ValidationError"}"#).await;
        let error = transport(&endpoint).send("hi").await.unwrap_err();
        assert!(matches!(error, TransportError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn malformed_body_is_transport_error() {
        let (endpoint, _request_rx) = serve_once("200 OK", "<html>login</html>").await;
        let error = transport(&endpoint).send("hi").await.unwrap_err();
        assert_eq!(error.stage(), "decode-rpc-response");
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("listener address");
        drop(listener);

        let error = transport(&format!("http://{address}"))
            .send("hi")
            .await
            .unwrap_err();
        assert!(matches!(error, TransportError::Http { .. }));
    }

    #[tokio::test]
    async fn empty_message_never_hits_the_network() {
        let error = transport("http://127.0.0.1:9").send("   ").await.unwrap_err();
        assert!(matches!(error, TransportError::EmptyMessage { .. }));
    }

    #[tokio::test]
    async fn triggers_embedding_generation() {
        let (endpoint, request_rx) = serve_once("200 OK", r#"{"message":null}"#).await;
        transport(&endpoint)
            .generate_embeddings()
            .await
            .expect("job accepted");

        let request = request_rx.await.expect("captured request");
        assert!(request.starts_with(
            "POST /api/method/ai_integration.ai_integration.doctype.ai_integration_settings.ai_integration_settings.generate_all_embeddings "
        ));
    }

    #[test]
    fn rejects_half_configured_credentials() {
        let error = FrappeTransport::new(
            TransportConfig::new("https://erp.example.com").with_credentials("key", ""),
        )
        .unwrap_err();
        assert!(matches!(error, TransportError::IncompleteCredentials { .. }));
    }

    #[test]
    fn rejects_missing_endpoint() {
        let error = FrappeTransport::new(TransportConfig::new("  ")).unwrap_err();
        assert!(matches!(error, TransportError::MissingEndpoint { .. }));
    }
}
