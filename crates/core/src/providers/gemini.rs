use crate::error::ServiceError;
use crate::traits::{Embedder, LanguageModel};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

const EMBEDDING_SERVICE: &str = "gemini-embeddings";
const CHAT_SERVICE: &str = "gemini-chat";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: "embedding-001".to_string(),
            chat_model: "gemini-pro".to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl GeminiConfig {
    fn method_url(&self, model: &str, method: &str) -> Result<Url, ServiceError> {
        let mut base = self.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let model = model.trim_start_matches("models/");
        Ok(Url::parse(&base)?.join(&format!("models/{model}:{method}"))?)
    }

    fn client(&self, service: &str) -> Result<Client, ServiceError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| ServiceError::from_http(service, error, self.timeout))
    }
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

/// Embedding client for the `embedContent` method.
pub struct GeminiEmbedder {
    config: GeminiConfig,
    endpoint: Url,
    client: Client,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiConfig) -> Result<Self, ServiceError> {
        let endpoint = config.method_url(&config.embedding_model, "embedContent")?;
        let client = config.client(EMBEDDING_SERVICE)?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let model = self.config.embedding_model.trim_start_matches("models/");
        let body = json!({
            "model": format!("models/{model}"),
            "content": { "parts": [{ "text": text }] },
        });

        let payload = post_json(
            &self.client,
            &self.endpoint,
            &self.config,
            EMBEDDING_SERVICE,
            &body,
        )
        .await?;
        parse_embedding(payload)
    }
}

fn parse_embedding(payload: Value) -> Result<Vec<f32>, ServiceError> {
    let parsed: EmbedContentResponse =
        serde_json::from_value(payload).map_err(|error| ServiceError::InvalidResponse {
            service: EMBEDDING_SERVICE.to_string(),
            details: error.to_string(),
        })?;

    match parsed.embedding {
        Some(embedding) if !embedding.values.is_empty() => Ok(embedding.values),
        _ => Err(ServiceError::InvalidResponse {
            service: EMBEDDING_SERVICE.to_string(),
            details: "response has no embedding values".to_string(),
        }),
    }
}

/// Text generation client for the `generateContent` method.
pub struct GeminiChatModel {
    config: GeminiConfig,
    endpoint: Url,
    client: Client,
}

impl GeminiChatModel {
    pub fn new(config: GeminiConfig) -> Result<Self, ServiceError> {
        let endpoint = config.method_url(&config.chat_model, "generateContent")?;
        let client = config.client(CHAT_SERVICE)?;
        Ok(Self {
            config,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiChatModel {
    fn model_name(&self) -> &str {
        &self.config.chat_model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.config.temperature },
        });

        let payload =
            post_json(&self.client, &self.endpoint, &self.config, CHAT_SERVICE, &body).await?;
        parse_completion(&payload)
    }
}

fn parse_completion(payload: &Value) -> Result<String, ServiceError> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let text = parts
        .iter()
        .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
        .collect::<String>();

    if text.is_empty() {
        let reason = payload
            .pointer("/promptFeedback/blockReason")
            .or_else(|| payload.pointer("/candidates/0/finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(ServiceError::InvalidResponse {
            service: CHAT_SERVICE.to_string(),
            details: format!("completion is empty ({reason})"),
        });
    }

    Ok(text)
}

async fn post_json(
    client: &Client,
    endpoint: &Url,
    config: &GeminiConfig,
    service: &str,
    body: &Value,
) -> Result<Value, ServiceError> {
    let response = client
        .post(endpoint.clone())
        .header("x-goog-api-key", &config.api_key)
        .json(body)
        .send()
        .await
        .map_err(|error| ServiceError::from_http(service, error, config.timeout))?;

    let status = response.status();
    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        return Err(ServiceError::Rejected {
            service: service.to_string(),
            status: status.as_u16(),
            details,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|error| ServiceError::from_http(service, error, config.timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response, or hangs forever when `response` is `None`.
    async fn one_shot_server(response: Option<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.expect("read");
                if read == 0 {
                    return;
                }
                received.extend_from_slice(&buffer[..read]);
                if request_complete(&received) {
                    break;
                }
            }
            match response {
                Some(response) => {
                    socket.write_all(response.as_bytes()).await.expect("write");
                    socket.shutdown().await.ok();
                }
                None => tokio::time::sleep(Duration::from_secs(60)).await,
            }
        });

        format!("http://{address}/v1beta/")
    }

    fn request_complete(received: &[u8]) -> bool {
        let text = String::from_utf8_lossy(received);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        received.len() >= header_end + 4 + content_length
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn config_for(base_url: String, timeout: Duration) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".to_string(),
            base_url,
            timeout,
            ..GeminiConfig::default()
        }
    }

    #[test]
    fn method_urls_are_built_under_the_base() -> Result<(), ServiceError> {
        let config = GeminiConfig {
            base_url: "https://example.test/v1beta".to_string(),
            ..GeminiConfig::default()
        };
        let url = config.method_url("models/embedding-001", "embedContent")?;
        assert_eq!(
            url.as_str(),
            "https://example.test/v1beta/models/embedding-001:embedContent"
        );
        Ok(())
    }

    #[test]
    fn completion_text_joins_all_parts() -> Result<(), ServiceError> {
        let payload = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Paris" }, { "text": " is the capital." }] } }]
        });
        assert_eq!(parse_completion(&payload)?, "Paris is the capital.");
        Ok(())
    }

    #[test]
    fn blocked_completion_is_an_error() {
        let payload = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        match parse_completion(&payload) {
            Err(ServiceError::InvalidResponse { details, .. }) => assert!(details.contains("SAFETY")),
            other => panic!("expected invalid response, got {other:?}"),
        }
    }

    #[test]
    fn embedding_without_values_is_an_error() {
        assert!(parse_embedding(json!({ "embedding": { "values": [] } })).is_err());
        assert!(parse_embedding(json!({})).is_err());
    }

    #[tokio::test]
    async fn embedder_reads_vector_from_service() -> Result<(), ServiceError> {
        let base = one_shot_server(Some(http_response(
            "200 OK",
            r#"{"embedding":{"values":[0.25,0.5,1.0]}}"#,
        )))
        .await;
        let embedder = GeminiEmbedder::new(config_for(base, Duration::from_secs(5)))?;

        let vector = embedder.embed("hello").await?;

        assert_eq!(vector, vec![0.25, 0.5, 1.0]);
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_are_retryable_rejections() -> Result<(), ServiceError> {
        let base = one_shot_server(Some(http_response("503 Service Unavailable", r#"{"error":"busy"}"#))).await;
        let model = GeminiChatModel::new(config_for(base, Duration::from_secs(5)))?;

        let error = model.complete("prompt").await.expect_err("503 must fail");

        assert!(matches!(error, ServiceError::Rejected { status: 503, .. }));
        assert!(error.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn slow_service_times_out() -> Result<(), ServiceError> {
        let base = one_shot_server(None).await;
        let model = GeminiChatModel::new(config_for(base, Duration::from_millis(200)))?;

        let error = model.complete("prompt").await.expect_err("hung server must time out");

        assert!(error.is_timeout(), "got {error:?}");
        assert!(error.is_retryable());
        Ok(())
    }
}
