//! Text-generation collaborator.
//!
//! [`Generator::generate_stream`] returns a finite, non-restartable stream
//! of text fragments. Dropping the stream drops the underlying HTTP
//! response, which is how a disconnected consumer stops generation.
//!
//! The Ollama implementation talks to `POST /api/chat` with
//! `"stream": true`; the response is NDJSON, one object per fragment:
//!
//! ```text
//! {"message":{"role":"assistant","content":"The"},"done":false}
//! {"message":{"role":"assistant","content":" answer"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Stream the answer to `prompt`. `system` is sent as a separate
    /// system-level instruction when present.
    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError>;

    /// Full answer as one string.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String, GenerationError> {
        let mut stream = self.generate_stream(prompt, system).await?;
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate_stream(
        &self,
        _prompt: &str,
        _system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    idle_timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            idle_timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": prompt }));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        debug!(model = %self.model, "sending chat request");
        let send = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| GenerationError::Unreachable("timed out waiting for response".into()))?
            .map_err(|e| GenerationError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| e.to_string()));
        Ok(ndjson_fragments(bytes, self.idle_timeout))
    }
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

struct NdjsonState {
    bytes: BoxStream<'static, Result<Vec<u8>, String>>,
    buffer: Vec<u8>,
    idle_timeout: Duration,
    eof: bool,
    done: bool,
}

/// Turn a byte stream of Ollama chat NDJSON into content fragments.
///
/// Lines may be split across network reads; bytes are buffered until a
/// newline so multi-byte characters are never cut. The stream ends after
/// the line carrying `"done": true`, or with an error if the body ends,
/// stalls for longer than `idle_timeout`, or reports an `error` object.
pub(crate) fn ndjson_fragments<S>(bytes: S, idle_timeout: Duration) -> FragmentStream
where
    S: futures::Stream<Item = Result<Vec<u8>, String>> + Send + 'static,
{
    let state = NdjsonState {
        bytes: bytes.boxed(),
        buffer: Vec::new(),
        idle_timeout,
        eof: false,
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                match parse_chat_line(&line) {
                    Ok(None) => continue,
                    Ok(Some((content, done))) => {
                        st.done = done;
                        if !content.is_empty() {
                            return Some((Ok(content), st));
                        }
                        continue;
                    }
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.eof {
                st.done = true;
                return Some((
                    Err(GenerationError::Stream(
                        "response ended before completion".into(),
                    )),
                    st,
                ));
            }

            match tokio::time::timeout(st.idle_timeout, st.bytes.next()).await {
                Err(_) => {
                    st.done = true;
                    return Some((
                        Err(GenerationError::Stream(format!(
                            "no data for {}s",
                            st.idle_timeout.as_secs()
                        ))),
                        st,
                    ));
                }
                Ok(Some(Ok(chunk))) => st.buffer.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    st.done = true;
                    return Some((Err(GenerationError::Stream(e)), st));
                }
                Ok(None) => {
                    st.eof = true;
                    // A final line without a trailing newline.
                    if st.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        st.buffer.push(b'\n');
                    }
                }
            }
        }
    })
    .boxed()
}

/// `Ok(None)` for blank lines, otherwise the fragment and the done flag.
fn parse_chat_line(line: &[u8]) -> Result<Option<(String, bool)>, GenerationError> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    let parsed: ChatLine = serde_json::from_slice(line)
        .map_err(|e| GenerationError::Stream(format!("malformed stream line: {}", e)))?;
    if let Some(err) = parsed.error {
        return Err(GenerationError::Stream(err));
    }
    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((content, parsed.done)))
}

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}
