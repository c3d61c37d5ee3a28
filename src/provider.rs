//! Language-model providers.
//!
//! `ModelProvider` is the seam the pipeline calls. The bundled client speaks
//! the OpenAI-compatible chat-completions protocol, which also covers local
//! servers such as LM Studio or vLLM. Requests are sent once; there are no
//! retries.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, TsCastError};
use crate::formatting::strip_think_blocks;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub response_text: String,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub elapsed_seconds: f64,
}

pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, prompt: &str, temperature: f64, max_tokens: u32) -> Result<Prediction>;
}

/// Removes reasoning blocks (`<think>...</think>`) and surrounding whitespace.
pub fn clean_response(text: &str) -> String {
    strip_think_blocks(text)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL up to and including the API version, e.g.
    /// `https://api.openai.com/v1` or `http://localhost:1234/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub system_prompt: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: String::new(),
            api_key: None,
            timeout_ms: 120_000,
            system_prompt: None,
        }
    }
}

/// Blocking JSON POST used by [`OpenAiCompatibleProvider`].
pub trait HttpTransport: Send + Sync {
    fn post_json(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>>;
}

#[cfg(feature = "provider-http")]
pub struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "provider-http")]
impl ReqwestBlockingTransport {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| TsCastError::Provider(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "provider-http")]
impl HttpTransport for ReqwestBlockingTransport {
    fn post_json(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|err| TsCastError::Provider(format!("request to {url} failed: {err}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .map_err(|err| {
                TsCastError::Provider(format!("failed reading body from {url}: {err}"))
            })?;
        if !status.is_success() {
            let snippet: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            return Err(TsCastError::Provider(format!(
                "unexpected HTTP status {status} from {url}: {snippet}"
            )));
        }
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    transport: Box<dyn HttpTransport>,
}

impl OpenAiCompatibleProvider {
    #[cfg(feature = "provider-http")]
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let transport = ReqwestBlockingTransport::new(config.timeout_ms)?;
        Self::with_transport(config, Box::new(transport))
    }

    pub fn with_transport(
        config: ProviderConfig,
        transport: Box<dyn HttpTransport>,
    ) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(TsCastError::validation("provider model name is empty"));
        }
        if config.base_url.trim().is_empty() {
            return Err(TsCastError::validation("provider base_url is empty"));
        }
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, prompt: &str, temperature: f64, max_tokens: u32) -> Result<Vec<u8>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.config.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
            max_tokens,
        };
        Ok(serde_json::to_vec(&request)?)
    }
}

impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn predict(&self, prompt: &str, temperature: f64, max_tokens: u32) -> Result<Prediction> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(TsCastError::validation(format!(
                "temperature {temperature} outside [0, 2]"
            )));
        }
        let url = self.endpoint();
        let body = self.request_body(prompt, temperature, max_tokens)?;
        debug!(
            component = "provider",
            event = "provider.request.start",
            model = %self.config.model,
            url = %url,
            prompt_chars = prompt.len()
        );

        let started = Instant::now();
        let raw = self
            .transport
            .post_json(&url, self.config.api_key.as_deref(), &body)?;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        let parsed: ChatResponse = serde_json::from_slice(&raw)
            .map_err(|err| TsCastError::Provider(format!("malformed completion payload: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| TsCastError::Provider("completion has no message content".to_string()))?;
        let (prompt_tokens, response_tokens) = match parsed.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => {
                warn!(
                    component = "provider",
                    event = "provider.usage.missing",
                    model = %self.config.model
                );
                (0, 0)
            }
        };

        info!(
            component = "provider",
            event = "provider.request.finish",
            model = %self.config.model,
            prompt_tokens,
            response_tokens,
            elapsed_seconds
        );
        Ok(Prediction {
            response_text: clean_response(&content),
            prompt_tokens,
            response_tokens,
            elapsed_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockTransport {
        response: Result<Vec<u8>>,
        seen: Mutex<Vec<(String, Option<String>, serde_json::Value)>>,
    }

    impl MockTransport {
        fn replying(body: &str) -> Self {
            Self {
                response: Ok(body.as_bytes().to_vec()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpTransport for MockTransport {
        fn post_json(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>> {
            self.seen.lock().unwrap().push((
                url.to_string(),
                bearer.map(str::to_string),
                serde_json::from_slice(body).unwrap(),
            ));
            match &self.response {
                Ok(bytes) => Ok(bytes.clone()),
                Err(err) => Err(TsCastError::Provider(err.to_string())),
            }
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig {
            base_url: "http://localhost:1234/v1/".to_string(),
            model: "qwen2.5-7b".to_string(),
            api_key: Some("secret".to_string()),
            system_prompt: Some("You forecast.".to_string()),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn predict_posts_chat_request_and_reads_usage() {
        let transport = std::sync::Arc::new(MockTransport::replying(
            r#"{"choices":[{"message":{"role":"assistant","content":"<think>hmm</think>\n<out>[1.0, 2.0]</out>"}}],"usage":{"prompt_tokens":120,"completion_tokens":9}}"#,
        ));

        struct Shared(std::sync::Arc<MockTransport>);
        impl HttpTransport for Shared {
            fn post_json(&self, url: &str, bearer: Option<&str>, body: &[u8]) -> Result<Vec<u8>> {
                self.0.post_json(url, bearer, body)
            }
        }

        let shared = Box::new(Shared(transport.clone()));
        let provider = OpenAiCompatibleProvider::with_transport(config(), shared).unwrap();
        let prediction = provider.predict("forecast please", 0.2, 256).unwrap();

        assert_eq!(prediction.response_text, "<out>[1.0, 2.0]</out>");
        assert_eq!(prediction.prompt_tokens, 120);
        assert_eq!(prediction.response_tokens, 9);
        assert!(prediction.elapsed_seconds >= 0.0);

        let seen = transport.seen.lock().unwrap();
        let (url, bearer, body) = &seen[0];
        assert_eq!(url, "http://localhost:1234/v1/chat/completions");
        assert_eq!(bearer.as_deref(), Some("secret"));
        assert_eq!(body["model"], "qwen2.5-7b");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "forecast please");
    }

    #[test]
    fn missing_content_is_a_provider_error() {
        let provider = OpenAiCompatibleProvider::with_transport(
            config(),
            Box::new(MockTransport::replying(r#"{"choices":[]}"#)),
        )
        .unwrap();
        assert!(matches!(
            provider.predict("x", 0.0, 10),
            Err(TsCastError::Provider(_))
        ));
    }

    #[test]
    fn transport_failures_and_bad_settings_surface() {
        let failing = MockTransport {
            response: Err(TsCastError::Provider("connection refused".to_string())),
            seen: Mutex::new(Vec::new()),
        };
        let provider =
            OpenAiCompatibleProvider::with_transport(config(), Box::new(failing)).unwrap();
        let err = provider.predict("x", 0.5, 10).unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(matches!(
            provider.predict("x", 3.5, 10),
            Err(TsCastError::Validation(_))
        ));

        let unnamed = ProviderConfig::default();
        assert!(OpenAiCompatibleProvider::with_transport(
            unnamed,
            Box::new(MockTransport::replying("{}"))
        )
        .is_err());
    }

    #[test]
    fn clean_response_strips_reasoning() {
        assert_eq!(
            clean_response("<think>\nstep 1\n</think>\n\n[1, 2]  "),
            "[1, 2]"
        );
        assert_eq!(clean_response("plain"), "plain");
    }
}
