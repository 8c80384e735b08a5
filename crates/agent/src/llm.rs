//! Reasoning oracle boundary.
//!
//! The orchestrator talks to any language model through [`ReasoningOracle`]. The only
//! concrete backend is [`OllamaOracle`], which speaks the Ollama `/api/chat` protocol
//! with native tool declarations.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use regdesk_core::config::LlmConfig;

use crate::session::{OracleCheckpoint, Turn};
use crate::tools::{ActionCall, ActionSpec};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("reasoning oracle timed out")]
    Timeout,
    #[error("reasoning oracle unavailable: {0}")]
    Unavailable(String),
    #[error("reasoning oracle returned a malformed response: {0}")]
    Malformed(String),
}

/// Everything the oracle sees when choosing between a reply and an action.
#[derive(Clone, Copy, Debug)]
pub struct DecideRequest<'a> {
    pub instructions: &'a str,
    pub turns: &'a [Turn],
    pub checkpoint: Option<&'a OracleCheckpoint>,
    pub actions: &'a [ActionSpec],
    pub message: &'a str,
}

/// Follow-up after an action ran. `checkpoint` is the one returned with the decision.
#[derive(Clone, Copy, Debug)]
pub struct FinishRequest<'a> {
    pub instructions: &'a str,
    pub turns: &'a [Turn],
    pub checkpoint: Option<&'a OracleCheckpoint>,
    pub message: &'a str,
    pub call: &'a ActionCall,
    pub result: &'a str,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OracleReply {
    pub text: String,
    pub checkpoint: Option<OracleCheckpoint>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OracleDecision {
    Reply(OracleReply),
    Act { call: ActionCall, checkpoint: Option<OracleCheckpoint> },
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn decide(&self, request: DecideRequest<'_>) -> Result<OracleDecision, OracleError>;
    async fn finish(&self, request: FinishRequest<'_>) -> Result<OracleReply, OracleError>;
}

pub struct OllamaOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OllamaOracle {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| OracleError::Unavailable(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            max_retries: 0,
        })
    }

    /// Each attempt gets an equal share of `timeout_secs`, so retries fit inside the
    /// orchestrator's phase budget.
    pub fn from_config(config: &LlmConfig) -> Result<Self, OracleError> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        let phase = Duration::from_secs(config.timeout_secs);
        let oracle = Self::new(
            base_url,
            config.model.clone(),
            attempt_timeout(phase, config.max_retries),
        )?
        .with_max_retries(config.max_retries);
        Ok(match config.api_key.clone() {
            Some(key) => oracle.with_api_key(key),
            None => oracle,
        })
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    async fn chat(&self, messages: &[Value], tools: Option<Vec<Value>>) -> Result<Value, OracleError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": 0 },
        });
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools);
        }

        let mut attempt = 0;
        loop {
            match self.send(&body).await {
                Ok(message) => return Ok(message),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "oracle.request.retry",
                        attempt,
                        error = %failure.error,
                        "retrying oracle request"
                    );
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn send(&self, body: &Value) -> Result<Value, AttemptError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(AttemptError::transport)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                error: OracleError::Unavailable(format!("HTTP {status}: {detail}")),
                retryable: status.is_server_error(),
            });
        }

        let payload: Value = response.json().await.map_err(AttemptError::transport)?;
        match payload.get("message") {
            Some(message) if message.is_object() => Ok(message.clone()),
            _ => Err(AttemptError::fatal(OracleError::Malformed(
                "response has no `message` object".to_string(),
            ))),
        }
    }
}

/// Per-attempt client timeout that lets `max_retries + 1` attempts share one phase budget.
pub fn attempt_timeout(phase: Duration, max_retries: u32) -> Duration {
    phase / max_retries.saturating_add(1)
}

/// A failed request and whether sending it again could succeed. Only transport
/// failures and 5xx responses are retried.
struct AttemptError {
    error: OracleError,
    retryable: bool,
}

impl AttemptError {
    fn fatal(error: OracleError) -> Self {
        Self { error, retryable: false }
    }

    fn transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self { error: OracleError::Timeout, retryable: true }
        } else if error.is_decode() {
            Self::fatal(OracleError::Malformed(error.to_string()))
        } else {
            Self { error: OracleError::Unavailable(error.to_string()), retryable: true }
        }
    }
}

/// Prior transcript: the checkpoint when present, otherwise rebuilt from recorded turns.
fn prior_transcript(checkpoint: Option<&OracleCheckpoint>, turns: &[Turn]) -> Vec<Value> {
    if let Some(Value::Array(messages)) = checkpoint.map(|checkpoint| &checkpoint.0) {
        return messages.clone();
    }
    turns
        .iter()
        .flat_map(|turn| {
            [
                json!({ "role": "user", "content": turn.user }),
                json!({ "role": "assistant", "content": turn.assistant }),
            ]
        })
        .collect()
}

fn with_system(instructions: &str, transcript: &[Value]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    messages.push(json!({ "role": "system", "content": instructions }));
    messages.extend(transcript.iter().cloned());
    messages
}

fn message_text(message: &Value) -> String {
    message.get("content").and_then(Value::as_str).unwrap_or_default().trim().to_string()
}

/// First tool call in an assistant message. Arguments may arrive as an object or as
/// JSON-encoded text.
fn first_tool_call(message: &Value) -> Result<Option<ActionCall>, OracleError> {
    let Some(call) = message.get("tool_calls").and_then(Value::as_array).and_then(|c| c.first())
    else {
        return Ok(None);
    };

    let function = call
        .get("function")
        .ok_or_else(|| OracleError::Malformed("tool call has no `function`".to_string()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::Malformed("tool call has no name".to_string()))?;
    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|error| OracleError::Malformed(format!("tool arguments: {error}")))?,
        Some(value) => value.clone(),
        None => Value::Object(Default::default()),
    };

    Ok(Some(ActionCall::new(name, arguments)))
}

#[async_trait]
impl ReasoningOracle for OllamaOracle {
    async fn decide(&self, request: DecideRequest<'_>) -> Result<OracleDecision, OracleError> {
        let mut transcript = prior_transcript(request.checkpoint, request.turns);
        transcript.push(json!({ "role": "user", "content": request.message }));

        let tools = request.actions.iter().map(ActionSpec::to_tool_declaration).collect();
        let message = self.chat(&with_system(request.instructions, &transcript), Some(tools)).await?;
        let call = first_tool_call(&message)?;
        transcript.push(message.clone());
        let checkpoint = Some(OracleCheckpoint(Value::Array(transcript)));

        match call {
            Some(call) => {
                debug!(event_name = "oracle.decision.act", action = %call.name, "oracle requested action");
                Ok(OracleDecision::Act { call, checkpoint })
            }
            None => Ok(OracleDecision::Reply(OracleReply { text: message_text(&message), checkpoint })),
        }
    }

    async fn finish(&self, request: FinishRequest<'_>) -> Result<OracleReply, OracleError> {
        let mut transcript = match request.checkpoint {
            Some(checkpoint) => prior_transcript(Some(checkpoint), &[]),
            None => {
                let mut rebuilt = prior_transcript(None, request.turns);
                rebuilt.push(json!({ "role": "user", "content": request.message }));
                rebuilt.push(json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "function": { "name": request.call.name, "arguments": request.call.arguments }
                    }],
                }));
                rebuilt
            }
        };
        transcript.push(json!({ "role": "tool", "content": request.result }));

        let message = self.chat(&with_system(request.instructions, &transcript), None).await?;
        let text = message_text(&message);
        if text.is_empty() {
            return Err(OracleError::Malformed("final reply is empty".to_string()));
        }
        transcript.push(json!({ "role": "assistant", "content": text }));

        Ok(OracleReply { text, checkpoint: Some(OracleCheckpoint(Value::Array(transcript))) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::{
        attempt_timeout, first_tool_call, prior_transcript, DecideRequest, FinishRequest,
        OllamaOracle, OracleDecision, OracleError, ReasoningOracle,
    };
    use crate::session::{OracleCheckpoint, Turn};
    use crate::tools::{ActionCall, ActionName, ActionSpec};

    /// Local stand-in for an Ollama server: answers one connection per canned response,
    /// in order, and keeps every raw request it read.
    struct StubBackend {
        url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubBackend {
        async fn serve(responses: Vec<(u16, String)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let url = format!("http://{}", listener.local_addr().expect("addr"));
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();
            tokio::spawn(async move {
                for (status, body) in responses {
                    let Ok((mut socket, _)) = listener.accept().await else { return };
                    let request = read_request(&mut socket).await;
                    seen.lock().expect("lock").push(request);
                    let response = format!(
                        "HTTP/1.1 {status} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
            Self { url, requests }
        }

        fn oracle(&self) -> OllamaOracle {
            OllamaOracle::new(&self.url, "llama3.1", Duration::from_secs(5)).expect("client")
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("lock").clone()
        }

        fn body(&self, index: usize) -> Value {
            let request = &self.requests()[index];
            let (_, body) = request.split_once("\r\n\r\n").expect("request body");
            serde_json::from_str(body).expect("json body")
        }
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.expect("read");
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn assistant(content: &str) -> (u16, String) {
        (200, json!({ "message": { "role": "assistant", "content": content }, "done": true }).to_string())
    }

    fn lookup_spec() -> ActionSpec {
        ActionSpec {
            name: ActionName::GetRegistration,
            description: "Look up a registration",
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    fn decide_request<'a>(actions: &'a [ActionSpec], message: &'a str) -> DecideRequest<'a> {
        DecideRequest { instructions: "be brief", turns: &[], checkpoint: None, actions, message }
    }

    #[test]
    fn transcript_prefers_checkpoint_over_turns() {
        let turns = vec![Turn { user: "hi".to_string(), assistant: "hello".to_string() }];
        let checkpoint = OracleCheckpoint(json!([{ "role": "user", "content": "from checkpoint" }]));

        let resumed = prior_transcript(Some(&checkpoint), &turns);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0]["content"], "from checkpoint");

        let rebuilt = prior_transcript(None, &turns);
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[1]["role"], "assistant");
    }

    #[test]
    fn tool_call_arguments_accept_object_or_encoded_text() {
        let object = json!({
            "role": "assistant",
            "tool_calls": [{ "function": { "name": "get_registration", "arguments": { "identifier": "a@b.co" } } }]
        });
        let call = first_tool_call(&object).expect("parse").expect("call");
        assert_eq!(call.name, "get_registration");
        assert_eq!(call.arguments["identifier"], "a@b.co");

        let encoded = json!({
            "role": "assistant",
            "tool_calls": [{ "function": { "name": "delete_registration", "arguments": "{\"identifier\":\"x\"}" } }]
        });
        let call = first_tool_call(&encoded).expect("parse").expect("call");
        assert_eq!(call.arguments["identifier"], "x");
    }

    #[test]
    fn plain_message_has_no_tool_call_and_bad_arguments_are_malformed() {
        let plain = json!({ "role": "assistant", "content": "What is your email?" });
        assert_eq!(first_tool_call(&plain), Ok(None));

        let broken = json!({
            "tool_calls": [{ "function": { "name": "create_registration", "arguments": "{not json" } }]
        });
        assert!(matches!(first_tool_call(&broken), Err(OracleError::Malformed(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let oracle = OllamaOracle::new("http://127.0.0.1:9", "llama3.1", Duration::from_secs(2))
            .expect("client");
        let error = oracle.chat(&[json!({ "role": "user", "content": "hi" })], None).await.expect_err("no server");
        assert!(matches!(error, OracleError::Unavailable(_) | OracleError::Timeout));
    }

    #[test]
    fn attempts_share_the_phase_budget() {
        assert_eq!(attempt_timeout(Duration::from_secs(60), 2), Duration::from_secs(20));
        assert_eq!(attempt_timeout(Duration::from_secs(60), 0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_a_reply_arrives() {
        let backend = StubBackend::serve(vec![
            (500, "{\"error\":\"loading model\"}".to_string()),
            assistant("Hello there"),
        ])
        .await;
        let oracle = backend.oracle().with_max_retries(2);

        let decision = oracle.decide(decide_request(&[], "hi")).await.expect("decision");

        assert!(matches!(decision, OracleDecision::Reply(ref reply) if reply.text == "Hello there"));
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn retries_stop_at_the_configured_limit() {
        let backend = StubBackend::serve(vec![
            (503, "{}".to_string()),
            (503, "{}".to_string()),
            assistant("too late"),
        ])
        .await;
        let oracle = backend.oracle().with_max_retries(1);

        let error = oracle.decide(decide_request(&[], "hi")).await.expect_err("gave up");

        assert!(matches!(error, OracleError::Unavailable(ref detail) if detail.contains("503")));
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn client_errors_are_unavailable_and_not_retried() {
        let backend = StubBackend::serve(vec![
            (404, "{\"error\":\"model 'llama3.1' not found\"}".to_string()),
            assistant("unreachable"),
        ])
        .await;
        let oracle = backend.oracle().with_max_retries(3);

        let error = oracle.decide(decide_request(&[], "hi")).await.expect_err("not found");

        assert!(matches!(error, OracleError::Unavailable(ref detail) if detail.contains("404")));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn response_without_message_is_malformed() {
        let backend =
            StubBackend::serve(vec![(200, "{\"done\":true}".to_string()), assistant("unused")]).await;
        let oracle = backend.oracle().with_max_retries(2);

        let error = oracle.decide(decide_request(&[], "hi")).await.expect_err("no message");

        assert!(matches!(error, OracleError::Malformed(_)));
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn request_carries_model_tools_and_bearer_token() {
        let backend = StubBackend::serve(vec![assistant("ok")]).await;
        let oracle = backend.oracle().with_api_key(SecretString::from("sk-test".to_string()));
        let actions = [lookup_spec()];

        oracle.decide(decide_request(&actions, "find alice")).await.expect("decision");

        let raw = backend.requests()[0].to_ascii_lowercase();
        assert!(raw.starts_with("post /api/chat "));
        assert!(raw.contains("authorization: bearer sk-test"));
        let body = backend.body(0);
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({ "role": "user", "content": "find alice" }));
        assert_eq!(body["tools"][0]["function"]["name"], "get_registration");
    }

    #[tokio::test]
    async fn no_authorization_header_without_api_key() {
        let backend = StubBackend::serve(vec![assistant("ok")]).await;

        backend.oracle().decide(decide_request(&[], "hi")).await.expect("decision");

        assert!(!backend.requests()[0].to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn tool_call_round_trip_feeds_the_result_back_as_a_tool_message() {
        let tool_call = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "function": { "name": "get_registration", "arguments": "{\"identifier\":\"alice@test.com\"}" }
                }]
            }
        });
        let backend = StubBackend::serve(vec![
            (200, tool_call.to_string()),
            assistant("Alice is registered."),
        ])
        .await;
        let oracle = backend.oracle();
        let actions = [lookup_spec()];

        let decision = oracle.decide(decide_request(&actions, "is alice here?")).await.expect("act");
        let (call, checkpoint) = match decision {
            OracleDecision::Act { call, checkpoint } => (call, checkpoint),
            other => panic!("expected an action, got {other:?}"),
        };
        assert_eq!(call, ActionCall::new("get_registration", json!({ "identifier": "alice@test.com" })));

        let result = "{\"status\":\"success\"}";
        let reply = oracle
            .finish(FinishRequest {
                instructions: "be brief",
                turns: &[],
                checkpoint: checkpoint.as_ref(),
                message: "is alice here?",
                call: &call,
                result,
            })
            .await
            .expect("final reply");

        assert_eq!(reply.text, "Alice is registered.");
        let messages = backend.body(1)["messages"].as_array().cloned().expect("messages");
        assert_eq!(messages.last(), Some(&json!({ "role": "tool", "content": result })));
        assert_eq!(messages[messages.len() - 2]["tool_calls"][0]["function"]["name"], "get_registration");
        assert!(backend.body(1).get("tools").is_none());

        let transcript = reply.checkpoint.expect("checkpoint").0;
        let last = transcript.as_array().and_then(|messages| messages.last()).cloned();
        assert_eq!(last, Some(json!({ "role": "assistant", "content": "Alice is registered." })));
    }

    #[tokio::test]
    async fn empty_final_reply_is_malformed() {
        let backend = StubBackend::serve(vec![assistant("   ")]).await;
        let call = ActionCall::new("delete_registration", json!({ "identifier": "a@b.co" }));

        let error = backend
            .oracle()
            .finish(FinishRequest {
                instructions: "be brief",
                turns: &[],
                checkpoint: None,
                message: "delete a@b.co",
                call: &call,
                result: "{\"status\":\"success\"}",
            })
            .await
            .expect_err("empty reply");

        assert!(matches!(error, OracleError::Malformed(_)));
        let messages = backend.body(0)["messages"].as_array().cloned().expect("messages");
        assert_eq!(messages.last().map(|message| message["role"].clone()), Some(json!("tool")));
    }
}
