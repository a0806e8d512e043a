//! Streaming response protocol.
//!
//! The contract between the session controller and an inference
//! backend: a well-formed exchange is zero or more `Chunk`s, at most
//! one `Metadata` anywhere before the end, and exactly one terminal
//! `Complete` or `Error`. Events arrive over a channel, so the
//! controller consumes them in its own loop instead of nesting
//! callbacks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use solace_core::error::SolaceError;
use solace_core::types::{ChatMode, ResponseStyle, SourceRef};

use crate::suggestions::{SuggestionEngine, Topic};

/// One event on a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of response text, in order.
    Chunk { text: String },
    /// Provenance tags for the in-flight message. At most one per
    /// exchange.
    Metadata {
        agent: Option<String>,
        intent: Option<String>,
    },
    /// Terminal: the exchange finished and these are the closing
    /// artifacts.
    Complete {
        thinking: Option<String>,
        sources: Vec<SourceRef>,
    },
    /// Terminal: the exchange failed. Partial content already delivered
    /// stays valid.
    Error { message: String },
}

impl StreamEvent {
    /// Whether this event ends the exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

/// Prompt plus context for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub prompt: String,
    /// Authenticated user, or `None` for a guest.
    pub user_id: Option<String>,
    pub mode: ChatMode,
    pub style: ResponseStyle,
    pub language: String,
    /// Content of the message being replied to, if the send quotes one.
    pub reply_context: Option<String>,
}

/// Remote inference backend.
///
/// Object-safe so the controller can hold any backend behind
/// `Arc<dyn InferenceService>`.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Opens a streaming exchange and returns the receiving end of its
    /// event stream.
    async fn send_stream(
        &self,
        request: InferenceRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, SolaceError>;

    /// Single-shot completion for quota-limited guests.
    async fn send_guest(&self, prompt: &str, language: &str) -> Result<String, SolaceError>;

    /// Single-shot image understanding over an attachment reference.
    async fn analyze_image(&self, uri: &str, prompt: &str) -> Result<String, SolaceError>;
}

// =============================================================================
// ScriptedInference
// =============================================================================

/// Scripted backend for tests: each call pops the next scripted reply
/// and every method counts its invocations.
#[derive(Default)]
pub struct ScriptedInference {
    streams: Mutex<VecDeque<Result<Vec<StreamEvent>, SolaceError>>>,
    guest_replies: Mutex<VecDeque<Result<String, SolaceError>>>,
    image_replies: Mutex<VecDeque<Result<String, SolaceError>>>,
    stream_calls: AtomicUsize,
    guest_calls: AtomicUsize,
    image_calls: AtomicUsize,
    last_request: Mutex<Option<InferenceRequest>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the events for the next streaming exchange.
    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams
            .lock()
            .expect("stream script mutex poisoned")
            .push_back(Ok(events));
    }

    /// Makes the next streaming exchange fail to open.
    pub fn push_stream_error(&self, error: SolaceError) {
        self.streams
            .lock()
            .expect("stream script mutex poisoned")
            .push_back(Err(error));
    }

    pub fn push_guest(&self, reply: Result<String, SolaceError>) {
        self.guest_replies
            .lock()
            .expect("guest script mutex poisoned")
            .push_back(reply);
    }

    pub fn push_image(&self, reply: Result<String, SolaceError>) {
        self.image_replies
            .lock()
            .expect("image script mutex poisoned")
            .push_back(reply);
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn guest_calls(&self) -> usize {
        self.guest_calls.load(Ordering::SeqCst)
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Total calls across all entry points, for zero-network assertions.
    pub fn total_calls(&self) -> usize {
        self.stream_calls() + self.guest_calls() + self.image_calls()
    }

    /// The request passed to the most recent `send_stream`.
    pub fn last_request(&self) -> Option<InferenceRequest> {
        self.last_request
            .lock()
            .expect("request mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn send_stream(
        &self,
        request: InferenceRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, SolaceError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("request mutex poisoned") = Some(request);

        let script = self
            .streams
            .lock()
            .expect("stream script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(vec![StreamEvent::Complete {
                    thinking: None,
                    sources: Vec::new(),
                }])
            });
        let events = script?;

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers the whole script, so this never blocks.
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }

    async fn send_guest(&self, _prompt: &str, _language: &str) -> Result<String, SolaceError> {
        self.guest_calls.fetch_add(1, Ordering::SeqCst);
        self.guest_replies
            .lock()
            .expect("guest script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok("scripted guest reply".to_string()))
    }

    async fn analyze_image(&self, _uri: &str, _prompt: &str) -> Result<String, SolaceError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.image_replies
            .lock()
            .expect("image script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok("scripted image reply".to_string()))
    }
}

// =============================================================================
// ReflectiveResponder
// =============================================================================

/// Offline backend that composes reflective wellness replies without a
/// model. Serves as the default backend when no remote service is
/// configured, and keeps demos and the CLI usable offline.
pub struct ReflectiveResponder {
    engine: SuggestionEngine,
    chunk_chars: usize,
    chunk_delay: Duration,
}

impl ReflectiveResponder {
    pub fn new() -> Self {
        Self {
            engine: SuggestionEngine::new(),
            chunk_chars: 24,
            chunk_delay: Duration::from_millis(15),
        }
    }

    /// Sets the pause between streamed chunks; zero disables pacing.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn compose_reply(&self, prompt: &str, style: ResponseStyle, mode: ChatMode) -> (String, Option<Topic>) {
        let topic = self.engine.detect_topics(prompt).first().copied();

        let opening = match style {
            ResponseStyle::Supportive => "Thank you for sharing that with me. ",
            ResponseStyle::Balanced => "I hear you. ",
            ResponseStyle::Direct => "Let's look at this practically. ",
        };

        let (body, question) = match topic {
            Some(Topic::Sleep) => (
                "Sleep trouble often eases with a steady wind-down: the same time each night, screens put away, and something calm for the last half hour.",
                "What does the hour before bed usually look like for you?",
            ),
            Some(Topic::Stress) => (
                "When stress piles up, the body keeps score. A slow exhale tells it the alarm can stand down; try breathing in for four counts and out for six.",
                "What's weighing on you most right now?",
            ),
            Some(Topic::Mood) => (
                "Low days are heavy, and you don't have to fix everything at once. One small kind thing for yourself still counts.",
                "What usually brings you even a little comfort?",
            ),
            Some(Topic::Movement) => (
                "Movement doesn't have to mean a workout. Ten minutes of walking outside shifts more than it seems.",
                "When could a short walk fit into your day?",
            ),
            Some(Topic::Gratitude) => (
                "Noticing what's good, even briefly, adds up over time.",
                "Could you name one small thing today you're glad happened?",
            ),
            None => (
                "I'm here with you, and whatever it is, it's worth talking through.",
                "Could you tell me a bit more about what's on your mind?",
            ),
        };

        // Voice replies stay short: just the opening and the question.
        let reply = match mode {
            ChatMode::Text => format!("{}{} {}", opening, body, question),
            ChatMode::Voice => format!("{}{}", opening, question),
        };
        (reply, topic)
    }
}

impl Default for ReflectiveResponder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceService for ReflectiveResponder {
    async fn send_stream(
        &self,
        request: InferenceRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, SolaceError> {
        let (reply, topic) = self.compose_reply(&request.prompt, request.style, request.mode);

        let mut events = Vec::new();
        events.push(StreamEvent::Metadata {
            agent: Some("reflective".to_string()),
            intent: Some(
                topic
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_else(|| "support".to_string()),
            ),
        });
        for chunk in chunk_text(&reply, self.chunk_chars) {
            events.push(StreamEvent::Chunk { text: chunk });
        }
        events.push(StreamEvent::Complete {
            thinking: Some(format!(
                "reflective reply keyed on {}",
                topic.map(|t| t.as_str()).unwrap_or("no particular topic")
            )),
            sources: Vec::new(),
        });

        debug!("Opened reflective stream ({} events)", events.len());
        let (tx, rx) = mpsc::channel(events.len());
        let delay = self.chunk_delay;
        tokio::spawn(async move {
            for event in events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn send_guest(&self, prompt: &str, _language: &str) -> Result<String, SolaceError> {
        let (reply, _) = self.compose_reply(prompt, ResponseStyle::Balanced, ChatMode::Text);
        Ok(reply)
    }

    async fn analyze_image(&self, _uri: &str, _prompt: &str) -> Result<String, SolaceError> {
        Ok(
            "I can't look at images while offline, but I'd love to hear about it. \
             What does it show?"
                .to_string(),
        )
    }
}

/// Splits text into chunks of at most `size` characters, on character
/// boundaries.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
