//! Chat sessions.
//!
//! A [`ChatSession`] owns one append-only [`Transcript`], the hand-off state
//! for that conversation, and the reply generator it defers general
//! questions to. Nothing here is global: every piece of state lives in the
//! session, and the HTTP server keeps sessions in a [`SessionStore`].
//!
//! Each user message is classified and routed:
//!
//! | Intent | Result |
//! |--------|--------|
//! | Greeting (first) | hand-off begins; two staged messages follow |
//! | Greeting (later) | canned agent reply |
//! | JobApplication | reply with a redirect action to the application form |
//! | GeneralQuery | reply generator, or the apology on any error |

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::{Config, HandoffConfig};
use crate::handoff::{pick_agent, Handoff, HandoffState};
use crate::intent::{Intent, IntentClassifier};
use crate::jobs::slugify;
use crate::models::{ConversationMessage, HistoryTurn, MessageAction};
use crate::rag::{trim_history, ReplyGenerator};

/// Append-only, shareable list of messages with a change feed.
#[derive(Clone)]
pub struct Transcript {
    messages: Arc<Mutex<Vec<ConversationMessage>>>,
    events: broadcast::Sender<ConversationMessage>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            events,
        }
    }

    pub async fn push(&self, message: ConversationMessage) {
        self.messages.lock().await.push(message.clone());
        // No subscribers is fine.
        let _ = self.events.send(message);
    }

    pub async fn snapshot(&self) -> Vec<ConversationMessage> {
        self.messages.lock().await.clone()
    }

    /// Messages from position `index` onwards.
    pub async fn since(&self, index: usize) -> Vec<ConversationMessage> {
        let messages = self.messages.lock().await;
        messages.get(index..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Receive every message pushed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationMessage> {
        self.events.subscribe()
    }
}

/// Per-session knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub handoff: HandoffConfig,
    pub history_turns: usize,
    pub apology: String,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            handoff: config.handoff.clone(),
            history_turns: config.retrieval.history_turns,
            apology: config.chat.apology.clone(),
        }
    }
}

/// Decrements the in-flight counter even if the request future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ChatSession {
    id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    transcript: Transcript,
    handoff: Mutex<Handoff>,
    classifier: Arc<IntentClassifier>,
    generator: Arc<dyn ReplyGenerator>,
    settings: SessionSettings,
    in_flight: AtomicUsize,
}

impl ChatSession {
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        classifier: Arc<IntentClassifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            transcript: Transcript::new(),
            handoff: Mutex::new(Handoff::new(&settings.handoff)),
            classifier,
            generator,
            settings,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.created_at
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub async fn messages(&self) -> Vec<ConversationMessage> {
        self.transcript.snapshot().await
    }

    pub async fn messages_since(&self, index: usize) -> Vec<ConversationMessage> {
        self.transcript.since(index).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationMessage> {
        self.transcript.subscribe()
    }

    pub async fn handoff_state(&self) -> HandoffState {
        self.handoff.lock().await.state().await
    }

    /// True while a reply generator call is outstanding.
    pub fn is_awaiting_reply(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Record a user message and produce the immediate bot replies.
    ///
    /// Staged hand-off messages are not returned here; they arrive on the
    /// transcript later. Blank input is ignored.
    pub async fn handle_user_message(&self, text: &str) -> Vec<ConversationMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let prior: Vec<HistoryTurn> = self
            .transcript
            .snapshot()
            .await
            .iter()
            .map(HistoryTurn::from)
            .collect();
        self.transcript.push(ConversationMessage::user(text)).await;

        let intent = self.classifier.classify(text);
        tracing::debug!(session = %self.id, ?intent, "classified message");

        let reply = match intent {
            Intent::Greeting => self.greet().await,
            Intent::JobApplication { job_title } => Some(self.redirect_to_application(&job_title).await),
            Intent::GeneralQuery => Some(self.answer(text, &prior).await),
        };

        match reply {
            Some(reply) => {
                self.transcript.push(reply.clone()).await;
                vec![reply]
            }
            None => Vec::new(),
        }
    }

    async fn agent_name(&self) -> Option<String> {
        self.handoff.lock().await.agent_name().await
    }

    async fn greet(&self) -> Option<ConversationMessage> {
        let mut handoff = self.handoff.lock().await;
        if let Some(agent) = handoff.agent_name().await {
            return Some(
                ConversationMessage::bot("Hello again! What else can I help you with?")
                    .with_agent(Some(agent)),
            );
        }

        let agent = {
            let mut rng = rand::thread_rng();
            pick_agent(&self.settings.handoff.agent_names, &mut rng)
        };
        match agent {
            Some(agent) => {
                tracing::info!(session = %self.id, agent = %agent, "starting handoff");
                handoff.start(agent, self.transcript.clone()).await;
                None
            }
            None => Some(ConversationMessage::bot("Hello! How can I help you today?")),
        }
    }

    async fn redirect_to_application(&self, job_title: &str) -> ConversationMessage {
        let route = format!("/careers/{}/apply", slugify(job_title));
        tracing::info!(session = %self.id, route = %route, "redirecting to application form");
        ConversationMessage::bot(format!(
            "Great choice! I'm taking you to the {} application form now.",
            display_title(job_title)
        ))
        .with_agent(self.agent_name().await)
        .with_action(MessageAction::Redirect {
            route,
            delay_ms: self.settings.handoff.redirect_delay_ms,
        })
    }

    async fn answer(&self, text: &str, prior: &[HistoryTurn]) -> ConversationMessage {
        let history = trim_history(prior, self.settings.history_turns);

        let result = {
            let _guard = InFlight::enter(&self.in_flight);
            self.generator.reply(text, history).await
        };

        let agent = self.agent_name().await;
        match result {
            Ok(reply) => ConversationMessage::bot(reply.reply)
                .with_sources(reply.sources)
                .with_agent(agent),
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "reply generation failed");
                ConversationMessage::bot(self.settings.apology.clone()).with_agent(agent)
            }
        }
    }

    /// Cancel any staged messages. The transcript stays readable.
    pub async fn close(&self) {
        self.handoff.lock().await.cancel();
    }
}

/// `"ai engineer"` → `"AI Engineer"`, `"ui/ux designer"` → `"UI/UX Designer"`.
fn display_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| {
            if word.len() <= 2 || word.contains('/') {
                word.to_uppercase()
            } else {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

struct StoreInner {
    sessions: HashMap<String, Arc<ChatSession>>,
    order: VecDeque<String>,
}

/// Live sessions for the HTTP server, capped at `capacity`.
pub struct SessionStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                sessions: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Store `session`, evicting and closing the oldest ones beyond capacity.
    pub async fn insert(&self, session: ChatSession) -> Arc<ChatSession> {
        let session = Arc::new(session);
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            while inner.sessions.len() >= self.capacity {
                let Some(oldest) = inner.order.pop_front() else {
                    break;
                };
                if let Some(old) = inner.sessions.remove(&oldest) {
                    evicted.push(old);
                }
            }
            inner.order.push_back(session.id().to_string());
            inner
                .sessions
                .insert(session.id().to_string(), session.clone());
        }

        for old in evicted {
            tracing::debug!(session = %old.id(), "evicting chat session");
            old.close().await;
        }
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ChatSession>> {
        self.inner.lock().await.sessions.get(id).cloned()
    }

    /// Remove and close a session. Returns `false` if it was unknown.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.order.retain(|s| s != id);
            inner.sessions.remove(id)
        };
        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
