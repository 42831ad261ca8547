//! Simulated hand-off from the bot to a named team member.
//!
//! ```text
//! NotConnected ──greeting──▶ Connecting{agent} ──timers──▶ Connected{agent}
//! ```
//!
//! The two staged messages are written by one spawned task that sleeps
//! between them. The task handle is owned by [`Handoff`]; cancelling or
//! dropping the handoff aborts it, so a torn-down session never receives a
//! late message. There is no path out of `Connected`.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::HandoffConfig;
use crate::conversation::Transcript;
use crate::models::ConversationMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffState {
    NotConnected,
    Connecting { agent: String },
    Connected { agent: String },
}

impl HandoffState {
    /// The assigned agent, once one has been picked.
    pub fn agent(&self) -> Option<&str> {
        match self {
            HandoffState::NotConnected => None,
            HandoffState::Connecting { agent } | HandoffState::Connected { agent } => Some(agent),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, HandoffState::Connected { .. })
    }
}

/// Pick a display name uniformly from `names`.
pub fn pick_agent<R: Rng + ?Sized>(names: &[String], rng: &mut R) -> Option<String> {
    names.choose(rng).cloned()
}

pub fn connecting_text() -> String {
    "Connecting you with a member of our team. One moment please...".to_string()
}

pub fn introduction_text(agent: &str) -> String {
    format!(
        "Hi, I'm {}! Thanks for reaching out. How can I help you today?",
        agent
    )
}

pub struct Handoff {
    state: Arc<Mutex<HandoffState>>,
    timer: Option<JoinHandle<()>>,
    connect_delay: Duration,
    intro_delay: Duration,
}

impl Handoff {
    pub fn new(config: &HandoffConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HandoffState::NotConnected)),
            timer: None,
            connect_delay: Duration::from_millis(config.connect_delay_ms),
            intro_delay: Duration::from_millis(config.intro_delay_ms),
        }
    }

    pub async fn state(&self) -> HandoffState {
        self.state.lock().await.clone()
    }

    pub async fn agent_name(&self) -> Option<String> {
        self.state.lock().await.agent().map(str::to_string)
    }

    /// Begin the hand-off to `agent`, staging both messages on `transcript`.
    ///
    /// Returns `false` without doing anything if a hand-off already began.
    pub async fn start(&mut self, agent: String, transcript: Transcript) -> bool {
        {
            let mut state = self.state.lock().await;
            if *state != HandoffState::NotConnected {
                return false;
            }
            *state = HandoffState::Connecting {
                agent: agent.clone(),
            };
        }

        let state = self.state.clone();
        let connect_delay = self.connect_delay;
        let intro_delay = self.intro_delay;

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(connect_delay).await;
            transcript
                .push(ConversationMessage::bot(connecting_text()).with_agent(Some(agent.clone())))
                .await;

            tokio::time::sleep(intro_delay).await;
            *state.lock().await = HandoffState::Connected {
                agent: agent.clone(),
            };
            transcript
                .push(
                    ConversationMessage::bot(introduction_text(&agent))
                        .with_agent(Some(agent.clone())),
                )
                .await;
            tracing::info!(agent = %agent, "handoff connected");
        }));

        true
    }

    /// Whether staged messages are still scheduled.
    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Abort any scheduled messages.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        self.cancel();
    }
}
