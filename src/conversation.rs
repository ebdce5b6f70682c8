//! Conversation log and turn orchestration.
//!
//! A turn runs submit -> responder -> reveal -> commit, and only one turn
//! may be outstanding. Responses are tagged with the turn that asked for
//! them; anything arriving for a turn that is no longer current is dropped.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::attachment::Attachment;
use crate::health::ConnectionStatus;
use crate::remote::RemoteError;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Message {
            id: Uuid::now_v7().to_string(),
            role,
            text: text.into(),
            timestamp: now_ms(),
            attachments,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text, Vec::new())
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Remote,
    Local,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Mode::Remote => Mode::Local,
            Mode::Local => Mode::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(u64);

/// Where a submitted turn must be answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Local { query: String },
    /// `history` already excludes earlier messages that carry attachments
    /// and ends with the new user message.
    Remote { history: Vec<Message>, retry_probe: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub turn: TurnId,
    pub route: Route,
}

/// What a responder produced for a turn.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub turn: TurnId,
    /// A retry probe ran before the send and succeeded.
    pub recovered: bool,
    pub result: Result<String, RemoteError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The turn is no longer current; nothing changed.
    Stale,
    /// Hand this text to the reveal animator. The turn stays in flight.
    Reveal(String),
    /// The failure text was appended and the turn is over.
    Failed(RemoteError),
}

#[derive(Debug, Default)]
pub struct Orchestrator {
    log: Vec<Message>,
    pending: Vec<Attachment>,
    mode: Mode,
    in_flight: Option<TurnId>,
    next_turn: u64,
}

impl Orchestrator {
    pub fn new(log: Vec<Message>) -> Self {
        Orchestrator {
            log,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn pending(&self) -> &[Attachment] {
        &self.pending
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn in_flight(&self) -> Option<TurnId> {
        self.in_flight
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Refused while a turn is in flight.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.is_busy() {
            return false;
        }
        self.mode = mode;
        true
    }

    pub fn attach(&mut self, attachments: impl IntoIterator<Item = Attachment>) {
        self.pending.extend(attachments);
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<Attachment> {
        (index < self.pending.len()).then(|| self.pending.remove(index))
    }

    /// Appends the user message and opens a turn. Returns `None` when there
    /// is nothing to send or a turn is already outstanding.
    pub fn submit(&mut self, text: &str, status: ConnectionStatus) -> Option<Submission> {
        let text = text.trim();
        if (text.is_empty() && self.pending.is_empty()) || self.is_busy() {
            return None;
        }

        let user = Message::new(Role::User, text, std::mem::take(&mut self.pending));
        let route = match self.mode {
            Mode::Local => Route::Local {
                query: user.text.clone(),
            },
            Mode::Remote => {
                let mut history: Vec<Message> = self
                    .log
                    .iter()
                    .filter(|message| !message.has_attachments())
                    .cloned()
                    .collect();
                history.push(user.clone());
                Route::Remote {
                    history,
                    retry_probe: status == ConnectionStatus::Offline,
                }
            }
        };
        self.log.push(user);

        let turn = TurnId(self.next_turn);
        self.next_turn += 1;
        self.in_flight = Some(turn);

        Some(Submission { turn, route })
    }

    pub fn resolve(&mut self, response: TurnResponse) -> Resolution {
        if self.in_flight != Some(response.turn) {
            return Resolution::Stale;
        }

        let error = match response.result {
            Ok(text) if !text.trim().is_empty() => return Resolution::Reveal(text),
            Ok(_) => RemoteError::Malformed,
            Err(e) => e,
        };

        self.log.push(Message::assistant(error.user_message()));
        self.in_flight = None;
        Resolution::Failed(error)
    }

    /// Appends the fully revealed reply and closes the turn.
    pub fn commit(&mut self, turn: TurnId, text: String) -> bool {
        if self.in_flight != Some(turn) {
            return false;
        }
        self.log.push(Message::assistant(text));
        self.in_flight = None;
        true
    }

    pub fn abandon(&mut self) -> Option<TurnId> {
        self.in_flight.take()
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.in_flight = None;
    }
}
