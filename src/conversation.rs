//! # Conversation Engine
//!
//! Walks each chat through the fixed receipt questionnaire. The sequence is an
//! ordered table of [`Step`] records, each pointing at its successor; the
//! engine owns one [`Session`] per chat and hands the completed record to the
//! [`RecordStore`] when the terminal step is reached.
//!
//! Every inbound event produces exactly one [`Reply`] and moves the session's
//! step pointer at most once. Events for the same chat are serialized through a
//! per-session lock; distinct chats never contend beyond the brief lookup in
//! the session map.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::types::ChatId;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConversationConfig;
use crate::conversation_errors::{ServiceError, StepError};
use crate::dialogue::{validate_free_text, validate_reception_date, InputKind, Next, Session, StepId};
use crate::localization::LocalizationManager;
use crate::record_store::{ReceiptRecord, RecordStore};

/// Validator of a text step: normalized value, or a rejection reason
pub type Validator = fn(&str) -> Result<String, &'static str>;

/// One option of a choice menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Callback data sent back by the button, also the stored value
    pub id: &'static str,
    pub label_key: &'static str,
}

/// What a step accepts
#[derive(Clone, Copy)]
pub enum StepInput {
    /// Free text; without a validator any non-blank text is taken verbatim
    Text { validator: Option<Validator> },
    Choice(&'static [ChoiceOption]),
}

impl std::fmt::Debug for StepInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepInput::Text { validator } => f
                .debug_struct("Text")
                .field("validated", &validator.is_some())
                .finish(),
            StepInput::Choice(options) => f.debug_tuple("Choice").field(options).finish(),
        }
    }
}

impl StepInput {
    pub fn kind(&self) -> InputKind {
        match self {
            StepInput::Text { .. } => InputKind::Text,
            StepInput::Choice(_) => InputKind::Choice,
        }
    }
}

/// One entry of the conversation table
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub id: StepId,
    pub prompt_key: &'static str,
    /// Message echoing the accepted value, prefixed to the next prompt
    pub recorded_key: &'static str,
    pub input: StepInput,
    pub next: Next,
}

pub const MATERIAL_CHOICES: &[ChoiceOption] = &[
    ChoiceOption {
        id: "material_a",
        label_key: "material-a",
    },
    ChoiceOption {
        id: "material_b",
        label_key: "material-b",
    },
];

const fn text_step(id: StepId, prompt_key: &'static str, next: Next) -> Step {
    Step {
        id,
        prompt_key,
        recorded_key: "recorded-value",
        input: StepInput::Text { validator: None },
        next,
    }
}

/// The receipt questionnaire, entry step first
pub static RECEIPT_STEPS: [Step; 10] = [
    Step {
        id: StepId::ReceptionDate,
        prompt_key: "prompt-reception-date",
        recorded_key: "recorded-reception-date",
        input: StepInput::Text {
            validator: Some(validate_reception_date),
        },
        next: Next::Step(StepId::DeliveryNote),
    },
    text_step(
        StepId::DeliveryNote,
        "prompt-delivery-note",
        Next::Step(StepId::Supplier),
    ),
    text_step(
        StepId::Supplier,
        "prompt-supplier",
        Next::Step(StepId::MaterialType),
    ),
    Step {
        id: StepId::MaterialType,
        prompt_key: "prompt-material-type",
        recorded_key: "recorded-material-type",
        input: StepInput::Choice(MATERIAL_CHOICES),
        next: Next::Step(StepId::MaterialObservations),
    },
    text_step(
        StepId::MaterialObservations,
        "prompt-material-observations",
        Next::Step(StepId::Batch),
    ),
    text_step(StepId::Batch, "prompt-batch", Next::Step(StepId::Quantity)),
    text_step(
        StepId::Quantity,
        "prompt-quantity",
        Next::Step(StepId::ProjectLead),
    ),
    text_step(
        StepId::ProjectLead,
        "prompt-project-lead",
        Next::Step(StepId::GeneralObservations),
    ),
    text_step(
        StepId::GeneralObservations,
        "prompt-general-observations",
        Next::Step(StepId::HandlingUnit),
    ),
    text_step(StepId::HandlingUnit, "prompt-handling-unit", Next::Terminal),
];

/// Ordered, validated step table
#[derive(Debug, Clone)]
pub struct StepTable {
    steps: &'static [Step],
}

impl StepTable {
    /// Check that the table is a single chain from its first step to `Terminal`
    pub fn new(steps: &'static [Step]) -> Result<Self> {
        let entry = steps.first().ok_or_else(|| anyhow!("Step table is empty"))?;

        for (i, step) in steps.iter().enumerate() {
            if steps[..i].iter().any(|s| s.id == step.id) {
                return Err(anyhow!("Step {} is declared twice", step.id));
            }
        }

        let mut visited = Vec::with_capacity(steps.len());
        let mut current = entry;
        loop {
            if visited.contains(&current.id) {
                return Err(anyhow!("Step {} is part of a cycle", current.id));
            }
            visited.push(current.id);

            match current.next {
                Next::Terminal => break,
                Next::Step(next) => {
                    current = steps
                        .iter()
                        .find(|s| s.id == next)
                        .ok_or_else(|| anyhow!("Step {} points at undeclared {next}", current.id))?;
                }
            }
        }

        if visited.len() != steps.len() {
            return Err(anyhow!("Some steps are unreachable from {}", entry.id));
        }

        Ok(Self { steps })
    }

    pub fn receipt() -> Result<Self> {
        Self::new(&RECEIPT_STEPS)
    }

    pub fn entry(&self) -> StepId {
        self.steps[0].id
    }

    pub fn get(&self, id: StepId) -> Result<&Step> {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("Step {id} is not part of the conversation"))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }
}

/// Identifies a conversation; one per Telegram chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub i64);

impl From<ChatId> for SessionId {
    fn from(chat_id: ChatId) -> Self {
        SessionId(chat_id.0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inbound user event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TextInput(String),
    ChoiceSelected(String),
    CancelRequested,
}

impl Event {
    /// Classify a text message, treating cancel keywords as cancellation
    pub fn from_text(text: &str, config: &ConversationConfig) -> Self {
        if config.is_cancel_keyword(text) {
            Event::CancelRequested
        } else {
            Event::TextInput(text.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Prompt of the (new) current step
    Prompt,
    InvalidInputFormat,
    UnexpectedEventType,
    Completed,
    Cancelled,
}

/// A button of an outbound menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuChoice {
    pub id: String,
    pub label: String,
}

/// Outbound message produced for an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
    pub menu: Option<Vec<MenuChoice>>,
}

type SessionSlot = Arc<Mutex<Session>>;

/// The guided conversation state machine
pub struct ConversationEngine {
    steps: StepTable,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    store: Arc<dyn RecordStore>,
    localization: Arc<LocalizationManager>,
}

impl ConversationEngine {
    pub fn new(
        steps: StepTable,
        store: Arc<dyn RecordStore>,
        localization: Arc<LocalizationManager>,
    ) -> Self {
        Self {
            steps,
            sessions: Mutex::new(HashMap::new()),
            store,
            localization,
        }
    }

    pub fn steps(&self) -> &StepTable {
        &self.steps
    }

    /// Process one inbound event for `session_id` and return the reply to send
    ///
    /// Record store failures on completion propagate as a [`ServiceError::RecordStore`]
    /// context; the session then stays on its last step so the answer can be resent.
    pub async fn handle_event(
        &self,
        session_id: SessionId,
        event: Event,
        language_code: Option<&str>,
    ) -> Result<Reply> {
        loop {
            let slot = {
                let mut sessions = self.sessions.lock().await;
                match sessions.get(&session_id) {
                    Some(slot) => Arc::clone(slot),
                    None => {
                        let session = Session::new(self.steps.entry(), language_code);
                        info!(user_id = %session_id, "Starting receipt conversation");
                        let reply = self.entry_reply(&session, "welcome", ReplyKind::Prompt)?;
                        sessions.insert(session_id, Arc::new(Mutex::new(session)));
                        return Ok(reply);
                    }
                }
            };

            let mut session = slot.lock().await;
            if session.finished {
                // Completed while this event waited for the lock
                continue;
            }
            if language_code.is_some() {
                session.language_code = language_code.map(|s| s.to_string());
            }

            return self.advance(session_id, &mut session, event).await;
        }
    }

    async fn advance(
        &self,
        session_id: SessionId,
        session: &mut Session,
        event: Event,
    ) -> Result<Reply> {
        let step = *self.steps.get(session.current)?;
        debug!(user_id = %session_id, step = %step.id, event = ?event, "Handling conversation event");

        let value = match (event, step.input) {
            (Event::CancelRequested, _) => {
                info!(user_id = %session_id, step = %step.id, "Conversation cancelled");
                session.reset(self.steps.entry());
                return self.entry_reply(session, "conversation-cancelled", ReplyKind::Cancelled);
            }
            (Event::TextInput(text), StepInput::Text { validator }) => {
                match validator.unwrap_or(validate_free_text)(&text) {
                    Ok(value) => value,
                    Err(reason) => {
                        return self.reject(
                            session,
                            &step,
                            StepError::InvalidInputFormat {
                                step: step.id,
                                reason: reason.to_string(),
                            },
                        );
                    }
                }
            }
            (Event::ChoiceSelected(choice), StepInput::Choice(options)) => {
                if options.iter().any(|o| o.id == choice) {
                    choice
                } else {
                    return self.reject(
                        session,
                        &step,
                        StepError::InvalidInputFormat {
                            step: step.id,
                            reason: "unknown_choice".to_string(),
                        },
                    );
                }
            }
            (Event::TextInput(_), StepInput::Choice(_))
            | (Event::ChoiceSelected(_), StepInput::Text { .. }) => {
                return self.reject(
                    session,
                    &step,
                    StepError::UnexpectedEventType {
                        step: step.id,
                        expected: step.input.kind(),
                    },
                );
            }
        };

        let language = session.language_code.clone();
        let shown = self.display_value(&step, &value, language.as_deref());
        let echo = self.localization.get_message_with_args(
            step.recorded_key,
            &[("value", shown.as_str())],
            language.as_deref(),
        );
        session.values.insert(step.id, value);

        match step.next {
            Next::Step(next_id) => {
                session.current = next_id;
                let next = self.steps.get(next_id)?;
                debug!(user_id = %session_id, from = %step.id, to = %next_id, "Advanced conversation");
                Ok(self.prompt_reply(next, ReplyKind::Prompt, Some(echo), language.as_deref()))
            }
            Next::Terminal => {
                let record = self.build_record(session_id, session);

                if let Err(e) = self.store.append_record(&record).await {
                    session.values.remove(&step.id);
                    warn!(user_id = %session_id, error = %e, "Failed to store completed receipt");
                    return Err(e.context(ServiceError::RecordStore(format!(
                        "receipt of chat {session_id} was not appended"
                    ))));
                }

                session.finished = true;
                self.sessions.lock().await.remove(&session_id);
                info!(user_id = %session_id, fields = record.fields.len(), "Receipt recorded");

                Ok(Reply {
                    kind: ReplyKind::Completed,
                    text: self.text("receipt-complete", language.as_deref()),
                    menu: None,
                })
            }
        }
    }

    /// Re-prompt the current step after a rejected event
    fn reject(&self, session: &Session, step: &Step, error: StepError) -> Result<Reply> {
        let language = session.language_code.as_deref();
        warn!(step = %error.step(), error = %error, "Rejected conversation input");

        let (kind, key) = match &error {
            StepError::InvalidInputFormat { reason, .. } => {
                (ReplyKind::InvalidInputFormat, rejection_key(reason))
            }
            StepError::UnexpectedEventType { expected, .. } => (
                ReplyKind::UnexpectedEventType,
                match expected {
                    InputKind::Choice => "expected-choice",
                    InputKind::Text => "expected-text",
                },
            ),
        };

        Ok(self.prompt_reply(step, kind, Some(self.text(key, language)), language))
    }

    fn entry_reply(&self, session: &Session, lead_key: &str, kind: ReplyKind) -> Result<Reply> {
        let language = session.language_code.as_deref();
        let entry = self.steps.get(self.steps.entry())?;
        Ok(self.prompt_reply(entry, kind, Some(self.text(lead_key, language)), language))
    }

    fn prompt_reply(
        &self,
        step: &Step,
        kind: ReplyKind,
        lead: Option<String>,
        language: Option<&str>,
    ) -> Reply {
        let prompt = self.text(step.prompt_key, language);
        let text = match lead {
            Some(lead) => format!("{lead}\n\n{prompt}"),
            None => prompt,
        };

        let menu = match step.input {
            StepInput::Choice(options) => Some(
                options
                    .iter()
                    .map(|o| MenuChoice {
                        id: o.id.to_string(),
                        label: self.text(o.label_key, language),
                    })
                    .collect(),
            ),
            StepInput::Text { .. } => None,
        };

        Reply { kind, text, menu }
    }

    fn display_value(&self, step: &Step, value: &str, language: Option<&str>) -> String {
        match step.input {
            StepInput::Choice(options) => options
                .iter()
                .find(|o| o.id == value)
                .map(|o| self.text(o.label_key, language))
                .unwrap_or_else(|| value.to_string()),
            StepInput::Text { .. } => value.to_string(),
        }
    }

    fn build_record(&self, session_id: SessionId, session: &Session) -> ReceiptRecord {
        ReceiptRecord {
            chat_id: session_id.0,
            submitted_at: Utc::now(),
            fields: self
                .steps
                .iter()
                .map(|s| (s.id, session.values.get(&s.id).cloned().unwrap_or_default()))
                .collect(),
        }
    }

    fn text(&self, key: &str, language: Option<&str>) -> String {
        self.localization.get_message(key, language, None)
    }

    /// Prompt of the pending step, led by `lead_key`, without touching the session
    ///
    /// Returns `None` when the chat has no live session.
    pub async fn reprompt(
        &self,
        session_id: SessionId,
        lead_key: &str,
        language_code: Option<&str>,
    ) -> Result<Option<Reply>> {
        let Some(slot) = self.sessions.lock().await.get(&session_id).cloned() else {
            return Ok(None);
        };
        let session = slot.lock().await;
        if session.finished {
            return Ok(None);
        }

        let language = language_code.or(session.language_code.as_deref());
        let step = self.steps.get(session.current)?;
        Ok(Some(self.prompt_reply(
            step,
            ReplyKind::Prompt,
            Some(self.text(lead_key, language)),
            language,
        )))
    }

    /// Current step of a live session
    pub async fn current_step(&self, session_id: SessionId) -> Option<StepId> {
        let slot = self.sessions.lock().await.get(&session_id).cloned()?;
        let session = slot.lock().await;
        Some(session.current)
    }

    /// Values collected so far by a live session
    pub async fn collected_values(&self, session_id: SessionId) -> Option<HashMap<StepId, String>> {
        let slot = self.sessions.lock().await.get(&session_id).cloned()?;
        let session = slot.lock().await;
        Some(session.values.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn rejection_key(reason: &str) -> &'static str {
    match reason {
        "invalid_date" => "invalid-reception-date",
        "empty" => "invalid-empty",
        "unknown_choice" => "invalid-choice",
        _ => "error-processing-failed",
    }
}
