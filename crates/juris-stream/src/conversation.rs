use serde_json::{Map, Value};
use tracing::debug;

use crate::clarification::{Clarification, ClarificationAnswers};
use crate::controller::{CancelHandle, SessionHandle, StreamController};
use crate::errors::JurisError;
use crate::session::SessionOutcome;
use crate::wizard::{Wizard, WizardKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation sent back to the backend.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

struct LiveSession {
    id: uuid::Uuid,
    cancel: CancelHandle,
}

/// Drives a multi-turn conversation with one wizard.
///
/// At most one session is live: submitting again cancels the previous one.
/// Outcomes are folded back into the history through [`complete`], which
/// ignores sessions that were superseded in the meantime.
///
/// [`complete`]: WizardSession::complete
pub struct WizardSession<W: Wizard> {
    controller: StreamController<W>,
    input: Map<String, Value>,
    history: Vec<ChatMessage>,
    live: Option<LiveSession>,
    pending: Option<Clarification>,
}

impl<W: Wizard> WizardSession<W> {
    pub fn new(controller: StreamController<W>) -> Self {
        Self {
            controller,
            input: Map::new(),
            history: Vec::new(),
            live: None,
            pending: None,
        }
    }

    pub fn wizard(&self) -> WizardKind {
        W::KIND
    }

    /// Sets a wizard input field sent alongside the messages
    /// (for example `contractText` or `jurisdiction`).
    pub fn set_input(&mut self, key: impl Into<String>, value: Value) {
        self.input.insert(key.into(), value);
    }

    /// Replaces all wizard input fields. Non-object values are rejected.
    pub fn with_input(mut self, input: Value) -> Result<Self, JurisError> {
        match input {
            Value::Object(map) => {
                self.input = map;
                Ok(self)
            }
            Value::Null => Ok(self),
            _ => Err(JurisError::Validation(
                "wizard input must be a JSON object".into(),
            )),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The clarification the backend is waiting on, if any.
    pub fn pending_clarification(&self) -> Option<&Clarification> {
        self.pending.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Sends a user turn and starts a new session.
    pub fn submit(&mut self, message: &str) -> Result<SessionHandle<W::Phase>, JurisError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(JurisError::Validation("message must not be empty".into()));
        }
        self.cancel();
        self.pending = None;
        self.history.push(ChatMessage::user(message));

        let handle = self.controller.submit(self.request_body())?;
        self.live = Some(LiveSession {
            id: handle.session_id(),
            cancel: handle.cancel_handle(),
        });
        Ok(handle)
    }

    /// Answers the pending clarification with a new session.
    ///
    /// The resolved clarification session is left untouched; the rendered
    /// answers become the next user turn.
    pub fn answer_clarification(
        &mut self,
        answers: &ClarificationAnswers,
    ) -> Result<SessionHandle<W::Phase>, JurisError> {
        let Some(clarification) = &self.pending else {
            return Err(JurisError::Validation(
                "no clarification is awaiting answers".into(),
            ));
        };
        let message = clarification.render_answers(answers)?;
        if message.trim().is_empty() {
            return Err(JurisError::Validation("no answer was provided".into()));
        }
        self.submit(&message)
    }

    /// Waits for `handle` and records its outcome in the conversation.
    pub async fn complete(
        &mut self,
        handle: SessionHandle<W::Phase>,
    ) -> Result<SessionOutcome, JurisError> {
        let id = handle.session_id();
        let outcome = handle.finish().await?;
        self.record(id, &outcome);
        Ok(outcome)
    }

    fn record(&mut self, id: uuid::Uuid, outcome: &SessionOutcome) {
        if self.live.as_ref().is_none_or(|live| live.id != id) {
            debug!(session_id = %id, "ignoring outcome of superseded session");
            return;
        }
        self.live = None;
        match outcome {
            SessionOutcome::Result(result) => {
                self.history
                    .push(ChatMessage::assistant(result.to_history_text()));
            }
            SessionOutcome::Clarification(clarification) => {
                self.pending = Some(clarification.clone());
            }
            SessionOutcome::Error(_) | SessionOutcome::Cancelled => {}
        }
    }

    /// Cancels the live session, if any.
    pub fn cancel(&mut self) {
        if let Some(live) = self.live.take() {
            debug!(session_id = %live.id, "cancelling live session");
            live.cancel.cancel();
        }
    }

    /// Cancels the live session and forgets the conversation.
    pub fn reset(&mut self) {
        self.cancel();
        self.history.clear();
        self.pending = None;
    }

    fn request_body(&self) -> Value {
        let mut body = self.input.clone();
        body.insert(
            "messages".to_string(),
            serde_json::to_value(&self.history).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        Value::Object(body)
    }
}
