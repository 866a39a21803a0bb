use serde_json::Value;
use tracing::debug;

use crate::clarification::Clarification;
use crate::errors::{JurisError, SessionFailure};
use crate::extract;
use crate::phases::{PhaseName, PhaseResultStore};
use crate::wizard::WizardKind;

/// Keys that wrap the actual answer inside a structured string result,
/// checked in this order.
/// Keys whose value is the answer itself, whatever else sits next to them.
const OPINION_KEYS: [&str; 2] = ["legalOpinion", "legal_opinion"];
/// Generic envelope keys, unwrapped only when nothing else sits next to them.
const ENVELOPE_KEYS: [&str; 2] = ["result", "message"];

/// Lifecycle of one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Submitting,
    Streaming,
    ResolvedResult,
    ResolvedClarification,
    ResolvedError,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ResolvedResult | Self::ResolvedClarification | Self::ResolvedError | Self::Cancelled
        )
    }
}

/// A completed phase with its result, as exposed to readers.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PhaseEntry {
    pub phase: String,
    pub result: Value,
}

/// Final answer of a session that resolved successfully.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SessionResult {
    /// Plain text, shown as-is.
    Text(String),
    /// A structured object recovered from the backend output.
    Structured(Value),
    /// Phase results in completion order; the phases are the answer.
    Phases(Vec<PhaseEntry>),
}

impl SessionResult {
    /// Text rendering used for conversation history.
    pub fn to_history_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
            Self::Phases(entries) => {
                let map: serde_json::Map<String, Value> = entries
                    .iter()
                    .map(|entry| (entry.phase.clone(), entry.result.clone()))
                    .collect();
                Value::Object(map).to_string()
            }
        }
    }
}

/// How a session ended.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum SessionOutcome {
    Result(SessionResult),
    Clarification(Clarification),
    Error(SessionFailure),
    Cancelled,
}

impl SessionOutcome {
    fn state(&self) -> SessionState {
        match self {
            Self::Result(_) => SessionState::ResolvedResult,
            Self::Clarification(_) => SessionState::ResolvedClarification,
            Self::Error(_) => SessionState::ResolvedError,
            Self::Cancelled => SessionState::Cancelled,
        }
    }
}

/// Discrete notification emitted as a session progresses.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate<P> {
    Started {
        session_id: uuid::Uuid,
    },
    Progress {
        message: Option<String>,
        phase: Option<P>,
    },
    /// `None` when the last tool finished.
    ToolActivity {
        tool: Option<String>,
    },
    TextDelta {
        text: String,
    },
    PhaseStarted {
        phase: P,
    },
    PhaseCompleted {
        phase: P,
        result: Value,
        first: bool,
    },
    ClarificationReady(Clarification),
    Resolved(SessionOutcome),
}

/// Read-only copy of a session for rendering.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: uuid::Uuid,
    pub wizard: WizardKind,
    pub state: SessionState,
    pub text: String,
    /// Object recovered so far from `text`, when it is JSON.
    pub structured: Option<Value>,
    pub completed_phases: Vec<PhaseEntry>,
    pub current_phase: Option<String>,
    pub current_tool: Option<String>,
    pub progress_message: Option<String>,
    pub outcome: Option<SessionOutcome>,
}

/// Mutable state of one submit action.
///
/// Owned by exactly one read loop; readers only ever see snapshots.
#[derive(Clone, Debug)]
pub struct StreamSession<P: PhaseName> {
    id: uuid::Uuid,
    wizard: WizardKind,
    state: SessionState,
    text: String,
    structured: Option<Value>,
    phases: PhaseResultStore<P>,
    current_tool: Option<String>,
    progress: Option<String>,
    outcome: Option<SessionOutcome>,
}

impl<P: PhaseName> StreamSession<P> {
    pub fn new(wizard: WizardKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            wizard,
            state: SessionState::Idle,
            text: String::new(),
            structured: None,
            phases: PhaseResultStore::new(),
            current_tool: None,
            progress: None,
            outcome: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn wizard(&self) -> WizardKind {
        self.wizard
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The accumulated free text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn structured(&self) -> Option<&Value> {
        self.structured.as_ref()
    }

    pub fn phases(&self) -> &PhaseResultStore<P> {
        &self.phases
    }

    pub fn current_tool(&self) -> Option<&str> {
        self.current_tool.as_deref()
    }

    pub fn progress_message(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    /// `idle → submitting`. Clears anything a previous use left behind.
    pub fn begin_submit(&mut self) -> Result<(), JurisError> {
        if self.state != SessionState::Idle {
            return Err(JurisError::protocol_msg(format!(
                "session {} cannot be submitted from state {:?}",
                self.id, self.state
            )));
        }
        self.text.clear();
        self.structured = None;
        self.phases = PhaseResultStore::new();
        self.current_tool = None;
        self.progress = None;
        self.outcome = None;
        self.state = SessionState::Submitting;
        Ok(())
    }

    /// `submitting → streaming`, once the response body is available.
    pub fn begin_streaming(&mut self) -> Result<(), JurisError> {
        if self.state != SessionState::Submitting {
            return Err(JurisError::protocol_msg(format!(
                "session {} cannot start streaming from state {:?}",
                self.id, self.state
            )));
        }
        self.state = SessionState::Streaming;
        Ok(())
    }

    pub(crate) fn append_text(&mut self, delta: &str) {
        self.text.push_str(delta);
        if looks_structured(&self.text)
            && let Some(value) = extract::extract_json(&self.text)
        {
            self.structured = Some(value);
        }
    }

    pub(crate) fn phases_mut(&mut self) -> &mut PhaseResultStore<P> {
        &mut self.phases
    }

    pub(crate) fn set_current_tool(&mut self, tool: Option<String>) {
        self.current_tool = tool;
    }

    pub(crate) fn set_progress(&mut self, message: Option<String>) {
        if message.is_some() {
            self.progress = message;
        }
    }

    /// Freezes the session with `outcome`.
    ///
    /// Only the first resolution sticks; later calls return `false` and
    /// change nothing.
    pub fn resolve(&mut self, outcome: SessionOutcome) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        debug!(session_id = %self.id, wizard = %self.wizard, outcome = ?outcome.state(), "session resolved");
        self.state = outcome.state();
        self.current_tool = None;
        self.outcome = Some(outcome);
        true
    }

    /// Cancels a live session. No-op (returns `false`) once resolved.
    pub fn cancel(&mut self) -> bool {
        self.resolve(SessionOutcome::Cancelled)
    }

    /// Computes the outcome for a stream that ended normally, on `[DONE]`
    /// or a `completed` event carrying `completed_result`.
    ///
    /// Precedence: a clarification hidden in the output wins; then the
    /// backend `result`; then the accumulated text; then the completed
    /// phases; otherwise an empty text answer.
    pub fn final_outcome(&self, completed_result: Option<&Value>) -> SessionOutcome {
        if let Some(clarification) = self.detect_clarification(completed_result) {
            return SessionOutcome::Clarification(clarification);
        }
        if let Some(result) = completed_result {
            return SessionOutcome::Result(match result {
                Value::String(text) => interpret_text(text),
                other => SessionResult::Structured(other.clone()),
            });
        }
        if !self.text.trim().is_empty() {
            return SessionOutcome::Result(interpret_text(&self.text));
        }
        if !self.phases.is_empty() {
            let entries = self
                .phases
                .iter()
                .map(|(phase, result)| PhaseEntry {
                    phase: phase.as_str().to_string(),
                    result: result.clone(),
                })
                .collect();
            return SessionOutcome::Result(SessionResult::Phases(entries));
        }
        SessionOutcome::Result(SessionResult::Text(String::new()))
    }

    fn detect_clarification(&self, completed_result: Option<&Value>) -> Option<Clarification> {
        let from_result = match completed_result {
            Some(Value::String(text)) => Clarification::detect_in_text(text),
            Some(value @ Value::Object(_)) => Clarification::from_value(value),
            _ => None,
        };
        from_result.or_else(|| {
            (!self.text.trim().is_empty())
                .then(|| Clarification::detect_in_text(&self.text))
                .flatten()
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            wizard: self.wizard,
            state: self.state,
            text: self.text.clone(),
            structured: self.structured.clone(),
            completed_phases: self
                .phases
                .iter()
                .map(|(phase, result)| PhaseEntry {
                    phase: phase.as_str().to_string(),
                    result: result.clone(),
                })
                .collect(),
            current_phase: self.phases.current_phase().map(|p| p.as_str().to_string()),
            current_tool: self.current_tool.clone(),
            progress_message: self.progress.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Whether `text` is JSON-shaped (bare or fenced) rather than prose.
fn looks_structured(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with("```")
}

/// Interprets a text answer: JSON-shaped text becomes structured (unwrapping
/// a known answer key), anything else stays raw text.
fn interpret_text(text: &str) -> SessionResult {
    if !extract::strip_code_fence(text).starts_with('{') {
        return SessionResult::Text(text.to_string());
    }
    let Some(value) = extract::extract_json(text) else {
        return SessionResult::Text(text.to_string());
    };
    let opinion = OPINION_KEYS
        .iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()));
    let wrapped = opinion.or_else(|| match value.as_object() {
        Some(fields) if fields.len() == 1 => ENVELOPE_KEYS
            .iter()
            .find_map(|key| fields.get(*key).filter(|v| !v.is_null())),
        _ => None,
    });
    match wrapped {
        Some(Value::String(inner)) => SessionResult::Text(inner.clone()),
        Some(inner @ Value::Object(_)) => SessionResult::Structured(inner.clone()),
        _ => SessionResult::Structured(value),
    }
}
