//! Common imports for driving a wizard session.
pub use crate::{
    Answer, CancelHandle, ChatMessage, Clarification, ClarificationAnswers, ClientConfig,
    JurisError, SessionFailure, SessionHandle, SessionOutcome, SessionResult, SessionSnapshot,
    SessionUpdate, StreamController, Wizard, WizardKind, WizardSession,
};
