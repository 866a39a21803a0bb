//! Streaming core for the legal-assistant wizards.
//!
//! Reads the backend's Server-Sent Events, normalizes them, and assembles
//! the incremental result (free text, phase results, clarifications) that
//! the front end renders.
//!
//! # Usage
//!
//! ```no_run
//! use juris_stream::prelude::*;
//! use juris_stream::wizard::ContractAnalysis;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), JurisError> {
//! let controller = StreamController::<ContractAnalysis>::from_config(ClientConfig::from_env()?)?;
//! let mut wizard = WizardSession::new(controller)
//!     .with_input(serde_json::json!({"contractText": "Bail commercial..."}))?;
//!
//! let mut handle = wizard.submit("Analyse ce contrat")?;
//! while let Some(update) = handle.next_update().await {
//!     if let SessionUpdate::PhaseCompleted { phase, .. } = update {
//!         println!("phase terminée : {phase}");
//!     }
//! }
//! match wizard.complete(handle).await? {
//!     SessionOutcome::Result(result) => println!("{}", result.to_history_text()),
//!     SessionOutcome::Clarification(c) => println!("questions : {}", c.questions.len()),
//!     SessionOutcome::Error(failure) => eprintln!("{}", failure.user_message()),
//!     SessionOutcome::Cancelled => {}
//! }
//! # Ok(())
//! # }
//! ```

/// Clarification model, detection and answer rendering.
pub mod clarification;
/// Applies normalized events to session state.
pub mod classify;
/// Client and PDF configuration.
pub mod config;
/// Spawned read loop, cancellation and update delivery.
pub mod controller;
/// Multi-turn conversation driver.
pub mod conversation;
/// `data:` line decoding.
pub mod decode;
/// Public error types.
pub mod errors;
/// Wire JSON to canonical events.
pub mod event;
/// JSON recovery from model output.
pub mod extract;
/// SSE line framing over a byte stream.
pub mod frame;
/// Logging setup.
pub mod observability;
/// PDF generation client.
pub mod pdf;
/// Per-session phase results.
pub mod phases;
/// Common imports for typical usage.
pub mod prelude;
/// Session state, snapshots and outcomes.
pub mod session;
/// HTTP transport seam.
pub mod transport;
/// Wizard definitions and phase vocabularies.
pub mod wizard;

pub use clarification::{Answer, Clarification, ClarificationAnswers, Question, QuestionKind};
pub use config::{ClientConfig, PdfConfig};
pub use controller::{CancelHandle, SessionHandle, StreamController};
pub use conversation::{ChatMessage, Role, WizardSession};
pub use errors::{JurisError, PdfError, SessionFailure, TransportError};
pub use event::WireEvent;
pub use observability::init_observability;
pub use pdf::{PdfDocument, PdfJobApi, PdfResponse, ReqwestPdfJobApi, generate_pdf};
pub use phases::{PhaseName, PhaseResultStore};
pub use session::{
    PhaseEntry, SessionOutcome, SessionResult, SessionSnapshot, SessionState, SessionUpdate,
    StreamSession,
};
pub use transport::{ReqwestTransport, SseTransport, StreamRequest};
pub use wizard::{Wizard, WizardKind};
