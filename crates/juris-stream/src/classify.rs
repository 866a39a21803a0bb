use serde_json::Value;
use tracing::debug;

use crate::clarification::Clarification;
use crate::event::WireEvent;
use crate::phases::PhaseName;
use crate::session::{SessionUpdate, StreamSession};

/// Event that ends the stream, handed back to the controller to finalize.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminal {
    Completed(Option<Value>),
    Clarification(Clarification),
    Error(Option<String>),
}

/// What the controller should do after an event was classified.
#[derive(Clone, Debug, PartialEq)]
pub enum Routing<P> {
    /// Keep reading; publish the update if there is one.
    Continue(Option<SessionUpdate<P>>),
    /// Stop reading and resolve the session.
    Finish(Terminal),
}

/// Routes one canonical event into the session.
///
/// Non-terminal events mutate the session in place. Terminal events leave it
/// untouched and are returned for the controller to resolve. Events arriving
/// after the session is frozen are dropped.
pub fn classify<P: PhaseName>(session: &mut StreamSession<P>, event: WireEvent) -> Routing<P> {
    if session.state().is_terminal() {
        debug!(session_id = %session.id(), "dropping event for resolved session");
        return Routing::Continue(None);
    }

    match event {
        WireEvent::Started { message } => {
            session.set_progress(message.clone());
            Routing::Continue(message.map(|message| SessionUpdate::Progress {
                message: Some(message),
                phase: None,
            }))
        }
        WireEvent::Progress { message, phase } => {
            let phase = phase.as_deref().and_then(P::parse);
            if let Some(phase) = &phase
                && !session.phases().is_completed(phase)
            {
                session.phases_mut().set_current_phase(Some(phase.clone()));
            }
            session.set_progress(message.clone());
            Routing::Continue(Some(SessionUpdate::Progress { message, phase }))
        }
        WireEvent::TextDelta(text) => {
            session.append_text(&text);
            Routing::Continue(Some(SessionUpdate::TextDelta { text }))
        }
        WireEvent::PhaseStarted { phase, message } => {
            let Some(parsed) = parse_phase::<P>(session, &phase) else {
                return Routing::Continue(None);
            };
            session.phases_mut().set_current_phase(Some(parsed.clone()));
            session.set_progress(message);
            Routing::Continue(Some(SessionUpdate::PhaseStarted { phase: parsed }))
        }
        WireEvent::PhaseCompleted { phase, result } => {
            let Some(parsed) = parse_phase::<P>(session, &phase) else {
                return Routing::Continue(None);
            };
            let first = session
                .phases_mut()
                .set_phase_result(parsed.clone(), result.clone());
            debug!(session_id = %session.id(), phase = %phase, first, "phase completed");
            Routing::Continue(Some(SessionUpdate::PhaseCompleted {
                phase: parsed,
                result,
                first,
            }))
        }
        WireEvent::ToolCall { tool } => {
            session.set_current_tool(Some(tool.clone()));
            Routing::Continue(Some(SessionUpdate::ToolActivity { tool: Some(tool) }))
        }
        WireEvent::ToolResult => {
            session.set_current_tool(None);
            Routing::Continue(Some(SessionUpdate::ToolActivity { tool: None }))
        }
        WireEvent::Clarification(clarification) => {
            Routing::Finish(Terminal::Clarification(clarification))
        }
        WireEvent::Completed { result } => Routing::Finish(Terminal::Completed(result)),
        WireEvent::Error { message } => Routing::Finish(Terminal::Error(message)),
    }
}

fn parse_phase<P: PhaseName>(session: &StreamSession<P>, name: &str) -> Option<P> {
    let parsed = P::parse(name);
    if parsed.is_none() {
        debug!(
            session_id = %session.id(),
            wizard = %session.wizard(),
            "ignoring phase event without a name"
        );
    } else if let Some(phase) = &parsed
        && !phase.is_known()
    {
        debug!(
            session_id = %session.id(),
            wizard = %session.wizard(),
            phase = name,
            "keeping phase outside wizard pipeline"
        );
    }
    parsed
}
