use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::classify::{Routing, Terminal, classify};
use crate::config::ClientConfig;
use crate::decode::{DecodedFrame, decode_line};
use crate::errors::{JurisError, SessionFailure};
use crate::event::normalize;
use crate::frame::sse_lines;
use crate::phases::PhaseName;
use crate::session::{SessionOutcome, SessionSnapshot, SessionUpdate, StreamSession};
use crate::transport::{ReqwestTransport, SseTransport, StreamRequest};
use crate::wizard::{Wizard, WizardKind};

/// Handle used to cancel a live session.
///
/// Cancelling twice, or after the session resolved, does nothing.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation. The read loop stops at its next suspension
    /// point and no further frames are applied.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Starts streaming sessions for one wizard.
pub struct StreamController<W: Wizard> {
    transport: Arc<dyn SseTransport>,
    update_buffer: usize,
    _wizard: PhantomData<fn() -> W>,
}

impl<W: Wizard> Clone for StreamController<W> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            update_buffer: self.update_buffer,
            _wizard: PhantomData,
        }
    }
}

impl<W: Wizard> StreamController<W> {
    /// Creates a controller over any transport.
    pub fn new(transport: Arc<dyn SseTransport>, update_buffer: usize) -> Result<Self, JurisError> {
        if update_buffer == 0 {
            return Err(JurisError::Validation(
                "update_buffer must be greater than 0".into(),
            ));
        }
        Ok(Self {
            transport,
            update_buffer,
            _wizard: PhantomData,
        })
    }

    /// Creates a controller talking HTTP to the configured backend.
    pub fn from_config(config: ClientConfig) -> Result<Self, JurisError> {
        let update_buffer = config.update_buffer;
        Self::new(Arc::new(ReqwestTransport::new(config)?), update_buffer)
    }

    pub fn wizard(&self) -> WizardKind {
        W::KIND
    }

    /// Submits `body` and starts a new session on the current tokio runtime.
    ///
    /// `body` must be a JSON object; it is posted as-is.
    pub fn submit(&self, body: serde_json::Value) -> Result<SessionHandle<W::Phase>, JurisError> {
        if !body.is_object() {
            return Err(JurisError::Validation(
                "request body must be a JSON object".into(),
            ));
        }

        let mut session = StreamSession::<W::Phase>::new(W::KIND);
        session.begin_submit()?;
        let session_id = session.id();

        let (tx, rx) = mpsc::channel(self.update_buffer);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
        let (final_tx, final_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        info!(session_id = %session_id, wizard = %W::KIND, "submitting session");
        tokio::spawn(run_session(
            self.transport.clone(),
            StreamRequest {
                wizard: W::KIND,
                body,
            },
            session,
            Publisher {
                tx,
                snapshot_tx,
                backlog: VecDeque::new(),
                closed: false,
            },
            final_tx,
            cancel_rx,
        ));

        Ok(SessionHandle {
            session_id,
            wizard: W::KIND,
            rx,
            snapshot_rx,
            final_rx,
            cancel: CancelHandle {
                tx: Arc::new(cancel_tx),
            },
            saw_resolved: false,
        })
    }

    /// Submits and waits for the outcome, ignoring intermediate updates.
    pub async fn run(&self, body: serde_json::Value) -> Result<SessionOutcome, JurisError> {
        self.submit(body)?.finish().await
    }
}

/// Live view of one submitted session.
///
/// Updates arrive in order through `next_update()`; `snapshot()` reads the
/// latest state at any time; `finish()` waits for the single outcome.
///
/// The read loop never waits for updates to be consumed. Updates that do not
/// fit in the channel queue up in the session task, so a caller that only
/// watches snapshots still sees the session progress and resolve.
pub struct SessionHandle<P> {
    session_id: uuid::Uuid,
    wizard: WizardKind,
    rx: mpsc::Receiver<SessionUpdate<P>>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    final_rx: oneshot::Receiver<SessionOutcome>,
    cancel: CancelHandle,
    saw_resolved: bool,
}

impl<P: PhaseName> SessionHandle<P> {
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn wizard(&self) -> WizardKind {
        self.wizard
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that observes every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Waits for the next update. Returns `None` once the session is over and
    /// all updates were consumed.
    pub async fn next_update(&mut self) -> Option<SessionUpdate<P>> {
        let update = self.rx.recv().await;
        if let Some(SessionUpdate::Resolved(_)) = &update {
            self.saw_resolved = true;
        }
        update
    }

    /// Drains remaining updates and returns the outcome.
    pub async fn finish(mut self) -> Result<SessionOutcome, JurisError> {
        while !self.saw_resolved {
            match self.rx.recv().await {
                Some(SessionUpdate::Resolved(_)) => self.saw_resolved = true,
                Some(_) => {}
                None => break,
            }
        }
        self.final_rx.await.map_err(|_| {
            JurisError::protocol_msg(format!(
                "session {} ended without an outcome (wizard={})",
                self.session_id, self.wizard
            ))
        })
    }
}

struct Publisher<P> {
    tx: mpsc::Sender<SessionUpdate<P>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Updates waiting for room in the channel, oldest first.
    backlog: VecDeque<SessionUpdate<P>>,
    closed: bool,
}

impl<P: PhaseName> Publisher<P> {
    /// Publishes the session snapshot and queues the update, if any.
    fn publish(&mut self, session: &StreamSession<P>, update: Option<SessionUpdate<P>>) {
        self.snapshot_tx.send_replace(session.snapshot());
        if let Some(update) = update {
            self.enqueue(session, update);
        }
    }

    fn enqueue(&mut self, session: &StreamSession<P>, update: SessionUpdate<P>) {
        if self.closed {
            return;
        }
        if !self.backlog.is_empty() {
            self.backlog.push_back(update);
            return;
        }
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                debug!(session_id = %session.id(), "update channel full; queueing");
                self.backlog.push_back(update);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %session.id(), "update receiver dropped; snapshots only");
                self.closed = true;
            }
        }
    }

    fn lagging(&self) -> bool {
        !self.closed && !self.backlog.is_empty()
    }

    /// Moves the oldest queued update into the channel once it has room.
    async fn flush_one(&mut self, session: &StreamSession<P>) {
        match self.tx.reserve().await {
            Ok(permit) => {
                if let Some(update) = self.backlog.pop_front() {
                    permit.send(update);
                }
            }
            Err(_) => {
                debug!(session_id = %session.id(), "update receiver dropped; snapshots only");
                self.closed = true;
                self.backlog.clear();
            }
        }
    }

    /// Resolves the session, then hands any queued updates to the consumer.
    ///
    /// The snapshot and the outcome are published before waiting on the
    /// channel, so neither depends on the consumer draining updates.
    async fn resolve(
        &mut self,
        session: &mut StreamSession<P>,
        outcome: SessionOutcome,
        final_tx: oneshot::Sender<SessionOutcome>,
    ) {
        if !session.resolve(outcome.clone()) {
            return;
        }
        info!(
            session_id = %session.id(),
            wizard = %session.wizard(),
            state = ?session.state(),
            "session finished"
        );
        self.snapshot_tx.send_replace(session.snapshot());
        if let SessionOutcome::Clarification(clarification) = &outcome {
            self.enqueue(session, SessionUpdate::ClarificationReady(clarification.clone()));
        }
        self.enqueue(session, SessionUpdate::Resolved(outcome.clone()));
        let _ = final_tx.send(outcome);
        while self.lagging() {
            self.flush_one(session).await;
        }
    }
}

async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Every cancel handle is gone; the session can no longer be cancelled.
        std::future::pending::<()>().await;
    }
}

async fn run_session<P: PhaseName>(
    transport: Arc<dyn SseTransport>,
    request: StreamRequest,
    mut session: StreamSession<P>,
    mut publisher: Publisher<P>,
    final_tx: oneshot::Sender<SessionOutcome>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        biased;
        _ = cancelled(&mut cancel_rx) => None,
        opened = transport.open(&request) => Some(opened),
    };
    let bytes = match opened {
        None => {
            publisher
                .resolve(&mut session, SessionOutcome::Cancelled, final_tx)
                .await;
            return;
        }
        Some(Err(err)) => {
            warn!(session_id = %session.id(), error = %err, "failed to open stream");
            let outcome = SessionOutcome::Error(SessionFailure::from(&err));
            publisher.resolve(&mut session, outcome, final_tx).await;
            return;
        }
        Some(Ok(bytes)) => bytes,
    };

    if let Err(err) = session.begin_streaming() {
        let outcome = SessionOutcome::Error(SessionFailure::Transport {
            message: err.to_string(),
            status: None,
        });
        publisher.resolve(&mut session, outcome, final_tx).await;
        return;
    }
    let started = SessionUpdate::Started {
        session_id: session.id(),
    };
    publisher.publish(&session, Some(started));

    let mut lines = Box::pin(sse_lines(bytes));
    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => break SessionOutcome::Cancelled,
            _ = publisher.flush_one(&session), if publisher.lagging() => continue,
            next = lines.next() => next,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                warn!(session_id = %session.id(), error = %err, "stream read failed");
                break SessionOutcome::Error(SessionFailure::from(&err));
            }
            None => {
                debug!(session_id = %session.id(), "stream ended without [DONE]");
                break session.final_outcome(None);
            }
        };

        let event = match decode_line(&line) {
            None => continue,
            Some(DecodedFrame::Done) => break session.final_outcome(None),
            Some(DecodedFrame::Payload(value)) => match normalize(&value) {
                Some(event) => event,
                None => {
                    debug!(session_id = %session.id(), "ignoring unrecognized event");
                    continue;
                }
            },
        };

        // A frame decoded before cancellation was observed is discarded.
        if *cancel_rx.borrow() {
            break SessionOutcome::Cancelled;
        }

        match classify(&mut session, event) {
            Routing::Continue(update) => publisher.publish(&session, update),
            Routing::Finish(Terminal::Completed(result)) => {
                break session.final_outcome(result.as_ref());
            }
            Routing::Finish(Terminal::Clarification(clarification)) => {
                break SessionOutcome::Clarification(clarification);
            }
            Routing::Finish(Terminal::Error(message)) => {
                break SessionOutcome::Error(SessionFailure::Backend { message });
            }
        }
    };

    // Dropping the line stream drops the response body, which aborts the
    // underlying request when the transport supports it.
    drop(lines);
    publisher.resolve(&mut session, outcome, final_tx).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{GENERIC_ERROR_MESSAGE, TransportError};
    use crate::frame::ByteStream;
    use crate::session::{PhaseEntry, SessionResult, SessionState};
    use crate::wizard::{ContractAnalysis, ContractPhase, LegalChat};
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum FakeBehavior {
        Chunks(Vec<Result<&'static str, TransportError>>),
        Status(u16),
        /// Sends the chunks, then never ends.
        Hang(Vec<&'static str>),
    }

    struct FakeTransport {
        behavior: FakeBehavior,
        opened: Arc<AtomicUsize>,
    }

    impl FakeTransport {
        fn chunks(chunks: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                behavior: FakeBehavior::Chunks(chunks.iter().map(|c| Ok(*c)).collect()),
                opened: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait::async_trait]
    impl SseTransport for FakeTransport {
        async fn open(&self, _request: &StreamRequest) -> Result<ByteStream, TransportError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::Chunks(chunks) => {
                    let items: Vec<Result<bytes::Bytes, TransportError>> = chunks
                        .iter()
                        .map(|c| {
                            c.clone()
                                .map(|text| bytes::Bytes::from_static(text.as_bytes()))
                        })
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::Status(status) => Err(TransportError::Status {
                    status: *status,
                    body: "upstream unavailable".into(),
                }),
                FakeBehavior::Hang(chunks) => {
                    let items: Vec<Result<bytes::Bytes, TransportError>> = chunks
                        .iter()
                        .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes())))
                        .collect();
                    Ok(Box::pin(stream::iter(items).chain(stream::pending())))
                }
            }
        }
    }

    /// Cancels the session from inside the body stream, in the same poll that
    /// yields a complete frame.
    struct CancelDuringRead {
        cancel: Mutex<Option<CancelHandle>>,
    }

    #[async_trait::async_trait]
    impl SseTransport for CancelDuringRead {
        async fn open(&self, _request: &StreamRequest) -> Result<ByteStream, TransportError> {
            let cancel = self.cancel.lock().expect("lock").take();
            let chunk = stream::once(async move {
                if let Some(cancel) = cancel {
                    cancel.cancel();
                }
                Ok::<_, TransportError>(bytes::Bytes::from_static(
                    b"data: {\"type\":\"content\",\"content\":\"late\"}\n",
                ))
            });
            Ok(Box::pin(chunk.chain(stream::pending())))
        }
    }

    fn chat(transport: Arc<FakeTransport>) -> StreamController<LegalChat> {
        StreamController::new(transport, 16).expect("controller")
    }

    fn contract(transport: Arc<FakeTransport>) -> StreamController<ContractAnalysis> {
        StreamController::new(transport, 16).expect("controller")
    }

    fn body() -> serde_json::Value {
        json!({"messages": [{"role": "user", "content": "Bonjour"}]})
    }

    #[tokio::test]
    async fn happy_path_text_stream_resolves_to_joined_text() {
        let outcome = chat(FakeTransport::chunks(&[
            "data:{\"type\":\"content\",\"content\":\"Hello\"}\n",
            "data:{\"type\":\"content\",\"content\":\" world\"}\n",
            "data:[DONE]\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Text("Hello world".into()))
        );
    }

    #[tokio::test]
    async fn same_stream_split_mid_frame_gives_same_outcome() {
        let outcome = chat(FakeTransport::chunks(&[
            "data:{\"type\":\"content\",\"con",
            "tent\":\"Hel",
            "lo\"}\ndata:{\"type\":\"content\",\"content\":\" world\"}\nda",
            "ta:[DONE]\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Text("Hello world".into()))
        );
    }

    #[tokio::test]
    async fn phased_completion_keeps_arrival_order() {
        let controller = contract(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"phase\":\"metadata\",\"status\":\"completed\",\"content\":{\"parties\":[\"A\",\"B\"]}}\n",
            "data: {\"type\":\"content\",\"phase\":\"risks\",\"status\":\"completed\",\"content\":{\"level\":\"medium\"}}\n",
            "data: [DONE]\n",
        ]));
        let mut handle = controller.submit(body()).expect("submit");
        let mut completed = Vec::new();
        while let Some(update) = handle.next_update().await {
            if let SessionUpdate::PhaseCompleted { phase, .. } = update {
                completed.push(phase);
            }
        }
        assert_eq!(completed, [ContractPhase::Metadata, ContractPhase::Risks]);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SessionState::ResolvedResult);
        let names: Vec<&str> = snapshot
            .completed_phases
            .iter()
            .map(|entry| entry.phase.as_str())
            .collect();
        assert_eq!(names, ["metadata", "risks"]);

        let outcome = handle.finish().await.expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Phases(vec![
                PhaseEntry {
                    phase: "metadata".into(),
                    result: json!({"parties": ["A", "B"]}),
                },
                PhaseEntry {
                    phase: "risks".into(),
                    result: json!({"level": "medium"}),
                },
            ]))
        );
    }

    #[tokio::test]
    async fn clarification_short_circuits_before_done() {
        let transport = Arc::new(FakeTransport {
            behavior: FakeBehavior::Hang(vec![
                "data: {\"type\":\"clarification\",\"title\":\"Précisions\",\"questions\":[{\"id\":\"q1\",\"question\":\"Montant ?\",\"type\":\"amount\",\"required\":true}]}\n",
            ]),
            opened: Arc::new(AtomicUsize::new(0)),
        });
        let mut handle = contract(transport).submit(body()).expect("submit");

        let mut saw_ready = false;
        while let Some(update) = handle.next_update().await {
            match update {
                SessionUpdate::ClarificationReady(c) => {
                    assert_eq!(c.title, "Précisions");
                    saw_ready = true;
                }
                SessionUpdate::Resolved(_) => break,
                _ => {}
            }
        }
        assert!(saw_ready);
        assert!(matches!(
            handle.finish().await.expect("outcome"),
            SessionOutcome::Clarification(c) if c.questions[0].id == "q1"
        ));
    }

    #[tokio::test]
    async fn malformed_frame_between_valid_frames_is_skipped() {
        let outcome = chat(FakeTransport::chunks(&[
            "data:{\"type\":\"content\",\"content\":\"Avant\"}\n",
            "data:{not valid json\n",
            "data:{\"type\":\"content\",\"content\":\" après\"}\n",
            "data:[DONE]\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Text("Avant après".into()))
        );
    }

    #[tokio::test]
    async fn non_ok_status_resolves_to_error() {
        let transport = Arc::new(FakeTransport {
            behavior: FakeBehavior::Status(503),
            opened: Arc::new(AtomicUsize::new(0)),
        });
        let outcome = chat(transport).run(body()).await.expect("outcome");
        match outcome {
            SessionOutcome::Error(failure) => {
                assert!(matches!(
                    failure,
                    SessionFailure::Transport {
                        status: Some(503),
                        ..
                    }
                ));
                assert_eq!(failure.user_message(), GENERIC_ERROR_MESSAGE);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_error_event_is_surfaced_verbatim() {
        let outcome = chat(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"content\":\"Début\"}\n",
            "data: {\"type\":\"error\",\"error\":\"Document illisible\"}\n",
            "data: {\"type\":\"content\",\"content\":\"ignored\"}\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Error(SessionFailure::Backend {
                message: Some("Document illisible".into())
            })
        );
    }

    #[tokio::test]
    async fn read_error_mid_stream_resolves_to_transport_error() {
        let transport = Arc::new(FakeTransport {
            behavior: FakeBehavior::Chunks(vec![
                Ok("data: {\"type\":\"content\",\"content\":\"x\"}\n"),
                Err(TransportError::read("connection reset")),
            ]),
            opened: Arc::new(AtomicUsize::new(0)),
        });
        let outcome = chat(transport).run(body()).await.expect("outcome");
        assert!(matches!(
            outcome,
            SessionOutcome::Error(SessionFailure::Transport { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn completed_event_result_wins_over_text() {
        let outcome = chat(FakeTransport::chunks(&[
            "data: {\"type\":\"started\",\"message\":\"Recherche\"}\n",
            "data: {\"type\":\"tool_call\",\"tool\":\"jurisprudence\"}\n",
            "data: {\"type\":\"tool_result\"}\n",
            "data: {\"type\":\"content\",\"content\":\"brouillon\"}\n",
            "data: {\"type\":\"completed\",\"result\":{\"answer\":\"Oui\"}}\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Structured(json!({"answer": "Oui"})))
        );
    }

    #[tokio::test]
    async fn clarification_detected_in_accumulated_text_at_done() {
        let outcome = chat(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"content\":\"```json\\n{\\\"title\\\":\\\"Précisions\\\",\"}\n",
            "data: {\"type\":\"content\",\"content\":\"\\\"questions\\\":[{\\\"id\\\":\\\"ville\\\",\\\"question\\\":\\\"Ville ?\\\"}]}\\n```\"}\n",
            "data: [DONE]\n",
        ]))
        .run(body())
        .await
        .expect("outcome");
        assert!(matches!(
            outcome,
            SessionOutcome::Clarification(c) if c.questions[0].id == "ville"
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_loop_and_is_idempotent() {
        let transport = Arc::new(FakeTransport {
            behavior: FakeBehavior::Hang(vec!["data: {\"type\":\"content\",\"content\":\"a\"}\n"]),
            opened: Arc::new(AtomicUsize::new(0)),
        });
        let mut handle = chat(transport).submit(body()).expect("submit");
        let cancel = handle.cancel_handle();

        loop {
            match handle.next_update().await {
                Some(SessionUpdate::TextDelta { text }) => {
                    assert_eq!(text, "a");
                    break;
                }
                Some(_) => {}
                None => panic!("stream closed early"),
            }
        }
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());

        assert_eq!(handle.finish().await.expect("outcome"), SessionOutcome::Cancelled);
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_after_resolution_keeps_outcome() {
        let mut handle = chat(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"content\":\"fini\"}\n",
            "data: [DONE]\n",
        ]))
        .submit(body())
        .expect("submit");
        while let Some(update) = handle.next_update().await {
            if matches!(update, SessionUpdate::Resolved(_)) {
                break;
            }
        }
        handle.cancel();
        assert_eq!(handle.snapshot().state, SessionState::ResolvedResult);
        assert_eq!(
            handle.finish().await.expect("outcome"),
            SessionOutcome::Result(SessionResult::Text("fini".into()))
        );
    }

    #[tokio::test]
    async fn dropped_update_receiver_does_not_block_session() {
        let controller = chat(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"content\":\"x\"}\n",
            "data: [DONE]\n",
        ]));
        let handle = controller.submit(body()).expect("submit");
        let mut snapshots = handle.subscribe();
        drop(handle);
        let resolved = snapshots
            .wait_for(|s| s.state.is_terminal())
            .await
            .expect("snapshot")
            .clone();
        assert_eq!(resolved.text, "x");
    }

    #[tokio::test]
    async fn non_object_body_is_rejected_before_opening() {
        let transport = FakeTransport::chunks(&[]);
        let opened = transport.opened.clone();
        let result = chat(transport).submit(json!("hello"));
        assert!(matches!(result, Err(JurisError::Validation(_))));
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn phases_outside_the_known_pipeline_are_kept() {
        let handle = contract(FakeTransport::chunks(&[
            "data: {\"type\":\"content\",\"phase\":\"parties\",\"status\":\"completed\",\"content\":{\"count\":2}}\n",
            "data: {\"type\":\"phase_result\",\"phase\":\"obligations\",\"result\":{\"items\":[]}}\n",
            "data: [DONE]\n",
        ]))
        .submit(body())
        .expect("submit");
        let snapshots = handle.subscribe();

        let outcome = handle.finish().await.expect("outcome");
        assert_eq!(
            outcome,
            SessionOutcome::Result(SessionResult::Phases(vec![
                PhaseEntry {
                    phase: "parties".into(),
                    result: json!({"count": 2}),
                },
                PhaseEntry {
                    phase: "obligations".into(),
                    result: json!({"items": []}),
                },
            ]))
        );
        let names: Vec<String> = snapshots
            .borrow()
            .completed_phases
            .iter()
            .map(|entry| entry.phase.clone())
            .collect();
        assert_eq!(names, ["parties", "obligations"]);
    }

    #[tokio::test]
    async fn snapshots_resolve_while_updates_sit_unread() {
        let controller = StreamController::<LegalChat>::new(
            FakeTransport::chunks(&[
                "data: {\"type\":\"content\",\"content\":\"x\"}\n",
                "data: {\"type\":\"content\",\"content\":\"x\"}\n",
                "data: {\"type\":\"content\",\"content\":\"x\"}\n",
                "data: {\"type\":\"content\",\"content\":\"x\"}\n",
                "data: {\"type\":\"content\",\"content\":\"x\"}\n",
                "data: [DONE]\n",
            ]),
            2,
        )
        .expect("controller");
        let mut handle = controller.submit(body()).expect("submit");
        let mut snapshots = handle.subscribe();

        let resolved = tokio::time::timeout(
            Duration::from_secs(2),
            snapshots.wait_for(|s| s.state.is_terminal()),
        )
        .await
        .expect("session stalled behind unread updates")
        .expect("snapshot")
        .clone();
        assert_eq!(resolved.text, "xxxxx");
        assert_eq!(resolved.state, SessionState::ResolvedResult);

        // Nothing was dropped while the consumer lagged.
        let mut deltas = String::new();
        while let Some(update) = handle.next_update().await {
            if let SessionUpdate::TextDelta { text } = update {
                deltas.push_str(&text);
            }
        }
        assert_eq!(deltas, "xxxxx");
        assert_eq!(
            handle.finish().await.expect("outcome"),
            SessionOutcome::Result(SessionResult::Text("xxxxx".into()))
        );
    }

    #[tokio::test]
    async fn frame_read_in_the_same_poll_as_cancel_is_discarded() {
        let transport = Arc::new(CancelDuringRead {
            cancel: Mutex::new(None),
        });
        let controller = StreamController::<LegalChat>::new(transport.clone(), 16)
            .expect("controller");
        let mut handle = controller.submit(body()).expect("submit");
        *transport.cancel.lock().expect("lock") = Some(handle.cancel_handle());

        while let Some(update) = handle.next_update().await {
            assert!(
                !matches!(update, SessionUpdate::TextDelta { .. }),
                "frame applied after cancellation"
            );
        }
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SessionState::Cancelled);
        assert_eq!(snapshot.text, "");
        assert_eq!(handle.finish().await.expect("outcome"), SessionOutcome::Cancelled);
    }
}
