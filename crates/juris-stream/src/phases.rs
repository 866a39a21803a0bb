use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use serde_json::Value;

/// A phase vocabulary: the phase names one wizard knows, plus whatever else
/// the backend reports.
pub trait PhaseName: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Wire name of the phase.
    fn as_str(&self) -> &str;

    /// Parses a wire name. Only blank names are rejected; names outside the
    /// known set are kept rather than dropped.
    fn parse(name: &str) -> Option<Self>;

    /// Whether the phase belongs to the wizard's own pipeline.
    fn is_known(&self) -> bool {
        true
    }
}

/// Open vocabulary: every name is accepted as-is.
impl PhaseName for String {
    fn as_str(&self) -> &str {
        self
    }

    fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn is_known(&self) -> bool {
        false
    }
}

/// Latest result per phase, plus the order in which phases first completed.
///
/// Phases are only ever added or overwritten. There is no removal; a new
/// session starts from a new, empty store.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseResultStore<P: PhaseName> {
    results: HashMap<P, Value>,
    completed: Vec<P>,
    current: Option<P>,
}

impl<P: PhaseName> Default for PhaseResultStore<P> {
    fn default() -> Self {
        Self {
            results: HashMap::new(),
            completed: Vec::new(),
            current: None,
        }
    }
}

impl<P: PhaseName> PhaseResultStore<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` as the result of `phase`.
    ///
    /// Returns `true` when the phase completed for the first time. The
    /// in-flight marker is cleared if it pointed at this phase.
    pub fn set_phase_result(&mut self, phase: P, value: Value) -> bool {
        let first = !self.results.contains_key(&phase);
        if first {
            self.completed.push(phase.clone());
        }
        if self.current.as_ref() == Some(&phase) {
            self.current = None;
        }
        self.results.insert(phase, value);
        first
    }

    /// Marks a phase as in flight (or clears the marker with `None`).
    pub fn set_current_phase(&mut self, phase: Option<P>) {
        self.current = phase;
    }

    pub fn is_completed(&self, phase: &P) -> bool {
        self.results.contains_key(phase)
    }

    pub fn result(&self, phase: &P) -> Option<&Value> {
        self.results.get(phase)
    }

    /// Completed phases in first-completion order.
    pub fn completed(&self) -> &[P] {
        &self.completed
    }

    pub fn current_phase(&self) -> Option<&P> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Iterates `(phase, result)` pairs in completion order.
    pub fn iter(&self) -> impl Iterator<Item = (&P, &Value)> {
        self.completed
            .iter()
            .filter_map(|phase| self.results.get(phase).map(|value| (phase, value)))
    }
}
