use crate::input::{Input, InputKind};
use cogex_core::{Value, TIME_EPSILON};
use std::collections::BTreeSet;

/// Solicits exactly one input, optionally restricted and with a deadline.
///
/// A window is declared on an [`Event`](crate::Event), opened when that event
/// activates, and resolved either by a qualifying input, by its deadline, or
/// by being closed early. A resolved window is inert.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseWindow {
    label: String,
    expected: Option<String>,
    accepted_inputs: Option<BTreeSet<String>>,
    modality: Option<InputKind>,
    deadline: Option<f64>,
    opened_at: Option<f64>,
    captured_input: Option<Input>,
    captured_latency: Option<f64>,
    closed_at: Option<f64>,
    resolved: bool,
}

impl ResponseWindow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            expected: None,
            accepted_inputs: None,
            modality: None,
            deadline: None,
            opened_at: None,
            captured_input: None,
            captured_latency: None,
            closed_at: None,
            resolved: false,
        }
    }

    /// Only these tokens count; everything else is ignored.
    pub fn accepting<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_inputs = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    pub fn expecting(mut self, token: impl Into<String>) -> Self {
        self.expected = Some(token.into());
        self
    }

    /// Seconds after opening at which the window resolves with no input.
    pub fn with_deadline(mut self, seconds: f64) -> Self {
        self.deadline = Some(seconds);
        self
    }

    /// Only inputs of this kind count.
    pub fn only(mut self, kind: InputKind) -> Self {
        self.modality = Some(kind);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }

    pub fn opened_at(&self) -> Option<f64> {
        self.opened_at
    }

    pub fn captured_input(&self) -> Option<&Input> {
        self.captured_input.as_ref()
    }

    pub fn captured_latency(&self) -> Option<f64> {
        self.captured_latency
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_some() && !self.resolved
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn open(&mut self, at_time: f64) {
        self.opened_at = Some(at_time);
        self.captured_input = None;
        self.captured_latency = None;
        self.closed_at = None;
        self.resolved = false;
    }

    pub fn accepts(&self, input: &Input) -> bool {
        if self.modality.is_some_and(|kind| kind != input.kind()) {
            return false;
        }
        match &self.accepted_inputs {
            Some(tokens) => tokens.contains(&input.token()),
            None => true,
        }
    }

    /// Offers the inputs that arrived since the last poll. Returns true once
    /// resolved, whether by capture or by deadline.
    pub fn poll(&mut self, at_time: f64, pending_inputs: &[Input]) -> bool {
        if self.resolved {
            return true;
        }
        let Some(opened_at) = self.opened_at else {
            return false;
        };
        let elapsed = at_time - opened_at;

        if let Some(input) = pending_inputs.iter().find(|i| self.accepts(i)) {
            tracing::debug!(
                label = %self.label,
                token = %input.token(),
                rt = elapsed,
                "response captured"
            );
            self.captured_input = Some(input.clone());
            self.captured_latency = Some(elapsed);
            self.resolved = true;
        } else if self
            .deadline
            .is_some_and(|deadline| elapsed + TIME_EPSILON >= deadline)
        {
            tracing::debug!(label = %self.label, rt = elapsed, "response window timed out");
            self.captured_latency = Some(elapsed);
            self.resolved = true;
        }
        self.resolved
    }

    /// Resolves an unresolved window with no response, e.g. because another
    /// window is opening. The label still gets empty log columns, and events
    /// anchored on it count from `at_time`.
    pub fn close(&mut self, at_time: f64) {
        if !self.resolved {
            tracing::debug!(
                label = %self.label,
                t = at_time,
                "response window closed without input"
            );
            self.closed_at = Some(at_time);
            self.resolved = true;
        }
    }

    /// Absolute time the response completed, once it has: the capture or
    /// timeout, else the moment it was closed.
    pub fn response_time(&self) -> Option<f64> {
        match (self.opened_at, self.captured_latency) {
            (Some(opened_at), Some(latency)) => Some(opened_at + latency),
            _ => self.closed_at,
        }
    }

    pub fn is_correct(&self) -> Option<bool> {
        let expected = self.expected.as_ref()?;
        Some(
            self.captured_input
                .as_ref()
                .is_some_and(|input| input.token() == *expected),
        )
    }

    /// Log columns, keyed by field name; the table prefixes them with the label.
    ///
    /// The set of fields depends only on how the window was declared, so two
    /// trials built from the same definition always produce the same columns.
    pub fn log_fields(&self) -> Vec<(&'static str, Value)> {
        let mut fields = vec![
            ("ref_time", Value::from(self.opened_at)),
            (
                "response",
                Value::from(self.captured_input.as_ref().map(Input::token)),
            ),
            ("rt", Value::from(self.captured_latency)),
        ];
        if let Some(expected) = &self.expected {
            fields.push(("expected", Value::from(expected.as_str())));
            fields.push(("correct", Value::from(self.is_correct())));
        }
        if self.modality == Some(InputKind::Voice) {
            let filename = match &self.captured_input {
                Some(Input::Voice { recording }) => Value::from(recording.as_str()),
                _ => Value::Null,
            };
            fields.push(("filename", filename));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<Input> {
        names.iter().map(|n| Input::key(*n)).collect()
    }

    #[test]
    fn deadline_timeout() {
        let mut w = ResponseWindow::new("press")
            .accepting(["z", "/"])
            .with_deadline(2.0);
        w.open(5.0);
        assert!(!w.poll(6.0, &[]));
        assert!(w.poll(7.0, &[]));
        assert_eq!(w.captured_input(), None);
        assert_eq!(w.captured_latency(), Some(2.0));
    }

    #[test]
    fn deadline_reached_on_the_frame_it_falls_on() {
        let mut w = ResponseWindow::new("press").with_deadline(0.2);
        w.open(0.1);
        assert!(!w.poll(0.29, &[]));
        assert!(w.poll(0.3, &[]));
        assert!((w.captured_latency().unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn captures_first_accepted_input() {
        let mut w = ResponseWindow::new("press").accepting(["z", "/"]);
        w.open(1.0);
        assert!(!w.poll(1.2, &keys(&["q"])));
        assert!(w.poll(1.5, &keys(&["x", "/", "z"])));
        assert_eq!(w.captured_input(), Some(&Input::key("/")));
        assert_eq!(w.captured_latency(), Some(0.5));
        assert_eq!(w.response_time(), Some(1.5));
    }

    #[test]
    fn unrestricted_takes_anything() {
        let mut w = ResponseWindow::new("any");
        w.open(0.0);
        assert!(w.poll(0.1, &[Input::Button(4)]));
        assert_eq!(w.captured_input(), Some(&Input::Button(4)));
    }

    #[test]
    fn resolved_window_is_inert() {
        let mut w = ResponseWindow::new("press");
        w.open(0.0);
        assert!(w.poll(0.25, &keys(&["a"])));
        assert!(w.poll(0.5, &keys(&["b"])));
        assert_eq!(w.captured_input(), Some(&Input::key("a")));
        assert_eq!(w.captured_latency(), Some(0.25));
    }

    #[test]
    fn unopened_window_never_resolves() {
        let mut w = ResponseWindow::new("press").with_deadline(0.0);
        assert!(!w.poll(10.0, &keys(&["a"])));
        assert!(!w.is_open());
    }

    #[test]
    fn closing_early_records_null() {
        let mut w = ResponseWindow::new("press").expecting("z");
        w.open(3.0);
        assert_eq!(w.response_time(), None);
        w.close(4.5);
        assert!(w.is_resolved());
        assert_eq!(w.response_time(), Some(4.5));
        let fields = w.log_fields();
        assert!(fields.contains(&("ref_time", Value::Number(3.0))));
        assert!(fields.contains(&("response", Value::Null)));
        assert!(fields.contains(&("rt", Value::Null)));
        assert!(fields.contains(&("correct", Value::Bool(false))));
    }

    #[test]
    fn voice_window_logs_filename() {
        let mut w = ResponseWindow::new("speak").only(InputKind::Voice);
        w.open(2.0);
        assert!(!w.poll(2.1, &keys(&["space"])));
        let voice = Input::Voice {
            recording: "3.wav".into(),
        };
        assert!(w.poll(2.4, &[voice]));
        assert!(w.log_fields().contains(&("filename", Value::from("3.wav"))));
    }

    #[test]
    fn correctness_against_expected() {
        let mut w = ResponseWindow::new("press").expecting("z");
        w.open(0.0);
        w.poll(0.3, &keys(&["z"]));
        assert_eq!(w.is_correct(), Some(true));
        assert_eq!(ResponseWindow::new("x").is_correct(), None);
    }
}
