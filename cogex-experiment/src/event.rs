use crate::error::{ExperimentError, Result};
use crate::log::TrialLog;
use crate::response::ResponseWindow;
use cogex_core::{RelativeTime, StimulusHandle, StimulusParam, Value, TRIAL_START};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Active,
    Done,
}

/// A scheduled show/hide of one stimulus, with optional log values and an
/// optional response window.
pub struct Event {
    index: usize,
    target: Option<StimulusHandle>,
    start: RelativeTime,
    stop: RelativeTime,
    params: Vec<StimulusParam>,
    log: BTreeMap<String, Value>,
    response: Option<ResponseWindow>,
    state: EventState,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("index", &self.index)
            .field("target", &self.target_name())
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Event {
    /// Starts an event that drives `target`.
    pub fn on(target: StimulusHandle) -> EventBuilder {
        EventBuilder::new(Some(target))
    }

    /// Starts a timing-only event with no stimulus.
    pub fn silent() -> EventBuilder {
        EventBuilder::new(None)
    }

    /// Position within its trial.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn start(&self) -> &RelativeTime {
        &self.start
    }

    pub fn stop(&self) -> &RelativeTime {
        &self.stop
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn target_name(&self) -> Option<String> {
        self.target.as_ref().map(|t| t.borrow().name().to_owned())
    }

    pub fn response_window(&self) -> Option<&ResponseWindow> {
        self.response.as_ref()
    }

    /// Keys this event contributes to the trial log on activation.
    pub fn log_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.log.keys().map(String::as_str)
    }

    /// Latest stop time known without running the trial: stops anchored on
    /// `trial_start` only.
    pub fn planned_stop(&self) -> Option<f64> {
        (self.stop.reference() == TRIAL_START).then(|| self.stop.offset())
    }

    /// Applies this event's parameters without touching its lifecycle.
    /// Used for the between-block pause screen.
    pub fn display(&self) {
        let Some(target) = &self.target else {
            return;
        };
        let mut stimulus = target.borrow_mut();
        for param in std::iter::once(&StimulusParam::On(true)).chain(&self.params) {
            if let Err(err) = stimulus.apply(param) {
                tracing::warn!(event = self.index, %err, "stimulus rejected parameter");
            }
        }
    }

    /// Turns the target off regardless of lifecycle.
    pub fn conceal(&self) {
        if let Some(target) = &self.target {
            if let Err(err) = target.borrow_mut().apply(&StimulusParam::On(false)) {
                tracing::warn!(event = self.index, %err, "stimulus could not be turned off");
            }
        }
    }

    /// Shows the target, merges log contributions into `log` and returns the
    /// response window, opened at `at_time`, if the event declares one.
    pub fn activate(&mut self, at_time: f64, log: &mut TrialLog) -> Option<ResponseWindow> {
        if self.state != EventState::Pending {
            return None;
        }
        self.display();
        for (key, value) in &self.log {
            log.insert(key.clone(), value.clone());
        }
        self.state = EventState::Active;
        tracing::trace!(event = self.index, target = ?self.target_name(), t = at_time, "event on");
        self.response.take().map(|mut window| {
            window.open(at_time);
            window
        })
    }

    /// Turns the target off. Only an active event touches its target, so a
    /// second call is a no-op.
    pub fn deactivate(&mut self) {
        if self.state == EventState::Active {
            self.conceal();
            tracing::trace!(event = self.index, target = ?self.target_name(), "event off");
        }
        self.state = EventState::Done;
    }
}

/// Collects an event's declaration; `build` checks it before any trial runs.
pub struct EventBuilder {
    target: Option<StimulusHandle>,
    start: RelativeTime,
    stop: Option<RelativeTime>,
    duration: Option<f64>,
    params: Vec<StimulusParam>,
    log: BTreeMap<String, Value>,
    response: Option<ResponseWindow>,
}

impl EventBuilder {
    fn new(target: Option<StimulusHandle>) -> Self {
        Self {
            target,
            start: RelativeTime::default(),
            stop: None,
            duration: None,
            params: Vec::new(),
            log: BTreeMap::new(),
            response: None,
        }
    }

    pub fn start(mut self, start: RelativeTime) -> Self {
        self.start = start;
        self
    }

    /// Start as seconds after `trial_start`.
    pub fn start_at(self, seconds: f64) -> Result<Self> {
        Ok(self.start(RelativeTime::after_trial_start(seconds)?))
    }

    pub fn stop(mut self, stop: RelativeTime) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Stop as seconds after `trial_start`.
    pub fn stop_at(self, seconds: f64) -> Result<Self> {
        Ok(self.stop(RelativeTime::after_trial_start(seconds)?))
    }

    /// Stop as `start + seconds`; ignored when an explicit stop is given.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn param(mut self, param: StimulusParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn log(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.log.insert(key.into(), value.into());
        self
    }

    pub fn response(mut self, window: ResponseWindow) -> Self {
        self.response = Some(window);
        self
    }

    pub fn build(self) -> Result<Event> {
        let stop = match (self.stop, self.duration) {
            (Some(stop), _) => stop,
            (None, Some(duration)) => self.start.add(duration)?,
            (None, None) => {
                return Err(ExperimentError::MalformedEvent(format!(
                    "event starting at {} has neither a stop time nor a duration",
                    self.start
                )));
            }
        };

        match &self.target {
            Some(target) => {
                let stimulus = target.borrow();
                for param in &self.params {
                    stimulus.validate(param)?;
                }
            }
            None if !self.params.is_empty() => {
                return Err(ExperimentError::MalformedEvent(
                    "stimulus parameters given for an event without a target".to_owned(),
                ));
            }
            None => {}
        }

        Ok(Event {
            index: 0,
            target: self.target,
            start: self.start,
            stop,
            params: self.params,
            log: self.log,
            response: self.response,
            state: EventState::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_core::{share, Stimulus, StimulusType, ToneStimulus, VisualStimulus};

    fn fixation() -> StimulusHandle {
        share(VisualStimulus::new(
            "fixation",
            StimulusType::Text {
                content: "+".into(),
                size: 55.0,
                color: [255; 4],
            },
        ))
    }

    #[test]
    fn stop_from_duration() {
        let event = Event::silent().start_at(2.0).unwrap().duration(0.5).build().unwrap();
        assert_eq!(event.stop(), &RelativeTime::after_trial_start(2.5).unwrap());
        assert_eq!(event.planned_stop(), Some(2.5));
    }

    #[test]
    fn explicit_stop_wins_over_duration() {
        let event = Event::silent()
            .stop(RelativeTime::new("press", 1.0).unwrap())
            .duration(9.0)
            .build()
            .unwrap();
        assert_eq!(event.stop().reference(), "press");
        assert_eq!(event.planned_stop(), None);
    }

    #[test]
    fn missing_stop_is_malformed() {
        let err = Event::silent().start_at(1.0).unwrap().build().unwrap_err();
        assert!(matches!(err, ExperimentError::MalformedEvent(_)));
    }

    #[test]
    fn non_finite_duration_is_rejected() {
        let err = Event::silent().duration(f64::NAN).build().unwrap_err();
        assert!(matches!(err, ExperimentError::Timing(_)));
    }

    #[test]
    fn parameters_checked_against_capabilities() {
        let beep = share(ToneStimulus::new("beep", 440.0, 0.5));
        let err = Event::on(beep)
            .param(StimulusParam::Text("x".into()))
            .duration(1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ExperimentError::Stimulus(_)));

        let err = Event::silent()
            .param(StimulusParam::On(true))
            .duration(1.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ExperimentError::MalformedEvent(_)));
    }

    #[test]
    fn activation_lifecycle() {
        let target = fixation();
        let mut event = Event::on(target.clone())
            .param(StimulusParam::Position([512.0, 384.0]))
            .log("type", "fixation")
            .response(ResponseWindow::new("press"))
            .duration(1.0)
            .build()
            .unwrap();
        let mut log = TrialLog::new();

        let window = event.activate(0.5, &mut log).unwrap();
        assert_eq!(window.opened_at(), Some(0.5));
        assert!(target.borrow().is_on());
        assert_eq!(log.value("type"), Some(&Value::from("fixation")));
        assert_eq!(event.state(), EventState::Active);

        assert!(event.activate(0.6, &mut log).is_none());

        event.deactivate();
        assert!(!target.borrow().is_on());
        event.deactivate();
        assert_eq!(event.state(), EventState::Done);
    }

    #[test]
    fn done_event_leaves_shared_target_alone() {
        let target = fixation();
        let mut first = Event::on(target.clone()).duration(1.0).build().unwrap();
        let mut second = Event::on(target.clone()).duration(1.0).build().unwrap();
        let mut log = TrialLog::new();

        first.activate(0.0, &mut log);
        first.deactivate();
        second.activate(1.0, &mut log);
        first.deactivate();
        assert!(target.borrow().is_on());
    }
}
