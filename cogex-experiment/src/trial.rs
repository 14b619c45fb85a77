use crate::error::{ExperimentError, Result};
use crate::event::Event;
use crate::input::InputSource;
use crate::log::TrialLog;
use cogex_core::{Value, TRIAL_START};
use std::collections::{BTreeSet, VecDeque};

/// What changed during one [`Trial::tick`], by event index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialTick {
    pub deactivated: Vec<usize>,
    pub resolved: Option<String>,
    pub activated: Vec<usize>,
}

/// An ordered set of events sharing one `trial_start`.
#[derive(Debug)]
pub struct Trial {
    pending: VecDeque<Event>,
    active: Vec<Event>,
    log: TrialLog,
    live: Option<String>,
    unlogged: bool,
    started: bool,
}

impl Trial {
    pub fn new(events: Vec<Event>) -> Self {
        let pending: VecDeque<Event> = events
            .into_iter()
            .enumerate()
            .map(|(i, mut event)| {
                event.set_index(i);
                event
            })
            .collect();

        for (a, b) in pending.iter().zip(pending.iter().skip(1)) {
            if a.start().reference() == b.start().reference()
                && b.start().offset() < a.start().offset()
            {
                tracing::warn!(
                    first = a.index(),
                    second = b.index(),
                    "events are not ordered by start; the later one waits for the earlier"
                );
            }
        }

        Self {
            pending,
            active: Vec::new(),
            log: TrialLog::new(),
            live: None,
            unlogged: false,
            started: false,
        }
    }

    /// A trial left out of the log table, e.g. a closing screen.
    pub fn unlogged(mut self) -> Self {
        self.unlogged = true;
        self
    }

    pub fn is_unlogged(&self) -> bool {
        self.unlogged
    }

    pub fn log(&self) -> &TrialLog {
        &self.log
    }

    /// Adds a value to the log before the trial runs.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.log.insert(key, value);
    }

    /// Fails when two response windows share a label, or when a logged
    /// value would land on a response label.
    pub fn check_labels(&self) -> Result<()> {
        let mut labels = BTreeSet::new();
        for window in self.pending.iter().filter_map(|event| event.response_window()) {
            if !labels.insert(window.label()) {
                return Err(ExperimentError::MalformedEvent(format!(
                    "response label `{}` is used by two events",
                    window.label()
                )));
            }
        }
        let clash = self
            .pending
            .iter()
            .flat_map(|event| event.log_keys())
            .chain(self.log.keys())
            .chain(std::iter::once(TRIAL_START))
            .find(|key| labels.contains(key));
        match clash {
            Some(key) => Err(ExperimentError::MalformedEvent(format!(
                "log key `{key}` is also a response label"
            ))),
            None => Ok(()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Label of the response window currently collecting input.
    pub fn live_response(&self) -> Option<&str> {
        self.live.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Stamps `trial_start`; every trial-relative time resolves from here.
    pub fn start(&mut self, t: f64) {
        self.log.insert(TRIAL_START, t);
        self.started = true;
    }

    /// Leading pending events whose start has been reached, in order.
    pub fn events_ready_to_activate(&self, t: f64) -> impl Iterator<Item = &Event> + '_ {
        self.pending
            .iter()
            .take_while(move |event| event.start().is_due(t, &self.log))
    }

    /// Advances the trial to time `t`.
    ///
    /// Order matters: expired events go off first, then the live response
    /// window sees new input, then due events come on. An event switched on
    /// here is therefore visible for at least this frame.
    pub fn tick<I: InputSource + ?Sized>(&mut self, t: f64, input: &mut I) -> TrialTick {
        let mut report = TrialTick::default();

        let log = &self.log;
        self.active.retain_mut(|event| {
            if event.stop().is_due(t, log) {
                event.deactivate();
                report.deactivated.push(event.index());
                false
            } else {
                true
            }
        });

        if let Some(label) = self.live.clone() {
            let inputs = input.drain();
            let resolved = self
                .log
                .response_mut(&label)
                .is_none_or(|window| window.poll(t, &inputs));
            if resolved {
                self.live = None;
                report.resolved = Some(label);
            }
        }

        while self
            .pending
            .front()
            .is_some_and(|event| event.start().is_due(t, &self.log))
        {
            let Some(mut event) = self.pending.pop_front() else {
                break;
            };
            if let Some(window) = event.activate(t, &mut self.log) {
                self.close_live_response(t);
                // Only input after the window opened may answer it.
                input.clear();
                self.live = Some(window.label().to_owned());
                self.log.insert_response(window);
            }
            report.activated.push(event.index());
            self.active.push(event);
        }

        report
    }

    /// Force-resolves the live window with a null response at `t`.
    pub fn close_live_response(&mut self, t: f64) {
        if let Some(label) = self.live.take() {
            if let Some(window) = self.log.response_mut(&label) {
                window.close(t);
            }
        }
    }

    /// Closes any response still collecting input once the trial is over.
    pub fn finish(&mut self, t: f64) {
        self.close_live_response(t);
    }

    /// Switches off whatever is still showing; pending events never run.
    pub fn halt(&mut self, t: f64) {
        for event in &mut self.active {
            event.deactivate();
        }
        self.active.clear();
        self.close_live_response(t);
    }

    pub fn done(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// Latest stop time known ahead of running, in seconds after `trial_start`.
    pub fn planned_duration(&self) -> f64 {
        self.pending
            .iter()
            .chain(&self.active)
            .filter_map(Event::planned_stop)
            .fold(0.0, f64::max)
    }
}
