use crate::config::{Delimiter, ExperimentConfig};
use crate::error::Result;
use crate::event::Event;
use crate::input::InputSource;
use crate::log::LogTable;
use crate::trial::Trial;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    BlockPaused,
    Finished,
}

/// Notifications emitted by [`TrialScheduler::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    TrialStarted(usize),
    TrialCompleted(usize),
    BlockPaused,
    Finished,
}

/// Drives a sequence of trials from the host's frame tick.
///
/// Nothing here blocks or sleeps: each [`update`](Self::update) looks at how
/// much time has passed and does whatever is due, then returns. The cursor
/// (current trial, whether it has been started) is the only thing carried
/// between ticks.
#[derive(Debug)]
pub struct TrialScheduler {
    trials: Vec<Trial>,
    pause_event: Option<Event>,
    trials_per_block: usize,
    state: SchedulerState,
    cursor: usize,
    block_count: usize,
    awaiting_start: bool,
    last_t: f64,
}

impl TrialScheduler {
    pub fn new(trials: Vec<Trial>, config: &ExperimentConfig) -> Self {
        Self {
            trials,
            pause_event: None,
            trials_per_block: config.trials_per_block,
            state: SchedulerState::NotStarted,
            cursor: 0,
            block_count: 0,
            awaiting_start: true,
            last_t: 0.0,
        }
    }

    /// Event displayed between blocks and once the run is over.
    pub fn with_pause_event(mut self, event: Event) -> Self {
        self.pause_event = Some(event);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SchedulerState::Finished
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    /// Index of the current trial, if the run is underway.
    pub fn current_index(&self) -> Option<usize> {
        match self.state {
            SchedulerState::Running | SchedulerState::BlockPaused
                if self.cursor < self.trials.len() =>
            {
                Some(self.cursor)
            }
            _ => None,
        }
    }

    pub fn current_trial(&self) -> Option<&Trial> {
        self.current_index().map(|i| &self.trials[i])
    }

    /// Completed trials and total trials.
    pub fn progress(&self) -> (usize, usize) {
        (self.cursor, self.trials.len())
    }

    /// Advances the run to time `t` (seconds since go, non-decreasing).
    pub fn update<I: InputSource + ?Sized>(
        &mut self,
        t: f64,
        input: &mut I,
    ) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        if self.state != SchedulerState::Finished {
            self.last_t = t;
        }
        match self.state {
            SchedulerState::Finished | SchedulerState::BlockPaused => return events,
            SchedulerState::NotStarted => {
                tracing::info!(trials = self.trials.len(), t, "run started");
                self.state = SchedulerState::Running;
            }
            SchedulerState::Running => {}
        }

        loop {
            if self.awaiting_start {
                if self.cursor >= self.trials.len() {
                    self.finish(t, &mut events);
                    break;
                }
                if let Some(pause) = &self.pause_event {
                    pause.conceal();
                }
                self.trials[self.cursor].start(t);
                self.awaiting_start = false;
                tracing::info!(trial = self.cursor, t, "trial started");
                events.push(SchedulerEvent::TrialStarted(self.cursor));
            }

            let trial = &mut self.trials[self.cursor];
            trial.tick(t, input);
            if !trial.done() {
                break;
            }
            trial.finish(t);
            tracing::debug!(trial = self.cursor, t, "trial completed");
            events.push(SchedulerEvent::TrialCompleted(self.cursor));

            self.cursor += 1;
            self.block_count += 1;
            self.awaiting_start = true;

            if self.cursor >= self.trials.len() {
                self.finish(t, &mut events);
                break;
            }
            if self.trials_per_block > 0 && self.block_count == self.trials_per_block {
                self.block_count = 0;
                self.show_pause();
                self.state = SchedulerState::BlockPaused;
                tracing::info!(completed = self.cursor, t, "block finished, waiting for resume");
                events.push(SchedulerEvent::BlockPaused);
                break;
            }
        }
        events
    }

    /// Releases a block pause; the next trial starts on the next update.
    pub fn resume(&mut self) -> bool {
        if self.state != SchedulerState::BlockPaused {
            return false;
        }
        tracing::info!(next = self.cursor, "resumed");
        self.state = SchedulerState::Running;
        true
    }

    /// Stops the run early, as of the last update. Trials never reached
    /// contribute nothing to the log; the current one keeps what it logged so
    /// far.
    pub fn abort(&mut self) {
        if self.state == SchedulerState::Finished {
            return;
        }
        if let Some(trial) = self.trials.get_mut(self.cursor) {
            if trial.is_started() {
                trial.halt(self.last_t);
            }
        }
        tracing::warn!(completed = self.cursor, total = self.trials.len(), "run aborted");
        self.state = SchedulerState::Finished;
        self.show_pause();
    }

    fn finish(&mut self, t: f64, events: &mut Vec<SchedulerEvent>) {
        self.state = SchedulerState::Finished;
        self.show_pause();
        tracing::info!(trials = self.trials.len(), t, "run finished");
        events.push(SchedulerEvent::Finished);
    }

    fn show_pause(&self) {
        if let Some(pause) = &self.pause_event {
            pause.display();
        }
    }

    /// Seconds the run takes if every trial runs to its latest fixed stop.
    pub fn planned_duration(&self) -> f64 {
        self.trials.iter().map(Trial::planned_duration).sum()
    }

    /// Log table over every started, logged trial.
    pub fn log_table(&self) -> LogTable {
        LogTable::from_logs(
            self.trials
                .iter()
                .filter(|trial| trial.is_started() && !trial.is_unlogged())
                .map(Trial::log),
        )
    }

    pub fn write_log<W: Write>(&self, out: W, delimiter: Delimiter) -> Result<()> {
        self.log_table().write_delimited(out, delimiter)
    }

    pub fn write_json<W: Write>(&self, out: W) -> Result<()> {
        self.log_table().write_json(out)
    }

    pub fn save_log(&self, path: &Path, delimiter: Delimiter) -> Result<()> {
        self.log_table().save(path, delimiter)
    }
}
