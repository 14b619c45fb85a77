use cogex_experiment::{
    InputSource, SchedulerEvent, SchedulerState, StimulusRegistry, TrialScheduler,
};
use cogex_timing::{CalibrationStats, Timer};
use std::time::Duration;

/// Token that aborts the run from any state.
pub const QUIT_INPUT: &str = "quit";

/// Headless presentation loop: ticks the scheduler once per frame and
/// reports what would be on screen.
pub struct App<T: Timer, I: InputSource> {
    scheduler: TrialScheduler,
    registry: StimulusRegistry,
    input: I,
    timer: T,
    frame_period: Duration,
    resume_input: String,
    visible: Vec<String>,
}

impl<T: Timer, I: InputSource> App<T, I> {
    pub fn new(
        scheduler: TrialScheduler,
        registry: StimulusRegistry,
        input: I,
        timer: T,
        frame_rate_hz: f64,
        resume_input: impl Into<String>,
    ) -> Self {
        let frame_period = if frame_rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / frame_rate_hz)
        } else {
            Duration::ZERO
        };
        Self {
            scheduler,
            registry,
            input,
            timer,
            frame_period,
            resume_input: resume_input.into(),
            visible: Vec::new(),
        }
    }

    /// Runs until the scheduler finishes; returns it for log export along
    /// with the frame timing of the run.
    pub fn run(mut self) -> (TrialScheduler, CalibrationStats) {
        let (_, total) = self.scheduler.progress();
        tracing::info!(
            trials = total,
            planned_s = self.scheduler.planned_duration(),
            "starting presentation"
        );

        loop {
            let frame_start = self.timer.now();
            let t = self.timer.seconds_since_go();

            self.handle_controls();
            for event in self.scheduler.update(t, &mut self.input) {
                self.report(event, t);
            }
            self.report_display(t);
            if self.scheduler.is_finished() {
                break;
            }

            if let Some(rest) = self.frame_period.checked_sub(self.timer.elapsed(frame_start)) {
                self.timer.sleep(rest);
            }
            let frame = self.timer.elapsed(frame_start);
            self.timer.record_frame(frame);
        }

        let stats = self.timer.calibration_stats();
        tracing::info!(
            frames = self.timer.frame_count(),
            mean_ms = stats.average_frame_time_ns / 1e6,
            jitter_ms = stats.jitter_ns / 1e6,
            fps = stats.effective_fps,
            safe_margin_us = stats.safe_margin().as_micros() as u64,
            "frame timing"
        );
        (self.scheduler, stats)
    }

    /// Looks at, without consuming, inputs for run control.
    fn handle_controls(&mut self) {
        let pending = self.input.pending();
        if pending.iter().any(|i| i.token() == QUIT_INPUT) {
            self.scheduler.abort();
            return;
        }
        if self.input.is_exhausted() && self.waiting_on_input() {
            tracing::warn!("input closed while the run waits for it; stopping");
            self.scheduler.abort();
            return;
        }
        if self.scheduler.state() == SchedulerState::BlockPaused
            && pending.iter().any(|i| i.token() == self.resume_input)
        {
            self.input.clear();
            self.scheduler.resume();
        }
    }

    /// Paused, or collecting a response that has no deadline.
    fn waiting_on_input(&self) -> bool {
        if self.scheduler.state() == SchedulerState::BlockPaused {
            return true;
        }
        self.scheduler.current_trial().is_some_and(|trial| {
            trial
                .live_response()
                .and_then(|label| trial.log().response(label))
                .is_some_and(|window| window.deadline().is_none())
        })
    }

    fn report(&mut self, event: SchedulerEvent, t: f64) {
        match event {
            SchedulerEvent::TrialStarted(_) | SchedulerEvent::TrialCompleted(_) => {}
            SchedulerEvent::BlockPaused => {
                // A resume key pressed during the block must not skip the pause.
                self.input.clear();
                let (done, total) = self.scheduler.progress();
                tracing::info!(done, total, t, "paused; enter `{}` to continue", self.resume_input);
            }
            SchedulerEvent::Finished => tracing::info!(t, "all trials done"),
        }
    }

    fn report_display(&mut self, t: f64) {
        let visible = self.registry.visible();
        if visible != self.visible {
            tracing::info!(t, on = ?visible, "display");
            self.visible = visible;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cogex_experiment::{
        ChannelInput, ExperimentConfig, ExperimentDefinition, Input, InputQueue,
    };
    use std::sync::mpsc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Clock that only moves when slept on.
    #[derive(Clone, Default)]
    struct ManualTimer {
        now_ns: Arc<AtomicU64>,
        frames: Vec<Duration>,
    }

    impl Timer for ManualTimer {
        type Timestamp = u64;
        fn now(&self) -> u64 {
            self.now_ns.load(Ordering::SeqCst)
        }
        fn elapsed(&self, ts: u64) -> Duration {
            Duration::from_nanos(self.now().saturating_sub(ts))
        }
        fn seconds_since_go(&self) -> f64 {
            self.now() as f64 / 1e9
        }
        fn sleep(&self, d: Duration) {
            self.now_ns.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
        }
        fn record_frame(&mut self, d: Duration) {
            self.frames.push(d);
        }
        fn frame_count(&self) -> usize {
            self.frames.len()
        }
        fn calibration_stats(&self) -> CalibrationStats {
            CalibrationStats::from_frames(&self.frames)
        }
    }

    const DEFINITION: &str = r#"
stimuli:
  dot: { kind: circle, radius: 5 }
trials:
  - repeat: 2
    events:
      - { target: dot, duration: 0.5 }
"#;

    const OPEN_ENDED: &str = r#"
stimuli:
  word: { kind: text, content: RED, size: 40 }
trials:
  - repeat: 2
    events:
      - { target: word, stop: press, response: { label: press } }
"#;

    fn app_for<I: InputSource>(definition: &str, input: I) -> App<ManualTimer, I> {
        let config = ExperimentConfig {
            shuffle: false,
            ..ExperimentConfig::default()
        };
        let (registry, scheduler) = ExperimentDefinition::from_yaml(definition)
            .unwrap()
            .scheduler(&config, &mut StdRng::seed_from_u64(0))
            .unwrap();
        App::new(scheduler, registry, input, ManualTimer::default(), 100.0, "space")
    }

    fn app(input: InputQueue) -> App<ManualTimer, InputQueue> {
        app_for(DEFINITION, input)
    }

    #[test]
    fn runs_to_completion() {
        let (scheduler, stats) = app(InputQueue::new()).run();
        assert!(scheduler.is_finished());
        assert_eq!(scheduler.log_table().len(), 2);
        assert!((stats.effective_fps - 100.0).abs() < 1.0);
        let starts: Vec<f64> = scheduler
            .trials()
            .iter()
            .filter_map(|t| t.log().value("trial_start")?.as_f64())
            .collect();
        assert_eq!(starts.len(), 2);
        assert!((starts[1] - 0.5).abs() < 0.011);
    }

    #[test]
    fn quit_aborts_immediately() {
        let mut input = InputQueue::new();
        input.press(QUIT_INPUT);
        let (scheduler, _) = app(input).run();
        assert!(scheduler.is_finished());
        assert!(scheduler.log_table().is_empty());
    }

    #[test]
    fn closed_input_stops_open_ended_wait() {
        let (tx, rx) = mpsc::channel();
        tx.send(Input::key("z")).unwrap();
        drop(tx);
        let (scheduler, _) = app_for(OPEN_ENDED, ChannelInput::new(rx)).run();

        assert!(scheduler.is_finished());
        let table = scheduler.log_table();
        assert_eq!(table.len(), 1);
        let response = table.header().iter().position(|h| h == "press.response").unwrap();
        assert!(table.row(0).unwrap()[response].is_null());
    }
}
