use cogex_experiment::{
    output_filename, Delimiter, ExperimentConfig, ExperimentDefinition, ExperimentError,
    InputQueue, TrialScheduler,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tempfile::TempDir;

const FRAME: f64 = 1.0 / 60.0;

fn demo() -> ExperimentDefinition {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../demos/stroop.yaml");
    ExperimentDefinition::load(&path).unwrap()
}

fn config(condition: &str, trials_per_block: usize) -> ExperimentConfig {
    ExperimentConfig {
        subject: "s01".into(),
        experiment_name: "stroop".into(),
        condition: Some(condition.into()),
        trials_per_block,
        seed: Some(3),
        ..ExperimentConfig::default()
    }
}

/// Ticks at 60 Hz, answering `key` whenever a response is live and
/// releasing block pauses.
fn run(scheduler: &mut TrialScheduler, key: &str) -> f64 {
    let mut input = InputQueue::new();
    let mut t = 0.0;
    while !scheduler.is_finished() && t < 600.0 {
        if scheduler
            .current_trial()
            .is_some_and(|trial| trial.live_response().is_some())
        {
            input.press(key);
        }
        scheduler.update(t, &mut input);
        scheduler.resume();
        t += FRAME;
    }
    t
}

#[test]
fn demo_definition_runs_end_to_end() {
    let definition = demo();
    let config = config("main", 4);
    let mut rng = StdRng::seed_from_u64(3);
    let (registry, mut scheduler) = definition.scheduler(&config, &mut rng).unwrap();
    assert!(registry.contains("error_signal"));
    assert_eq!(scheduler.trials().len(), 9);

    run(&mut scheduler, "g");
    assert!(scheduler.is_finished());

    let table = scheduler.log_table();
    assert_eq!(table.len(), 8);
    let header = table.header();
    for column in ["congruent", "ink", "press.correct", "press.rt", "trial_start", "word"] {
        assert!(header.iter().any(|h| h == column), "missing {column}");
    }

    let correct = header.iter().position(|h| h == "press.correct").unwrap();
    let congruent = header.iter().position(|h| h == "congruent").unwrap();
    for row in table.rows() {
        assert_eq!(row[correct], row[congruent]);
    }
}

#[test]
fn log_saved_under_fresh_name() {
    let dir = TempDir::new().unwrap();
    let definition = demo();
    let mut config = config("practice", 0);
    config.output_dir = dir.path().to_path_buf();
    config.delimiter = Delimiter::Tab;

    for expected in ["s01_1.tsv", "s01_2.tsv"] {
        let (_, mut scheduler) = definition
            .scheduler(&config, &mut StdRng::seed_from_u64(0))
            .unwrap();
        run(&mut scheduler, "r");
        let path = output_filename(
            &config.output_dir,
            &config.subject,
            &config.experiment_name,
            config.delimiter.extension(),
        )
        .unwrap();
        assert_eq!(path, dir.path().join(expected));
        scheduler.save_log(&path, config.delimiter).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().contains("press.rt\t"));
    }
}

#[test]
fn planned_duration_counts_fixed_stops_only() {
    let definition = demo();
    let (_, scheduler) = definition
        .scheduler(&config("main", 0), &mut StdRng::seed_from_u64(0))
        .unwrap();
    // Congruent trials only know the fixation stop; incongruent ones end
    // with the error signal at 2.6 s; the closing screen lasts 3 s.
    let expected = 4.0 * 0.5 + 4.0 * 2.6 + 3.0;
    assert!((scheduler.planned_duration() - expected).abs() < 1e-9);
}

#[test]
fn unknown_condition_rejected_before_running() {
    let definition = demo();
    let err = definition
        .scheduler(&config("pilot", 0), &mut StdRng::seed_from_u64(0))
        .unwrap_err();
    match err {
        ExperimentError::UnknownCondition { given, valid } => {
            assert_eq!(given, "pilot");
            assert_eq!(valid, ["practice", "main"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}
