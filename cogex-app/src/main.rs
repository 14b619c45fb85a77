mod app;
mod cli;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use cli::{Cli, Command, DurationArgs, RunArgs};
use cogex_experiment::{
    output_filename, ChannelInput, Delimiter, ExperimentConfig, ExperimentDefinition, Input,
};
use cogex_timing::HighPrecisionTimer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Duration(args) => duration(args),
    }
}

fn init_logging(verbosity: u8) {
    let directive = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(path: &std::path::Path) -> Result<ExperimentDefinition> {
    ExperimentDefinition::load(path)
        .with_context(|| format!("failed to load experiment definition {}", path.display()))
}

fn run(args: RunArgs) -> Result<()> {
    let definition = load(&args.definition)?;

    let subject = match args.subject {
        Some(subject) => subject,
        None => cli::prompt_subject(&mut std::io::stdin().lock(), &mut std::io::stderr())?,
    };
    let condition = match args.condition {
        Some(condition) => Some(condition),
        None if !definition.conditions.is_empty() => Some(cli::prompt_condition(
            &definition.conditions,
            &mut std::io::stdin().lock(),
            &mut std::io::stderr(),
        )?),
        None => None,
    };
    let experiment_name = args
        .name
        .or_else(|| definition.name.clone())
        .or_else(|| {
            args.definition
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| ExperimentConfig::default().experiment_name);

    let config = ExperimentConfig {
        subject,
        experiment_name,
        condition,
        trials_per_block: args.trials_per_block,
        delimiter: Delimiter::from(args.delimiter),
        output_dir: args.output_dir,
        frame_rate_hz: args.frame_rate,
        shuffle: !args.no_shuffle,
        seed: args.seed,
        resume_input: args.resume_input,
    };

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let (registry, scheduler) = definition
        .scheduler(&config, &mut rng)
        .context("invalid experiment definition")?;

    let input = ChannelInput::new(spawn_stdin_reader());
    let mut timer = HighPrecisionTimer::new();
    timer.go();

    let app = App::new(
        scheduler,
        registry,
        input,
        timer,
        config.frame_rate_hz,
        config.resume_input.as_str(),
    );
    let (scheduler, _stats) = app.run();

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;
    let path = output_filename(
        &config.output_dir,
        &config.subject,
        &config.experiment_name,
        config.delimiter.extension(),
    )
    .context("failed to choose an output file")?;
    scheduler
        .save_log(&path, config.delimiter)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if args.json {
        let json_path = path.with_extension("json");
        let file = File::create(&json_path)
            .with_context(|| format!("failed to create {}", json_path.display()))?;
        scheduler.write_json(BufWriter::new(file))?;
        tracing::info!(path = %json_path.display(), "json log written");
    }

    println!("Results saved to {}", path.display());
    Ok(())
}

/// Forwards stdin lines as key inputs; an empty line is `space`.
fn spawn_stdin_reader() -> mpsc::Receiver<Input> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let token = match line.trim() {
                "" => "space",
                other => other,
            };
            if tx.send(Input::key(token)).is_err() {
                break;
            }
        }
    });
    rx
}

fn duration(args: DurationArgs) -> Result<()> {
    let definition = load(&args.definition)?;
    let config = ExperimentConfig {
        condition: args.condition,
        shuffle: false,
        ..ExperimentConfig::default()
    };
    let (_, scheduler) = definition
        .scheduler(&config, &mut StdRng::seed_from_u64(0))
        .context("invalid experiment definition")?;
    let (_, trials) = scheduler.progress();
    println!(
        "{trials} trials, {:.2} s planned (response-anchored stops not counted)",
        scheduler.planned_duration()
    );
    Ok(())
}
