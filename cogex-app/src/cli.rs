use anyhow::{bail, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use cogex_experiment::Delimiter;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Runs trial-based experiments from a YAML definition.
#[derive(Parser, Debug)]
#[command(name = "cogex", author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an experiment, reading responses from stdin (one token per line).
    Run(RunArgs),
    /// Print how long a definition runs if nothing waits on a response.
    Duration(DurationArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Experiment definition (YAML).
    pub definition: PathBuf,

    /// Subject identifier; prompted for when omitted.
    #[arg(short, long, env = "COGEX_SUBJECT")]
    pub subject: Option<String>,

    /// Condition selector; prompted for when the definition declares conditions.
    #[arg(short, long)]
    pub condition: Option<String>,

    /// Name used for the run sidecar; defaults to the definition's name or file stem.
    #[arg(long)]
    pub name: Option<String>,

    /// Trials per block; 0 never pauses.
    #[arg(short = 'b', long, default_value_t = 0)]
    pub trials_per_block: usize,

    #[arg(short, long, value_enum, default_value_t = DelimiterArg::Comma)]
    pub delimiter: DelimiterArg,

    #[arg(short, long, default_value = ".", env = "COGEX_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    #[arg(long, default_value_t = 60.0)]
    pub frame_rate: f64,

    /// Keep the trial order of the definition.
    #[arg(long)]
    pub no_shuffle: bool,

    /// Seed for trial shuffling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Token that ends a block pause.
    #[arg(long, default_value = "space")]
    pub resume_input: String,

    /// Also write the log as JSON records next to the table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DurationArgs {
    pub definition: PathBuf,

    #[arg(short, long)]
    pub condition: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimiterArg {
    Comma,
    Tab,
}

impl From<DelimiterArg> for Delimiter {
    fn from(arg: DelimiterArg) -> Self {
        match arg {
            DelimiterArg::Comma => Delimiter::Comma,
            DelimiterArg::Tab => Delimiter::Tab,
        }
    }
}

fn read_answer<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("input closed before an answer was given");
    }
    Ok(line.trim().to_owned())
}

/// Asks until a non-empty subject identifier is given.
pub fn prompt_subject<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<String> {
    loop {
        write!(out, "Subject ID: ")?;
        out.flush()?;
        let answer = read_answer(input)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
    }
}

/// Asks until one of `valid` is given.
pub fn prompt_condition<R: BufRead, W: Write>(
    valid: &[String],
    input: &mut R,
    out: &mut W,
) -> Result<String> {
    loop {
        write!(out, "Condition ({}): ", valid.join("/"))?;
        out.flush()?;
        let answer = read_answer(input)?;
        if valid.contains(&answer) {
            return Ok(answer);
        }
        writeln!(out, "`{answer}` is not a valid condition.")?;
    }
}
