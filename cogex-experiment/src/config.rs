use serde::Deserialize;
use std::path::PathBuf;

/// Column separator for the trial log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Delimiter::Comma => ',',
            Delimiter::Tab => '\t',
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Delimiter::Comma => "csv",
            Delimiter::Tab => "tsv",
        }
    }
}

/// Everything about a run that is not the trial list itself.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub subject: String,
    pub experiment_name: String,
    pub condition: Option<String>,
    /// Trials between block pauses; 0 runs everything without pausing.
    pub trials_per_block: usize,
    pub delimiter: Delimiter,
    pub output_dir: PathBuf,
    pub frame_rate_hz: f64,
    pub shuffle: bool,
    pub seed: Option<u64>,
    /// Input token that releases a block pause.
    pub resume_input: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            subject: "0".to_owned(),
            experiment_name: "experiment".to_owned(),
            condition: None,
            trials_per_block: 0,
            delimiter: Delimiter::Comma,
            output_dir: PathBuf::from("."),
            frame_rate_hz: 60.0,
            shuffle: true,
            seed: None,
            resume_input: "space".to_owned(),
        }
    }
}
