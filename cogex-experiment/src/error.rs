use cogex_core::{StimulusError, TimingError};
use thiserror::Error;

/// Errors raised while building or persisting an experiment.
///
/// Everything here surfaces before the first stimulus is shown, or when
/// output is written; nothing in the per-tick path returns one.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// An event whose stop time cannot be derived, or whose definition is
    /// otherwise unusable.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("unknown stimulus `{0}`")]
    UnknownStimulus(String),

    #[error("stimulus `{0}` is defined more than once")]
    DuplicateStimulus(String),

    #[error("unknown condition `{given}`, expected one of {valid:?}")]
    UnknownCondition { given: String, valid: Vec<String> },

    #[error(transparent)]
    Timing(#[from] TimingError),

    #[error(transparent)]
    Stimulus(#[from] StimulusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T, E = ExperimentError> = std::result::Result<T, E>;
