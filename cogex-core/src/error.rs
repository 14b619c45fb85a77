use thiserror::Error;

/// Invalid relative-time construction or arithmetic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimingError {
    #[error("time offset must be a finite number of seconds, got {0}")]
    InvalidOffset(f64),

    #[error("cannot parse relative time from {0:?}")]
    Parse(String),
}

/// A parameter that a stimulus cannot take.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StimulusError {
    #[error("unknown stimulus parameter `{0}`")]
    UnknownParameter(String),

    #[error("parameter `{param}` expects {expected}")]
    InvalidValue {
        param: String,
        expected: &'static str,
    },

    #[error("stimulus `{stimulus}` does not accept parameter `{param}`")]
    Unsupported {
        stimulus: String,
        param: &'static str,
    },
}
