pub mod error;
pub mod stimulus;
pub mod time;
pub mod value;

pub use error::{StimulusError, TimingError};
pub use stimulus::{
    share, ArrowDirection, Capabilities, Capability, Stimulus, StimulusGroup, StimulusHandle,
    StimulusParam, StimulusType, ToneStimulus, VisualStimulus,
};
pub use time::{ReferenceTimes, RelativeTime, TIME_EPSILON, TRIAL_START};
pub use value::Value;
