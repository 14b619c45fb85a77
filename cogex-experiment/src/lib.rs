pub mod config;
pub mod datalog;
pub mod definition;
pub mod error;
pub mod event;
pub mod input;
pub mod log;
pub mod registry;
pub mod response;
pub mod state;
pub mod trial;
pub mod voice;

pub use config::{Delimiter, ExperimentConfig};
pub use datalog::{output_filename, RunLog};
pub use definition::{EventSpec, ExperimentDefinition, ResponseSpec, StimulusSpec, TrialSpec};
pub use error::{ExperimentError, Result};
pub use event::{Event, EventBuilder, EventState};
pub use input::{ChannelInput, Input, InputKind, InputMux, InputQueue, InputSource};
pub use log::{LogEntry, LogTable, TrialLog};
pub use registry::StimulusRegistry;
pub use response::ResponseWindow;
pub use state::{SchedulerEvent, SchedulerState, TrialScheduler};
pub use trial::{Trial, TrialTick};
pub use voice::{AudioError, AudioStream, VoiceTrigger};
