//! Declarative experiment definitions.
//!
//! ```yaml
//! conditions: [congruent, incongruent]
//! stimuli:
//!   fixation: { kind: text, content: "+", size: 55 }
//!   word: { kind: text, content: "", size: 40 }
//! pause:
//!   target: fixation
//!   text: "Take a break. Press space to go on."
//!   duration: 0
//! trials:
//!   - condition: congruent
//!     repeat: 10
//!     events:
//!       - { target: fixation, start: 0, duration: 0.5 }
//!       - target: word
//!         start: 0.5
//!         stop: press
//!         text: RED
//!         color: [255, 0, 0]
//!         log: { word: RED }
//!         response: { label: press, expected: z, limit: [z, slash], timelimit: 2 }
//! final_trial:
//!   events:
//!     - { target: fixation, text: "All done!", duration: 3 }
//! ```

use crate::config::ExperimentConfig;
use crate::error::{ExperimentError, Result};
use crate::event::Event;
use crate::input::InputKind;
use crate::registry::StimulusRegistry;
use crate::response::ResponseWindow;
use crate::state::TrialScheduler;
use crate::trial::Trial;
use cogex_core::{
    share, ArrowDirection, RelativeTime, StimulusGroup, StimulusHandle, StimulusParam,
    StimulusType, ToneStimulus, Value, VisualStimulus,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

fn white() -> [u8; 4] {
    [255, 255, 255, 255]
}

/// Colors take three or four channels, like the `color` event parameter.
fn rgba<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<[u8; 4], D::Error> {
    let value = Value::deserialize(deserializer)?;
    match StimulusParam::parse("color", &value).map_err(D::Error::custom)? {
        StimulusParam::Color(rgba) => Ok(rgba),
        other => Err(D::Error::custom(format!("expected a color, got `{}`", other.name()))),
    }
}

fn full_volume() -> f32 {
    1.0
}

fn once() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StimulusSpec {
    Circle {
        radius: f32,
        #[serde(default = "white", deserialize_with = "rgba")]
        color: [u8; 4],
        #[serde(default)]
        position: [f32; 2],
    },
    Rectangle {
        width: f32,
        height: f32,
        #[serde(default = "white", deserialize_with = "rgba")]
        color: [u8; 4],
        #[serde(default)]
        position: [f32; 2],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        #[serde(default = "white", deserialize_with = "rgba")]
        color: [u8; 4],
        #[serde(default)]
        position: [f32; 2],
    },
    Text {
        #[serde(default)]
        content: String,
        size: f32,
        #[serde(default = "white", deserialize_with = "rgba")]
        color: [u8; 4],
        #[serde(default)]
        position: [f32; 2],
    },
    Tone {
        frequency: f32,
        #[serde(default = "full_volume")]
        volume: f32,
    },
    Group {
        members: Vec<String>,
    },
}

impl StimulusSpec {
    /// Builds a leaf stimulus; groups are resolved by [`ExperimentDefinition::registry`].
    fn build_leaf(&self, name: &str) -> Option<StimulusHandle> {
        let visual = |kind: StimulusType, position: [f32; 2]| {
            share(VisualStimulus::new(name, kind).at(position))
        };
        Some(match self {
            StimulusSpec::Circle { radius, color, position } => visual(
                StimulusType::Circle { radius: *radius, color: *color },
                *position,
            ),
            StimulusSpec::Rectangle { width, height, color, position } => visual(
                StimulusType::Rectangle { width: *width, height: *height, color: *color },
                *position,
            ),
            StimulusSpec::Arrow { direction, size, color, position } => visual(
                StimulusType::Arrow { direction: *direction, size: *size, color: *color },
                *position,
            ),
            StimulusSpec::Text { content, size, color, position } => visual(
                StimulusType::Text { content: content.clone(), size: *size, color: *color },
                *position,
            ),
            StimulusSpec::Tone { frequency, volume } => {
                share(ToneStimulus::new(name, *frequency, *volume))
            }
            StimulusSpec::Group { .. } => return None,
        })
    }
}

/// Response declaration: `{label, expected, limit, timelimit, modality}` or
/// the short `{label: expected}` form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResponseSpec {
    Full {
        label: String,
        #[serde(default)]
        expected: Option<Value>,
        #[serde(default)]
        limit: Option<Vec<Value>>,
        #[serde(default)]
        timelimit: Option<f64>,
        #[serde(default)]
        modality: Option<InputKind>,
    },
    Short(BTreeMap<String, Value>),
}

impl ResponseSpec {
    pub fn window(&self) -> Result<ResponseWindow> {
        match self {
            ResponseSpec::Full {
                label,
                expected,
                limit,
                timelimit,
                modality,
            } => {
                let mut window = ResponseWindow::new(label.as_str());
                if let Some(expected) = expected.as_ref().filter(|v| !v.is_null()) {
                    window = window.expecting(expected.to_string());
                }
                if let Some(limit) = limit {
                    window = window.accepting(limit.iter().map(Value::to_string));
                }
                if let Some(seconds) = timelimit {
                    window = window.with_deadline(*seconds);
                }
                if let Some(kind) = modality {
                    window = window.only(*kind);
                }
                Ok(window)
            }
            ResponseSpec::Short(pairs) => {
                let mut pairs = pairs.iter();
                match (pairs.next(), pairs.next()) {
                    (Some((label, expected)), None) => {
                        let window = ResponseWindow::new(label.as_str());
                        Ok(if expected.is_null() {
                            window
                        } else {
                            window.expecting(expected.to_string())
                        })
                    }
                    _ => Err(ExperimentError::MalformedEvent(
                        "short response form takes exactly one `label: expected` pair".to_owned(),
                    )),
                }
            }
        }
    }
}

/// One event; keys other than the reserved ones are stimulus parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventSpec {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub start: RelativeTime,
    #[serde(default)]
    pub stop: Option<RelativeTime>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub log: BTreeMap<String, Value>,
    #[serde(default)]
    pub response: Option<ResponseSpec>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl EventSpec {
    pub fn build(&self, registry: &StimulusRegistry) -> Result<Event> {
        let mut builder = match &self.target {
            Some(name) => Event::on(registry.get(name)?),
            None => Event::silent(),
        }
        .start(self.start.clone());

        if let Some(stop) = &self.stop {
            builder = builder.stop(stop.clone());
        }
        if let Some(seconds) = self.duration {
            builder = builder.duration(seconds);
        }
        for (name, value) in &self.params {
            builder = builder.param(StimulusParam::parse(name, value)?);
        }
        for (key, value) in &self.log {
            builder = builder.log(key.as_str(), value.clone());
        }
        if let Some(response) = &self.response {
            builder = builder.response(response.window()?);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrialSpec {
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "once")]
    pub repeat: usize,
    #[serde(default)]
    pub unlogged: bool,
    /// Values logged for the trial as a whole.
    #[serde(default)]
    pub log: BTreeMap<String, Value>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
}

impl TrialSpec {
    pub fn build(&self, registry: &StimulusRegistry) -> Result<Trial> {
        let events = self
            .events
            .iter()
            .map(|event| event.build(registry))
            .collect::<Result<Vec<_>>>()?;
        let mut trial = Trial::new(events);
        if let Some(condition) = &self.condition {
            trial.annotate("condition", condition.as_str());
        }
        for (key, value) in &self.log {
            trial.annotate(key.as_str(), value.clone());
        }
        trial.check_labels()?;
        Ok(if self.unlogged { trial.unlogged() } else { trial })
    }

    fn runs_under(&self, condition: Option<&str>) -> bool {
        match (&self.condition, condition) {
            (Some(own), Some(selected)) => own == selected,
            _ => true,
        }
    }
}

/// A whole experiment as written by its author.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentDefinition {
    #[serde(default)]
    pub name: Option<String>,
    /// Valid condition selectors; empty means any.
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub stimuli: BTreeMap<String, StimulusSpec>,
    #[serde(default)]
    pub trials: Vec<TrialSpec>,
    #[serde(default)]
    pub pause: Option<EventSpec>,
    /// Closing screen, run after every other trial and never logged.
    #[serde(default)]
    pub final_trial: Option<TrialSpec>,
}

impl ExperimentDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let definition = Self::from_yaml(&yaml)?;
        tracing::debug!(
            path = %path.display(),
            stimuli = definition.stimuli.len(),
            trials = definition.trials.len(),
            "experiment definition loaded"
        );
        Ok(definition)
    }

    /// Checks a condition selector against the declared set.
    pub fn check_condition(&self, condition: Option<&str>) -> Result<()> {
        let declared = |given: &str| self.conditions.iter().any(|c| c == given);
        match condition {
            Some(given) if !self.conditions.is_empty() && !declared(given) => {
                Err(ExperimentError::UnknownCondition {
                    given: given.to_owned(),
                    valid: self.conditions.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Builds every declared stimulus. Groups may name other groups.
    pub fn registry(&self) -> Result<StimulusRegistry> {
        let mut registry = StimulusRegistry::new();
        let mut groups = Vec::new();
        for (name, spec) in &self.stimuli {
            match spec {
                StimulusSpec::Group { members } => groups.push((name, members)),
                leaf => {
                    if let Some(handle) = leaf.build_leaf(name) {
                        registry.insert(handle)?;
                    }
                }
            }
        }

        while !groups.is_empty() {
            let before = groups.len();
            let mut waiting = Vec::new();
            for (name, members) in groups {
                if members.iter().all(|m| registry.contains(m)) {
                    let handles = members
                        .iter()
                        .map(|m| registry.get(m))
                        .collect::<Result<Vec<_>>>()?;
                    registry.insert(share(StimulusGroup::new(name.as_str(), handles)))?;
                } else {
                    waiting.push((name, members));
                }
            }
            if waiting.len() == before {
                let missing = waiting
                    .iter()
                    .flat_map(|(_, members)| members.iter())
                    .find(|m| !registry.contains(m))
                    .cloned()
                    .unwrap_or_default();
                return Err(ExperimentError::UnknownStimulus(missing));
            }
            groups = waiting;
        }
        Ok(registry)
    }

    /// Expands, filters and (optionally) shuffles the trial list, then appends
    /// the final trial.
    pub fn build_trials<R: Rng + ?Sized>(
        &self,
        registry: &StimulusRegistry,
        config: &ExperimentConfig,
        rng: &mut R,
    ) -> Result<Vec<Trial>> {
        let condition = config.condition.as_deref();
        self.check_condition(condition)?;

        let mut trials = Vec::new();
        for spec in self.trials.iter().filter(|t| t.runs_under(condition)) {
            for _ in 0..spec.repeat {
                trials.push(spec.build(registry)?);
            }
        }
        if config.shuffle {
            trials.shuffle(rng);
        }
        if let Some(last) = &self.final_trial {
            trials.push(last.build(registry)?.unlogged());
        }
        tracing::info!(trials = trials.len(), condition, "trials built");
        Ok(trials)
    }

    pub fn build_pause(&self, registry: &StimulusRegistry) -> Result<Option<Event>> {
        self.pause.as_ref().map(|spec| spec.build(registry)).transpose()
    }

    /// Everything needed to run: the stimuli and a scheduler over the trials.
    pub fn scheduler<R: Rng + ?Sized>(
        &self,
        config: &ExperimentConfig,
        rng: &mut R,
    ) -> Result<(StimulusRegistry, TrialScheduler)> {
        let registry = self.registry()?;
        let trials = self.build_trials(&registry, config, rng)?;
        let mut scheduler = TrialScheduler::new(trials, config);
        if let Some(pause) = self.build_pause(&registry)? {
            scheduler = scheduler.with_pause_event(pause);
        }
        Ok((registry, scheduler))
    }
}
