use crate::error::StimulusError;
use crate::value::Value;
use serde::Deserialize;
use std::cell::RefCell;
use std::rc::Rc;

/// What kind of parameters a stimulus can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Visual,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub visual: bool,
    pub audio: bool,
}

impl Capabilities {
    pub const VISUAL: Self = Self {
        visual: true,
        audio: false,
    };
    pub const AUDIO: Self = Self {
        visual: false,
        audio: true,
    };

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Visual => self.visual,
            Capability::Audio => self.audio,
        }
    }

    pub fn intersect(self, other: Self) -> Self {
        Self {
            visual: self.visual && other.visual,
            audio: self.audio && other.audio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowDirection {
    Up,
    Down,
    Left,
    Right,
}

/// One settable stimulus property.
#[derive(Debug, Clone, PartialEq)]
pub enum StimulusParam {
    On(bool),
    Position([f32; 2]),
    Color([u8; 4]),
    Size(f32),
    Text(String),
    Direction(ArrowDirection),
    Volume(f32),
    Frequency(f32),
}

impl StimulusParam {
    pub fn name(&self) -> &'static str {
        match self {
            StimulusParam::On(_) => "on",
            StimulusParam::Position(_) => "position",
            StimulusParam::Color(_) => "color",
            StimulusParam::Size(_) => "size",
            StimulusParam::Text(_) => "text",
            StimulusParam::Direction(_) => "direction",
            StimulusParam::Volume(_) => "volume",
            StimulusParam::Frequency(_) => "frequency",
        }
    }

    /// Capability a target needs to accept this parameter; `on` needs none.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            StimulusParam::On(_) => None,
            StimulusParam::Position(_)
            | StimulusParam::Color(_)
            | StimulusParam::Size(_)
            | StimulusParam::Text(_)
            | StimulusParam::Direction(_) => Some(Capability::Visual),
            StimulusParam::Volume(_) | StimulusParam::Frequency(_) => Some(Capability::Audio),
        }
    }

    /// Parses a `name: value` pair from a declarative event definition.
    pub fn parse(name: &str, value: &Value) -> Result<Self, StimulusError> {
        let invalid = |expected| StimulusError::InvalidValue {
            param: name.to_owned(),
            expected,
        };
        match name {
            "on" => value.as_bool().map(Self::On).ok_or_else(|| invalid("a boolean")),
            "position" => match value.as_numbers().as_deref() {
                Some([x, y]) => Ok(Self::Position([*x as f32, *y as f32])),
                _ => Err(invalid("a list of two numbers")),
            },
            "color" => {
                let channels = value
                    .as_numbers()
                    .filter(|c| matches!(c.len(), 3 | 4))
                    .filter(|c| c.iter().all(|v| (0.0..=255.0).contains(v)))
                    .ok_or_else(|| invalid("three or four channels in 0..=255"))?;
                let mut rgba = [255u8; 4];
                for (slot, v) in rgba.iter_mut().zip(&channels) {
                    *slot = v.round() as u8;
                }
                Ok(Self::Color(rgba))
            }
            "size" => non_negative(value)
                .map(Self::Size)
                .ok_or_else(|| invalid("a non-negative number")),
            "text" => match value {
                Value::Text(s) => Ok(Self::Text(s.clone())),
                Value::Number(_) | Value::Bool(_) => Ok(Self::Text(value.to_string())),
                _ => Err(invalid("a string")),
            },
            "direction" => match value.as_str() {
                Some("up") => Ok(Self::Direction(ArrowDirection::Up)),
                Some("down") => Ok(Self::Direction(ArrowDirection::Down)),
                Some("left") => Ok(Self::Direction(ArrowDirection::Left)),
                Some("right") => Ok(Self::Direction(ArrowDirection::Right)),
                _ => Err(invalid("one of up, down, left, right")),
            },
            "volume" => value
                .as_f64()
                .filter(|v| (0.0..=1.0).contains(v))
                .map(|v| Self::Volume(v as f32))
                .ok_or_else(|| invalid("a number in 0..=1")),
            "frequency" => value
                .as_f64()
                .filter(|v| *v > 0.0)
                .map(|v| Self::Frequency(v as f32))
                .ok_or_else(|| invalid("a positive number of hertz")),
            other => Err(StimulusError::UnknownParameter(other.to_owned())),
        }
    }
}

fn non_negative(value: &Value) -> Option<f32> {
    value.as_f64().filter(|v| *v >= 0.0).map(|v| v as f32)
}

/// A presentable stimulus. Events drive it exclusively through [`StimulusParam`]s.
pub trait Stimulus: std::fmt::Debug {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;
    fn apply(&mut self, param: &StimulusParam) -> Result<(), StimulusError>;
    fn is_on(&self) -> bool;

    /// Rejects parameters this stimulus has no capability for.
    fn validate(&self, param: &StimulusParam) -> Result<(), StimulusError> {
        match param.required_capability() {
            Some(cap) if !self.capabilities().supports(cap) => Err(StimulusError::Unsupported {
                stimulus: self.name().to_owned(),
                param: param.name(),
            }),
            _ => Ok(()),
        }
    }
}

/// Shared, single-threaded handle; events write to it on (de)activation.
pub type StimulusHandle = Rc<RefCell<dyn Stimulus>>;

pub fn share<S: Stimulus + 'static>(stimulus: S) -> StimulusHandle {
    Rc::new(RefCell::new(stimulus))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StimulusType {
    Circle {
        radius: f32,
        color: [u8; 4],
    },
    Rectangle {
        width: f32,
        height: f32,
        color: [u8; 4],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        color: [u8; 4],
    },
    Text {
        content: String,
        size: f32,
        color: [u8; 4],
    },
}

/// A drawable shape or text; drawing itself belongs to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualStimulus {
    pub name: String,
    pub kind: StimulusType,
    pub position: [f32; 2],
    pub on: bool,
}

impl VisualStimulus {
    pub fn new(name: impl Into<String>, kind: StimulusType) -> Self {
        Self {
            name: name.into(),
            kind,
            position: [0.0, 0.0],
            on: false,
        }
    }

    pub fn at(mut self, position: [f32; 2]) -> Self {
        self.position = position;
        self
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, StimulusType::Text { .. })
    }
}

impl Stimulus for VisualStimulus {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VISUAL
    }

    fn apply(&mut self, param: &StimulusParam) -> Result<(), StimulusError> {
        self.validate(param)?;
        match (param, &mut self.kind) {
            (StimulusParam::On(on), _) => self.on = *on,
            (StimulusParam::Position(p), _) => self.position = *p,
            (
                StimulusParam::Color(c),
                StimulusType::Circle { color, .. }
                | StimulusType::Rectangle { color, .. }
                | StimulusType::Arrow { color, .. }
                | StimulusType::Text { color, .. },
            ) => *color = *c,
            (StimulusParam::Size(s), StimulusType::Circle { radius, .. }) => *radius = *s,
            (StimulusParam::Size(s), StimulusType::Rectangle { width, height, .. }) => {
                *width = *s;
                *height = *s;
            }
            (
                StimulusParam::Size(s),
                StimulusType::Arrow { size, .. } | StimulusType::Text { size, .. },
            ) => *size = *s,
            (StimulusParam::Text(t), StimulusType::Text { content, .. }) => *content = t.clone(),
            (StimulusParam::Direction(d), StimulusType::Arrow { direction, .. }) => {
                *direction = *d
            }
            _ => {
                return Err(StimulusError::Unsupported {
                    stimulus: self.name.clone(),
                    param: param.name(),
                });
            }
        }
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// A pure tone played while on.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneStimulus {
    pub name: String,
    pub frequency_hz: f32,
    pub volume: f32,
    pub on: bool,
}

impl ToneStimulus {
    pub fn new(name: impl Into<String>, frequency_hz: f32, volume: f32) -> Self {
        Self {
            name: name.into(),
            frequency_hz,
            volume,
            on: false,
        }
    }
}

impl Stimulus for ToneStimulus {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::AUDIO
    }

    fn apply(&mut self, param: &StimulusParam) -> Result<(), StimulusError> {
        self.validate(param)?;
        match param {
            StimulusParam::On(on) => self.on = *on,
            StimulusParam::Volume(v) => self.volume = *v,
            StimulusParam::Frequency(f) => self.frequency_hz = *f,
            other => {
                return Err(StimulusError::Unsupported {
                    stimulus: self.name.clone(),
                    param: other.name(),
                });
            }
        }
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

/// Several stimuli driven as one target; parameters fan out to every member.
#[derive(Debug)]
pub struct StimulusGroup {
    name: String,
    members: Vec<StimulusHandle>,
}

impl StimulusGroup {
    pub fn new(name: impl Into<String>, members: Vec<StimulusHandle>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    pub fn members(&self) -> &[StimulusHandle] {
        &self.members
    }
}

impl Stimulus for StimulusGroup {
    fn name(&self) -> &str {
        &self.name
    }

    /// Only what every member supports.
    fn capabilities(&self) -> Capabilities {
        self.members
            .iter()
            .map(|m| m.borrow().capabilities())
            .reduce(Capabilities::intersect)
            .unwrap_or_default()
    }

    fn apply(&mut self, param: &StimulusParam) -> Result<(), StimulusError> {
        for member in &self.members {
            member.borrow_mut().apply(param)?;
        }
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.members.iter().any(|m| m.borrow().is_on())
    }
}
