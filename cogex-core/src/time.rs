use crate::error::TimingError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Anchor every trial stamps with the tick time at which it became current.
pub const TRIAL_START: &str = "trial_start";

/// Slack for comparing accumulated float offsets against tick times.
pub const TIME_EPSILON: f64 = 1e-9;

/// Lookup of absolute times (seconds since go) for named anchors.
///
/// `None` means the anchor is not known yet, or is known but has not
/// completed (an uncaptured response).
pub trait ReferenceTimes {
    fn reference_time(&self, reference: &str) -> Option<f64>;
}

impl ReferenceTimes for HashMap<String, f64> {
    fn reference_time(&self, reference: &str) -> Option<f64> {
        self.get(reference).copied()
    }
}

impl ReferenceTimes for BTreeMap<String, f64> {
    fn reference_time(&self, reference: &str) -> Option<f64> {
        self.get(reference).copied()
    }
}

/// A point in time expressed as an offset from a named anchor.
///
/// Accepted textual forms are `2.5` (offset from `trial_start`), `"press"`
/// and `"press+0.3"`; definitions may also use the pair `[press, 0.3]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RelativeTimeRepr", into = "String")]
pub struct RelativeTime {
    reference: String,
    offset: f64,
}

impl RelativeTime {
    pub fn new(reference: impl Into<String>, offset: f64) -> Result<Self, TimingError> {
        if !offset.is_finite() {
            return Err(TimingError::InvalidOffset(offset));
        }
        Ok(Self {
            reference: reference.into(),
            offset,
        })
    }

    /// Offset from the start of the trial.
    pub fn after_trial_start(offset: f64) -> Result<Self, TimingError> {
        Self::new(TRIAL_START, offset)
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Absolute time of this instant, or `None` while the anchor is unresolved.
    pub fn resolve<R: ReferenceTimes + ?Sized>(&self, known: &R) -> Option<f64> {
        known
            .reference_time(&self.reference)
            .map(|anchor| anchor + self.offset)
    }

    /// True once `t` has reached the resolved time.
    pub fn is_due<R: ReferenceTimes + ?Sized>(&self, t: f64, known: &R) -> bool {
        self.resolve(known)
            .is_some_and(|at| t + TIME_EPSILON >= at)
    }

    /// Same anchor, offset shifted by `delta` seconds.
    pub fn add(&self, delta: f64) -> Result<Self, TimingError> {
        if !delta.is_finite() {
            return Err(TimingError::InvalidOffset(delta));
        }
        Self::new(self.reference.clone(), self.offset + delta)
    }
}

impl Default for RelativeTime {
    fn default() -> Self {
        Self {
            reference: TRIAL_START.to_owned(),
            offset: 0.0,
        }
    }
}

impl fmt::Display for RelativeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.reference, self.offset)
    }
}

impl From<RelativeTime> for String {
    fn from(t: RelativeTime) -> Self {
        t.to_string()
    }
}

impl FromStr for RelativeTime {
    type Err = TimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(offset) = s.parse::<f64>() {
            return Self::after_trial_start(offset);
        }
        match s.split_once('+') {
            Some((reference, offset)) => {
                let offset = offset
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| TimingError::Parse(s.to_owned()))?;
                Self::new(reference.trim(), offset)
            }
            None if !s.is_empty() => Self::new(s, 0.0),
            None => Err(TimingError::Parse(s.to_owned())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelativeTimeRepr {
    Offset(f64),
    Text(String),
    Pair(String, f64),
}

impl TryFrom<RelativeTimeRepr> for RelativeTime {
    type Error = TimingError;

    fn try_from(repr: RelativeTimeRepr) -> Result<Self, Self::Error> {
        match repr {
            RelativeTimeRepr::Offset(offset) => Self::after_trial_start(offset),
            RelativeTimeRepr::Text(s) => s.parse(),
            RelativeTimeRepr::Pair(reference, offset) => Self::new(reference, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn known(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn resolves_against_trial_start() {
        let t = RelativeTime::after_trial_start(5.0).unwrap();
        assert_eq!(t.resolve(&known(&[(TRIAL_START, 10.0)])), Some(15.0));
    }

    #[test]
    fn unknown_reference_is_not_ready() {
        let t = RelativeTime::new("press", 0.3).unwrap();
        assert_eq!(t.resolve(&known(&[(TRIAL_START, 10.0)])), None);
        assert!(!t.is_due(100.0, &known(&[])));
    }

    #[test]
    fn add_keeps_reference() {
        let t = RelativeTime::new("cue", 1.0).unwrap().add(0.5).unwrap();
        assert_eq!(t.reference(), "cue");
        assert_eq!(t.offset(), 1.5);
    }

    #[test]
    fn add_rejects_non_finite() {
        let t = RelativeTime::default();
        assert!(t.add(f64::NAN).is_err());
        assert!(matches!(t.add(f64::INFINITY), Err(TimingError::InvalidOffset(_))));
    }

    #[test]
    fn parses_textual_forms() {
        let t: RelativeTime = "press+0.3".parse().unwrap();
        assert_eq!((t.reference(), t.offset()), ("press", 0.3));

        let t: RelativeTime = "press".parse().unwrap();
        assert_eq!((t.reference(), t.offset()), ("press", 0.0));

        let t: RelativeTime = "2.5".parse().unwrap();
        assert_eq!((t.reference(), t.offset()), (TRIAL_START, 2.5));

        assert!("press+soon".parse::<RelativeTime>().is_err());
        assert!("".parse::<RelativeTime>().is_err());
    }

    #[test]
    fn deserializes_number_string_and_pair() {
        let ts: Vec<RelativeTime> =
            serde_json::from_str(r#"[2, "cue+0.25", ["press", 0.3]]"#).unwrap();
        assert_eq!(ts[0], RelativeTime::after_trial_start(2.0).unwrap());
        assert_eq!(ts[1], RelativeTime::new("cue", 0.25).unwrap());
        assert_eq!(ts[2], RelativeTime::new("press", 0.3).unwrap());
    }

    #[test]
    fn boundary_is_due() {
        let t = RelativeTime::after_trial_start(0.2).unwrap();
        let log = known(&[(TRIAL_START, 0.1)]);
        assert!(t.is_due(0.3, &log));
        assert!(!t.is_due(0.29, &log));
    }

    proptest! {
        #[test]
        fn add_is_additive(start in -100.0f64..100.0, a in -10.0f64..10.0, b in -10.0f64..10.0) {
            let base = RelativeTime::after_trial_start(start).unwrap();
            let chained = base.add(a).unwrap().add(b).unwrap();
            prop_assert!((chained.offset() - (start + a + b)).abs() < 1e-9);
        }
    }
}
