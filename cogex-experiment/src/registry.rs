use crate::error::{ExperimentError, Result};
use cogex_core::StimulusHandle;
use std::collections::BTreeMap;

/// Stimuli by name, for events that refer to their target by name.
#[derive(Debug, Default, Clone)]
pub struct StimulusRegistry {
    stimuli: BTreeMap<String, StimulusHandle>,
}

impl StimulusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `stimulus` under its own name.
    pub fn insert(&mut self, stimulus: StimulusHandle) -> Result<()> {
        let name = stimulus.borrow().name().to_owned();
        if self.stimuli.contains_key(&name) {
            return Err(ExperimentError::DuplicateStimulus(name));
        }
        self.stimuli.insert(name, stimulus);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<StimulusHandle> {
        self.stimuli
            .get(name)
            .cloned()
            .ok_or_else(|| ExperimentError::UnknownStimulus(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stimuli.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StimulusHandle)> + '_ {
        self.stimuli.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    /// Names of the stimuli currently switched on, sorted.
    pub fn visible(&self) -> Vec<String> {
        self.stimuli
            .iter()
            .filter(|(_, handle)| handle.borrow().is_on())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
