use crate::error::Result;
use crate::input::{Input, InputSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio input overflowed")]
    Overflow,
    #[error("audio stream failed: {0}")]
    Stream(String),
}

/// Mono 16-bit capture device, read one chunk at a time.
pub trait AudioStream {
    fn sample_rate(&self) -> u32;
    fn read_chunk(&mut self) -> std::result::Result<Vec<i16>, AudioError>;
}

/// Voice-onset trigger.
///
/// Each [`service`](Self::service) reads one chunk; a sample louder than the
/// threshold emits an [`Input::Voice`] naming the recording it belongs to
/// (`0.wav`, `1.wav`, ...). A recording starts at the first loud chunk and
/// runs for `rec_duration` seconds of audio. Finished recordings stay in
/// memory until [`write_soundfiles`](Self::write_soundfiles), so disk writes
/// can be put where they cannot disturb stimulus timing.
pub struct VoiceTrigger<S> {
    stream: S,
    threshold: i32,
    rec_samples: usize,
    next_recording: usize,
    recording: Option<Vec<i16>>,
    triggers: Vec<Input>,
    finished: BTreeMap<String, Vec<i16>>,
}

impl<S: AudioStream> VoiceTrigger<S> {
    pub const DEFAULT_THRESHOLD: i32 = 1000;
    pub const DEFAULT_REC_DURATION: f64 = 2.0;

    pub fn new(stream: S) -> Self {
        let rec_samples = Self::samples_for(&stream, Self::DEFAULT_REC_DURATION);
        Self {
            stream,
            threshold: Self::DEFAULT_THRESHOLD,
            rec_samples,
            next_recording: 0,
            recording: None,
            triggers: Vec::new(),
            finished: BTreeMap::new(),
        }
    }

    fn samples_for(stream: &S, seconds: f64) -> usize {
        (seconds.max(0.0) * f64::from(stream.sample_rate())).round() as usize
    }

    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_rec_duration(mut self, seconds: f64) -> Self {
        self.rec_samples = Self::samples_for(&self.stream, seconds);
        self
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: i32) {
        tracing::info!(threshold, "voice trigger threshold set");
        self.threshold = threshold;
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Names of recordings waiting to be written.
    pub fn pending_recordings(&self) -> impl Iterator<Item = &str> + '_ {
        self.finished.keys().map(String::as_str)
    }

    fn current_name(&self) -> String {
        format!("{}.wav", self.next_recording)
    }

    /// Reads and processes one chunk. Stream errors are logged and skipped;
    /// a lost chunk at worst turns a capture into a timeout.
    pub fn service(&mut self) {
        let chunk = match self.stream.read_chunk() {
            Ok(chunk) => chunk,
            Err(err) => {
                tracing::warn!(%err, "voice trigger dropped an audio chunk");
                return;
            }
        };

        let peak = chunk.iter().map(|s| i32::from(*s).abs()).max().unwrap_or(0);
        if peak > self.threshold {
            self.triggers.push(Input::Voice {
                recording: self.current_name(),
            });
            if self.recording.is_none() {
                tracing::debug!(peak, recording = %self.current_name(), "voice onset");
                self.recording = Some(Vec::with_capacity(self.rec_samples));
            }
        }

        if let Some(buffer) = &mut self.recording {
            buffer.extend_from_slice(&chunk);
            if buffer.len() >= self.rec_samples {
                let name = self.current_name();
                if let Some(samples) = self.recording.take() {
                    self.finished.insert(name, samples);
                }
                self.next_recording += 1;
            }
        }
    }

    /// Writes and forgets every finished recording; returns the paths written.
    pub fn write_soundfiles(&mut self, dir: &Path) -> Result<Vec<PathBuf>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.stream.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut written = Vec::with_capacity(self.finished.len());
        for (name, samples) in std::mem::take(&mut self.finished) {
            let path = dir.join(&name);
            let mut writer = hound::WavWriter::create(&path, spec)?;
            for sample in samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
            written.push(path);
        }
        if !written.is_empty() {
            tracing::info!(count = written.len(), dir = %dir.display(), "voice recordings written");
        }
        Ok(written)
    }
}

impl<S: AudioStream> InputSource for VoiceTrigger<S> {
    fn pending(&mut self) -> Vec<Input> {
        self.triggers.clone()
    }

    fn clear(&mut self) {
        self.triggers.clear();
    }
}
