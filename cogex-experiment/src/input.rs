use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};

/// A discrete input from the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A key name such as `"z"` or `"space"`.
    Key(String),
    /// A button-box code.
    Button(i64),
    /// A voice trigger; carries the name of the recording that captured it.
    Voice { recording: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Key,
    Button,
    Voice,
}

impl Input {
    pub fn key(name: impl Into<String>) -> Self {
        Input::Key(name.into())
    }

    pub fn kind(&self) -> InputKind {
        match self {
            Input::Key(_) => InputKind::Key,
            Input::Button(_) => InputKind::Button,
            Input::Voice { .. } => InputKind::Voice,
        }
    }

    /// The string a response window matches against and logs.
    pub fn token(&self) -> String {
        match self {
            Input::Key(name) => name.clone(),
            Input::Button(code) => code.to_string(),
            Input::Voice { recording } => recording.clone(),
        }
    }
}

/// Where response windows get their inputs from.
///
/// Implementations report what arrived since the last check; `clear`
/// discards anything not yet reported.
pub trait InputSource {
    fn pending(&mut self) -> Vec<Input>;
    fn clear(&mut self);

    /// Reports and forgets, so no input is seen by two polls.
    fn drain(&mut self) -> Vec<Input> {
        let inputs = self.pending();
        self.clear();
        inputs
    }

    /// True once nothing is buffered and no further input can arrive.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<S: InputSource + ?Sized> InputSource for &mut S {
    fn pending(&mut self) -> Vec<Input> {
        (**self).pending()
    }
    fn clear(&mut self) {
        (**self).clear()
    }
    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn pending(&mut self) -> Vec<Input> {
        (**self).pending()
    }
    fn clear(&mut self) {
        (**self).clear()
    }
    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }
}

/// In-memory queue; hosts push, the engine drains.
#[derive(Debug, Default, Clone)]
pub struct InputQueue {
    queue: VecDeque<Input>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, input: Input) {
        self.queue.push_back(input);
    }

    pub fn press(&mut self, key: &str) {
        self.push(Input::key(key));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl InputSource for InputQueue {
    fn pending(&mut self) -> Vec<Input> {
        self.queue.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Inputs delivered from another thread (e.g. a stdin reader).
#[derive(Debug)]
pub struct ChannelInput {
    rx: Receiver<Input>,
    buffered: Vec<Input>,
    disconnected: bool,
}

impl ChannelInput {
    pub fn new(rx: Receiver<Input>) -> Self {
        Self {
            rx,
            buffered: Vec::new(),
            disconnected: false,
        }
    }

    /// True once every sender is gone.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn pull(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(input) => self.buffered.push(input),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        tracing::debug!("input channel closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }
    }
}

impl InputSource for ChannelInput {
    fn pending(&mut self) -> Vec<Input> {
        self.pull();
        self.buffered.clone()
    }

    fn clear(&mut self) {
        self.pull();
        self.buffered.clear();
    }

    fn is_exhausted(&self) -> bool {
        self.disconnected && self.buffered.is_empty()
    }
}

/// Several sources seen as one, e.g. keyboard plus voice trigger.
#[derive(Default)]
pub struct InputMux {
    sources: Vec<Box<dyn InputSource>>,
}

impl InputMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl InputSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl InputSource for InputMux {
    fn pending(&mut self) -> Vec<Input> {
        self.sources.iter_mut().flat_map(|s| s.pending()).collect()
    }

    fn clear(&mut self) {
        for source in &mut self.sources {
            source.clear();
        }
    }

    fn is_exhausted(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.is_exhausted())
    }
}
