//! batch.rs
//! A caller-defined unit of work: frames, loop semantics and the token that stops it.

use std::{sync::Arc, time::Duration};

use crate::{
    error::SubmitError,
    frame::{
        control::DispatchControl,
        message::{CanMessage, MAX_DATA_LENGTH},
    },
};

/// How many passes a batch makes over its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCount {
    /// Loop until cancelled (raw value `-1`).
    Infinite,
    /// Exactly this many passes; `Times(0)` does nothing.
    Times(u32),
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Times(1)
    }
}

impl TryFrom<i64> for LoopCount {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            -1 => Ok(LoopCount::Infinite),
            n if n >= 0 => u32::try_from(n)
                .map(LoopCount::Times)
                .map_err(|_| format!("loop count {} out of range", n)),
            n => Err(format!("loop count must be >= -1, got {}", n)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub messages: Vec<CanMessage>,
    pub loop_count: LoopCount,
    /// Delay after each full pass, including the last.
    pub loop_interval: Duration,
    /// Caller-supplied group token. Each submission still gets its own token,
    /// derived from this one when present.
    pub control: Option<Arc<DispatchControl>>,
    /// Registry key override; defaults to the first message's ID.
    pub stream_key: Option<u32>,
}

impl Batch {
    pub fn new(messages: Vec<CanMessage>) -> Self {
        Self {
            messages,
            loop_count: LoopCount::default(),
            loop_interval: Duration::ZERO,
            control: None,
            stream_key: None,
        }
    }

    pub fn looping(mut self, loop_count: LoopCount) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    pub fn with_control(mut self, control: Arc<DispatchControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn stream_key(mut self, key: u32) -> Self {
        self.stream_key = Some(key);
        self
    }

    /// Registry key: the explicit stream key, else the first message's ID.
    pub fn key(&self) -> Option<u32> {
        self.stream_key.or_else(|| self.messages.first().map(|m| m.id))
    }

    pub fn frames_per_pass(&self) -> u64 {
        self.messages.iter().map(|m| m.count as u64).sum()
    }

    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.messages.is_empty() {
            return Err(SubmitError::EmptyBatch);
        }
        for msg in &self.messages {
            if msg.count == 0 {
                return Err(SubmitError::ZeroRepeat { id: msg.id });
            }
            if msg.data.len() > MAX_DATA_LENGTH {
                return Err(SubmitError::PayloadTooLong {
                    id: msg.id,
                    len: msg.data.len(),
                    max: MAX_DATA_LENGTH,
                });
            }
        }
        Ok(())
    }

    /// Fresh token for one submission: a child of the group token if the
    /// caller supplied one, otherwise standalone.
    pub(crate) fn submission_control(&self) -> Arc<DispatchControl> {
        match &self.control {
            Some(group) => DispatchControl::child(group),
            None => Arc::new(DispatchControl::new()),
        }
    }

    pub(crate) fn attach_control(&mut self, control: &Arc<DispatchControl>) {
        for msg in &mut self.messages {
            msg.attach(control);
        }
    }
}
