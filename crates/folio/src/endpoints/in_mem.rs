//! # Previously, on Folio...
//!
//! 🎬 The GPU was asleep. The tests could not wait for it. Someone had to stand
//! in for an inference server so convincingly that the dispatcher would never
//! know the difference.
//!
//! That someone was this module.
//!
//! [`ScriptedEndpoint`] answers from a queue of scripted replies, falls back to
//! a default reply when the queue runs dry, and writes down every call it gets
//! (when, how many images, what instruction, how many calls were in flight at
//! once) behind an `Arc<Mutex<...>>` so tests can inspect it afterwards.
//!
//! 🦆
//!
//! ✅ No network calls. No disk I/O. No CUDA. Just vibes and heap memory.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::endpoints::{InferenceEndpoint, InferenceRequest};
use crate::error::TransportError;

/// 🎬 One line of the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// ✅ a completion with this text
    Text(String),
    /// 🫙 a completion with nothing in it (the model woke up grumpy)
    Empty,
    /// 💀 a transport failure, reported as `TransportError::Status { status: 503, .. }`
    Fail(String),
}

/// 📝 What the stand-in saw for one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub image_count: usize,
    pub instruction: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 🔒 calls in flight at the moment this one arrived, itself included
    pub in_flight: usize,
}

#[derive(Debug)]
struct ScriptState {
    script: VecDeque<ScriptedReply>,
    fallback: ScriptedReply,
    latency: Duration,
    calls: Vec<RecordedCall>,
}

/// 📦 The stunt double. Clone it, hand one copy to the dispatcher, keep the
/// other to read the call log. Both point at the same state.
#[derive(Debug, Clone)]
pub struct ScriptedEndpoint {
    state: Arc<Mutex<ScriptState>>,
    // -- atomic, not in the Mutex, so a Drop impl can give the slot back without awaiting
    in_flight: Arc<AtomicUsize>,
}

/// 🎟️ Holds one in-flight slot and hands it back on drop, even when the caller
/// walks away mid-call (a timeout, a dropped future, a test losing patience).
struct InFlightSlot<'a>(&'a AtomicUsize);

impl<'a> InFlightSlot<'a> {
    fn take(counter: &'a AtomicUsize) -> (Self, usize) {
        let now_in_flight = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), now_in_flight)
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEndpoint {
    /// 🎬 Play `script` in order, then `fallback` forever.
    pub fn new(script: impl IntoIterator<Item = ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                script: script.into_iter().collect(),
                fallback,
                latency: Duration::ZERO,
                calls: Vec::new(),
            })),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 🔁 Same answer, every time. The most reliable server ever deployed.
    pub fn always(reply: ScriptedReply) -> Self {
        Self::new(Vec::new(), reply)
    }

    /// 🐌 Pretend each call takes this long. Pairs nicely with paused tokio time.
    pub fn with_latency(self, latency: Duration) -> Self {
        // -- nobody else holds the Arc yet, so try_lock cannot lose a race here
        if let Ok(mut state) = self.state.try_lock() {
            state.latency = latency;
        }
        self
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }
}

#[async_trait]
impl InferenceEndpoint for ScriptedEndpoint {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        let (_slot, in_flight) = InFlightSlot::take(&self.in_flight);
        let (reply, latency) = {
            let mut state = self.state.lock().await;
            state.calls.push(RecordedCall {
                at: Instant::now(),
                image_count: request.image_count(),
                instruction: request.instruction().map(str::to_string),
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                in_flight,
            });
            let reply = state.script.pop_front().unwrap_or_else(|| state.fallback.clone());
            (reply, state.latency)
        };

        // -- 🔒 lock released before sleeping, so an overlapping caller would be counted
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Empty => Ok(String::new()),
            ScriptedReply::Fail(body) => Err(TransportError::Status { status: 503, body }),
        }
    }
}
