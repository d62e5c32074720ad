//! 📦 Common data structures: the building blocks of folio
//!
//! ---
//!
//! 🎬 COLD OPEN. INT. GPU NODE, 2:13 AM
//!
//! 🌩️ A pod is scheduling. A 3B-parameter model is being paged into VRAM one
//! shard at a time. Somewhere upstream, four hundred scanned pages sit in a
//! directory, numbered, sorted, and blissfully unaware of the wait ahead.
//!
//! ✅ Each page becomes an [`InputItem`]. Items travel in [`Chunk`]s. Every chunk
//! comes home as a [`RequestOutcome`], success or failure, but never silently.
//! At the end someone adds it all up into [`SessionStats`] and pretends the
//! numbers were always this good.
//!
//! 🦆
//!
//! These structs don't know about PDFs, buckets or clusters. They carry bytes,
//! ids, and verdicts. That's the whole job.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// 📦 Where an item's bytes actually live.
///
/// `Bytes` is already in RAM. `File` is a promise that the bytes are on disk and
/// will be read when the encoder gets around to it. Promises can be broken; that
/// is what [`crate::error::EncodingError`] is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// 🎯 One page. One id. Zero opinions about what's written on it.
///
/// The id is supplied by the caller and is never re-derived from content. It
/// rides along through chunking and shows up again in the outcome, so a failed
/// request can still be traced back to "pages 6 through 10".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    id: String,
    payload: Payload,
    content_type: Option<String>,
}

impl InputItem {
    /// 🧠 An item whose bytes are already in hand.
    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Bytes(bytes.into()),
            content_type: None,
        }
    }

    /// 📂 An item backed by a file, read lazily at encode time.
    pub fn from_file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            payload: Payload::File(path.into()),
            content_type: None,
        }
    }

    /// 🏷️ Pin the content type instead of letting the encoder sniff it.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// 🚚 A bounded group of items that travels as one inference request.
///
/// Only [`crate::chunker::chunk`] makes these in production, which is how the
/// "never empty, never over capacity" promise is kept. The executor still
/// double-checks capacity, because trust is earned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    index: usize,
    items: Vec<InputItem>,
}

impl Chunk {
    pub(crate) fn new(index: usize, items: Vec<InputItem>) -> Self {
        debug_assert!(!items.is_empty(), "💀 a chunk with no items is just an expensive HTTP ping");
        Self { index, items }
    }

    /// 🔢 Zero-based position of this chunk in its run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    // -- clippy insists. clippy always insists.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

/// ⚖️ The verdict for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// ✅ The model answered. `text` is the raw content for the whole chunk, unsplit.
    Success { text: String },
    /// 💀 It didn't, and we stopped asking.
    Failure { error: String },
}

/// 📬 What came back for one chunk, plus enough context to reconcile it with
/// the inputs no matter how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestOutcome {
    pub chunk_index: usize,
    pub item_ids: Vec<String>,
    pub item_count: usize,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// 🔁 Transport calls actually made. Zero means it never left the building.
    pub attempts: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RequestOutcome {
    pub(crate) fn for_chunk(chunk: &Chunk, status: OutcomeStatus, attempts: u32, elapsed: Duration) -> Self {
        Self {
            chunk_index: chunk.index(),
            item_ids: chunk.item_ids(),
            item_count: chunk.len(),
            status,
            attempts,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Success { text } => Some(text),
            OutcomeStatus::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Success { .. } => None,
            OutcomeStatus::Failure { error } => Some(error),
        }
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// 📊 The end-of-run scoreboard.
///
/// Derived, never authoritative: [`SessionStats::from_outcomes`] rebuilds it
/// from the outcome list and the total wall-clock time. Averages are zero when
/// there is nothing to average. An empty book is not a division by zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStats {
    pub total_elapsed: Duration,
    pub chunk_elapsed: Vec<Duration>,
    pub success_count: usize,
    pub failure_count: usize,
    pub item_count: usize,
    pub avg_per_chunk: Duration,
    pub avg_per_item: Duration,
}

impl SessionStats {
    /// 🫙 The stats of a run that had nothing to do.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_outcomes(outcomes: &[RequestOutcome], total_elapsed: Duration) -> Self {
        let success_count = outcomes.iter().filter(|o| o.is_success()).count();
        let item_count = outcomes.iter().map(|o| o.item_count).sum();
        Self {
            total_elapsed,
            chunk_elapsed: outcomes.iter().map(|o| o.elapsed).collect(),
            success_count,
            failure_count: outcomes.len() - success_count,
            item_count,
            avg_per_chunk: average(total_elapsed, outcomes.len()),
            avg_per_item: average(total_elapsed, item_count),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.success_count + self.failure_count
    }
}

fn average(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        // -- more than four billion chunks. respect. also, please stop.
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}
