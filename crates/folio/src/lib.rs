//! 📚 folio: feed scanned pages to a single-seat vision model without losing any.
//!
//! 🎬 *[narrator voice]* "The GPU could read one request at a time. The book had
//! four hundred pages. Something had to stand in line on their behalf."
//!
//! The pipeline, front to back:
//! - [`chunker`] splits the items into requests of at most `max_items_per_request`.
//! - [`readiness`] knocks on the model until it answers, then knocks once more to be sure.
//! - [`executor`] sends one chunk, retrying with exponential backoff, and always returns an outcome.
//! - [`dispatcher`] walks the chunks strictly one after another and tallies [`SessionStats`].
//!
//! Endpoints live behind [`endpoints::InferenceEndpoint`]: an OpenAI-compatible HTTP
//! client for the real thing, a scripted stand-in for tests and dry runs.

pub mod app_config;
pub mod chunker;
pub mod common;
pub mod dispatcher;
pub mod encoder;
pub mod endpoints;
pub mod error;
pub mod executor;
mod progress;
pub mod readiness;

use anyhow::Context;
use tracing::info;

pub use crate::app_config::AppConfig;
pub use crate::common::{Chunk, InputItem, OutcomeStatus, Payload, RequestOutcome, SessionStats};
pub use crate::dispatcher::{DEFAULT_INSTRUCTION, DispatchConfig, Dispatcher};
pub use crate::endpoints::{EndpointBackend, EndpointConfig, InferenceEndpoint};
pub use crate::error::{DispatchError, EncodingError, TransportError};

/// 🚀 Build the endpoint from config and run one dispatch over `items`.
///
/// Chunk failures come back inside the outcomes. Only setup problems and a model
/// that never became ready come back as `Err`.
pub async fn run(app_config: &AppConfig, items: Vec<InputItem>) -> anyhow::Result<(Vec<RequestOutcome>, SessionStats)> {
    let endpoint = EndpointBackend::from_config(&app_config.endpoint)
        .context("💀 Could not build the inference endpoint from the [endpoint] config")?;
    let dispatcher = Dispatcher::new(
        endpoint,
        app_config.dispatch.clone(),
        app_config.readiness.clone(),
        app_config.retry.clone(),
    )?;

    info!("🚀 Dispatching {} items to '{}'", items.len(), app_config.dispatch.model);
    let (outcomes, stats) = dispatcher
        .dispatch(items)
        .await
        .context("💀 The dispatch run was aborted before any page was sent for real")?;
    Ok((outcomes, stats))
}
