//! 🎬 *[camera pans across a single GPU, glowing softly in a dark rack]*
//! 🎬 "In a world where the inference server takes exactly one request at a time..."
//! 🎬 "One dispatcher dared to wait its turn."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Sequential Dispatcher: chunk the pages, wait for the model to wake up,
//! then walk the chunks through the executor one by one, in order, never two at
//! once. A failed chunk is written down and the walk continues. Only a model that
//! never wakes up stops the show.
//!
//! Run lifecycle:
//! ```text
//! NotStarted -> AwaitingReadiness -> Dispatching -> Completed
//!                                 \-> Aborted
//! ```

use std::num::NonZeroUsize;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::chunker::chunk;
use crate::common::{InputItem, RequestOutcome, SessionStats};
use crate::endpoints::InferenceEndpoint;
use crate::error::DispatchError;
use crate::executor::{RequestExecutor, RequestTemplate, RetryConfig};
use crate::progress::{ProgressMetrics, format_duration};
use crate::readiness::{ReadinessConfig, ReadinessGate};

/// 📝 The instruction the deployed OCR model was tuned around. One per request,
/// after all the images.
pub const DEFAULT_INSTRUCTION: &str = "Extract the text from the above document as if you were reading it naturally. \
Page numbers should be wrapped in brackets. Ex: <page_number>14</page_number> or <page_number>9/22</page_number>. \
Prefer using ☐ and ☑ for check boxes.";

/// 🔧 What to ask for and how much of it fits in one request.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DispatchConfig {
    /// 🏷️ Model identifier as the server knows it, e.g. `/models/Nanonets-OCR2-3B`.
    pub model: String,
    /// 📦 Hard per-request image limit. Must match the server's `limit_mm_per_prompt`.
    #[serde(default = "default_max_items_per_request")]
    pub max_items_per_request: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// 🎯 0.0 is as deterministic as the sampler gets.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_instruction")]
    pub instruction: String,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_max_items_per_request() -> usize {
    5
}

// 📏 Five dense pages of legalese fit. Six, historically, did not. Hence five per request.
fn default_max_tokens() -> u32 {
    15_000
}

fn default_instruction() -> String {
    DEFAULT_INSTRUCTION.to_string()
}

fn default_show_progress() -> bool {
    true
}

impl DispatchConfig {
    /// 🏗️ Everything defaulted except the model, which nobody can guess for you.
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_items_per_request: default_max_items_per_request(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            instruction: default_instruction(),
            show_progress: default_show_progress(),
        }
    }
}

/// 🚥 Where a run is. Logged, never stored past the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    NotStarted,
    AwaitingReadiness,
    Aborted,
    Dispatching,
    Completed,
}

fn advance(phase: &mut RunPhase, next: RunPhase) {
    debug!("🚥 run phase {:?} -> {:?}", phase, next);
    *phase = next;
}

/// 📦 Owns the endpoint handle and the run settings. Holds no state between
/// runs, so calling [`Dispatcher::dispatch`] twice is two independent runs, each
/// with its own readiness check.
#[derive(Debug)]
pub struct Dispatcher<E: InferenceEndpoint> {
    endpoint: E,
    template: RequestTemplate,
    capacity: NonZeroUsize,
    readiness: ReadinessConfig,
    retry: RetryConfig,
    show_progress: bool,
}

impl<E: InferenceEndpoint> Dispatcher<E> {
    /// 🚀 Wire it up. Fails only if the settings make no sense.
    pub fn new(
        endpoint: E,
        dispatch: DispatchConfig,
        readiness: ReadinessConfig,
        retry: RetryConfig,
    ) -> Result<Self, DispatchError> {
        let capacity = NonZeroUsize::new(dispatch.max_items_per_request).ok_or_else(|| {
            DispatchError::InvalidConfig("max_items_per_request must be at least 1".to_string())
        })?;
        if dispatch.model.trim().is_empty() {
            return Err(DispatchError::InvalidConfig("model must not be empty".to_string()));
        }
        // -- checked here, once, so the gate and the executor can trust their knobs
        readiness.validate()?;
        retry.validate()?;
        Ok(Self {
            endpoint,
            template: RequestTemplate {
                model: dispatch.model,
                instruction: dispatch.instruction,
                temperature: dispatch.temperature,
                max_tokens: dispatch.max_tokens,
            },
            capacity,
            readiness,
            retry,
            show_progress: dispatch.show_progress,
        })
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// 🧵 One run: chunk, gate, walk, tally.
    ///
    /// `Ok` always holds exactly one outcome per chunk, in chunk order. `Err`
    /// means the model never became usable and nothing was sent for real.
    pub async fn dispatch(&self, items: Vec<InputItem>) -> Result<(Vec<RequestOutcome>, SessionStats), DispatchError> {
        let mut phase = RunPhase::NotStarted;
        let started = Instant::now();
        let model = &self.template.model;

        // -- 🧮 counted before chunking, because chunk() takes ownership and doesn't give it back
        let total_items = items.len();
        let chunks = chunk(items, self.capacity);
        if chunks.is_empty() {
            info!("🫙 Nothing to dispatch, zero items in, zero requests out");
            return Ok((Vec::new(), SessionStats::zero()));
        }
        let total_requests = chunks.len();
        info!("📦 Processing {} items in {} requests", total_items, total_requests);

        advance(&mut phase, RunPhase::AwaitingReadiness);
        let mut gate = ReadinessGate::new(&self.endpoint, &self.template);
        // -- 🎯 the first chunk doubles as the probe source. Non-empty by construction, checked above.
        let probe_chunk = &chunks[0];
        if !gate
            .await_ready(probe_chunk, self.readiness.max_wait(), self.readiness.check_interval())
            .await
        {
            advance(&mut phase, RunPhase::Aborted);
            return Err(DispatchError::ReadinessTimedOut {
                model: model.clone(),
                max_wait: self.readiness.max_wait(),
            });
        }
        if let Err(err) = gate.confirm(probe_chunk).await {
            advance(&mut phase, RunPhase::Aborted);
            return Err(DispatchError::ConfirmationFailed {
                model: model.clone(),
                reason: format!("{err:#}"),
            });
        }

        advance(&mut phase, RunPhase::Dispatching);
        let executor = RequestExecutor::new(&self.endpoint, &self.template, self.capacity, &self.retry);
        let mut progress = ProgressMetrics::new(model.clone(), total_requests, total_items, self.show_progress);
        let mut outcomes = Vec::with_capacity(total_requests);

        // -- 🐌 strictly one after another. The await below is the whole concurrency model.
        for (request_num, the_chunk) in chunks.iter().enumerate().map(|(i, c)| (i + 1, c)) {
            // -- ✅ or 💀, execute() never throws. It just tells us which.
            let outcome = executor.execute(the_chunk).await;
            progress.update(&outcome);
            if outcome.is_success() {
                info!(
                    "✅ Request {}/{} ({} images) completed in {:.2}s | Est. remaining: {}",
                    request_num,
                    total_requests,
                    outcome.item_count,
                    outcome.elapsed.as_secs_f64(),
                    progress
                        .estimated_remaining()
                        .map(format_duration)
                        .unwrap_or_else(|| "--:--".to_string())
                );
            } else {
                info!(
                    "💀 Request {}/{} FAILED: {}",
                    request_num,
                    total_requests,
                    outcome.error().unwrap_or_default()
                );
            }
            outcomes.push(outcome);
        }
        progress.finish();
        advance(&mut phase, RunPhase::Completed);

        let stats = SessionStats::from_outcomes(&outcomes, started.elapsed());
        info!("⏱️ Total processing time: {:.2}s", stats.total_elapsed.as_secs_f64());
        info!("✅ Successful requests: {}/{}", stats.success_count, stats.chunk_count());
        info!("📊 Average time per request: {:.2}s", stats.avg_per_chunk.as_secs_f64());
        info!("📊 Average time per image: {:.2}s", stats.avg_per_item.as_secs_f64());
        Ok((outcomes, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{ScriptedEndpoint, ScriptedReply};
    use std::time::Duration;

    fn pages(n: usize) -> Vec<InputItem> {
        (1..=n)
            .map(|i| InputItem::from_bytes(format!("page_{i}"), vec![0xFF, 0xD8, 0xFF, i as u8]))
            .collect()
    }

    fn quiet_config() -> DispatchConfig {
        DispatchConfig {
            show_progress: false,
            ..DispatchConfig::for_model("/models/ocr")
        }
    }

    fn a_dispatcher(endpoint: ScriptedEndpoint) -> Dispatcher<ScriptedEndpoint> {
        Dispatcher::new(endpoint, quiet_config(), ReadinessConfig::default(), RetryConfig::default())
            .expect("💀 default settings should be valid settings")
    }

    fn ok(text: &str) -> ScriptedReply {
        ScriptedReply::Text(text.to_string())
    }

    fn nope() -> ScriptedReply {
        ScriptedReply::Fail("upstream reset".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_twelve_pages_go_in_and_the_middle_chunk_falls_over() {
        // -- probe, confirmation, chunk 1, chunk 2 x3 (all fail), chunk 3
        let endpoint = ScriptedEndpoint::new(
            vec![ok("probe"), ok("confirm"), ok("one"), nope(), nope(), nope(), ok("three")],
            nope(),
        );
        let the_spy = endpoint.clone();

        let (outcomes, stats) = a_dispatcher(endpoint)
            .dispatch(pages(12))
            .await
            .expect("💀 readiness was scripted to succeed");

        let sizes: Vec<usize> = outcomes.iter().map(|o| o.item_count).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        let tags: Vec<bool> = outcomes.iter().map(RequestOutcome::is_success).collect();
        assert_eq!(tags, vec![true, false, true]);
        assert_eq!(outcomes[0].text(), Some("one"));
        assert_eq!(outcomes[2].text(), Some("three"));
        assert_eq!(outcomes[1].attempts, 3);
        assert_eq!(outcomes[1].item_ids, (6..=10).map(|i| format!("page_{i}")).collect::<Vec<_>>());
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.item_count, 12);
        assert_eq!(the_spy.call_count().await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_chunks_one_and_three_fail_and_nobody_panics() {
        let endpoint = ScriptedEndpoint::new(
            vec![ok("probe"), ok("confirm"), nope(), nope(), nope(), ok("two"), nope(), nope(), nope()],
            ok("unused"),
        );

        let (outcomes, stats) = a_dispatcher(endpoint).dispatch(pages(15)).await.expect("💀 should run");

        let indices: Vec<usize> = outcomes.iter().map(|o| o.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let tags: Vec<bool> = outcomes.iter().map(RequestOutcome::is_success).collect();
        assert_eq!(tags, vec![false, true, false]);
        assert_eq!((stats.success_count, stats.failure_count), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_server_never_wakes_up_and_nothing_is_sent() {
        let endpoint = ScriptedEndpoint::always(nope());
        let the_spy = endpoint.clone();
        let dispatcher = Dispatcher::new(
            endpoint,
            quiet_config(),
            ReadinessConfig {
                max_wait_secs: 30,
                check_interval_secs: 5,
            },
            RetryConfig::default(),
        )
        .expect("💀 valid settings");

        let err = dispatcher.dispatch(pages(12)).await.expect_err("readiness should time out");

        assert!(matches!(err, DispatchError::ReadinessTimedOut { .. }), "got {err:?}");
        let calls = the_spy.calls().await;
        assert_eq!(calls.len(), 6, "only probes, every 5s for 30s");
        assert!(calls.iter().all(|c| c.image_count == 1), "no real chunk was ever sent");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_ready_server_costs_one_probe_and_one_confirmation() {
        let endpoint = ScriptedEndpoint::always(ok("text"));
        let the_spy = endpoint.clone();
        let started = Instant::now();

        let (outcomes, _) = a_dispatcher(endpoint).dispatch(pages(3)).await.expect("💀 should run");

        assert_eq!(outcomes.len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO, "no readiness waiting at all");
        let image_counts: Vec<usize> = the_spy.calls().await.iter().map(|c| c.image_count).collect();
        assert_eq!(image_counts, vec![1, 1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_confirmation_flakes_and_the_run_aborts() {
        let endpoint = ScriptedEndpoint::new(vec![ok("probe"), nope()], ok("would have worked"));
        let the_spy = endpoint.clone();

        let err = a_dispatcher(endpoint).dispatch(pages(7)).await.expect_err("confirmation was scripted to fail");

        assert!(matches!(err, DispatchError::ConfirmationFailed { .. }), "got {err:?}");
        assert_eq!(the_spy.call_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_empty_book_is_a_quiet_success() {
        let endpoint = ScriptedEndpoint::always(ok("never"));
        let the_spy = endpoint.clone();

        let (outcomes, stats) = a_dispatcher(endpoint).dispatch(Vec::new()).await.expect("💀 empty is fine");

        assert!(outcomes.is_empty());
        assert_eq!(stats, SessionStats::zero());
        assert_eq!(the_spy.call_count().await, 0, "not even a probe");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_one_request_is_in_flight_at_a_time() {
        let endpoint = ScriptedEndpoint::always(ok("slow but steady")).with_latency(Duration::from_secs(3));
        let the_spy = endpoint.clone();

        let (outcomes, stats) = a_dispatcher(endpoint).dispatch(pages(23)).await.expect("💀 should run");

        assert_eq!(outcomes.len(), 5);
        let calls = the_spy.calls().await;
        assert!(calls.iter().all(|c| c.in_flight == 1));
        // -- 2 probes + 5 chunks, 3s each, strictly back to back
        assert_eq!(stats.total_elapsed, Duration::from_secs(21));
        assert_eq!(stats.chunk_elapsed, vec![Duration::from_secs(3); 5]);
        assert_eq!(stats.avg_per_chunk, Duration::from_millis(4200));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_outcome_count_is_always_the_ceiling() {
        for n in [1, 4, 5, 6, 10, 11] {
            let (outcomes, _) = a_dispatcher(ScriptedEndpoint::always(ok("t")))
                .dispatch(pages(n))
                .await
                .expect("💀 should run");
            assert_eq!(outcomes.len(), n.div_ceil(5), "n={n}");
            assert_eq!(outcomes.iter().map(|o| o.item_count).sum::<usize>(), n);
        }
    }

    #[test]
    fn the_one_where_zero_capacity_is_rejected_up_front() {
        let config = DispatchConfig {
            max_items_per_request: 0,
            ..quiet_config()
        };
        let err = Dispatcher::new(
            ScriptedEndpoint::always(ok("t")),
            config,
            ReadinessConfig::default(),
            RetryConfig::default(),
        )
        .expect_err("zero capacity is nonsense");
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn the_one_where_knobs_that_would_flood_or_shrink_are_rejected() {
        let flooding = ReadinessConfig {
            max_wait_secs: 600,
            check_interval_secs: 0,
        };
        let no_attempts = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        let shrinking = RetryConfig {
            min_delay_ms: 20_000,
            max_delay_ms: 1_000,
            ..RetryConfig::default()
        };
        let cases = [
            (flooding, RetryConfig::default()),
            (ReadinessConfig::default(), no_attempts),
            (ReadinessConfig::default(), shrinking),
        ];

        for (readiness, retry) in cases {
            let the_spy = ScriptedEndpoint::always(ok("t"));
            let err = Dispatcher::new(the_spy, quiet_config(), readiness.clone(), retry.clone())
                .expect_err("should never get to run");
            assert!(
                matches!(err, DispatchError::InvalidConfig(_)),
                "readiness={readiness:?} retry={retry:?} got {err:?}"
            );
        }
    }

    #[test]
    fn the_one_where_a_blank_model_name_is_rejected() {
        let err = Dispatcher::new(
            ScriptedEndpoint::always(ok("t")),
            DispatchConfig::for_model("   "),
            ReadinessConfig::default(),
            RetryConfig::default(),
        )
        .expect_err("blank model");
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }
}
