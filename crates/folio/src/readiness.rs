//! 🚦 The Readiness Gate.
//!
//! 🎬 *[a pod is Pending. then ContainerCreating. then Running, but the model is still loading.]*
//! *[the router returns 502. then 503. then a connection reset. then, finally, text.]*
//!
//! Cold starts are slow and noisy. Instead of firing the whole book at a server
//! that is still paging weights into VRAM, we knock politely with one page, every
//! `check_interval`, until it answers with actual text or `max_wait` runs out.
//!
//! Every error during warm-up means the same thing: "not yet". No error is special.
//! Only running out of time is.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::common::Chunk;
use crate::encoder::encode;
use crate::endpoints::InferenceEndpoint;
use crate::error::DispatchError;
use crate::executor::RequestTemplate;

/// 🔧 How long to wait for the model, and how often to knock.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

// ⏱️ Ten minutes. Enough for a node to scale up and pull a fat image. Usually.
fn default_max_wait_secs() -> u64 {
    600
}

fn default_check_interval_secs() -> u64 {
    5
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl ReadinessConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// 🔒 A zero interval turns polite knocking into a probe storm against a
    /// server that can only take one request at a time.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.check_interval_secs == 0 {
            return Err(DispatchError::InvalidConfig(
                "readiness.check_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 🚥 Where the gate is in its short, anxious life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Unprobed,
    Probing,
    Ready,
    TimedOut,
}

impl ReadinessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::TimedOut)
    }
}

/// 🚪 One gate per run. Not shared, not reused, not kept around afterwards.
#[derive(Debug)]
pub struct ReadinessGate<'a, E: InferenceEndpoint> {
    endpoint: &'a E,
    template: &'a RequestTemplate,
    state: ReadinessState,
    probes_sent: u32,
}

impl<'a, E: InferenceEndpoint> ReadinessGate<'a, E> {
    pub fn new(endpoint: &'a E, template: &'a RequestTemplate) -> Self {
        Self {
            endpoint,
            template,
            state: ReadinessState::Unprobed,
            probes_sent: 0,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn probes_sent(&self) -> u32 {
        self.probes_sent
    }

    /// 🔁 Knock until someone answers with text, or until `max_wait` is up.
    ///
    /// Returns `true` the moment a probe comes back non-empty. Returns `false`
    /// once `max_wait` has elapsed, and that verdict is final: a gate in a
    /// terminal state reports it again without probing.
    pub async fn await_ready(&mut self, probe_chunk: &Chunk, max_wait: Duration, check_interval: Duration) -> bool {
        if self.state.is_terminal() {
            return self.state == ReadinessState::Ready;
        }

        let template = self.template;
        let model = &template.model;
        let started = Instant::now();
        self.state = ReadinessState::Probing;
        info!("⏳ Waiting for model '{}' to be ready...", model);

        while started.elapsed() < max_wait {
            match self.probe(probe_chunk).await {
                Ok(text) if !text.is_empty() => {
                    self.state = ReadinessState::Ready;
                    info!(
                        "✅ Model '{}' is ready! (took {:.1}s, {} probe(s))",
                        model,
                        started.elapsed().as_secs_f64(),
                        self.probes_sent
                    );
                    return true;
                }
                Ok(_) => warn!("🫙 '{}' answered with an empty completion, not up yet", model),
                Err(err) => info!("💤 Model not ready: {:#}. Waiting for pod to start...", err),
            }

            let elapsed = started.elapsed();
            let remaining = max_wait.saturating_sub(elapsed);
            if remaining.is_zero() {
                break;
            }
            let nap = check_interval.min(remaining);
            info!(
                "⏳ Waiting... ({:.0}s / {}s) - next check in {:.0}s",
                elapsed.as_secs_f64(),
                max_wait.as_secs(),
                nap.as_secs_f64()
            );
            tokio::time::sleep(nap).await;
        }

        self.state = ReadinessState::TimedOut;
        error!(
            "💀 Timeout: Model '{}' did not become ready within {}s. Pod may have failed to start.",
            model,
            max_wait.as_secs()
        );
        false
    }

    /// ✅ The second knock. Same probe, sent once more right before real traffic,
    /// and this time an empty answer or an error counts against us.
    pub async fn confirm(&mut self, probe_chunk: &Chunk) -> Result<()> {
        info!("🧪 Testing dummy batch before dispatching for real");
        let text = self.probe(probe_chunk).await.context("confirmation probe failed")?;
        if text.is_empty() {
            anyhow::bail!("confirmation probe came back with an empty completion");
        }
        Ok(())
    }

    /// 📡 One probe: the first item of the chunk, straight through the endpoint.
    /// No retries here, a failed probe is just information.
    async fn probe(&mut self, probe_chunk: &Chunk) -> Result<String> {
        // -- 🎯 one page is enough to ask "are you awake?". Five pages is asking "are you awake, and also, read this novel"
        let first = probe_chunk
            .items()
            .first()
            .context("probe chunk has no items to probe with")?;
        // -- 📂 an unreadable page lands here as an Err, which the caller files under "not yet" like everything else
        let image = encode(first).await?;
        let request = self.template.build(vec![image]);
        // -- 🧮 counted before the send, so a probe that hangs up on us still counts as a knock
        self.probes_sent += 1;
        Ok(self.endpoint.complete(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::InputItem;
    use crate::endpoints::{ScriptedEndpoint, ScriptedReply};

    fn a_template() -> RequestTemplate {
        RequestTemplate {
            model: "/models/ocr".into(),
            instruction: "transcribe".into(),
            temperature: 0.0,
            max_tokens: 15000,
        }
    }

    fn a_probe_chunk() -> Chunk {
        let items = (0..5).map(|i| InputItem::from_bytes(format!("p{i}"), vec![i as u8])).collect();
        Chunk::new(0, items)
    }

    const TEN_MINUTES: Duration = Duration::from_secs(600);
    const FIVE_SECONDS: Duration = Duration::from_secs(5);

    #[test]
    fn the_one_where_a_zero_interval_is_turned_away() {
        let config = ReadinessConfig {
            max_wait_secs: 600,
            check_interval_secs: 0,
        };
        assert!(matches!(config.validate(), Err(DispatchError::InvalidConfig(_))));
        assert!(ReadinessConfig::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_model_was_already_awake() {
        let endpoint = ScriptedEndpoint::always(ScriptedReply::Text("hello".into()));
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);
        assert_eq!(gate.state(), ReadinessState::Unprobed);
        let started = Instant::now();

        assert!(gate.await_ready(&a_probe_chunk(), TEN_MINUTES, FIVE_SECONDS).await);

        assert_eq!(gate.state(), ReadinessState::Ready);
        assert_eq!(started.elapsed(), Duration::ZERO, "no waiting when the first probe lands");
        let calls = endpoint.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_count, 1, "probes carry a single page");
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_errors_and_silence_just_mean_not_yet() {
        let endpoint = ScriptedEndpoint::new(
            vec![
                ScriptedReply::Fail("502 bad gateway".into()),
                ScriptedReply::Fail("connection reset".into()),
                ScriptedReply::Empty,
            ],
            ScriptedReply::Text("awake".into()),
        );
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);
        let started = Instant::now();

        assert!(gate.await_ready(&a_probe_chunk(), TEN_MINUTES, FIVE_SECONDS).await);

        assert_eq!(gate.probes_sent(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_pod_never_came_up() {
        let endpoint = ScriptedEndpoint::always(ScriptedReply::Fail("no healthy upstream".into()));
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);
        let started = Instant::now();

        assert!(!gate.await_ready(&a_probe_chunk(), Duration::from_secs(60), FIVE_SECONDS).await);

        assert_eq!(gate.state(), ReadinessState::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(endpoint.call_count().await, 12);

        // -- terminal means terminal: asking again does not knock again
        assert!(!gate.await_ready(&a_probe_chunk(), Duration::from_secs(60), FIVE_SECONDS).await);
        assert_eq!(endpoint.call_count().await, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_last_nap_is_trimmed_to_fit() {
        let endpoint = ScriptedEndpoint::always(ScriptedReply::Empty);
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);
        let started = Instant::now();

        assert!(!gate.await_ready(&a_probe_chunk(), Duration::from_secs(7), FIVE_SECONDS).await);

        assert_eq!(started.elapsed(), Duration::from_secs(7), "never sleeps past max_wait");
        assert_eq!(endpoint.call_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_confirmation_probe_gets_cold_feet() {
        let endpoint = ScriptedEndpoint::new(
            vec![ScriptedReply::Text("ready".into()), ScriptedReply::Fail("evicted".into())],
            ScriptedReply::Text("ready again".into()),
        );
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);

        assert!(gate.await_ready(&a_probe_chunk(), TEN_MINUTES, FIVE_SECONDS).await);
        let err = gate.confirm(&a_probe_chunk()).await.expect_err("second probe was scripted to fail");

        assert!(format!("{err:#}").contains("evicted"));
        assert_eq!(endpoint.call_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_an_empty_confirmation_is_not_a_confirmation() {
        let endpoint = ScriptedEndpoint::new(vec![ScriptedReply::Text("ready".into())], ScriptedReply::Empty);
        let template = a_template();
        let mut gate = ReadinessGate::new(&endpoint, &template);

        assert!(gate.await_ready(&a_probe_chunk(), TEN_MINUTES, FIVE_SECONDS).await);
        assert!(gate.confirm(&a_probe_chunk()).await.is_err());
    }
}
