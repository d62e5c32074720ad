//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with GPUs.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment. Env vars (`FOLIO_*`, nested with `__`) go in first,
//! then the TOML file on top, so the file wins whenever both speak up.
//!
//! ```toml
//! [endpoint.OpenAiCompatible]
//! base_url = "http://vllm-router.default.svc.cluster.local/v1"
//! api_key = "dummy"
//! request_timeout_secs = 600
//!
//! [dispatch]
//! model = "/models/Nanonets-OCR2-3B"
//!
//! [readiness]
//! max_wait_secs = 600
//! ```

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::dispatcher::DispatchConfig;
use crate::endpoints::EndpointConfig;
use crate::executor::RetryConfig;
use crate::readiness::ReadinessConfig;

/// 📦 Everything a run needs to know about itself.
///
/// `endpoint` and `dispatch.model` have no defaults. Everything else does.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the model lives.
    pub endpoint: EndpointConfig,
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// 🚀 Load the config from `FOLIO_*` env vars plus an optional TOML file.
///
/// - `None`: env vars only. No file, no assumptions.
/// - `Some(path)`: env vars, then the file merged over them. TOML wins on conflicts.
///
/// `FOLIO_DISPATCH__MODEL=/models/x` lands on `dispatch.model`. Figment lowercases
/// env keys, which is why the endpoint variants also answer to lowercase names.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:?}", config_file_name.unwrap_or(Path::new("<env only>")));

    let config = Figment::new().merge(Env::prefixed("FOLIO_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (FOLIO_*). \
             Check the [endpoint] table and dispatch.model first, they are the ones without defaults.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (FOLIO_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
