// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Driver registry — the seam through which concrete wire adapters plug in.
//!
//! The core ships only the `mock` driver.  Embedders register real adapters
//! (OpenAI, Anthropic, …) at startup with [`register_driver`]; after that,
//! [`from_config`] resolves any configured provider id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::bail;

use skald_config::ModelConfig;

use crate::{MockProvider, ModelProvider};

/// Builds a provider from its configuration.
pub type DriverFactory =
    Arc<dyn Fn(&ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> + Send + Sync>;

fn drivers() -> &'static Mutex<HashMap<String, DriverFactory>> {
    static DRIVERS: OnceLock<Mutex<HashMap<String, DriverFactory>>> = OnceLock::new();
    DRIVERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register (or replace) the factory for a provider id.
pub fn register_driver(id: impl Into<String>, factory: DriverFactory) {
    drivers().lock().unwrap().insert(id.into(), factory);
}

/// Construct a [`ModelProvider`] from configuration.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    if cfg.provider == "mock" {
        return Ok(Arc::new(MockProvider));
    }
    let factory = drivers().lock().unwrap().get(&cfg.provider).cloned();
    match factory {
        Some(f) => f(cfg),
        None => bail!(
            "unknown provider '{}': no wire adapter registered for it",
            cfg.provider
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_is_always_available() {
        let cfg = ModelConfig::default();
        let p = from_config(&cfg).unwrap();
        assert_eq!(p.name(), "mock");
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let cfg = ModelConfig {
            provider: "definitely-not-registered".into(),
            ..Default::default()
        };
        assert!(from_config(&cfg).is_err());
    }

    #[test]
    fn registered_driver_resolves() {
        register_driver(
            "custom-test-driver",
            Arc::new(|_cfg| Ok(Arc::new(MockProvider) as Arc<dyn ModelProvider>)),
        );
        let cfg = ModelConfig {
            provider: "custom-test-driver".into(),
            ..Default::default()
        };
        assert!(from_config(&cfg).is_ok());
    }
}
