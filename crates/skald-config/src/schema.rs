// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// The primary conversation model.
    #[serde(default)]
    pub model: ModelConfig,
    /// Small, fast model used for auto-continue judgments, authorization
    /// safety checks, compaction summaries, and session titles.
    ///
    /// When absent those paths fall back to their deterministic behaviour:
    /// auto-continue stops, authorization asks the user directly, compaction
    /// drops old history with a notice.
    #[serde(default)]
    pub judge_model: Option<ModelConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub blocklist: BlocklistConfig,
    /// Named provider configurations, referenced with `--model <key>`.
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier. Wire adapters register themselves with the
    /// driver registry; "mock" is always available.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override for local proxies or self-hosted endpoints.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context window override.  Normally resolved from the driver.
    pub context_window: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            name: "mock-model".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            context_window: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    50
}
fn default_max_auto_continues() -> u32 {
    10
}
fn default_compaction_threshold() -> f32 {
    0.9
}
fn default_compaction_keep_recent() -> usize {
    8
}
fn default_max_consecutive_compactions() -> u32 {
    2
}
fn default_tool_parallelism() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model/tool iterations for a single user prompt.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Maximum consecutive auto-continue rounds before the loop is forced
    /// to terminate.
    #[serde(default = "default_max_auto_continues")]
    pub max_auto_continues: u32,
    /// Fraction of the model's context window at which compaction triggers.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of trailing messages preserved verbatim across a compaction.
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Cap on back-to-back compactions; exceeding it fails the turn with
    /// `context_exhausted`.
    #[serde(default = "default_max_consecutive_compactions")]
    pub max_consecutive_compactions: u32,
    /// Concurrency cap for parallel tool execution within one assistant turn.
    #[serde(default = "default_tool_parallelism")]
    pub tool_parallelism: usize,
    /// Command prefixes authorized up front (CLI `--allow-command`).
    #[serde(default)]
    pub pre_authorized_commands: Vec<String>,
    /// Domain patterns authorized up front (CLI `--allow-domain`).
    #[serde(default)]
    pub pre_authorized_domains: Vec<String>,
    /// Run the planning sub-agent before the main loop.
    #[serde(default)]
    pub planning_enabled: bool,
    /// Shell command timeout in seconds.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
}

fn default_shell_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_auto_continues: default_max_auto_continues(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            max_consecutive_compactions: default_max_consecutive_compactions(),
            tool_parallelism: default_tool_parallelism(),
            pre_authorized_commands: Vec::new(),
            pre_authorized_domains: Vec::new(),
            planning_enabled: false,
            shell_timeout_secs: default_shell_timeout(),
        }
    }
}

fn default_auto_save_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path.  Defaults to `$XDG_RUNTIME_DIR/skald/daemon.sock`
    /// (or the state directory when no runtime dir exists).
    pub socket_path: Option<PathBuf>,
    /// Optional localhost TCP listen address (e.g. `127.0.0.1:7521`)
    /// carrying the same framed protocol as the Unix socket.
    pub tcp_listen: Option<String>,
    /// Seconds between auto-save sweeps of dirty sessions.
    #[serde(default = "default_auto_save_secs")]
    pub auto_save_secs: u64,
    /// Root directory for persisted sessions and workspace config.
    /// Defaults to the platform data dir (`~/.local/share/skald`).
    pub state_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            tcp_listen: None,
            auto_save_secs: default_auto_save_secs(),
            state_dir: None,
        }
    }
}

fn default_ttl_hours() -> u64 {
    24
}
fn default_refresh_hours() -> u64 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistConfig {
    /// URL of the RPZ-format blocklist.  Empty disables domain blocking.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Cached copies older than this are refreshed synchronously on start.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// Background refresh interval.
    #[serde(default = "default_refresh_hours")]
    pub refresh_hours: u64,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            ttl_hours: default_ttl_hours(),
            refresh_hours: default_refresh_hours(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_mock_provider() {
        let cfg = Config::default();
        assert_eq!(cfg.model.provider, "mock");
        assert!(cfg.judge_model.is_none());
    }

    #[test]
    fn agent_defaults_match_documented_values() {
        let a = AgentConfig::default();
        assert_eq!(a.max_iterations, 50);
        assert_eq!(a.max_auto_continues, 10);
        assert!((a.compaction_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(a.compaction_keep_recent, 8);
        assert_eq!(a.max_consecutive_compactions, 2);
        assert_eq!(a.tool_parallelism, 4);
    }

    #[test]
    fn empty_yaml_deserializes_with_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.daemon.auto_save_secs, 5);
        assert_eq!(cfg.blocklist.ttl_hours, 24);
        assert_eq!(cfg.blocklist.refresh_hours, 6);
    }

    #[test]
    fn partial_agent_section_keeps_other_defaults() {
        let cfg: Config = serde_yaml::from_str("agent:\n  max_iterations: 7").unwrap();
        assert_eq!(cfg.agent.max_iterations, 7);
        assert_eq!(cfg.agent.max_auto_continues, 10);
    }
}
