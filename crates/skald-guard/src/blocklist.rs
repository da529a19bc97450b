// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! RPZ domain-blocklist actor.
//!
//! Downloads a Response Policy Zone text file, extracts the blocked
//! domains from `*.domain CNAME .` lines, and serves `is_blocked` lookups
//! through an immutable snapshot (domain set + Aho–Corasick suffix
//! matcher).  Snapshot replacement is one pointer swap under a write lock.
//!
//! The extracted list is cached on disk as JSON, keyed by the MD5 of the
//! source URL; the cache file's mtime defines freshness.  On start a fresh
//! cache is installed immediately and refreshed in the background, a stale
//! one forces a synchronous refresh.  A ticker refreshes periodically
//! thereafter.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use aho_corasick::AhoCorasick;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use skald_actor::{Actor, ActorContext, ActorRef, SpawnOptions};
use skald_config::BlocklistConfig;
use skald_tools::DomainPolicy;

/// One immutable parse of the blocklist.
pub struct BlocklistSnapshot {
    domains: HashSet<String>,
    matcher: AhoCorasick,
    pub loaded_at: DateTime<Utc>,
    pub source_url: String,
}

impl BlocklistSnapshot {
    pub fn build(
        domains: impl IntoIterator<Item = String>,
        source_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let domains: HashSet<String> = domains.into_iter().collect();
        // Patterns carry a leading dot so `.sub.example.com` can only match
        // `.example.com` at a label boundary, never inside a label.
        let patterns: Vec<String> = domains.iter().map(|d| format!(".{d}")).collect();
        let matcher = AhoCorasick::new(&patterns).context("building blocklist matcher")?;
        Ok(Self {
            domains,
            matcher,
            loaded_at: Utc::now(),
            source_url: source_url.into(),
        })
    }

    /// True when `domain` or any parent suffix of it is blocked.
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        if self.domains.contains(&domain) {
            return true;
        }
        let probe = format!(".{domain}");
        self.matcher
            .find_iter(&probe)
            .any(|m| m.end() == probe.len())
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Parse RPZ text into the blocked-domain set.
///
/// Recognized lines have the form `*.example.com CNAME .` (or the bare
/// `example.com CNAME .`); everything else — comments, SOA/NS records,
/// directives — is skipped.  The result is a sorted set, so identical
/// inputs in any line order produce identical lists.
pub fn parse_rpz(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(rtype), Some(target)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !rtype.eq_ignore_ascii_case("CNAME") || target != "." {
            continue;
        }
        let domain = name
            .strip_prefix("*.")
            .unwrap_or(name)
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if !domain.is_empty() {
            out.insert(domain);
        }
    }
    out
}

/// Shared read endpoint; implements the tools-facing [`DomainPolicy`].
#[derive(Clone, Default)]
pub struct BlocklistHandle {
    snapshot: Arc<RwLock<Option<Arc<BlocklistSnapshot>>>>,
}

impl BlocklistHandle {
    pub fn snapshot(&self) -> Option<Arc<BlocklistSnapshot>> {
        self.snapshot.read().unwrap().clone()
    }

    fn install(&self, snapshot: BlocklistSnapshot) {
        *self.snapshot.write().unwrap() = Some(Arc::new(snapshot));
    }
}

impl DomainPolicy for BlocklistHandle {
    fn is_blocked(&self, domain: &str) -> bool {
        match self.snapshot.read().unwrap().as_ref() {
            Some(snap) => snap.is_blocked(domain),
            None => false,
        }
    }
}

#[derive(Debug)]
pub enum BlocklistMsg {
    Refresh,
}

pub struct DomainBlockerActor {
    config: BlocklistConfig,
    cache_dir: PathBuf,
    client: reqwest::Client,
    handle: BlocklistHandle,
    ticker: Option<tokio::task::JoinHandle<()>>,
}

impl DomainBlockerActor {
    pub fn new(config: BlocklistConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            cache_dir: cache_dir.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            handle: BlocklistHandle::default(),
            ticker: None,
        }
    }

    pub fn handle(&self) -> BlocklistHandle {
        self.handle.clone()
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{:x}.cache", md5::compute(url.as_bytes())))
    }

    fn load_cache(&self, url: &str) -> Option<(Vec<String>, Duration)> {
        let path = self.cache_path(url);
        let meta = std::fs::metadata(&path).ok()?;
        let age = meta.modified().ok()?.elapsed().ok()?;
        let text = std::fs::read_to_string(&path).ok()?;
        let domains: Vec<String> = serde_json::from_str(&text).ok()?;
        Some((domains, age))
    }

    fn save_cache(&self, url: &str, domains: &BTreeSet<String>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("creating {}", self.cache_dir.display()))?;
        let path = self.cache_path(url);
        let tmp = path.with_extension("cache.tmp");
        std::fs::write(&tmp, serde_json::to_string(domains)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    async fn refresh(&self, url: &str) -> anyhow::Result<()> {
        debug!(url, "refreshing blocklist");
        let text = self
            .client
            .get(url)
            .send()
            .await
            .context("fetching blocklist")?
            .error_for_status()
            .context("blocklist server error")?
            .text()
            .await
            .context("reading blocklist body")?;
        let domains = parse_rpz(&text);
        if domains.is_empty() {
            anyhow::bail!("blocklist parsed to zero domains; keeping previous snapshot");
        }
        if let Err(e) = self.save_cache(url, &domains) {
            warn!("caching blocklist failed: {e}");
        }
        let count = domains.len();
        self.handle
            .install(BlocklistSnapshot::build(domains.into_iter().collect::<Vec<_>>(), url)?);
        info!(domains = count, "blocklist refreshed");
        Ok(())
    }
}

#[async_trait]
impl Actor for DomainBlockerActor {
    type Msg = BlocklistMsg;

    async fn start(&mut self, ctx: &ActorContext<BlocklistMsg>) -> anyhow::Result<()> {
        let Some(url) = self.config.source_url.clone() else {
            debug!("no blocklist source configured; domain blocking disabled");
            return Ok(());
        };

        let ttl = Duration::from_secs(self.config.ttl_hours * 3600);
        match self.load_cache(&url) {
            Some((domains, age)) if age <= ttl => {
                info!(domains = domains.len(), "blocklist loaded from fresh cache");
                self.handle.install(BlocklistSnapshot::build(domains, &url)?);
                // Refresh in the background; lookups already work.
                let _ = ctx.self_ref().send(BlocklistMsg::Refresh);
            }
            stale => {
                if let Err(e) = self.refresh(&url).await {
                    // Offline start: a stale cache beats an empty list.
                    if let Some((domains, _)) = stale {
                        warn!("blocklist refresh failed ({e}); using stale cache");
                        self.handle.install(BlocklistSnapshot::build(domains, &url)?);
                    } else {
                        warn!("blocklist refresh failed and no cache exists: {e}");
                    }
                }
            }
        }

        let me = ctx.self_ref();
        let every = Duration::from_secs(self.config.refresh_hours.max(1) * 3600);
        self.ticker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if me.send(BlocklistMsg::Refresh).is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn receive(
        &mut self,
        _ctx: &ActorContext<BlocklistMsg>,
        msg: BlocklistMsg,
    ) -> anyhow::Result<()> {
        match msg {
            BlocklistMsg::Refresh => {
                if let Some(url) = self.config.source_url.clone() {
                    self.refresh(&url).await?;
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ActorContext<BlocklistMsg>) -> anyhow::Result<()> {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }
}

/// Spawn the blocker; the returned handle serves lookups, the ref drives
/// refreshes and shutdown.
pub fn spawn_domain_blocker(
    config: BlocklistConfig,
    cache_dir: impl Into<PathBuf>,
) -> (BlocklistHandle, ActorRef<BlocklistMsg>) {
    let actor = DomainBlockerActor::new(config, cache_dir);
    let handle = actor.handle();
    let actor = skald_actor::spawn("domain-blocker", actor, 8, SpawnOptions::default());
    (handle, actor)
}

/// Write a pre-parsed domain list into the cache location for `url`, as the
/// daemon does when seeding an offline environment.
pub fn seed_cache(cache_dir: &Path, url: &str, domains: &BTreeSet<String>) -> anyhow::Result<()> {
    let actor = DomainBlockerActor::new(BlocklistConfig::default(), cache_dir);
    actor.save_cache(url, domains)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
