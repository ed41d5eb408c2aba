//! ConfigMap convergence management.
//!
//! Prevents restart storms from regenerated configuration that differs only
//! in non-semantic content. Three layers:
//!
//! 1. **Normalization**: volatile substrings (pod ordinals in hostnames,
//!    timestamps, `$(POD_NAME)` substitutions) collapse to stable
//!    placeholders, and key=value lines are canonicalized (sorted,
//!    duplicate keys last-wins, comments dropped).
//! 2. **Change detection**: a SHA-256 hash of the normalized text; an
//!    unchanged hash skips the write even when the literal text differs.
//! 3. **Debounce**: a changed hash still waits out a minimum interval since
//!    the last applied write for the same cluster. The first write for a
//!    new cluster is never debounced.
//!
//! Each applied change is classified: memory or cluster settings require a
//! rolling restart, log-level style settings update the ConfigMap and
//! leave running pods alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

use jiff::Timestamp;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Default minimum interval between applied ConfigMap writes per cluster.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_secs(180);

fn timestamp_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?")
            .expect("static pattern")
    })
}

fn pod_ordinal_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Hostname-embedded StatefulSet ordinals: "graph-server-3." -> "graph-server-N."
    RE.get_or_init(|| Regex::new(r"([a-z0-9][a-z0-9-]*)-\d+(\.)").expect("static pattern"))
}

/// Canonicalize configuration text into a sorted key=value map.
///
/// Comments and blank lines are dropped; duplicate keys keep the last
/// occurrence.
pub fn canonicalize(text: &str) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            settings.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    settings
}

/// Normalize configuration text for hashing.
pub fn normalize(text: &str) -> String {
    let settings = canonicalize(text);
    let mut out = String::new();
    for (key, value) in &settings {
        let value = timestamp_pattern().replace_all(value, "<timestamp>");
        let value = pod_ordinal_pattern().replace_all(&value, "${1}-N${2}");
        let value = value.replace("$(POD_NAME)", "<pod>");
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// SHA-256 hex digest of the normalized text.
pub fn content_hash(text: &str) -> String {
    let normalized = normalize(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Whether a changed setting requires restarting servers to take effect.
pub fn requires_restart(key: &str) -> bool {
    const RESTART_PREFIXES: &[&str] = &[
        "server.memory.",
        "server.jvm.",
        "server.cluster.",
        "server.bolt.",
        "server.http.",
        "server.https.",
        "server.default_advertised_address",
        "server.directories.",
        "dbms.cluster.",
        "dbms.ssl.",
        "initial.",
    ];
    RESTART_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Delta between two canonicalized configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    /// Keys whose values changed, were added, or were removed.
    pub changed_keys: Vec<String>,
    /// True when at least one changed key needs a rolling restart.
    pub restart_required: bool,
}

/// Diff two configuration texts at the canonical key level.
pub fn diff(previous: &str, current: &str) -> ConfigDelta {
    let old = canonicalize(previous);
    let new = canonicalize(current);

    let mut changed_keys = Vec::new();
    for (key, value) in &new {
        if old.get(key) != Some(value) {
            changed_keys.push(key.clone());
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changed_keys.push(key.clone());
        }
    }
    changed_keys.sort();
    changed_keys.dedup();

    let restart_required = changed_keys.iter().any(|k| requires_restart(k));
    ConfigDelta {
        changed_keys,
        restart_required,
    }
}

/// Decision for a proposed ConfigMap write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDecision {
    /// Write it: content changed (or first write) and the debounce window
    /// has passed. Carries the restart classification.
    Apply {
        hash: String,
        restart_required: bool,
    },
    /// Normalized content is unchanged; skip the write entirely.
    Unchanged,
    /// Content changed but the minimum interval has not elapsed; retry on a
    /// later reconciliation.
    Debounced { retry_after: Duration },
}

struct DebounceEntry {
    last_hash: String,
    last_text: String,
    last_applied: Timestamp,
}

/// Per-cluster ConfigMap write debouncing.
pub struct ConfigDebouncer {
    entries: Mutex<HashMap<String, DebounceEntry>>,
    min_interval: Duration,
}

impl Default for ConfigDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_INTERVAL)
    }
}

impl ConfigDebouncer {
    /// Create a debouncer with a custom minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    /// Decide whether the proposed config text should be written now.
    ///
    /// `key` identifies the cluster ("namespace/name").
    pub async fn decide(&self, key: &str, text: &str) -> ConfigDecision {
        self.decide_at(key, text, Timestamp::now()).await
    }

    /// Clock-injected variant, also used directly by tests.
    pub async fn decide_at(&self, key: &str, text: &str, now: Timestamp) -> ConfigDecision {
        let hash = content_hash(text);
        let entries = self.entries.lock().await;

        match entries.get(key) {
            None => ConfigDecision::Apply {
                hash,
                restart_required: false,
            },
            Some(entry) if entry.last_hash == hash => ConfigDecision::Unchanged,
            Some(entry) => {
                let elapsed = now.as_second() - entry.last_applied.as_second();
                let min = self.min_interval.as_secs() as i64;
                if elapsed < min {
                    ConfigDecision::Debounced {
                        retry_after: Duration::from_secs((min - elapsed).max(1) as u64),
                    }
                } else {
                    let delta = diff(&entry.last_text, text);
                    ConfigDecision::Apply {
                        hash,
                        restart_required: delta.restart_required,
                    }
                }
            }
        }
    }

    /// Record a successful write.
    pub async fn mark_applied(&self, key: &str, text: &str) {
        self.mark_applied_at(key, text, Timestamp::now()).await
    }

    /// Clock-injected variant of [`Self::mark_applied`].
    pub async fn mark_applied_at(&self, key: &str, text: &str, now: Timestamp) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            DebounceEntry {
                last_hash: content_hash(text),
                last_text: text.to_string(),
                last_applied: now,
            },
        );
    }

    /// Drop bookkeeping for a deleted cluster.
    pub async fn forget(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}
