//! Engine configuration: the `jana:*` surface from the design doc, loaded
//! env > file > defaults the way the teacher's config crate loads TOML.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JanaError, JanaResult};

/// Which scheduling engine to run. `Arrow` is the real round-robin
/// topology scheduler; `Debug` runs every arrow on a single thread in
/// wiring order, for deterministic single-step debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Arrow,
    Debug,
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::Arrow
    }
}

/// CPU affinity policy for worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    None,
    Cpu,
    Numa,
}

impl Default for Affinity {
    fn default() -> Self {
        Affinity::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `nthreads`: number of worker threads. 0 means "detect and fill in
    /// at load time" (see [`Config::default`]).
    pub nthreads: usize,
    /// `jana:engine`
    pub engine: EngineKind,
    /// `jana:timeout` in seconds. 0 disables the watchdog.
    pub timeout_secs: u64,
    /// `jana:warmup_timeout` in seconds, applied before the first event
    /// completes on a worker.
    pub warmup_timeout_secs: u64,
    /// `jana:extended_report`
    pub extended_report: bool,
    pub affinity: Affinity,
    /// `RECORD_CALL_STACK`
    pub record_call_stack: bool,
    /// `DEFTAG:<ClassName>` entries, keyed by class name.
    pub default_tags: HashMap<String, String>,
    /// Bounded capacity of each arrow-to-arrow mailbox, in events.
    pub mailbox_capacity: usize,
    /// Bounded capacity of the event pool.
    pub event_pool_size: usize,
    /// Events pulled per source chunk.
    pub chunksize: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nthreads: 0,
            engine: EngineKind::default(),
            timeout_secs: 8,
            warmup_timeout_secs: 30,
            extended_report: false,
            affinity: Affinity::default(),
            record_call_stack: false,
            default_tags: HashMap::new(),
            mailbox_capacity: 64,
            event_pool_size: 16,
            chunksize: 4,
        }
    }
}

impl Config {
    /// Loads from an optional TOML file, then applies `JANA_*` environment
    /// overrides, then validates. Mirrors the env > file > defaults
    /// hierarchy used elsewhere in this codebase's config loading.
    pub fn load(path: Option<&Path>) -> JanaResult<Config> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load_from_file(p)?,
            _ => Config::default(),
        };
        config.resolve_defaults();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> JanaResult<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JanaError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| JanaError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Fills in `nthreads == 0` with the detected core count, the way
    /// `JApplication` defaults to `std::thread::hardware_concurrency()`.
    fn resolve_defaults(&mut self) {
        if self.nthreads == 0 {
            self.nthreads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        }
    }

    fn apply_env_overrides(&mut self) -> JanaResult<()> {
        if let Ok(v) = std::env::var("JANA_NTHREADS") {
            self.nthreads = v.parse().map_err(|_| JanaError::Config(format!("invalid JANA_NTHREADS: {v}")))?;
        }
        if let Ok(v) = std::env::var("JANA_TIMEOUT") {
            self.timeout_secs = v.parse().map_err(|_| JanaError::Config(format!("invalid JANA_TIMEOUT: {v}")))?;
        }
        if let Ok(v) = std::env::var("JANA_WARMUP_TIMEOUT") {
            self.warmup_timeout_secs = v.parse().map_err(|_| JanaError::Config(format!("invalid JANA_WARMUP_TIMEOUT: {v}")))?;
        }
        if let Ok(v) = std::env::var("JANA_EXTENDED_REPORT") {
            self.extended_report = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("JANA_RECORD_CALL_STACK") {
            self.record_call_stack = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("JANA_ENGINE") {
            self.engine = match v.to_ascii_lowercase().as_str() {
                "arrow" => EngineKind::Arrow,
                "debug" => EngineKind::Debug,
                other => return Err(JanaError::Config(format!("invalid JANA_ENGINE: {other}"))),
            };
        }
        // DEFTAG:<ClassName>=tag entries, e.g. JANA_DEFTAG_MyHit=calib
        for (key, value) in std::env::vars() {
            if let Some(class_name) = key.strip_prefix("JANA_DEFTAG_") {
                self.default_tags.insert(class_name.to_string(), value);
            }
        }
        Ok(())
    }

    fn validate(&self) -> JanaResult<()> {
        if self.nthreads == 0 {
            return Err(JanaError::Config("nthreads must be > 0".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(JanaError::Config("mailbox_capacity must be > 0".into()));
        }
        if self.event_pool_size == 0 {
            return Err(JanaError::Config("event_pool_size must be > 0".into()));
        }
        if self.chunksize == 0 || self.chunksize > self.event_pool_size {
            return Err(JanaError::Config(format!(
                "chunksize ({}) must be > 0 and <= event_pool_size ({})",
                self.chunksize, self.event_pool_size
            )));
        }
        Ok(())
    }

    /// Looks up a `DEFTAG:<ClassName>` override, if one is configured.
    pub fn default_tag_for(&self, class_name: &str) -> Option<&str> {
        self.default_tags.get(class_name).map(|s| s.as_str())
    }
}
