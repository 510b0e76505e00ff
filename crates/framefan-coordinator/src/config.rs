//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::plan::PlanLimits;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Smallest chunk allowed, unless the whole render is smaller
    pub min_frames_per_chunk: u32,
    /// Upper bound on chunks per render (platform concurrency limit)
    pub max_chunks: u32,
    /// Retries allowed per chunk for flaky failures
    pub max_retries: u32,
    /// Chunk attempts in flight at once per render
    pub max_parallel: usize,
    /// Per-attempt invocation timeout
    pub chunk_timeout: Duration,
    /// How long to wait for a late timing record after a crash
    pub crash_grace: Duration,
    /// Default status polling interval
    pub poll_interval: Duration,
    /// Extra flaky-error rules, JSON
    pub flaky_rules_file: Option<PathBuf>,
    /// Whole-render deadline, dispatch through finalization
    pub render_timeout: Duration,
    /// URL of the HTTP chunk worker
    pub worker_url: Option<String>,
    /// URL of the HTTP stitcher; `{worker_url}/stitch` when unset
    pub stitcher_url: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_frames_per_chunk: 4,
            max_chunks: 200,
            max_retries: 1,
            max_parallel: 200,
            chunk_timeout: Duration::from_secs(120),
            crash_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1000),
            flaky_rules_file: None,
            render_timeout: Duration::from_secs(900),
            worker_url: None,
            stitcher_url: None,
        }
    }
}

impl CoordinatorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_frames_per_chunk: env_parse("FRAMEFAN_MIN_FRAMES_PER_CHUNK")
                .unwrap_or(defaults.min_frames_per_chunk),
            max_chunks: env_parse("FRAMEFAN_MAX_CHUNKS").unwrap_or(defaults.max_chunks),
            max_retries: env_parse("FRAMEFAN_MAX_RETRIES").unwrap_or(defaults.max_retries),
            max_parallel: env_parse("FRAMEFAN_MAX_PARALLEL").unwrap_or(defaults.max_parallel),
            chunk_timeout: env_parse("FRAMEFAN_CHUNK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.chunk_timeout),
            crash_grace: env_parse("FRAMEFAN_CRASH_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.crash_grace),
            poll_interval: env_parse("FRAMEFAN_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            flaky_rules_file: std::env::var("FRAMEFAN_FLAKY_RULES_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            render_timeout: env_parse("FRAMEFAN_RENDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.render_timeout),
            worker_url: std::env::var("FRAMEFAN_WORKER_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            stitcher_url: std::env::var("FRAMEFAN_STITCHER_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    /// The stitcher endpoint, falling back to the worker's `/stitch` route.
    pub fn stitcher_endpoint(&self) -> Option<String> {
        self.stitcher_url.clone().or_else(|| {
            self.worker_url
                .as_ref()
                .map(|url| format!("{}/stitch", url.trim_end_matches('/')))
        })
    }

    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits {
            min_frames_per_chunk: self.min_frames_per_chunk,
            max_chunks: self.max_chunks,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
