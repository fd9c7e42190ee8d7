use std::num::NonZeroUsize;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Sent as `Referer` on every request when set
    #[serde(default)]
    pub referer: Option<String>,

    /// Proxy pool, `None` entries stand for a direct connection
    #[serde(default = "default_proxies")]
    pub proxies: Vec<Option<String>>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: NonZeroUsize,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    /// Body substrings that reveal an anti-bot response
    #[serde(default)]
    pub block_markers: Vec<String>,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Fixed seed for every random draw of a run, entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_on_partial")]
    pub on_partial: OnError,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            accept: default_accept(),
            accept_language: default_accept_language(),
            referer: None,
            proxies: default_proxies(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
            pacing: PacingConfig::default(),
            block_markers: vec![],
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            seed: None,
            on_partial: default_on_partial(),
        }
    }
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36 Edg/91.0.864.59",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
        "Mozilla/5.0 (Linux; Android 10; SM-G981B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_accept() -> String {
    String::from("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8")
}

fn default_accept_language() -> String {
    String::from("zh-CN,zh;q=0.8,en-US;q=0.5,en;q=0.3")
}

fn default_proxies() -> Vec<Option<String>> {
    vec![None]
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> NonZeroUsize {
    NonZeroUsize::new(3).unwrap_or(NonZeroUsize::MIN)
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_on_partial() -> OnError {
    OnError::SkipAndLog
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OnError {
    Fail,
    SkipAndLog,
}

/// An inclusive range of milliseconds to draw a delay from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: Self = Self::fixed(0);

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub const fn fixed(ms: u64) -> Self {
        Self::new(ms, ms)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rng.gen_range(lo..=hi))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base")]
    pub base: DelayRange,

    /// Growth applied per failed attempt
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: default_backoff_base(),
            factor: default_backoff_factor(),
            cap_ms: default_backoff_cap_ms(),
        }
    }
}

fn default_backoff_base() -> DelayRange {
    DelayRange::new(2_000, 5_000)
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    #[serde(default = "default_pacing_delay")]
    pub delay: DelayRange,

    /// Every n-th request waits for an extra `pause`
    #[serde(default = "default_pause_every")]
    pub pause_every: Option<NonZeroUsize>,

    #[serde(default = "default_pause")]
    pub pause: DelayRange,

    /// Cost of simulated browsing added to every request
    #[serde(default)]
    pub behavior: Option<DelayRange>,

    #[serde(default)]
    pub delay_first: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay: default_pacing_delay(),
            pause_every: default_pause_every(),
            pause: default_pause(),
            behavior: None,
            delay_first: false,
        }
    }
}

impl PacingConfig {
    /// No delay at all, mostly useful for tests and local fixtures.
    pub fn none() -> Self {
        Self {
            delay: DelayRange::ZERO,
            pause_every: None,
            pause: DelayRange::ZERO,
            behavior: None,
            delay_first: false,
        }
    }
}

fn default_pacing_delay() -> DelayRange {
    DelayRange::new(1_000, 3_000)
}

fn default_pause_every() -> Option<NonZeroUsize> {
    NonZeroUsize::new(5)
}

fn default_pause() -> DelayRange {
    DelayRange::new(500, 2_000)
}
