#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pws_crawler::{
    async_trait, CrawlerConfig, FetchOutcome, Fragment, NextPage, PacingConfig, PageParser,
    RequestSpec, Sleeper, Transport, TransportError, BackoffConfig, DelayRange,
};

/// Replays scripted outcomes per URL, 404 once a script runs dry.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    calls: Mutex<Vec<RequestSpec>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<I>(self, url: &str, outcomes: I) -> Self
    where
        I: IntoIterator<Item = FetchOutcome>,
    {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn calls(&self) -> Vec<RequestSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, spec: &RequestSpec) -> FetchOutcome {
        self.calls.lock().unwrap().push(spec.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&spec.url)
            .and_then(|q| q.pop_front())
            .unwrap_or(FetchOutcome::HardError {
                cause: TransportError::Status(404),
            })
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }

    pub fn non_zero(&self) -> usize {
        self.slept().iter().filter(|d| !d.is_zero()).count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Plain-text pages: every `item: ...` line is a fragment, a `next` line is
/// the next-page affordance.
pub struct LinesParser {
    pub reads_signal: bool,
}

impl PageParser for LinesParser {
    fn items(&self, body: &str) -> Vec<Fragment> {
        body.lines()
            .filter_map(|l| l.strip_prefix("item: "))
            .map(Fragment::from_text)
            .collect()
    }

    fn next_page(&self, body: &str) -> NextPage {
        if !self.reads_signal {
            NextPage::Unknown
        } else if body.lines().any(|l| l == "next") {
            NextPage::Present
        } else {
            NextPage::Absent
        }
    }
}

pub fn ok(body: &str) -> FetchOutcome {
    FetchOutcome::Success {
        body: body.to_string(),
        status: 200,
    }
}

pub fn blocked() -> FetchOutcome {
    FetchOutcome::SoftBlocked {
        reason: "body contains marker".into(),
    }
}

pub fn status(code: u16) -> FetchOutcome {
    FetchOutcome::HardError {
        cause: TransportError::Status(code),
    }
}

/// No pacing, fixed 1s backoff, fixed seed.
pub fn config(max_attempts: usize) -> CrawlerConfig {
    CrawlerConfig {
        max_attempts: max_attempts.try_into().unwrap(),
        pacing: PacingConfig::none(),
        backoff: BackoffConfig {
            base: DelayRange::fixed(1_000),
            factor: 1.0,
            cap_ms: 1_000,
        },
        seed: Some(11),
        ..Default::default()
    }
}

pub fn shared<T>(t: T) -> Arc<T> {
    Arc::new(t)
}
