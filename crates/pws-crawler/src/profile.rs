use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, DNT, REFERER, USER_AGENT};

use crate::config::CrawlerConfig;
use crate::transport::RequestSpec;

/// Generates a fresh client fingerprint for every attempt.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    user_agents: Vec<String>,
    accept: String,
    accept_language: String,
    referer: Option<String>,
    proxies: Vec<Option<String>>,
    timeout: Duration,
}

impl ClientProfile {
    pub fn new(config: &CrawlerConfig) -> Self {
        Self {
            user_agents: config.user_agents.clone(),
            accept: config.accept.clone(),
            accept_language: config.accept_language.clone(),
            referer: config.referer.clone(),
            proxies: config.proxies.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        if self.referer.is_none() {
            self.referer = referer;
        }
        self
    }

    pub fn request<R: Rng + ?Sized>(&self, url: &str, rng: &mut R) -> RequestSpec {
        let mut spec = RequestSpec::get(url, self.timeout)
            .header(ACCEPT.as_str(), self.accept.as_str())
            .header(ACCEPT_LANGUAGE.as_str(), self.accept_language.as_str())
            .header(DNT.as_str(), rng.gen_range(0..=1).to_string());
        if let Some(ua) = self.user_agents.choose(rng) {
            spec = spec.header(USER_AGENT.as_str(), ua.as_str());
        }
        if let Some(referer) = &self.referer {
            spec = spec.header(REFERER.as_str(), referer.as_str());
        }
        spec.proxy(self.proxies.choose(rng).cloned().flatten())
    }
}
