use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cancel::CancelToken;
use crate::config::CrawlerConfig;
use crate::enrich::{enrich, DetailFetchError, DetailFetcher, DetailTarget, EnrichStats, SampleSize};
use crate::extract::{Extracted, Record};
use crate::paginate::{Decision, ListingTarget, NextPage, PageState};
use crate::profile::ClientProfile;
use crate::report::{CrawlOutput, CrawlReport, StopReason};
use crate::retry::{Backoff, Retried, Retrier, Sleeper, TokioSleeper};
use crate::shaper::{RateShaper, RequestContext};
use crate::transport::{FetchOutcome, HttpTransport, Method, Transport, TransportError};

/// Per-run state: the random source and the count of requests issued.
#[derive(Debug)]
pub struct Session {
    rng: StdRng,
    requests: usize,
}

impl Session {
    fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, requests: 0 }
    }
}

enum Phase {
    Fetching,
    Extracting(String),
    Deciding(NextPage),
    Done(StopReason),
}

/// Shared by every run; runs don't share any mutable state.
pub struct Crawler {
    config: CrawlerConfig,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    profile: ClientProfile,
    shaper: RateShaper,
    backoff: Backoff,
}

impl Crawler {
    pub fn new(config: CrawlerConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(TokioSleeper),
        ))
    }

    pub fn with_transport(
        config: CrawlerConfig,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let profile = ClientProfile::new(&config);
        let shaper = RateShaper::new(config.pacing);
        let backoff = Backoff::from(&config.backoff);
        Self {
            config,
            transport,
            sleeper,
            profile,
            shaper,
            backoff,
        }
    }

    /// Sets the `Referer` sent when the config doesn't pin one.
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.profile = self.profile.with_referer(Some(referer.into()));
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        Session::new(self.config.seed)
    }

    /// One logical GET: pacing delay, then bounded retries.
    pub async fn fetch(&self, session: &mut Session, url: &str, cancel: &CancelToken) -> Retried {
        self.fetch_as(session, Method::Get, url, cancel).await
    }

    pub async fn fetch_as(
        &self,
        session: &mut Session,
        method: Method,
        url: &str,
        cancel: &CancelToken,
    ) -> Retried {
        let ctx = RequestContext {
            sequence: session.requests,
        };
        session.requests += 1;

        let delay = self.shaper.delay_before_request(&ctx, &mut session.rng);
        self.sleeper.sleep(delay).await;

        let retrier = Retrier::new(
            self.transport.as_ref(),
            self.sleeper.as_ref(),
            self.config.max_attempts,
            self.backoff,
        );
        let profile = &self.profile;
        retrier
            .fetch_with_retry(
                |_, rng: &mut StdRng| profile.request(url, rng).method(method),
                &mut session.rng,
                cancel,
            )
            .await
    }

    /// Opens the session the way a browser would, failures are only logged.
    pub async fn warmup(&self, session: &mut Session, url: &str, cancel: &CancelToken) -> bool {
        let retried = self.fetch(session, url, cancel).await;
        match retried.outcome {
            FetchOutcome::Success { .. } => true,
            outcome => {
                log::warn!("Warmup of {url} failed: {outcome}");
                false
            }
        }
    }

    pub async fn crawl_listing(&self, target: &ListingTarget, cancel: &CancelToken) -> CrawlOutput {
        let mut session = self.session();
        self.crawl_with(&mut session, target, cancel).await
    }

    /// Walks pages from 1 until the policy, a failed page or `cancel` stops it.
    /// Records collected so far are always returned.
    pub async fn crawl_with(
        &self,
        session: &mut Session,
        target: &ListingTarget,
        cancel: &CancelToken,
    ) -> CrawlOutput {
        let mut records = vec![];
        let mut report = CrawlReport::new(&target.name);
        let mut state = PageState::first();
        let mut phase = Phase::Fetching;

        let stop = loop {
            phase = match phase {
                Phase::Fetching if cancel.is_cancelled() => {
                    Phase::Done(StopReason::Cancelled { page: state.page })
                }
                Phase::Fetching => {
                    let url = match target.page_url(state.page) {
                        Ok(url) => url,
                        Err(e) => {
                            log::error!("Couldn't build url of {} page {}: {e}", target.name, state.page);
                            break StopReason::InvalidUrl { page: state.page };
                        }
                    };
                    log::debug!("Crawling {url}");

                    let retried = self
                        .fetch_as(session, target.method, url.as_str(), cancel)
                        .await;
                    report.attempts += retried.attempts;
                    report.soft_blocks += retried.soft_blocks;
                    let soft_blocked = retried.always_soft_blocked();
                    match retried.outcome {
                        FetchOutcome::Success { body, .. } => {
                            report.pages_fetched += 1;
                            Phase::Extracting(body)
                        }
                        FetchOutcome::HardError {
                            cause: TransportError::Cancelled,
                        } => Phase::Done(StopReason::Cancelled { page: state.page }),
                        outcome => {
                            log::warn!("Giving up on {url}: {outcome}");
                            report.pages_failed += 1;
                            Phase::Done(StopReason::FetchFailed {
                                page: state.page,
                                soft_blocked,
                            })
                        }
                    }
                }
                Phase::Extracting(body) => {
                    let fragments = target.parser.items(&body);
                    log::debug!(
                        "Found {} items on {} page {}",
                        fragments.len(),
                        target.name,
                        state.page
                    );
                    for fragment in &fragments {
                        let extracted = target.schema.apply(fragment);
                        report.fields_failed += extracted.failed;
                        records.push(extracted.record);
                    }
                    report.items += fragments.len();
                    Phase::Deciding(target.parser.next_page(&body))
                }
                Phase::Deciding(signal) => {
                    let decision = target.policy.decide(state.page, signal, &mut session.rng);
                    state.decision = Some(decision);
                    match decision {
                        Decision::Continue => {
                            state = state.next();
                            Phase::Fetching
                        }
                        Decision::Stop(reason) => Phase::Done(reason),
                    }
                }
                Phase::Done(reason) => break reason,
            };
        };

        report.stop = Some(stop);
        log::info!("Crawled {}: {report}", target.name);
        CrawlOutput { records, report }
    }

    pub async fn enrich_listing(
        &self,
        records: &mut [Record],
        target: &DetailTarget,
        sample: SampleSize,
        cancel: &CancelToken,
    ) -> EnrichStats {
        let mut session = self.session();
        self.enrich_with(&mut session, records, target, sample, cancel)
            .await
    }

    pub async fn enrich_with(
        &self,
        session: &mut Session,
        records: &mut [Record],
        target: &DetailTarget,
        sample: SampleSize,
        cancel: &CancelToken,
    ) -> EnrichStats {
        let amount = sample.resolve(records.len(), &mut session.rng);
        let mut rng = StdRng::from_rng(&mut session.rng).unwrap_or_else(|_| StdRng::from_entropy());
        let mut details = HttpDetails {
            crawler: self,
            session,
            target,
            cancel,
        };
        enrich(records, &mut details, amount, &mut rng, cancel).await
    }

    /// Crawls the listing then enriches a sample of it, in one session.
    pub async fn run(
        &self,
        target: &ListingTarget,
        detail: Option<(&DetailTarget, SampleSize)>,
        cancel: &CancelToken,
    ) -> CrawlOutput {
        let mut session = self.session();
        let mut output = self.crawl_with(&mut session, target, cancel).await;
        if let Some((detail, sample)) = detail {
            let stats = self
                .enrich_with(&mut session, &mut output.records, detail, sample, cancel)
                .await;
            output.report.details_enriched = stats.enriched;
            output.report.details_failed = stats.failed;
            output.report.details_cancelled = stats.cancelled;
            output.report.fields_failed += stats.fields_failed;
            log::info!(
                "Enriched {}: {}/{} sampled records",
                target.name,
                stats.enriched,
                stats.sampled
            );
        }
        output
    }
}

struct HttpDetails<'a> {
    crawler: &'a Crawler,
    session: &'a mut Session,
    target: &'a DetailTarget,
    cancel: &'a CancelToken,
}

#[async_trait]
impl DetailFetcher for HttpDetails<'_> {
    async fn fetch_detail(&mut self, record: &Record) -> Result<Extracted, DetailFetchError> {
        let url = self.target.detail_url(record)?;
        let retried = self
            .crawler
            .fetch(self.session, url.as_str(), self.cancel)
            .await;
        match retried.outcome {
            FetchOutcome::Success { body, .. } => {
                let fragment = self
                    .target
                    .parser
                    .items(&body)
                    .into_iter()
                    .next()
                    .ok_or_else(|| DetailFetchError::NoContent(url.to_string()))?;
                Ok(self.target.schema.apply(&fragment))
            }
            FetchOutcome::HardError {
                cause: TransportError::Cancelled,
            } => Err(DetailFetchError::Cancelled),
            outcome => Err(DetailFetchError::Exhausted {
                url: url.to_string(),
                outcome: outcome.to_string(),
            }),
        }
    }
}
