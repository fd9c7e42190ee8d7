mod cancel;
mod config;
mod crawler;
mod enrich;
mod extract;
mod paginate;
mod profile;
mod report;
mod retry;
mod shaper;
mod sink;
mod transport;

pub use cancel::CancelToken;
pub use config::{BackoffConfig, CrawlerConfig, DelayRange, OnError, PacingConfig};
pub use crawler::{Crawler, Session};
pub use enrich::{enrich, DetailFetchError, DetailFetcher, DetailTarget, EnrichStats, SampleSize};
pub use extract::{
    extract, from_fn, Extracted, ExtractorSchema, FieldError, FieldExtractor, FnExtractor,
    Fragment, Integer, LabeledText, Record, Value,
};
pub use paginate::{ContinuationPolicy, Decision, ListingTarget, NextPage, PageParser, PageState};
pub use profile::ClientProfile;
pub use report::{CrawlOutput, CrawlReport, StopReason};
pub use retry::{Backoff, Retried, Retrier, RetryState, Sleeper, TokioSleeper};
pub use shaper::{RateShaper, RequestContext};
pub use sink::{sink_for, CsvSink, JsonSink, Sink};
pub use transport::{
    classify, BlockMarker, FetchOutcome, HttpTransport, Method, RequestSpec, Transport,
    TransportError,
};

pub use anyhow;
pub use async_trait::async_trait;
pub use url::Url;
