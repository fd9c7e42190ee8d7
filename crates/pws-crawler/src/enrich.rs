use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cancel::CancelToken;
use crate::extract::{Extracted, ExtractorSchema, Record, Value};
use crate::paginate::PageParser;

/// How many records to enrich.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleSize {
    Exactly(usize),
    Between { min: usize, max: usize },
}

impl SampleSize {
    /// Draws the size, never more than `available`.
    pub fn resolve<R: Rng + ?Sized>(&self, available: usize, rng: &mut R) -> usize {
        let wanted = match *self {
            Self::Exactly(n) => n,
            Self::Between { min, max } => rng.gen_range(min.min(max)..=max.max(min)),
        };
        wanted.min(available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetailFetchError {
    #[error("record has no usable url in field {0:?}")]
    MissingUrl(String),
    #[error("invalid detail url {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("giving up on {url}: {outcome}")]
    Exhausted { url: String, outcome: String },
    #[error("nothing to extract on {0}")]
    NoContent(String),
    #[error("cancelled")]
    Cancelled,
}

/// Fetches the additional fields of one record.
#[async_trait]
pub trait DetailFetcher: Send {
    async fn fetch_detail(&mut self, record: &Record) -> Result<Extracted, DetailFetchError>;
}

/// Where and how to read a record's detail page.
pub struct DetailTarget {
    pub url_field: String,
    pub base: Url,
    /// The first fragment it locates is the one handed to `schema`
    pub parser: Box<dyn PageParser>,
    pub schema: ExtractorSchema,
}

impl DetailTarget {
    pub fn detail_url(&self, record: &Record) -> Result<Url, DetailFetchError> {
        match record.get(&self.url_field) {
            Some(Value::Text(link)) if !link.trim().is_empty() => self
                .base
                .join(link.trim())
                .map_err(|e| DetailFetchError::InvalidUrl(link.clone(), e.to_string())),
            _ => Err(DetailFetchError::MissingUrl(self.url_field.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub sampled: usize,
    pub enriched: usize,
    pub failed: usize,
    /// Detail fields that couldn't be extracted on merged records
    pub fields_failed: usize,
    /// Stopped before every sampled record was visited
    pub cancelled: bool,
}

/// Merges detail fields into `min(sample_size, records.len())` records picked
/// uniformly without replacement. A failed detail leaves its record untouched.
pub async fn enrich<D, R>(
    records: &mut [Record],
    fetcher: &mut D,
    sample_size: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> EnrichStats
where
    D: DetailFetcher + ?Sized,
    R: Rng + Send + ?Sized,
{
    let amount = sample_size.min(records.len());
    let picked = rand::seq::index::sample(rng, records.len(), amount);
    let mut stats = EnrichStats {
        sampled: amount,
        ..Default::default()
    };

    for i in picked.iter() {
        if cancel.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        match fetcher.fetch_detail(&records[i]).await {
            Ok(detail) => {
                records[i].merge(detail.record);
                stats.enriched += 1;
                stats.fields_failed += detail.failed;
            }
            Err(DetailFetchError::Cancelled) => {
                stats.cancelled = true;
                break;
            }
            Err(e) => {
                log::warn!("Skipping detail of record {i}: {e}");
                stats.failed += 1;
            }
        }
    }

    stats
}
