use std::fmt;

use crate::config::OnError;
use crate::extract::Record;

/// Why a pagination run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageCap { page: usize },
    NoNextPage { page: usize },
    StochasticStop { page: usize },
    /// Retries exhausted for `page`
    FetchFailed { page: usize, soft_blocked: bool },
    InvalidUrl { page: usize },
    Cancelled { page: usize },
}

impl StopReason {
    /// Whether the run reached the end its continuation policy chose.
    pub fn is_natural(&self) -> bool {
        matches!(
            self,
            Self::PageCap { .. } | Self::NoNextPage { .. } | Self::StochasticStop { .. }
        )
    }

    pub fn page(&self) -> usize {
        match *self {
            Self::PageCap { page }
            | Self::NoNextPage { page }
            | Self::StochasticStop { page }
            | Self::FetchFailed { page, .. }
            | Self::InvalidUrl { page }
            | Self::Cancelled { page } => page,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageCap { page } => write!(f, "page cap reached at page {page}"),
            Self::NoNextPage { page } => write!(f, "no next page after page {page}"),
            Self::StochasticStop { page } => write!(f, "stopped early after page {page}"),
            Self::FetchFailed {
                page,
                soft_blocked: true,
            } => write!(f, "page {page} soft-blocked on every attempt"),
            Self::FetchFailed { page, .. } => write!(f, "page {page} failed after all attempts"),
            Self::InvalidUrl { page } => write!(f, "couldn't build url for page {page}"),
            Self::Cancelled { page } => write!(f, "cancelled before page {page} was done"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub listing: String,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub items: usize,
    pub fields_failed: usize,
    pub attempts: usize,
    pub soft_blocks: usize,
    pub details_enriched: usize,
    pub details_failed: usize,
    /// Enrichment was interrupted before the whole sample was visited
    pub details_cancelled: bool,
    pub stop: Option<StopReason>,
}

impl CrawlReport {
    pub fn new(listing: impl Into<String>) -> Self {
        Self {
            listing: listing.into(),
            ..Default::default()
        }
    }

    /// Complete means every page the policy asked for was fetched and every
    /// sampled detail was merged. Failed fields don't count, they are
    /// reported on their own.
    pub fn is_complete(&self) -> bool {
        self.stop.map(|s| s.is_natural()).unwrap_or(false)
            && self.details_failed == 0
            && !self.details_cancelled
    }

    pub fn ensure(&self, on_partial: OnError) -> anyhow::Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        match on_partial {
            OnError::SkipAndLog => {
                log::warn!("Partial results for {}: {self}", self.listing);
                Ok(())
            }
            OnError::Fail => Err(anyhow::anyhow!("Partial results for {}: {self}", self.listing)),
        }
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items from {} pages ({} failed), {} failed fields, {} attempts, {} soft blocks, \
             {} details enriched ({} failed)",
            self.items,
            self.pages_fetched,
            self.pages_failed,
            self.fields_failed,
            self.attempts,
            self.soft_blocks,
            self.details_enriched,
            self.details_failed
        )?;
        if self.details_cancelled {
            write!(f, ", enrichment cancelled")?;
        }
        if let Some(stop) = self.stop {
            write!(f, ", {stop}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutput {
    pub records: Vec<Record>,
    pub report: CrawlReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_when_page_failed_or_detail_failed() {
        let mut report = CrawlReport::new("news");
        assert!(!report.is_complete());

        report.stop = Some(StopReason::NoNextPage { page: 3 });
        assert!(report.is_complete());
        assert!(report.ensure(OnError::Fail).is_ok());

        report.details_failed = 1;
        assert!(!report.is_complete());
        assert!(report.ensure(OnError::SkipAndLog).is_ok());
        assert!(report.ensure(OnError::Fail).is_err());

        report.details_failed = 0;
        report.details_cancelled = true;
        assert!(!report.is_complete());
        assert!(report.ensure(OnError::Fail).is_err());

        report.details_cancelled = false;
        report.stop = Some(StopReason::FetchFailed {
            page: 2,
            soft_blocked: true,
        });
        assert!(!report.is_complete());
    }
}
