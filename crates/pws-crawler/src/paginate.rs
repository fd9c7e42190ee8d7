use std::num::NonZeroUsize;

use rand::Rng;
use url::Url;

use crate::extract::{ExtractorSchema, Fragment};
use crate::report::StopReason;
use crate::transport::Method;

/// What a page says about its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPage {
    Present,
    Absent,
    /// The parser does not look for a next-page affordance.
    Unknown,
}

/// The page-rendering collaborator: locates item fragments and reads the
/// continuation signal.
pub trait PageParser: Send + Sync {
    fn items(&self, body: &str) -> Vec<Fragment>;

    fn next_page(&self, body: &str) -> NextPage;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuationPolicy {
    pub max_pages: Option<NonZeroUsize>,
    /// Only drawn when the page gives no explicit signal
    pub continue_probability: f64,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self {
            max_pages: None,
            continue_probability: 0.7,
        }
    }
}

impl ContinuationPolicy {
    /// Page cap first, then the explicit signal, then a stochastic draw.
    pub fn decide<R: Rng + ?Sized>(&self, page: usize, signal: NextPage, rng: &mut R) -> Decision {
        if let Some(cap) = self.max_pages {
            if page >= cap.get() {
                return Decision::Stop(StopReason::PageCap { page });
            }
        }
        match signal {
            NextPage::Present => Decision::Continue,
            NextPage::Absent => Decision::Stop(StopReason::NoNextPage { page }),
            NextPage::Unknown => {
                let p = self.continue_probability;
                let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
                if rng.gen_bool(p) {
                    Decision::Continue
                } else {
                    Decision::Stop(StopReason::StochasticStop { page })
                }
            }
        }
    }
}

/// Ephemeral, one per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: usize,
    pub decision: Option<Decision>,
}

impl PageState {
    pub fn first() -> Self {
        Self {
            page: 1,
            decision: None,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            decision: None,
        }
    }
}

/// A paginated listing, served at `base.join(path)?page=N`.
pub struct ListingTarget {
    pub name: String,
    pub base: Url,
    pub path: String,
    pub method: Method,
    pub parser: Box<dyn PageParser>,
    pub schema: ExtractorSchema,
    pub policy: ContinuationPolicy,
}

impl ListingTarget {
    pub fn page_url(&self, page: usize) -> Result<Url, url::ParseError> {
        let mut url = self.base.join(&self.path)?;
        let kept = url
            .query_pairs()
            .filter(|(k, _)| k != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect::<Vec<_>>();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("page", &page.to_string());
        Ok(url)
    }
}
