use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Context;
use pws_crawler::{
    ContinuationPolicy, CrawlerConfig, DetailTarget, ExtractorSchema, FieldExtractor, Integer,
    LabeledText, ListingTarget, Method, SampleSize, Url,
};
use serde::{Deserialize, Serialize};

use crate::html::{Attr, Formatted, HtmlParser, NextLink, Text};

/// A site to crawl, usually read from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    pub base_url: String,

    /// Fetched once before any listing
    #[serde(default)]
    pub warmup: Option<String>,

    #[serde(default)]
    pub crawler: Option<CrawlerConfig>,

    pub listings: Vec<ListingSpec>,
}

impl TargetSpec {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read target {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("Invalid target {}", path.display()))
    }

    pub fn base(&self) -> anyhow::Result<Url> {
        Url::parse(&self.base_url).with_context(|| format!("Invalid baseUrl {:?}", self.base_url))
    }

    pub fn warmup_url(&self) -> anyhow::Result<Option<Url>> {
        match &self.warmup {
            Some(path) => Ok(Some(self.base()?.join(path)?)),
            None => Ok(None),
        }
    }

    pub fn listing(&self, name: &str) -> anyhow::Result<&ListingSpec> {
        self.listings
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| anyhow::anyhow!("No listing named {name:?}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSpec {
    pub name: String,
    pub path: String,
    /// Selector of one item on a listing page
    pub item: String,

    #[serde(default)]
    pub method: Method,

    #[serde(default)]
    pub next: Option<NextSpec>,

    #[serde(default)]
    pub max_pages: Option<NonZeroUsize>,

    #[serde(default = "default_continue_probability")]
    pub continue_probability: f64,

    pub fields: Vec<FieldSpec>,

    /// Defaults to `<name>.json`
    #[serde(default)]
    pub output: Option<PathBuf>,

    #[serde(default)]
    pub detail: Option<DetailSpec>,
}

fn default_continue_probability() -> f64 {
    ContinuationPolicy::default().continue_probability
}

impl ListingSpec {
    pub fn parser(&self) -> anyhow::Result<HtmlParser> {
        let parser = HtmlParser::new(&self.item)?;
        Ok(match &self.next {
            Some(next) => parser.with_next(NextLink::new(&next.selector, next.text.clone())?),
            None => parser,
        })
    }

    pub fn build(&self, base: &Url) -> anyhow::Result<ListingTarget> {
        Ok(ListingTarget {
            name: self.name.clone(),
            base: base.clone(),
            path: self.path.clone(),
            method: self.method,
            parser: Box::new(self.parser()?),
            schema: schema(&self.fields, base)
                .with_context(|| format!("Invalid fields of listing {}", self.name))?,
            policy: ContinuationPolicy {
                max_pages: self.max_pages,
                continue_probability: self.continue_probability,
            },
        })
    }

    pub fn output_path(&self, dir: &Path) -> PathBuf {
        match &self.output {
            Some(output) => dir.join(output),
            None => dir.join(format!("{}.json", self.name)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextSpec {
    pub selector: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailSpec {
    /// Record field holding the detail link
    pub url_field: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    pub fields: Vec<FieldSpec>,

    #[serde(default = "default_sample")]
    pub sample: SampleSize,
}

fn default_scope() -> String {
    "body".into()
}

fn default_sample() -> SampleSize {
    SampleSize::Between { min: 3, max: 5 }
}

impl DetailSpec {
    pub fn build(&self, base: &Url) -> anyhow::Result<DetailTarget> {
        Ok(DetailTarget {
            url_field: self.url_field.clone(),
            base: base.clone(),
            parser: Box::new(HtmlParser::new(&self.scope)?),
            schema: schema(&self.fields, base).context("Invalid detail fields")?,
        })
    }
}

/// One declared field. Exactly one of `text`, `attr`, `label` or `fields`
/// describes where the value comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    /// Selector whose text is the value, `""` for the whole item
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub attr: Option<AttrSpec>,

    /// Label preceding the value in the item text
    #[serde(default)]
    pub label: Option<String>,

    #[serde(default = "default_until")]
    pub until: String,

    /// Nested group
    #[serde(default)]
    pub fields: Option<Vec<FieldSpec>>,

    /// Template the value is substituted into, at `{}`
    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub integer: bool,
}

fn default_until() -> String {
    "|".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrSpec {
    pub selector: String,
    pub name: String,
    /// Resolve the value against the target base url
    #[serde(default)]
    pub absolute: bool,
}

impl FieldSpec {
    pub fn extractor(&self, base: &Url) -> anyhow::Result<Box<dyn FieldExtractor>> {
        let extractor: Box<dyn FieldExtractor> =
            match (&self.text, &self.attr, &self.label, &self.fields) {
                (Some(css), None, None, None) if css.is_empty() => Box::new(Text::whole()),
                (Some(css), None, None, None) => Box::new(Text::new(css)?),
                (None, Some(attr), None, None) => {
                    let extractor = Attr::new(&attr.selector, attr.name.as_str())?;
                    if attr.absolute {
                        Box::new(extractor.resolved_against(base.clone()))
                    } else {
                        Box::new(extractor)
                    }
                }
                (None, None, Some(label), None) => {
                    Box::new(LabeledText::new(label.as_str(), self.until.as_str()))
                }
                (None, None, None, Some(fields)) => Box::new(schema(fields, base)?),
                _ => anyhow::bail!(
                    "Field {:?} needs exactly one of text, attr, label or fields",
                    self.name
                ),
            };
        let extractor: Box<dyn FieldExtractor> = match &self.format {
            Some(template) => Box::new(Formatted::new(template.as_str(), extractor)),
            None => extractor,
        };
        Ok(if self.integer {
            Box::new(Integer(extractor))
        } else {
            extractor
        })
    }
}

pub(crate) fn schema(fields: &[FieldSpec], base: &Url) -> anyhow::Result<ExtractorSchema> {
    let mut schema = ExtractorSchema::new();
    for field in fields {
        let extractor = field
            .extractor(base)
            .with_context(|| format!("Invalid field {:?}", field.name))?;
        if schema.names().any(|n| n == field.name) {
            log::warn!("Field {:?} declared twice, keeping the last one", field.name);
        }
        schema.push(field.name.as_str(), extractor);
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_listing_gets_defaults() {
        let target = TargetSpec::from_yaml(
            r#"
baseUrl: http://127.0.0.1:5000
listings:
  - name: news
    path: /news
    item: .news-item
    fields:
      - name: title
        text: h3
"#,
        )
        .unwrap();

        let news = target.listing("news").unwrap();
        assert_eq!(news.continue_probability, 0.7);
        assert_eq!(news.method, Method::Get);
        assert!(news.max_pages.is_none());
        assert_eq!(news.output_path(Path::new("out")), Path::new("out/news.json"));
        assert!(target.warmup_url().unwrap().is_none());
        assert!(target.listing("users").is_err());
    }

    #[test]
    fn listing_method_from_yaml() {
        let listing: ListingSpec = serde_yaml::from_str(
            r#"
name: search
path: /search
item: .result
method: POST
fields: []
"#,
        )
        .unwrap();
        assert_eq!(listing.method, Method::Post);
    }

    #[test]
    fn field_needs_exactly_one_source() {
        let base = Url::parse("http://127.0.0.1:5000").unwrap();
        let field = FieldSpec {
            name: "price".into(),
            text: Some("p".into()),
            label: Some("价格:".into()),
            ..Default::default()
        };
        assert!(field.extractor(&base).is_err());

        let field = FieldSpec {
            name: "price".into(),
            ..Default::default()
        };
        assert!(field.extractor(&base).is_err());
    }

    #[test]
    fn detail_defaults() {
        let detail: DetailSpec = serde_yaml::from_str(
            r#"
urlField: link
fields:
  - name: description
    label: "描述:"
"#,
        )
        .unwrap();
        assert_eq!(detail.scope, "body");
        assert_eq!(detail.sample, SampleSize::Between { min: 3, max: 5 });
        assert_eq!(detail.fields[0].until, "|");
    }
}
