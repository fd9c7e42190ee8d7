//! Per-item field extraction.
//!
//! A schema is an ordered list of named [`FieldExtractor`]s. Applying it to a
//! [`Fragment`] always yields a [`Record`] with one entry per schema field: an
//! extractor that fails (or panics) leaves [`Value::Missing`] behind and the
//! remaining fields are still extracted.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The minimal raw unit handed to extractors, scoped to a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    html: String,
    text: String,
}

impl Fragment {
    /// `text` is the visible text of the item, one stripped text node per line.
    pub fn new(html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            text: text.into(),
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            html: text.clone(),
            text,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Missing,
    Integer(i64),
    Text(String),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(IndexMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Overwrites fields of the same name, appends the others.
    pub fn merge(&mut self, other: Record) {
        self.0.extend(other.0);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> IndexMap<String, Value> {
        self.0
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("no element matches {0:?}")]
    NotFound(String),
    #[error("label {0:?} not found")]
    LabelNotFound(String),
    #[error("attribute {0:?} missing")]
    MissingAttribute(String),
    #[error("invalid value: {0}")]
    Invalid(String),
    #[error("extractor panicked")]
    Panicked,
}

/// Extracts one value out of one item fragment.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError>;

    /// Like [`extract`](Self::extract), along with the number of nested
    /// fields that failed inside the returned value.
    fn extract_counting(&self, fragment: &Fragment) -> Result<(Value, usize), FieldError> {
        self.extract(fragment).map(|value| (value, 0))
    }
}

impl<T: FieldExtractor + ?Sized> FieldExtractor for Box<T> {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        (**self).extract(fragment)
    }

    fn extract_counting(&self, fragment: &Fragment) -> Result<(Value, usize), FieldError> {
        (**self).extract_counting(fragment)
    }
}

pub struct FnExtractor<F>(F);

/// Wraps a closure as an extractor.
pub fn from_fn<F>(f: F) -> FnExtractor<F>
where
    F: Fn(&Fragment) -> Result<Value, FieldError> + Send + Sync,
{
    FnExtractor(f)
}

impl<F> FieldExtractor for FnExtractor<F>
where
    F: Fn(&Fragment) -> Result<Value, FieldError> + Send + Sync,
{
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        (self.0)(fragment)
    }
}

/// Label-delimited text extraction.
///
/// Takes the text following the last occurrence of `label`, up to the first
/// `terminator` and the end of that line, trimmed. For `"类别: 云计算 | 价格: ¥99"`,
/// label `"价格:"` and terminator `"|"` give `"¥99"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledText {
    pub label: String,
    pub terminator: String,
}

impl LabeledText {
    pub fn new(label: impl Into<String>, terminator: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            terminator: terminator.into(),
        }
    }
}

impl FieldExtractor for LabeledText {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        let text = fragment.text();
        let start = text
            .rfind(self.label.as_str())
            .ok_or_else(|| FieldError::LabelNotFound(self.label.clone()))?
            + self.label.len();
        let rest = &text[start..];

        let rest = match rest.find(self.terminator.as_str()) {
            Some(end) if !self.terminator.is_empty() => &rest[..end],
            _ => rest,
        };
        let value = rest.trim().lines().next().unwrap_or_default().trim();

        Ok(Value::Text(value.to_string()))
    }
}

/// Coerces text to an integer, `0` when it isn't one.
///
/// Failures of the inner extractor still surface as failures.
#[derive(Debug, Clone)]
pub struct Integer<E>(pub E);

impl<E: FieldExtractor> FieldExtractor for Integer<E> {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        let n = match self.0.extract(fragment)? {
            Value::Integer(n) => n,
            Value::Text(s) => s.trim().parse().unwrap_or(0),
            Value::Missing | Value::Map(_) => 0,
        };
        Ok(Value::Integer(n))
    }
}

/// Outcome of applying a schema to one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub record: Record,
    /// Failed fields, nested groups included
    pub failed: usize,
}

#[derive(Default)]
pub struct ExtractorSchema {
    fields: Vec<(String, Box<dyn FieldExtractor>)>,
}

impl ExtractorSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field, replacing any previous field of the same name in place.
    pub fn field<E>(mut self, name: impl Into<String>, extractor: E) -> Self
    where
        E: FieldExtractor + 'static,
    {
        self.push(name, Box::new(extractor));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, extractor: Box<dyn FieldExtractor>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = extractor,
            None => self.fields.push((name, extractor)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn apply(&self, fragment: &Fragment) -> Extracted {
        let mut record = Record::new();
        let mut failed = 0;

        for (name, extractor) in &self.fields {
            let res =
                panic::catch_unwind(AssertUnwindSafe(|| extractor.extract_counting(fragment)))
                    .unwrap_or(Err(FieldError::Panicked));
            let value = match res {
                Ok((value, nested_failed)) => {
                    failed += nested_failed;
                    value
                }
                Err(e) => {
                    log::warn!("Couldn't extract field {name}: {e}");
                    failed += 1;
                    Value::Missing
                }
            };
            record.insert(name.as_str(), value);
        }

        Extracted { record, failed }
    }
}

/// A nested schema yields a [`Value::Map`].
impl FieldExtractor for ExtractorSchema {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        self.extract_counting(fragment).map(|(value, _)| value)
    }

    fn extract_counting(&self, fragment: &Fragment) -> Result<(Value, usize), FieldError> {
        let Extracted { record, failed } = self.apply(fragment);
        Ok((Value::Map(record.into_inner()), failed))
    }
}

impl fmt::Debug for ExtractorSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

pub fn extract(schema: &ExtractorSchema, fragment: &Fragment) -> Record {
    schema.apply(fragment).record
}
