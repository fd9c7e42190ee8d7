use pws_crawler::{FieldError, FieldExtractor, Fragment, NextPage, PageParser, Url, Value};
use scraper::{ElementRef, Html, Selector};

pub(crate) fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("Invalid selector {css:?}: {e}"))
}

/// Text nodes with collapsed whitespace, empty ones dropped.
fn text_nodes(element: ElementRef<'_>) -> impl Iterator<Item = String> + '_ {
    element
        .text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn fragment_of(element: ElementRef<'_>) -> Fragment {
    let text = text_nodes(element).collect::<Vec<_>>().join("\n");
    Fragment::new(element.html(), text)
}

/// The element that opens the next page, optionally required to contain `text`.
#[derive(Debug, Clone)]
pub struct NextLink {
    pub selector: Selector,
    pub text: Option<String>,
}

impl NextLink {
    pub fn new(css: &str, text: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            selector: selector(css)?,
            text,
        })
    }

    fn found(&self, page: &Html) -> bool {
        page.select(&self.selector).any(|el| match &self.text {
            Some(text) => text_nodes(el).any(|t| t.contains(text.as_str())),
            None => true,
        })
    }
}

/// Locates items with a CSS selector. Without a [`NextLink`] the page gives
/// no continuation signal.
#[derive(Debug, Clone)]
pub struct HtmlParser {
    item: Selector,
    next: Option<NextLink>,
}

impl HtmlParser {
    pub fn new(item: &str) -> anyhow::Result<Self> {
        Ok(Self {
            item: selector(item)?,
            next: None,
        })
    }

    pub fn with_next(mut self, next: NextLink) -> Self {
        self.next = Some(next);
        self
    }
}

impl PageParser for HtmlParser {
    fn items(&self, body: &str) -> Vec<Fragment> {
        let page = Html::parse_document(body);
        page.select(&self.item).map(fragment_of).collect()
    }

    fn next_page(&self, body: &str) -> NextPage {
        let Some(next) = &self.next else {
            return NextPage::Unknown;
        };
        let page = Html::parse_document(body);
        if next.found(&page) {
            NextPage::Present
        } else {
            NextPage::Absent
        }
    }
}

/// Parses an item fragment. Rows and cells only survive parsing inside a table.
fn item_doc(html: &str) -> Html {
    let tag = html
        .trim_start()
        .strip_prefix('<')
        .map(|rest| {
            rest.chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();
    match tag.as_str() {
        "tr" => Html::parse_fragment(&format!("<table><tbody>{html}</tbody></table>")),
        "td" | "th" => Html::parse_fragment(&format!("<table><tbody><tr>{html}</tr></tbody></table>")),
        "thead" | "tbody" | "tfoot" => Html::parse_fragment(&format!("<table>{html}</table>")),
        _ => Html::parse_fragment(html),
    }
}

fn first<'a>(doc: &'a Html, selector: &Selector, css: &str) -> Result<ElementRef<'a>, FieldError> {
    doc.select(selector)
        .next()
        .ok_or_else(|| FieldError::NotFound(css.to_string()))
}

/// Text of the first matching element within the item, or of the whole item.
#[derive(Debug, Clone)]
pub struct Text {
    css: String,
    selector: Option<Selector>,
}

impl Text {
    pub fn new(css: &str) -> anyhow::Result<Self> {
        Ok(Self {
            css: css.to_string(),
            selector: Some(selector(css)?),
        })
    }

    pub fn whole() -> Self {
        Self {
            css: String::new(),
            selector: None,
        }
    }
}

impl FieldExtractor for Text {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        let Some(selector) = &self.selector else {
            return Ok(Value::Text(fragment.text().lines().collect::<Vec<_>>().join(" ")));
        };
        let doc = item_doc(fragment.html());
        let el = first(&doc, selector, &self.css)?;
        Ok(Value::Text(text_nodes(el).collect::<Vec<_>>().join(" ")))
    }
}

/// Attribute of the first matching element, joined to `base` when set.
#[derive(Debug, Clone)]
pub struct Attr {
    css: String,
    selector: Selector,
    name: String,
    base: Option<Url>,
}

impl Attr {
    pub fn new(css: &str, name: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            css: css.to_string(),
            selector: selector(css)?,
            name: name.into(),
            base: None,
        })
    }

    pub fn resolved_against(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }
}

impl FieldExtractor for Attr {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        let doc = item_doc(fragment.html());
        let el = first(&doc, &self.selector, &self.css)?;
        let raw = el
            .value()
            .attr(&self.name)
            .ok_or_else(|| FieldError::MissingAttribute(self.name.clone()))?
            .trim();
        match &self.base {
            Some(base) => base
                .join(raw)
                .map(|u| Value::Text(u.into()))
                .map_err(|e| FieldError::Invalid(format!("{raw:?}: {e}"))),
            None => Ok(Value::Text(raw.to_string())),
        }
    }
}

/// Text of `inner` substituted for `{}` in a template, e.g. `/user/{}`.
pub struct Formatted {
    template: String,
    inner: Box<dyn FieldExtractor>,
}

impl Formatted {
    pub fn new(template: impl Into<String>, inner: Box<dyn FieldExtractor>) -> Self {
        Self {
            template: template.into(),
            inner,
        }
    }
}

impl FieldExtractor for Formatted {
    fn extract(&self, fragment: &Fragment) -> Result<Value, FieldError> {
        let raw = match self.inner.extract(fragment)? {
            Value::Text(s) => s,
            Value::Integer(n) => n.to_string(),
            other => return Err(FieldError::Invalid(format!("can't format {other:?}"))),
        };
        Ok(Value::Text(self.template.replace("{}", raw.trim())))
    }
}
