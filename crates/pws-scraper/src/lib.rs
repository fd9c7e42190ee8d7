mod html;
mod target;

pub use html::{Attr, Formatted, HtmlParser, NextLink, Text};
pub use target::{AttrSpec, DetailSpec, FieldSpec, ListingSpec, NextSpec, TargetSpec};
