//! Small CSS-selector helpers over raw HTML, built on `scraper`.

use scraper::{Html, Selector};

/// Attribute `attr` of the first element matching `css`.
pub fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.to_string())
}

/// Trimmed text of the first element matching `css`.
pub fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}
