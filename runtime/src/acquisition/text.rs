//! Visible-text extraction from page HTML.

use scraper::{ElementRef, Html, Selector};

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Main-content candidates, most specific first.
const MAIN_REGIONS: &[&str] = &["main", "[role=\"main\"]", "article", "#content", "body"];

/// A main region shorter than this is ignored in favor of the whole body.
const MIN_REGION_CHARS: usize = 200;

/// Extract the visible text of a document, whitespace-collapsed.
///
/// Prefers the main content region when it carries meaningful text, so
/// navigation chrome and footers don't dilute what extraction sees.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    for region in MAIN_REGIONS {
        let Ok(sel) = Selector::parse(region) else {
            continue;
        };
        if let Some(el) = document.select(&sel).next() {
            let text = visible_text(&el);
            if text.len() >= MIN_REGION_CHARS || *region == "body" {
                return text;
            }
        }
    }
    visible_text(&document.root_element())
}

/// The document `<title>`, if present and non-empty.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("title").ok()?;
    let title = element_text(&document.select(&sel).next()?);
    (!title.is_empty()).then_some(title)
}

fn visible_text(el: &ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if !hidden {
            let s: &str = text;
            parts.push(s);
        }
    }
    collapse(&parts.join(" "))
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
