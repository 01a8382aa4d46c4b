//! HTML to text, title and outbound links.

use std::sync::OnceLock;

use regex::Regex;

/// Text content of an HTML page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlPage {
    pub title: Option<String>,
    pub text: String,
    /// Raw `href` values in document order, unresolved.
    pub links: Vec<String>,
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn invisible() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        concat!(
            r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>",
            r"|<template\b.*?</template\s*>|<svg\b.*?</svg\s*>|<!--.*?-->",
        ),
    )
}

fn title_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?is)<title\b[^>]*>(.*?)</title\s*>")
}

fn anchor_href() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#,
    )
}

fn block_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        concat!(
            r"(?i)</?(?:p|div|br|li|ul|ol|h[1-6]|tr|td|th|table",
            r"|section|article|main|header|footer|nav|aside|blockquote|pre|hr)\b[^>]*>",
        ),
    )
}

fn any_tag() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?s)<[^>]*>")
}

fn numeric_entity() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"&#(x?)([0-9a-fA-F]{1,6});")
}

/// Decode the common named entities and numeric references.
pub(crate) fn decode_entities(text: &str) -> String {
    let numeric = numeric_entity().replace_all(text, |caps: &regex::Captures<'_>| {
        let radix = if caps[1].is_empty() { 10 } else { 16 };
        u32::from_str_radix(&caps[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_default()
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-")
        .replace("&hellip;", "...")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces within lines and runs of blank lines.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
            continue;
        }
        blank_run = 0;
        out.push_str(&line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Parse an HTML document into visible text, title and links.
pub fn parse_html(html: &str) -> HtmlPage {
    let title = title_tag()
        .captures(html)
        .map(|caps| normalize_whitespace(&decode_entities(&caps[1])))
        .filter(|t| !t.is_empty());

    let visible = invisible().replace_all(html, " ");

    let links = anchor_href()
        .captures_iter(&visible)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|href| !href.is_empty())
        .collect();

    let visible = title_tag().replace_all(&visible, " ");
    let visible = block_tag().replace_all(&visible, "\n");
    let visible = any_tag().replace_all(&visible, " ");
    let text = normalize_whitespace(&decode_entities(&visible));

    HtmlPage { title, text, links }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Fish &amp; Chips</title>
<style>body { color: red; }</style>
<script>var x = "<p>not text</p>";</script></head>
<body>
  <nav><a href="/">Home</a> <a href='/about'>About</a></nav>
  <h1>Frying   fish</h1>
  <p>Heat the oil to 180&#176;C.<br>Use a &quot;thermometer&quot;.</p>
  <a href="https://example.com/recipes#top">Recipes</a>
  <!-- <a href="/hidden">hidden</a> -->
</body></html>"#;

    #[test]
    fn test_title_and_text() {
        let page = parse_html(PAGE);
        assert_eq!(page.title.as_deref(), Some("Fish & Chips"));
        assert!(page.text.contains("Frying fish"));
        assert!(page.text.contains("Heat the oil to 180°C."));
        assert!(page.text.contains("Use a \"thermometer\"."));
        assert!(!page.text.contains("color: red"));
        assert!(!page.text.contains("not text"));
    }

    #[test]
    fn test_links_in_order() {
        let page = parse_html(PAGE);
        assert_eq!(
            page.links,
            vec![
                "/".to_string(),
                "/about".to_string(),
                "https://example.com/recipes#top".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        let page = parse_html("");
        assert!(page.title.is_none());
        assert!(page.text.is_empty());
        assert!(page.links.is_empty());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a   b \n\n\n\n c "), "a b\n\nc");
    }
}
