//! Markdown to plain text.

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

/// Render markdown as plain text, returning the first heading as title.
pub fn markdown_to_text(markdown: &str) -> (Option<String>, String) {
    let mut text = String::with_capacity(markdown.len());
    let mut title: Option<String> = None;
    let mut heading: Option<String> = None;

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                heading = Some(String::new());
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = heading.take() {
                    if title.is_none() && !h.trim().is_empty() {
                        title = Some(h.trim().to_string());
                    }
                }
                text.push_str("\n\n");
            }
            Event::Text(t) | Event::Code(t) => {
                if let Some(h) = heading.as_mut() {
                    h.push_str(&t);
                }
                text.push_str(&t);
            }
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::BlockQuote)
            | Event::End(TagEnd::Table) => text.push_str("\n\n"),
            Event::End(TagEnd::Item) | Event::End(TagEnd::TableRow) => text.push('\n'),
            Event::End(TagEnd::TableCell) => text.push_str(" | "),
            _ => {}
        }
    }

    (title, text.trim().to_string())
}
