//! Recursive text splitter.
//!
//! Splits text by trying progressively smaller separators until every
//! piece fits within the character limit.

use lore_core::ContentType;

/// A slice of a larger text with its 1-based line span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Recursive splitter that merges adjacent parts up to `max_chars`.
///
/// Tries each separator in order:
/// 1. Section headings (markdown) or top-level items (code)
/// 2. Double newline (paragraph breaks)
/// 3. Single newline
/// 4. Sentence boundaries
/// 5. Word boundaries
/// 6. Fixed-size cut (last resort)
#[derive(Debug, Clone)]
pub struct TextSplitter {
    max_chars: usize,
}

impl TextSplitter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(16),
        }
    }

    /// Get separators for the given content type.
    fn separators(content_type: ContentType) -> &'static [&'static str] {
        match content_type {
            ContentType::Markdown => &["\n## ", "\n### ", "\n\n", "\n", ". ", " "],
            ContentType::Rust
            | ContentType::Python
            | ContentType::TypeScript
            | ContentType::JavaScript
            | ContentType::Go
            | ContentType::Java
            | ContentType::Cpp
            | ContentType::C
            | ContentType::Ruby
            | ContentType::Shell => &["\n\n\n", "\n\n", "\n", " "],
            ContentType::Json | ContentType::Yaml | ContentType::Toml | ContentType::Xml => {
                &["\n\n", "\n", ", ", " "]
            }
            _ => &["\n\n", "\n", ". ", " "],
        }
    }

    /// Split `text` into pieces no longer than the limit.
    pub fn split(&self, text: &str, content_type: ContentType) -> Vec<Piece> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let parts = self.split_recursive(text, Self::separators(content_type));

        let mut pieces = Vec::with_capacity(parts.len());
        let mut cursor = 0usize;
        let mut last_line = 1u32;
        for content in parts {
            let (start_line, next_cursor) = match text[cursor..].find(content.as_str()) {
                Some(offset) => {
                    let start = cursor + offset;
                    let line = 1 + text[..start].matches('\n').count() as u32;
                    (line, start + content.len())
                }
                None => (last_line, cursor),
            };
            let end_line = start_line + content.matches('\n').count() as u32;
            cursor = next_cursor;
            last_line = end_line;
            pieces.push(Piece {
                content,
                start_line,
                end_line,
            });
        }
        pieces
    }

    fn fits(&self, text: &str) -> bool {
        text.chars().count() <= self.max_chars
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if self.fits(trimmed) {
            return vec![trimmed.to_string()];
        }

        let Some((separator, rest)) = separators.split_first() else {
            return self.split_by_size(trimmed);
        };

        let parts: Vec<&str> = trimmed
            .split(separator)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.len() <= 1 {
            return self.split_recursive(trimmed, rest);
        }

        let mut out = Vec::new();
        let mut current = String::new();
        for part in parts {
            if current.is_empty() {
                if self.fits(part) {
                    current = part.to_string();
                } else {
                    out.extend(self.split_recursive(part, rest));
                }
                continue;
            }

            let combined = format!("{}{}{}", current, separator, part);
            if self.fits(&combined) {
                current = combined;
            } else {
                out.push(std::mem::take(&mut current));
                if self.fits(part) {
                    current = part.to_string();
                } else {
                    out.extend(self.split_recursive(part, rest));
                }
            }
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    }

    /// Cut at word boundaries near the limit (last resort).
    fn split_by_size(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut out = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.max_chars).min(chars.len());
            let mut cut = end;
            if end < chars.len() {
                if let Some(space) = (start + 1..end).rev().find(|&i| chars[i].is_whitespace()) {
                    cut = space;
                }
            }

            let piece: String = chars[start..cut].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                out.push(piece.to_string());
            }
            start = cut;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_piece() {
        let splitter = TextSplitter::new(100);
        let pieces = splitter.split("Hello world. This is a test.", ContentType::PlainText);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].content, "Hello world. This is a test.");
        assert_eq!(pieces[0].start_line, 1);
    }

    #[test]
    fn test_paragraph_split() {
        let splitter = TextSplitter::new(45);
        let text = "First paragraph with several words here.\n\n\
                    Second paragraph also with words.\n\n\
                    Third paragraph too.";
        let pieces = splitter.split(text, ContentType::PlainText);

        assert!(pieces.len() >= 2, "Expected at least 2 pieces, got {}", pieces.len());
        assert!(pieces.iter().all(|p| p.content.chars().count() <= 45));
        assert_eq!(pieces[0].content, "First paragraph with several words here.");
        assert_eq!(pieces[1].start_line, 3);
    }

    #[test]
    fn test_unbroken_text_is_cut_by_size() {
        let splitter = TextSplitter::new(20);
        let text = "a".repeat(50);
        let pieces = splitter.split(&text, ContentType::PlainText);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.content.len() <= 20));
    }

    #[test]
    fn test_empty_content() {
        let splitter = TextSplitter::new(100);
        assert!(splitter.split("", ContentType::PlainText).is_empty());
        assert!(splitter.split("  \n\n ", ContentType::PlainText).is_empty());
    }
}
