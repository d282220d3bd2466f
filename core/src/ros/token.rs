use serde::{Deserialize, Serialize};

/// One bracketed `[TOKEN]` header of a `.ros` file with the raw text that follows it,
/// up to the next header or the end of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub token: String,
    pub content: String,
    /// Byte offset of the opening bracket.
    pub offset: usize,
}

impl Section {
    /// Non-empty trimmed payload lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.content.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines().next()
    }
}

/// Splits `.ros` text into ordered sections.
///
/// A header is a `[` ... `]` pair on a single line. Text before the first header is
/// dropped.
pub fn extract_sections(text: &str) -> Vec<Section> {
    let mut headers: Vec<(usize, usize, String)> = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] == b'[' {
            let rest = &text[pos + 1..];
            let close = rest.find(']');
            let newline = rest.find('\n');
            if let Some(close) = close {
                if newline.map_or(true, |nl| close < nl) {
                    let token = rest[..close].trim().to_string();
                    let end = pos + 1 + close + 1;
                    headers.push((pos, end, token));
                    pos = end;
                    continue;
                }
            }
        }
        pos += 1;
    }

    let mut sections = Vec::with_capacity(headers.len());
    for (i, (start, end, token)) in headers.iter().enumerate() {
        let content_end = headers.get(i + 1).map_or(text.len(), |next| next.0);
        sections.push(Section {
            token: token.clone(),
            content: text[*end..content_end].to_string(),
            offset: *start,
        });
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_keep_order_and_payload() {
        let text = "preamble\n[A]\n1 2\n[B] x\n[C]\n";
        let sections = extract_sections(text);
        let tokens: Vec<&str> = sections.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, vec!["A", "B", "C"]);
        assert_eq!(sections[0].first_line(), Some("1 2"));
        assert_eq!(sections[1].first_line(), Some("x"));
        assert_eq!(sections[2].first_line(), None);
        assert_eq!(sections[0].offset, 9);
    }

    #[test]
    fn bracket_spanning_lines_is_not_a_header() {
        let sections = extract_sections("[A]\npath [unclosed\nnext] value\n");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].content.contains("[unclosed"));
    }
}
