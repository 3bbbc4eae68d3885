use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// 0-based line number of the first line in `text`.
    pub start_line: u32,
    pub text: String,
    pub truncated: bool,
}

/// Inclusive line range, clamped to the document. Used for symbol bodies.
pub fn extract_lines(content: &str, start_line: u32, end_line: u32, max_chars: usize) -> Snippet {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.is_empty() {
        return Snippet {
            start_line: 0,
            text: String::new(),
            truncated: false,
        };
    }

    let last = lines.len() - 1;
    let start = (start_line as usize).min(last);
    let end = (end_line as usize).clamp(start, last);

    let mut text: String = lines[start..=end].concat();
    let mut truncated = false;
    if text.chars().count() > max_chars {
        truncated = true;
        text = text.chars().take(max_chars).collect();
    }

    Snippet {
        start_line: start as u32,
        text,
        truncated,
    }
}
