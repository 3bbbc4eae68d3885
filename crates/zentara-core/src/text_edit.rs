use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Zero-based document position, LSP convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    /// UTF-16 code unit offset within the line.
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn at(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// Inclusive on both ends, so a cursor placed right after the last
    /// character still counts as inside.
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    /// Number of lines spanned, used to pick the innermost of nested ranges.
    pub fn line_span(&self) -> u32 {
        self.end.line.saturating_sub(self.start.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    pub fn insert(position: Position, text: impl Into<String>) -> Self {
        Self {
            range: Range::at(position),
            new_text: text.into(),
        }
    }

    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: text.into(),
        }
    }
}

pub fn apply_text_edits_utf16(content: &str, edits: &[TextEdit]) -> Result<String> {
    if edits.is_empty() {
        return Ok(content.to_string());
    }

    let line_starts = compute_line_starts(content);
    let mut replacements = Vec::with_capacity(edits.len());

    for (idx, edit) in edits.iter().enumerate() {
        let start = position_to_offset(&line_starts, content, &edit.range.start)
            .with_context(|| format!("invalid start position for edit #{idx}"))?;
        let end = position_to_offset(&line_starts, content, &edit.range.end)
            .with_context(|| format!("invalid end position for edit #{idx}"))?;

        if start > end {
            return Err(anyhow!(
                "invalid range for edit #{idx}: start offset {start} > end offset {end}"
            ));
        }

        replacements.push((start, end, edit.new_text.as_str()));
    }

    // Apply back to front so earlier offsets stay valid.
    replacements.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut out = content.to_string();
    for (start, end, new_text) in replacements {
        out.replace_range(start..end, new_text);
    }

    Ok(out)
}

fn compute_line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in content.as_bytes().iter().enumerate() {
        if *b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn position_to_offset(line_starts: &[usize], content: &str, pos: &Position) -> Result<usize> {
    let line = pos.line as usize;
    if line >= line_starts.len() {
        return Err(anyhow!(
            "line {} is out of range (file has {} lines)",
            pos.line,
            line_starts.len()
        ));
    }

    let line_start = line_starts[line];
    let line_end_including_eol = if line + 1 < line_starts.len() {
        line_starts[line + 1]
    } else {
        content.len()
    };

    let mut line_end = line_end_including_eol;
    if line_end > line_start && content.as_bytes()[line_end - 1] == b'\n' {
        line_end -= 1;
    }
    if line_end > line_start && content.as_bytes()[line_end - 1] == b'\r' {
        line_end -= 1;
    }

    let line_text = &content[line_start..line_end];
    let byte_in_line = utf16_col_to_byte_idx(line_text, pos.character);
    Ok((line_start + byte_in_line).min(content.len()))
}

fn utf16_col_to_byte_idx(line: &str, utf16_col: u32) -> usize {
    if utf16_col == 0 {
        return 0;
    }

    let mut units = 0u32;
    for (byte_idx, ch) in line.char_indices() {
        if units == utf16_col {
            return byte_idx;
        }
        units = units.saturating_add(ch.len_utf16() as u32);
        if units > utf16_col {
            // Never split a scalar value.
            return byte_idx + ch.len_utf8();
        }
    }

    line.len()
}
