use std::fmt::Write as _;

use zentara_lsp::protocol::{DocumentSymbol, Position, TextEdit};
use zentara_lsp::symbol::symbol_kind_name;

pub const TABLE_HEADER: &str = "name_path | kind | location";

/// A `/`-separated symbol path such as `Foo/bar`. A leading `/` anchors the
/// path at the top level of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePath {
    anchored: bool,
    segments: Vec<String>,
}

impl NamePath {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        Self {
            anchored: trimmed.starts_with('/'),
            segments: trimmed
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last_segment(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Matches the path against the suffix of `ancestors + [name]`.
    /// `substring` relaxes only the last segment to `contains`.
    pub fn matches(&self, ancestors: &[&str], name: &str, substring: bool) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };
        let last_ok = if substring {
            name.contains(last.as_str())
        } else {
            name == last.as_str()
        };
        if !last_ok || parents.len() > ancestors.len() {
            return false;
        }
        if self.anchored && parents.len() != ancestors.len() {
            return false;
        }
        let tail = &ancestors[ancestors.len() - parents.len()..];
        tail.iter().zip(parents).all(|(a, p)| *a == p.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRow {
    pub name_path: String,
    pub kind: u32,
    pub uri: String,
    pub position: Position,
    pub body: Option<String>,
}

pub fn render_table(rows: &[SymbolRow]) -> String {
    let mut out = String::from(TABLE_HEADER);
    out.push('\n');
    for row in rows {
        let _ = writeln!(
            out,
            "{} | {} | {}:{}:{}",
            row.name_path,
            symbol_kind_name(row.kind),
            row.uri,
            row.position.line,
            row.position.character
        );
        if let Some(body) = &row.body {
            out.push_str(body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

/// Innermost symbol whose range contains `position`, or whose selection
/// range starts exactly on it, with its ancestor names.
pub fn symbol_at_position(
    symbols: &[DocumentSymbol],
    position: Position,
) -> Option<(&DocumentSymbol, Vec<&str>)> {
    fn hits(sym: &DocumentSymbol, position: Position) -> bool {
        sym.range.contains(position) || sym.selection_range.start == position
    }

    let mut ancestors = Vec::new();
    let mut level = symbols;
    let mut found: Option<&DocumentSymbol> = None;
    loop {
        let next = level
            .iter()
            .filter(|s| hits(s, position))
            .min_by_key(|s| s.range.line_span());
        match next {
            Some(sym) => {
                if let Some(parent) = found {
                    ancestors.push(parent.name.as_str());
                }
                found = Some(sym);
                level = &sym.children;
            }
            None => break,
        }
    }
    found.map(|sym| (sym, ancestors))
}

pub fn top_level_rows(symbols: &[DocumentSymbol], uri: &str) -> Vec<SymbolRow> {
    symbols
        .iter()
        .map(|sym| SymbolRow {
            name_path: sym.name.clone(),
            kind: sym.kind,
            uri: uri.to_string(),
            position: sym.selection_range.start,
            body: None,
        })
        .collect()
}

/// Rows for every symbol matching `path`, plus descendants down to `depth`.
/// A symbol reached both ways is listed once.
pub fn matching_rows<'a>(
    symbols: &'a [DocumentSymbol],
    uri: &str,
    path: &NamePath,
    substring: bool,
    depth: u32,
) -> Vec<(SymbolRow, &'a DocumentSymbol)> {
    let mut out = Vec::new();
    zentara_lsp::symbol::walk_symbols(symbols, &mut |sym, ancestors| {
        if path.matches(ancestors, &sym.name, substring) {
            let prefix = join_path(ancestors, &sym.name);
            emit(uri, &prefix, sym, &mut out);
            push_descendants(uri, &prefix, sym, depth, &mut out);
        }
    });
    out
}

fn emit<'a>(
    uri: &str,
    name_path: &str,
    sym: &'a DocumentSymbol,
    out: &mut Vec<(SymbolRow, &'a DocumentSymbol)>,
) {
    if !out.iter().any(|(_, seen)| std::ptr::eq(*seen, sym)) {
        out.push((row(uri, name_path, sym), sym));
    }
}

fn push_descendants<'a>(
    uri: &str,
    prefix: &str,
    sym: &'a DocumentSymbol,
    depth: u32,
    out: &mut Vec<(SymbolRow, &'a DocumentSymbol)>,
) {
    if depth == 0 {
        return;
    }
    for child in &sym.children {
        let name_path = format!("{prefix}/{}", child.name);
        emit(uri, &name_path, child, out);
        push_descendants(uri, &name_path, child, depth - 1, out);
    }
}

fn row(uri: &str, name_path: &str, sym: &DocumentSymbol) -> SymbolRow {
    SymbolRow {
        name_path: name_path.to_string(),
        kind: sym.kind,
        uri: uri.to_string(),
        position: sym.selection_range.start,
        body: None,
    }
}

pub fn join_path(ancestors: &[&str], name: &str) -> String {
    let mut parts: Vec<&str> = ancestors.to_vec();
    parts.push(name);
    parts.join("/")
}

/// Container names from workspace symbols use language-specific separators.
pub fn container_segments(container: Option<&str>) -> Vec<&str> {
    container
        .unwrap_or_default()
        .split(['.', ':', '/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn with_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

/// Inserts `content` as whole lines above the symbol's first line.
pub fn insert_before(sym: &DocumentSymbol, content: &str) -> TextEdit {
    TextEdit::insert(
        Position::new(sym.range.start.line, 0),
        with_trailing_newline(content),
    )
}

/// Inserts `content` on a new line right after the symbol's end.
pub fn insert_after(sym: &DocumentSymbol, content: &str) -> TextEdit {
    let body = content.strip_suffix('\n').unwrap_or(content);
    TextEdit::insert(sym.range.end, format!("\n{body}"))
}

pub fn replace_body(sym: &DocumentSymbol, replacement: &str) -> TextEdit {
    TextEdit::replace(sym.range, replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use zentara_core::text_edit::apply_text_edits_utf16;
    use zentara_lsp::symbol::parse_document_symbols;

    const SOURCE: &str = "class Foo {\n  bar() {\n    return 1;\n  }\n}\nfunction barBaz() {}\n";

    fn symbols() -> Vec<DocumentSymbol> {
        parse_document_symbols(json!([
            {
                "name": "Foo", "kind": 5,
                "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 4, "character": 1 } },
                "selectionRange": { "start": { "line": 0, "character": 6 }, "end": { "line": 0, "character": 9 } },
                "children": [{
                    "name": "bar", "kind": 6,
                    "range": { "start": { "line": 1, "character": 2 }, "end": { "line": 3, "character": 3 } },
                    "selectionRange": { "start": { "line": 1, "character": 2 }, "end": { "line": 1, "character": 5 } }
                }]
            },
            {
                "name": "barBaz", "kind": 12,
                "range": { "start": { "line": 5, "character": 0 }, "end": { "line": 5, "character": 20 } },
                "selectionRange": { "start": { "line": 5, "character": 9 }, "end": { "line": 5, "character": 15 } }
            }
        ]))
        .unwrap()
    }

    #[test]
    fn name_path_matching_rules() {
        let exact = NamePath::parse("Foo/bar");
        assert!(exact.matches(&["Foo"], "bar", false));
        assert!(exact.matches(&["ns", "Foo"], "bar", false));
        assert!(!exact.matches(&[], "bar", false));

        let anchored = NamePath::parse("/Foo/bar");
        assert!(anchored.matches(&["Foo"], "bar", false));
        assert!(!anchored.matches(&["ns", "Foo"], "bar", false));

        let loose = NamePath::parse("Foo/ar");
        assert!(loose.matches(&["Foo"], "bar", true));
        assert!(!loose.matches(&["Foo"], "bar", false));
        assert!(!NamePath::parse("Fo/bar").matches(&["Foo"], "bar", true));
    }

    #[test]
    fn finds_innermost_symbol() {
        let symbols = symbols();
        let (sym, ancestors) = symbol_at_position(&symbols, Position::new(2, 4)).unwrap();
        assert_eq!(sym.name, "bar");
        assert_eq!(ancestors, vec!["Foo"]);

        let (sym, ancestors) = symbol_at_position(&symbols, Position::new(0, 2)).unwrap();
        assert_eq!(sym.name, "Foo");
        assert!(ancestors.is_empty());

        assert!(symbol_at_position(&symbols, Position::new(9, 0)).is_none());
    }

    #[test]
    fn matching_rows_follow_depth() {
        let symbols = symbols();
        let rows = matching_rows(&symbols, "file:///a.ts", &NamePath::parse("Foo"), false, 1);
        let paths: Vec<_> = rows.iter().map(|(r, _)| r.name_path.as_str()).collect();
        assert_eq!(paths, vec!["Foo", "Foo/bar"]);

        let rows = matching_rows(&symbols, "file:///a.ts", &NamePath::parse("bar"), true, 0);
        let paths: Vec<_> = rows.iter().map(|(r, _)| r.name_path.as_str()).collect();
        assert_eq!(paths, vec!["Foo/bar", "barBaz"]);
    }

    #[test]
    fn descendants_that_also_match_are_listed_once() {
        let range = |l: u32| json!({ "start": { "line": l, "character": 0 }, "end": { "line": l + 1, "character": 0 } });
        let symbols = parse_document_symbols(json!([{
            "name": "Outer", "kind": 5, "range": range(0), "selectionRange": range(0),
            "children": [{
                "name": "OuterHelper", "kind": 6, "range": range(1), "selectionRange": range(1),
                "children": [{ "name": "Outerish", "kind": 13, "range": range(2), "selectionRange": range(2) }]
            }]
        }]))
        .unwrap();

        let rows = matching_rows(&symbols, "file:///o.ts", &NamePath::parse("Outer"), true, 1);
        let paths: Vec<_> = rows.iter().map(|(r, _)| r.name_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Outer", "Outer/OuterHelper", "Outer/OuterHelper/Outerish"]
        );
    }

    #[test]
    fn renders_table() {
        let rows = top_level_rows(&symbols(), "file:///a.ts");
        assert_eq!(
            render_table(&rows),
            "name_path | kind | location\nFoo | Class | file:///a.ts:0:6\nbarBaz | Function | file:///a.ts:5:9\n"
        );
    }

    #[test]
    fn symbol_edits() {
        let symbols = symbols();
        let bar = &symbols[0].children[0];

        let out = apply_text_edits_utf16(SOURCE, &[replace_body(bar, "baz() {}")]).unwrap();
        assert_eq!(out, "class Foo {\n  baz() {}\n}\nfunction barBaz() {}\n");

        let out = apply_text_edits_utf16(SOURCE, &[insert_before(&symbols[1], "// doc")]).unwrap();
        assert!(out.ends_with("}\n// doc\nfunction barBaz() {}\n"));

        let out =
            apply_text_edits_utf16(SOURCE, &[insert_after(&symbols[0], "class Qux {}")]).unwrap();
        assert!(out.contains("  }\n}\nclass Qux {}\nfunction barBaz"));
    }
}
