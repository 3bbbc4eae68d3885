use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::protocol::{DocumentSymbol, Location, LocationLink, SymbolInformation};

/// `Location | Location[] | LocationLink[] | null` as a flat list.
pub fn parse_locations(value: Value) -> Result<Vec<Location>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(to_location).collect(),
        Value::Object(_) => Ok(vec![to_location(&value)?]),
        _ => Err(anyhow!("location response is neither array nor object")),
    }
}

pub fn to_location(value: &Value) -> Result<Location> {
    if value.get("uri").is_some() {
        return serde_json::from_value(value.clone()).context("failed to parse Location");
    }

    if value.get("targetUri").is_some() {
        let link: LocationLink =
            serde_json::from_value(value.clone()).context("failed to parse LocationLink")?;
        return Ok(Location {
            uri: link.target_uri,
            range: link.target_selection_range,
        });
    }

    Err(anyhow!("unknown location shape"))
}

/// `textDocument/documentSymbol` returns either `DocumentSymbol[]` or the
/// flat `SymbolInformation[]`. The flat form becomes childless symbols whose
/// `detail` carries the container name.
pub fn parse_document_symbols(value: Value) -> Result<Vec<DocumentSymbol>> {
    let arr = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(arr) => arr,
        _ => return Err(anyhow!("documentSymbol response is not an array")),
    };
    let Some(first) = arr.first() else {
        return Ok(Vec::new());
    };

    if first.get("selectionRange").is_some() {
        return serde_json::from_value(Value::Array(arr))
            .context("failed to parse DocumentSymbol[]");
    }

    let infos: Vec<SymbolInformation> = serde_json::from_value(Value::Array(arr))
        .context("failed to parse SymbolInformation[]")?;
    Ok(infos
        .into_iter()
        .map(|i| DocumentSymbol {
            name: i.name,
            kind: i.kind,
            detail: i.container_name,
            range: i.location.range,
            selection_range: i.location.range,
            children: Vec::new(),
        })
        .collect())
}

/// `SymbolInformation[]` or `WorkspaceSymbol[]`. Workspace symbols whose
/// location carries no range are skipped.
pub fn parse_workspace_symbols(value: Value) -> Result<Vec<SymbolInformation>> {
    let arr = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(arr) => arr,
        _ => return Err(anyhow!("workspace/symbol response is not an array")),
    };

    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        if item.get("location").and_then(|l| l.get("range")).is_none() {
            continue;
        }
        let info: SymbolInformation =
            serde_json::from_value(item).context("failed to parse workspace symbol")?;
        out.push(info);
    }
    Ok(out)
}

/// Depth-first walk yielding each symbol with its ancestor names.
pub fn walk_symbols<'a>(
    symbols: &'a [DocumentSymbol],
    visit: &mut dyn FnMut(&'a DocumentSymbol, &[&'a str]),
) {
    fn go<'a>(
        symbols: &'a [DocumentSymbol],
        parents: &mut Vec<&'a str>,
        visit: &mut dyn FnMut(&'a DocumentSymbol, &[&'a str]),
    ) {
        for sym in symbols {
            visit(sym, parents.as_slice());
            parents.push(sym.name.as_str());
            go(&sym.children, parents, visit);
            parents.pop();
        }
    }
    go(symbols, &mut Vec::new(), visit);
}

const SYMBOL_KIND_NAMES: [&str; 26] = [
    "File",
    "Module",
    "Namespace",
    "Package",
    "Class",
    "Method",
    "Property",
    "Field",
    "Constructor",
    "Enum",
    "Interface",
    "Function",
    "Variable",
    "Constant",
    "String",
    "Number",
    "Boolean",
    "Array",
    "Object",
    "Key",
    "Null",
    "EnumMember",
    "Struct",
    "Event",
    "Operator",
    "TypeParameter",
];

pub fn symbol_kind_name(kind: u32) -> &'static str {
    (kind as usize)
        .checked_sub(1)
        .and_then(|i| SYMBOL_KIND_NAMES.get(i))
        .copied()
        .unwrap_or("Unknown")
}

pub fn parse_symbol_kind(kind: &str) -> Option<u32> {
    let wanted = kind.replace('_', "");
    SYMBOL_KIND_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(&wanted))
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(sl: u32, el: u32) -> Value {
        json!({ "start": { "line": sl, "character": 0 }, "end": { "line": el, "character": 1 } })
    }

    #[test]
    fn normalizes_location_shapes() {
        assert!(parse_locations(Value::Null).unwrap().is_empty());

        let single =
            parse_locations(json!({ "uri": "file:///a.rs", "range": range(1, 1) })).unwrap();
        assert_eq!(single.len(), 1);

        let links = parse_locations(json!([{
            "targetUri": "file:///b.rs",
            "targetRange": range(0, 9),
            "targetSelectionRange": range(3, 3)
        }]))
        .unwrap();
        assert_eq!(links[0].uri, "file:///b.rs");
        assert_eq!(links[0].range.start.line, 3);

        assert!(parse_locations(json!(42)).is_err());
    }

    #[test]
    fn keeps_document_symbol_hierarchy() {
        let symbols = parse_document_symbols(json!([{
            "name": "Foo",
            "kind": 5,
            "range": range(0, 10),
            "selectionRange": range(0, 0),
            "children": [
                { "name": "bar", "kind": 6, "range": range(2, 4), "selectionRange": range(2, 2) }
            ]
        }]))
        .unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].children[0].name, "bar");

        let mut seen = Vec::new();
        walk_symbols(&symbols, &mut |sym, parents| {
            seen.push(format!("{}/{}", parents.join("/"), sym.name));
        });
        assert_eq!(seen, vec!["/Foo", "Foo/bar"]);
    }

    #[test]
    fn flattens_symbol_information() {
        let symbols = parse_document_symbols(json!([{
            "name": "main",
            "kind": 12,
            "location": { "uri": "file:///a.rs", "range": range(4, 8) },
            "containerName": "crate"
        }]))
        .unwrap();
        assert_eq!(symbols[0].detail.as_deref(), Some("crate"));
        assert_eq!(symbols[0].selection_range, symbols[0].range);
    }

    #[test]
    fn skips_workspace_symbols_without_range() {
        let symbols = parse_workspace_symbols(json!([
            { "name": "A", "kind": 5, "location": { "uri": "file:///a.rs", "range": range(0, 1) } },
            { "name": "B", "kind": 5, "location": { "uri": "file:///b.rs" } }
        ]))
        .unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "A");
    }

    #[test]
    fn symbol_kind_names_round_trip() {
        assert_eq!(symbol_kind_name(5), "Class");
        assert_eq!(symbol_kind_name(26), "TypeParameter");
        assert_eq!(symbol_kind_name(0), "Unknown");
        assert_eq!(symbol_kind_name(99), "Unknown");
        assert_eq!(parse_symbol_kind("enum_member"), Some(22));
        assert_eq!(parse_symbol_kind("STRUCT"), Some(23));
        assert_eq!(parse_symbol_kind("widget"), None);
    }
}
