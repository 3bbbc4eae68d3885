use std::fmt;

macro_rules! operations {
    ($( $variant:ident => $name:literal, $mutating:literal, $summary:literal; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum LspOperation {
            $( $variant, )*
        }

        impl LspOperation {
            pub const ALL: &'static [LspOperation] = &[ $( LspOperation::$variant, )* ];

            pub fn name(self) -> &'static str {
                match self {
                    $( LspOperation::$variant => $name, )*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some(LspOperation::$variant), )*
                    _ => None,
                }
            }

            /// Mutating operations edit files and require approval.
            pub fn is_mutating(self) -> bool {
                match self {
                    $( LspOperation::$variant => $mutating, )*
                }
            }

            pub fn summary(self) -> &'static str {
                match self {
                    $( LspOperation::$variant => $summary, )*
                }
            }
        }
    };
}

operations! {
    FindUsages => "find_usages", false, "References to the symbol at a position";
    GoToDefinition => "go_to_definition", false, "Definition locations of the symbol at a position";
    GetDeclaration => "get_declaration", false, "Declaration locations of the symbol at a position";
    GetTypeDefinition => "get_type_definition", false, "Type definition locations of the symbol at a position";
    FindImplementations => "find_implementations", false, "Implementations of the interface or method at a position";
    GetHoverInfo => "get_hover_info", false, "Hover text for a position";
    GetDocumentHighlights => "get_document_highlights", false, "Occurrences of the symbol at a position in the same document";
    GetSignatureHelp => "get_signature_help", false, "Signature help for the call at a position";
    GetCompletions => "get_completions", false, "Completion items at a position";
    GetDocumentSymbols => "get_document_symbols", false, "Hierarchical symbols of a document";
    GetWorkspaceSymbols => "get_workspace_symbols", false, "Symbols matching a query across the workspace";
    GetSymbolsOverview => "get_symbols_overview", false, "Top-level symbols of a document as a table";
    GetSymbols => "get_symbols", false, "Symbols matching a name path";
    GetSymbolCodeSnippet => "get_symbol_code_snippet", false, "Source of the symbol enclosing a position";
    GetCodeActions => "get_code_actions", false, "Code actions for a range";
    GetCodeLens => "get_code_lens", false, "Code lenses of a document";
    GetSelectionRange => "get_selection_range", false, "Selection ranges expanding from a position";
    GetSemanticTokens => "get_semantic_tokens", false, "Decoded semantic tokens of a document";
    GetCallHierarchy => "get_call_hierarchy", false, "Incoming and outgoing calls of the function at a position";
    GetTypeHierarchy => "get_type_hierarchy", false, "Supertypes and subtypes of the type at a position";
    GetDiagnostics => "get_diagnostics", false, "Diagnostics of a document";
    Rename => "rename", true, "Rename the symbol at a position across the workspace";
    InsertBeforeSymbol => "insert_before_symbol", true, "Insert content before the symbol enclosing a position";
    InsertAfterSymbol => "insert_after_symbol", true, "Insert content after the symbol enclosing a position";
    ReplaceSymbolBody => "replace_symbol_body", true, "Replace the full text of the symbol enclosing a position";
}

impl LspOperation {
    pub fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|op| op.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for LspOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
