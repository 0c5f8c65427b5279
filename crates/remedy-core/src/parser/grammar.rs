//! Tree-sitter backed parsers for non-script languages

use super::{Language, ParseReport, ParserError, SourceParser};
use std::cell::RefCell;
use tree_sitter::{Node, Parser, Tree};

// ═══════════════════════════════════════════════════════════════════════════
//  THREAD-LOCAL PARSER POOL
// ═══════════════════════════════════════════════════════════════════════════
//
// Tree-sitter parsers are expensive to create but can be reused for multiple
// files of the same language. Each rayon worker thread gets its own set of
// pre-configured parsers, so validation never contends on a shared parser.

thread_local! {
    static RUST_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_rust::LANGUAGE.into())
    );

    static JS_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_javascript::LANGUAGE.into())
    );

    static TS_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
    );

    static TSX_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_typescript::LANGUAGE_TSX.into())
    );

    static PYTHON_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_python::LANGUAGE.into())
    );

    static GO_PARSER: RefCell<Option<Parser>> = RefCell::new(
        configured(&tree_sitter_go::LANGUAGE.into())
    );
}

/// A parser whose language failed to load stays `None` and surfaces as
/// [`ParserError::Unavailable`] at parse time.
fn configured(language: &tree_sitter::Language) -> Option<Parser> {
    let mut p = Parser::new();
    p.set_language(language).ok()?;
    Some(p)
}

/// Parser for one tree-sitter language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrammarParser {
    language: Language,
}

impl GrammarParser {
    /// Returns `None` for languages without a bundled grammar.
    pub fn new(language: Language) -> Option<Self> {
        match language {
            Language::Rust
            | Language::JavaScript
            | Language::TypeScript
            | Language::Tsx
            | Language::Python
            | Language::Go => Some(Self { language }),
            Language::PowerShell | Language::Unknown => None,
        }
    }

    fn parse_tree(&self, content: &str) -> Result<Tree, ParserError> {
        let parse = |cell: &RefCell<Option<Parser>>| {
            cell.borrow_mut()
                .as_mut()
                .map(|p| p.parse(content, None))
        };
        let result = match self.language {
            Language::Rust => RUST_PARSER.with(parse),
            Language::JavaScript => JS_PARSER.with(parse),
            Language::TypeScript => TS_PARSER.with(parse),
            Language::Tsx => TSX_PARSER.with(parse),
            Language::Python => PYTHON_PARSER.with(parse),
            Language::Go => GO_PARSER.with(parse),
            Language::PowerShell | Language::Unknown => None,
        };
        match result {
            Some(Some(tree)) => Ok(tree),
            Some(None) => Err(ParserError::Failed(format!(
                "{} parser returned no tree",
                self.language.name()
            ))),
            None => Err(ParserError::Unavailable(format!(
                "no grammar loaded for {}",
                self.language.name()
            ))),
        }
    }
}

impl SourceParser for GrammarParser {
    fn name(&self) -> &str {
        self.language.name()
    }

    fn parse(&self, content: &str) -> Result<ParseReport, ParserError> {
        let tree = self.parse_tree(content)?;
        let root = tree.root_node();

        let mut diagnostics = Vec::new();
        let mut problem_kinds = Vec::new();
        let error_count = count_errors(&root, &mut diagnostics, &mut problem_kinds);
        let top_level_declaration_count = {
            let mut cursor = root.walk();
            let count = root
                .named_children(&mut cursor)
                .filter(|n| is_declaration(self.language, n.kind()))
                .count();
            count
        };

        Ok(ParseReport {
            success: error_count == 0,
            error_count,
            top_level_declaration_count,
            diagnostics,
            problem_kinds,
        })
    }
}

fn count_errors(node: &Node, diagnostics: &mut Vec<String>, kinds: &mut Vec<String>) -> usize {
    if !node.has_error() {
        return 0;
    }
    if node.is_error() || node.is_missing() {
        let what = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "syntax error".to_string()
        };
        if diagnostics.len() < 5 {
            diagnostics.push(format!("line {}: {}", node.start_position().row + 1, what));
        }
        kinds.push(what);
        return 1;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .iter()
        .map(|c| count_errors(c, diagnostics, kinds))
        .sum()
}

fn is_declaration(language: Language, kind: &str) -> bool {
    match language {
        Language::Rust => matches!(
            kind,
            "function_item"
                | "struct_item"
                | "enum_item"
                | "trait_item"
                | "impl_item"
                | "mod_item"
                | "const_item"
                | "static_item"
                | "type_item"
                | "macro_definition"
                | "union_item"
        ),
        Language::JavaScript | Language::TypeScript | Language::Tsx => matches!(
            kind,
            "function_declaration"
                | "generator_function_declaration"
                | "class_declaration"
                | "lexical_declaration"
                | "variable_declaration"
                | "export_statement"
                | "interface_declaration"
                | "type_alias_declaration"
                | "enum_declaration"
        ),
        Language::Python => matches!(
            kind,
            "function_definition" | "class_definition" | "decorated_definition"
        ),
        Language::Go => matches!(
            kind,
            "function_declaration"
                | "method_declaration"
                | "type_declaration"
                | "const_declaration"
                | "var_declaration"
        ),
        Language::PowerShell | Language::Unknown => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_declarations_and_errors() {
        let parser = GrammarParser::new(Language::Rust).unwrap();
        let ok = parser
            .parse("fn a() {}\nstruct B;\nimpl B { fn c(&self) {} }\n")
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.top_level_declaration_count, 3);

        let broken = parser.parse("fn a() {\n").unwrap();
        assert!(!broken.success);
        assert!(broken.error_count >= 1);
    }

    #[test]
    fn test_python_declarations() {
        let parser = GrammarParser::new(Language::Python).unwrap();
        let report = parser.parse("def a():\n    pass\n\nclass B:\n    pass\n").unwrap();
        assert!(report.success);
        assert_eq!(report.top_level_declaration_count, 2);
    }

    #[test]
    fn test_script_languages_have_no_grammar() {
        assert!(GrammarParser::new(Language::PowerShell).is_none());
        assert!(GrammarParser::new(Language::Unknown).is_none());
    }
}
