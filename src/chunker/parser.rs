use crate::error::{Error, Result};
use crate::file::Language;
use tree_sitter::{Node, Parser, Tree};

use super::grammar::GrammarManager;

/// Wrapper around tree-sitter parser with language support
pub struct CodeParser {
    parser: Parser,
    grammar_manager: GrammarManager,
}

impl CodeParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            grammar_manager: GrammarManager::new(),
        }
    }

    /// Parse source code for a given language
    pub fn parse(&mut self, language: Language, source: &str) -> Result<ParsedCode> {
        let grammar = self
            .grammar_manager
            .get_grammar(language)
            .ok_or_else(|| Error::Parse(format!("no grammar available for {}", language.tag())))?;

        self.parser
            .set_language(&grammar)
            .map_err(|e| Error::Parse(format!("failed to set language: {e}")))?;

        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| Error::Parse("parser returned no tree".to_string()))?;

        Ok(ParsedCode { tree, language })
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

/// A parse tree and the language it was produced for
pub struct ParsedCode {
    tree: Tree,
    language: Language,
}

impl ParsedCode {
    pub fn root_node(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn has_errors(&self) -> bool {
        self.root_node().has_error()
    }
}
