use crate::file::Language;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use tree_sitter::Language as TsLanguage;

/// Caches the compiled-in tree-sitter grammars.
///
/// Grammars are linked into the binary, so loading never touches the network.
pub struct GrammarManager {
    grammars: DashMap<Language, Arc<TsLanguage>>,
}

impl GrammarManager {
    pub fn new() -> Self {
        Self {
            grammars: DashMap::new(),
        }
    }

    /// Get a grammar for the given language
    ///
    /// Returns None if the language has no registered grammar
    pub fn get_grammar(&self, language: Language) -> Option<Arc<TsLanguage>> {
        if let Some(grammar) = self.grammars.get(&language) {
            return Some(grammar.clone());
        }

        let grammar = Arc::new(Self::load_grammar(language)?);
        self.grammars.insert(language, grammar.clone());
        debug!("Loaded grammar for {}", language.tag());
        Some(grammar)
    }

    fn load_grammar(language: Language) -> Option<TsLanguage> {
        match language {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            _ => None,
        }
    }

    /// Languages that have a compiled-in grammar
    pub fn supported_languages() -> &'static [Language] {
        &[
            Language::Rust,
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
        ]
    }

    pub fn is_supported(language: Language) -> bool {
        Self::supported_languages().contains(&language)
    }

    pub fn cached_grammars(&self) -> usize {
        self.grammars.len()
    }
}

impl Default for GrammarManager {
    fn default() -> Self {
        Self::new()
    }
}
