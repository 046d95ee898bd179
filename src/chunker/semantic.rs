use super::extractor::{get_extractor, LanguageExtractor};
use super::markdown;
use super::parser::CodeParser;
use super::window::{sliding_windows, split_oversize, Span};
use super::{estimate_tokens, retain_valid, Chunk, ChunkerConfig};
use crate::config::ChunkStrategy;
use crate::file::Language;
use tracing::debug;
use tree_sitter::Node;

/// Syntax-aware chunker with sliding-window and section fallbacks.
///
/// Owns a tree-sitter parser, so each worker thread needs its own instance.
pub struct SemanticChunker {
    parser: CodeParser,
    config: ChunkerConfig,
}

/// A boundary node's line extent before sizing
#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    symbol: Option<String>,
}

impl SemanticChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            parser: CodeParser::new(),
            config,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk one file's content. Never fails: anything the syntax path
    /// cannot handle falls back to sliding windows.
    pub fn chunk(&mut self, rel_path: &str, language: Language, content: &str) -> Vec<Chunk> {
        let tag = language.tag();
        let kind = language.content_type();

        let chunks: Vec<Chunk> = if language.is_prose() {
            markdown::sections(content, &self.config)
                .into_iter()
                .map(|s| {
                    Chunk::new(rel_path, (s.span.start + 1, s.span.end + 1), s.span.content, tag, kind)
                        .with_symbol(s.heading.filter(|h| !h.is_empty()))
                })
                .collect()
        } else {
            let spans = match self.config.strategy {
                ChunkStrategy::Sliding => self.windows(content),
                ChunkStrategy::Semantic => self.semantic_spans(rel_path, language, content),
            };
            spans
                .into_iter()
                .map(|(span, symbol)| {
                    Chunk::new(rel_path, (span.start + 1, span.end + 1), span.content, tag, kind)
                        .with_symbol(symbol)
                })
                .collect()
        };

        retain_valid(chunks, self.config.min_chars)
    }

    fn windows(&self, content: &str) -> Vec<(Span, Option<String>)> {
        let lines: Vec<&str> = content.lines().collect();
        sliding_windows(
            &lines,
            self.config.window_tokens,
            self.config.window_overlap_tokens,
        )
        .into_iter()
        .map(|span| (span, None))
        .collect()
    }

    fn semantic_spans(
        &mut self,
        rel_path: &str,
        language: Language,
        content: &str,
    ) -> Vec<(Span, Option<String>)> {
        let Some(extractor) = get_extractor(language) else {
            return self.windows(content);
        };

        let parsed = match self.parser.parse(language, content) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Falling back to windows for {}: {}", rel_path, e);
                return self.windows(content);
            }
        };

        let root = parsed.root_node();
        let source = content.as_bytes();
        let mut candidates = Vec::new();
        collect_candidates(root, source, &*extractor, &mut candidates);

        if candidates.is_empty() {
            if !parsed.has_errors() && is_comment_only(root, &*extractor) {
                return Vec::new();
            }
            debug!("No definitions in {}, using windows", rel_path);
            return self.windows(content);
        }

        let lines: Vec<&str> = content.lines().collect();
        let mut spans = Vec::new();
        for candidate in merge_candidates(candidates) {
            let end = candidate.end.min(lines.len().saturating_sub(1));
            if candidate.start > end {
                continue;
            }
            let text = lines[candidate.start..=end].join("\n");
            if estimate_tokens(&text) > self.config.max_tokens {
                for part in split_oversize(
                    &lines,
                    candidate.start,
                    end,
                    self.config.max_tokens,
                    self.config.split_overlap_tokens,
                ) {
                    spans.push((part, candidate.symbol.clone()));
                }
            } else {
                spans.push((
                    Span {
                        start: candidate.start,
                        end,
                        content: text,
                    },
                    candidate.symbol,
                ));
            }
        }
        spans
    }
}

/// Walk the tree collecting boundary nodes without descending into them
fn collect_candidates(
    node: Node,
    source: &[u8],
    extractor: &dyn LanguageExtractor,
    out: &mut Vec<Candidate>,
) {
    if extractor.is_boundary(node, source) {
        let span = extractor.span_node(node);
        out.push(Candidate {
            start: leading_comment_row(span, extractor),
            end: last_row(span),
            symbol: extractor.extract_name(node, source),
        });
        return;
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_candidates(child, source, extractor, out);
    }
}

/// First row of the comment block directly above `node`, or its own row
fn leading_comment_row(node: Node, extractor: &dyn LanguageExtractor) -> usize {
    let mut start = node.start_position().row;
    let mut prev = node.prev_named_sibling();
    while let Some(sibling) = prev {
        if !extractor.is_comment(sibling) || last_row(sibling) + 1 < start {
            break;
        }
        start = sibling.start_position().row;
        prev = sibling.prev_named_sibling();
    }
    start
}

/// Last row a node actually occupies
fn last_row(node: Node) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

/// Sort by position and fold candidates that share lines into one, so every
/// chunk has a distinct line range
fn merge_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (c.start, c.end));
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match merged.last_mut() {
            Some(last) if candidate.start <= last.end => {
                last.end = last.end.max(candidate.end);
            }
            _ => merged.push(candidate),
        }
    }
    merged
}

fn is_comment_only(root: Node, extractor: &dyn LanguageExtractor) -> bool {
    let mut cursor = root.walk();
    let all_comments = root
        .named_children(&mut cursor)
        .all(|child| extractor.is_comment(child));
    all_comments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ContentType;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn chunker() -> SemanticChunker {
        SemanticChunker::new(ChunkerConfig::default())
    }

    #[test]
    fn test_chunk_rust_code() {
        let source = r#"use std::fmt;

/// A point in space
#[derive(Debug)]
pub struct Point {
    x: i32,
    y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

fn distance(a: &Point, b: &Point) -> f64 {
    (((a.x - b.x).pow(2) + (a.y - b.y).pow(2)) as f64).sqrt()
}
"#;
        let chunks = chunker().chunk("src/point.rs", Language::Rust, source);

        let summary: Vec<_> = chunks
            .iter()
            .map(|c| (c.line_range, c.symbol.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ((3, 8), "Point".to_string()),
                ((10, 14), "Point".to_string()),
                ((16, 18), "distance".to_string()),
            ]
        );
        assert!(chunks[0].content.starts_with("/// A point in space"));
        assert!(chunks.iter().all(|c| c.kind == ContentType::Code));
        assert!(chunks.iter().all(|c| c.language == "rust"));
    }

    #[test]
    fn test_function_body_is_one_unit() {
        let source = "def outer():\n    def inner():\n        return 1\n    return inner()\n\n\nclass Shape:\n    def area(self):\n        return 0\n";
        let chunks = chunker().chunk("shapes.py", Language::Python, source);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].line_range, (1, 4));
        assert_eq!(chunks[1].symbol.as_deref(), Some("Shape"));
    }

    #[test]
    fn test_typescript_export_with_docstring() {
        let source = r#"import { db } from "./db";

/**
 * Look up a user record by its identifier.
 */
export async function getUserById(id: string): Promise<User> {
  return db.users.find(id);
}
"#;
        let chunks = chunker().chunk("src/users.ts", Language::TypeScript, source);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range, (3, 8));
        assert!(chunks[0].content.starts_with("/**"));
        assert!(chunks[0].content.contains("export async function getUserById"));
        assert_eq!(chunks[0].symbol.as_deref(), Some("getUserById"));
    }

    #[test]
    fn test_comment_only_file_yields_nothing() {
        let source = "// just a note about this module\n// and another line of commentary\n";
        assert!(chunker().chunk("notes.rs", Language::Rust, source).is_empty());
        assert!(chunker().chunk("empty.ts", Language::TypeScript, "\n\n   \n").is_empty());
    }

    #[test]
    fn test_no_definitions_falls_back_to_windows() {
        let source = "console.log('starting the application now');\nmain();\n";
        let chunks = chunker().chunk("run.js", Language::JavaScript, source);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range, (1, 2));
        assert_eq!(chunks[0].symbol, None);
    }

    #[test]
    fn test_unsupported_language_uses_windows() {
        let source = "package main\n\nfunc main() {\n\tfmt.Println(\"hello from go\")\n}\n";
        let chunks = chunker().chunk("main.go", Language::Go, source);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range, (1, 5));
        assert_eq!(chunks[0].language, "go");
    }

    #[test]
    fn test_sliding_strategy_ignores_syntax() {
        let source = "fn first() {\n    println!(\"one\");\n}\n\nfn second() {\n    println!(\"two\");\n}\n";
        let mut sliding =
            SemanticChunker::new(ChunkerConfig::default().with_strategy(ChunkStrategy::Sliding));
        let chunks = sliding.chunk("lib.rs", Language::Rust, source);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_range, (1, 7));
    }

    #[test]
    fn test_oversized_function_is_split() {
        let mut source = String::from("fn huge() {\n");
        for i in 0..400 {
            source.push_str(&format!("    let value_{i} = compute_something({i});\n"));
        }
        source.push_str("}\n");

        let chunks = chunker().chunk("huge.rs", Language::Rust, &source);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].line_range.0, 1);
        assert_eq!(chunks.last().unwrap().line_range.1, 402);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].line_range.0, pair[0].line_range.1 + 1);
        }
        for chunk in &chunks {
            assert!(chunk.estimated_tokens() <= 500);
            assert_eq!(chunk.symbol.as_deref(), Some("huge"));
        }
    }

    #[test]
    fn test_markdown_sections() {
        let source = "# Guide\nIntro paragraph for the guide.\n## Install\nRun the installer script first.\n";
        let chunks = chunker().chunk("docs/guide.md", Language::Markdown, source);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].line_range, (3, 4));
        assert_eq!(chunks[1].symbol.as_deref(), Some("Install"));
        assert_eq!(chunks[1].kind, ContentType::Docs);
        assert_eq!(chunks[1].language, "markdown");
    }

    #[test]
    fn test_short_fragments_dropped() {
        let source = "fn a() {}\n\nfn documented_function_with_body() {\n    let x = 1;\n}\n";
        let chunks = chunker().chunk("a.rs", Language::Rust, source);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbol.as_deref(), Some("documented_function_with_body"));
    }

    #[test]
    fn test_chunk_ids_unique_within_file() {
        let source = "class A:\n    pass\nclass B:\n    pass\nclass C:\n    x = 'a longer body here'\n";
        let chunks = chunker().chunk("m.py", Language::Python, source);
        let mut ids: Vec<_> = chunks.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_chunking_is_deterministic(body in "[a-z_ ]{0,40}", count in 1usize..20) {
            let mut source = String::new();
            for i in 0..count {
                source.push_str(&format!("fn f{i}() {{\n    // {body}\n    let v = {i};\n}}\n\n"));
            }
            let first = chunker().chunk("p.rs", Language::Rust, &source);
            let second = chunker().chunk("p.rs", Language::Rust, &source);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_windows_leave_no_gaps(lines in proptest::collection::vec("[a-z]{20,60}", 1..300)) {
            let source = lines.join("\n");
            let chunks = chunker().chunk("data.go", Language::Go, &source);
            prop_assert!(!chunks.is_empty());
            prop_assert_eq!(chunks[0].line_range.0, 1);
            prop_assert_eq!(chunks.last().unwrap().line_range.1, lines.len());
            for pair in chunks.windows(2) {
                prop_assert!(pair[1].line_range.0 <= pair[0].line_range.1 + 1);
            }
        }
    }
}
