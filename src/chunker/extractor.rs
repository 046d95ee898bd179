use crate::file::Language;
use tree_sitter::Node;

/// Language-specific knowledge of which syntax nodes form retrievable units.
///
/// Each language lists its "semantic boundary" node kinds (functions,
/// classes, interfaces, type aliases, structs, enums, traits, impls). The
/// chunker stops descending at a boundary so a definition is one unit.
pub trait LanguageExtractor: Send + Sync {
    /// Node kinds that start a chunk
    fn boundary_types(&self) -> &[&'static str];

    /// Node kinds that count as comments attached to the following node
    fn comment_types(&self) -> &[&'static str];

    /// Extract the defined name, if the node has one
    fn extract_name(&self, node: Node, source: &[u8]) -> Option<String> {
        node_text(node.child_by_field_name("name")?, source)
    }

    fn is_boundary(&self, node: Node, _source: &[u8]) -> bool {
        self.boundary_types().contains(&node.kind())
    }

    fn is_comment(&self, node: Node) -> bool {
        self.comment_types().contains(&node.kind())
    }

    /// Node whose extent forms the chunk (e.g. the surrounding `export`)
    fn span_node<'a>(&self, node: Node<'a>) -> Node<'a> {
        node
    }
}

/// Get the appropriate extractor for a language
pub fn get_extractor(language: Language) -> Option<Box<dyn LanguageExtractor>> {
    match language {
        Language::Rust => Some(Box::new(RustExtractor)),
        Language::Python => Some(Box::new(PythonExtractor)),
        Language::JavaScript | Language::TypeScript => Some(Box::new(TypeScriptExtractor)),
        _ => None,
    }
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(String::from)
}

pub struct RustExtractor;

impl LanguageExtractor for RustExtractor {
    fn boundary_types(&self) -> &[&'static str] {
        &[
            "function_item",
            "struct_item",
            "enum_item",
            "union_item",
            "impl_item",
            "trait_item",
            "type_item",
            "macro_definition",
        ]
    }

    fn comment_types(&self) -> &[&'static str] {
        // Attributes travel with the item they decorate
        &["line_comment", "block_comment", "attribute_item"]
    }

    fn extract_name(&self, node: Node, source: &[u8]) -> Option<String> {
        if node.kind() == "impl_item" {
            let ty = node_text(node.child_by_field_name("type")?, source)?;
            return match node.child_by_field_name("trait") {
                Some(tr) => Some(format!("{} for {}", node_text(tr, source)?, ty)),
                None => Some(ty),
            };
        }
        node_text(node.child_by_field_name("name")?, source)
    }
}

pub struct PythonExtractor;

impl LanguageExtractor for PythonExtractor {
    fn boundary_types(&self) -> &[&'static str] {
        &["function_definition", "class_definition", "decorated_definition"]
    }

    fn comment_types(&self) -> &[&'static str] {
        &["comment"]
    }

    fn extract_name(&self, node: Node, source: &[u8]) -> Option<String> {
        if node.kind() == "decorated_definition" {
            let inner = node.child_by_field_name("definition")?;
            return node_text(inner.child_by_field_name("name")?, source);
        }
        node_text(node.child_by_field_name("name")?, source)
    }
}

/// Shared by JavaScript and TypeScript (the TSX grammar parses both)
pub struct TypeScriptExtractor;

impl TypeScriptExtractor {
    /// `const handler = () => {}` and friends
    fn declarator_function<'a>(node: Node<'a>) -> Option<Node<'a>> {
        let mut cursor = node.walk();
        let found = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
            .find(|decl| {
                decl.child_by_field_name("value").is_some_and(|v| {
                    matches!(
                        v.kind(),
                        "arrow_function" | "function_expression" | "function" | "class"
                    )
                })
            });
        found
    }
}

impl LanguageExtractor for TypeScriptExtractor {
    fn boundary_types(&self) -> &[&'static str] {
        &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "abstract_class_declaration",
            "interface_declaration",
            "type_alias_declaration",
            "enum_declaration",
            "method_definition",
        ]
    }

    fn comment_types(&self) -> &[&'static str] {
        &["comment"]
    }

    fn is_boundary(&self, node: Node, _source: &[u8]) -> bool {
        if self.boundary_types().contains(&node.kind()) {
            return true;
        }
        matches!(node.kind(), "lexical_declaration" | "variable_declaration")
            && Self::declarator_function(node).is_some()
    }

    fn extract_name(&self, node: Node, source: &[u8]) -> Option<String> {
        if matches!(node.kind(), "lexical_declaration" | "variable_declaration") {
            let decl = Self::declarator_function(node)?;
            return node_text(decl.child_by_field_name("name")?, source);
        }
        node_text(node.child_by_field_name("name")?, source)
    }

    fn span_node<'a>(&self, node: Node<'a>) -> Node<'a> {
        match node.parent() {
            Some(parent) if parent.kind() == "export_statement" => parent,
            _ => node,
        }
    }
}
