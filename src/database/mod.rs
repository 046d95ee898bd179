//! Relational schema as a retrieval source.
//!
//! Tables become `schema` chunks with synthetic `database:<table>` paths.
//! Live introspection sits behind [`SchemaSource`]; the crate ships a source
//! that reads `CREATE TABLE` statements from a SQL file.

use crate::chunker::{Chunk, ContentType};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

mod ddl;

pub use ddl::parse_create_tables;

/// Prefix of the synthetic file path given to schema chunks
pub const DATABASE_PATH_PREFIX: &str = "database:";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    /// Remaining column modifiers (`NOT NULL`, `DEFAULT 0`, `REFERENCES ...`)
    pub modifiers: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    /// Table-level constraints (`PRIMARY KEY (..)`, `FOREIGN KEY ..`)
    pub constraints: Vec<String>,
}

impl TableSchema {
    /// Synthetic path used as the chunk's `file_path`
    pub fn chunk_path(&self) -> String {
        format!("{DATABASE_PATH_PREFIX}{}", self.name)
    }

    /// DDL-like rendering used as the chunk content
    pub fn render(&self) -> String {
        let mut out = format!("TABLE {} (\n", self.name);
        let mut entries: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("  {} {}", c.name, c.data_type);
                if !c.modifiers.is_empty() {
                    line.push(' ');
                    line.push_str(&c.modifiers);
                }
                line
            })
            .collect();
        entries.extend(self.constraints.iter().map(|c| format!("  {c}")));
        out.push_str(&entries.join(",\n"));
        out.push_str("\n)");
        out
    }
}

/// Where table definitions (and designated configuration rows) come from
pub trait SchemaSource: Send + Sync {
    fn name(&self) -> &str;

    fn tables(&self) -> Result<Vec<TableSchema>>;

    /// Rendered rows of a configuration table; sources without row access
    /// return nothing
    fn config_rows(&self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Reads `CREATE TABLE` statements from a schema dump
pub struct SqlFileSchemaSource {
    path: PathBuf,
}

impl SqlFileSchemaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SchemaSource for SqlFileSchemaSource {
    fn name(&self) -> &str {
        "sql-file"
    }

    fn tables(&self) -> Result<Vec<TableSchema>> {
        let sql = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::config(format!(
                "cannot read schema file {}: {e}",
                self.path.display()
            ))
        })?;
        let tables = parse_create_tables(&sql);
        debug!("Parsed {} tables from {}", tables.len(), self.path.display());
        Ok(tables)
    }
}

/// One chunk per table; rows of `config_tables` are appended to their table
pub fn schema_chunks(source: &dyn SchemaSource, config_tables: &[String]) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for table in source.tables()? {
        let mut content = table.render();

        if config_tables.iter().any(|t| t.eq_ignore_ascii_case(&table.name)) {
            match source.config_rows(&table.name) {
                Ok(rows) if !rows.is_empty() => {
                    content.push_str("\n\nROWS:\n");
                    content.push_str(&rows.join("\n"));
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping rows of {}: {}", table.name, e),
            }
        }

        let column_count = table.columns.len().max(1);
        chunks.push(Chunk::new(
            table.chunk_path(),
            (1, column_count),
            content,
            "sql",
            ContentType::Schema,
        ));
    }
    Ok(chunks)
}
