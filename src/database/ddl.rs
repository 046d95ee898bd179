use super::{ColumnSchema, TableSchema};

const CONSTRAINT_KEYWORDS: &[&str] = &[
    "PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT", "INDEX", "KEY", "EXCLUDE",
];

/// Extract table definitions from `CREATE TABLE` statements.
///
/// Handles `IF NOT EXISTS`, quoted and schema-qualified names, nested
/// parentheses in types and defaults, and `--` line comments. Anything that
/// is not a `CREATE TABLE` statement is ignored.
pub fn parse_create_tables(sql: &str) -> Vec<TableSchema> {
    let sql = strip_line_comments(sql);
    let upper = sql.to_ascii_uppercase();
    let mut tables = Vec::new();
    let mut search_from = 0;

    while let Some(found) = upper[search_from..].find("CREATE") {
        let stmt_start = search_from + found;
        search_from = stmt_start + "CREATE".len();

        let Some((name, body_start)) = table_header(&sql, &upper, search_from) else {
            continue;
        };
        let Some(body_end) = matching_paren(&sql, body_start) else {
            break;
        };

        let body = &sql[body_start + 1..body_end];
        let mut table = TableSchema {
            name,
            columns: Vec::new(),
            constraints: Vec::new(),
        };
        for entry in split_top_level(body) {
            let entry = normalize_ws(&entry);
            if entry.is_empty() {
                continue;
            }
            let first = entry
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_uppercase();
            if CONSTRAINT_KEYWORDS.contains(&first.as_str()) {
                table.constraints.push(entry);
            } else {
                table.columns.push(parse_column(&entry));
            }
        }
        tables.push(table);
        search_from = body_end + 1;
    }

    tables
}

/// After `CREATE`, expect `[TEMP] TABLE [IF NOT EXISTS] name (`.
/// Returns the unquoted table name and the byte offset of `(`.
fn table_header(sql: &str, upper: &str, from: usize) -> Option<(String, usize)> {
    let rest_upper = &upper[from..];
    let trimmed = rest_upper.trim_start();
    let mut offset = from + (rest_upper.len() - trimmed.len());

    for prefix in ["TEMPORARY ", "TEMP ", "UNLOGGED "] {
        if upper[offset..].starts_with(prefix) {
            offset += prefix.len();
            offset += upper[offset..].len() - upper[offset..].trim_start().len();
        }
    }
    if !upper[offset..].starts_with("TABLE") {
        return None;
    }
    offset += "TABLE".len();
    offset += upper[offset..].len() - upper[offset..].trim_start().len();

    if upper[offset..].starts_with("IF NOT EXISTS") {
        offset += "IF NOT EXISTS".len();
        offset += upper[offset..].len() - upper[offset..].trim_start().len();
    }

    let paren = offset + sql[offset..].find('(')?;
    let raw_name = sql[offset..paren].trim();
    if raw_name.is_empty() || raw_name.contains(';') {
        return None;
    }
    let name = raw_name
        .rsplit('.')
        .next()
        .unwrap_or(raw_name)
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string();
    Some((name, paren))
}

fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;
    for (idx, ch) in sql[open..].char_indices() {
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => in_quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote: Option<char> = None;

    for ch in body.chars() {
        if let Some(q) = in_quote {
            if ch == q {
                in_quote = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                in_quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn parse_column(entry: &str) -> ColumnSchema {
    let (name, rest) = entry.split_once(' ').unwrap_or((entry, ""));
    let name = name
        .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string();

    // The type runs to the first space outside parentheses
    let mut depth = 0usize;
    let mut type_end = rest.len();
    for (idx, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ' ' if depth == 0 => {
                type_end = idx;
                break;
            }
            _ => {}
        }
    }

    ColumnSchema {
        name,
        data_type: rest[..type_end].to_string(),
        modifiers: rest[type_end..].trim().to_string(),
    }
}

fn strip_line_comments(sql: &str) -> String {
    sql.lines()
        .map(|line| match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_two_tables() {
        let sql = r#"
-- users of the system
CREATE TABLE IF NOT EXISTS public.users (
    id SERIAL PRIMARY KEY,
    email VARCHAR(255) NOT NULL UNIQUE, -- login
    created_at TIMESTAMP DEFAULT now()
);

CREATE INDEX users_email ON users (email);

create table "orders" (
    id INTEGER,
    user_id INTEGER REFERENCES users(id),
    total NUMERIC(10, 2),
    PRIMARY KEY (id),
    FOREIGN KEY (user_id) REFERENCES users (id)
);
"#;
        let tables = parse_create_tables(sql);
        assert_eq!(tables.len(), 2);

        let users = &tables[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.columns.len(), 3);
        assert_eq!(users.columns[1].data_type, "VARCHAR(255)");
        assert_eq!(users.columns[1].modifiers, "NOT NULL UNIQUE");

        let orders = &tables[1];
        assert_eq!(orders.name, "orders");
        assert_eq!(orders.columns.len(), 3);
        assert_eq!(orders.columns[2].data_type, "NUMERIC(10, 2)");
        assert_eq!(orders.constraints.len(), 2);
    }

    #[test]
    fn test_ignores_non_table_statements() {
        let sql = "CREATE VIEW v AS SELECT 1;\nCREATE INDEX i ON t (a);";
        assert!(parse_create_tables(sql).is_empty());
    }
}
