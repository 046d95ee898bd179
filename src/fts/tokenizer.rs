/// Natural-language function words plus keywords common to most languages
const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "for", "from", "has", "have",
    "in", "into", "is", "it", "its", "of", "on", "or", "that", "the", "their", "then", "there",
    "these", "this", "those", "to", "was", "were", "will", "with",
    // Code
    "async", "await", "break", "case", "class", "const", "continue", "def", "default", "else",
    "export", "false", "fn", "function", "if", "impl", "import", "let", "mut", "new", "none",
    "null", "pub", "return", "self", "static", "true", "undefined", "use", "var", "void",
    "while",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Tokenize text for keyword indexing and querying.
///
/// Lowercases, splits on anything outside `[A-Za-z0-9_]`, drops one-character
/// tokens and stop words, then re-emits the camelCase / snake_case parts of
/// each identifier after the whole token (`getUserById` gives `getuserbyid`,
/// `get`, `user`, `by`, `id`).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for raw in text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
    {
        let whole = raw.to_ascii_lowercase();
        let whole_kept = whole.trim_matches('_').len() > 1 && !is_stop_word(&whole);
        if !whole_kept {
            continue;
        }

        let parts = split_identifier(raw);
        let compound = parts.len() > 1;
        tokens.push(whole);

        if compound {
            // Identifier-internal words are kept even when they are stop words
            tokens.extend(parts.into_iter().filter(|p| p.len() > 1));
        }
    }

    tokens
}

/// Split an identifier at underscores and case transitions
fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();

    for segment in raw.split('_').filter(|s| !s.is_empty()) {
        let chars: Vec<char> = segment.chars().collect();
        let mut current = String::new();

        for (i, &ch) in chars.iter().enumerate() {
            let boundary = i > 0 && {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                (prev.is_ascii_lowercase() && ch.is_ascii_uppercase())
                    || (prev.is_ascii_uppercase()
                        && ch.is_ascii_uppercase()
                        && next.is_some_and(|n| n.is_ascii_lowercase()))
                    || (prev.is_ascii_alphabetic() && ch.is_ascii_digit())
                    || (prev.is_ascii_digit() && ch.is_ascii_alphabetic())
            };
            if boundary && !current.is_empty() {
                parts.push(current.to_ascii_lowercase());
                current.clear();
            }
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_ascii_lowercase());
        }
    }

    parts
}
