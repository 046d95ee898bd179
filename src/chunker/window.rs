use super::CHARS_PER_TOKEN;

/// A contiguous run of source lines (0-indexed, inclusive) and its text
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub content: String,
}

/// Fixed-size windows over raw lines. Consecutive windows share up to
/// `overlap_tokens` worth of trailing lines, so merged ranges leave no gaps.
pub fn sliding_windows(lines: &[&str], window_tokens: usize, overlap_tokens: usize) -> Vec<Span> {
    let window_chars = window_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let mut spans = Vec::new();
    let mut start = 0;
    while start < lines.len() {
        let end = fill_forward(lines, start, lines.len() - 1, window_chars);
        spans.push(Span {
            start,
            end,
            content: lines[start..=end].join("\n"),
        });
        if end + 1 >= lines.len() {
            break;
        }

        // Back off into the window for the overlap but always move forward
        let mut next = end + 1;
        let mut carried = 0;
        while next > start + 1 {
            let len = line_chars(lines[next - 1]);
            if carried + len > overlap_chars {
                break;
            }
            carried += len;
            next -= 1;
        }
        start = next;
    }
    spans
}

/// Split the lines `start..=end` into parts of at most `max_tokens`.
///
/// Line ranges of the parts are disjoint; every part after the first starts
/// with the trailing ~`overlap_tokens` of the previous part's text.
pub fn split_oversize(
    lines: &[&str],
    start: usize,
    end: usize,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Span> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);
    let end = end.min(lines.len().saturating_sub(1));

    let mut parts: Vec<Span> = Vec::new();
    let mut cursor = start;
    let mut prefix = String::new();
    while cursor <= end && cursor < lines.len() {
        let budget = if prefix.is_empty() {
            max_chars
        } else {
            max_chars.saturating_sub(line_chars(&prefix))
        };
        let part_end = fill_forward(lines, cursor, end, budget);
        let body = lines[cursor..=part_end].join("\n");

        let content = if prefix.is_empty() {
            body
        } else {
            format!("{prefix}\n{body}")
        };
        parts.push(Span {
            start: cursor,
            end: part_end,
            content,
        });

        prefix = overlap_tail(&lines[cursor..=part_end], overlap_chars);
        cursor = part_end + 1;
    }
    parts
}

/// Last line index from `start` whose cumulative size stays within `budget`.
/// Always takes at least one line.
fn fill_forward(lines: &[&str], start: usize, limit: usize, budget: usize) -> usize {
    let mut end = start;
    let mut used = line_chars(lines[start]);
    while end < limit {
        let next = line_chars(lines[end + 1]);
        if used + next > budget {
            break;
        }
        used += next;
        end += 1;
    }
    end
}

/// Trailing text of `lines` within `max_chars`, preferring whole lines
fn overlap_tail(lines: &[&str], max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }

    let mut taken = 0;
    let mut first = lines.len();
    while first > 0 {
        let len = line_chars(lines[first - 1]);
        if taken + len > max_chars {
            break;
        }
        taken += len;
        first -= 1;
    }

    if first < lines.len() {
        return lines[first..].join("\n");
    }

    // Last line alone is too long: take its character tail
    let last = lines.last().copied().unwrap_or("");
    let skip = last.chars().count().saturating_sub(max_chars);
    last.chars().skip(skip).collect()
}

/// Characters in a line including its newline
fn line_chars(line: &str) -> usize {
    line.chars().count() + 1
}
