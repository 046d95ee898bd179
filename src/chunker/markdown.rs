use super::window::{split_oversize, Span};
use super::{estimate_tokens, ChunkerConfig};

/// A heading-delimited section of a prose document
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub span: Span,
    pub heading: Option<String>,
}

/// Split markdown or plain text at level 1-3 headings.
///
/// A section runs from its heading to the line before the next level 1-3
/// heading of any level, so sections never overlap: a `#` section ends where
/// its first `##` child begins and does not contain it. Text before the first
/// heading is a section of its own. Headings inside fenced code blocks are
/// ignored.
pub fn sections(content: &str, config: &ChunkerConfig) -> Vec<Section> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut starts: Vec<(usize, Option<String>)> = Vec::new();
    let mut fence: Option<&str> = None;
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if let Some(open) = fence {
            if trimmed.starts_with(open) {
                fence = None;
            }
            continue;
        }
        if trimmed.starts_with("```") {
            fence = Some("```");
            continue;
        }
        if trimmed.starts_with("~~~") {
            fence = Some("~~~");
            continue;
        }
        if let Some(title) = heading_title(line) {
            starts.push((idx, Some(title)));
        }
    }

    if starts.first().map_or(true, |(idx, _)| *idx > 0) {
        starts.insert(0, (0, None));
    }

    let mut out = Vec::new();
    for (pos, (start, heading)) in starts.iter().enumerate() {
        let end = starts
            .get(pos + 1)
            .map(|(next, _)| next - 1)
            .unwrap_or(lines.len() - 1);
        let content = lines[*start..=end].join("\n");

        if estimate_tokens(&content) > config.max_tokens {
            for span in split_oversize(
                &lines,
                *start,
                end,
                config.max_tokens,
                config.split_overlap_tokens,
            ) {
                out.push(Section {
                    span,
                    heading: heading.clone(),
                });
            }
        } else {
            out.push(Section {
                span: Span {
                    start: *start,
                    end,
                    content,
                },
                heading: heading.clone(),
            });
        }
    }
    out
}

/// Title of an ATX heading of level 1-3, if the line is one
fn heading_title(line: &str) -> Option<String> {
    // Four or more leading spaces make an indented code block
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = line.trim_start();
    let level = rest.chars().take_while(|c| *c == '#').count();
    if !(1..=3).contains(&level) {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim();
    Some(title.to_string())
}
