//! Balanced-block extraction
//!
//! Every block-structured construct of the test DSL (`@test`, `@context`,
//! `Box { ... }`, `registers { ... }`, box lists `[ ... ]`) is located with
//! the helpers in this module.
//!
//! Delimiters inside `"..."` string literals, `// line` comments and
//! `/* block */` comments are skipped, so a byte-string literal holding a
//! brace does not desynchronise the parser.

/// Extract the body of a brace-delimited block.
///
/// Skips whitespace from `start`; the next character must be `{`.
/// Returns the text strictly between the outer braces and the byte offset
/// just past the matching `}`. Returns `None` when no opening brace is found
/// or the input ends before the block is closed.
pub fn extract_balanced_braces(source: &str, start: usize) -> Option<(String, usize)> {
    let open = skip_whitespace(source, start);
    let close = find_matching_delimiter(source, open, b'{', b'}')?;
    Some((source[open + 1..close].to_string(), close + 1))
}

/// Same as [`extract_balanced_braces`] for a `[ ... ]` list.
pub fn extract_balanced_brackets(source: &str, start: usize) -> Option<(String, usize)> {
    let open = skip_whitespace(source, start);
    let close = find_matching_delimiter(source, open, b'[', b']')?;
    Some((source[open + 1..close].to_string(), close + 1))
}

/// Offset of the first non-whitespace byte at or after `start`.
pub fn skip_whitespace(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let mut pos = start;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Find the offset of the delimiter closing the one at `open_pos`.
pub fn find_matching_delimiter(source: &str, open_pos: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_pos) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    let mut i = open_pos;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => i = skip_string(bytes, i)?,
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i)?,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Nesting depth of `{}`, `[]` and `()` at every byte offset of `source`.
///
/// Entry `i` is the depth *before* byte `i` is consumed. Bytes inside
/// strings and comments report the depth of their enclosing region.
pub fn depth_map(source: &str) -> Vec<usize> {
    let bytes = source.as_bytes();
    let mut depths = vec![0usize; bytes.len() + 1];
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        depths[i] = depth;
        let skip_to = match bytes[i] {
            b'"' => skip_string(bytes, i).unwrap_or(bytes.len() - 1),
            b'/' if bytes.get(i + 1) == Some(&b'/') => skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                skip_block_comment(bytes, i).unwrap_or(bytes.len() - 1)
            }
            b'{' | b'[' | b'(' => {
                depth += 1;
                i
            }
            b'}' | b']' | b')' => {
                depth = depth.saturating_sub(1);
                i
            }
            _ => i,
        };
        for d in depths.iter_mut().take(skip_to.min(bytes.len() - 1) + 1).skip(i + 1) {
            *d = depth;
        }
        i = skip_to + 1;
    }
    depths[bytes.len()] = depth;
    depths
}

/// Split `source` on `separator` occurring at nesting depth zero.
pub fn split_top_level(source: &str, separator: u8) -> Vec<&str> {
    let depths = depth_map(source);
    let mut parts = Vec::new();
    let mut last = 0;
    for (i, &b) in source.as_bytes().iter().enumerate() {
        if b == separator && depths[i] == 0 && !in_literal(source, i) {
            parts.push(&source[last..i]);
            last = i + 1;
        }
    }
    parts.push(&source[last..]);
    parts
}

/// 1-based (line, column) of a byte offset; columns count characters.
pub fn position_at(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

fn floor_char_boundary(source: &str, mut offset: usize) -> usize {
    while offset > 0 && !source.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// True when byte `offset` lies inside a string literal or comment.
pub fn in_literal(source: &str, offset: usize) -> bool {
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() && i <= offset {
        let end = match bytes[i] {
            b'"' => skip_string(bytes, i).unwrap_or(bytes.len()),
            b'/' if bytes.get(i + 1) == Some(&b'/') => skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                skip_block_comment(bytes, i).unwrap_or(bytes.len())
            }
            _ => {
                i += 1;
                continue;
            }
        };
        if offset > i && offset <= end {
            return true;
        }
        if offset == i {
            return true;
        }
        i = end + 1;
    }
    false
}

// ── Literal skipping ──────────────────────────────────────

/// Index of the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Index of the newline ending the comment (or the last byte).
fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i.min(bytes.len().saturating_sub(1))
}

/// Index of the `/` closing the comment starting at `start`.
fn skip_block_comment(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_nested_block() {
        let (body, end) = extract_balanced_braces("{a{b}c}", 0).unwrap();
        assert_eq!(body, "a{b}c");
        assert_eq!(end, 7);
    }

    #[test]
    fn test_extract_unterminated_block() {
        assert!(extract_balanced_braces("{a{b}c", 0).is_none());
    }

    #[test]
    fn test_extract_skips_leading_whitespace() {
        let src = "@test \"x\"   \n  { body }";
        let (body, end) = extract_balanced_braces(src, 9).unwrap();
        assert_eq!(body, " body ");
        assert_eq!(end, src.len());
    }

    #[test]
    fn test_extract_requires_opening_brace() {
        assert!(extract_balanced_braces("  x { }", 0).is_none());
        assert!(extract_balanced_braces("", 0).is_none());
        assert!(extract_balanced_braces("{}", 10).is_none());
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let src = r#"{ R4 = "}{" value = 1L }"#;
        let (body, end) = extract_balanced_braces(src, 0).unwrap();
        assert_eq!(body, r#" R4 = "}{" value = 1L "#);
        assert_eq!(end, src.len());
    }

    #[test]
    fn test_braces_inside_comments_are_ignored() {
        let src = "{ a // }\n /* } */ b }";
        let (body, _) = extract_balanced_braces(src, 0).unwrap();
        assert_eq!(body, " a // }\n /* } */ b ");
    }

    #[test]
    fn test_extract_brackets() {
        let (body, end) = extract_balanced_brackets("[SELF, Box { value = 1L }] rest", 0).unwrap();
        assert_eq!(body, "SELF, Box { value = 1L }");
        assert_eq!(end, 26);
    }

    #[test]
    fn test_split_top_level_respects_nesting() {
        let parts = split_top_level("SELF, Box { a = [1, 2] }, \"x,y\"", b',');
        assert_eq!(parts, vec!["SELF", " Box { a = [1, 2] }", " \"x,y\""]);
    }

    #[test]
    fn test_depth_map() {
        let depths = depth_map("a{b[c]}d");
        assert_eq!(depths[0], 0);
        assert_eq!(depths[2], 1);
        assert_eq!(depths[4], 2);
        assert_eq!(depths[7], 0);
    }

    #[test]
    fn test_position_at() {
        let src = "line one\nline two\n  third";
        assert_eq!(position_at(src, 0), (1, 1));
        assert_eq!(position_at(src, 9), (2, 1));
        assert_eq!(position_at(src, 20), (3, 3));
    }

    #[test]
    fn test_in_literal() {
        let src = r#"a "b{" // c"#;
        assert!(!in_literal(src, 0));
        assert!(in_literal(src, 4));
        assert!(in_literal(src, 10));
    }
}
