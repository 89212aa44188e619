//! Field scanning and literal parsing for test DSL blocks
//!
//! A block body is a sequence of `key = value` or `key { ... }` fields
//! separated by whitespace, newlines or commas. Only keys at nesting depth
//! zero of the body are fields; anything nested belongs to the field's
//! value.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use super::model::{MockBox, MockPreHeader, MockToken, RegisterValue};
use crate::blocks::{depth_map, find_matching_delimiter, in_literal, skip_whitespace, split_top_level};

/// Failure inside a block body: byte offset relative to the body, message
pub(crate) type FieldError = (usize, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Field<'a> {
    pub key: &'a str,
    pub value: &'a str,
    /// Byte offset of `key` within the body
    pub offset: usize,
    /// Byte offset of `value` within the body
    pub value_offset: usize,
}

fn field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*(=|\{)").expect("field regex must compile")
    })
}

/// Scan the top-level fields of a block body, in order.
pub(crate) fn scan_fields(body: &str) -> Result<Vec<Field<'_>>, FieldError> {
    let depths = depth_map(body);
    let mut fields = Vec::new();
    let mut consumed = 0;

    for caps in field_regex().captures_iter(body) {
        let (Some(whole), Some(key), Some(sep)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let start = whole.start();
        if start < consumed || depths[start] != 0 || in_literal(body, start) {
            continue;
        }
        // `==` is never a field separator
        if sep.as_str() == "=" && body.as_bytes().get(sep.end()) == Some(&b'=') {
            continue;
        }
        let value_start = if sep.as_str() == "{" { sep.start() } else { sep.end() };
        let value_start = skip_whitespace(body, value_start);
        let value_end = value_extent(body, value_start)
            .ok_or_else(|| (start, format!("Unbalanced value for field '{}'", key.as_str())))?;
        fields.push(Field {
            key: key.as_str(),
            value: body[value_start..value_end].trim(),
            offset: start,
            value_offset: value_start,
        });
        consumed = value_end;
    }
    Ok(fields)
}

/// End offset of the value starting at `start`.
fn value_extent(body: &str, start: usize) -> Option<usize> {
    let bytes = body.as_bytes();
    match bytes.get(start)? {
        b'{' => find_matching_delimiter(body, start, b'{', b'}').map(|e| e + 1),
        b'[' => find_matching_delimiter(body, start, b'[', b']').map(|e| e + 1),
        b'"' => {
            let mut i = start + 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => i += 2,
                    b'"' => return Some(i + 1),
                    _ => i += 1,
                }
            }
            None
        }
        _ => {
            let mut end = start;
            while end < bytes.len() && !matches!(bytes[end], b' ' | b'\t' | b'\r' | b'\n' | b',' | b'}' | b']') {
                end += 1;
            }
            // `Box { ... }` and `Token { ... }` carry their block with them
            let word = &body[start..end];
            let next = skip_whitespace(body, end);
            if is_identifier(word) && bytes.get(next) == Some(&b'{') {
                return find_matching_delimiter(body, next, b'{', b'}').map(|e| e + 1);
            }
            Some(end)
        }
    }
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip one pair of enclosing delimiters.
pub(crate) fn inner(text: &str, open: char, close: char) -> Option<&str> {
    text.trim().strip_prefix(open)?.strip_suffix(close)
}

pub(crate) fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    text.strip_prefix('"')?.strip_suffix('"')
}

fn digits(text: &str) -> String {
    text.chars().filter(|c| *c != '_').collect()
}

// ── Literals ──────────────────────────────────────────────

/// Type a literal from its spelling.
///
/// Checked in order: trailing `L`, quoted string, `0x` hex, `true`/`false`,
/// 32-bit integer.
pub fn parse_literal(text: &str) -> Result<RegisterValue, String> {
    let text = text.trim();
    if let Some(n) = text.strip_suffix('L').or_else(|| text.strip_suffix('l')) {
        return digits(n)
            .parse::<i64>()
            .map(RegisterValue::Long)
            .map_err(|_| format!("Invalid Long literal '{}'", text));
    }
    if let Some(s) = unquote(text) {
        return Ok(RegisterValue::Str(s.to_string()));
    }
    if let Some(h) = text.strip_prefix("0x") {
        return hex::decode(h)
            .map(RegisterValue::Bytes)
            .map_err(|e| format!("Invalid hex literal '{}': {}", text, e));
    }
    match text {
        "true" => return Ok(RegisterValue::Boolean(true)),
        "false" => return Ok(RegisterValue::Boolean(false)),
        _ => {}
    }
    match digits(text).parse::<i64>() {
        Ok(n) => i32::try_from(n)
            .map(RegisterValue::Int)
            .map_err(|_| format!("Int literal '{}' out of range; add an L suffix for a Long", text)),
        Err(_) => Err(format!("Unrecognised literal '{}'", text)),
    }
}

/// Integer field value; `L` suffix optional.
pub(crate) fn parse_i64(text: &str) -> Result<i64, String> {
    let t = text.trim();
    let t = t.strip_suffix('L').or_else(|| t.strip_suffix('l')).unwrap_or(t);
    digits(t)
        .parse::<i64>()
        .map_err(|_| format!("Expected an integer, found '{}'", text.trim()))
}

fn parse_i32(text: &str) -> Result<i32, String> {
    let n = parse_i64(text)?;
    i32::try_from(n).map_err(|_| format!("Integer '{}' out of Int range", text.trim()))
}

fn parse_string(text: &str) -> Result<String, String> {
    unquote(text)
        .map(str::to_string)
        .ok_or_else(|| format!("Expected a quoted string, found '{}'", text.trim()))
}

// ── Boxes ─────────────────────────────────────────────────

/// Named box literals declared with `@fixture`
pub(crate) type Fixtures = BTreeMap<String, MockBox>;

/// Body of a `Box { ... }` literal, or `None` if `text` is not one.
pub(crate) fn box_body(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix("Box")?;
    inner(rest, '{', '}')
}

/// Parse a `Box { ... }` literal.
pub(crate) fn parse_box(text: &str) -> Result<MockBox, FieldError> {
    let body = box_body(text).ok_or_else(|| (0, format!("Expected a Box literal, found '{}'", text.trim())))?;
    let body_offset = text.find('{').map(|i| i + 1).unwrap_or(0);
    let shift = |(offset, message): FieldError| (offset + body_offset, message);

    let mut b = MockBox::default();
    for field in scan_fields(body).map_err(shift)? {
        let at = |message: String| (field.offset + body_offset, message);
        match field.key {
            "value" => b.value = parse_i64(field.value).map_err(at)?,
            "id" => b.id = Some(parse_string(field.value).map_err(at)?),
            "propositionBytes" => b.proposition_bytes = Some(parse_string(field.value).map_err(at)?),
            "creationHeight" => b.creation_height = Some(parse_i32(field.value).map_err(at)?),
            "registers" => {
                let regs = inner(field.value, '{', '}')
                    .ok_or_else(|| at("registers must be a { ... } block".into()))?;
                let regs_offset = body_offset + field.value_offset + 1;
                for reg in scan_fields(regs).map_err(|(o, m)| (o + regs_offset, m))? {
                    let value = parse_literal(reg.value).map_err(|m| (regs_offset + reg.offset, m))?;
                    b.registers.insert(reg.key.to_string(), value);
                }
            }
            "tokens" => {
                let list = inner(field.value, '[', ']')
                    .ok_or_else(|| at("tokens must be a [ ... ] list".into()))?;
                for item in split_top_level(list, b',').into_iter().filter(|s| !s.trim().is_empty()) {
                    b.tokens.push(parse_token(item).map_err(at)?);
                }
            }
            other => return Err(at(format!("Unknown Box field '{}'", other))),
        }
    }
    Ok(b)
}

fn parse_token(text: &str) -> Result<MockToken, String> {
    let body = text
        .trim()
        .strip_prefix("Token")
        .and_then(|rest| inner(rest, '{', '}'))
        .ok_or_else(|| format!("Expected a Token literal, found '{}'", text.trim()))?;
    let mut id = None;
    let mut amount = None;
    for field in scan_fields(body).map_err(|(_, m)| m)? {
        match field.key {
            "id" => id = Some(parse_string(field.value)?),
            "amount" => amount = Some(parse_i64(field.value)?),
            other => return Err(format!("Unknown Token field '{}'", other)),
        }
    }
    Ok(MockToken {
        id: id.ok_or("Token is missing an id")?,
        amount: amount.ok_or("Token is missing an amount")?,
    })
}

/// One entry of a box list: a literal, `SELF` or a fixture name. Error
/// offsets are relative to `text`.
fn parse_box_ref(text: &str, self_box: &MockBox, fixtures: &Fixtures) -> Result<MockBox, FieldError> {
    let lead = text.len() - text.trim_start().len();
    let t = text.trim();
    if t == "SELF" {
        return Ok(self_box.clone());
    }
    if let Some(b) = fixtures.get(t) {
        return Ok(b.clone());
    }
    if is_identifier(t) {
        return Err((lead, format!("Unknown fixture '{}'", t)));
    }
    parse_box(t).map_err(|(o, m)| (lead + o, m))
}

/// A parsed box list and the positions that named `SELF`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BoxList {
    pub boxes: Vec<MockBox>,
    pub self_at: Vec<usize>,
}

/// Parse a box list.
///
/// `SELF` entries are replaced by `self_box` and their positions recorded,
/// so `[SELF]` alone is the resolved self box.
pub(crate) fn parse_box_list(text: &str, self_box: &MockBox, fixtures: &Fixtures) -> Result<BoxList, FieldError> {
    let list = inner(text, '[', ']').ok_or_else(|| (0, format!("Expected a [ ... ] box list, found '{}'", text.trim())))?;
    let mut item_offset = text.len() - text.trim_start().len() + 1;
    let mut out = BoxList::default();
    for item in split_top_level(list, b',') {
        let at = item_offset;
        item_offset += item.len() + 1;
        if item.trim().is_empty() {
            continue;
        }
        if item.trim() == "SELF" {
            out.self_at.push(out.boxes.len());
        }
        out.boxes
            .push(parse_box_ref(item, self_box, fixtures).map_err(|(o, m)| (at + o, m))?);
    }
    Ok(out)
}

/// Resolve a single box reference (used for `SELF = ...`).
pub(crate) fn parse_single_box(text: &str, fixtures: &Fixtures) -> Result<MockBox, FieldError> {
    parse_box_ref(text, &MockBox::default(), fixtures)
}

pub(crate) fn parse_pre_header(body: &str) -> Result<MockPreHeader, String> {
    let mut h = MockPreHeader::default();
    for field in scan_fields(body).map_err(|(_, m)| m)? {
        match field.key {
            "version" => {
                h.version = Some(
                    u8::try_from(parse_i64(field.value)?).map_err(|_| "version must fit in a byte".to_string())?,
                )
            }
            "timestamp" => h.timestamp = Some(parse_i64(field.value)?),
            "nBits" => h.n_bits = Some(parse_i64(field.value)?),
            "height" => h.height = Some(parse_i32(field.value)?),
            "parentId" => h.parent_id = Some(parse_string(field.value)?),
            "minerPk" => h.miner_pk = Some(parse_string(field.value)?),
            other => return Err(format!("Unknown PRE_HEADER field '{}'", other)),
        }
    }
    Ok(h)
}
