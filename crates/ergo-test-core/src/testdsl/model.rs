//! Test DSL data model
//!
//! Every type here is built once by the parser and never mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Register literal, typed from its spelling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RegisterValue {
    Int(i32),
    Long(i64),
    Boolean(bool),
    /// `0x`-prefixed hex
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    /// Quoted text
    Str(String),
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockToken {
    pub id: String,
    pub amount: i64,
}

/// A simulated UTXO
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockBox {
    pub id: Option<String>,
    pub value: i64,
    pub proposition_bytes: Option<String>,
    pub tokens: Vec<MockToken>,
    /// Register name (`R4`..`R9`) to value
    pub registers: BTreeMap<String, RegisterValue>,
    pub creation_height: Option<i32>,
}

/// Pre-header fields; absent ones take the builder defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockPreHeader {
    pub version: Option<u8>,
    pub timestamp: Option<i64>,
    pub n_bits: Option<i64>,
    pub height: Option<i32>,
    pub parent_id: Option<String>,
    pub miner_pk: Option<String>,
}

/// Declarative transaction state for one test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockContext {
    pub height: i64,
    #[serde(rename = "self")]
    pub self_box: MockBox,
    pub inputs: Vec<MockBox>,
    /// Position in `inputs` where `SELF` was declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_index: Option<usize>,
    pub outputs: Vec<MockBox>,
    pub data_inputs: Vec<MockBox>,
    pub pre_header: Option<MockPreHeader>,
}

impl MockContext {
    /// Context for tests without an `@context` block: a zero-value self box
    /// as the only input.
    pub fn degenerate(height: i64) -> Self {
        let self_box = MockBox::default();
        MockContext {
            height,
            inputs: vec![self_box.clone()],
            self_index: Some(0),
            self_box,
            outputs: Vec::new(),
            data_inputs: Vec::new(),
            pre_header: None,
        }
    }
}

impl Default for MockContext {
    fn default() -> Self {
        MockContext::degenerate(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionType {
    /// `expr == expected` (also `===`)
    Equals,
    /// `expr != expected`
    NotEquals,
    /// bare `@assert expr`
    Provable,
    /// bare `@refute expr`
    NotProvable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAssertion {
    pub description: Option<String>,
    /// Raw source text of the asserted expression
    pub expression: String,
    pub assertion_type: AssertionType,
    pub expected: Option<String>,
    /// 1-based position of `expression` in the test file
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub name: String,
    pub context: MockContext,
    pub assertions: Vec<TestAssertion>,
    /// 1-based position of the `@test` marker
    pub line: usize,
    pub column: usize,
}

/// A test (or fixture, when `test` is `None`) that could not be parsed
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub test: Option<String>,
    pub error: Error,
}

/// Everything recovered from one source file
#[derive(Debug, Clone, Default)]
pub struct ParsedTests {
    pub tests: Vec<TestDefinition>,
    pub errors: Vec<ParseFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_context_has_self_as_only_input() {
        let ctx = MockContext::degenerate(0);
        assert_eq!(ctx.height, 0);
        assert_eq!(ctx.inputs, vec![ctx.self_box.clone()]);
        assert_eq!(ctx.self_index, Some(0));
        assert!(ctx.outputs.is_empty());
    }

    #[test]
    fn test_register_value_json_shape() {
        let json = serde_json::to_value(RegisterValue::Bytes(vec![0xca, 0xfe])).unwrap();
        assert_eq!(json, serde_json::json!({"type": "bytes", "value": "cafe"}));
        let back: RegisterValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, RegisterValue::Bytes(vec![0xca, 0xfe]));
    }
}
