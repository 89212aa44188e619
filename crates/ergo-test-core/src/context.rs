//! Mock-Context Builder
//!
//! Turns a declarative [`MockContext`] into the [`ExecutionContext`] the
//! evaluator runs against. The builder is pure apart from the default
//! pre-header timestamp, which is the current wall-clock time.
//!
//! # Box identity
//!
//! A box with an explicit 64-hex-digit `id` keeps it. Any other explicit id,
//! or the box content when no id is given, is hashed with Blake2b-256.
//!
//! The self box is the input at [`MockContext::self_index`], the position
//! where `SELF` was declared. Without that marker only an explicit `id`
//! shared by exactly one input identifies it. A content-equal input is never
//! taken for the self box; no match is an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::script::value::GroupElement;
use crate::script::{ErgoTree, Value, DEFAULT_COST_LIMIT, DEFAULT_SCRIPT_VERSION};
use crate::testdsl::{MockBox, MockContext, MockPreHeader, RegisterValue};

/// Difficulty bits used when the test does not give any
pub const DEFAULT_N_BITS: i64 = 117_440_512;

/// Compressed secp256k1 generator, a valid but meaningless miner key
pub const DUMMY_MINER_PK: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

pub fn blake2b256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake2b::<U32>::digest(data));
    out
}

// ── On-chain model ────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId(pub [u8; 32]);

impl BoxId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for BoxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BoxId({})", self.to_hex())
    }
}

/// Concrete box as the evaluator sees it
#[derive(Debug, Clone)]
pub struct ErgoBox {
    pub id: BoxId,
    pub value: i64,
    pub ergo_tree: ErgoTree,
    pub proposition_bytes: Vec<u8>,
    pub creation_height: i32,
    /// Creating transaction id followed by the output index (big-endian u16)
    pub creation_ref: Vec<u8>,
    pub tokens: Vec<(Vec<u8>, i64)>,
    pub registers: BTreeMap<u8, Value>,
}

impl PartialEq for ErgoBox {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendingTransaction {
    pub id: [u8; 32],
    pub inputs: Vec<BoxId>,
    pub data_inputs: Vec<BoxId>,
    pub outputs: Vec<BoxId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreHeader {
    pub version: u8,
    pub parent_id: [u8; 32],
    pub timestamp: i64,
    pub n_bits: i64,
    pub height: i32,
    pub miner_pk: GroupElement,
    pub votes: [u8; 3],
}

/// Everything a guard script can observe while being evaluated
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub height: i32,
    pub self_index: usize,
    pub inputs: Vec<Arc<ErgoBox>>,
    pub outputs: Vec<Arc<ErgoBox>>,
    pub data_inputs: Vec<Arc<ErgoBox>>,
    pub transaction: SpendingTransaction,
    pub pre_header: Arc<PreHeader>,
    pub cost_limit: i64,
    pub script_version: u8,
}

impl ExecutionContext {
    pub fn self_box(&self) -> Option<Arc<ErgoBox>> {
        self.inputs.get(self.self_index).cloned()
    }
}

// ── Builder ───────────────────────────────────────────────

/// Build the execution context for one test.
///
/// `contract` guards the self box; every other box gets an always-true
/// guard.
#[tracing::instrument(level = "debug", skip_all, fields(inputs = mock.inputs.len(), outputs = mock.outputs.len()))]
pub fn build_context(mock: &MockContext, contract: Option<&ErgoTree>) -> Result<ExecutionContext> {
    let height = i32::try_from(mock.height)
        .map_err(|_| Error::Context(format!("HEIGHT {} does not fit in an Int", mock.height)))?;
    let self_index = locate_self(mock)?;
    let self_id = box_id(&mock.self_box, "self", 0)?;
    let always_true = ErgoTree::always_true();

    let convert = |boxes: &[MockBox], role: &str, self_at: Option<usize>| -> Result<Vec<Arc<ErgoBox>>> {
        boxes
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let (id, guard) = if self_at == Some(i) {
                    (self_id, contract.unwrap_or(&always_true))
                } else {
                    (box_id(b, role, i)?, &always_true)
                };
                convert_box(b, id, guard, height, i).map(Arc::new)
            })
            .collect()
    };

    let inputs = convert(&mock.inputs, "input", Some(self_index))?;
    let outputs = convert(&mock.outputs, "output", None)?;
    let data_inputs = convert(&mock.data_inputs, "data-input", None)?;

    let transaction = spending_transaction(&inputs, &data_inputs, &outputs);
    let pre_header = build_pre_header(mock.pre_header.as_ref(), height)?;
    let script_version = contract.map(|t| t.version).unwrap_or(DEFAULT_SCRIPT_VERSION);

    tracing::debug!(self_index, script_version, "built execution context");
    Ok(ExecutionContext {
        height,
        self_index,
        inputs,
        outputs,
        data_inputs,
        transaction,
        pre_header: Arc::new(pre_header),
        cost_limit: DEFAULT_COST_LIMIT,
        script_version,
    })
}

/// Position of the self box in `inputs`: where `SELF` was declared, else the
/// single input carrying the self box's explicit id.
fn locate_self(mock: &MockContext) -> Result<usize> {
    let missing = || {
        Error::Context(format!(
            "self box is not among the {} input(s)",
            mock.inputs.len()
        ))
    };
    if let Some(index) = mock.self_index {
        return match mock.inputs.get(index) {
            Some(b) if *b == mock.self_box => Ok(index),
            Some(_) => Err(Error::Context(format!("input {} is not the self box", index))),
            None => Err(missing()),
        };
    }
    let Some(id) = mock.self_box.id.as_deref() else {
        return Err(missing());
    };
    let mut matches = mock
        .inputs
        .iter()
        .enumerate()
        .filter(|(_, b)| b.id.as_deref() == Some(id))
        .map(|(i, _)| i);
    match (matches.next(), matches.next()) {
        (Some(index), None) => Ok(index),
        (Some(_), Some(_)) => Err(Error::Context(format!("more than one input has the self box id '{}'", id))),
        (None, _) => Err(missing()),
    }
}

fn box_id(b: &MockBox, role: &str, index: usize) -> Result<BoxId> {
    match &b.id {
        Some(id) if id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()) => {
            let mut out = [0u8; 32];
            hex::decode_to_slice(id, &mut out)
                .map_err(|e| Error::Context(format!("invalid box id '{}': {}", id, e)))?;
            Ok(BoxId(out))
        }
        Some(id) => Ok(BoxId(blake2b256(id.as_bytes()))),
        None => {
            let seed = if role == "self" {
                content_seed(b)
            } else {
                format!("{}:{}:{}", role, index, content_seed(b))
            };
            Ok(BoxId(blake2b256(seed.as_bytes())))
        }
    }
}

fn content_seed(b: &MockBox) -> String {
    let registers: Vec<String> = b
        .registers
        .iter()
        .map(|(name, v)| format!("{}={:?}", name, v))
        .collect();
    format!(
        "box:{}:{}:{}:{}",
        b.value,
        b.proposition_bytes.as_deref().unwrap_or(""),
        b.creation_height.map(|h| h.to_string()).unwrap_or_default(),
        registers.join(",")
    )
}

fn convert_box(b: &MockBox, id: BoxId, guard: &ErgoTree, height: i32, index: usize) -> Result<ErgoBox> {
    if !b.tokens.is_empty() {
        tracing::warn!(
            box_id = %id.to_hex(),
            count = b.tokens.len(),
            "mock box tokens are not attached to the execution context"
        );
    }

    let proposition_bytes = match &b.proposition_bytes {
        Some(h) => decode_hex(h, "propositionBytes")?,
        None => guard.bytes.clone(),
    };

    let mut registers = BTreeMap::new();
    for (name, value) in &b.registers {
        registers.insert(register_index(name)?, register_value(value));
    }

    let mut creation_ref = vec![0u8; 32];
    creation_ref.extend_from_slice(&(index as u16).to_be_bytes());

    Ok(ErgoBox {
        id,
        value: b.value,
        ergo_tree: guard.clone(),
        proposition_bytes,
        creation_height: b.creation_height.unwrap_or(height),
        creation_ref,
        tokens: Vec::new(),
        registers,
    })
}

/// `"R4"` to `4`; only the non-mandatory registers R4..R9 are settable.
pub fn register_index(name: &str) -> Result<u8> {
    name.strip_prefix('R')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (4..=9).contains(n))
        .ok_or_else(|| Error::Context(format!("unknown register '{}' (expected R4..R9)", name)))
}

fn register_value(v: &RegisterValue) -> Value {
    match v {
        RegisterValue::Int(n) => Value::Int(*n),
        RegisterValue::Long(n) => Value::Long(*n),
        RegisterValue::Boolean(b) => Value::Boolean(*b),
        RegisterValue::Bytes(bytes) => Value::bytes(bytes),
        RegisterValue::Str(s) => Value::bytes(s.as_bytes()),
    }
}

fn decode_hex(text: &str, field: &str) -> Result<Vec<u8>> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(digits).map_err(|e| Error::Context(format!("invalid hex in {}: {}", field, e)))
}

fn spending_transaction(
    inputs: &[Arc<ErgoBox>],
    data_inputs: &[Arc<ErgoBox>],
    outputs: &[Arc<ErgoBox>],
) -> SpendingTransaction {
    let ids = |boxes: &[Arc<ErgoBox>]| boxes.iter().map(|b| b.id).collect::<Vec<_>>();
    let (inputs, data_inputs, outputs) = (ids(inputs), ids(data_inputs), ids(outputs));

    let mut hasher = Sha256::new();
    for id in inputs.iter().chain(&data_inputs).chain(&outputs) {
        hasher.update(id.0);
    }
    let mut id = [0u8; 32];
    id.copy_from_slice(&hasher.finalize());

    SpendingTransaction {
        id,
        inputs,
        data_inputs,
        outputs,
    }
}

fn build_pre_header(mock: Option<&MockPreHeader>, height: i32) -> Result<PreHeader> {
    let default = MockPreHeader::default();
    let m = mock.unwrap_or(&default);

    let parent_id = match &m.parent_id {
        Some(h) => decode_hex(h, "parentId")?
            .try_into()
            .map_err(|_| Error::Context("parentId must be 32 bytes".into()))?,
        None => [0u8; 32],
    };
    let miner_pk = decode_hex(m.miner_pk.as_deref().unwrap_or(DUMMY_MINER_PK), "minerPk")?
        .try_into()
        .map_err(|_| Error::Context("minerPk must be a 33-byte compressed point".into()))?;
    let timestamp = match m.timestamp {
        Some(t) => t,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default(),
    };

    Ok(PreHeader {
        version: m.version.unwrap_or(DEFAULT_SCRIPT_VERSION),
        parent_id,
        timestamp,
        n_bits: m.n_bits.unwrap_or(DEFAULT_N_BITS),
        height: m.height.unwrap_or(height),
        miner_pk: GroupElement(miner_pk),
        votes: [0u8; 3],
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{NetworkPrefix, ReferenceCompiler, ScriptCompiler};

    fn boxed(value: i64) -> MockBox {
        MockBox {
            value,
            ..MockBox::default()
        }
    }

    fn context(self_box: MockBox, inputs: Vec<MockBox>, self_index: Option<usize>) -> MockContext {
        MockContext {
            height: 100,
            self_box,
            inputs,
            self_index,
            outputs: vec![boxed(5)],
            data_inputs: Vec::new(),
            pre_header: None,
        }
    }

    #[test]
    fn test_self_found_at_declared_position() {
        let me = boxed(10);
        let ctx = build_context(&context(me.clone(), vec![boxed(1), me], Some(1)), None).unwrap();
        assert_eq!(ctx.self_index, 1);
        assert_eq!(ctx.self_box().unwrap().value, 10);
    }

    #[test]
    fn test_missing_self_is_an_error() {
        let err = build_context(&context(boxed(10), vec![boxed(1)], None), None).unwrap_err();
        assert!(matches!(err, Error::Context(ref m) if m.contains("not among")));
    }

    #[test]
    fn test_content_equal_input_is_not_taken_for_self() {
        let err = build_context(&context(boxed(10), vec![boxed(10)], None), None).unwrap_err();
        assert!(matches!(err, Error::Context(ref m) if m.contains("not among")));
    }

    #[test]
    fn test_twin_of_self_keeps_its_own_id_and_guard() {
        let tree = ReferenceCompiler
            .compile("sigmaProp(HEIGHT > 10)", NetworkPrefix::Mainnet, 2)
            .unwrap()
            .tree;
        let me = boxed(10);
        let mock = context(me.clone(), vec![me.clone(), me], Some(1));
        let ctx = build_context(&mock, Some(&tree)).unwrap();
        assert_eq!(ctx.self_index, 1);
        assert_ne!(ctx.inputs[0].id, ctx.inputs[1].id);
        assert_eq!(ctx.inputs[0].ergo_tree, ErgoTree::always_true());
        assert_eq!(ctx.inputs[1].ergo_tree, tree);
    }

    #[test]
    fn test_self_found_by_explicit_id_without_marker() {
        let me = MockBox {
            id: Some("alice".into()),
            ..boxed(3)
        };
        let ctx = build_context(&context(me.clone(), vec![boxed(1), me.clone()], None), None).unwrap();
        assert_eq!(ctx.self_index, 1);
        let twice = context(me.clone(), vec![me.clone(), me], None);
        assert!(build_context(&twice, None).is_err());
    }

    #[test]
    fn test_marker_must_point_at_self() {
        let err = build_context(&context(boxed(10), vec![boxed(1)], Some(0)), None).unwrap_err();
        assert!(matches!(err, Error::Context(ref m) if m.contains("not the self box")));
        assert!(build_context(&context(boxed(10), vec![], Some(0)), None).is_err());
    }

    #[test]
    fn test_explicit_hex_id_is_kept() {
        let id = "ab".repeat(32);
        let me = MockBox {
            id: Some(id.clone()),
            ..boxed(3)
        };
        let ctx = build_context(&context(me.clone(), vec![me], Some(0)), None).unwrap();
        assert_eq!(ctx.inputs[0].id.to_hex(), id);
    }

    #[test]
    fn test_named_id_is_hashed() {
        let me = MockBox {
            id: Some("alice".into()),
            ..boxed(3)
        };
        let ctx = build_context(&context(me.clone(), vec![me], Some(0)), None).unwrap();
        assert_eq!(ctx.inputs[0].id, BoxId(blake2b256(b"alice")));
    }

    #[test]
    fn test_contract_guards_only_self() {
        let tree = ReferenceCompiler
            .compile("sigmaProp(HEIGHT > 10)", NetworkPrefix::Mainnet, 2)
            .unwrap()
            .tree;
        let me = boxed(10);
        let ctx = build_context(&context(me.clone(), vec![me, boxed(1)], Some(0)), Some(&tree)).unwrap();
        assert_eq!(ctx.inputs[0].ergo_tree, tree);
        assert_eq!(ctx.inputs[1].ergo_tree, ErgoTree::always_true());
        assert_eq!(ctx.outputs[0].ergo_tree, ErgoTree::always_true());
        assert_eq!(ctx.script_version, 2);
    }

    #[test]
    fn test_default_script_version_without_contract() {
        let ctx = test_support::context_with_height(7);
        assert_eq!(ctx.script_version, DEFAULT_SCRIPT_VERSION);
        assert_eq!(ctx.cost_limit, DEFAULT_COST_LIMIT);
        assert_eq!(ctx.height, 7);
    }

    #[test]
    fn test_registers_are_typed() {
        let mut me = boxed(10);
        me.registers.insert("R4".into(), RegisterValue::Int(7));
        me.registers.insert("R5".into(), RegisterValue::Bytes(vec![0xca, 0xfe]));
        let ctx = build_context(&context(me.clone(), vec![me], Some(0)), None).unwrap();
        let regs = &ctx.inputs[0].registers;
        assert_eq!(regs[&4], Value::Int(7));
        assert_eq!(regs[&5], Value::bytes(&[0xca, 0xfe]));
    }

    #[test]
    fn test_bad_register_name() {
        let mut me = boxed(10);
        me.registers.insert("R2".into(), RegisterValue::Int(7));
        assert!(build_context(&context(me.clone(), vec![me], Some(0)), None).is_err());
        assert!(register_index("R10").is_err());
        assert_eq!(register_index("R9").unwrap(), 9);
    }

    #[test]
    fn test_default_pre_header() {
        let ctx = test_support::context_with_height(321);
        let h = &ctx.pre_header;
        assert_eq!(h.height, 321);
        assert_eq!(h.n_bits, DEFAULT_N_BITS);
        assert_eq!(h.parent_id, [0u8; 32]);
        assert_eq!(h.miner_pk.0[0], 0x02);
        assert!(h.timestamp > 0);
    }

    #[test]
    fn test_explicit_pre_header_fields_win() {
        let me = boxed(10);
        let mut mock = context(me.clone(), vec![me], Some(0));
        mock.pre_header = Some(MockPreHeader {
            timestamp: Some(1_700_000_000_000),
            height: Some(99),
            ..MockPreHeader::default()
        });
        let ctx = build_context(&mock, None).unwrap();
        assert_eq!(ctx.pre_header.timestamp, 1_700_000_000_000);
        assert_eq!(ctx.pre_header.height, 99);
        assert_eq!(ctx.pre_header.version, DEFAULT_SCRIPT_VERSION);
    }

    #[test]
    fn test_transaction_references_boxes() {
        let ctx = test_support::sample_context();
        assert_eq!(ctx.transaction.inputs, vec![ctx.inputs[0].id]);
        assert_eq!(ctx.transaction.outputs.len(), 1);
        assert!(ctx.transaction.data_inputs.is_empty());
    }

    #[test]
    fn test_determinism_100_iterations() {
        let first = test_support::sample_context();
        for _ in 0..100 {
            let ctx = test_support::sample_context();
            assert_eq!(ctx.transaction, first.transaction);
            assert_eq!(ctx.inputs[0].id, first.inputs[0].id);
        }
    }
}
