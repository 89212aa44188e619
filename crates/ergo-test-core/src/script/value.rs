//! Runtime values of the reference evaluator
//!
//! The `Display` form is the formatting used everywhere a value is shown to
//! a person: trace nodes, assertion failures and the CLI.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ast::Expr;
use crate::context::{ErgoBox, PreHeader};

/// Variable environment threaded through evaluation
pub type Env = BTreeMap<String, Value>;

/// Compressed secp256k1 point
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GroupElement(pub [u8; 33]);

impl std::fmt::Debug for GroupElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "GroupElement({})", hex::encode(self.0))
    }
}

/// Sigma proposition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigmaBoolean {
    TrivialTrue,
    TrivialFalse,
    ProveDlog(GroupElement),
    Cand(Vec<SigmaBoolean>),
    Cor(Vec<SigmaBoolean>),
}

impl SigmaBoolean {
    pub fn from_bool(b: bool) -> Self {
        if b {
            SigmaBoolean::TrivialTrue
        } else {
            SigmaBoolean::TrivialFalse
        }
    }

    /// Conjunction with trivial operands folded away
    pub fn all(items: Vec<SigmaBoolean>) -> Self {
        let mut rest = Vec::new();
        for item in items {
            match item {
                SigmaBoolean::TrivialFalse => return SigmaBoolean::TrivialFalse,
                SigmaBoolean::TrivialTrue => {}
                other => rest.push(other),
            }
        }
        match rest.len() {
            0 => SigmaBoolean::TrivialTrue,
            1 => rest.remove(0),
            _ => SigmaBoolean::Cand(rest),
        }
    }

    /// Disjunction with trivial operands folded away
    pub fn any(items: Vec<SigmaBoolean>) -> Self {
        let mut rest = Vec::new();
        for item in items {
            match item {
                SigmaBoolean::TrivialTrue => return SigmaBoolean::TrivialTrue,
                SigmaBoolean::TrivialFalse => {}
                other => rest.push(other),
            }
        }
        match rest.len() {
            0 => SigmaBoolean::TrivialFalse,
            1 => rest.remove(0),
            _ => SigmaBoolean::Cor(rest),
        }
    }

    fn class_name(&self) -> &'static str {
        match self {
            SigmaBoolean::TrivialTrue => "TrivialProp.TrueProp",
            SigmaBoolean::TrivialFalse => "TrivialProp.FalseProp",
            SigmaBoolean::ProveDlog(_) => "ProveDlog",
            SigmaBoolean::Cand(_) => "CAND",
            SigmaBoolean::Cor(_) => "COR",
        }
    }
}

/// A function value: lambda parameters, body and captured environment
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Arc<Expr>,
    pub env: Env,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Boolean(bool),
    Byte(i8),
    Int(i32),
    Long(i64),
    BigInt(i128),
    GroupElement(GroupElement),
    SigmaProp(SigmaBoolean),
    Coll(Vec<Value>),
    Tuple(Vec<Value>),
    Opt(Option<Box<Value>>),
    Box(Arc<ErgoBox>),
    PreHeader(Arc<PreHeader>),
    Context,
    Func(Closure),
}

impl Value {
    pub fn bytes(bytes: &[u8]) -> Self {
        Value::Coll(bytes.iter().map(|b| Value::Byte(*b as i8)).collect())
    }

    /// Byte content of a `Coll[Byte]`, `None` for anything else.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Coll(items) => items
                .iter()
                .map(|v| match v {
                    Value::Byte(b) => Some(*b as u8),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Integral value widened to i128, for Byte/Int/Long/BigInt.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Byte(n) => Some(*n as i128),
            Value::Int(n) => Some(*n as i128),
            Value::Long(n) => Some(*n as i128),
            Value::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    /// True for `true` and for a trivially true sigma proposition.
    pub fn is_provable(&self) -> bool {
        matches!(
            self,
            Value::Boolean(true) | Value::SigmaProp(SigmaBoolean::TrivialTrue)
        )
    }

    /// Equality used by test assertions.
    ///
    /// Integral values compare numerically across widths and a boolean
    /// equals the trivial sigma proposition of the same truth value.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Coll(a), Value::Coll(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Value::Opt(Some(a)), Value::Opt(Some(b))) => a.loosely_equals(b),
            (Value::Boolean(b), Value::SigmaProp(s)) | (Value::SigmaProp(s), Value::Boolean(b)) => {
                *s == SigmaBoolean::from_bool(*b)
            }
            _ => match (self.as_integer(), other.as_integer()) {
                (Some(a), Some(b)) => a == b,
                _ => self == other,
            },
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Unit => "Unit".into(),
            Value::Boolean(_) => "Boolean".into(),
            Value::Byte(_) => "Byte".into(),
            Value::Int(_) => "Int".into(),
            Value::Long(_) => "Long".into(),
            Value::BigInt(_) => "BigInt".into(),
            Value::GroupElement(_) => "GroupElement".into(),
            Value::SigmaProp(_) => "SigmaProp".into(),
            Value::Coll(items) => match items.first() {
                Some(first) => format!("Coll[{}]", first.type_name()),
                None => "Coll[Any]".into(),
            },
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.type_name()).collect();
                format!("({})", parts.join(", "))
            }
            Value::Opt(Some(v)) => format!("Option[{}]", v.type_name()),
            Value::Opt(None) => "Option[Any]".into(),
            Value::Box(_) => "Box".into(),
            Value::PreHeader(_) => "PreHeader".into(),
            Value::Context => "Context".into(),
            Value::Func(_) => "Func".into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Unit => serde_json::Value::Null,
            Value::Boolean(b) => json!(b),
            Value::Byte(n) => json!(n),
            Value::Int(n) => json!(n),
            Value::Long(n) => json!(n),
            Value::BigInt(n) => json!(n.to_string()),
            Value::Coll(_) if self.as_bytes().is_some() => {
                json!(hex::encode(self.as_bytes().unwrap_or_default()))
            }
            Value::Coll(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Opt(None) => serde_json::Value::Null,
            Value::Opt(Some(v)) => v.to_json(),
            Value::Box(b) => json!({ "id": b.id.to_hex(), "value": b.value }),
            other => json!(other.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Byte(n) => write!(f, "{}", n),
            Value::Int(n) => write!(f, "{}", n),
            Value::Long(n) => write!(f, "{}L", n),
            Value::BigInt(n) => write!(f, "BigInt({})", n),
            Value::GroupElement(g) => write!(f, "GroupElement({})", hex::encode(g.0)),
            Value::SigmaProp(SigmaBoolean::TrivialTrue) => write!(f, "SigmaProp(true)"),
            Value::SigmaProp(SigmaBoolean::TrivialFalse) => write!(f, "SigmaProp(false)"),
            Value::SigmaProp(s) => write!(f, "SigmaProp({})", s.class_name()),
            Value::Coll(items) => write!(f, "Coll({} items)", items.len()),
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Value::Opt(Some(v)) => write!(f, "Some({})", v),
            Value::Opt(None) => write!(f, "None"),
            Value::Box(b) => write!(f, "Box({}...)", &b.id.to_hex()[..8]),
            Value::PreHeader(h) => write!(f, "PreHeader(height={})", h.height),
            Value::Context => write!(f, "Context"),
            Value::Func(_) => write!(f, "<function>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(Value::Long(5).to_string(), "5L");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::BigInt(12).to_string(), "BigInt(12)");
        assert_eq!(
            Value::Coll(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "Coll(2 items)"
        );
        assert_eq!(
            Value::Tuple(vec![Value::Int(1), Value::Long(2)]).to_string(),
            "(1, 2L)"
        );
        assert_eq!(
            Value::Opt(Some(Box::new(Value::Int(4)))).to_string(),
            "Some(4)"
        );
        assert_eq!(Value::Opt(None).to_string(), "None");
    }

    #[test]
    fn test_sigma_prop_display() {
        assert_eq!(
            Value::SigmaProp(SigmaBoolean::TrivialTrue).to_string(),
            "SigmaProp(true)"
        );
        assert_eq!(
            Value::SigmaProp(SigmaBoolean::TrivialFalse).to_string(),
            "SigmaProp(false)"
        );
        let dlog = SigmaBoolean::ProveDlog(GroupElement([2u8; 33]));
        assert_eq!(Value::SigmaProp(dlog).to_string(), "SigmaProp(ProveDlog)");
    }

    #[test]
    fn test_sigma_folding() {
        let dlog = SigmaBoolean::ProveDlog(GroupElement([2u8; 33]));
        assert_eq!(
            SigmaBoolean::all(vec![SigmaBoolean::TrivialTrue, dlog.clone()]),
            dlog
        );
        assert_eq!(
            SigmaBoolean::all(vec![dlog.clone(), SigmaBoolean::TrivialFalse]),
            SigmaBoolean::TrivialFalse
        );
        assert_eq!(
            SigmaBoolean::any(vec![dlog.clone(), SigmaBoolean::TrivialTrue]),
            SigmaBoolean::TrivialTrue
        );
        assert_eq!(SigmaBoolean::any(vec![]), SigmaBoolean::TrivialFalse);
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Int(5).loosely_equals(&Value::Long(5)));
        assert!(!Value::Int(5).loosely_equals(&Value::Long(6)));
        assert!(Value::Boolean(true).loosely_equals(&Value::SigmaProp(SigmaBoolean::TrivialTrue)));
        assert!(!Value::Boolean(true).loosely_equals(&Value::Int(1)));
        assert!(Value::bytes(&[1, 2]).loosely_equals(&Value::bytes(&[1, 2])));
    }

    #[test]
    fn test_bytes_round_trip() {
        let v = Value::bytes(&[0xde, 0xad]);
        assert_eq!(v.as_bytes(), Some(vec![0xde, 0xad]));
        assert_eq!(v.to_json(), serde_json::json!("dead"));
        assert_eq!(v.type_name(), "Coll[Byte]");
    }
}
