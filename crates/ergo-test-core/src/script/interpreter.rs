//! Reference evaluator for compiled ErgoScript trees
//!
//! # Evaluation order
//!
//! Operands are evaluated left to right and every node is charged once,
//! after its operands (post-order). `&&`, `||` and `if` evaluate only the
//! operands they need; [`short_circuit`] and [`branch_taken`] are the single
//! definition of those rules and are shared with the tracing walk.
//!
//! Loop methods (`map`, `filter`, `fold`, `exists`, `forall`, `flatMap`)
//! evaluate the collection, then their arguments, then apply the lambda to
//! each element in order. `exists` stops at the first `true` and `forall` at
//! the first `false`.
//!
//! # Guarantees
//!
//! - Deterministic: same context and tree always give the same value, cost
//!   and trace
//! - Checked arithmetic: overflow is an error, never a wrap
//! - Cost ceiling: exceeding the context's cost limit stops evaluation

use std::sync::Arc;

use super::ast::{BinOp, Builtin, Expr, ExprKind, GlobalVar, MethodKind, SType, UnaryOp};
use super::cost::{self, CostItem};
use super::value::{Closure, Env, GroupElement, SigmaBoolean, Value};
use super::{version, ErgoTree, EvalError, ScriptEvaluator};
use crate::context::{blake2b256, ExecutionContext};

/// Tree-walking evaluator with optional cost tracing
#[derive(Debug, Default)]
pub struct Interpreter {
    tracing: bool,
    trace: Vec<CostItem>,
    spent: i64,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptEvaluator for Interpreter {
    fn clear_cost_trace(&mut self) {
        self.trace.clear();
    }

    fn set_cost_tracing(&mut self, enabled: bool) {
        self.tracing = enabled;
    }

    fn reduce(&mut self, ctx: &ExecutionContext, tree: &ErgoTree, env: &Env) -> Result<Value, EvalError> {
        let mut eval = Evaluation::new(ctx, self.tracing)?;
        let result = eval.eval(&tree.root, env);
        self.spent = eval.spent;
        self.trace.extend(eval.trace.unwrap_or_default());
        result
    }

    fn eval_isolated(&self, ctx: &ExecutionContext, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        Evaluation::new(ctx, false)?.eval(expr, env)
    }

    fn take_cost_trace(&mut self) -> Vec<CostItem> {
        std::mem::take(&mut self.trace)
    }

    fn spent_cost(&self) -> i64 {
        self.spent
    }
}

// ── Shared evaluation rules ───────────────────────────────

/// Value of `left op right` when `right` need not be evaluated.
pub fn short_circuit(op: BinOp, left: &Value) -> Option<Value> {
    match (op, left) {
        (BinOp::And, Value::Boolean(false)) => Some(Value::Boolean(false)),
        (BinOp::Or, Value::Boolean(true)) => Some(Value::Boolean(true)),
        _ => None,
    }
}

/// Which branch an `if` takes for a condition value.
pub fn branch_taken(cond: &Value) -> Option<bool> {
    match cond {
        Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

/// Whether a loop stops after an iteration produced `result`.
pub fn loop_stops(method: &MethodKind, result: &Value) -> bool {
    match method {
        MethodKind::Exists => matches!(result, Value::Boolean(true)),
        MethodKind::ForAll => matches!(result, Value::Boolean(false)),
        _ => false,
    }
}

// ── Evaluation state ──────────────────────────────────────

struct Evaluation<'a> {
    ctx: &'a ExecutionContext,
    version: u8,
    spent: i64,
    trace: Option<Vec<CostItem>>,
}

impl<'a> Evaluation<'a> {
    fn new(ctx: &'a ExecutionContext, tracing: bool) -> Result<Self, EvalError> {
        let version = version::active().ok_or(EvalError::MissingVersion)?;
        Ok(Evaluation {
            ctx,
            version,
            spent: 0,
            trace: tracing.then(Vec::new),
        })
    }

    fn charge(&mut self, op: &str, operand: &Value, n_items: usize) -> Result<(), EvalError> {
        let (kind, cost) = cost::charge(op, &operand.type_name(), n_items);
        self.spent += cost;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(CostItem {
                op: op.to_string(),
                kind,
                cost,
            });
        }
        if self.spent > self.ctx.cost_limit {
            return Err(EvalError::CostLimitExceeded {
                limit: self.ctx.cost_limit,
                spent: self.spent,
            });
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        let op = expr.op_name();
        match &expr.kind {
            ExprKind::Const(v) => {
                self.charge(op, v, 0)?;
                Ok(v.clone())
            }
            ExprKind::ValUse(name) => {
                let v = env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::UnboundVariable(name.clone()))?;
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Global(g) => {
                let v = self.global(*g)?;
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Block { items, result } => {
                let mut local = env.clone();
                for item in items {
                    match &item.kind {
                        ExprKind::ValDef { name, .. } => {
                            let v = self.eval(item, &local)?;
                            local.insert(name.clone(), v);
                        }
                        _ => {
                            self.eval(item, &local)?;
                        }
                    }
                }
                let v = self.eval(result, &local)?;
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::ValDef { rhs, .. } => {
                let v = self.eval(rhs, env)?;
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Lambda { params, body } => {
                let v = Value::Func(Closure {
                    params: params.iter().map(|p| p.name.clone()).collect(),
                    body: Arc::clone(body),
                    env: env.clone(),
                });
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Apply { func, args } => {
                let f = self.eval(func, env)?;
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, env)?);
                }
                let closure = as_closure(op, &f)?;
                let v = self.apply(closure, values)?;
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.eval(cond, env)?;
                let taken = branch_taken(&c)
                    .ok_or_else(|| EvalError::type_mismatch(op, format!("condition is {}", c.type_name())))?;
                let v = if taken {
                    self.eval(then_branch, env)?
                } else {
                    self.eval(else_branch, env)?
                };
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Binary { op: bin, left, right } => {
                let l = self.eval(left, env)?;
                if let Some(v) = short_circuit(*bin, &l) {
                    self.charge(op, &l, 0)?;
                    return Ok(v);
                }
                let r = self.eval(right, env)?;
                let v = binary(*bin, &l, &r)?;
                self.charge(op, &l, 0)?;
                Ok(v)
            }
            ExprKind::Unary { op: un, operand } => {
                let x = self.eval(operand, env)?;
                let v = unary(*un, &x)?;
                self.charge(op, &x, 0)?;
                Ok(v)
            }
            ExprKind::Tuple(items) => {
                let values = self.eval_all(items, env)?;
                let v = Value::Tuple(values);
                self.charge(op, &v, 0)?;
                Ok(v)
            }
            ExprKind::Coll(items) => {
                let values = self.eval_all(items, env)?;
                let n = values.len();
                let v = Value::Coll(values);
                self.charge(op, &v, n)?;
                Ok(v)
            }
            ExprKind::ByIndex { coll, index } => {
                let c = self.eval(coll, env)?;
                let i = self.eval(index, env)?;
                let v = by_index(op, &c, &i)?;
                self.charge(op, &c, 0)?;
                Ok(v)
            }
            ExprKind::SelectField { obj, index } => {
                let t = self.eval(obj, env)?;
                let v = match &t {
                    Value::Tuple(items) => items.get(*index).cloned().ok_or_else(|| {
                        EvalError::type_mismatch(op, format!("tuple has no field _{}", index + 1))
                    })?,
                    other => {
                        return Err(EvalError::type_mismatch(
                            op,
                            format!("expected a tuple, found {}", other.type_name()),
                        ))
                    }
                };
                self.charge(op, &t, 0)?;
                Ok(v)
            }
            ExprKind::Method { obj, method, args } => {
                let receiver = self.eval(obj, env)?;
                if method.min_version() > self.version {
                    return Err(EvalError::UnsupportedInVersion {
                        method: format!("{:?}", method),
                        required: method.min_version(),
                        active: self.version,
                    });
                }
                let values = self.eval_all(args, env)?;
                if method.is_loop() {
                    let (v, n) = self.run_loop(op, method, &receiver, values)?;
                    self.charge(op, &receiver, n)?;
                    return Ok(v);
                }
                let n = coll_len(&receiver);
                let v = self.method(op, method, &receiver, &values)?;
                self.charge(op, &receiver, n)?;
                Ok(v)
            }
            ExprKind::Builtin { func, args } => {
                let values = self.eval_all(args, env)?;
                let first = values.first().cloned().unwrap_or(Value::Unit);
                let n = first.as_bytes().map(|b| b.len()).unwrap_or_else(|| coll_len(&first));
                let v = builtin(op, *func, &values)?;
                self.charge(op, &first, n)?;
                Ok(v)
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr], env: &Env) -> Result<Vec<Value>, EvalError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(self.eval(item, env)?);
        }
        Ok(out)
    }

    fn apply(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Value, EvalError> {
        let env = bind_params(closure, args)?;
        self.eval(&closure.body, &env)
    }

    fn global(&self, g: GlobalVar) -> Result<Value, EvalError> {
        Ok(match g {
            GlobalVar::Height => Value::Int(self.ctx.height),
            GlobalVar::SelfBox => Value::Box(
                self.ctx
                    .self_box()
                    .ok_or_else(|| EvalError::Unsupported("context has no self box".into()))?,
            ),
            GlobalVar::Inputs => Value::Coll(self.ctx.inputs.iter().cloned().map(Value::Box).collect()),
            GlobalVar::Outputs => Value::Coll(self.ctx.outputs.iter().cloned().map(Value::Box).collect()),
            GlobalVar::Context => Value::Context,
        })
    }

    /// Run a loop method; returns the result and the item count charged.
    fn run_loop(
        &mut self,
        op: &str,
        method: &MethodKind,
        receiver: &Value,
        args: Vec<Value>,
    ) -> Result<(Value, usize), EvalError> {
        let items = as_coll(op, receiver)?;
        let n = items.len();
        let mut args = args.into_iter();

        if *method == MethodKind::Fold {
            let mut acc = args.next().unwrap_or(Value::Unit);
            let f = args.next().unwrap_or(Value::Unit);
            let closure = as_closure(op, &f)?;
            for item in items {
                acc = self.apply(closure, vec![acc, item.clone()])?;
            }
            return Ok((acc, n));
        }

        let f = args.next().unwrap_or(Value::Unit);
        let closure = as_closure(op, &f)?;
        let mut out = Vec::new();
        for item in items {
            let r = self.apply(closure, vec![item.clone()])?;
            match method {
                MethodKind::Map => out.push(r),
                MethodKind::Filter => {
                    if as_bool(op, &r)? {
                        out.push(item.clone());
                    }
                }
                MethodKind::FlatMap => out.extend(as_coll(op, &r)?.iter().cloned()),
                MethodKind::Exists | MethodKind::ForAll => {
                    as_bool(op, &r)?;
                    if loop_stops(method, &r) {
                        return Ok((Value::Boolean(*method == MethodKind::Exists), n));
                    }
                }
                _ => {}
            }
        }
        let v = match method {
            MethodKind::Exists => Value::Boolean(false),
            MethodKind::ForAll => Value::Boolean(true),
            _ => Value::Coll(out),
        };
        Ok((v, n))
    }

    fn method(&self, op: &str, method: &MethodKind, receiver: &Value, args: &[Value]) -> Result<Value, EvalError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Unit);
        match method {
            MethodKind::Value => Ok(Value::Long(as_box(op, receiver)?.value)),
            MethodKind::PropositionBytes => Ok(Value::bytes(&as_box(op, receiver)?.proposition_bytes)),
            MethodKind::Id => Ok(Value::bytes(&as_box(op, receiver)?.id.0)),
            MethodKind::Tokens => Ok(Value::Coll(
                as_box(op, receiver)?
                    .tokens
                    .iter()
                    .map(|(id, amount)| Value::Tuple(vec![Value::bytes(id), Value::Long(*amount)]))
                    .collect(),
            )),
            MethodKind::CreationInfo => {
                let b = as_box(op, receiver)?;
                Ok(Value::Tuple(vec![
                    Value::Int(b.creation_height),
                    Value::bytes(&b.creation_ref),
                ]))
            }
            MethodKind::Register(reg, tpe) => {
                let b = as_box(op, receiver)?;
                match b.registers.get(reg) {
                    None => Ok(Value::Opt(None)),
                    Some(v) if conforms(v, tpe) => Ok(Value::Opt(Some(Box::new(v.clone())))),
                    Some(v) => Err(EvalError::type_mismatch(
                        op,
                        format!("register R{} holds {}, not {}", reg, v.type_name(), tpe),
                    )),
                }
            }
            MethodKind::Size => Ok(Value::Int(as_coll(op, receiver)?.len() as i32)),
            MethodKind::IsEmpty | MethodKind::NonEmpty => {
                let empty = match receiver {
                    Value::Coll(items) => items.is_empty(),
                    Value::Opt(o) => o.is_none(),
                    other => {
                        return Err(EvalError::type_mismatch(
                            op,
                            format!("isEmpty on {}", other.type_name()),
                        ))
                    }
                };
                Ok(Value::Boolean(empty == (*method == MethodKind::IsEmpty)))
            }
            MethodKind::Indices => Ok(Value::Coll(
                (0..as_coll(op, receiver)?.len() as i32).map(Value::Int).collect(),
            )),
            MethodKind::Slice => {
                let items = as_coll(op, receiver)?;
                let from = (as_int(op, &arg(0))?.max(0) as usize).min(items.len());
                let until = (as_int(op, &arg(1))?.max(0) as usize).min(items.len());
                Ok(Value::Coll(if from < until {
                    items[from..until].to_vec()
                } else {
                    Vec::new()
                }))
            }
            MethodKind::Append => {
                let mut items = as_coll(op, receiver)?.to_vec();
                items.extend(as_coll(op, &arg(0))?.iter().cloned());
                Ok(Value::Coll(items))
            }
            MethodKind::CollGetOrElse => {
                let items = as_coll(op, receiver)?;
                let i = as_int(op, &arg(0))?;
                Ok(usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_else(|| arg(1)))
            }
            MethodKind::CollGet => {
                let items = as_coll(op, receiver)?;
                let i = as_int(op, &arg(0))?;
                Ok(Value::Opt(
                    usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .map(Box::new),
                ))
            }
            MethodKind::Reverse => {
                let mut items = as_coll(op, receiver)?.to_vec();
                items.reverse();
                Ok(Value::Coll(items))
            }
            MethodKind::OptionGet => match receiver {
                Value::Opt(Some(v)) => Ok((**v).clone()),
                Value::Opt(None) => Err(EvalError::NoneGet),
                other => Err(EvalError::type_mismatch(op, format!("get on {}", other.type_name()))),
            },
            MethodKind::OptionIsDefined => match receiver {
                Value::Opt(o) => Ok(Value::Boolean(o.is_some())),
                other => Err(EvalError::type_mismatch(op, format!("isDefined on {}", other.type_name()))),
            },
            MethodKind::OptionGetOrElse => match receiver {
                Value::Opt(Some(v)) => Ok((**v).clone()),
                Value::Opt(None) => Ok(arg(0)),
                other => Err(EvalError::type_mismatch(op, format!("getOrElse on {}", other.type_name()))),
            },
            MethodKind::ToByte | MethodKind::ToInt | MethodKind::ToLong | MethodKind::ToBigInt => {
                let n = receiver
                    .as_integer()
                    .ok_or_else(|| EvalError::type_mismatch(op, format!("cannot convert {}", receiver.type_name())))?;
                let width = match method {
                    MethodKind::ToByte => Width::Byte,
                    MethodKind::ToInt => Width::Int,
                    MethodKind::ToLong => Width::Long,
                    _ => Width::BigInt,
                };
                width.wrap(op, n)
            }
            MethodKind::DataInputs => {
                as_context(op, receiver)?;
                Ok(Value::Coll(self.ctx.data_inputs.iter().cloned().map(Value::Box).collect()))
            }
            MethodKind::PreHeader => {
                as_context(op, receiver)?;
                Ok(Value::PreHeader(Arc::clone(&self.ctx.pre_header)))
            }
            MethodKind::SelfBoxIndex => {
                as_context(op, receiver)?;
                Ok(Value::Int(self.ctx.self_index as i32))
            }
            MethodKind::HeaderHeight
            | MethodKind::Timestamp
            | MethodKind::Version
            | MethodKind::NBits
            | MethodKind::MinerPk
            | MethodKind::ParentId
            | MethodKind::Votes => {
                let h = match receiver {
                    Value::PreHeader(h) => h,
                    other => {
                        return Err(EvalError::type_mismatch(
                            op,
                            format!("expected PreHeader, found {}", other.type_name()),
                        ))
                    }
                };
                Ok(match method {
                    MethodKind::HeaderHeight => Value::Int(h.height),
                    MethodKind::Timestamp => Value::Long(h.timestamp),
                    MethodKind::Version => Value::Byte(h.version as i8),
                    MethodKind::NBits => Value::Long(h.n_bits),
                    MethodKind::MinerPk => Value::GroupElement(h.miner_pk.clone()),
                    MethodKind::ParentId => Value::bytes(&h.parent_id),
                    _ => Value::bytes(&h.votes),
                })
            }
            MethodKind::Map
            | MethodKind::Filter
            | MethodKind::Fold
            | MethodKind::Exists
            | MethodKind::ForAll
            | MethodKind::FlatMap => Err(EvalError::Unsupported(format!("{} outside a loop", op))),
        }
    }
}

// ── Operators ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Int,
    Long,
    BigInt,
}

impl Width {
    fn of(v: &Value) -> Option<Width> {
        match v {
            Value::Byte(_) => Some(Width::Byte),
            Value::Int(_) => Some(Width::Int),
            Value::Long(_) => Some(Width::Long),
            Value::BigInt(_) => Some(Width::BigInt),
            _ => None,
        }
    }

    fn wrap(self, op: &str, n: i128) -> Result<Value, EvalError> {
        let overflow = || EvalError::ArithmeticOverflow(op.to_string());
        Ok(match self {
            Width::Byte => Value::Byte(i8::try_from(n).map_err(|_| overflow())?),
            Width::Int => Value::Int(i32::try_from(n).map_err(|_| overflow())?),
            Width::Long => Value::Long(i64::try_from(n).map_err(|_| overflow())?),
            Width::BigInt => Value::BigInt(n),
        })
    }
}

/// Both operands as integers of the same width.
fn integers(op: &str, l: &Value, r: &Value) -> Result<(i128, i128, Width), EvalError> {
    match (Width::of(l), Width::of(r), l.as_integer(), r.as_integer()) {
        (Some(wl), Some(wr), Some(a), Some(b)) if wl == wr => Ok((a, b, wl)),
        _ => Err(EvalError::type_mismatch(
            op,
            format!("{} and {}", l.type_name(), r.type_name()),
        )),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let name = op.op_name();
    match op {
        BinOp::And | BinOp::Or => match (l, r) {
            (Value::Boolean(_), Value::Boolean(b)) => Ok(Value::Boolean(*b)),
            (Value::SigmaProp(a), Value::SigmaProp(b)) => {
                let items = vec![a.clone(), b.clone()];
                Ok(Value::SigmaProp(if op == BinOp::And {
                    SigmaBoolean::all(items)
                } else {
                    SigmaBoolean::any(items)
                }))
            }
            _ => Err(EvalError::type_mismatch(
                name,
                format!("{} and {}", l.type_name(), r.type_name()),
            )),
        },
        BinOp::Eq | BinOp::Neq => {
            if Width::of(l).is_some() || Width::of(r).is_some() {
                integers(name, l, r)?;
            }
            let equal = l == r;
            Ok(Value::Boolean(if op == BinOp::Eq { equal } else { !equal }))
        }
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let (a, b, _) = integers(name, l, r)?;
            Ok(Value::Boolean(match op {
                BinOp::Gt => a > b,
                BinOp::Lt => a < b,
                BinOp::Ge => a >= b,
                _ => a <= b,
            }))
        }
        BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Division | BinOp::Modulo => {
            let (a, b, width) = integers(name, l, r)?;
            let overflow = || EvalError::ArithmeticOverflow(name.to_string());
            let n = match op {
                BinOp::Plus => a.checked_add(b).ok_or_else(overflow)?,
                BinOp::Minus => a.checked_sub(b).ok_or_else(overflow)?,
                BinOp::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
                BinOp::Division => {
                    if b == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    a.checked_div(b).ok_or_else(overflow)?
                }
                _ => {
                    if b == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    a.checked_rem(b).ok_or_else(overflow)?
                }
            };
            width.wrap(name, n)
        }
    }
}

fn unary(op: UnaryOp, x: &Value) -> Result<Value, EvalError> {
    let name = op.op_name();
    match (op, x) {
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Negate, v) => match (Width::of(v), v.as_integer()) {
            (Some(width), Some(n)) => {
                width.wrap(name, n.checked_neg().ok_or_else(|| EvalError::ArithmeticOverflow(name.into()))?)
            }
            _ => Err(EvalError::type_mismatch(name, format!("cannot negate {}", v.type_name()))),
        },
        (_, v) => Err(EvalError::type_mismatch(name, format!("cannot apply to {}", v.type_name()))),
    }
}

fn by_index(op: &str, coll: &Value, index: &Value) -> Result<Value, EvalError> {
    let items = as_coll(op, coll)?;
    let i = as_int(op, index)? as i64;
    usize::try_from(i)
        .ok()
        .and_then(|idx| items.get(idx).cloned())
        .ok_or(EvalError::IndexOutOfBounds {
            index: i,
            size: items.len(),
        })
}

fn builtin(op: &str, func: Builtin, args: &[Value]) -> Result<Value, EvalError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Unit);
    match func {
        Builtin::SigmaProp => match arg(0) {
            Value::Boolean(b) => Ok(Value::SigmaProp(SigmaBoolean::from_bool(b))),
            Value::SigmaProp(s) => Ok(Value::SigmaProp(s)),
            other => Err(EvalError::type_mismatch(op, format!("sigmaProp of {}", other.type_name()))),
        },
        Builtin::AllOf | Builtin::AnyOf => {
            let items = arg(0);
            let mut bools = Vec::new();
            for item in as_coll(op, &items)? {
                bools.push(as_bool(op, item)?);
            }
            Ok(Value::Boolean(if func == Builtin::AllOf {
                bools.iter().all(|b| *b)
            } else {
                bools.iter().any(|b| *b)
            }))
        }
        Builtin::Min | Builtin::Max => {
            let (a, b, width) = integers(op, &arg(0), &arg(1))?;
            width.wrap(op, if func == Builtin::Min { a.min(b) } else { a.max(b) })
        }
        Builtin::Blake2b256 => {
            let bytes = arg(0)
                .as_bytes()
                .ok_or_else(|| EvalError::type_mismatch(op, "expected Coll[Byte]"))?;
            Ok(Value::bytes(&blake2b256(&bytes)))
        }
        Builtin::ProveDlog => match arg(0) {
            Value::GroupElement(g) => Ok(Value::SigmaProp(SigmaBoolean::ProveDlog(g))),
            other => Err(EvalError::type_mismatch(op, format!("proveDlog of {}", other.type_name()))),
        },
        Builtin::DecodePoint => {
            let bytes = arg(0)
                .as_bytes()
                .ok_or_else(|| EvalError::type_mismatch(op, "expected Coll[Byte]"))?;
            let point: [u8; 33] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| EvalError::type_mismatch(op, format!("expected 33 bytes, found {}", bytes.len())))?;
            if point[0] != 0x02 && point[0] != 0x03 {
                return Err(EvalError::type_mismatch(op, "not a compressed point"));
            }
            Ok(Value::GroupElement(GroupElement(point)))
        }
        Builtin::LongToByteArray => match arg(0) {
            Value::Long(n) => Ok(Value::bytes(&n.to_be_bytes())),
            other => Err(EvalError::type_mismatch(op, format!("expected Long, found {}", other.type_name()))),
        },
    }
}

// ── Coercions ─────────────────────────────────────────────

fn as_closure<'v>(op: &str, v: &'v Value) -> Result<&'v Closure, EvalError> {
    match v {
        Value::Func(c) => Ok(c),
        other => Err(EvalError::type_mismatch(op, format!("expected a function, found {}", other.type_name()))),
    }
}

fn as_coll<'v>(op: &str, v: &'v Value) -> Result<&'v [Value], EvalError> {
    match v {
        Value::Coll(items) => Ok(items.as_slice()),
        other => Err(EvalError::type_mismatch(op, format!("expected a collection, found {}", other.type_name()))),
    }
}

fn as_box<'v>(op: &str, v: &'v Value) -> Result<&'v crate::context::ErgoBox, EvalError> {
    match v {
        Value::Box(b) => Ok(&**b),
        other => Err(EvalError::type_mismatch(op, format!("expected Box, found {}", other.type_name()))),
    }
}

fn as_bool(op: &str, v: &Value) -> Result<bool, EvalError> {
    match v {
        Value::Boolean(b) => Ok(*b),
        other => Err(EvalError::type_mismatch(op, format!("expected Boolean, found {}", other.type_name()))),
    }
}

fn as_int(op: &str, v: &Value) -> Result<i32, EvalError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(EvalError::type_mismatch(op, format!("expected Int, found {}", other.type_name()))),
    }
}

fn as_context(op: &str, v: &Value) -> Result<(), EvalError> {
    match v {
        Value::Context => Ok(()),
        other => Err(EvalError::type_mismatch(op, format!("expected Context, found {}", other.type_name()))),
    }
}

fn coll_len(v: &Value) -> usize {
    match v {
        Value::Coll(items) => items.len(),
        _ => 0,
    }
}

/// Closure environment extended with the call arguments.
pub fn bind_params(closure: &Closure, args: Vec<Value>) -> Result<Env, EvalError> {
    if closure.params.len() != args.len() {
        return Err(EvalError::type_mismatch(
            "Apply",
            format!("expected {} argument(s), found {}", closure.params.len(), args.len()),
        ));
    }
    let mut env = closure.env.clone();
    for (name, value) in closure.params.iter().zip(args) {
        env.insert(name.clone(), value);
    }
    Ok(env)
}

/// Register content check against a declared type
fn conforms(v: &Value, tpe: &SType) -> bool {
    match (v, tpe) {
        (_, SType::Any) => true,
        (Value::Boolean(_), SType::Boolean)
        | (Value::Byte(_), SType::Byte)
        | (Value::Int(_), SType::Int)
        | (Value::Long(_), SType::Long)
        | (Value::BigInt(_), SType::BigInt)
        | (Value::GroupElement(_), SType::GroupElement)
        | (Value::SigmaProp(_), SType::SigmaProp)
        | (Value::Box(_), SType::Box) => true,
        (Value::Coll(items), SType::Coll(inner)) => items.iter().all(|i| conforms(i, inner)),
        (Value::Tuple(items), SType::Tuple(types)) => {
            items.len() == types.len() && items.iter().zip(types).all(|(i, t)| conforms(i, t))
        }
        _ => false,
    }
}
