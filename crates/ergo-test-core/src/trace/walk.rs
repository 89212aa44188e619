//! Value trace: a walk over the compiled tree that visits nodes in exactly
//! the order the evaluator charges them and records each node's value.
//!
//! Short-circuit and branch rules come from the interpreter itself
//! ([`short_circuit`], [`branch_taken`], [`loop_stops`]) so the two orders
//! cannot drift apart. Each node's value is obtained by evaluating that node
//! alone, in the environment accumulated so far.

use crate::context::ExecutionContext;
use crate::script::ast::MethodKind;
use crate::script::interpreter::{bind_params, branch_taken, loop_stops, short_circuit};
use crate::script::{Env, EvalError, Expr, ExprKind, ScriptEvaluator, Value};

/// One visited node, in post-order
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEntry {
    pub op: &'static str,
    /// Expanded-code position of the node, when the compiler attached one
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub value: Value,
    /// Enclosing loop and 0-based iteration, for nodes evaluated in a loop body
    pub loop_owner: Option<(usize, usize)>,
    /// Set on loop entries: the id their body nodes refer to
    pub loop_id: Option<usize>,
}

struct Walker<'a, E: ScriptEvaluator + ?Sized> {
    evaluator: &'a E,
    ctx: &'a ExecutionContext,
    entries: Vec<ValueEntry>,
    loop_stack: Vec<(usize, usize)>,
    next_loop_id: usize,
}

/// Walk `root` and return the value entries recorded before the walk
/// finished or hit its first error.
pub fn value_trace<E: ScriptEvaluator + ?Sized>(
    evaluator: &E,
    ctx: &ExecutionContext,
    root: &Expr,
    env: &Env,
) -> Vec<ValueEntry> {
    let mut walker = Walker {
        evaluator,
        ctx,
        entries: Vec::new(),
        loop_stack: Vec::new(),
        next_loop_id: 0,
    };
    if let Err(e) = walker.walk(root, env) {
        tracing::debug!(error = %e, entries = walker.entries.len(), "value walk stopped");
    }
    walker.entries
}

impl<E: ScriptEvaluator + ?Sized> Walker<'_, E> {
    fn walk(&mut self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        let mut loop_id = None;
        match &expr.kind {
            ExprKind::Const(_) | ExprKind::ValUse(_) | ExprKind::Global(_) | ExprKind::Lambda { .. } => {}
            ExprKind::Block { items, result } => {
                let mut local = env.clone();
                for item in items {
                    let v = self.walk(item, &local)?;
                    if let ExprKind::ValDef { name, .. } = &item.kind {
                        local.insert(name.clone(), v);
                    }
                }
                self.walk(result, &local)?;
            }
            ExprKind::Apply { func, args } => {
                let f = self.walk(func, env)?;
                let values = self.walk_all(args, env)?;
                if let Value::Func(closure) = f {
                    let inner = bind_params(&closure, values)?;
                    self.walk(&closure.body, &inner)?;
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.walk(cond, env)?;
                match branch_taken(&c) {
                    Some(true) => {
                        self.walk(then_branch, env)?;
                    }
                    Some(false) => {
                        self.walk(else_branch, env)?;
                    }
                    None => {}
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.walk(left, env)?;
                if short_circuit(*op, &l).is_none() {
                    self.walk(right, env)?;
                }
            }
            ExprKind::Method { obj, method, args } if method.is_loop() => {
                let receiver = self.walk(obj, env)?;
                let values = self.walk_all(args, env)?;
                loop_id = Some(self.walk_loop(method, &receiver, values)?);
            }
            _ => {
                for child in expr.children() {
                    self.walk(child, env)?;
                }
            }
        }

        let value = self.evaluator.eval_isolated(self.ctx, expr, env)?;
        self.entries.push(ValueEntry {
            op: expr.op_name(),
            line: expr.source.as_ref().map(|s| s.line),
            column: expr.source.as_ref().map(|s| s.column),
            value: value.clone(),
            loop_owner: self.loop_stack.last().copied(),
            loop_id,
        });
        Ok(value)
    }

    fn walk_all(&mut self, items: &[Expr], env: &Env) -> Result<Vec<Value>, EvalError> {
        items.iter().map(|item| self.walk(item, env)).collect()
    }

    /// Walk the lambda body once per iteration; returns the loop id.
    fn walk_loop(&mut self, method: &MethodKind, receiver: &Value, args: Vec<Value>) -> Result<usize, EvalError> {
        let id = self.next_loop_id;
        self.next_loop_id += 1;

        let Value::Coll(items) = receiver else {
            return Ok(id);
        };
        let mut args = args.into_iter();
        let mut acc = if *method == MethodKind::Fold {
            args.next()
        } else {
            None
        };
        let Some(Value::Func(closure)) = args.next() else {
            return Ok(id);
        };

        for (iteration, item) in items.iter().enumerate() {
            let call_args = match acc.take() {
                Some(a) => vec![a, item.clone()],
                None => vec![item.clone()],
            };
            let env = bind_params(&closure, call_args)?;
            self.loop_stack.push((id, iteration));
            let result = self.walk(&closure.body, &env);
            self.loop_stack.pop();
            let result = result?;
            if *method == MethodKind::Fold {
                acc = Some(result);
            } else if loop_stops(method, &result) {
                break;
            }
        }
        Ok(id)
    }
}

/// Element type hint for a value, used in trace output
pub fn value_type(value: &Value) -> Option<String> {
    match value {
        Value::Func(_) => None,
        other => Some(other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::sample_context;
    use crate::script::{Interpreter, NetworkPrefix, ReferenceCompiler, ScriptCompiler, VersionScope};

    fn entries(source: &str) -> Vec<ValueEntry> {
        let tree = ReferenceCompiler
            .compile(source, NetworkPrefix::Mainnet, 3)
            .unwrap()
            .tree;
        let _scope = VersionScope::enter(3);
        value_trace(&Interpreter::new(), &sample_context(), &tree.root, &Env::new())
    }

    fn ops(source: &str) -> Vec<&'static str> {
        entries(source).iter().map(|e| e.op).collect()
    }

    /// The walk must visit nodes in the order the interpreter charges them.
    fn assert_mirrors_cost_trace(source: &str) {
        let tree = ReferenceCompiler
            .compile(source, NetworkPrefix::Mainnet, 3)
            .unwrap()
            .tree;
        let _scope = VersionScope::enter(3);
        let ctx = sample_context();
        let mut interp = Interpreter::new();
        interp.set_cost_tracing(true);
        interp.reduce(&ctx, &tree, &Env::new()).unwrap();
        let cost_ops: Vec<String> = interp.take_cost_trace().into_iter().map(|c| c.op).collect();
        let walk_ops: Vec<String> = value_trace(&interp, &ctx, &tree.root, &Env::new())
            .into_iter()
            .map(|e| e.op.to_string())
            .collect();
        assert_eq!(walk_ops, cost_ops, "order diverged for `{}`", source);
    }

    #[test]
    fn test_post_order_values() {
        let e = entries("HEIGHT > 100");
        assert_eq!(e.iter().map(|e| e.op).collect::<Vec<_>>(), vec!["Height", "Constant", "GT"]);
        assert_eq!(e[0].value, Value::Int(150));
        assert_eq!(e[2].value, Value::Boolean(true));
        assert_eq!((e[2].line, e[2].column), (Some(1), Some(8)));
    }

    #[test]
    fn test_and_skips_right_when_left_false() {
        assert_eq!(ops("HEIGHT < 1 && HEIGHT > 2"), vec!["Height", "Constant", "LT", "BinAnd"]);
    }

    #[test]
    fn test_or_skips_right_when_left_true() {
        assert_eq!(ops("HEIGHT > 1 || HEIGHT > 2"), vec!["Height", "Constant", "GT", "BinOr"]);
    }

    #[test]
    fn test_if_walks_taken_branch_only() {
        assert_eq!(ops("if (HEIGHT > 1) 5 else 1 / 0"), vec!["Height", "Constant", "GT", "Constant", "If"]);
    }

    #[test]
    fn test_loop_body_entries_are_owned() {
        let e = entries("OUTPUTS.exists { (b: Box) => b.value > 1L }");
        let exists = e.iter().find(|e| e.op == "Exists").unwrap();
        let id = exists.loop_id.unwrap();
        let owned: Vec<_> = e.iter().filter(|e| e.loop_owner == Some((id, 0))).collect();
        assert_eq!(owned.len(), 4);
        assert_eq!(exists.loop_owner, None);
    }

    #[test]
    fn test_walk_mirrors_cost_trace_per_operation_kind() {
        for source in [
            "HEIGHT > 1 && HEIGHT < 1000",
            "HEIGHT < 1 || SELF.value > 0L",
            "if (HEIGHT > 100) HEIGHT - 1 else HEIGHT + 1",
            "{ val a = HEIGHT * 2\n val b = a + 1\n b > a }",
            "def check(h: Int): Boolean = HEIGHT > h\ncheck(10) && check(20)",
            "OUTPUTS.fold(0L, { (acc: Long, b: Box) => acc + b.value }) > 0L",
            "INPUTS.map { (b: Box) => b.value }.filter { (v: Long) => v > 1L }.size == 1",
            "OUTPUTS.forall { (b: Box) => b.value > 1L } && OUTPUTS.exists { (b: Box) => b.value < 1L }",
            "SELF.R4[Long].getOrElse(0L) == 42L",
            "(HEIGHT, SELF.value)._2 > 0L",
            "sigmaProp(HEIGHT > 1) && sigmaProp(allOf(Coll(true, HEIGHT > 2)))",
        ] {
            assert_mirrors_cost_trace(source);
        }
    }

    #[test]
    fn test_walk_stops_at_first_error() {
        let e = entries("HEIGHT > 1 && SELF.R5[Int].get > 0");
        assert_eq!(e.last().unwrap().op, "ExtractRegisterAs");
    }
}
