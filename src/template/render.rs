use crate::template::codegen::{CompareOp, Cond, Node};
use crate::template::error::RenderError;
use crate::template::expr::Expr;
use crate::template::filters::FilterTable;
use crate::template::value::{Context, Value, escape_html};
use std::collections::HashMap;

/// 单次渲染的作用域：输出缓冲与循环标志都只活在这一次调用里
pub struct Scope<'t> {
    filters: &'t FilterTable,
    out: String,
    flags: HashMap<usize, bool>,
}

impl<'t> Scope<'t> {
    pub fn new(filters: &'t FilterTable) -> Self {
        Self {
            filters,
            out: String::new(),
            flags: HashMap::new(),
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn exec(&mut self, nodes: &[Node], ctx: &mut Context) -> Result<(), RenderError> {
        for node in nodes {
            self.exec_node(node, ctx)?;
        }
        Ok(())
    }

    fn exec_node(&mut self, node: &Node, ctx: &mut Context) -> Result<(), RenderError> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Print(expr) => {
                let value = self.eval(expr, ctx)?;
                self.print(&value);
            }
            Node::Branch { arms, otherwise } => {
                for (cond, body) in arms {
                    if self.test(cond, ctx)? {
                        return self.exec(body, ctx);
                    }
                }
                if let Some(body) = otherwise {
                    self.exec(body, ctx)?;
                }
            }
            Node::Loop { spec, body } => {
                let iterable = self.eval(&spec.iterable, ctx)?;
                for (key, value) in iterable.entries() {
                    if let Some(key_var) = &spec.key {
                        ctx.insert(key_var.clone(), key);
                    }
                    ctx.insert(spec.value.clone(), value);
                    self.exec(body, ctx)?;
                }
            }
            Node::SetFlag(slot) => {
                self.flags.insert(*slot, true);
            }
            Node::ClearFlag(slot) => {
                self.flags.insert(*slot, false);
            }
            Node::Cycle { key, values } => {
                let n = match ctx.get(key) {
                    Some(Value::Int(n)) => *n,
                    _ => 0,
                };
                let index = n.rem_euclid(values.len().max(1) as i64) as usize;
                if let Some(expr) = values.get(index) {
                    let value = self.eval(expr, ctx)?;
                    self.print(&value);
                }
                ctx.insert(key.clone(), Value::Int(n.wrapping_add(1)));
            }
            Node::Assign { key, value } => {
                let value = self.eval(value, ctx)?;
                ctx.insert(key.clone(), value);
            }
            Node::Comment(_) => {}
            Node::Call(f) => f(ctx, &mut self.out)?,
        }
        Ok(())
    }

    fn print(&mut self, value: &Value) {
        match value {
            Value::Safe(s) => self.out.push_str(s),
            other => self.out.push_str(&escape_html(&other.to_string())),
        }
    }

    pub fn eval(&self, expr: &Expr, ctx: &Context) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(path) => Ok(ctx.lookup(path)),
            Expr::Filter { name, input, arg } => {
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownFilter(name.clone()))?;
                let input = self.eval(input, ctx)?;
                let arg = match arg {
                    Some(arg) => Some(self.eval(arg, ctx)?),
                    None => None,
                };
                filter(input, arg)
            }
        }
    }

    fn test(&self, cond: &Cond, ctx: &Context) -> Result<bool, RenderError> {
        Ok(match cond {
            Cond::Truthy(expr) => self.eval(expr, ctx)?.is_truthy(),
            Cond::Not(expr) => !self.eval(expr, ctx)?.is_truthy(),
            Cond::FlagUnset(slot) => !self.flags.get(slot).copied().unwrap_or(false),
            Cond::Compare { lhs, op, rhs } => {
                let lhs = self.eval(lhs, ctx)?;
                let rhs = self.eval(rhs, ctx)?;
                compare(&lhs, *op, &rhs)
            }
        })
    }
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match op {
        CompareOp::Eq | CompareOp::Is => lhs == rhs,
        CompareOp::Ne | CompareOp::IsNot => lhs != rhs,
        CompareOp::In => rhs.contains(lhs),
        CompareOp::NotIn => !rhs.contains(lhs),
        CompareOp::Lt => lhs.compare(rhs) == Some(Less),
        CompareOp::Gt => lhs.compare(rhs) == Some(Greater),
        CompareOp::Le => matches!(lhs.compare(rhs), Some(Less | Equal)),
        CompareOp::Ge => matches!(lhs.compare(rhs), Some(Greater | Equal)),
    }
}
