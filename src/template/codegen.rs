use crate::template::error::{CompileError, RenderError};
use crate::template::expr::Expr;
use crate::template::value::Context;
use std::fmt;
use std::sync::Arc;

/// 自定义标签可注入的渲染期回调：读写上下文并向输出追加内容
pub type NativeFn = Arc<dyn Fn(&mut Context, &mut String) -> Result<(), RenderError> + Send + Sync>;

/// 标签与文本生成的指令片段，按源码顺序排成一条扁平流
#[derive(Clone)]
pub enum Instr {
    /// 原样追加的文本（不做 HTML 转义）
    Text(String),
    /// 求值并输出，非 safe 值做 HTML 转义
    Print(Expr),
    If(Cond),
    /// 关闭上一个分支并开启带条件的新分支
    ElseIf(Cond),
    Else,
    EndIf,
    For(ForLoop),
    EndFor,
    /// 置位本次渲染的“循环已迭代”标志
    SetFlag(usize),
    ClearFlag(usize),
    /// 轮流输出 `values`，计数器存放在上下文的 `key` 上
    Cycle { key: String, values: Vec<Expr> },
    Assign { key: String, value: Expr },
    CommentStart,
    CommentEnd,
    Call(NativeFn),
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Instr::Print(e) => f.debug_tuple("Print").field(e).finish(),
            Instr::If(c) => f.debug_tuple("If").field(c).finish(),
            Instr::ElseIf(c) => f.debug_tuple("ElseIf").field(c).finish(),
            Instr::Else => f.write_str("Else"),
            Instr::EndIf => f.write_str("EndIf"),
            Instr::For(l) => f.debug_tuple("For").field(l).finish(),
            Instr::EndFor => f.write_str("EndFor"),
            Instr::SetFlag(s) => f.debug_tuple("SetFlag").field(s).finish(),
            Instr::ClearFlag(s) => f.debug_tuple("ClearFlag").field(s).finish(),
            Instr::Cycle { key, values } => f
                .debug_struct("Cycle")
                .field("key", key)
                .field("values", values)
                .finish(),
            Instr::Assign { key, value } => f
                .debug_struct("Assign")
                .field("key", key)
                .field("value", value)
                .finish(),
            Instr::CommentStart => f.write_str("CommentStart"),
            Instr::CommentEnd => f.write_str("CommentEnd"),
            Instr::Call(_) => f.write_str("Call(..)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Truthy(Expr),
    Not(Expr),
    Compare { lhs: Expr, op: CompareOp, rhs: Expr },
    /// `empty` 的回退分支：对应槽位的循环一次都没有迭代
    FlagUnset(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Is,
    IsNot,
    In,
    NotIn,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "is" => Self::Is,
            "in" => Self::In,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// 两个循环变量时绑定键（下标或映射键）
    pub key: Option<String>,
    pub value: String,
    pub iterable: Expr,
}

/// 组装后的嵌套程序节点
#[derive(Clone)]
pub enum Node {
    Text(String),
    Print(Expr),
    Branch {
        arms: Vec<(Cond, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Loop { spec: ForLoop, body: Vec<Node> },
    SetFlag(usize),
    ClearFlag(usize),
    Cycle { key: String, values: Vec<Expr> },
    Assign { key: String, value: Expr },
    /// 注释块内的节点照常编译但永不执行
    Comment(Vec<Node>),
    Call(NativeFn),
}

#[derive(Clone, Default)]
pub struct Program {
    pub nodes: Vec<Node>,
}

impl Program {
    /// 程序中用到的全部过滤器名（含注释块内），按出现顺序去重
    pub fn filter_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_nodes(&self.nodes, &mut names);
        names
    }
}

fn collect_nodes<'p>(nodes: &'p [Node], names: &mut Vec<&'p str>) {
    for node in nodes {
        match node {
            Node::Print(expr) | Node::Assign { value: expr, .. } => collect_expr(expr, names),
            Node::Branch { arms, otherwise } => {
                for (cond, body) in arms {
                    match cond {
                        Cond::Truthy(e) | Cond::Not(e) => collect_expr(e, names),
                        Cond::Compare { lhs, rhs, .. } => {
                            collect_expr(lhs, names);
                            collect_expr(rhs, names);
                        }
                        Cond::FlagUnset(_) => {}
                    }
                    collect_nodes(body, names);
                }
                if let Some(body) = otherwise {
                    collect_nodes(body, names);
                }
            }
            Node::Loop { spec, body } => {
                collect_expr(&spec.iterable, names);
                collect_nodes(body, names);
            }
            Node::Cycle { values, .. } => values.iter().for_each(|e| collect_expr(e, names)),
            Node::Comment(body) => collect_nodes(body, names),
            Node::Text(_) | Node::SetFlag(_) | Node::ClearFlag(_) | Node::Call(_) => {}
        }
    }
}

fn collect_expr<'p>(expr: &'p Expr, names: &mut Vec<&'p str>) {
    if let Expr::Filter { name, input, arg } = expr {
        collect_expr(input, names);
        if let Some(arg) = arg {
            collect_expr(arg, names);
        }
        if !names.contains(&name.as_str()) {
            names.push(name);
        }
    }
}

enum Frame {
    Root(Vec<Node>),
    Branch {
        arms: Vec<(Cond, Vec<Node>)>,
        otherwise: Option<Vec<Node>>,
    },
    Loop { spec: ForLoop, body: Vec<Node> },
    Comment(Vec<Node>),
}

impl Frame {
    fn body(&mut self) -> Option<&mut Vec<Node>> {
        match self {
            Frame::Root(nodes) | Frame::Loop { body: nodes, .. } | Frame::Comment(nodes) => {
                Some(nodes)
            }
            Frame::Branch { otherwise: Some(nodes), .. } => Some(nodes),
            Frame::Branch { arms, otherwise: None } => arms.last_mut().map(|(_, nodes)| nodes),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Frame::Root(_) => "顶层",
            Frame::Branch { .. } => "if",
            Frame::Loop { .. } => "for",
            Frame::Comment(_) => "comment",
        }
    }
}

/// 将扁平片段流组装成嵌套程序
///
/// 片段不平衡（多余的 else、关错块、未闭合）时失败。
pub fn assemble(fragments: Vec<Instr>) -> Result<Program, CompileError> {
    let mut stack = vec![Frame::Root(Vec::new())];

    for instr in fragments {
        let node = match instr {
            Instr::Text(text) => Node::Text(text),
            Instr::Print(expr) => Node::Print(expr),
            Instr::SetFlag(slot) => Node::SetFlag(slot),
            Instr::ClearFlag(slot) => Node::ClearFlag(slot),
            Instr::Cycle { key, values } => Node::Cycle { key, values },
            Instr::Assign { key, value } => Node::Assign { key, value },
            Instr::Call(f) => Node::Call(f),
            Instr::If(cond) => {
                stack.push(Frame::Branch {
                    arms: vec![(cond, Vec::new())],
                    otherwise: None,
                });
                continue;
            }
            Instr::For(spec) => {
                stack.push(Frame::Loop { spec, body: Vec::new() });
                continue;
            }
            Instr::CommentStart => {
                stack.push(Frame::Comment(Vec::new()));
                continue;
            }
            Instr::ElseIf(cond) => {
                match stack.last_mut() {
                    Some(Frame::Branch { arms, otherwise: None }) => arms.push((cond, Vec::new())),
                    Some(Frame::Branch { .. }) => {
                        return Err(CompileError::Unbalanced("elif 出现在 else 之后".into()));
                    }
                    other => return Err(misplaced("elif", other)),
                }
                continue;
            }
            Instr::Else => {
                match stack.last_mut() {
                    Some(Frame::Branch { otherwise: otherwise @ None, .. }) => {
                        *otherwise = Some(Vec::new());
                    }
                    Some(Frame::Branch { .. }) => {
                        return Err(CompileError::Unbalanced("重复的 else".into()));
                    }
                    other => return Err(misplaced("else", other)),
                }
                continue;
            }
            Instr::EndIf => match stack.pop() {
                Some(Frame::Branch { arms, otherwise }) => Node::Branch { arms, otherwise },
                other => return Err(mismatched("if", other)),
            },
            Instr::EndFor => match stack.pop() {
                Some(Frame::Loop { spec, body }) => Node::Loop { spec, body },
                other => return Err(mismatched("for", other)),
            },
            Instr::CommentEnd => match stack.pop() {
                Some(Frame::Comment(nodes)) => Node::Comment(nodes),
                other => return Err(mismatched("comment", other)),
            },
        };
        match stack.last_mut().and_then(Frame::body) {
            Some(body) => body.push(node),
            None => return Err(CompileError::Unbalanced("关闭了不存在的块".into())),
        }
    }

    match stack.pop() {
        Some(Frame::Root(nodes)) if stack.is_empty() => Ok(Program { nodes }),
        Some(frame) => Err(CompileError::Unbalanced(format!("{} 块未闭合", frame.name()))),
        None => Err(CompileError::Unbalanced("关闭了不存在的块".into())),
    }
}

fn misplaced(what: &str, frame: Option<&mut Frame>) -> CompileError {
    let inside = frame.map_or("顶层", |f| f.name());
    CompileError::Unbalanced(format!("{what} 出现在 {inside} 中，而不是 if 中"))
}

fn mismatched(expected: &str, frame: Option<Frame>) -> CompileError {
    match frame {
        Some(Frame::Root(_)) | None => {
            CompileError::Unbalanced(format!("关闭 {expected} 时没有打开的块"))
        }
        Some(frame) => CompileError::Unbalanced(format!(
            "试图关闭 {expected}，但当前打开的是 {}",
            frame.name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::value::Value;

    fn truthy(name: &str) -> Cond {
        Cond::Truthy(Expr::Var(vec![name.to_string()]))
    }

    #[test]
    fn nests_branches_and_loops() {
        let program = assemble(vec![
            Instr::Text("a".into()),
            Instr::If(truthy("x")),
            Instr::Text("b".into()),
            Instr::ElseIf(truthy("y")),
            Instr::For(ForLoop {
                key: None,
                value: "n".into(),
                iterable: Expr::Literal(Value::Undefined),
            }),
            Instr::EndFor,
            Instr::Else,
            Instr::Text("c".into()),
            Instr::EndIf,
        ])
        .unwrap();
        assert_eq!(program.nodes.len(), 2);
        let Node::Branch { arms, otherwise } = &program.nodes[1] else {
            panic!("expected branch");
        };
        assert_eq!(arms.len(), 2);
        assert!(matches!(arms[1].1.as_slice(), [Node::Loop { .. }]));
        assert!(matches!(otherwise.as_deref(), Some([Node::Text(_)])));
    }

    #[test]
    fn else_outside_if_is_unbalanced() {
        let result = assemble(vec![
            Instr::For(ForLoop {
                key: None,
                value: "n".into(),
                iterable: Expr::Literal(Value::Undefined),
            }),
            Instr::Else,
        ]);
        assert!(matches!(result, Err(CompileError::Unbalanced(_))));
    }

    #[test]
    fn closing_the_wrong_block_is_unbalanced() {
        let result = assemble(vec![Instr::If(truthy("x")), Instr::EndFor]);
        assert!(matches!(result, Err(CompileError::Unbalanced(_))));
        let result = assemble(vec![Instr::EndIf]);
        assert!(matches!(result, Err(CompileError::Unbalanced(_))));
    }

    #[test]
    fn unclosed_block_is_unbalanced() {
        let result = assemble(vec![Instr::CommentStart, Instr::Text("x".into())]);
        assert!(matches!(result, Err(CompileError::Unbalanced(_))));
    }
}
