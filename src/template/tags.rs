use crate::template::codegen::{CompareOp, Cond, ForLoop, Instr};
use crate::template::error::CompileError;
use crate::template::expr::{Expr, sanitize, split_words};
use crate::template::parser::Compiler;
use crate::template::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 标签处理器：`(标签名之后的剩余文本, 编译器) -> 标签结果`
pub type TagHandler =
    Arc<dyn Fn(&str, &mut Compiler<'_>) -> Result<TagOutput, CompileError> + Send + Sync>;

pub type TagTable = HashMap<String, TagHandler>;

/// 标签处理结果
#[derive(Debug, Clone)]
pub enum TagOutput {
    /// 立即输出，不影响待闭合栈
    Inline(Vec<Instr>),
    /// 立即输出 `start`，并压入 `(close 或 "end" + 标签名, end)`
    Block {
        start: Vec<Instr>,
        end: Vec<Instr>,
        close: Option<String>,
    },
}

/// 进程级 make_guid 计数器，只在进程启动时归零（从 1000 开始）
static NEXT_GUID: AtomicU64 = AtomicU64::new(1000);

pub fn next_guid() -> u64 {
    NEXT_GUID.fetch_add(1, Ordering::Relaxed)
}

/// 向标签表注册一个处理器，同名覆盖
pub fn add_tag<F>(table: &mut TagTable, name: &str, f: F)
where
    F: Fn(&str, &mut Compiler<'_>) -> Result<TagOutput, CompileError> + Send + Sync + 'static,
{
    table.insert(name.to_string(), Arc::new(f));
}

/// 内置标签
pub fn builtin_tags() -> TagTable {
    let mut table = TagTable::new();
    add_tag(&mut table, "if", tag_if);
    add_tag(&mut table, "elif", tag_elif);
    add_tag(&mut table, "else", tag_else);
    add_tag(&mut table, "for", tag_for);
    add_tag(&mut table, "empty", tag_empty);
    add_tag(&mut table, "cycle", tag_cycle);
    add_tag(&mut table, "comment", tag_comment);
    add_tag(&mut table, "make_guid", tag_make_guid);
    table
}

/// 解析条件：`x`、`not x` 或 `x <op> y`
///
/// 运算符只在引号之外识别；双词运算符 `not in`、`is not` 优先。
pub fn parse_condition(rest: &str, c: &mut Compiler<'_>) -> Result<Cond, CompileError> {
    let words = split_words(rest);
    if words.is_empty() {
        return Err(c.error("缺少条件表达式"));
    }
    if words[0] == "not" && words.len() > 1 {
        return Ok(Cond::Not(c.expr(&words[1..].join(" "))));
    }

    for i in 1..words.len() {
        let (op, width) = match (words[i], words.get(i + 1)) {
            ("not", Some(&"in")) => (CompareOp::NotIn, 2),
            ("is", Some(&"not")) => (CompareOp::IsNot, 2),
            (word, _) => match CompareOp::from_word(word) {
                Some(op) => (op, 1),
                None => continue,
            },
        };
        let rhs = &words[i + width..];
        if rhs.is_empty() {
            return Err(c.error(format!("运算符 '{}' 缺少右侧表达式", words[i])));
        }
        let lhs = c.expr(&words[..i].join(" "));
        let rhs = c.expr(&rhs.join(" "));
        return Ok(Cond::Compare { lhs, op, rhs });
    }

    Ok(Cond::Truthy(c.expr(&words.join(" "))))
}

fn tag_if(rest: &str, c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    Ok(TagOutput::Block {
        start: vec![Instr::If(parse_condition(rest, c)?)],
        end: vec![Instr::EndIf],
        close: None,
    })
}

fn tag_elif(rest: &str, c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    Ok(TagOutput::Inline(vec![Instr::ElseIf(parse_condition(rest, c)?)]))
}

fn tag_else(_rest: &str, _c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    Ok(TagOutput::Inline(vec![Instr::Else]))
}

/// `for v in expr` 或 `for k, v in expr`
fn tag_for(rest: &str, c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    let words = split_words(rest);
    let Some(in_pos) = words.iter().position(|w| *w == "in") else {
        return Err(c.error(format!("for 语句缺少 'in' 关键字: {rest}")));
    };
    let iterable = &words[in_pos + 1..];
    if iterable.is_empty() {
        return Err(c.error("for 语句缺少被迭代的表达式"));
    }

    let names = words[..in_pos].join(" ");
    let mut vars = Vec::new();
    for name in names.split(',') {
        let var = sanitize(name);
        if var.is_empty() || var.contains('.') {
            return Err(c.error(format!("无效的循环变量 '{}'", name.trim())));
        }
        vars.push(var);
    }

    let (key, value) = match vars.as_slice() {
        [value] => (None, value.clone()),
        [key, value] => (Some(key.clone()), value.clone()),
        _ => return Err(c.error("循环变量只能有一个或两个")),
    };
    let iterable = c.expr(&iterable.join(" "));

    Ok(TagOutput::Block {
        start: vec![Instr::For(ForLoop { key, value, iterable })],
        end: vec![Instr::EndFor],
        close: None,
    })
}

/// `empty`：把外层 for 的结束片段折叠进自己的开始片段，
/// 之后的内容只在循环一次都没迭代时渲染
fn tag_empty(_rest: &str, c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    let slot = c.depth();
    if c.peek_pending().is_none_or(|top| top.close != "endfor") {
        return Err(c.error("empty 只能直接出现在 for 块中"));
    }
    let Some(for_entry) = c.pop_pending() else {
        return Err(c.error("empty 只能直接出现在 for 块中"));
    };

    let mut start = vec![Instr::SetFlag(slot)];
    start.extend(for_entry.end);
    start.push(Instr::If(Cond::FlagUnset(slot)));

    Ok(TagOutput::Block {
        start,
        end: vec![Instr::EndIf, Instr::ClearFlag(slot)],
        close: Some("endfor".into()),
    })
}

/// `cycle v1 v2 ...`：计数器挂在上下文上，每个 cycle 标签各有一个键
fn tag_cycle(rest: &str, c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    let words = split_words(rest);
    if words.is_empty() {
        return Err(c.error("cycle 至少需要一个值"));
    }
    let values = words.iter().map(|w| c.value(w)).collect();
    let key = format!("cyclevar_{}", c.next_cycle());
    Ok(TagOutput::Inline(vec![Instr::Cycle { key, values }]))
}

fn tag_comment(_rest: &str, _c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    Ok(TagOutput::Block {
        start: vec![Instr::CommentStart],
        end: vec![Instr::CommentEnd],
        close: None,
    })
}

/// `make_guid [name]`：编译期分配 id，渲染时写入上下文（默认键 `guid`）
fn tag_make_guid(rest: &str, _c: &mut Compiler<'_>) -> Result<TagOutput, CompileError> {
    let key = match sanitize(rest) {
        k if k.is_empty() => "guid".to_string(),
        k => k,
    };
    let id = i64::try_from(next_guid()).unwrap_or(i64::MAX);
    Ok(TagOutput::Inline(vec![Instr::Assign {
        key,
        value: Expr::Literal(Value::Int(id)),
    }]))
}
