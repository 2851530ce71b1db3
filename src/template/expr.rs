use crate::template::value::Value;
use regex::Regex;
use std::sync::LazyLock;

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)^('.*'|".*")$"#).unwrap());
static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

/// 管道表达式编译后的形态
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// 已清洗的点路径，例如 `a.b` → `["a", "b"]`
    Var(Vec<String>),
    Filter {
        name: String,
        input: Box<Expr>,
        arg: Option<Box<Expr>>,
    },
}

/// 编译 `base|f1:arg1|f2` 形式的管道
///
/// 过滤器按书写顺序从左到右包裹；遇到空的过滤器名即停止。
/// 引用到的变量原名追加到 `variables`（每次出现都追加一次）。
pub fn compile_expression(source: &str, variables: &mut Vec<String>) -> Expr {
    let mut parts = split_unquoted(source, |c| c == '|').into_iter();
    let mut expr = resolve_value(parts.next().unwrap_or_default(), variables);

    for spec in parts {
        let (name, arg) = match split_once_unquoted(spec, ':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (spec, None),
        };
        let name = sanitize(name);
        if name.is_empty() {
            break;
        }
        expr = Expr::Filter {
            name,
            input: Box::new(expr),
            arg: arg.map(|a| Box::new(resolve_value(a, variables))),
        };
    }
    expr
}

/// 值解析：引号字面量 → 字符串，纯数字 → 数值，其余 → 变量引用
///
/// 超出 i64 的纯数字退化为浮点，仍是字面量。空名不记入 `variables`。
pub fn resolve_value(source: &str, variables: &mut Vec<String>) -> Expr {
    let s = source.trim();
    if QUOTED_RE.is_match(s) && s.len() >= 2 {
        return Expr::Literal(Value::Str(s[1..s.len() - 1].to_string()));
    }
    if INTEGER_RE.is_match(s) {
        let value = match s.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => s.parse::<f64>().map_or(Value::Undefined, Value::Float),
        };
        return Expr::Literal(value);
    }
    if !s.is_empty() {
        variables.push(s.to_string());
    }
    Expr::Var(
        sanitize(s)
            .split('.')
            .filter(|seg| !seg.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// 只保留字母数字以及 `$` `_` `.`
pub fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '$' | '_' | '.'))
        .collect()
}

/// 在引号之外按分隔符切分，保留空片段
pub fn split_unquoted(s: &str, is_sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if is_sep(c) => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// 引号之外按空白切词，丢弃空词
pub fn split_words(s: &str) -> Vec<&str> {
    split_unquoted(s, char::is_whitespace)
        .into_iter()
        .filter(|w| !w.is_empty())
        .collect()
}

fn split_once_unquoted(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut parts = split_unquoted(s, |c| c == sep);
    if parts.len() < 2 {
        return None;
    }
    let first = parts.remove(0);
    Some((first, &s[first.len() + sep.len_utf8()..]))
}
