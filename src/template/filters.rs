use crate::template::error::RenderError;
use crate::template::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 过滤器：`(值, 可选参数) -> 值`，编译期按名引用，渲染期通过共享表调用
pub type Filter = Arc<dyn Fn(Value, Option<Value>) -> Result<Value, RenderError> + Send + Sync>;

pub type FilterTable = HashMap<String, Filter>;

/// 向过滤器表注册一个过滤器，同名覆盖
pub fn add_filter<F>(table: &mut FilterTable, name: &str, f: F)
where
    F: Fn(Value, Option<Value>) -> Result<Value, RenderError> + Send + Sync + 'static,
{
    table.insert(name.to_string(), Arc::new(f));
}

/// 内置过滤器
pub fn builtin_filters() -> FilterTable {
    let mut table = FilterTable::new();
    add_filter(&mut table, "upper", filter_upper);
    add_filter(&mut table, "lower", filter_lower);
    add_filter(&mut table, "capitalize", filter_capitalize);
    add_filter(&mut table, "safe", filter_safe);
    add_filter(&mut table, "add", filter_add);
    add_filter(&mut table, "subtract", filter_subtract);
    add_filter(&mut table, "default", filter_default);
    add_filter(&mut table, "divisibleby", filter_divisibleby);
    add_filter(&mut table, "escapejs", filter_escapejs);
    add_filter(&mut table, "first", filter_first);
    add_filter(&mut table, "last", filter_last);
    add_filter(&mut table, "join", filter_join);
    add_filter(&mut table, "length", filter_length);
    add_filter(&mut table, "pluralize", filter_pluralize);
    add_filter(&mut table, "slugify", filter_slugify);
    add_filter(&mut table, "truncate", filter_truncate);
    table
}

fn filter_upper(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(Value::Str(value.to_string().to_uppercase()))
}

fn filter_lower(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(Value::Str(value.to_string().to_lowercase()))
}

fn filter_capitalize(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    let value = value.to_string();
    let mut chars = value.chars();
    Ok(Value::Str(match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut result = first.to_uppercase().to_string();
            result.extend(chars);
            result
        }
    }))
}

fn filter_safe(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(match value {
        Value::Safe(_) => value,
        other => Value::Safe(other.to_string()),
    })
}

/// 两侧都是数值时相加，否则按字符串拼接
fn filter_add(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let arg = arg.ok_or_else(|| RenderError::filter("add", "缺少参数"))?;
    Ok(match (&value, &arg) {
        (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
            Some(n) => Value::Int(n),
            None => Value::Float(*a as f64 + *b as f64),
        },
        _ => match (value.as_f64(), arg.as_f64()) {
            (Some(a), Some(b)) => Value::Float(a + b),
            _ => Value::Str(format!("{value}{arg}")),
        },
    })
}

fn filter_subtract(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let arg = arg.ok_or_else(|| RenderError::filter("subtract", "缺少参数"))?;
    if let (Value::Int(a), Value::Int(b)) = (&value, &arg)
        && let Some(n) = a.checked_sub(*b)
    {
        return Ok(Value::Int(n));
    }
    match (value.to_number(), arg.to_number()) {
        (Some(a), Some(b)) => Ok(Value::Float(a - b)),
        _ => Err(RenderError::filter(
            "subtract",
            format!("无法对 '{value}' 和 '{arg}' 做减法"),
        )),
    }
}

fn filter_default(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    Ok(if value.is_truthy() { value } else { arg.unwrap_or_default() })
}

fn filter_divisibleby(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let arg = arg.ok_or_else(|| RenderError::filter("divisibleby", "缺少参数"))?;
    match (value.to_number(), arg.to_number()) {
        (Some(_), Some(d)) if d == 0.0 => Err(RenderError::filter("divisibleby", "除数为 0")),
        (Some(n), Some(d)) => Ok(Value::Bool(n % d == 0.0)),
        _ => Err(RenderError::filter(
            "divisibleby",
            format!("'{value}' 或 '{arg}' 不是数字"),
        )),
    }
}

/// 输出 JSON 字面量形式，便于嵌入脚本
fn filter_escapejs(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    serde_json::to_string(&value.to_json())
        .map(Value::Str)
        .map_err(|e| RenderError::filter("escapejs", e.to_string()))
}

fn filter_first(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(match value {
        Value::List(items) => items.into_iter().next().unwrap_or_default(),
        Value::Str(s) | Value::Safe(s) => {
            s.chars().next().map(|c| Value::Str(c.to_string())).unwrap_or_default()
        }
        _ => Value::Undefined,
    })
}

fn filter_last(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(match value {
        Value::List(items) => items.into_iter().last().unwrap_or_default(),
        Value::Str(s) | Value::Safe(s) => {
            s.chars().last().map(|c| Value::Str(c.to_string())).unwrap_or_default()
        }
        _ => Value::Undefined,
    })
}

fn filter_join(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let sep = arg.map_or_else(|| ",".to_string(), |a| a.to_string());
    match value {
        Value::List(items) => Ok(Value::Str(
            items.iter().map(ToString::to_string).collect::<Vec<_>>().join(&sep),
        )),
        other => Err(RenderError::filter("join", format!("'{other}' 不是序列"))),
    }
}

fn filter_length(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(Value::Int(value.len().unwrap_or(0) as i64))
}

/// 参数形如 `"复数,单数"`，值恰好为 1 时取单数，默认 `"s,"`
fn filter_pluralize(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let forms = arg.map_or_else(|| "s,".to_string(), |a| a.to_string());
    let mut parts = forms.splitn(2, ',');
    let plural = parts.next().unwrap_or_default();
    let singular = parts.next().unwrap_or_default();
    let is_one = value.as_f64() == Some(1.0);
    Ok(Value::Str(if is_one { singular } else { plural }.to_string()))
}

fn filter_slugify(value: Value, _: Option<Value>) -> Result<Value, RenderError> {
    Ok(Value::Str(
        value
            .to_string()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-"),
    ))
}

fn filter_truncate(value: Value, arg: Option<Value>) -> Result<Value, RenderError> {
    let len = match arg {
        Some(a) => a
            .to_number()
            .filter(|n| *n >= 0.0)
            .ok_or_else(|| RenderError::filter("truncate", format!("无效长度 '{a}'")))?
            as usize,
        None => 160,
    };
    let value = value.to_string();
    let chars: Vec<char> = value.chars().collect();
    Ok(Value::Str(if chars.len() <= len {
        value
    } else {
        let mut s: String = chars[..len].iter().collect();
        s.push('\u{2026}');
        s
    }))
}
