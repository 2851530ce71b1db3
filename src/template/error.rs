use thiserror::Error;

/// 编译期错误：模板在生成程序之前被拒绝
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{}", format_error("编译错误", *line, *col, context, &format!("未知标签 '{tag}'")))]
    UnknownTag {
        tag: String,
        line: usize,
        col: usize,
        context: String,
    },

    #[error("{}", format_error("语法错误", *line, *col, context, &format!("{tag}: {message}")))]
    InvalidTag {
        tag: String,
        line: usize,
        col: usize,
        message: String,
        context: String,
    },

    /// 模板结束时待闭合栈仍非空
    #[error("tinytpl 编译错误\n  错误：块未闭合，缺少 '{expected}'")]
    UnclosedBlock { expected: String },

    /// 片段流无法组装成合法嵌套的程序
    #[error("tinytpl 编译错误\n  错误：块结构不平衡，{0}")]
    Unbalanced(String),

    #[error("tinytpl 配置错误\n  错误：定界符无效，{0}")]
    Delimiters(String),
}

/// 渲染期错误：只有在编译后的模板执行时才会出现
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("未注册的过滤器 '{0}'")]
    UnknownFilter(String),

    #[error("过滤器 '{filter}' 执行失败：{message}")]
    Filter { filter: String, message: String },

    /// 自定义标签注入的原生回调失败
    #[error("{0}")]
    Native(String),
}

impl RenderError {
    pub fn filter(filter: &str, message: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.to_string(),
            message: message.into(),
        }
    }
}

fn format_error(kind: &str, line: usize, col: usize, context: &str, message: &str) -> String {
    let mut out = format!("tinytpl {kind}\n  → {line}:{col}\n\n");
    if !context.is_empty() {
        out.push_str(context);
    }
    out.push_str(&format!("  错误：{message}"));
    out
}

impl CompileError {
    pub fn unknown_tag(tag: &str, offset: usize, source: &str) -> Self {
        let (line, col) = line_col(source, offset);
        Self::UnknownTag {
            tag: tag.to_string(),
            line,
            col,
            context: build_error_context(source, line),
        }
    }

    pub fn invalid_tag(tag: &str, offset: usize, message: impl Into<String>, source: &str) -> Self {
        let (line, col) = line_col(source, offset);
        Self::InvalidTag {
            tag: tag.to_string(),
            line,
            col,
            message: message.into(),
            context: build_error_context(source, line),
        }
    }
}

/// 字节偏移 → 1 起始的行列号（列按字符计）
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let col = before[line_start..].chars().count() + 1;
    (line, col)
}

fn build_error_context(source: &str, error_line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start = error_line.saturating_sub(3);
    let end = (error_line + 2).min(lines.len());

    let mut ctx = String::new();
    let width = format!("{}", end).len();
    for i in start..end {
        let marker = if i + 1 == error_line { ">" } else { " " };
        ctx.push_str(&format!(
            "  {} {:>width$} | {}\n",
            marker,
            i + 1,
            lines.get(i).unwrap_or(&""),
            width = width,
        ));
    }
    ctx
}
