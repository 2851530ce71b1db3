use crate::template::Grammar;
use crate::template::codegen::{Instr, Program, assemble};
use crate::template::error::CompileError;
use crate::template::expr::{self, Expr};
use crate::template::lexer::{self, MarkerKind, Token};
use crate::template::tags::TagOutput;

/// 待闭合栈的一项：遇到 `close` 标签时输出 `end` 片段
#[derive(Debug, Clone)]
pub struct PendingClose {
    pub close: String,
    pub end: Vec<Instr>,
}

/// 单遍编译器状态，标签处理器通过它访问语法、表达式编译器和待闭合栈
pub struct Compiler<'a> {
    grammar: &'a Grammar,
    source: &'a str,
    fragments: Vec<Instr>,
    pending: Vec<PendingClose>,
    variables: Vec<String>,
    cycles: usize,
    current: (String, usize),
}

/// 编译结果：组装好的程序和引用到的变量名
pub struct Compiled {
    pub program: Program,
    pub variables: Vec<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(grammar: &'a Grammar, source: &'a str) -> Self {
        Self {
            grammar,
            source,
            fragments: Vec::new(),
            pending: Vec::new(),
            variables: Vec::new(),
            cycles: 0,
            current: (String::new(), 0),
        }
    }

    pub fn grammar(&self) -> &Grammar {
        self.grammar
    }

    /// 编译一条管道表达式，并记录其中引用的变量
    pub fn expr(&mut self, source: &str) -> Expr {
        expr::compile_expression(source, &mut self.variables)
    }

    /// 只解析单个值（字面量或变量），不处理过滤器
    pub fn value(&mut self, source: &str) -> Expr {
        expr::resolve_value(source, &mut self.variables)
    }

    /// 当前待闭合栈深度
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    pub fn peek_pending(&self) -> Option<&PendingClose> {
        self.pending.last()
    }

    pub fn pop_pending(&mut self) -> Option<PendingClose> {
        self.pending.pop()
    }

    /// 本次编译内 cycle 标签的序号
    pub fn next_cycle(&mut self) -> usize {
        let n = self.cycles;
        self.cycles += 1;
        n
    }

    /// 针对当前正在处理的标签构造带位置的错误
    pub fn error(&self, message: impl Into<String>) -> CompileError {
        let (tag, offset) = &self.current;
        CompileError::invalid_tag(tag, *offset, message, self.source)
    }

    fn statement(&mut self, content: &str, offset: usize) -> Result<(), CompileError> {
        let content = content.trim();
        let name = content.split_whitespace().next().unwrap_or_default();
        let rest = content[name.len()..].trim();

        // 与栈顶的闭合名相同：这是闭合块的唯一途径
        if self.pending.last().is_some_and(|top| top.close == name) {
            if let Some(top) = self.pending.pop() {
                tracing::trace!(close = name, "闭合块");
                self.fragments.extend(top.end);
            }
            return Ok(());
        }

        let grammar = self.grammar;
        let Some(handler) = grammar.tags.get(name) else {
            return Err(CompileError::unknown_tag(name, offset, self.source));
        };
        self.current = (name.to_string(), offset);

        match handler(rest, self)? {
            TagOutput::Inline(code) => self.fragments.extend(code),
            TagOutput::Block { start, end, close } => {
                self.fragments.extend(start);
                self.pending.push(PendingClose {
                    close: close.unwrap_or_else(|| format!("end{name}")),
                    end,
                });
            }
        }
        Ok(())
    }

    /// 逐个处理片段，最后检查待闭合栈并组装程序
    pub fn run(mut self) -> Result<Compiled, CompileError> {
        let tokens = lexer::tokenize(self.source, &self.grammar.delimiters)?;

        for token in tokens {
            match token {
                Token::Literal(text) => self.fragments.push(Instr::Text(text.to_string())),
                Token::Marker { kind: MarkerKind::Comment, .. } => {}
                Token::Marker { kind: MarkerKind::Expression, content, .. } => {
                    let expr = self.expr(content);
                    self.fragments.push(Instr::Print(expr));
                }
                Token::Marker { kind: MarkerKind::Statement, content, offset } => {
                    self.statement(content, offset)?;
                }
            }
        }

        if let Some(top) = self.pending.last() {
            return Err(CompileError::UnclosedBlock {
                expected: top.close.clone(),
            });
        }

        tracing::debug!(
            fragments = self.fragments.len(),
            variables = self.variables.len(),
            "模板片段生成完成"
        );
        let program = assemble(self.fragments)?;
        Ok(Compiled {
            program,
            variables: self.variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Result<Compiled, CompileError> {
        Compiler::new(&Grammar::default(), src).run()
    }

    #[test]
    fn unknown_tag_aborts_with_position() {
        let err = compile("ok\n  {% frobnicate x %}").err().unwrap();
        match err {
            CompileError::UnknownTag { tag, line, col, .. } => {
                assert_eq!(tag, "frobnicate");
                assert_eq!((line, col), (2, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unclosed_block_names_expected_close() {
        let err = compile("{% if x %}{% for a in b %}").err().unwrap();
        assert!(matches!(err, CompileError::UnclosedBlock { expected } if expected == "endfor"));
    }

    #[test]
    fn mismatched_close_is_unknown_tag() {
        // endif 不在栈顶，又不是已注册标签
        let err = compile("{% if x %}{% for a in b %}{% endif %}{% endfor %}").err().unwrap();
        assert!(matches!(err, CompileError::UnknownTag { tag, .. } if tag == "endif"));
    }

    #[test]
    fn records_every_variable_occurrence() {
        let compiled = compile("{{ a }}{% if a == b.c %}{{ d|default:e }}{% endif %}").unwrap();
        assert_eq!(compiled.variables, vec!["a", "a", "b.c", "d", "e"]);
    }

    #[test]
    fn comment_markers_emit_nothing() {
        let compiled = compile("a{# ignored {{ x }} #}b").unwrap();
        assert_eq!(compiled.program.nodes.len(), 2);
        assert!(compiled.variables.is_empty());
    }
}
