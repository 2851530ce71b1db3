pub mod codegen;
pub mod error;
pub mod expr;
pub mod filters;
pub mod lexer;
pub mod parser;
pub mod render;
pub mod tags;
pub mod value;

use codegen::Program;
use error::{CompileError, RenderError};
use filters::FilterTable;
use lexer::Delimiters;
use parser::Compiler;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tags::TagTable;
use value::Context;

/// 语法配置：标签表、过滤器表和三对定界符
#[derive(Clone)]
pub struct Grammar {
    pub tags: TagTable,
    pub filters: Arc<FilterTable>,
    pub delimiters: Delimiters,
}

impl Default for Grammar {
    fn default() -> Self {
        Self {
            tags: tags::builtin_tags(),
            filters: Arc::new(filters::builtin_filters()),
            delimiters: Delimiters::default(),
        }
    }
}

static DEFAULT_GRAMMAR: LazyLock<Grammar> = LazyLock::new(Grammar::default);

/// 进程级默认语法
pub fn default_grammar() -> &'static Grammar {
    &DEFAULT_GRAMMAR
}

/// 单次编译的覆盖项
///
/// 每个字段整体替换对应类别，不与内置项合并：只给出部分标签表时，
/// 未列出的内置标签随之消失。
#[derive(Clone, Default)]
pub struct GrammarOverrides {
    pub tags: Option<TagTable>,
    pub filters: Option<FilterTable>,
    pub delimiters: Option<Delimiters>,
}

impl Grammar {
    pub fn with_overrides(&self, overrides: &GrammarOverrides) -> Grammar {
        Grammar {
            tags: overrides.tags.clone().unwrap_or_else(|| self.tags.clone()),
            filters: overrides
                .filters
                .clone()
                .map(Arc::new)
                .unwrap_or_else(|| Arc::clone(&self.filters)),
            delimiters: overrides
                .delimiters
                .clone()
                .unwrap_or_else(|| self.delimiters.clone()),
        }
    }

    pub fn compile(&self, source: &str) -> Result<Template, CompileError> {
        let compiled = Compiler::new(self, source).run()?;
        Ok(Template {
            program: compiled.program,
            filters: Arc::clone(&self.filters),
            variables: compiled.variables,
        })
    }
}

/// 编译后的模板：可用不同上下文反复渲染
#[derive(Clone)]
pub struct Template {
    program: Program,
    filters: Arc<FilterTable>,
    variables: Vec<String>,
}

impl Template {
    /// 每次调用都使用全新的输出缓冲和循环标志；可能向 `ctx` 写入辅助键
    pub fn render(&self, ctx: &mut Context) -> Result<String, RenderError> {
        let mut scope = render::Scope::new(&self.filters);
        scope.exec(&self.program.nodes, ctx)?;
        Ok(scope.finish())
    }

    /// 模板中引用的变量原名，按出现顺序，每次出现记录一次
    pub fn referenced_variables(&self) -> &[String] {
        &self.variables
    }

    /// 模板用到、但编译时的过滤器表里没有的过滤器名（渲染时会失败）
    pub fn missing_filters(&self) -> Vec<&str> {
        self.program
            .filter_names()
            .into_iter()
            .filter(|name| !self.filters.contains_key(*name))
            .collect()
    }

    /// 去重后的变量名，保留首次出现的顺序
    pub fn unique_variables(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.variables
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// 使用默认语法编译模板
pub fn compile(source: &str) -> Result<Template, CompileError> {
    default_grammar().compile(source)
}

/// 以默认语法为基础，应用覆盖项后编译
pub fn compile_with(source: &str, overrides: &GrammarOverrides) -> Result<Template, CompileError> {
    let grammar = default_grammar().with_overrides(overrides);
    tracing::debug!(
        tags = grammar.tags.len(),
        filters = grammar.filters.len(),
        "使用覆盖后的语法编译模板"
    );
    grammar.compile(source)
}
