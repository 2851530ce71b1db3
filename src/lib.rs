//! 组件框架使用的微型模板语言
//!
//! 模板由三种标记组成：`{{ 表达式 }}`、`{% 语句标签 %}`、`{# 注释 #}`，
//! 其余为原样输出的文本。[`compile`] 单遍扫描源码，生成一段指令，
//! 组装为嵌套程序；[`Template::render`] 用给定上下文解释执行它。
//!
//! ```
//! use tinytpl::{compile, Context};
//!
//! let template = compile("Hello {{ name|upper }}!").unwrap();
//! let mut ctx: Context = [("name", "world")].into_iter().collect();
//! assert_eq!(template.render(&mut ctx).unwrap(), "Hello WORLD!");
//! ```

pub mod check;
pub mod component;
pub mod config;
pub mod template;

pub use component::Component;
pub use template::error::{CompileError, RenderError};
pub use template::filters::{Filter, FilterTable, add_filter};
pub use template::lexer::Delimiters;
pub use template::tags::{TagHandler, TagOutput, TagTable, add_tag};
pub use template::value::{Context, Value};
pub use template::{Grammar, GrammarOverrides, Template, compile, compile_with, default_grammar};
