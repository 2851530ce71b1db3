use crate::template::error::CompileError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// 三种标记的定界符对
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    #[serde(default = "default_statement")]
    pub statement: (String, String),
    #[serde(default = "default_expression")]
    pub expression: (String, String),
    #[serde(default = "default_comment")]
    pub comment: (String, String),
}

fn default_statement() -> (String, String) { ("{%".into(), "%}".into()) }
fn default_expression() -> (String, String) { ("{{".into(), "}}".into()) }
fn default_comment() -> (String, String) { ("{#".into(), "#}".into()) }

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            statement: default_statement(),
            expression: default_expression(),
            comment: default_comment(),
        }
    }
}

impl Delimiters {
    fn pairs(&self) -> [(MarkerKind, &(String, String)); 3] {
        [
            (MarkerKind::Statement, &self.statement),
            (MarkerKind::Expression, &self.expression),
            (MarkerKind::Comment, &self.comment),
        ]
    }

    /// 定界符不能为空，开定界符之间不能相同或互为前缀
    pub fn validate(&self) -> Result<(), CompileError> {
        let pairs = self.pairs();
        for (kind, (open, close)) in &pairs {
            if open.is_empty() || close.is_empty() {
                return Err(CompileError::Delimiters(format!("{kind:?} 定界符不能为空")));
            }
        }
        for (i, (a, (open_a, _))) in pairs.iter().enumerate() {
            for (b, (open_b, _)) in pairs.iter().skip(i + 1) {
                if open_a.starts_with(open_b.as_str()) || open_b.starts_with(open_a.as_str()) {
                    return Err(CompileError::Delimiters(format!(
                        "{a:?} 的开定界符 '{open_a}' 与 {b:?} 的 '{open_b}' 重叠"
                    )));
                }
            }
        }
        Ok(())
    }

    fn scanner(&self) -> Result<Regex, CompileError> {
        let pattern = self
            .pairs()
            .iter()
            .map(|(_, (open, close))| {
                format!("{}(.+?){}", regex::escape(open), regex::escape(close))
            })
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?s){pattern}")).map_err(|e| CompileError::Delimiters(e.to_string()))
    }
}

static DEFAULT_SCANNER: LazyLock<Regex> = LazyLock::new(|| {
    Delimiters::default()
        .scanner()
        .expect("默认定界符必然可以编译")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Statement,
    Expression,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'s> {
    /// 原样输出的文本
    Literal(&'s str),
    /// 定界符内的内容，`offset` 是开定界符的字节位置
    Marker {
        kind: MarkerKind,
        content: &'s str,
        offset: usize,
    },
}

/// 把模板源码切分为交替的文本与标记片段
///
/// 标记从最早出现的开定界符开始，到其后第一个同类闭定界符结束；
/// 找不到闭定界符或内容为空的标记按普通文本处理。
pub fn tokenize<'s>(source: &'s str, delimiters: &Delimiters) -> Result<Vec<Token<'s>>, CompileError> {
    delimiters.validate()?;
    let custom;
    let scanner = if *delimiters == Delimiters::default() {
        &*DEFAULT_SCANNER
    } else {
        custom = delimiters.scanner()?;
        &custom
    };

    let kinds = [MarkerKind::Statement, MarkerKind::Expression, MarkerKind::Comment];
    let mut tokens = Vec::new();
    let mut last = 0;

    for caps in scanner.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Literal(&source[last..whole.start()]));
        }
        // 三个分组中恰好有一个参与匹配
        if let Some((kind, inner)) = kinds
            .iter()
            .enumerate()
            .find_map(|(i, kind)| caps.get(i + 1).map(|m| (*kind, m)))
        {
            tokens.push(Token::Marker {
                kind,
                content: inner.as_str(),
                offset: whole.start(),
            });
        }
        last = whole.end();
    }

    if last < source.len() {
        tokens.push(Token::Literal(&source[last..]));
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token<'_>> {
        tokenize(src, &Delimiters::default()).unwrap()
    }

    #[test]
    fn literal_only_source_is_one_token() {
        assert_eq!(lex("plain text"), vec![Token::Literal("plain text")]);
        assert!(lex("").is_empty());
    }

    #[test]
    fn markers_split_literals() {
        let tokens = lex("a {{ x }} b {% if y %}c{# note #}");
        assert_eq!(
            tokens,
            vec![
                Token::Literal("a "),
                Token::Marker { kind: MarkerKind::Expression, content: " x ", offset: 2 },
                Token::Literal(" b "),
                Token::Marker { kind: MarkerKind::Statement, content: " if y ", offset: 12 },
                Token::Literal("c"),
                Token::Marker { kind: MarkerKind::Comment, content: " note ", offset: 23 },
            ]
        );
    }

    #[test]
    fn marker_stops_at_first_close() {
        let tokens = lex("{{ a }} }}");
        assert_eq!(tokens[0], Token::Marker { kind: MarkerKind::Expression, content: " a ", offset: 0 });
        assert_eq!(tokens[1], Token::Literal(" }}"));
    }

    #[test]
    fn empty_marker_is_text() {
        assert_eq!(lex("a{{}}b"), vec![Token::Literal("a{{}}b")]);
        assert_eq!(lex("{%%}"), vec![Token::Literal("{%%}")]);
    }

    #[test]
    fn unclosed_open_delimiter_is_text() {
        assert_eq!(lex("isn't {\na }?"), vec![Token::Literal("isn't {\na }?")]);
        assert_eq!(lex("{{ never closed"), vec![Token::Literal("{{ never closed")]);
    }

    #[test]
    fn custom_delimiters() {
        let delims = Delimiters {
            statement: ("<%".into(), "%>".into()),
            expression: ("[[".into(), "]]".into()),
            comment: ("<!--".into(), "-->".into()),
        };
        let tokens = tokenize("{{ x }}[[ y ]]<% z %>", &delims).unwrap();
        assert_eq!(tokens[0], Token::Literal("{{ x }}"));
        assert!(matches!(tokens[1], Token::Marker { kind: MarkerKind::Expression, content: " y ", .. }));
        assert!(matches!(tokens[2], Token::Marker { kind: MarkerKind::Statement, content: " z ", .. }));
    }

    #[test]
    fn overlapping_delimiters_are_rejected() {
        let delims = Delimiters {
            statement: ("{".into(), "}".into()),
            ..Delimiters::default()
        };
        assert!(matches!(delims.validate(), Err(CompileError::Delimiters(_))));
    }
}
