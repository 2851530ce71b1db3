use crate::template::error::{CompileError, RenderError};
use crate::template::expr::sanitize;
use crate::template::value::Context;
use crate::template::{self, GrammarOverrides, Template};

/// 组件：名称 + 编译后的模板
///
/// 生命周期、属性命名空间和 DOM 更新由宿主框架负责，这里只提供
/// 框架需要的两件事：渲染，以及从模板推导出应观察的属性名。
#[derive(Clone)]
pub struct Component {
    name: String,
    template: Template,
}

impl Component {
    pub fn new(
        name: impl Into<String>,
        source: &str,
        overrides: &GrammarOverrides,
    ) -> Result<Self, CompileError> {
        let name = name.into();
        let template = template::compile_with(source, overrides)?;
        tracing::debug!(component = %name, "组件模板编译完成");
        Ok(Self { name, template })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// 模板引用的顶层变量名（点路径的第一段），去重并保留首次出现顺序
    pub fn observed_attributes(&self) -> Vec<String> {
        let mut attrs: Vec<String> = Vec::new();
        for raw in self.template.referenced_variables() {
            let cleaned = sanitize(raw);
            let Some(head) = cleaned.split('.').find(|s| !s.is_empty()) else {
                continue;
            };
            if !attrs.iter().any(|a| a == head) {
                attrs.push(head.to_string());
            }
        }
        attrs
    }

    pub fn render(&self, props: &mut Context) -> Result<String, RenderError> {
        self.template.render(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_attributes_are_top_level_and_unique() {
        let c = Component::new(
            "x-card",
            "{{ title }}{% if user.name %}{{ user.name|upper }}{% endif %}{{ 'lit' }}{{ 3 }}",
            &GrammarOverrides::default(),
        )
        .unwrap();
        assert_eq!(c.name(), "x-card");
        assert_eq!(c.observed_attributes(), vec!["title", "user"]);
    }

    #[test]
    fn renders_with_props() {
        let c = Component::new("x-hello", "Hi {{ who }}", &GrammarOverrides::default()).unwrap();
        let mut props: Context = [("who", "there")].into_iter().collect();
        assert_eq!(c.render(&mut props).unwrap(), "Hi there");
    }
}
