use crate::template::GrammarOverrides;
use crate::template::lexer::Delimiters;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE: &str = "tinytpl.toml";

/// tinytpl.toml 完整结构，所有字段都有默认值
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub delimiters: Delimiters,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
}

/// [log] 日志
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// [templates] 批量检查时扫描的目录与扩展名
#[derive(Debug, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_templates_dir")]
    pub dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            extensions: default_extensions(),
        }
    }
}

impl Config {
    /// 读取项目根目录下的 tinytpl.toml；文件不存在时使用默认配置
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            tracing::debug!("未找到 {}，使用默认配置", config_path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("读取 {CONFIG_FILE} 失败"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("解析 {CONFIG_FILE} 失败：{}", e))?;
        config.delimiters.validate()?;
        Ok(config)
    }

    /// 配置只影响定界符；标签与过滤器沿用默认语法
    pub fn overrides(&self) -> GrammarOverrides {
        GrammarOverrides {
            delimiters: Some(self.delimiters.clone()),
            ..Default::default()
        }
    }
}

// 默认值函数
fn default_log_level() -> String { "info".into() }
fn default_templates_dir() -> String { "templates".into() }
fn default_extensions() -> Vec<String> { vec!["html".into(), "tt".into()] }
