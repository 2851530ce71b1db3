use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tinytpl::component::Component;
use tinytpl::config::Config;
use tinytpl::template::value::Context;
use tinytpl::{check, template};

#[derive(Parser)]
#[command(name = "tinytpl", about = "微型模板语言编译器", version = long_version())]
struct Cli {
    /// 项目根目录（默认当前目录），tinytpl.toml 从这里读取
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 用 JSON 上下文渲染模板并输出到 stdout
    Render {
        /// 模板文件
        template: PathBuf,

        /// JSON 上下文文件（顶层必须是对象）
        #[arg(short, long)]
        context: Option<PathBuf>,
    },

    /// 列出模板引用的变量
    Vars {
        /// 模板文件
        template: PathBuf,

        /// 去重输出
        #[arg(long)]
        unique: bool,

        /// 输出组件应观察的顶层属性名
        #[arg(long, conflicts_with = "unique")]
        attributes: bool,
    },

    /// 编译模板目录下全部模板并报告错误
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 配置中的日志级别作为默认值，RUST_LOG 优先
    let config = Config::load(&cli.root);
    let default_level = config
        .as_ref()
        .map(|c| c.log.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .init();

    let config = config?;

    match cli.command {
        Commands::Render { template, context } => {
            let source = read_template(&template)?;
            let grammar = template::default_grammar().with_overrides(&config.overrides());
            let compiled = grammar
                .compile(&source)
                .map_err(|e| anyhow::anyhow!("{}: {e}", template.display()))?;

            let mut ctx = match context {
                Some(path) => load_context(&path)?,
                None => Context::new(),
            };
            let html = compiled
                .render(&mut ctx)
                .with_context(|| format!("渲染 {} 失败", template.display()))?;
            print!("{html}");
        }
        Commands::Vars { template, unique, attributes } => {
            let source = read_template(&template)?;
            let name = template
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let component = Component::new(name, &source, &config.overrides())
                .map_err(|e| anyhow::anyhow!("{}: {e}", template.display()))?;

            let names: Vec<String> = if attributes {
                component.observed_attributes()
            } else if unique {
                component
                    .template()
                    .unique_variables()
                    .into_iter()
                    .map(String::from)
                    .collect()
            } else {
                component.template().referenced_variables().to_vec()
            };
            for name in names {
                println!("{name}");
            }
        }
        Commands::Check => {
            let result = check::run(&cli.root, &config)?;

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!(
                    "检查通过：{} 个模板（{} 个警告）",
                    result.checked,
                    result.warnings.len()
                );
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
    }

    Ok(())
}

fn read_template(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("读取模板 {} 失败", path.display()))
}

fn load_context(path: &Path) -> anyhow::Result<Context> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取上下文 {} 失败", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("解析上下文 {} 失败", path.display()))?;
    match json {
        serde_json::Value::Object(map) => Ok(Context::from(map)),
        _ => anyhow::bail!("上下文 {} 的顶层必须是 JSON 对象", path.display()),
    }
}

const fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        "\ncommit:  ",
        env!("TINYTPL_GIT_COMMIT"),
        "\nbuild:   ",
        env!("TINYTPL_BUILD_TIME"),
        "\ntarget:  ",
        env!("TINYTPL_BUILD_TARGET"),
        "\nprofile: ",
        env!("TINYTPL_BUILD_PROFILE"),
    )
}
