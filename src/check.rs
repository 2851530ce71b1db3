use crate::config::Config;
use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

pub struct CheckResult {
    pub checked: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// 并行编译模板目录下的全部模板，收集编译错误和渲染期隐患
pub fn run(project_root: &Path, config: &Config) -> Result<CheckResult> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let templates_dir = project_root.join(&config.templates.dir);
    if !templates_dir.exists() {
        warnings.push(format!("模板目录 {}/ 不存在", config.templates.dir));
        return Ok(CheckResult { checked: 0, errors, warnings });
    }

    let mut files = Vec::new();
    collect_templates(&templates_dir, &config.templates.extensions, &mut files)?;
    files.sort();

    let grammar = crate::template::default_grammar().with_overrides(&config.overrides());
    let outcomes: Vec<(Vec<String>, Vec<String>)> = files
        .par_iter()
        .map(|path| {
            let name = path.strip_prefix(project_root).unwrap_or(path).display().to_string();
            check_file(path, &name, &grammar)
        })
        .collect();

    for (file_errors, file_warnings) in outcomes {
        errors.extend(file_errors);
        warnings.extend(file_warnings);
    }

    tracing::debug!(files = files.len(), "模板检查完成");
    Ok(CheckResult {
        checked: files.len(),
        errors,
        warnings,
    })
}

fn check_file(
    path: &Path,
    name: &str,
    grammar: &crate::template::Grammar,
) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            errors.push(format!("{name}: 读取失败：{e}"));
            return (errors, warnings);
        }
    };

    match grammar.compile(&source) {
        Ok(template) => {
            for filter in template.missing_filters() {
                warnings.push(format!("{name}: 过滤器 '{filter}' 未注册，渲染时会失败"));
            }
        }
        Err(e) => errors.push(format!("{name}: {e}")),
    }
    (errors, warnings)
}

/// 递归收集指定扩展名的模板文件
fn collect_templates(dir: &Path, extensions: &[String], files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_templates(&path, extensions, files)?;
        } else if path
            .extension()
            .is_some_and(|ext| extensions.iter().any(|e| ext == e.as_str()))
        {
            files.push(path);
        }
    }
    Ok(())
}
