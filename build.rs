use std::process::Command;

/// 为 `tinytpl --version` 注入构建信息
fn main() {
    let commit = run("git", &["rev-parse", "--short", "HEAD"]);
    let build_time = run("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]);
    let target = env_or_unknown("TARGET");
    let profile = env_or_unknown("PROFILE");

    for (key, value) in [
        ("TINYTPL_GIT_COMMIT", commit),
        ("TINYTPL_BUILD_TIME", build_time),
        ("TINYTPL_BUILD_TARGET", target),
        ("TINYTPL_BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// 执行命令取 stdout，失败时返回 "unknown"
fn run(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn env_or_unknown(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| "unknown".to_string())
}
