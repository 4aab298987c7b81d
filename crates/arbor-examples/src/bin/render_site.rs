//! 演示站点渲染工具：按命令行给出的路径渲染演示站点，输出状态、正文与诊断时间线。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin render_site -- /content/home.html /content/missing.html \
//!     --config arbor.toml --method GET --progress
//! ```
//! - 路径：一个或多个请求路径，缺省渲染 `/content/home.html`。
//! - `--config`：可选，TOML 配置文件（`[resolver]` 与 `[engine]` 两节）。
//! - `--method`：可选，请求方法，缺省为 `GET`。
//! - `--progress`：打印每个请求的诊断时间线。
//!
//! 日志级别由 `RUST_LOG` 控制，缺省为 `info`。

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use arbor_core::config::ArborSettings;
use arbor_core::observability::{RequestProgressTracker, install_fmt_subscriber};
use arbor_core::request::Method;
use arbor_examples::DemoSite;

fn main() {
    if let Err(error) = run() {
        eprintln!("渲染失败: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    install_fmt_subscriber("info").map_err(|error| format!("安装日志输出失败: {error}"))?;

    let mut paths = Vec::new();
    let mut config_path = None;
    let mut method = Method::Get;
    let mut show_progress = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| usage("--config 之后必须提供文件路径"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--method" => {
                let value = args
                    .next()
                    .ok_or_else(|| usage("--method 之后必须提供请求方法"))?;
                method = value
                    .parse()
                    .map_err(|_: std::convert::Infallible| usage("无法解析请求方法"))?;
            }
            "--progress" => show_progress = true,
            flag if flag.starts_with("--") => {
                return Err(usage(&format!("未知参数: {flag}")));
            }
            path => paths.push(path.to_owned()),
        }
    }
    if paths.is_empty() {
        paths.push("/content/home.html".to_owned());
    }

    let settings = match config_path {
        Some(path) => ArborSettings::from_toml_file(&path)
            .map_err(|error| format!("读取配置 {} 失败: {error}", path.display()))?,
        None => ArborSettings::default(),
    };
    let site = DemoSite::new(&settings).map_err(|error| format!("装配演示站点失败: {error}"))?;
    tracing::info!(filters = ?site.filters(), "demo site ready");

    for path in &paths {
        let tracker = Arc::new(RequestProgressTracker::new());
        let response = site
            .render(method.clone(), path, Some(tracker.clone()))
            .map_err(|error| format!("渲染 {path} 失败: {error}"))?;
        println!("== {method} {path} -> {}", response.status());
        println!("{}", response.body());
        if show_progress {
            println!("-- progress --");
            println!("{}", tracker.dump());
        }
    }
    Ok(())
}

fn usage(reason: &str) -> String {
    format!("{reason}\n用法: render_site [路径...] [--config 文件] [--method 方法] [--progress]")
}
