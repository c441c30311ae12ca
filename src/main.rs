//! Hive 命令行入口
//!
//! 用法：`hive [--config PATH] <query...>`，加载配置、注册内置工具、执行一次请求并输出 JSON 结果。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hive::config::load_config;
use hive::tools::{EchoTool, ToolRegistry};
use hive::EngineBuilder;
use serde_json::Map;

/// hive - 把自然语言请求编排成工具调用
#[derive(Parser, Debug)]
#[command(name = "hive", version, about = "Run a natural-language request through the task engine")]
struct CliArgs {
    /// 额外配置文件（覆盖 config/default.toml）
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 请求文本，多个词按空格拼接
    #[arg(required = true, value_name = "QUERY")]
    query: Vec<String>,
}

impl CliArgs {
    fn query(&self) -> String {
        self.query.join(" ")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let args = CliArgs::parse();
    let query = args.query();
    if query.trim().is_empty() {
        anyhow::bail!("query must not be blank");
    }
    let config = load_config(args.config).context("Failed to load config")?;

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);

    let engine = EngineBuilder::new(config)
        .with_tools(Arc::new(registry))
        .build();

    // 进度事件只写日志
    let mut events = engine.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => tracing::info!(event = %line, "progress"),
                Err(e) => tracing::debug!(error = %e, "unserialisable event"),
            }
        }
    });

    let result = engine.execute(&query, &Map::new()).await;
    drop(engine);
    let _ = progress.await;

    let output = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_words_joined() {
        let args = CliArgs::try_parse_from(["hive", "-c", "local.toml", "rotate", "then", "scale"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));
        assert_eq!(args.query(), "rotate then scale");
    }

    #[test]
    fn test_query_is_required() {
        assert!(CliArgs::try_parse_from(["hive", "--config", "local.toml"]).is_err());
    }
}
