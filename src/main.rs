use std::path::Path;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{info, warn};

use admission_core::{init_logging, AppConfig, LogFormat};
use admission_infrastructure::init_metrics;

mod app;

use app::{ControlPlane, RequestBatch};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("admission-control")
        .version("1.0.0")
        .about("准入与弹性控制面")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径 (默认查找 config/admission.toml)"),
        )
        .arg(
            Arg::new("requests")
                .short('r')
                .long("requests")
                .value_name("FILE")
                .help("待评估请求的 JSON 文件")
                .required(true),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("本节点 ID")
                .default_value("admission-1"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别 (覆盖配置)")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式 (覆盖配置)")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("print-metrics")
                .long("print-metrics")
                .help("结束时将 Prometheus 指标输出到 stderr")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let requests_path = matches
        .get_one::<String>("requests")
        .context("缺少 --requests 参数")?;
    let node_id = matches
        .get_one::<String>("node-id")
        .map(String::as_str)
        .unwrap_or("admission-1");

    // 加载配置
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {config_path:?}"))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    // 初始化日志系统
    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;

    let metrics_handle = if config.observability.metrics_enabled {
        Some(init_metrics()?)
    } else {
        None
    };

    info!("启动准入控制面，节点 {}", node_id);

    let batch = load_requests(Path::new(requests_path))?;
    let plane = ControlPlane::from_config(&config, node_id);
    plane.bootstrap(node_id).await?;

    if !batch.events.is_empty() {
        let report = plane.replay(batch.events).await?;
        info!(
            "重放完成: 应用 {} 个事件, 跳过 {} 个重复",
            report.applied, report.duplicates
        );
    }

    for request in batch.requests {
        let record = plane.handle(request).await?;
        println!(
            "{}",
            serde_json::to_string(&record).context("序列化决策失败")?
        );
    }

    plane.persist_breakers().await?;

    let health = plane.controller().health().await?;
    info!(
        "队列深度 {}, 可用令牌 {:.1}, 打开的熔断器 {}, 策略等级 {}",
        health.queue_depth, health.available_tokens, health.open_breakers, health.policy_level
    );

    if matches.get_flag("print-metrics") {
        match &metrics_handle {
            Some(handle) => eprintln!("{}", handle.render()),
            None => warn!("指标已禁用，忽略 --print-metrics"),
        }
    }

    Ok(())
}

fn load_requests(path: &Path) -> Result<RequestBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取请求文件失败: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("解析请求文件失败: {}", path.display()))
}
