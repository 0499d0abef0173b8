use std::time::Duration;

use anyhow::{Context, Result};
use batchd::init_logging;
use batchd_api::HttpHeadClient;
use batchd_core::{ControlClient, Job, Signal};
use clap::{Parser, Subcommand};
use serde::Serialize;

/// batchd 控制客户端
#[derive(Parser, Debug)]
#[command(name = "batchctl")]
#[command(version)]
#[command(about = "分布式批处理作业调度系统 - 命令行控制工具")]
struct Cli {
    /// Head服务地址
    #[arg(long, default_value = "http://127.0.0.1:7070")]
    head_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 提交作业
    SendEvent {
        /// 过程定义ID
        procedure_id: String,
        /// 作业ID，默认与过程ID相同
        #[arg(long)]
        job_id: Option<String>,
        /// 作业参数，KEY=VALUE，可重复
        #[arg(short, long = "setting", value_parser = parse_setting)]
        settings: Vec<(String, String)>,
        /// 资源条件，覆盖过程定义自带的条件
        #[arg(short, long)]
        requirement: Option<String>,
        /// 等待Worker认领的超时时间 (秒)
        #[arg(long)]
        timeout_seconds: Option<u64>,
    },
    /// 等待任务状态变化，默认直到任务结束
    Wait {
        task_id: String,
        /// 已知的状态指纹
        #[arg(long)]
        fingerprint: Option<u32>,
        /// 单次长轮询超时 (毫秒)
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,
        /// 只等待一次变化
        #[arg(long)]
        once: bool,
    },
    /// 取消任务
    Cancel { task_id: String },
    /// 向运行中的任务发送信号
    Signal {
        task_id: String,
        /// 信号名，例如 TERM、INT、KILL
        signal: String,
    },
    /// 查看任务详情
    Show { task_id: String },
    /// 列出所有任务
    ShowTasks,
    /// 列出可用的过程定义
    Procedures,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("参数格式应为 KEY=VALUE: {raw}")),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("序列化输出失败")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("warn", "compact")?;

    let cli = Cli::parse();
    let client = HttpHeadClient::new(&cli.head_url)?;

    match cli.command {
        Commands::SendEvent {
            procedure_id,
            job_id,
            settings,
            requirement,
            timeout_seconds,
        } => {
            let job = Job {
                job_id: job_id.unwrap_or_else(|| procedure_id.clone()),
                procedure_id,
                settings,
                requirement: requirement.unwrap_or_default(),
                timeout_seconds,
            };
            print_json(&client.send_event(job).await?)?;
        }
        Commands::Wait {
            task_id,
            fingerprint,
            timeout_ms,
            once,
        } => {
            let timeout = Duration::from_millis(timeout_ms);
            let mut known = fingerprint;
            loop {
                let task = client.wait_task(&task_id, known, timeout).await?;
                if known != Some(task.fingerprint) {
                    print_json(&task)?;
                }
                if once || task.state.is_terminal() {
                    break;
                }
                known = Some(task.fingerprint);
            }
        }
        Commands::Cancel { task_id } => {
            print_json(&client.cancel_task(&task_id).await?)?;
        }
        Commands::Signal { task_id, signal } => {
            print_json(&client.signal_task(Signal { task_id, signal }).await?)?;
        }
        Commands::Show { task_id } => {
            print_json(&client.show_task(&task_id).await?)?;
        }
        Commands::ShowTasks => {
            print_json(&client.show_tasks().await?)?;
        }
        Commands::Procedures => {
            print_json(&client.procedures().await?)?;
        }
    }

    Ok(())
}
