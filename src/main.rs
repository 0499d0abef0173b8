use anyhow::Result;
use batchd::{start_application, AppMode, StartupConfig};
use clap::{Arg, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("batchd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式批处理作业调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/batchd.toml、batchd.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["head", "worker", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("worker-name")
                .long("worker-name")
                .value_name("NAME")
                .help("Worker名称，默认使用主机名"),
        )
        .arg(
            Arg::new("head-url")
                .long("head-url")
                .value_name("URL")
                .help("Head地址 (仅在worker模式下使用)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty", "compact"]),
        )
        .get_matches();

    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
        worker_name: matches.get_one::<String>("worker-name").cloned(),
        head_url: matches.get_one::<String>("head-url").cloned(),
    };

    start_application(startup, mode).await
}
