//! logdec - 离线日志解码工具
//!
//! 用服务端私钥解码 seclog 产出的加密日志文件：
//!   logdec <input_log> <server_private_hex> <output_txt>
//!
//! 私钥必须是 64 个十六进制字符。任何错误以非零退出码结束，
//! 已解码的块保留在输出文件中。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use seclog::{decode_log_file, DecodeFormatter};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// 默认渲染模式，与写入端字段一一对应
const DEFAULT_PATTERN: &str = "[%l][%D:%S][%p:%t][%F:%f:%#]%v";

#[derive(Parser)]
#[command(name = "logdec")]
#[command(about = "Decode seclog encrypted log files", long_about = None)]
struct Cli {
    /// 输入日志文件
    input: PathBuf,

    /// 服务端私钥（64 个十六进制字符）
    key: String,

    /// 输出文本文件（追加写入）
    output: PathBuf,

    /// 渲染模式
    #[arg(short, long, default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("set tracing subscriber")?;

    let formatter = DecodeFormatter::with_pattern(&cli.pattern);
    let stats = decode_log_file(&cli.input, &cli.key, &cli.output, &formatter)
        .with_context(|| format!("decode {}", cli.input.display()))?;

    eprintln!(
        "logdec: {} chunks, {} records -> {}",
        stats.chunks,
        stats.items,
        cli.output.display()
    );
    Ok(())
}
