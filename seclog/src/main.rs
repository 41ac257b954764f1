//! seclog 命令行工具
//!
//! 用法：
//!   seclog keygen                              # 生成服务端密钥对（十六进制）
//!   seclog demo --dir <目录> --key <公钥> -n N # 写入 N 条示例日志后刷盘

use std::io;

use clap::{Parser, Subcommand};
use seclog::{crypt, EffectiveSink, Level, Record, SinkConfig};

#[derive(Parser)]
#[command(name = "seclog")]
#[command(about = "Encrypted client-side logging toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成 secp256r1 密钥对（公钥配置写入端，私钥用于解码）
    Keygen,

    /// 写入示例日志（验证部署配置）
    Demo {
        /// 日志目录
        #[arg(short, long, default_value = "./seclog_demo")]
        dir: String,

        /// 服务端公钥（十六进制）
        #[arg(short, long)]
        key: String,

        /// 写入条数
        #[arg(short = 'n', long, default_value = "1000")]
        count: u32,

        /// 文件名前缀
        #[arg(short, long, default_value = "demo")]
        prefix: String,
    },
}

fn main() -> io::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => cmd_keygen(),
        Commands::Demo {
            dir,
            key,
            count,
            prefix,
        } => cmd_demo(&dir, &key, count, &prefix),
    }
}

/// 生成并打印密钥对
fn cmd_keygen() -> io::Result<()> {
    let (private, public) = crypt::generate_keypair();
    println!("private: {}", crypt::bytes_to_hex(&private));
    println!("public:  {}", crypt::bytes_to_hex(&public));
    Ok(())
}

/// 写入示例日志
fn cmd_demo(dir: &str, key: &str, count: u32, prefix: &str) -> io::Result<()> {
    let conf = SinkConfig::new(dir, prefix, key);
    let sink = EffectiveSink::new(conf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    eprintln!("seclog: writing {count} records to {dir}");
    for i in 0..count {
        let record = Record::capture(
            Level::Info,
            "main.rs",
            "cmd_demo",
            line!(),
            format!("demo record {i}"),
        );
        sink.log(&record);
    }
    sink.flush();
    eprintln!("seclog: done, decode with `logdec <file> <private_hex> <out>`");
    Ok(())
}
