//! 离线解码
//!
//! 读取加密日志文件，逐块用服务端私钥与块头内嵌的客户端公钥
//! 重新协商会话密钥，逐条解密、解压、解码并按模式渲染，
//! 结果按块追加到输出文件。块内任何损坏终止整个文件的解码，
//! 已写出的块保留。

use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::compress::ZstdCodec;
use crate::constants::{
    CHUNK_HEADER_SIZE, DECODE_PROGRESS_EVERY, ITEM_HEADER_SIZE, PRIV_KEY_LEN,
};
use crate::crypt::{self, AesCrypt, CryptError};
use crate::framing::{LogChunkHeader, LogItemHeader};
use crate::message::decode_record;
use crate::pattern::DecodeFormatter;

/// 解码错误
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("bad server private key")]
    BadKey,
    #[error("bad magic at offset {0}")]
    BadMagic(usize),
    #[error("truncated data at offset {0}")]
    Truncated(usize),
    #[error("crypt error: {0}")]
    Crypt(#[from] CryptError),
    #[error("decompress failed at offset {0}")]
    Decompress(usize),
    #[error("record decode failed at offset {0}")]
    Record(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 解码统计
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeStats {
    pub chunks: u64,
    pub items: u64,
}

/// 解码整个日志文件
///
/// `server_private_hex` 必须是 64 个十六进制字符；
/// 输出以二进制追加模式逐块写入 `output_path`。
pub fn decode_log_file(
    input_path: &Path,
    server_private_hex: &str,
    output_path: &Path,
    formatter: &DecodeFormatter,
) -> Result<DecodeStats, DecodeError> {
    let server_priv = parse_private_key(server_private_hex)?;

    let data = fs::read(input_path)?;
    if data.len() < CHUNK_HEADER_SIZE {
        return Err(DecodeError::Truncated(0));
    }

    // 确保输出目录存在
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut codec = ZstdCodec::new()?;
    let mut stats = DecodeStats::default();
    let mut offset = 0usize;
    let mut output = String::new();

    while offset < data.len() {
        if offset + CHUNK_HEADER_SIZE > data.len() {
            return Err(DecodeError::Truncated(offset));
        }
        let header = LogChunkHeader::parse(&data[offset..]).ok_or(DecodeError::BadMagic(offset))?;
        let chunk_size = header.size as usize;
        let payload_start = offset + CHUNK_HEADER_SIZE;
        // 减法形式避免 size 字段损坏时的加法溢出
        if chunk_size > data.len() - payload_start {
            return Err(DecodeError::Truncated(offset));
        }

        debug!(offset, chunk_size, "decoding chunk");

        // 用块内嵌的客户端公钥重新协商会话密钥；
        // 公钥不是合法曲线点时整个文件无法继续
        let shared = crypt::ecdh_shared(&server_priv, header.client_pub_key())
            .map_err(|_| DecodeError::BadKey)?;
        let crypt = AesCrypt::new(&shared)?;

        // 每个块是一个独立的压缩帧
        codec.reset_decompress();

        output.clear();
        let items = decode_chunk(
            &data[payload_start..payload_start + chunk_size],
            payload_start,
            &crypt,
            &mut codec,
            formatter,
            &mut output,
        )?;

        append_to_file(output_path, output.as_bytes())?;
        stats.chunks += 1;
        stats.items += items;
        offset = payload_start + chunk_size;
    }

    info!(
        chunks = stats.chunks,
        items = stats.items,
        output = %output_path.display(),
        "decode finished"
    );
    Ok(stats)
}

/// 校验并解析 64 位十六进制私钥
fn parse_private_key(hex_key: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_key = hex_key.trim();
    if hex_key.len() != PRIV_KEY_LEN * 2 || !hex_key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::BadKey);
    }
    crypt::hex_to_bytes(hex_key).map_err(|_| DecodeError::BadKey)
}

/// 解码一个块的全部条目，渲染结果追加到 `output`
fn decode_chunk(
    payload: &[u8],
    base_offset: usize,
    crypt: &AesCrypt,
    codec: &mut ZstdCodec,
    formatter: &DecodeFormatter,
    output: &mut String,
) -> Result<u64, DecodeError> {
    let mut offset = 0usize;
    let mut count: u64 = 0;

    while offset < payload.len() {
        let abs = base_offset + offset;
        if offset + ITEM_HEADER_SIZE > payload.len() {
            return Err(DecodeError::Truncated(abs));
        }
        let header = LogItemHeader::parse(&payload[offset..]).ok_or(DecodeError::BadMagic(abs))?;
        let item_size = header.size as usize;
        offset += ITEM_HEADER_SIZE;
        if item_size > payload.len() - offset {
            return Err(DecodeError::Truncated(abs));
        }

        let plain = crypt.decrypt(&payload[offset..offset + item_size])?;
        let encoded = codec.decompress(&plain);
        if encoded.is_empty() {
            return Err(DecodeError::Decompress(abs));
        }
        let record = decode_record(&encoded).ok_or(DecodeError::Record(abs))?;
        formatter.format(&record, output);

        offset += item_size;
        count += 1;
        if count % DECODE_PROGRESS_EVERY == 0 {
            info!(
                items = count,
                progress_pct = offset * 100 / payload.len(),
                "decoding"
            );
        }
    }

    Ok(count)
}

/// 二进制追加写入
fn append_to_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data)
}
