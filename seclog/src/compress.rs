//! Zstd 压缩编解码
//!
//! 流式压缩/解压，上下文跨调用复用（reset 仅重置会话，保留参数）。
//! 压缩端每次调用都执行 flush，保证对应的解压端逐段喂入时
//! 每段都能完整吐出对应的明文；一个日志块内的所有条目属于
//! 同一个 zstd 帧，解压端在块边界调用 [`ZstdCodec::reset_decompress`]。

use std::io;

use zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::constants::ZSTD_FRAME_MAGIC;

/// 解压输出缓冲的初始大小（帧未声明内容大小时）
const DECOMPRESS_INITIAL: usize = 10 * 1024;

/// 压缩与解压上下文
pub struct ZstdCodec {
    encoder: Encoder<'static>,
    decoder: Decoder<'static>,
}

impl ZstdCodec {
    /// 以默认压缩级别创建上下文
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            encoder: Encoder::new(zstd::DEFAULT_COMPRESSION_LEVEL)?,
            decoder: Decoder::new()?,
        })
    }

    /// 压缩输入并 flush 到输出缓冲区，返回写入的字节数
    ///
    /// 输出缓冲必须至少有 [`ZstdCodec::compress_bound`] 大小。
    /// 出错或输入为空时返回 0。
    pub fn compress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        if input.is_empty() || output.is_empty() {
            return 0;
        }

        let out_cap = output.len();
        let mut in_buf = InBuffer::around(input);
        let mut out_buf = OutBuffer::around(output);

        loop {
            match self.encoder.run(&mut in_buf, &mut out_buf) {
                Ok(_) => {}
                Err(_) => return 0,
            }
            if in_buf.pos >= input.len() {
                break;
            }
            if out_buf.pos() >= out_cap {
                // 输出缓冲不足，调用方未按 compress_bound 预留
                return 0;
            }
        }

        // flush：保证本次输入对应的压缩数据全部写出
        loop {
            match self.encoder.flush(&mut out_buf) {
                Ok(0) => break,
                Ok(_) => {
                    if out_buf.pos() >= out_cap {
                        return 0;
                    }
                }
                Err(_) => return 0,
            }
        }

        out_buf.pos()
    }

    /// 流式解压，输出缓冲从帧声明大小（未知时 10KB）起倍增
    ///
    /// 不会自动重置会话；跨条目连续解压同一帧时由调用方控制
    /// 在帧边界调用 [`ZstdCodec::reset_decompress`]。
    /// 出错时返回空。
    pub fn decompress(&mut self, input: &[u8]) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }

        let initial = zstd::zstd_safe::get_frame_content_size(input)
            .ok()
            .flatten()
            .map(|n| n as usize)
            .filter(|&n| n > 0)
            .unwrap_or(DECOMPRESS_INITIAL);

        let mut out = vec![0u8; initial];
        let mut written = 0usize;
        let mut in_buf = InBuffer::around(input);

        loop {
            let produced = {
                let mut out_buf = OutBuffer::around(&mut out[written..]);
                if self.decoder.run(&mut in_buf, &mut out_buf).is_err() {
                    return Vec::new();
                }
                out_buf.pos()
            };
            written += produced;

            if written >= out.len() {
                // 输出空间用尽，倍增后继续
                let new_len = out.len() * 2;
                out.resize(new_len, 0);
                continue;
            }
            if in_buf.pos >= input.len() {
                break;
            }
        }

        out.truncate(written);
        out
    }

    /// 输入大小对应的压缩输出上界
    pub fn compress_bound(input_size: usize) -> usize {
        zstd::zstd_safe::compress_bound(input_size)
    }

    /// 重置压缩会话（保留压缩级别等参数），开始新的帧
    pub fn reset_compress(&mut self) {
        let _ = self.encoder.reinit();
    }

    /// 重置解压会话，准备解码新的帧
    pub fn reset_decompress(&mut self) {
        let _ = self.decoder.reinit();
    }

    /// 识别 zstd 帧魔数
    pub fn is_compressed(input: &[u8]) -> bool {
        input.len() >= ZSTD_FRAME_MAGIC.len() && input[..4] == ZSTD_FRAME_MAGIC
    }
}

impl std::fmt::Debug for ZstdCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ZstdCodec")
    }
}
