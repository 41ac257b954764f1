//! seclog - 客户端加密日志库
//!
//! 特性：
//! - 高吞吐：调用线程只做编码 + 压缩 + 加密 + 内存追加，文件 IO 全部异步
//! - 防篡改：每条记录 AES-128-CBC 加密，会话密钥由 ECDH 协商，
//!   明文密钥不落地、不进代码
//! - 省空间：块级 zstd 流式压缩，连续记录共享压缩上下文
//! - 断电恢复：双缓冲由 mmap 文件支撑，异常退出后下次启动自动补刷
//! - 滚动与淘汰：按大小滚动日志文件，按总预算淘汰最旧文件
//!
//! 文件格式：
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Chunk1 │ Chunk2 │ ...                                        │
//! └──────────────────────────────────────────────────────────────┘
//! Chunk:
//! ┌───────────┬──────────┬───────────────┬────────────────────────┐
//! │ magic(8B) │ size(8B) │ pub_key(128B) │ Item1 │ Item2 │ ...    │
//! └───────────┴──────────┴───────────────┴────────────────────────┘
//! Item:
//! ┌───────────┬──────────┬─────────────────────────────────────────┐
//! │ magic(4B) │ size(4B) │ IV(16B) ‖ aes_cbc(zstd(record))         │
//! └───────────┴──────────┴─────────────────────────────────────────┘
//! ```
//!
//! 写入侧用服务端公钥，解码侧（[`decode`]）用服务端私钥与
//! 块头内嵌的客户端公钥重新协商出同一会话密钥。

pub mod buffer;
pub mod compress;
pub mod constants;
pub mod crypt;
pub mod decode;
pub mod executor;
pub mod framing;
pub mod message;
pub mod mmap;
pub mod pattern;
pub mod sink;
pub mod sys;
pub mod thread_pool;

#[cfg(test)]
mod tests;

pub use decode::{decode_log_file, DecodeError, DecodeStats};
pub use executor::{Executor, RepeatId, RunnerId, REPEAT_FOREVER};
pub use message::{Level, Record};
pub use pattern::DecodeFormatter;
pub use sink::{EffectiveSink, SinkConfig, SinkError};
pub use thread_pool::{TaskError, TaskFuture, ThreadPool};
