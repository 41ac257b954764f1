//! 日志文件帧格式
//!
//! 滚动日志文件是块的追加序列，块内是条目的紧凑序列，
//! 全部小端、无对齐填充：
//! ```text
//! 块:   ┌───────────┬───────────┬────────────────┬───────────────┐
//!       │ magic(8B) │ size(8B)  │ pub_key(128B)  │ payload(size) │
//!       └───────────┴───────────┴────────────────┴───────────────┘
//! 条目: ┌───────────┬───────────┬────────────────────────────────┐
//!       │ magic(4B) │ size(4B)  │ IV(16B) ‖ AES 密文 (size 字节) │
//!       └───────────┴───────────┴────────────────────────────────┘
//! ```
//! `pub_key` 前 65 字节是客户端 SEC1 非压缩公钥，其余为零填充，
//! 读取方必须忽略填充部分。

use crate::constants::{
    CHUNK_HEADER_SIZE, CHUNK_MAGIC, CHUNK_PUB_KEY_FIELD, ITEM_HEADER_SIZE, ITEM_MAGIC,
    SEC1_PUB_KEY_LEN,
};

/// 块头
#[derive(Debug, Clone)]
pub struct LogChunkHeader {
    pub magic: u64,
    /// 头部之后的载荷字节数
    pub size: u64,
    /// 客户端公钥字段（65 字节有效 + 零填充）
    pub pub_key: [u8; CHUNK_PUB_KEY_FIELD],
}

impl LogChunkHeader {
    /// 以给定载荷大小和客户端公钥构建块头
    ///
    /// `client_pub` 长度不足 65 字节时只拷贝实际长度，解码端校验。
    pub fn new(size: u64, client_pub: &[u8]) -> Self {
        let mut pub_key = [0u8; CHUNK_PUB_KEY_FIELD];
        let n = client_pub.len().min(CHUNK_PUB_KEY_FIELD);
        pub_key[..n].copy_from_slice(&client_pub[..n]);
        Self {
            magic: CHUNK_MAGIC,
            size,
            pub_key,
        }
    }

    /// 序列化为 144 字节
    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..16 + CHUNK_PUB_KEY_FIELD].copy_from_slice(&self.pub_key);
        buf
    }

    /// 从字节序列解析；长度不足或魔数不符返回 None
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        let magic = u64::from_le_bytes(data[0..8].try_into().unwrap());
        if magic != CHUNK_MAGIC {
            return None;
        }
        let size = u64::from_le_bytes(data[8..16].try_into().unwrap());
        let mut pub_key = [0u8; CHUNK_PUB_KEY_FIELD];
        pub_key.copy_from_slice(&data[16..16 + CHUNK_PUB_KEY_FIELD]);
        Some(Self {
            magic,
            size,
            pub_key,
        })
    }

    /// 公钥字段的有效部分（65 字节 SEC1）
    pub fn client_pub_key(&self) -> &[u8] {
        &self.pub_key[..SEC1_PUB_KEY_LEN]
    }

    pub fn is_valid(&self) -> bool {
        self.magic == CHUNK_MAGIC
    }
}

/// 条目头
#[derive(Debug, Clone, Copy)]
pub struct LogItemHeader {
    pub magic: u32,
    /// 密文（IV + AES 密文）字节数
    pub size: u32,
}

impl LogItemHeader {
    pub fn new(size: u32) -> Self {
        Self {
            magic: ITEM_MAGIC,
            size,
        }
    }

    pub fn to_bytes(&self) -> [u8; ITEM_HEADER_SIZE] {
        let mut buf = [0u8; ITEM_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// 从字节序列解析；长度不足或魔数不符返回 None
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ITEM_HEADER_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if magic != ITEM_MAGIC {
            return None;
        }
        let size = u32::from_le_bytes(data[4..8].try_into().unwrap());
        Some(Self { magic, size })
    }

    pub fn is_valid(&self) -> bool {
        self.magic == ITEM_MAGIC
    }
}
