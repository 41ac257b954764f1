//! 日志记录与线格式
//!
//! 记录编码为带字段标签的 TLV 序列，编码端与离线解码端共用同一套
//! 字段编号，新增字段不影响旧解码器（未知字段跳过）。
//!
//! 字段编号（varint 标签 = 编号 << 3 | 线类型）：
//! ```text
//! 1 level      varint (i32)
//! 2 timestamp  varint (i64, 毫秒)
//! 3 process_id varint (u32)
//! 4 thread_id  varint (u32)
//! 5 line       varint (u32)
//! 6 file_name  bytes
//! 7 func_name  bytes
//! 8 message    bytes
//! ```
//! 缺失字段解码为 0 / 空串。

use crate::buffer::MemoryBuf;
use crate::sys;

/// 日志级别，数字越大级别越高
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
    /// 关闭所有日志；解码时也用于承载未知级别值
    Off = 6,
}

impl Level {
    pub fn from_i32(v: i32) -> Level {
        match v {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            5 => Level::Fatal,
            _ => Level::Off,
        }
    }

    /// 单字母级别标识，未知级别为 'U'
    pub fn letter(self) -> char {
        match self {
            Level::Trace => 'V',
            Level::Debug => 'D',
            Level::Info => 'I',
            Level::Warn => 'W',
            Level::Error => 'E',
            Level::Fatal => 'F',
            Level::Off => 'U',
        }
    }
}

/// 一条日志记录
///
/// 由调用方构造后同步交给 sink；sink 在返回前拷贝所需内容。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub level: i32,
    /// Unix 毫秒时间戳
    pub timestamp: i64,
    pub process_id: u32,
    pub thread_id: u32,
    pub line: u32,
    pub file_name: String,
    pub func_name: String,
    pub message: Vec<u8>,
}

impl Record {
    /// 在调用点采集时间戳与进程/线程 ID 构造记录
    pub fn capture(
        level: Level,
        file_name: &str,
        func_name: &str,
        line: u32,
        message: impl AsRef<[u8]>,
    ) -> Self {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            level: level as i32,
            timestamp: now_ms,
            process_id: sys::process_id(),
            thread_id: sys::thread_id(),
            line,
            file_name: file_name.to_string(),
            func_name: func_name.to_string(),
            message: message.as_ref().to_vec(),
        }
    }

    pub fn level(&self) -> Level {
        Level::from_i32(self.level)
    }

    pub fn message_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// 线类型：varint
const WIRE_VARINT: u64 = 0;
/// 线类型：长度前缀字节串
const WIRE_BYTES: u64 = 2;

fn put_varint(buf: &mut MemoryBuf, mut v: u64) {
    loop {
        let b = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push_byte(b);
            return;
        }
        buf.push_byte(b | 0x80);
    }
}

fn put_tag(buf: &mut MemoryBuf, field: u64, wire: u64) {
    put_varint(buf, (field << 3) | wire);
}

fn put_varint_field(buf: &mut MemoryBuf, field: u64, v: u64) {
    put_tag(buf, field, WIRE_VARINT);
    put_varint(buf, v);
}

fn put_bytes_field(buf: &mut MemoryBuf, field: u64, data: &[u8]) {
    put_tag(buf, field, WIRE_BYTES);
    put_varint(buf, data.len() as u64);
    buf.append(data);
}

/// 将记录编码到输出缓冲区（覆盖原有内容）
pub fn encode_record(record: &Record, dest: &mut MemoryBuf) {
    dest.clear();
    put_varint_field(dest, 1, record.level as i64 as u64);
    put_varint_field(dest, 2, record.timestamp as u64);
    put_varint_field(dest, 3, record.process_id as u64);
    put_varint_field(dest, 4, record.thread_id as u64);
    put_varint_field(dest, 5, record.line as u64);
    put_bytes_field(dest, 6, record.file_name.as_bytes());
    put_bytes_field(dest, 7, record.func_name.as_bytes());
    put_bytes_field(dest, 8, &record.message);
}

fn read_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    while *pos < data.len() {
        let b = data[*pos];
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        v |= u64::from(b & 0x7F) << shift;
        if b & 0x80 == 0 {
            return Some(v);
        }
        shift += 7;
    }
    None
}

fn read_bytes<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let len = read_varint(data, pos)? as usize;
    // 减法形式避免长度字段恶意构造时的加法溢出
    if len > data.len() - *pos {
        return None;
    }
    let out = &data[*pos..*pos + len];
    *pos += len;
    Some(out)
}

/// 从字节序列解码记录；格式非法时返回 None
pub fn decode_record(data: &[u8]) -> Option<Record> {
    let mut record = Record::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let tag = read_varint(data, &mut pos)?;
        let field = tag >> 3;
        let wire = tag & 0x7;
        match (field, wire) {
            (1, WIRE_VARINT) => record.level = read_varint(data, &mut pos)? as i32,
            (2, WIRE_VARINT) => record.timestamp = read_varint(data, &mut pos)? as i64,
            (3, WIRE_VARINT) => record.process_id = read_varint(data, &mut pos)? as u32,
            (4, WIRE_VARINT) => record.thread_id = read_varint(data, &mut pos)? as u32,
            (5, WIRE_VARINT) => record.line = read_varint(data, &mut pos)? as u32,
            (6, WIRE_BYTES) => {
                record.file_name = String::from_utf8_lossy(read_bytes(data, &mut pos)?).into_owned()
            }
            (7, WIRE_BYTES) => {
                record.func_name = String::from_utf8_lossy(read_bytes(data, &mut pos)?).into_owned()
            }
            (8, WIRE_BYTES) => record.message = read_bytes(data, &mut pos)?.to_vec(),
            // 未知字段：按线类型跳过
            (_, WIRE_VARINT) => {
                read_varint(data, &mut pos)?;
            }
            (_, WIRE_BYTES) => {
                read_bytes(data, &mut pos)?;
            }
            _ => return None,
        }
    }

    Some(record)
}
