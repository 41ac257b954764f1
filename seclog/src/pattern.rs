//! 解码输出格式化
//!
//! `%` 指令模式编译为渲染片段序列，逐条渲染解码后的记录，
//! 避免每条记录重复解析模式字符串。
//!
//! 支持的指令：
//! ```text
//! %l 单字母级别 (V D I W E F，未知为 U)
//! %D UTC 日期时间 YYYY-MM-DD HH:MM:SS
//! %S 时间戳（秒）
//! %M 时间戳（毫秒）
//! %p 进程 ID
//! %t 线程 ID
//! %F 文件名
//! %f 函数名
//! %# 行号
//! %v 日志内容
//! %% 字面 '%'
//! ```
//! 其余 `%X` 原样输出。未设置模式时使用默认格式
//! `[level][ts_ms][pid:tid][file:func:line]msg`。
//! 每条渲染结果以换行符结尾。

use chrono::{TimeZone, Utc};

use crate::message::Record;

/// 渲染片段
#[derive(Debug, Clone)]
enum Piece {
    Literal(String),
    Level,
    DateTime,
    Seconds,
    Millis,
    ProcessId,
    ThreadId,
    FileName,
    FuncName,
    Line,
    Message,
}

/// 模式驱动的记录格式化器
#[derive(Debug, Clone, Default)]
pub struct DecodeFormatter {
    pieces: Vec<Piece>,
}

impl DecodeFormatter {
    /// 无模式的格式化器，使用默认格式
    pub fn new() -> Self {
        Self::default()
    }

    /// 按模式字符串构建
    pub fn with_pattern(pattern: &str) -> Self {
        let mut f = Self::default();
        f.set_pattern(pattern);
        f
    }

    /// 设置（重新编译）模式
    pub fn set_pattern(&mut self, pattern: &str) {
        self.pieces = compile_pattern(pattern);
    }

    /// 渲染一条记录并追加到输出，以换行符结尾
    pub fn format(&self, record: &Record, dest: &mut String) {
        if self.pieces.is_empty() {
            self.format_default(record, dest);
        } else {
            for piece in &self.pieces {
                render_piece(piece, record, dest);
            }
        }
        dest.push('\n');
    }

    fn format_default(&self, record: &Record, dest: &mut String) {
        use std::fmt::Write;
        let _ = write!(
            dest,
            "[{}][{}][{}:{}][{}:{}:{}]",
            record.level,
            record.timestamp,
            record.process_id,
            record.thread_id,
            record.file_name,
            record.func_name,
            record.line
        );
        dest.push_str(&record.message_lossy());
    }
}

fn compile_pattern(pattern: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        match chars.next() {
            Some(flag) => {
                let piece = match flag {
                    'l' => Some(Piece::Level),
                    'D' => Some(Piece::DateTime),
                    'S' => Some(Piece::Seconds),
                    'M' => Some(Piece::Millis),
                    'p' => Some(Piece::ProcessId),
                    't' => Some(Piece::ThreadId),
                    'F' => Some(Piece::FileName),
                    'f' => Some(Piece::FuncName),
                    '#' => Some(Piece::Line),
                    'v' => Some(Piece::Message),
                    '%' => {
                        literal.push('%');
                        None
                    }
                    other => {
                        // 未识别的指令原样输出
                        literal.push('%');
                        literal.push(other);
                        None
                    }
                };
                if let Some(p) = piece {
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(p);
                }
            }
            // 模式以单个 '%' 结尾
            None => literal.push('%'),
        }
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    pieces
}

fn render_piece(piece: &Piece, record: &Record, dest: &mut String) {
    use std::fmt::Write;
    match piece {
        Piece::Literal(s) => dest.push_str(s),
        Piece::Level => dest.push(record.level().letter()),
        Piece::DateTime => dest.push_str(&millis_to_date_string(record.timestamp)),
        Piece::Seconds => {
            let _ = write!(dest, "{}", record.timestamp / 1000);
        }
        Piece::Millis => {
            let _ = write!(dest, "{}", record.timestamp);
        }
        Piece::ProcessId => {
            let _ = write!(dest, "{}", record.process_id);
        }
        Piece::ThreadId => {
            let _ = write!(dest, "{}", record.thread_id);
        }
        Piece::FileName => dest.push_str(&record.file_name),
        Piece::FuncName => dest.push_str(&record.func_name),
        Piece::Line => {
            let _ = write!(dest, "{}", record.line);
        }
        Piece::Message => dest.push_str(&record.message_lossy()),
    }
}

/// 毫秒时间戳转 UTC `YYYY-MM-DD HH:MM:SS`
fn millis_to_date_string(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => String::from("-"),
    }
}
