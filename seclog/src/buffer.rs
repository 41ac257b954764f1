//! 字节缓冲区
//!
//! 编码、压缩、加密各阶段复用的可增长字节缓冲区。
//! 容量按倍增策略扩展，只增不减（除非显式收缩），
//! 以便热路径上的 thread_local 缓冲在多次使用后不再分配。

/// 可增长字节缓冲区
///
/// `len() <= capacity()` 恒成立；`append` 在容量足够时不会重新分配。
#[derive(Debug, Default)]
pub struct MemoryBuf {
    buf: Vec<u8>,
}

impl MemoryBuf {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    /// 追加数据，容量不足时至少倍增
    pub fn append(&mut self, data: &[u8]) {
        self.ensure(self.buf.len() + data.len());
        self.buf.extend_from_slice(data);
    }

    pub fn push_byte(&mut self, b: u8) {
        self.ensure(self.buf.len() + 1);
        self.buf.push(b);
    }

    /// 调整长度；保留 min(旧长度, 新长度) 的前缀，扩展部分填零
    pub fn resize(&mut self, new_len: usize) {
        self.ensure(new_len);
        self.buf.resize(new_len, 0);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// 显式收缩到当前长度
    pub fn shrink_to_fit(&mut self) {
        self.buf.shrink_to_fit();
    }

    fn ensure(&mut self, need: usize) {
        let cap = self.buf.capacity();
        if need <= cap {
            return;
        }
        // 倍增扩容，避免频繁 realloc
        let new_cap = need.max(cap.saturating_mul(2)).max(64);
        self.buf.reserve_exact(new_cap - self.buf.len());
    }
}

impl AsRef<[u8]> for MemoryBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
