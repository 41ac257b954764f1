//! mmap 缓存缓冲区
//!
//! 文件映射的可增长字节缓冲区，进程异常退出时由操作系统落盘，
//! 下次启动可从文件恢复未刷盘的数据。
//!
//! 文件布局：
//! ```text
//! ┌────────────┬────────────┬──────────────────────────────┐
//! │ magic (4B) │ used (4B)  │ payload ...                  │
//! └────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! 文件大小始终是页大小的整数倍，且不小于默认容量 512KB。
//! 扩容按页递增：解除映射 -> 扩展文件 -> 重新映射，数据由文件保证不丢。

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::warn;

use crate::constants::{DEFAULT_CACHE_CAPACITY, MMAP_HEADER_SIZE, MMAP_MAGIC};
use crate::sys::{align_up, page_size};

/// 文件映射缓冲区
pub struct MmapBuffer {
    path: PathBuf,
    file: File,
    map: MmapMut,
    capacity: usize,
}

impl MmapBuffer {
    /// 打开或创建映射文件
    ///
    /// 映射大小取 max(默认容量, 当前文件大小) 并按页对齐。
    /// 首次创建时写入魔数；已有文件头部有效则保留其中的数据（恢复路径）。
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let fs_size = file.metadata()?.len() as usize;
        let capacity = align_up(DEFAULT_CACHE_CAPACITY.max(fs_size), page_size());
        if fs_size != capacity {
            file.set_len(capacity as u64)?;
        }

        let map = unsafe { MmapOptions::new().len(capacity).map_mut(&file)? };

        let mut buf = Self {
            path,
            file,
            map,
            capacity,
        };
        buf.init_header();
        Ok(buf)
    }

    /// 魔数校验：创建后或恢复后映射是否有效
    pub fn is_valid(&self) -> bool {
        self.capacity >= MMAP_HEADER_SIZE
            && u32::from_le_bytes(self.map[0..4].try_into().unwrap()) == MMAP_MAGIC
    }

    /// 有效数据字节数
    pub fn size(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        u32::from_le_bytes(self.map[4..8].try_into().unwrap()) as usize
    }

    /// 有效数据切片
    pub fn data(&self) -> &[u8] {
        if !self.is_valid() {
            return &[];
        }
        let used = self.size();
        &self.map[MMAP_HEADER_SIZE..MMAP_HEADER_SIZE + used]
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// 已使用量与载荷容量的比例
    pub fn ratio(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.size() as f64 / (self.capacity - MMAP_HEADER_SIZE) as f64
    }

    /// 追加数据，容量不足时按页扩容
    pub fn push(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.is_valid() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "mmap buffer invalid",
            ));
        }
        let used = self.size();
        let new_used = used + data.len();
        self.ensure_capacity(new_used)?;
        let start = MMAP_HEADER_SIZE + used;
        self.map[start..start + data.len()].copy_from_slice(data);
        self.set_used(new_used);
        Ok(())
    }

    /// 调整有效数据大小，扩展部分内容未定义
    pub fn resize(&mut self, new_used: usize) -> io::Result<()> {
        if !self.is_valid() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "mmap buffer invalid",
            ));
        }
        self.ensure_capacity(new_used)?;
        self.set_used(new_used);
        Ok(())
    }

    /// 清空有效数据（不回收容量，不保证立即落盘）
    pub fn clear(&mut self) {
        if self.is_valid() {
            self.set_used(0);
        }
    }

    /// 建议性落盘
    pub fn sync(&self) -> io::Result<()> {
        self.map.flush()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 首次创建时写入魔数；魔数已存在则校验 used 字段的合法性
    fn init_header(&mut self) {
        if self.capacity < MMAP_HEADER_SIZE {
            return;
        }
        let magic = u32::from_le_bytes(self.map[0..4].try_into().unwrap());
        if magic != MMAP_MAGIC {
            self.map[0..4].copy_from_slice(&MMAP_MAGIC.to_le_bytes());
            self.set_used(0);
            return;
        }
        // 恢复路径：used 超界说明文件损坏，重置为空
        let used = u32::from_le_bytes(self.map[4..8].try_into().unwrap()) as usize;
        if used > self.capacity - MMAP_HEADER_SIZE {
            warn!(
                path = %self.path.display(),
                used, capacity = self.capacity,
                "mmap cache header corrupted, resetting"
            );
            self.set_used(0);
        }
    }

    fn set_used(&mut self, used: usize) {
        self.map[4..8].copy_from_slice(&(used as u32).to_le_bytes());
    }

    fn ensure_capacity(&mut self, new_used: usize) -> io::Result<()> {
        let need = new_used + MMAP_HEADER_SIZE;
        if need <= self.capacity {
            return Ok(());
        }
        let page = page_size();
        let mut dst = self.capacity;
        while dst < need {
            dst += page;
        }
        self.remap(dst)
    }

    /// 扩容：解除旧映射 -> 扩展文件 -> 重新映射
    fn remap(&mut self, new_cap: usize) -> io::Result<()> {
        // 先换成匿名占位映射以释放旧映射；中途失败时 is_valid 为 false
        let placeholder = MmapMut::map_anon(1)?;
        drop(std::mem::replace(&mut self.map, placeholder));
        self.capacity = 0;

        self.file.set_len(new_cap as u64)?;
        self.map = unsafe { MmapOptions::new().len(new_cap).map_mut(&self.file)? };
        self.capacity = new_cap;
        Ok(())
    }
}

impl std::fmt::Debug for MmapBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapBuffer")
            .field("path", &self.path)
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .finish()
    }
}
