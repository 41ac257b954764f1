//! 系统相关工具
//!
//! 页大小、进程/线程标识、文件大小等平台查询

use std::path::Path;

/// 获取系统内存页大小
#[cfg(unix)]
pub fn page_size() -> usize {
    // sysconf 不会失败，返回负值时退回常见页大小
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
pub fn page_size() -> usize {
    4096
}

/// 当前进程 ID
pub fn process_id() -> u32 {
    std::process::id()
}

/// 当前线程 ID
#[cfg(target_os = "linux")]
pub fn thread_id() -> u32 {
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u32
}

#[cfg(not(target_os = "linux"))]
pub fn thread_id() -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

/// 获取文件大小，文件不存在或不可读时返回 0
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// 向上对齐到 align 的整数倍（align 必须非零）
pub fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) / align * align
}
