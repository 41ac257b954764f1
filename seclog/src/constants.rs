//! 常量定义
//!
//! 日志文件格式与缓存文件的各种魔数、尺寸常量

/// 日志块头魔数（每次刷盘写入一个块）
pub const CHUNK_MAGIC: u64 = 0xDEAD_BEEF_DADA_1100;
/// 日志条目头魔数（块内每条加密记录一个）
pub const ITEM_MAGIC: u32 = 0xBE5F_BA11;
/// mmap 缓存文件头魔数
pub const MMAP_MAGIC: u32 = 0xDEAD_BEEF;

/// 块头大小: magic(8) + size(8) + pub_key(128)
pub const CHUNK_HEADER_SIZE: usize = 8 + 8 + 128;
/// 条目头大小: magic(4) + size(4)
pub const ITEM_HEADER_SIZE: usize = 4 + 4;
/// mmap 缓存文件头大小: magic(4) + used(4)
pub const MMAP_HEADER_SIZE: usize = 4 + 4;

/// 块头中公钥字段的总长度（65 字节 SEC1 公钥 + 零填充）
pub const CHUNK_PUB_KEY_FIELD: usize = 128;
/// SEC1 非压缩公钥长度: 0x04 || X(32) || Y(32)
pub const SEC1_PUB_KEY_LEN: usize = 65;
/// 私钥标量长度
pub const PRIV_KEY_LEN: usize = 32;
/// AES-128 密钥长度
pub const AES_KEY_LEN: usize = 16;
/// AES 分组大小，同时也是 IV 长度
pub const AES_BLOCK_LEN: usize = 16;

/// Zstd 帧魔数（小端字节序列）
pub const ZSTD_FRAME_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// mmap 缓存默认容量 512KB（按页大小向上取整后生效）
pub const DEFAULT_CACHE_CAPACITY: usize = 512 * 1024;
/// master 缓存触发切换的水位
pub const CACHE_HIGH_WATERMARK: f64 = 0.8;

/// 单条记录编码后的上限，超过则替换为占位记录
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// 解码时每处理多少条记录输出一次进度
pub const DECODE_PROGRESS_EVERY: u64 = 1000;

/// 主缓存文件名
pub const MASTER_CACHE_NAME: &str = "master_cache";
/// 从缓存文件名
pub const SLAVE_CACHE_NAME: &str = "slave_cache";
/// 会话公钥文件名（恢复时为上一会话的残留数据组帧）
pub const SESSION_PUB_NAME: &str = "session_pub";
/// 滚动日志文件扩展名
pub const LOG_FILE_EXT: &str = "log";
