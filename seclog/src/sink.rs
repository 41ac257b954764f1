//! 高吞吐加密日志接收器
//!
//! 热路径：记录在调用线程本地编码，随后在接收器互斥锁内
//! 压缩、加密、连同条目头写入 master 缓存；master 用量超过
//! 水位且 slave 空闲时交换双缓冲，并把刷盘任务投递到专属 runner。
//! 刷盘任务把 slave 内容包上块头追加到滚动日志文件，
//! 定时清理任务按修改时间淘汰最旧的日志文件。
//!
//! 双缓冲约定：
//! - 写入方只追加 master，刷盘方只读取 slave
//! - 只有观察到 `slave_free == true` 并成功 CAS 的线程执行交换
//! - 只有刷盘任务把 `slave_free` 置回 true
//! - 刷盘失败时 slave 保持脏状态，下一次刷盘重试同一批数据

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Local;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::buffer::MemoryBuf;
use crate::compress::ZstdCodec;
use crate::constants::{
    CACHE_HIGH_WATERMARK, LOG_FILE_EXT, MASTER_CACHE_NAME, MAX_RECORD_SIZE, SEC1_PUB_KEY_LEN,
    SESSION_PUB_NAME, SLAVE_CACHE_NAME,
};
use crate::crypt::{self, AesCrypt, CryptError};
use crate::executor::{Executor, RunnerId, REPEAT_FOREVER};
use crate::framing::{LogChunkHeader, LogItemHeader};
use crate::message::{encode_record, Record};
use crate::mmap::MmapBuffer;
use crate::sys;

/// 接收器专属 runner 的注册标识
const SINK_RUNNER_TAG: RunnerId = 1;

/// 接收器错误（仅在构造时向调用方传播）
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("crypt error: {0}")]
    Crypt(#[from] CryptError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// 接收器配置
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// 缓存文件与滚动日志文件所在目录，不存在时创建
    pub directory: PathBuf,
    /// 滚动日志文件名中时间戳之前的前缀
    pub file_prefix: String,
    /// 服务端 SEC1 非压缩公钥的十六进制编码
    pub server_public_key_hex: String,
    /// 清理任务执行周期
    pub retention_scan_interval: Duration,
    /// 单个滚动日志文件的大小上限
    pub single_file_size: u64,
    /// 全部滚动日志文件的总大小预算
    pub total_files_size: u64,
}

impl SinkConfig {
    pub fn new(
        directory: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
        server_public_key_hex: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            file_prefix: file_prefix.into(),
            server_public_key_hex: server_public_key_hex.into(),
            retention_scan_interval: Duration::from_secs(5 * 60),
            single_file_size: 4 * 1024 * 1024,
            total_files_size: 100 * 1024 * 1024,
        }
    }
}

/// 互斥锁保护的热路径状态
struct HotState {
    master: MmapBuffer,
    codec: ZstdCodec,
    crypt: AesCrypt,
    /// 压缩输出暂存
    compressed: MemoryBuf,
    /// 条目头 + 密文的组帧暂存，保证一次性追加
    framed: MemoryBuf,
}

/// 刷盘侧共享状态，被刷盘/清理任务持有
struct FlushCore {
    conf: SinkConfig,
    slave: Mutex<MmapBuffer>,
    slave_free: AtomicBool,
    /// 写入块头的客户端公钥；恢复阶段为上一会话的公钥，
    /// 恢复完成后切换为本会话的临时公钥
    client_pub_key: Mutex<Vec<u8>>,
    current_file: Mutex<Option<PathBuf>>,
}

/// 加密日志接收器
pub struct EffectiveSink {
    conf: SinkConfig,
    runner: RunnerId,
    hot: Mutex<HotState>,
    core: Arc<FlushCore>,
    executor: Executor,
}

thread_local! {
    /// 每个生产线程独立的编码缓冲，避免竞争
    static ENCODE_BUF: RefCell<MemoryBuf> = RefCell::new(MemoryBuf::new());
}

impl EffectiveSink {
    /// 创建接收器
    ///
    /// 启动流程：建目录、注册专属 runner、生成临时密钥对并与
    /// 服务端公钥协商会话密钥、打开双缓存、恢复上次残留数据、
    /// 注册周期清理任务。
    pub fn new(conf: SinkConfig) -> Result<Self, SinkError> {
        info!(
            dir = %conf.directory.display(),
            prefix = %conf.file_prefix,
            interval_secs = conf.retention_scan_interval.as_secs(),
            single_file_size = conf.single_file_size,
            total_files_size = conf.total_files_size,
            "effective sink starting"
        );

        std::fs::create_dir_all(&conf.directory)?;

        let executor = Executor::new();
        let runner = executor.new_runner(SINK_RUNNER_TAG);

        let (client_priv, client_pub) = crypt::generate_keypair();
        let server_pub = crypt::hex_to_bytes(&conf.server_public_key_hex)
            .map_err(|e| SinkError::Config(format!("bad server public key: {e}")))?;
        let shared = crypt::ecdh_shared(&client_priv, &server_pub)
            .map_err(|e| SinkError::Config(format!("key agreement failed: {e}")))?;
        let crypt = AesCrypt::new(&shared)?;

        let master = MmapBuffer::open(conf.directory.join(MASTER_CACHE_NAME))?;
        let slave = MmapBuffer::open(conf.directory.join(SLAVE_CACHE_NAME))?;
        if !master.is_valid() || !slave.is_valid() {
            return Err(SinkError::Config(String::from("cache mapping invalid")));
        }

        // 缓存中的残留数据是上一会话的密钥加密的，恢复块
        // 必须带上一会话的公钥，解码端才能协商出正确的密钥
        let session_pub_path = conf.directory.join(SESSION_PUB_NAME);
        let prev_pub = std::fs::read(&session_pub_path)
            .ok()
            .filter(|v| v.len() == SEC1_PUB_KEY_LEN);

        let core = Arc::new(FlushCore {
            conf: conf.clone(),
            slave: Mutex::new(slave),
            slave_free: AtomicBool::new(true),
            client_pub_key: Mutex::new(prev_pub.unwrap_or_else(|| client_pub.clone())),
            current_file: Mutex::new(None),
        });

        let sink = Self {
            conf,
            runner,
            hot: Mutex::new(HotState {
                master,
                codec: ZstdCodec::new()?,
                crypt,
                compressed: MemoryBuf::new(),
                framed: MemoryBuf::new(),
            }),
            core,
            executor,
        };

        sink.recover();

        // 恢复完成后切换为本会话的公钥并持久化
        *sink.core.client_pub_key.lock().unwrap() = client_pub.clone();
        if let Err(e) = std::fs::write(&session_pub_path, &client_pub) {
            warn!(error = %e, "persist session public key failed");
        }

        // 周期清理任务与刷盘共用同一个 runner，保证文件操作串行
        let retention_core = Arc::clone(&sink.core);
        sink.executor.post_repeated(
            sink.runner,
            move || retention_core.eliminate_files(),
            sink.conf.retention_scan_interval,
            REPEAT_FOREVER,
        );

        Ok(sink)
    }

    /// 写入一条记录（任意线程调用，不向调用方抛错）
    ///
    /// 流程：线程本地编码 -> 锁内压缩 + 加密 + 写 master ->
    /// 锁外检查水位决定是否交换缓冲并触发刷盘。
    pub fn log(&self, record: &Record) {
        ENCODE_BUF.with(|cell| {
            let mut buf = cell.borrow_mut();
            encode_record(record, &mut buf);
            if buf.len() > MAX_RECORD_SIZE {
                // 超限记录替换为占位，保留元信息
                warn!(size = buf.len(), "record too large, replaced with placeholder");
                let placeholder = Record {
                    level: record.level,
                    timestamp: record.timestamp,
                    process_id: record.process_id,
                    thread_id: record.thread_id,
                    line: record.line,
                    file_name: record.file_name.clone(),
                    func_name: record.func_name.clone(),
                    message: b"[record too large]".to_vec(),
                };
                encode_record(&placeholder, &mut buf);
            }
            self.write_encoded(buf.as_slice());
        });
    }

    /// 阻塞刷盘：确保调用时刻之前写入的记录全部进入日志文件
    pub fn flush(&self) {
        self.post_flush();
        self.executor.wait_idle(self.runner);

        // 第一轮刷盘期间 master 可能又积累了数据，再交换刷一次
        if self
            .core
            .slave_free
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.switch_cache();
        }
        self.post_flush();
        self.executor.wait_idle(self.runner);
    }

    fn write_encoded(&self, plain: &[u8]) {
        let ratio = {
            let mut guard = self.hot.lock().unwrap();
            let hot = &mut *guard;

            // master 为空说明上一个块已交换走，开始新的压缩帧
            if hot.master.is_empty() {
                hot.codec.reset_compress();
            }

            hot.compressed.resize(ZstdCodec::compress_bound(plain.len()));
            let n = hot.codec.compress(plain, hot.compressed.as_mut_slice());
            if n == 0 {
                error!("compress failed, record dropped");
                return;
            }

            let cipher = hot.crypt.encrypt(&hot.compressed.as_slice()[..n]);

            hot.framed.clear();
            hot.framed
                .append(&LogItemHeader::new(cipher.len() as u32).to_bytes());
            hot.framed.append(&cipher);
            if let Err(e) = hot.master.push(hot.framed.as_slice()) {
                error!(error = %e, "write to master cache failed, record dropped");
                return;
            }
            hot.master.ratio()
        };

        if ratio > CACHE_HIGH_WATERMARK {
            if self
                .core
                .slave_free
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.switch_cache();
            }
            // slave 尚未空闲时同样投递，失败过的刷盘借此重试
            self.post_flush();
        }
    }

    /// 交换 master 与 slave（锁内完成，写入方与刷盘方各见一半）
    fn switch_cache(&self) {
        let mut hot = self.hot.lock().unwrap();
        let mut slave = self.core.slave.lock().unwrap();
        std::mem::swap(&mut hot.master, &mut *slave);
        debug!(pending = slave.size(), "cache switched");
    }

    fn post_flush(&self) {
        let core = Arc::clone(&self.core);
        self.executor.post(self.runner, move || core.cache_to_file());
    }

    /// 启动恢复：上次进程残留在缓存中的数据先于新数据刷盘
    fn recover(&self) {
        let slave_dirty = !self.core.slave.lock().unwrap().is_empty();
        if slave_dirty {
            info!("recovering slave cache from previous session");
            self.core.slave_free.store(false, Ordering::Release);
            self.post_flush();
            self.executor.wait_idle(self.runner);
        }

        let master_dirty = !self.hot.lock().unwrap().master.is_empty();
        if master_dirty {
            info!("recovering master cache from previous session");
            if self
                .core
                .slave_free
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.switch_cache();
            }
            self.post_flush();
            self.executor.wait_idle(self.runner);
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.conf
    }
}

impl Drop for EffectiveSink {
    fn drop(&mut self) {
        // 等待已投递的刷盘任务完成；master 中未刷盘的数据
        // 由 mmap 文件保存，下次启动时恢复
        self.executor.wait_idle(self.runner);
    }
}

impl FlushCore {
    /// 刷盘任务（只在接收器专属 runner 上执行）
    fn cache_to_file(&self) {
        if self.slave_free.load(Ordering::Acquire) {
            return;
        }

        let mut slave = self.slave.lock().unwrap();
        if slave.is_empty() {
            self.slave_free.store(true, Ordering::Release);
            return;
        }

        let path = self.next_file_path();
        let pub_key = self.client_pub_key.lock().unwrap().clone();
        let header = LogChunkHeader::new(slave.size() as u64, &pub_key);

        let write = (|| -> io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(&header.to_bytes())?;
            file.write_all(slave.data())?;
            Ok(())
        })();

        match write {
            Ok(()) => {
                debug!(path = %path.display(), bytes = slave.size(), "chunk flushed");
                slave.clear();
                self.slave_free.store(true, Ordering::Release);
            }
            Err(e) => {
                // slave 保持脏状态，下一次刷盘重试
                error!(path = %path.display(), error = %e, "flush failed, will retry");
            }
        }
    }

    /// 计算当前输出文件路径，超限时滚动到新的时间戳文件
    fn next_file_path(&self) -> PathBuf {
        let mut current = self.current_file.lock().unwrap();

        if let Some(path) = &*current {
            if sys::file_size(path) <= self.conf.single_file_size {
                return path.clone();
            }
        }

        let stem = format!(
            "{}_{}",
            self.conf.file_prefix,
            Local::now().format("%Y%m%d%H%M%S")
        );
        let mut path = self.conf.directory.join(format!("{stem}.{LOG_FILE_EXT}"));

        // 同一秒内多次滚动时追加递增序号保证唯一
        if current.is_some() && path.exists() {
            let index = std::fs::read_dir(&self.conf.directory)
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| {
                            e.file_name().to_string_lossy().starts_with(stem.as_str())
                        })
                        .count()
                })
                .unwrap_or(0);
            path = self
                .conf
                .directory
                .join(format!("{stem}_{index}.{LOG_FILE_EXT}"));
        }

        if current.as_ref() != Some(&path) {
            info!(path = %path.display(), "log file path");
        }
        *current = Some(path.clone());
        path
    }

    /// 清理任务：按修改时间从新到旧累加大小，超出预算的文件删除。
    /// 最新文件永不删除；删除失败仅告警。
    fn eliminate_files(&self) {
        let entries = match std::fs::read_dir(&self.conf.directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "retention scan failed");
                return;
            }
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == LOG_FILE_EXT)
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let mtime = meta.modified().ok()?;
                Some((e.path(), mtime, meta.len()))
            })
            .collect();

        // 最近修改的在前
        files.sort_by(|a, b| b.1.cmp(&a.1));

        let mut used: u64 = 0;
        for (i, (path, _, size)) in files.iter().enumerate() {
            used += size;
            if used > self.conf.total_files_size && i != 0 {
                match std::fs::remove_file(path) {
                    Ok(()) => info!(path = %path.display(), "retention removed file"),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "retention remove failed")
                    }
                }
            }
        }
    }
}
