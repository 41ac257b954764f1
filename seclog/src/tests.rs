//! 单元测试模块
//!
//! 各组件的独立测试；端到端写入/解码流程见 tests/ 目录

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::MemoryBuf;
use crate::compress::ZstdCodec;
use crate::crypt::{self, AesCrypt, CryptError};
use crate::executor::{Executor, REPEAT_FOREVER};
use crate::framing::{LogChunkHeader, LogItemHeader};
use crate::message::{decode_record, encode_record, Level, Record};
use crate::mmap::MmapBuffer;
use crate::pattern::DecodeFormatter;
use crate::thread_pool::ThreadPool;

fn sample_record() -> Record {
    Record {
        level: Level::Info as i32,
        timestamp: 1_620_000_000_123,
        process_id: 1234,
        thread_id: 5678,
        line: 42,
        file_name: String::from("x.cpp"),
        func_name: String::from("F"),
        message: b"hello".to_vec(),
    }
}

#[test]
fn test_memory_buf_basic() {
    let mut buf = MemoryBuf::new();
    assert!(buf.is_empty());

    buf.append(b"hello");
    buf.append(b" world");
    assert_eq!(buf.as_slice(), b"hello world");
    assert_eq!(buf.len(), 11);

    // 截断保留前缀
    buf.resize(5);
    assert_eq!(buf.as_slice(), b"hello");

    // 扩展部分填零
    buf.resize(7);
    assert_eq!(buf.as_slice(), b"hello\0\0");

    buf.clear();
    assert!(buf.is_empty());
    assert!(buf.capacity() >= 7);
}

#[test]
fn test_memory_buf_growth() {
    let mut buf = MemoryBuf::with_capacity(16);
    let cap0 = buf.capacity();
    buf.append(&[0xAB; 1000]);
    assert!(buf.capacity() >= 1000);
    assert!(buf.capacity() >= cap0);
    assert_eq!(buf.len(), 1000);
    assert!(buf.as_slice().iter().all(|&b| b == 0xAB));
}

#[test]
fn test_record_roundtrip() {
    let record = sample_record();
    let mut buf = MemoryBuf::new();
    encode_record(&record, &mut buf);

    let decoded = decode_record(buf.as_slice()).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_record_empty_fields() {
    let record = Record::default();
    let mut buf = MemoryBuf::new();
    encode_record(&record, &mut buf);

    let decoded = decode_record(buf.as_slice()).unwrap();
    assert_eq!(decoded.level, 0);
    assert_eq!(decoded.timestamp, 0);
    assert_eq!(decoded.file_name, "");
    assert!(decoded.message.is_empty());
}

#[test]
fn test_record_decode_garbage() {
    // 非法 TLV：字节串长度超出剩余数据
    assert!(decode_record(&[0x32, 0xFF]).is_none());
}

#[test]
fn test_record_capture() {
    let record = Record::capture(Level::Warn, "sys.rs", "boot", 7, "up");
    assert_eq!(record.level, Level::Warn as i32);
    assert!(record.timestamp > 0);
    assert!(record.process_id > 0);
    assert_eq!(record.file_name, "sys.rs");
    assert_eq!(record.message, b"up");
}

#[test]
fn test_level_letters() {
    assert_eq!(Level::Trace.letter(), 'V');
    assert_eq!(Level::Debug.letter(), 'D');
    assert_eq!(Level::Info.letter(), 'I');
    assert_eq!(Level::Warn.letter(), 'W');
    assert_eq!(Level::Error.letter(), 'E');
    assert_eq!(Level::Fatal.letter(), 'F');
    assert_eq!(Level::from_i32(99).letter(), 'U');
}

#[test]
fn test_pattern_render() {
    let formatter = DecodeFormatter::with_pattern("[%l][%D:%S][%p:%t][%F:%f:%#]%v");
    let mut out = String::new();
    formatter.format(&sample_record(), &mut out);
    assert_eq!(
        out,
        "[I][2021-05-03 00:00:00:1620000000][1234:5678][x.cpp:F:42]hello\n"
    );
}

#[test]
fn test_pattern_escapes() {
    let formatter = DecodeFormatter::with_pattern("%%|%M|%Z|%");
    let mut out = String::new();
    let record = sample_record();
    formatter.format(&record, &mut out);
    // %% -> '%'，%Z 未识别原样保留，结尾单个 % 保留
    assert_eq!(out, "%|1620000000123|%Z|%\n");
}

#[test]
fn test_pattern_default_format() {
    let formatter = DecodeFormatter::new();
    let mut out = String::new();
    formatter.format(&sample_record(), &mut out);
    assert_eq!(out, "[2][1620000000123][1234:5678][x.cpp:F:42]hello\n");
}

#[test]
fn test_keypair_shapes() {
    let (private, public) = crypt::generate_keypair();
    assert_eq!(private.len(), 32);
    assert_eq!(public.len(), 65);
    // SEC1 非压缩点以 0x04 开头
    assert_eq!(public[0], 0x04);
}

#[test]
fn test_ecdh_symmetry() {
    let (priv_a, pub_a) = crypt::generate_keypair();
    let (priv_b, pub_b) = crypt::generate_keypair();

    let shared_ab = crypt::ecdh_shared(&priv_a, &pub_b).unwrap();
    let shared_ba = crypt::ecdh_shared(&priv_b, &pub_a).unwrap();
    assert_eq!(shared_ab, shared_ba);
    assert_eq!(shared_ab.len(), 32);
}

#[test]
fn test_ecdh_rejects_bad_peer() {
    let (private, _) = crypt::generate_keypair();
    assert!(crypt::ecdh_shared(&private, &[0u8; 65]).is_err());
    assert!(crypt::ecdh_shared(&private, &[0u8; 10]).is_err());
}

#[test]
fn test_hex_roundtrip() {
    let data = vec![0xDE, 0xAD, 0xBE, 0xEF];
    let hex = crypt::bytes_to_hex(&data);
    assert_eq!(crypt::hex_to_bytes(&hex).unwrap(), data);
    assert!(crypt::hex_to_bytes("zz").is_err());
}

#[test]
fn test_aes_roundtrip() {
    let crypt = AesCrypt::new(&[7u8; 32]).unwrap();
    let plain = b"the quick brown fox";

    let cipher = crypt.encrypt(plain);
    // IV(16) + PKCS#7 补齐到分组边界
    assert_eq!(cipher.len(), 16 + 32);
    assert_eq!(crypt.decrypt(&cipher).unwrap(), plain);

    // 每次加密使用新 IV，密文必须不同
    let cipher2 = crypt.encrypt(plain);
    assert_ne!(cipher, cipher2);
    assert_eq!(crypt.decrypt(&cipher2).unwrap(), plain);
}

#[test]
fn test_aes_errors() {
    assert!(matches!(
        AesCrypt::new(&[1u8; 8]),
        Err(CryptError::KeyTooShort(8))
    ));

    let crypt = AesCrypt::new(&[7u8; 16]).unwrap();
    assert!(matches!(
        crypt.decrypt(&[0u8; 10]),
        Err(CryptError::ShortCiphertext)
    ));

    // 错误密钥解密触发填充校验失败
    let cipher = crypt.encrypt(b"data");
    let other = AesCrypt::new(&[8u8; 16]).unwrap();
    assert!(other.decrypt(&cipher).is_err());
}

#[test]
fn test_aes_from_hex() {
    let crypt_bin = AesCrypt::new(&[0xAB; 16]).unwrap();
    let crypt_hex = AesCrypt::from_hex(&"ab".repeat(16)).unwrap();
    let cipher = crypt_bin.encrypt(b"x");
    assert_eq!(crypt_hex.decrypt(&cipher).unwrap(), b"x");
}

#[test]
fn test_compress_roundtrip() {
    let mut codec = ZstdCodec::new().unwrap();
    let input = b"hello hello hello hello hello".repeat(100);

    let mut out = vec![0u8; ZstdCodec::compress_bound(input.len())];
    let n = codec.compress(&input, &mut out);
    assert!(n > 0);
    assert!(n < input.len());
    assert!(ZstdCodec::is_compressed(&out[..n]));

    codec.reset_decompress();
    assert_eq!(codec.decompress(&out[..n]), input);
}

#[test]
fn test_compress_empty() {
    let mut codec = ZstdCodec::new().unwrap();
    let mut out = vec![0u8; 64];
    assert_eq!(codec.compress(&[], &mut out), 0);
    assert!(codec.decompress(&[]).is_empty());
}

#[test]
fn test_is_compressed_rejects_text() {
    assert!(!ZstdCodec::is_compressed(b"plain text log line"));
    assert!(!ZstdCodec::is_compressed(b"\x28\xB5"));
}

#[test]
fn test_compress_streaming_segments() {
    // 同一压缩会话的连续输出段：解压端按段连续喂入，
    // 每段各自完整吐出对应明文（块内多条目解码依赖此行为）
    let mut codec = ZstdCodec::new().unwrap();
    codec.reset_compress();

    let seg_a = b"first record payload".repeat(10);
    let seg_b = b"second record payload".repeat(10);

    let mut out_a = vec![0u8; ZstdCodec::compress_bound(seg_a.len())];
    let na = codec.compress(&seg_a, &mut out_a);
    assert!(na > 0);

    let mut out_b = vec![0u8; ZstdCodec::compress_bound(seg_b.len())];
    let nb = codec.compress(&seg_b, &mut out_b);
    assert!(nb > 0);

    codec.reset_decompress();
    assert_eq!(codec.decompress(&out_a[..na]), seg_a);
    assert_eq!(codec.decompress(&out_b[..nb]), seg_b);
}

#[test]
fn test_mmap_push_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache");

    {
        let mut buf = MmapBuffer::open(&path).unwrap();
        assert!(buf.is_valid());
        assert!(buf.is_empty());
        assert_eq!(buf.capacity() % crate::sys::page_size(), 0);

        buf.push(b"persisted data").unwrap();
        assert_eq!(buf.data(), b"persisted data");
        assert!(buf.ratio() > 0.0);
    }

    // 重新打开恢复数据
    {
        let mut buf = MmapBuffer::open(&path).unwrap();
        assert_eq!(buf.data(), b"persisted data");

        buf.clear();
        assert!(buf.is_empty());
    }
}

#[test]
fn test_mmap_growth() {
    let dir = tempfile::tempdir().unwrap();
    let mut buf = MmapBuffer::open(dir.path().join("grow")).unwrap();
    let cap0 = buf.capacity();

    // 写超默认容量，触发按页扩容且保留已有内容
    let block = vec![0x5A_u8; 200 * 1024];
    for _ in 0..4 {
        buf.push(&block).unwrap();
    }
    assert!(buf.capacity() > cap0);
    assert_eq!(buf.capacity() % crate::sys::page_size(), 0);
    assert_eq!(buf.size(), 800 * 1024);
    assert!(buf.data().iter().all(|&b| b == 0x5A));
}

#[test]
fn test_chunk_header_roundtrip() {
    let (_, public) = crypt::generate_keypair();
    let header = LogChunkHeader::new(4096, &public);
    let bytes = header.to_bytes();

    let parsed = LogChunkHeader::parse(&bytes).unwrap();
    assert!(parsed.is_valid());
    assert_eq!(parsed.size, 4096);
    assert_eq!(parsed.client_pub_key(), &public[..]);
    // 填充部分必须为零
    assert!(parsed.pub_key[65..].iter().all(|&b| b == 0));

    let mut bad = bytes;
    bad[0] ^= 0xFF;
    assert!(LogChunkHeader::parse(&bad).is_none());
}

#[test]
fn test_item_header_roundtrip() {
    let header = LogItemHeader::new(321);
    let parsed = LogItemHeader::parse(&header.to_bytes()).unwrap();
    assert_eq!(parsed.size, 321);
    assert!(LogItemHeader::parse(&[0u8; 8]).is_none());
    assert!(LogItemHeader::parse(&[0u8; 3]).is_none());
}

#[test]
fn test_thread_pool_basic() {
    // 单 worker 保证 FIFO 完成顺序可断言
    let pool = ThreadPool::new(1);
    assert!(pool.start());
    assert!(!pool.start());

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let c = Arc::clone(&counter);
        assert!(pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
    }

    let result = pool.submit_with_result(|| 40 + 2).wait().unwrap();
    assert_eq!(result, 42);
    // FIFO：带结果任务在之前提交的任务之后执行
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn test_thread_pool_panic_isolation() {
    let pool = ThreadPool::new(1);
    pool.start();

    let err = pool
        .submit_with_result(|| -> u32 { panic!("boom") })
        .wait()
        .unwrap_err();
    assert!(err.to_string().contains("boom"));

    // panic 之后池仍然可用
    assert_eq!(pool.submit_with_result(|| 7).wait().unwrap(), 7);
}

#[test]
fn test_thread_pool_stop() {
    let pool = ThreadPool::new(1);
    pool.start();
    pool.stop();

    assert!(!pool.submit(Box::new(|| {})));
    assert!(pool.submit_with_result(|| 1).wait().is_err());
    // stop 幂等
    pool.stop();
}

#[test]
fn test_thread_pool_not_started() {
    let pool = ThreadPool::new(1);
    assert!(!pool.submit(Box::new(|| {})));
    assert!(pool.submit_with_result(|| 1).wait().is_err());
}

#[test]
fn test_executor_serial_order() {
    let executor = Executor::new();
    let runner = executor.new_runner(1);

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..100 {
        let order = Arc::clone(&order);
        executor.post(runner, move || {
            order.lock().unwrap().push(i);
        });
    }
    executor.wait_idle(runner);

    let order = order.lock().unwrap();
    assert_eq!(*order, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_executor_runner_id_collision() {
    let executor = Executor::new();
    let a = executor.new_runner(5);
    let b = executor.new_runner(5);
    assert_eq!(a, 5);
    assert_ne!(a, b);

    // 两个 runner 各自可用
    assert_eq!(executor.post_with_result(a, || 1).wait().unwrap(), 1);
    assert_eq!(executor.post_with_result(b, || 2).wait().unwrap(), 2);
}

#[test]
fn test_executor_post_unknown_runner() {
    let executor = Executor::new();
    assert!(!executor.post(404, || {}));
    assert!(executor.post_with_result(404, || 1).wait().is_err());
}

#[test]
fn test_executor_delayed_task() {
    let executor = Executor::new();
    let runner = executor.new_runner(1);

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    executor.post_delayed(
        runner,
        move || {
            f.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    );

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_executor_repeated_count() {
    let executor = Executor::new();
    let runner = executor.new_runner(1);

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    executor.post_repeated(
        runner,
        move || {
            f.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(30),
        3,
    );

    std::thread::sleep(Duration::from_millis(600));
    // 次数耗尽后不再触发
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[test]
fn test_executor_cancel_repeated() {
    let executor = Executor::new();
    let runner = executor.new_runner(1);

    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let id = executor.post_repeated(
        runner,
        move || {
            f.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
        REPEAT_FOREVER,
    );

    std::thread::sleep(Duration::from_millis(330));
    executor.cancel_repeated(id);
    let at_cancel = fired.load(Ordering::SeqCst);
    assert!(at_cancel >= 2, "fired {at_cancel} times before cancel");
    assert!(at_cancel <= 7, "fired {at_cancel} times before cancel");

    std::thread::sleep(Duration::from_millis(300));
    let after = fired.load(Ordering::SeqCst);
    // 取消返回后至多再触发一次
    assert!(after <= at_cancel + 1, "fired {after} after cancel at {at_cancel}");
}

#[test]
fn test_executor_ordering_across_sources() {
    // 即时任务与定时器投递的任务在同一 runner 上仍然串行
    let executor = Executor::new();
    let runner = executor.new_runner(1);

    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    executor.post_delayed(
        runner,
        move || {
            l.lock().unwrap().push("delayed");
        },
        Duration::from_millis(30),
    );

    std::thread::sleep(Duration::from_millis(200));
    let l = Arc::clone(&log);
    executor.post(runner, move || {
        l.lock().unwrap().push("immediate");
    });
    executor.wait_idle(runner);

    assert_eq!(*log.lock().unwrap(), vec!["delayed", "immediate"]);
}
