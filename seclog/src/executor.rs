//! 串行任务执行器
//!
//! 按标识注册的单线程 runner 集合加一个定时器线程。
//! 同一 runner 上的任务按提交顺序串行执行；定时器线程只负责
//! 调度，到期后把任务投递到目标 runner，自己不执行用户任务。
//!
//! 延迟/周期任务由最小堆管理（按到期时间排序，同刻按插入顺序）。
//! 周期任务持有活跃 ID 集合中的一项，取消即从集合移除；
//! 已投递未执行的实例在执行前再查一次集合，尽量缩小取消窗口。

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::thread_pool::{Task, TaskFuture, ThreadPool};

/// runner 的唯一标识
pub type RunnerId = u64;
/// 周期任务的取消句柄
pub type RepeatId = u64;

/// 周期任务执行次数的"无限"哨兵值
pub const REPEAT_FOREVER: u64 = u64::MAX;

/// 周期任务体
type RepeatedTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// 定时器堆条目
struct TimerEntry {
    deadline: Instant,
    /// 同一到期时间按插入顺序出堆
    seq: u64,
    kind: TimerKind,
}

enum TimerKind {
    /// 到期后投递一次
    Once { runner: RunnerId, task: Task },
    /// 周期投递
    Repeated {
        runner: RunnerId,
        task: RepeatedTask,
        period: Duration,
        remaining: u64,
        id: RepeatId,
    },
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // BinaryHeap 是大顶堆，这里反转比较得到小顶堆语义
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct RunnerMap {
    map: HashMap<RunnerId, Arc<ThreadPool>>,
    next_tag: RunnerId,
}

struct TimerState {
    heap: Mutex<BinaryHeap<TimerEntry>>,
    cond: Condvar,
    running: AtomicBool,
    /// 活跃周期任务 ID 集合
    live: Mutex<HashSet<RepeatId>>,
    next_repeat_id: AtomicU64,
    next_seq: AtomicU64,
}

struct Shared {
    runners: Mutex<RunnerMap>,
    timer: TimerState,
}

impl Shared {
    fn pool(&self, runner: RunnerId) -> Option<Arc<ThreadPool>> {
        self.runners.lock().unwrap().map.get(&runner).cloned()
    }

    fn post_to_runner(&self, runner: RunnerId, task: Task) -> bool {
        match self.pool(runner) {
            Some(pool) => pool.submit(task),
            None => false,
        }
    }
}

/// 串行执行器
pub struct Executor {
    shared: Arc<Shared>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            runners: Mutex::new(RunnerMap {
                map: HashMap::new(),
                next_tag: 1,
            }),
            timer: TimerState {
                heap: Mutex::new(BinaryHeap::new()),
                cond: Condvar::new(),
                running: AtomicBool::new(true),
                live: Mutex::new(HashSet::new()),
                next_repeat_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
            },
        });

        let timer_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("seclog-timer".into())
            .spawn(move || timer_loop(timer_shared))
            .expect("spawn timer thread");

        Self {
            shared,
            timer_thread: Mutex::new(Some(handle)),
        }
    }

    /// 注册新 runner（单工作线程池）
    ///
    /// `id_hint` 已被占用时分配一个新的标识返回，不会复用已有 runner。
    pub fn new_runner(&self, id_hint: RunnerId) -> RunnerId {
        let mut runners = self.shared.runners.lock().unwrap();
        let mut tag = id_hint;
        while runners.map.contains_key(&tag) {
            tag = runners.next_tag;
            runners.next_tag += 1;
        }
        let pool = Arc::new(ThreadPool::new(1));
        pool.start();
        runners.map.insert(tag, pool);
        tag
    }

    /// 立即投递任务到指定 runner；runner 不存在或已停止返回 false
    pub fn post<F>(&self, runner: RunnerId, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post_to_runner(runner, Box::new(task))
    }

    /// 延迟投递：到期后由定时器线程转投目标 runner
    pub fn post_delayed<F>(&self, runner: RunnerId, task: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: self.shared.timer.next_seq.fetch_add(1, Ordering::Relaxed),
            kind: TimerKind::Once {
                runner,
                task: Box::new(task),
            },
        };
        self.push_entry(entry);
    }

    /// 周期投递，最多触发 `repeat_count` 次（[`REPEAT_FOREVER`] 表示直到取消）
    ///
    /// 首次触发在 `now + period`；返回取消句柄。
    pub fn post_repeated<F>(
        &self,
        runner: RunnerId,
        task: F,
        period: Duration,
        repeat_count: u64,
    ) -> RepeatId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self
            .shared
            .timer
            .next_repeat_id
            .fetch_add(1, Ordering::Relaxed);
        if repeat_count == 0 {
            return id;
        }
        self.shared.timer.live.lock().unwrap().insert(id);

        let entry = TimerEntry {
            deadline: Instant::now() + period,
            seq: self.shared.timer.next_seq.fetch_add(1, Ordering::Relaxed),
            kind: TimerKind::Repeated {
                runner,
                task: Arc::new(task),
                period,
                remaining: repeat_count,
                id,
            },
        };
        self.push_entry(entry);
        id
    }

    /// 取消周期任务
    ///
    /// 已投递到 runner 队列但尚未执行的实例会在执行前被跳过，
    /// 因此取消返回后至多再触发一次。
    pub fn cancel_repeated(&self, id: RepeatId) {
        self.shared.timer.live.lock().unwrap().remove(&id);
    }

    /// 投递带返回值的任务
    pub fn post_with_result<F, T>(&self, runner: RunnerId, func: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.shared.pool(runner) {
            Some(pool) => pool.submit_with_result(func),
            None => TaskFuture::canceled(),
        }
    }

    /// 等待指定 runner 清空当前队列（投递一个空任务并等待其完成）
    pub fn wait_idle(&self, runner: RunnerId) {
        let _ = self.post_with_result(runner, || ()).wait();
    }

    fn push_entry(&self, entry: TimerEntry) {
        let timer = &self.shared.timer;
        {
            let mut heap = timer.heap.lock().unwrap();
            heap.push(entry);
        }
        timer.cond.notify_one();
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // 停定时器
        self.shared.timer.running.store(false, Ordering::Release);
        self.shared.timer.cond.notify_all();
        if let Some(handle) = self.timer_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        // 停全部 runner，丢弃排队任务
        let runners = self.shared.runners.lock().unwrap();
        for pool in runners.map.values() {
            pool.stop();
        }
        debug!("executor stopped, {} runners", runners.map.len());
    }
}

/// 定时器主循环
///
/// 堆空则无限等待；否则等到最早条目到期，把所有到期条目
/// 按到期顺序出堆并投递，周期条目按 `deadline += period` 重新入堆。
fn timer_loop(shared: Arc<Shared>) {
    let timer = &shared.timer;
    let mut heap = timer.heap.lock().unwrap();

    while timer.running.load(Ordering::Acquire) {
        let now = Instant::now();
        let next_deadline = heap.peek().map(|e| e.deadline);
        match next_deadline {
            None => {
                heap = timer.cond.wait(heap).unwrap();
            }
            Some(deadline) if deadline > now => {
                let (guard, _) = timer.cond.wait_timeout(heap, deadline - now).unwrap();
                heap = guard;
            }
            Some(_) => {
                // 取出所有到期条目，释放锁后再投递
                let mut due = Vec::new();
                while let Some(entry) = heap.peek() {
                    if entry.deadline <= now {
                        due.push(heap.pop().unwrap());
                    } else {
                        break;
                    }
                }
                drop(heap);

                let mut reinserts = Vec::new();
                for entry in due {
                    dispatch(&shared, entry, &mut reinserts);
                }

                heap = timer.heap.lock().unwrap();
                for entry in reinserts {
                    heap.push(entry);
                }
            }
        }
    }
}

/// 投递一个到期条目；周期条目在活跃时推进下一次到期并收集重插
fn dispatch(shared: &Arc<Shared>, entry: TimerEntry, reinserts: &mut Vec<TimerEntry>) {
    match entry.kind {
        TimerKind::Once { runner, task } => {
            shared.post_to_runner(runner, task);
        }
        TimerKind::Repeated {
            runner,
            task,
            period,
            remaining,
            id,
        } => {
            if !shared.timer.live.lock().unwrap().contains(&id) {
                return;
            }

            // 执行前再查一次活跃集合，缩小取消后的触发窗口
            let exec_shared = Arc::clone(shared);
            let exec_task = Arc::clone(&task);
            shared.post_to_runner(
                runner,
                Box::new(move || {
                    if exec_shared.timer.live.lock().unwrap().contains(&id) {
                        (exec_task)();
                    }
                }),
            );

            let remaining = if remaining == REPEAT_FOREVER {
                REPEAT_FOREVER
            } else {
                remaining - 1
            };
            if remaining > 0 {
                reinserts.push(TimerEntry {
                    deadline: entry.deadline + period,
                    seq: shared.timer.next_seq.fetch_add(1, Ordering::Relaxed),
                    kind: TimerKind::Repeated {
                        runner,
                        task,
                        period,
                        remaining,
                        id,
                    },
                });
            } else {
                shared.timer.live.lock().unwrap().remove(&id);
            }
        }
    }
}
