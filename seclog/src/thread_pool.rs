//! 线程池
//!
//! 固定工作线程数的 FIFO 任务池，支持普通任务和带返回值的任务。
//! 任务执行中的 panic 被隔离，不会拖垮工作线程；
//! `stop` 丢弃未执行的排队任务并只 join 一次。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;

/// 池内执行的任务
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 任务结果错误
#[derive(Error, Debug)]
pub enum TaskError {
    /// 池未启动或已停止，任务没有执行
    #[error("pool is shutting down")]
    ShuttingDown,
    /// 任务执行时 panic
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// 带返回值任务的结果句柄
pub struct TaskFuture<T> {
    rx: Receiver<Result<T, TaskError>>,
}

impl<T> TaskFuture<T> {
    /// 阻塞等待任务完成
    ///
    /// 任务被丢弃（池停止）时返回 [`TaskError::ShuttingDown`]。
    pub fn wait(self) -> Result<T, TaskError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(TaskError::ShuttingDown),
        }
    }

    /// 构造一个直接报 [`TaskError::ShuttingDown`] 的空句柄
    pub fn canceled() -> Self {
        let (_tx, rx) = bounded(1);
        Self { rx }
    }

    /// 非阻塞查询，任务未完成时返回 None
    pub fn try_wait(&self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(crossbeam::channel::TryRecvError::Empty) => None,
            Err(crossbeam::channel::TryRecvError::Disconnected) => {
                Some(Err(TaskError::ShuttingDown))
            }
        }
    }
}

/// 固定大小线程池
pub struct ThreadPool {
    worker_count: usize,
    sender: Mutex<Option<Sender<Task>>>,
    receiver: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
}

impl ThreadPool {
    /// 创建线程池，worker 数量至少为 1
    pub fn new(worker_count: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            worker_count: worker_count.max(1),
            sender: Mutex::new(Some(tx)),
            receiver: rx,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 启动工作线程；重复启动返回 false
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.worker_count {
            let rx = self.receiver.clone();
            let stopped = Arc::clone(&self.stopped);
            workers.push(std::thread::spawn(move || worker_loop(rx, stopped)));
        }
        true
    }

    /// 停止：丢弃排队中的任务，join 全部工作线程（只执行一次）
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // 丢弃尚未执行的任务
        while self.receiver.try_recv().is_ok() {}

        // 关闭发送端让工作线程退出
        self.sender.lock().unwrap().take();

        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// 提交普通任务；池未启动或已停止时返回 false
    pub fn submit(&self, task: Task) -> bool {
        if !self.started.load(Ordering::Acquire) || self.stopped.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.lock().unwrap().as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    /// 提交带返回值的任务
    ///
    /// 池不可用时返回的句柄在 `wait` 时报 [`TaskError::ShuttingDown`]；
    /// 任务内 panic 传递给等待方。
    pub fn submit_with_result<F, T>(&self, func: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let task: Task = Box::new(move || {
            let result =
                catch_unwind(AssertUnwindSafe(func)).map_err(|e| TaskError::Panicked(panic_message(&e)));
            let _ = tx.send(result);
        });
        // 提交失败时闭包连同发送端一起丢弃，等待方自然收到断开
        self.submit(task);
        TaskFuture { rx }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Receiver<Task>, stopped: Arc<AtomicBool>) {
    while let Ok(task) = rx.recv() {
        // stop 之后收到的任务直接丢弃
        if stopped.load(Ordering::Acquire) {
            continue;
        }
        // panic 隔离：单个任务的失败不影响池
        let _ = catch_unwind(AssertUnwindSafe(task));
    }
}

/// 从 panic 载荷中提取可读信息
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}
