//! Restartable timers on top of tokio
//!
//! [`Schedule`] repeats a task every period, [`Timer`] runs it once after a
//! delay. Both accept async tasks: the next run of a [`Schedule`] is only
//! armed after the previous run's future has completed, so runs never
//! overlap, not even across a restart.
//!
//! Stopping is best effort for an in-flight run: the run finishes, nothing
//! after it starts.
mod hooks;

pub use self::hooks::*;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, task::JoinHandle};

pub type Task = Box<dyn FnMut() -> BoxFuture<'static, ()> + Send + 'static>;

type SharedTask = Arc<tokio::sync::Mutex<Task>>;

fn boxed_task<F, Fut>(mut f: F) -> SharedTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(tokio::sync::Mutex::new(Box::new(move || f().boxed())))
}

/// Stop signal of one run of a timer task
#[derive(Default)]
struct Control {
    stopped: AtomicBool,
    notify: Notify,
}

impl Control {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            // single waiter; the permit is kept if it isn't waiting yet
            self.notify.notify_one();
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait for `period`; `false` if stopped in the meantime
    async fn sleep(&self, period: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => !self.is_stopped(),
            _ = self.notify.notified() => false,
        }
    }
}

struct Running {
    control: Arc<Control>,
    handle: JoinHandle<()>,
}

impl Running {
    fn is_running(&self) -> bool {
        !self.control.is_stopped() && !self.handle.is_finished()
    }
}

/// A task repeated every `period`
pub struct Schedule {
    period: Duration,
    task: SharedTask,
    running: Mutex<Option<Running>>,
}

impl Schedule {
    pub fn new<F, Fut>(period: Duration, task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            period,
            task: boxed_task(task),
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking; restarts the period if already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let control = Arc::new(Control::default());
        let handle = tokio::spawn({
            let control = control.clone();
            let task = self.task.clone();
            let period = self.period;
            async move {
                while control.sleep(period).await {
                    let mut task = task.lock().await;
                    if control.is_stopped() {
                        break;
                    }
                    (&mut *task)().await;
                }
            }
        });

        if let Some(previous) = self.running.lock().replace(Running { control, handle }) {
            previous.control.stop();
        }
    }

    /// Idempotent
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.control.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(Running::is_running)
            .unwrap_or(false)
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A task run once, `delay` after the last `start`
pub struct Timer {
    delay: Duration,
    task: SharedTask,
    running: Mutex<Option<Running>>,
}

impl Timer {
    pub fn new<F, Fut>(delay: Duration, task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            task: boxed_task(task),
            running: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm the timer, replacing any pending invocation
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let control = Arc::new(Control::default());
        let handle = tokio::spawn({
            let control = control.clone();
            let task = self.task.clone();
            let delay = self.delay;
            async move {
                if control.sleep(delay).await {
                    let mut task = task.lock().await;
                    if !control.is_stopped() {
                        (&mut *task)().await;
                    }
                }
            }
        });

        if let Some(previous) = self.running.lock().replace(Running { control, handle }) {
            previous.control.stop();
        }
    }

    /// Cancel a pending invocation; idempotent
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.control.stop();
        }
    }

    /// `true` while an invocation is pending or executing
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(Running::is_running)
            .unwrap_or(false)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
