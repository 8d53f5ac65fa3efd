use super::*;

pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;
pub type InvocationHook = Arc<dyn Fn() + Send + Sync + 'static>;

pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// `pre_trigger`, `trigger`, `post_trigger`, awaited in that order
#[derive(Clone)]
pub struct TriggerHooks {
    pub pre_trigger: Option<Hook>,
    pub trigger: Hook,
    pub post_trigger: Option<Hook>,
}

impl TriggerHooks {
    pub fn new(trigger: Hook) -> Self {
        Self {
            pre_trigger: None,
            trigger,
            post_trigger: None,
        }
    }

    async fn run(self) {
        if let Some(pre) = &self.pre_trigger {
            pre().await;
        }
        (self.trigger)().await;
        if let Some(post) = &self.post_trigger {
            post().await;
        }
    }

    fn into_task(self) -> impl FnMut() -> BoxFuture<'static, ()> + Send + 'static {
        move || self.clone().run().boxed()
    }
}

/// Collapses bursts of calls into one trigger, `delay` after the last call
pub struct Debouncer {
    timer: Timer,
    on_debounce_invocation: Option<InvocationHook>,
}

impl Debouncer {
    pub fn new(delay: Duration, hooks: TriggerHooks) -> Self {
        Self {
            timer: Timer::new(delay, hooks.into_task()),
            on_debounce_invocation: None,
        }
    }

    /// Called synchronously on every `debounce`, before the timer restarts
    pub fn on_debounce_invocation(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_debounce_invocation = Some(Arc::new(f));
        self
    }

    pub fn debounce(&self) {
        self.timer.stop();
        if let Some(f) = &self.on_debounce_invocation {
            f();
        }
        self.timer.start();
    }

    /// Replace the hooks and delay, then debounce
    pub fn debounce_with(&mut self, delay: Duration, hooks: TriggerHooks) {
        self.timer.stop();
        self.timer = Timer::new(delay, hooks.into_task());
        self.debounce();
    }

    pub fn cancel(&self) {
        self.timer.stop();
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_running()
    }
}

/// Runs the hooks every `period` while started
pub struct Interval {
    schedule: Schedule,
    on_interval_invocation: Option<InvocationHook>,
}

impl Interval {
    pub fn new(period: Duration, hooks: TriggerHooks) -> Self {
        Self {
            schedule: Schedule::new(period, hooks.into_task()),
            on_interval_invocation: None,
        }
    }

    /// Called synchronously on every `start`
    pub fn on_interval_invocation(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_interval_invocation = Some(Arc::new(f));
        self
    }

    pub fn start(&self) {
        if let Some(f) = &self.on_interval_invocation {
            f();
        }
        self.schedule.start();
    }

    pub fn stop(&self) {
        self.schedule.stop();
    }

    pub fn is_running(&self) -> bool {
        self.schedule.is_running()
    }
}
