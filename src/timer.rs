use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{error, trace};

static BACKGROUND_RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

// Used when a table is armed outside of any tokio context and no runtime was configured for it.
fn background_handle() -> Option<Handle> {
    BACKGROUND_RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("ttl-table-timer")
                .enable_time()
                .build()
                .inspect_err(|err| error!("Cannot start background runtime for expiration timers: {err}"))
                .ok()
        })
        .as_ref()
        .map(|rt| rt.handle().clone())
}

/// One-shot timer driving a table's expiration scan.
///
/// At most one task is armed at any time: arming cancels whatever was armed before. When the timer fires the job is
/// handed over to the runtime's blocking pool, so it runs independently of the task that waited for the deadline.
#[derive(Debug, Default)]
pub(crate) struct ExpirationTimer {
    task:     Option<JoinHandle<()>>,
    interval: Duration,
}

impl ExpirationTimer {
    /// Duration the timer was last armed for; zero when disarmed.
    #[inline]
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Same as [`interval()`](Self::interval) while the task is still waiting; zero once it has fired or was dropped
    /// together with its runtime.
    pub(crate) fn armed_interval(&self) -> Duration {
        if self.is_armed() {
            self.interval
        }
        else {
            Duration::ZERO
        }
    }

    /// Arm the timer to run `job` after `after`.
    ///
    /// The runtime is picked in order: `runtime` if given, the current tokio context, the crate's background runtime.
    /// Returns `false` and leaves the timer disarmed if there is no runtime to spawn on.
    pub(crate) fn arm<F>(&mut self, runtime: Option<&Handle>, after: Duration, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let Some(handle) = runtime
            .cloned()
            .or_else(|| Handle::try_current().ok())
            .or_else(background_handle)
        else {
            error!("No tokio runtime available, expiration timer is not armed");
            return false;
        };

        trace!("Arming expiration timer for {after:?}");
        self.interval = after;
        self.task = Some(handle.spawn(async move {
            tokio::time::sleep(after).await;
            // Detached: the job must not be cancelled once it has started.
            drop(tokio::task::spawn_blocking(job));
        }));

        true
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.interval = Duration::ZERO;
    }
}

impl Drop for ExpirationTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fires_once_after_interval() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = ExpirationTimer::default();

        assert!(timer.arm(None, Duration::from_millis(50), counting_job(&fired)));
        assert_eq!(timer.interval(), Duration::from_millis(50));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rearming_cancels_previous_task() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut timer = ExpirationTimer::default();

        timer.arm(None, Duration::from_millis(50), counting_job(&first));
        timer.arm(None, Duration::from_millis(80), counting_job(&second));
        assert_eq!(timer.interval(), Duration::from_millis(80));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_and_drop_disarm() {
        let fired = Arc::new(AtomicUsize::new(0));

        let mut timer = ExpirationTimer::default();
        timer.arm(None, Duration::from_millis(30), counting_job(&fired));
        timer.cancel();
        assert_eq!(timer.interval(), Duration::ZERO);
        assert!(!timer.is_armed());

        let mut dropped = ExpirationTimer::default();
        dropped.arm(None, Duration::from_millis(30), counting_job(&fired));
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn timer_dies_with_its_runtime() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = ExpirationTimer::default();

        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            assert!(timer.arm(None, Duration::from_millis(20), counting_job(&fired)));
        });
        assert_eq!(timer.armed_interval(), Duration::from_millis(20));

        drop(rt);
        assert_eq!(timer.interval(), Duration::from_millis(20));
        assert_eq!(timer.armed_interval(), Duration::ZERO);
        assert!(!timer.is_armed());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn arms_without_ambient_runtime() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = ExpirationTimer::default();

        assert!(timer.arm(None, Duration::from_millis(20), counting_job(&fired)));
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
