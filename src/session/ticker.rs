use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

/// Upper bound on how long a cancelled ticker may keep sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// A named periodic task on its own thread.
///
/// The callback runs once after `initial_delay` and then every `interval`
/// until it returns `ControlFlow::Break` or the ticker is cancelled.
/// Cancellation is observed before every callback, so no callback starts
/// after `cancel` returns.
#[derive(Debug)]
pub struct Ticker {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<F>(
        name: &'static str,
        initial_delay: Duration,
        interval: Duration,
        mut tick: F,
    ) -> Result<Self>
    where
        F: FnMut(Instant) -> ControlFlow<()> + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next = Instant::now() + initial_delay;
                loop {
                    if !sleep_until(next, &shutdown_thread) {
                        break;
                    }
                    let now = Instant::now();
                    if tick(now).is_break() {
                        log::debug!("{}: finished", name);
                        break;
                    }
                    next += interval;
                    // Do not try to catch up after a stall.
                    if next < now {
                        next = now + interval;
                    }
                }
            })
            .with_context(|| format!("spawn {} thread", name))?;

        Ok(Self {
            name,
            shutdown,
            join: Some(join),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once the callback has broken out of the loop or the thread ended.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Signal the thread and wait for it to exit.
    pub fn cancel(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} thread panicked", self.name))?;
        }
        Ok(())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::warn!("{}", err);
        }
    }
}

/// Sleep until `deadline` in short slices. Returns false if shut down first.
fn sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
