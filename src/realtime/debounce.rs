use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Single-slot delayed task: scheduling replaces whatever is still waiting.
///
/// Only the wait is cancelled. Once the delay has elapsed the task runs on its
/// own and a later `schedule` or `cancel` no longer affects it.
#[derive(Debug)]
pub struct Debouncer {
  delay: Duration,
  timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      timer: Mutex::new(None),
    }
  }

  pub fn schedule<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let delay = self.delay;
    let timer = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      tokio::spawn(task);
    });

    if let Some(previous) = self.lock().replace(timer) {
      previous.abort();
    }
  }

  pub fn cancel(&self) {
    if let Some(timer) = self.lock().take() {
      timer.abort();
    }
  }

  /// Whether a task is still waiting for its delay to elapse.
  pub fn is_pending(&self) -> bool {
    self
      .lock()
      .as_ref()
      .map(|timer| !timer.is_finished())
      .unwrap_or(false)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    self
      .timer
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    self.cancel();
  }
}
