use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// One-shot delayed retry. At most one timer is armed at a time.
pub(crate) struct RetryScheduler {
    delay: Duration,
    pending: Option<CancellationToken>,
}

impl RetryScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// Arm the timer on the current `LocalSet`. `on_fire` runs once after
    /// the delay unless the timer or `parent` is cancelled first.
    ///
    /// Returns `false` without arming anything if a timer is already pending.
    pub fn schedule<F>(&mut self, parent: &CancellationToken, on_fire: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        if self.is_pending() {
            return false;
        }
        let token = parent.child_token();
        let timer = token.clone();
        let delay = self.delay;
        tokio::task::spawn_local(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Disarm before firing so the callback may re-arm.
                    timer.cancel();
                    on_fire();
                }
            }
        });
        self.pending = Some(token);
        true
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    const DELAY: Duration = Duration::from_secs(2);

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let fired = Rc::new(Cell::new(0));
        let hit = Rc::clone(&fired);
        (fired, move || hit.set(hit.get() + 1))
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fires_once_after_delay() {
        LocalSet::new()
            .run_until(async {
                let root = CancellationToken::new();
                let mut retry = RetryScheduler::new(DELAY);
                let (fired, on_fire) = counter();

                assert!(retry.schedule(&root, on_fire));
                assert!(retry.is_pending());

                tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
                assert_eq!(fired.get(), 0);

                tokio::time::sleep(Duration::from_millis(2)).await;
                assert_eq!(fired.get(), 1);
                assert!(!retry.is_pending());

                tokio::time::sleep(DELAY * 3).await;
                assert_eq!(fired.get(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn second_schedule_is_a_noop() {
        LocalSet::new()
            .run_until(async {
                let root = CancellationToken::new();
                let mut retry = RetryScheduler::new(DELAY);
                let (first, on_first) = counter();
                let (second, on_second) = counter();

                assert!(retry.schedule(&root, on_first));
                assert!(!retry.schedule(&root, on_second));

                tokio::time::sleep(DELAY * 2).await;
                assert_eq!(first.get(), 1);
                assert_eq!(second.get(), 0);

                let (third, on_third) = counter();
                assert!(retry.schedule(&root, on_third), "re-arm after firing");
                tokio::time::sleep(DELAY * 2).await;
                assert_eq!(third.get(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancel_disarms() {
        LocalSet::new()
            .run_until(async {
                let root = CancellationToken::new();
                let mut retry = RetryScheduler::new(DELAY);
                let (fired, on_fire) = counter();

                retry.schedule(&root, on_fire);
                retry.cancel();
                assert!(!retry.is_pending());
                retry.cancel();

                tokio::time::sleep(DELAY * 2).await;
                assert_eq!(fired.get(), 0);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn parent_cancellation_disarms() {
        LocalSet::new()
            .run_until(async {
                let root = CancellationToken::new();
                let mut retry = RetryScheduler::new(DELAY);
                let (fired, on_fire) = counter();

                retry.schedule(&root, on_fire);
                root.cancel();
                assert!(!retry.is_pending());

                tokio::time::sleep(DELAY * 2).await;
                assert_eq!(fired.get(), 0);
            })
            .await;
    }
}
