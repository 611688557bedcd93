//! Cooperative stop signal for one job's background task.

use std::time::Duration;

use tokio::sync::watch;

use tally_aggregate::CancellationFlag;

/// Owner side: flips the signal once.
#[derive(Debug)]
pub struct StopSource {
    tx: watch::Sender<bool>,
    flag: CancellationFlag,
}

impl StopSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            flag: CancellationFlag::new(),
        }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
            flag: self.flag.clone(),
        }
    }

    pub fn stop(&self) {
        self.flag.cancel();
        self.tx.send_replace(true);
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side, cloned into every place that must notice a stop: the
/// execution loop, its sleeps, page fetches, and aggregation workers.
#[derive(Debug, Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
    flag: CancellationFlag,
}

impl StopToken {
    /// A token whose source is already gone, so it can never be stopped.
    pub fn never() -> Self {
        StopSource::new().token()
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.is_cancelled() || *self.rx.borrow()
    }

    /// Flag handed to the blocking aggregation workers.
    pub fn flag(&self) -> &CancellationFlag {
        &self.flag
    }

    /// Resolves once stop is requested.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            // Source dropped without stopping: nothing can stop us any more.
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless stopped first. Returns false when interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = self.stopped() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_is_interrupted_by_stop() {
        let source = StopSource::new();
        let token = source.token();

        let sleeper = tokio::spawn({
            let token = token.clone();
            async move { token.sleep(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.stop();

        let completed = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!completed);
        assert!(token.is_stopped());
        assert!(token.flag().is_cancelled());
    }

    #[tokio::test]
    async fn sleep_completes_without_stop() {
        let token = StopToken::never();
        assert!(token.sleep(Duration::from_millis(5)).await);
    }
}
