//! Periodic polling of a Modbus device.
//!
//! [`Monitor`] runs a caller-supplied async read every `interval` and
//! sleeps only for the time the read left over. An iteration that
//! overruns the interval is logged and the next one starts immediately;
//! missed ticks are not made up later. Cancellation is cooperative
//! through a broadcast shutdown channel, checked between iterations and
//! while sleeping.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use crate::error::ModbusResult;

/// Periodic poll driver.
pub struct Monitor {
    interval: Duration,
    /// Number of iterations, 0 = run until cancelled.
    repeat: u64,
    shutdown: broadcast::Sender<()>,
}

impl Monitor {
    pub fn new(interval: Duration, repeat: u64) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            interval,
            repeat,
            shutdown,
        }
    }

    /// Handle for requesting a stop from another task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run `read` every interval until the repeat count is exhausted or a
    /// shutdown is signalled. A failing read stops the loop and the error
    /// propagates to the caller.
    pub async fn run<F, Fut>(&self, mut read: F) -> ModbusResult<()>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ModbusResult<()>>,
    {
        let mut shutdown = self.shutdown.subscribe();
        let mut iteration: u64 = 0;

        loop {
            if self.repeat != 0 && iteration >= self.repeat {
                return Ok(());
            }
            if shutdown.try_recv().is_ok() {
                return Ok(());
            }

            let started = Instant::now();
            read(iteration).await?;
            iteration += 1;

            let elapsed = started.elapsed();
            if elapsed >= self.interval {
                if !self.interval.is_zero() {
                    warn!(
                        iteration,
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = self.interval.as_millis() as u64,
                        "no time between reads"
                    );
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval - elapsed) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModbusError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fixed_repeat_count() {
        let monitor = Monitor::new(Duration::from_millis(1), 3);
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();

        monitor
            .run(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_error_stops_loop() {
        let monitor = Monitor::new(Duration::from_millis(1), 0);
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();

        let result = monitor
            .run(move |iteration| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if iteration == 1 {
                        Err(ModbusError::connection("gone"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(ModbusError::Connection { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let monitor = Monitor::new(Duration::from_secs(60), 0);
        let shutdown = monitor.shutdown_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = shutdown.send(());
        });

        let started = Instant::now();
        monitor.run(|_| async { Ok(()) }).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_overrun_proceeds_immediately() {
        let monitor = Monitor::new(Duration::from_millis(5), 3);

        let started = Instant::now();
        monitor
            .run(|_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            })
            .await
            .unwrap();

        // Three 10ms reads with no extra sleep between them.
        assert!(started.elapsed() < Duration::from_millis(60));
    }
}
