use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

/// Single-shot heartbeat timer. At most one tick is outstanding: a
/// schedule request arms it, the tick disarms it, and the next schedule
/// re-arms it. The interval is decided by the caller on every reset,
/// which is how the gossip heartbeat adapts to pending work.
pub(crate) struct ControlTimer {
    pub(crate) tick_rx: mpsc::Receiver<()>,
    schedule_tx: mpsc::Sender<Duration>,
    set: Arc<AtomicBool>,
}

impl ControlTimer {
    pub(crate) fn start(mut shutdown: broadcast::Receiver<()>) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (schedule_tx, mut schedule_rx) = mpsc::channel::<Duration>(16);
        let set = Arc::new(AtomicBool::new(false));
        let armed = set.clone();

        tokio::spawn(async move {
            loop {
                let interval = tokio::select! {
                    maybe = schedule_rx.recv() => match maybe {
                        Some(interval) => interval,
                        None => return,
                    },
                    _ = shutdown.recv() => return,
                };
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        armed.store(false, Ordering::SeqCst);
                        if tick_tx.send(()).await.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.recv() => return,
                }
            }
        });

        Self {
            tick_rx,
            schedule_tx,
            set,
        }
    }

    pub(crate) fn controls(&self) -> TimerControls {
        TimerControls {
            schedule_tx: self.schedule_tx.clone(),
            set: self.set.clone(),
        }
    }
}

/// Cloneable handle used by the node and its spawned tasks to re-arm the
/// timer.
#[derive(Clone)]
pub(crate) struct TimerControls {
    schedule_tx: mpsc::Sender<Duration>,
    set: Arc<AtomicBool>,
}

impl TimerControls {
    /// Arms the timer unless a tick is already outstanding.
    pub(crate) async fn schedule(&self, interval: Duration) {
        if self.set.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.schedule_tx.send(interval).await.is_err() {
            self.set.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::broadcast;

    use super::*;

    #[tokio::test]
    async fn test_ticks_after_interval() {
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut timer = ControlTimer::start(shutdown_rx);

        timer.controls().schedule(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(1), timer.tick_rx.recv())
            .await
            .expect("no tick")
            .expect("timer gone");
    }

    #[tokio::test]
    async fn test_only_one_outstanding_tick() {
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut timer = ControlTimer::start(shutdown_rx);
        let controls = timer.controls();

        controls.schedule(Duration::from_millis(10)).await;
        //Second schedule while armed is dropped
        controls.schedule(Duration::from_millis(10)).await;

        timer.tick_rx.recv().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(100), timer.tick_rx.recv()).await;
        assert!(second.is_err(), "unexpected second tick");
    }

    #[tokio::test]
    async fn test_shutdown_stops_timer() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut timer = ControlTimer::start(shutdown_rx);

        timer.controls().schedule(Duration::from_secs(60)).await;
        shutdown_tx.send(()).unwrap();

        //The pending sleep is abandoned and the channel closes
        let tick = tokio::time::timeout(Duration::from_millis(200), timer.tick_rx.recv()).await;
        assert!(matches!(tick, Ok(None) | Err(_)));
    }
}
