//! Deadline scheduler for deferred work.
//!
//! A single task owns the deadline list. `arm_after` on a known id replaces
//! its fire time; `cancel` is best-effort, a fire that already dispatched
//! is absorbed by the DJ pipeline's state-machine idempotence.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum Command<T> {
    Arm {
        id: String,
        delay: Duration,
        payload: T,
    },
    Cancel {
        id: String,
    },
}

/// Handle to the timer task. Cheap to clone.
pub struct TimerWheel<T> {
    cmd_tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Clone for TimerWheel<T> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl<T: Send + 'static> TimerWheel<T> {
    /// Spawn the timer task. Fired payloads are delivered on `fire_tx` in
    /// deadline order.
    pub fn spawn(fire_tx: mpsc::Sender<T>, shutdown: CancellationToken) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_timer(cmd_rx, fire_tx, shutdown));
        Self { cmd_tx }
    }

    /// Schedule `payload` to fire after `delay`. Re-arming a known id moves
    /// its fire time and replaces the payload.
    pub fn arm_after(&self, id: impl Into<String>, delay: Duration, payload: T) {
        let _ = self.cmd_tx.send(Command::Arm {
            id: id.into(),
            delay,
            payload,
        });
    }

    pub fn cancel(&self, id: &str) {
        let _ = self.cmd_tx.send(Command::Cancel { id: id.to_string() });
    }
}

async fn run_timer<T>(
    mut cmd_rx: mpsc::UnboundedReceiver<Command<T>>,
    fire_tx: mpsc::Sender<T>,
    shutdown: CancellationToken,
) {
    // Far-future poll interval used when nothing is armed.
    const IDLE_TICK: Duration = Duration::from_secs(3600);

    let mut armed: HashMap<String, (Instant, T)> = HashMap::new();
    loop {
        let next_deadline = armed
            .values()
            .map(|(deadline, _)| *deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + IDLE_TICK);

        tokio::select! {
            command = cmd_rx.recv() => {
                match command {
                    Some(Command::Arm { id, delay, payload }) => {
                        debug!(id = %id, delay_ms = delay.as_millis() as u64, "Arming timer");
                        armed.insert(id, (Instant::now() + delay, payload));
                    }
                    Some(Command::Cancel { id }) => {
                        if armed.remove(&id).is_some() {
                            debug!(id = %id, "Cancelled timer");
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(next_deadline) => {
                let now = Instant::now();
                let mut due: Vec<(Instant, String)> = armed
                    .iter()
                    .filter(|(_, (deadline, _))| *deadline <= now)
                    .map(|(id, (deadline, _))| (*deadline, id.clone()))
                    .collect();
                due.sort_by_key(|(deadline, _)| *deadline);
                for (_, id) in due {
                    if let Some((_, payload)) = armed.remove(&id) {
                        if fire_tx.send(payload).await.is_err() {
                            return;
                        }
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
