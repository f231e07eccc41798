//! One-second countdown for the verification screen.
//!
//! A single Tokio task per gate calls [`AuthGate::tick`] on a fixed period
//! and the gate publishes each [`CountdownSnapshot`] on a `watch` channel.
//! The task stops when its [`CountdownHandle`] is cancelled or dropped, when
//! the gate is exited, or when a newer countdown replaces it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use veil_core::{ChallengeId, Timestamp};
use veil_state::{ChallengeStatus, OtpChallenge};

use crate::gate::AuthGate;

/// Expiry and cooldown as of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownSnapshot {
    /// Live challenge, if any.
    pub challenge_id: Option<ChallengeId>,
    /// Its status.
    pub status: Option<ChallengeStatus>,
    /// Seconds until the code stops being accepted.
    pub expires_in: u64,
    /// Seconds until a resend is allowed.
    pub cooldown_remaining: u64,
    /// Whether `resend` would currently be accepted.
    pub can_resend: bool,
}

impl CountdownSnapshot {
    /// Nothing issued.
    pub fn idle() -> Self {
        Self {
            challenge_id: None,
            status: None,
            expires_in: 0,
            cooldown_remaining: 0,
            can_resend: false,
        }
    }

    pub(crate) fn of(challenge: &OtpChallenge, now: Timestamp) -> Self {
        let cooldown_remaining = challenge.cooldown_remaining(now);
        Self {
            challenge_id: Some(challenge.id),
            status: Some(challenge.status()),
            expires_in: challenge.expires_in(now),
            cooldown_remaining,
            can_resend: cooldown_remaining == 0,
        }
    }
}

/// Owner of a running countdown task. Dropping it stops the task.
#[derive(Debug)]
pub struct CountdownHandle {
    task: JoinHandle<()>,
    updates: watch::Receiver<CountdownSnapshot>,
}

impl CountdownHandle {
    /// Receiver for published snapshots.
    pub fn updates(&self) -> watch::Receiver<CountdownSnapshot> {
        self.updates.clone()
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start the one-second countdown for `gate`.
pub fn spawn_countdown(gate: Arc<AuthGate>) -> CountdownHandle {
    spawn_countdown_every(gate, Duration::from_secs(1))
}

/// Start a countdown ticking every `period`.
pub fn spawn_countdown_every(gate: Arc<AuthGate>, period: Duration) -> CountdownHandle {
    let updates = gate.subscribe();
    let epoch = gate.exit_epoch();
    let worker = Arc::clone(&gate);
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if worker.exit_epoch() != epoch {
                tracing::debug!("countdown stopped by exit");
                break;
            }
            worker.tick();
        }
    });
    gate.replace_countdown(task.abort_handle());
    CountdownHandle { task, updates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::provider::MockVerificationProvider;
    use veil_core::ManualClock;

    fn gate(clock: &ManualClock) -> Arc<AuthGate> {
        Arc::new(AuthGate::new(
            Arc::new(MockVerificationProvider::default()),
            Arc::new(clock.clone()),
            AuthConfig::default(),
        ))
    }

    fn clock() -> ManualClock {
        ManualClock::new(Timestamp::parse("2026-05-01T12:00:00Z").unwrap())
    }

    async fn wait_for(
        rx: &mut watch::Receiver<CountdownSnapshot>,
        pred: impl Fn(&CountdownSnapshot) -> bool,
    ) -> CountdownSnapshot {
        let snap = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("countdown did not publish in time")
            .expect("gate dropped");
        snap.clone()
    }

    #[tokio::test]
    async fn countdown_publishes_expiry() {
        let clock = clock();
        let gate = gate(&clock);
        gate.request_challenge("9876543210").await.unwrap();
        let handle = spawn_countdown_every(Arc::clone(&gate), Duration::from_millis(10));
        let mut rx = handle.updates();

        clock.advance(31);
        let snap = wait_for(&mut rx, |s| s.status == Some(ChallengeStatus::Expired)).await;
        assert_eq!(snap.expires_in, 0);
        assert!(snap.can_resend);
    }

    #[tokio::test]
    async fn exit_stops_the_task() {
        let clock = clock();
        let gate = gate(&clock);
        let handle = spawn_countdown_every(Arc::clone(&gate), Duration::from_millis(10));
        gate.exit();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn new_countdown_replaces_old() {
        let clock = clock();
        let gate = gate(&clock);
        let first = spawn_countdown_every(Arc::clone(&gate), Duration::from_millis(10));
        let _second = spawn_countdown_every(Arc::clone(&gate), Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !first.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cancel_stops_the_task() {
        let clock = clock();
        let gate = gate(&clock);
        let handle = spawn_countdown_every(gate, Duration::from_millis(10));
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
