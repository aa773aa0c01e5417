// Turns a detection trigger into punishment calls, one member at a time.
//
// Members are punished in detection order with a fixed pause between calls to
// stay under the platform's rate limits. A failed call is logged and the batch
// moves on. When the batch is done a single ProtectionTriggered is broadcast.

use super::protection_models::{DetectionTrigger, ProtectionTriggered, PunishmentRequest};
use super::protection_ports::PunishmentExecutor;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;

// Announcements are small and rare; a short buffer is plenty.
const NOTIFICATION_BUFFER: usize = 64;

pub struct PunishmentCoordinator<E: PunishmentExecutor> {
    executor: E,
    acting_user_id: u64,
    spacing: Duration,
    notifier: broadcast::Sender<ProtectionTriggered>,
}

impl<E: PunishmentExecutor> PunishmentCoordinator<E> {
    pub fn new(executor: E, acting_user_id: u64, spacing: Duration) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            executor,
            acting_user_id,
            spacing,
            notifier,
        }
    }

    /// Listen for finished batches.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtectionTriggered> {
        self.notifier.subscribe()
    }

    /// Punish every affected member of a trigger, in order, then notify.
    pub async fn execute(&self, trigger: DetectionTrigger) -> ProtectionTriggered {
        let DetectionTrigger {
            guild_id,
            kind,
            action,
            duration_minutes,
            role_id,
            affected_members,
            reason,
        } = trigger;

        let mut failed_members = Vec::new();
        for (index, &member_id) in affected_members.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.spacing).await;
            }

            let request = PunishmentRequest {
                guild_id,
                member_id,
                acting_user_id: self.acting_user_id,
                action,
                duration_minutes,
                role_id,
                reason: reason.clone(),
            };

            if let Err(e) = self.executor.apply_punishment(request).await {
                tracing::warn!(
                    guild_id,
                    member_id,
                    action = %action,
                    "Failed to punish member: {}",
                    e
                );
                failed_members.push(member_id);
            }
        }

        let outcome = ProtectionTriggered {
            guild_id,
            kind,
            action,
            affected_members,
            failed_members,
            triggered_at: Utc::now(),
        };

        tracing::info!(
            guild_id,
            kind = %outcome.kind,
            action = %outcome.action,
            punished = outcome.affected_members.len() - outcome.failed_members.len(),
            failed = outcome.failed_members.len(),
            "Protection batch finished"
        );

        // Nobody listening is fine.
        let _ = self.notifier.send(outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::{ProtectionError, ProtectionType, PunishmentAction};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Records every call; fails for chosen members.
    #[derive(Clone, Default)]
    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<(u64, Instant)>>>,
        fail_for: Vec<u64>,
    }

    #[async_trait]
    impl PunishmentExecutor for RecordingExecutor {
        async fn apply_punishment(&self, request: PunishmentRequest) -> Result<(), ProtectionError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.member_id, Instant::now()));
            if self.fail_for.contains(&request.member_id) {
                return Err(ProtectionError::Executor("missing permissions".to_string()));
            }
            Ok(())
        }
    }

    fn trigger(members: Vec<u64>) -> DetectionTrigger {
        DetectionTrigger {
            guild_id: 456,
            kind: ProtectionType::Raid,
            action: PunishmentAction::Kick,
            duration_minutes: 0,
            role_id: None,
            affected_members: members,
            reason: "test".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_members_punished_in_order_despite_failure() {
        let executor = RecordingExecutor {
            fail_for: vec![2],
            ..Default::default()
        };
        let calls = Arc::clone(&executor.calls);
        let coordinator = PunishmentCoordinator::new(executor, 999, Duration::from_secs(1));

        let outcome = coordinator.execute(trigger(vec![1, 2, 3])).await;

        let order: Vec<u64> = calls.lock().unwrap().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(outcome.affected_members, vec![1, 2, 3]);
        assert_eq!(outcome.failed_members, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let executor = RecordingExecutor::default();
        let calls = Arc::clone(&executor.calls);
        let coordinator = PunishmentCoordinator::new(executor, 999, Duration::from_secs(1));

        coordinator.execute(trigger(vec![1, 2, 3])).await;

        let calls = calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_notification_per_batch() {
        let coordinator =
            PunishmentCoordinator::new(RecordingExecutor::default(), 999, Duration::from_secs(1));
        let mut events = coordinator.subscribe();

        coordinator.execute(trigger(vec![1, 2])).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ProtectionType::Raid);
        assert_eq!(event.action, PunishmentAction::Kick);
        assert_eq!(event.affected_members, vec![1, 2]);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_acting_user_is_passed_through() {
        struct CheckActor;

        #[async_trait]
        impl PunishmentExecutor for CheckActor {
            async fn apply_punishment(
                &self,
                request: PunishmentRequest,
            ) -> Result<(), ProtectionError> {
                assert_eq!(request.acting_user_id, 999);
                assert_eq!(request.reason, "test");
                Ok(())
            }
        }

        let coordinator = PunishmentCoordinator::new(CheckActor, 999, Duration::ZERO);
        let outcome = coordinator.execute(trigger(vec![7])).await;
        assert!(outcome.failed_members.is_empty());
    }
}
