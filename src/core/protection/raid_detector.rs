// Join-flood detector for a single guild.
//
// Each join is a mark in a WindowedCounter keyed by guild, so every member
// falls out of the window on their own timer. When the live count reaches the
// threshold the whole burst is drained in the same critical section and
// punished together, even members who joined a moment ago.

use super::protection_models::{
    DetectionTrigger, MemberJoin, ProtectionType, RaidPolicy, RaidStatus,
};
use super::windowed_counter::{MarkOutcome, WindowedCounter};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct RaidDetector {
    guild_id: u64,
    policy: RaidPolicy,
    joins: WindowedCounter<u64, u64>,
    retired: AtomicBool,
}

impl RaidDetector {
    /// Start armed with an empty window. `policy` is expected to be normalized.
    pub fn new(guild_id: u64, policy: RaidPolicy) -> Self {
        let joins = WindowedCounter::new(policy.window());
        Self {
            guild_id,
            policy,
            joins,
            retired: AtomicBool::new(false),
        }
    }

    /// Feed a join event. Returns a trigger when this join completes a raid.
    pub fn on_member_join(&self, join: &MemberJoin) -> Option<DetectionTrigger> {
        if join.guild_id != self.guild_id || join.is_bot || self.is_retired() {
            return None;
        }

        let threshold = self.policy.join_threshold as usize;
        match self
            .joins
            .mark_until(self.guild_id, join.member_id, Some(threshold))
        {
            MarkOutcome::Duplicate => {
                tracing::debug!(
                    guild_id = self.guild_id,
                    member_id = join.member_id,
                    "Duplicate join event ignored"
                );
                None
            }
            MarkOutcome::Counted(count) => {
                tracing::debug!(
                    guild_id = self.guild_id,
                    pending = count,
                    threshold,
                    "Join counted"
                );
                None
            }
            MarkOutcome::Reached(members) => {
                tracing::info!(
                    guild_id = self.guild_id,
                    members = members.len(),
                    window_secs = self.policy.window_seconds,
                    "Raid detected"
                );
                Some(DetectionTrigger {
                    guild_id: self.guild_id,
                    kind: ProtectionType::Raid,
                    action: self.policy.action,
                    duration_minutes: self.policy.punish_duration_minutes,
                    role_id: None,
                    reason: format!(
                        "Anti-Raid: {} joins within {} seconds",
                        members.len(),
                        self.policy.window_seconds
                    ),
                    affected_members: members,
                })
            }
        }
    }

    pub fn status(&self) -> RaidStatus {
        let pending_members = self.joins.items(&self.guild_id);
        RaidStatus {
            policy: self.policy.clone(),
            pending_count: pending_members.len(),
            pending_members,
        }
    }

    /// Stop detecting and drop all pending joins. Used when the detector is
    /// replaced or the guild goes away.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.joins.clear();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::PunishmentAction;
    use std::time::Duration;

    const GUILD: u64 = 456;

    fn detector(threshold: u32, window_secs: u32) -> RaidDetector {
        let policy = RaidPolicy::new(threshold, window_secs, PunishmentAction::Ban, 0).unwrap();
        RaidDetector::new(GUILD, policy)
    }

    fn join(member_id: u64) -> MemberJoin {
        MemberJoin {
            guild_id: GUILD,
            member_id,
            is_bot: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_triggers_once_with_all_members() {
        let raid = detector(5, 10);

        for member in 1..=4 {
            assert!(raid.on_member_join(&join(member)).is_none());
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        let trigger = raid.on_member_join(&join(5)).expect("fifth join should trigger");
        assert_eq!(trigger.kind, ProtectionType::Raid);
        assert_eq!(trigger.affected_members, vec![1, 2, 3, 4, 5]);
        assert_eq!(trigger.action, PunishmentAction::Ban);

        // Window was reset by the trigger.
        assert_eq!(raid.status().pending_count, 0);
        assert!(raid.on_member_join(&join(6)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_joins_never_trigger() {
        let raid = detector(5, 1);

        for member in 1..=20 {
            assert!(raid.on_member_join(&join(member)).is_none());
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(raid.status().pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bots_are_exempt() {
        let raid = detector(2, 10);

        for member in 1..=5 {
            let bot = MemberJoin {
                is_bot: true,
                ..join(member)
            };
            assert!(raid.on_member_join(&bot).is_none());
        }
        assert_eq!(raid.status().pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_join_counted_once() {
        let raid = detector(3, 10);

        assert!(raid.on_member_join(&join(1)).is_none());
        assert!(raid.on_member_join(&join(1)).is_none());
        assert!(raid.on_member_join(&join(2)).is_none());
        assert_eq!(raid.status().pending_members, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_detector_ignores_joins() {
        let raid = detector(2, 10);

        raid.on_member_join(&join(1));
        raid.retire();
        assert!(raid.on_member_join(&join(2)).is_none());
        assert_eq!(raid.status().pending_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_joins_trigger_once_per_full_window() {
        use std::sync::Arc;
        use tokio::sync::Barrier;

        const JOINS: u64 = 20;
        const THRESHOLD: u32 = 5;

        let raid = Arc::new(detector(THRESHOLD, 60));
        let barrier = Arc::new(Barrier::new(JOINS as usize));

        let tasks: Vec<_> = (1..=JOINS)
            .map(|member| {
                let raid = Arc::clone(&raid);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    raid.on_member_join(&join(member))
                })
            })
            .collect();

        let mut triggers = Vec::new();
        for task in tasks {
            if let Some(trigger) = task.await.unwrap() {
                triggers.push(trigger);
            }
        }

        assert_eq!(triggers.len(), (JOINS / THRESHOLD as u64) as usize);
        let mut punished: Vec<u64> = Vec::new();
        for trigger in &triggers {
            assert_eq!(trigger.affected_members.len(), THRESHOLD as usize);
            punished.extend(&trigger.affected_members);
        }
        punished.sort_unstable();
        assert_eq!(punished, (1..=JOINS).collect::<Vec<_>>());
        assert_eq!(raid.status().pending_count, 0);
    }
}
