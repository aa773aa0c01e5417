// Message-flood detector for a single guild.
//
// Each user gets a run counter that survives as long as they keep talking.
// Every message pushes the run's idle deadline forward; once the user has been
// quiet for the idle window the run is dropped by its own timer. A slow drip
// never reaches the threshold, a burst does. Reaching the threshold consumes
// the run, so the next message starts from one.

use super::protection_models::{
    DetectionTrigger, GuildMessage, ProtectionType, SpamPolicy, SpamStatus,
};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// A user's current run of messages.
struct UserMessageWindow {
    count: u32,
    last_message: Instant,
    /// Identifies the timer that owns this run's expiry.
    generation: u64,
    expiry: AbortHandle,
}

type RunMap = DashMap<u64, UserMessageWindow>;

pub struct SpamDetector {
    guild_id: u64,
    policy: SpamPolicy,
    ignored_channels: DashSet<u64>,
    idle_window: Duration,
    runs: Arc<RunMap>,
    next_generation: AtomicU64,
    retired: AtomicBool,
}

impl SpamDetector {
    /// Start with no runs. The policy's ignored channels seed the live set.
    pub fn new(guild_id: u64, policy: SpamPolicy, idle_window: Duration) -> Self {
        let ignored_channels = policy.ignored_channels.iter().copied().collect();
        Self {
            guild_id,
            policy,
            ignored_channels,
            idle_window,
            runs: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Feed a message event. Returns a trigger when this message completes a run.
    pub fn on_message(&self, message: &GuildMessage) -> Option<DetectionTrigger> {
        if message.guild_id != self.guild_id
            || message.is_bot
            || self.is_retired()
            || self.ignored_channels.contains(&message.channel_id)
        {
            return None;
        }

        let count = self.record(message.author_id);
        if count < self.policy.message_threshold {
            return None;
        }

        tracing::info!(
            guild_id = self.guild_id,
            user_id = message.author_id,
            channel_id = message.channel_id,
            messages = count,
            "Spam detected"
        );

        Some(DetectionTrigger {
            guild_id: self.guild_id,
            kind: ProtectionType::Spam,
            action: self.policy.action,
            duration_minutes: self.policy.mute_duration_minutes,
            role_id: self.policy.role_id,
            affected_members: vec![message.author_id],
            reason: format!("Anti-Spam: {} messages in a row", count),
        })
    }

    /// Bump the user's run and return its new length. A run that reached the
    /// threshold is removed before the shard lock is released.
    fn record(&self, user_id: u64) -> u32 {
        let now = Instant::now();
        let threshold = self.policy.message_threshold;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.runs.entry(user_id) {
            Entry::Occupied(mut slot) => {
                let count = {
                    let run = slot.get_mut();
                    run.expiry.abort();
                    // The timer may not have fired yet for a run that is already stale.
                    if now.duration_since(run.last_message) >= self.idle_window {
                        run.count = 0;
                    }
                    run.count += 1;
                    run.count
                };

                if count >= threshold {
                    slot.remove();
                } else {
                    let expiry = self.schedule_expiry(user_id, generation);
                    let run = slot.get_mut();
                    run.last_message = now;
                    run.generation = generation;
                    run.expiry = expiry;
                }
                count
            }
            Entry::Vacant(slot) => {
                if threshold > 1 {
                    slot.insert(UserMessageWindow {
                        count: 1,
                        last_message: now,
                        generation,
                        expiry: self.schedule_expiry(user_id, generation),
                    });
                }
                1
            }
        }
    }

    fn schedule_expiry(&self, user_id: u64, generation: u64) -> AbortHandle {
        let runs: Weak<RunMap> = Arc::downgrade(&self.runs);
        let deadline = Instant::now() + self.idle_window;

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(runs) = runs.upgrade() {
                // Only drop the run if no newer message took over the expiry.
                runs.remove_if(&user_id, |_, run| run.generation == generation);
            }
        })
        .abort_handle()
    }

    /// Flip a channel in the live ignore set. Returns true if it is now ignored.
    pub fn toggle_ignored_channel(&self, channel_id: u64) -> bool {
        if self.ignored_channels.remove(&channel_id).is_some() {
            false
        } else {
            self.ignored_channels.insert(channel_id);
            true
        }
    }

    pub fn ignored_channels(&self) -> Vec<u64> {
        let mut channels: Vec<u64> = self.ignored_channels.iter().map(|id| *id).collect();
        channels.sort_unstable();
        channels
    }

    /// The policy with the live ignore set folded in.
    pub fn policy(&self) -> SpamPolicy {
        SpamPolicy {
            ignored_channels: self.ignored_channels().into_iter().collect(),
            ..self.policy.clone()
        }
    }

    /// Length of a user's current run, if they have one.
    #[cfg(test)]
    pub fn run_length(&self, user_id: u64) -> Option<u32> {
        self.runs.get(&user_id).map(|run| run.count)
    }

    pub fn status(&self) -> SpamStatus {
        SpamStatus {
            policy: self.policy(),
            tracked_users: self.runs.len(),
        }
    }

    /// Stop detecting and drop every run.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        for run in self.runs.iter() {
            run.expiry.abort();
        }
        self.runs.clear();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

impl Drop for SpamDetector {
    fn drop(&mut self) {
        for run in self.runs.iter() {
            run.expiry.abort();
        }
    }
}
