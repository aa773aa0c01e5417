// Protection service - the engine façade the bot talks to.
//
// Wires gateway events to the guild's detectors and detector triggers to the
// punishment coordinator, and exposes the admin-facing configuration calls.
//
// Detection is synchronous and never waits on I/O. A trigger is handed to the
// coordinator on its own task, so a slow punishment batch in one guild never
// holds up events for another.

use super::protection_models::{
    DetectionTrigger, GuildMessage, MemberJoin, ProtectionSettings, ProtectionTriggered,
    PunishmentAction, RaidPolicy, RaidStatus, SpamPolicy, SpamStatus,
};
use super::protection_ports::{
    MuteRoleResolver, ProtectionError, ProtectionStore, PunishmentExecutor,
};
use super::protection_registry::ProtectionRegistry;
use super::punishment_coordinator::PunishmentCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct ProtectionService<S, M, E>
where
    S: ProtectionStore,
    M: MuteRoleResolver,
    E: PunishmentExecutor,
{
    registry: ProtectionRegistry<S, M>,
    coordinator: Arc<PunishmentCoordinator<E>>,
}

impl<S, M, E> ProtectionService<S, M, E>
where
    S: ProtectionStore,
    M: MuteRoleResolver,
    E: PunishmentExecutor + 'static,
{
    /// `acting_user_id` is the account punishments are attributed to (the bot itself).
    pub fn new(
        store: S,
        mute_roles: M,
        executor: E,
        acting_user_id: u64,
        settings: ProtectionSettings,
    ) -> Self {
        let coordinator = Arc::new(PunishmentCoordinator::new(
            executor,
            acting_user_id,
            settings.punishment_spacing,
        ));
        Self {
            registry: ProtectionRegistry::new(store, mute_roles, settings),
            coordinator,
        }
    }

    // ========================================================================
    // GATEWAY EVENTS
    // ========================================================================

    /// Feed a member join. Returns the punishment task if this join set off a raid.
    pub fn handle_member_join(&self, join: MemberJoin) -> Option<JoinHandle<ProtectionTriggered>> {
        let detector = self.registry.raid_detector(join.guild_id)?;
        let trigger = detector.on_member_join(&join)?;
        Some(self.dispatch(trigger))
    }

    /// Feed a guild message. Returns the punishment task if this message set off spam.
    pub fn handle_message(&self, message: GuildMessage) -> Option<JoinHandle<ProtectionTriggered>> {
        let detector = self.registry.spam_detector(message.guild_id)?;
        let trigger = detector.on_message(&message)?;
        Some(self.dispatch(trigger))
    }

    fn dispatch(&self, trigger: DetectionTrigger) -> JoinHandle<ProtectionTriggered> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move { coordinator.execute(trigger).await })
    }

    /// The bot can see a guild (startup or newly joined). Arms stored policies.
    pub async fn guild_available(&self, guild_id: u64) {
        if let Err(e) = self.registry.restore_guild(guild_id).await {
            tracing::error!(guild_id, "Failed to load protection settings: {}", e);
        }
    }

    /// The bot left (or was removed from) a guild.
    pub async fn guild_left(&self, guild_id: u64) {
        self.registry.forget_guild(guild_id).await;
    }

    /// Arm every guild with stored policies. Returns how many were armed.
    pub async fn restore_all(&self) -> Result<usize, ProtectionError> {
        self.registry.restore_all().await
    }

    /// Receive one notification per finished punishment batch.
    pub fn subscribe(&self) -> broadcast::Receiver<ProtectionTriggered> {
        self.coordinator.subscribe()
    }

    // ========================================================================
    // CONFIGURATION
    // ========================================================================

    pub async fn start_anti_raid(
        &self,
        guild_id: u64,
        threshold: u32,
        window_seconds: u32,
        action: PunishmentAction,
        duration_minutes: u32,
    ) -> Result<RaidStatus, ProtectionError> {
        let policy = RaidPolicy::new(threshold, window_seconds, action, duration_minutes)?;
        self.registry.start_raid_protection(guild_id, policy).await
    }

    pub async fn stop_anti_raid(&self, guild_id: u64) -> Result<bool, ProtectionError> {
        self.registry.stop_raid_protection(guild_id).await
    }

    /// Start or update anti-spam. Channels already ignored stay ignored.
    pub async fn start_anti_spam(
        &self,
        guild_id: u64,
        message_threshold: u32,
        action: PunishmentAction,
        duration_minutes: u32,
        role_id: Option<u64>,
    ) -> Result<SpamStatus, ProtectionError> {
        let policy = SpamPolicy::new(message_threshold, duration_minutes, action, role_id)?;
        self.registry
            .start_spam_protection(guild_id, policy, true)
            .await
    }

    pub async fn stop_anti_spam(&self, guild_id: u64) -> Result<bool, ProtectionError> {
        self.registry.stop_spam_protection(guild_id).await
    }

    pub async fn toggle_channel_ignore(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<Option<bool>, ProtectionError> {
        self.registry
            .toggle_channel_ignore(guild_id, channel_id)
            .await
    }

    pub fn get_status(&self, guild_id: u64) -> (Option<SpamStatus>, Option<RaidStatus>) {
        self.registry.status(guild_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protection::{ProtectionType, PunishmentRequest};
    use crate::infra::protection::InMemoryProtectionStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const GUILD: u64 = 456;
    const BOT: u64 = 999;

    struct NoopMuteRoles;

    #[async_trait]
    impl MuteRoleResolver for NoopMuteRoles {
        async fn ensure_mute_role(&self, _guild_id: u64) -> Result<u64, ProtectionError> {
            Ok(1)
        }
    }

    /// Records requests; fails for chosen members.
    #[derive(Clone, Default)]
    struct RecordingExecutor {
        requests: Arc<Mutex<Vec<PunishmentRequest>>>,
        fail_for: Vec<u64>,
    }

    #[async_trait]
    impl PunishmentExecutor for RecordingExecutor {
        async fn apply_punishment(&self, request: PunishmentRequest) -> Result<(), ProtectionError> {
            let failed = self.fail_for.contains(&request.member_id);
            self.requests.lock().unwrap().push(request);
            if failed {
                return Err(ProtectionError::Executor("Missing Permissions".to_string()));
            }
            Ok(())
        }
    }

    type TestService = ProtectionService<InMemoryProtectionStore, NoopMuteRoles, RecordingExecutor>;

    fn service(executor: RecordingExecutor) -> TestService {
        ProtectionService::new(
            InMemoryProtectionStore::new(),
            NoopMuteRoles,
            executor,
            BOT,
            ProtectionSettings::default(),
        )
    }

    fn join(member_id: u64) -> MemberJoin {
        MemberJoin {
            guild_id: GUILD,
            member_id,
            is_bot: false,
        }
    }

    fn message(author_id: u64, channel_id: u64) -> GuildMessage {
        GuildMessage {
            guild_id: GUILD,
            channel_id,
            author_id,
            is_bot: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_raid_end_to_end() {
        let executor = RecordingExecutor {
            fail_for: vec![2],
            ..Default::default()
        };
        let requests = Arc::clone(&executor.requests);
        let service = service(executor);
        let mut events = service.subscribe();

        service
            .start_anti_raid(GUILD, 3, 10, PunishmentAction::Ban, 60)
            .await
            .unwrap();

        assert!(service.handle_member_join(join(1)).is_none());
        assert!(service.handle_member_join(join(2)).is_none());
        let batch = service
            .handle_member_join(join(3))
            .expect("third join should trigger");
        let outcome = batch.await.unwrap();

        assert_eq!(outcome.kind, ProtectionType::Raid);
        assert_eq!(outcome.failed_members, vec![2]);

        let requests = requests.lock().unwrap();
        let members: Vec<u64> = requests.iter().map(|r| r.member_id).collect();
        assert_eq!(members, vec![1, 2, 3]);
        assert!(requests.iter().all(|r| r.acting_user_id == BOT));
        assert!(requests.iter().all(|r| r.duration_minutes == 60));
        drop(requests);

        let event = events.recv().await.unwrap();
        assert_eq!(event.affected_members, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spam_end_to_end() {
        let executor = RecordingExecutor::default();
        let requests = Arc::clone(&executor.requests);
        let service = service(executor);

        service
            .start_anti_spam(GUILD, 3, PunishmentAction::AddRole, 10, Some(55))
            .await
            .unwrap();

        assert!(service.handle_message(message(1, 10)).is_none());
        assert!(service.handle_message(message(1, 10)).is_none());
        service
            .handle_message(message(1, 10))
            .expect("third message should trigger")
            .await
            .unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].member_id, 1);
        assert_eq!(requests[0].action, PunishmentAction::AddRole);
        assert_eq!(requests[0].role_id, Some(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_without_policy_are_ignored() {
        let service = service(RecordingExecutor::default());

        for member_id in 1..=50 {
            assert!(service.handle_member_join(join(member_id)).is_none());
            assert!(service.handle_message(message(1, 10)).is_none());
        }
        let (spam, raid) = service.get_status(GUILD);
        assert!(spam.is_none());
        assert!(raid.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kick_duration_stored_as_zero() {
        let service = service(RecordingExecutor::default());

        let raid = service
            .start_anti_raid(GUILD, 5, 10, PunishmentAction::Kick, 30)
            .await
            .unwrap();
        assert_eq!(raid.policy.punish_duration_minutes, 0);

        let (_, raid) = service.get_status(GUILD);
        assert_eq!(raid.unwrap().policy.punish_duration_minutes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_channel_round_trip() {
        let service = service(RecordingExecutor::default());
        service
            .start_anti_spam(GUILD, 3, PunishmentAction::Mute, 5, None)
            .await
            .unwrap();

        service.handle_message(message(1, 10));
        service.handle_message(message(1, 10));
        assert_eq!(
            service.toggle_channel_ignore(GUILD, 10).await.unwrap(),
            Some(true)
        );
        for _ in 0..5 {
            assert!(service.handle_message(message(1, 10)).is_none());
        }
        assert_eq!(
            service.toggle_channel_ignore(GUILD, 10).await.unwrap(),
            Some(false)
        );
        assert!(service.handle_message(message(1, 10)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guild_left_stops_triggers() {
        let service = service(RecordingExecutor::default());
        service
            .start_anti_raid(GUILD, 2, 10, PunishmentAction::Kick, 0)
            .await
            .unwrap();

        service.handle_member_join(join(1));
        service.guild_left(GUILD).await;
        assert!(service.handle_member_join(join(2)).is_none());

        // Coming back re-arms from storage with an empty window.
        service.guild_available(GUILD).await;
        let (_, raid) = service.get_status(GUILD);
        assert_eq!(raid.unwrap().pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_errors_surface() {
        let service = service(RecordingExecutor::default());

        let err = service
            .start_anti_spam(GUILD, 3, PunishmentAction::AddRole, 0, None)
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        let err = service
            .start_anti_raid(GUILD, 5, 0, PunishmentAction::Ban, 0)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
