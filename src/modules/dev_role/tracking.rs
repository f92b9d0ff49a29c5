use crate::modules::dev_role::platform::Platform;
use crate::modules::dev_role::snapshot::{Attribution, InviteSnapshot};
use crate::Error;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The member a join event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEvent {
    pub guild_id: serenity::GuildId,
    pub user_id: serenity::UserId,
    pub display_name: String,
    pub bot: bool,
}

impl From<&serenity::Member> for JoinEvent {
    fn from(member: &serenity::Member) -> Self {
        Self {
            guild_id: member.guild_id,
            user_id: member.user.id,
            display_name: member.display_name().to_string(),
            bot: member.user.bot,
        }
    }
}

/// How a join event was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    RoleGranted,
    NoAction,
    /// Attributed, but Discord refused the role grant.
    GrantFailed,
    /// No snapshot yet, the bot has not been ready.
    Untracked,
    OtherGuild,
}

/// The stored snapshot and where it came from.
#[derive(Debug, Clone)]
pub struct TrackedGuild {
    pub guild_id: serenity::GuildId,
    pub snapshot: InviteSnapshot,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct JoinStats {
    joins: AtomicU64,
    granted: AtomicU64,
    grant_failures: AtomicU64,
    refresh_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinCounts {
    pub joins: u64,
    pub granted: u64,
    pub grant_failures: u64,
    pub refresh_failures: u64,
}

impl JoinStats {
    pub fn counts(&self) -> JoinCounts {
        JoinCounts {
            joins: self.joins.load(Ordering::Relaxed),
            granted: self.granted.load(Ordering::Relaxed),
            grant_failures: self.grant_failures.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Invite tracking state for the dev server.
///
/// Holds exactly one snapshot. It is only ever replaced as a whole, and the
/// lock is never held across a Discord call.
pub struct DevRoleSession {
    dev_channel: serenity::ChannelId,
    dev_role: serenity::RoleId,
    tracked: Mutex<Option<TrackedGuild>>,
    stats: JoinStats,
}

impl DevRoleSession {
    pub fn new(dev_channel: serenity::ChannelId, dev_role: serenity::RoleId) -> Self {
        Self {
            dev_channel,
            dev_role,
            tracked: Mutex::new(None),
            stats: JoinStats::default(),
        }
    }

    pub fn dev_channel(&self) -> serenity::ChannelId {
        self.dev_channel
    }

    pub fn dev_role(&self) -> serenity::RoleId {
        self.dev_role
    }

    pub fn counts(&self) -> JoinCounts {
        self.stats.counts()
    }

    pub async fn tracked(&self) -> Option<TrackedGuild> {
        self.tracked.lock().await.clone()
    }

    /// Take a snapshot of the server's invites without storing it.
    pub async fn refresh<P: Platform>(
        &self,
        platform: &P,
        guild_id: serenity::GuildId,
    ) -> Result<InviteSnapshot, Error> {
        let invites = platform
            .list_invites(guild_id)
            .await
            .with_context(|| format!("Failed to list invites of guild {}", guild_id))?;
        let snapshot = InviteSnapshot::from_invites(invites);
        debug!(
            "invites: dev_channel={}, total={}",
            snapshot.uses_in(self.dev_channel),
            snapshot.total_uses()
        );
        Ok(snapshot)
    }

    /// Start tracking `guild_id`, replacing whatever was tracked before.
    pub async fn initialize<P: Platform>(
        &self,
        platform: &P,
        guild_id: serenity::GuildId,
    ) -> Result<InviteSnapshot, Error> {
        let snapshot = self.refresh(platform, guild_id).await?;
        self.store(guild_id, snapshot.clone()).await;
        info!(
            "Tracking invites of guild {} ({} uses, {} through dev channel)",
            guild_id,
            snapshot.total_uses(),
            snapshot.uses_in(self.dev_channel)
        );
        Ok(snapshot)
    }

    /// Re-read the tracked server's invites and store them.
    ///
    /// Returns the replaced and the new snapshot, or `None` when nothing is
    /// tracked yet.
    pub async fn resync<P: Platform>(
        &self,
        platform: &P,
    ) -> Result<Option<(InviteSnapshot, InviteSnapshot)>, Error> {
        let Some(previous) = self.tracked().await else {
            return Ok(None);
        };

        let current = self.refresh(platform, previous.guild_id).await?;
        self.store(previous.guild_id, current.clone()).await;
        Ok(Some((previous.snapshot, current)))
    }

    /// Attribute a join and grant the dev role when it came through the dev
    /// channel.
    ///
    /// The stored snapshot is read before the refresh, so joins racing through
    /// the same window are all compared against the same baseline. The fresh
    /// snapshot replaces the stored one whatever the attribution says. A failed
    /// refresh leaves the stored snapshot untouched.
    pub async fn handle_member_join<P: Platform>(
        &self,
        platform: &P,
        join: &JoinEvent,
    ) -> Result<JoinOutcome, Error> {
        let Some(previous) = self.tracked().await else {
            warn!(
                "{} ({}) joined before invites were tracked",
                join.display_name, join.user_id
            );
            return Ok(JoinOutcome::Untracked);
        };
        let guild_id = previous.guild_id;

        if join.guild_id != guild_id {
            debug!("Ignoring join of {} in guild {}", join.user_id, join.guild_id);
            return Ok(JoinOutcome::OtherGuild);
        }

        debug!(
            "{} ({}) joined{}",
            join.display_name,
            join.user_id,
            if join.bot { " (bot)" } else { "" }
        );
        JoinStats::bump(&self.stats.joins);

        let current = match self.refresh(platform, guild_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                JoinStats::bump(&self.stats.refresh_failures);
                return Err(e.context(format!("Could not attribute join of {}", join.user_id)));
            }
        };

        let attribution = Attribution::between(&previous.snapshot, &current, self.dev_channel);
        debug!(
            "{} members joined while fetching invites, {} looking for dev channel",
            attribution.total_delta, attribution.dev_delta
        );

        let outcome = if attribution.is_dev_channel_join() {
            match platform.grant_role(guild_id, join.user_id, self.dev_role).await {
                Ok(()) => {
                    JoinStats::bump(&self.stats.granted);
                    info!("Dev role added to {} ({})", join.display_name, join.user_id);
                    JoinOutcome::RoleGranted
                }
                Err(e) => {
                    JoinStats::bump(&self.stats.grant_failures);
                    error!(
                        "Failed to add dev role to {} ({}): {:?}",
                        join.display_name, join.user_id, e
                    );
                    JoinOutcome::GrantFailed
                }
            }
        } else {
            JoinOutcome::NoAction
        };

        self.store(guild_id, current).await;
        Ok(outcome)
    }

    async fn store(&self, guild_id: serenity::GuildId, snapshot: InviteSnapshot) {
        *self.tracked.lock().await = Some(TrackedGuild {
            guild_id,
            snapshot,
            taken_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::dev_role::snapshot::InviteUse;
    use std::sync::atomic::AtomicBool;

    const DEV_CHANNEL: u64 = 100;
    const OTHER_CHANNEL: u64 = 200;
    const GUILD: u64 = 10;

    #[derive(Default)]
    struct FakePlatform {
        invites: std::sync::Mutex<Vec<InviteUse>>,
        fail_listing: AtomicBool,
        fail_grants: AtomicBool,
        grants: std::sync::Mutex<Vec<(serenity::GuildId, serenity::UserId, serenity::RoleId)>>,
    }

    impl FakePlatform {
        fn with_uses(dev: u64, other: u64) -> Self {
            let platform = Self::default();
            platform.set_uses(dev, other);
            platform
        }

        fn set_uses(&self, dev: u64, other: u64) {
            *self.invites.lock().unwrap() = vec![
                InviteUse {
                    channel_id: serenity::ChannelId::new(DEV_CHANNEL),
                    uses: dev,
                },
                InviteUse {
                    channel_id: serenity::ChannelId::new(OTHER_CHANNEL),
                    uses: other,
                },
            ];
        }

        fn grant_count(&self) -> usize {
            self.grants.lock().unwrap().len()
        }
    }

    impl Platform for FakePlatform {
        async fn list_invites(
            &self,
            _guild_id: serenity::GuildId,
        ) -> Result<Vec<InviteUse>, Error> {
            tokio::task::yield_now().await;
            if self.fail_listing.load(Ordering::Relaxed) {
                anyhow::bail!("missing access");
            }
            Ok(self.invites.lock().unwrap().clone())
        }

        async fn grant_role(
            &self,
            guild_id: serenity::GuildId,
            user_id: serenity::UserId,
            role_id: serenity::RoleId,
        ) -> Result<(), Error> {
            if self.fail_grants.load(Ordering::Relaxed) {
                anyhow::bail!("missing permissions");
            }
            self.grants.lock().unwrap().push((guild_id, user_id, role_id));
            Ok(())
        }
    }

    fn session() -> DevRoleSession {
        DevRoleSession::new(serenity::ChannelId::new(DEV_CHANNEL), serenity::RoleId::new(7))
    }

    fn join(user_id: u64) -> JoinEvent {
        JoinEvent {
            guild_id: serenity::GuildId::new(GUILD),
            user_id: serenity::UserId::new(user_id),
            display_name: format!("member-{}", user_id),
            bot: false,
        }
    }

    async fn stored(session: &DevRoleSession) -> InviteSnapshot {
        session.tracked().await.expect("tracked guild").snapshot
    }

    async fn initialized(platform: &FakePlatform) -> DevRoleSession {
        let session = session();
        session
            .initialize(platform, serenity::GuildId::new(GUILD))
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_dev_join_grants_role() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        platform.set_uses(6, 5);
        let outcome = session.handle_member_join(&platform, &join(42)).await.unwrap();

        assert_eq!(outcome, JoinOutcome::RoleGranted);
        assert_eq!(
            platform.grants.lock().unwrap().as_slice(),
            &[(
                serenity::GuildId::new(GUILD),
                serenity::UserId::new(42),
                serenity::RoleId::new(7)
            )]
        );
        assert_eq!(session.counts().granted, 1);
    }

    #[tokio::test]
    async fn test_other_join_grants_nothing() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        platform.set_uses(5, 6);
        let outcome = session.handle_member_join(&platform, &join(42)).await.unwrap();

        assert_eq!(outcome, JoinOutcome::NoAction);
        assert_eq!(platform.grant_count(), 0);
        assert_eq!(stored(&session).await.total_uses(), 11);
    }

    #[tokio::test]
    async fn test_mixed_joins_grant_nothing_to_either() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        // one dev and one other member, both handled before either refresh lands
        platform.set_uses(6, 6);
        let (first_join, second_join) = (join(1), join(2));
        let (first, second) = tokio::join!(
            session.handle_member_join(&platform, &first_join),
            session.handle_member_join(&platform, &second_join),
        );

        assert_eq!(first.unwrap(), JoinOutcome::NoAction);
        assert_eq!(second.unwrap(), JoinOutcome::NoAction);
        assert_eq!(platform.grant_count(), 0);
        assert_eq!(stored(&session).await.total_uses(), 12);
    }

    #[tokio::test]
    async fn test_join_without_counter_movement_is_attributed() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        // e.g. a vanity url join, which no listed invite counts
        let outcome = session.handle_member_join(&platform, &join(42)).await.unwrap();

        assert_eq!(outcome, JoinOutcome::RoleGranted);
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_without_joins() {
        let platform = FakePlatform::with_uses(3, 4);
        let session = session();
        let guild_id = serenity::GuildId::new(GUILD);

        let first = session.refresh(&platform, guild_id).await.unwrap();
        let second = session.refresh(&platform, guild_id).await.unwrap();

        assert_eq!(first, second);
        assert!(first.uses_in(session.dev_channel()) <= first.total_uses());
    }

    #[tokio::test]
    async fn test_snapshot_replaced_after_every_join() {
        let platform = FakePlatform::with_uses(0, 0);
        let session = initialized(&platform).await;

        for (dev, other) in [(1, 0), (1, 1), (2, 3)] {
            platform.set_uses(dev, other);
            session.handle_member_join(&platform, &join(9)).await.unwrap();
            let expected = session
                .refresh(&platform, serenity::GuildId::new(GUILD))
                .await
                .unwrap();
            assert_eq!(stored(&session).await, expected);
        }
        assert_eq!(session.counts().joins, 3);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_stale_snapshot() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;
        let before = stored(&session).await;

        platform.set_uses(6, 5);
        platform.fail_listing.store(true, Ordering::Relaxed);
        let result = session.handle_member_join(&platform, &join(42)).await;

        assert!(result.is_err());
        assert_eq!(stored(&session).await, before);
        assert_eq!(platform.grant_count(), 0);
        assert_eq!(session.counts().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_grant_failure_still_replaces_snapshot() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        platform.set_uses(6, 5);
        platform.fail_grants.store(true, Ordering::Relaxed);
        let outcome = session.handle_member_join(&platform, &join(42)).await.unwrap();

        assert_eq!(outcome, JoinOutcome::GrantFailed);
        assert_eq!(stored(&session).await.uses_in(session.dev_channel()), 6);
        assert_eq!(session.counts().grant_failures, 1);
    }

    #[tokio::test]
    async fn test_join_before_ready_is_untracked() {
        let platform = FakePlatform::with_uses(1, 1);
        let session = session();

        let outcome = session.handle_member_join(&platform, &join(42)).await.unwrap();

        assert_eq!(outcome, JoinOutcome::Untracked);
        assert!(session.tracked().await.is_none());
        assert_eq!(platform.grant_count(), 0);
    }

    #[tokio::test]
    async fn test_join_in_other_guild_is_ignored() {
        let platform = FakePlatform::with_uses(5, 5);
        let session = initialized(&platform).await;

        platform.set_uses(6, 5);
        let mut event = join(42);
        event.guild_id = serenity::GuildId::new(GUILD + 1);
        let outcome = session.handle_member_join(&platform, &event).await.unwrap();

        assert_eq!(outcome, JoinOutcome::OtherGuild);
        assert_eq!(stored(&session).await.uses_in(session.dev_channel()), 5);
        assert_eq!(session.counts(), JoinCounts::default());
    }

    #[tokio::test]
    async fn test_resync_reports_previous_and_current() {
        let platform = FakePlatform::with_uses(2, 2);
        let session = session();
        assert!(session.resync(&platform).await.unwrap().is_none());

        session
            .initialize(&platform, serenity::GuildId::new(GUILD))
            .await
            .unwrap();
        platform.set_uses(2, 0);
        let (previous, current) = session.resync(&platform).await.unwrap().unwrap();

        assert_eq!(previous.total_uses(), 4);
        assert_eq!(current.total_uses(), 2);
        assert_eq!(stored(&session).await, current);
    }
}
