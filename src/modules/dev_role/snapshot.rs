use poise::serenity_prelude as serenity;
use std::collections::HashMap;

/// One server invite, reduced to what the attribution needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteUse {
    pub channel_id: serenity::ChannelId,
    pub uses: u64,
}

impl From<&serenity::RichInvite> for InviteUse {
    fn from(invite: &serenity::RichInvite) -> Self {
        Self {
            channel_id: invite.channel.id,
            uses: invite.uses,
        }
    }
}

/// Point-in-time aggregate of invite use counters for one server.
///
/// Snapshots are never updated in place; a newer one replaces the older one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteSnapshot {
    per_channel: HashMap<serenity::ChannelId, u64>,
    total: u64,
}

impl InviteSnapshot {
    pub fn from_invites<I>(invites: I) -> Self
    where
        I: IntoIterator<Item = InviteUse>,
    {
        let mut snapshot = Self::default();
        for invite in invites {
            *snapshot.per_channel.entry(invite.channel_id).or_default() += invite.uses;
            snapshot.total += invite.uses;
        }
        snapshot
    }

    /// Summed uses of every invite that targets `channel_id`.
    pub fn uses_in(&self, channel_id: serenity::ChannelId) -> u64 {
        self.per_channel.get(&channel_id).copied().unwrap_or(0)
    }

    pub fn total_uses(&self) -> u64 {
        self.total
    }
}

/// Counter movement between two snapshots, seen from the dev channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribution {
    pub dev_delta: i64,
    pub total_delta: i64,
}

impl Attribution {
    /// `current` must have been taken after the join being attributed.
    pub fn between(
        previous: &InviteSnapshot,
        current: &InviteSnapshot,
        dev_channel: serenity::ChannelId,
    ) -> Self {
        Self {
            dev_delta: delta(previous.uses_in(dev_channel), current.uses_in(dev_channel)),
            total_delta: delta(previous.total_uses(), current.total_uses()),
        }
    }

    /// True when every counted join in the window went through the dev channel.
    ///
    /// Any other join in the same window makes this false for all of them, and
    /// a window where no counter moved compares equal.
    pub fn is_dev_channel_join(&self) -> bool {
        self.dev_delta == self.total_delta
    }
}

// Counters can go down when an invite is deleted or expires.
fn delta(before: u64, after: u64) -> i64 {
    after as i64 - before as i64
}
