/// Presence tracking for a board channel.
///
/// One tracker exists per joined channel. Users are added when the channel
/// reports a join, refreshed by heartbeats and removed once the leave for
/// their last open connection arrives. Users that stop sending heartbeats stay in the map and are shown
/// de-emphasized once they pass the recently-active threshold.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{MAX_DISPLAYED_AVATARS, RECENTLY_ACTIVE_THRESHOLD_MS};

/// Fixed avatar palette, in assignment order.
pub const USER_COLORS: [&str; 20] = [
    "#EF4444", // red
    "#F97316", // orange
    "#F59E0B", // amber
    "#EAB308", // yellow
    "#84CC16", // lime
    "#22C55E", // green
    "#10B981", // emerald
    "#14B8A6", // teal
    "#06B6D4", // cyan
    "#0EA5E9", // sky
    "#3B82F6", // blue
    "#6366F1", // indigo
    "#8B5CF6", // violet
    "#A855F7", // purple
    "#D946EF", // fuchsia
    "#EC4899", // pink
    "#F43F5E", // rose
    "#78716C", // stone
    "#64748B", // slate
    "#0F766E", // dark teal
];

/// Payload a client tracks on the channel for itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMeta {
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Colour chosen by the sender, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Epoch millis when this meta was produced.
    pub online_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub color: String,
    pub last_seen: i64,
    #[serde(skip)]
    joined_seq: u64,
    /// Open channel connections (tabs) for this user.
    #[serde(skip)]
    connections: usize,
}

impl PresenceUser {
    pub fn is_recently_active(&self, now_ms: i64) -> bool {
        is_recently_active(self.last_seen, now_ms)
    }

    pub fn initials(&self) -> String {
        initials(&self.name)
    }
}

/// A user counts as recently active for 60 s after their last heartbeat.
pub fn is_recently_active(last_seen_ms: i64, now_ms: i64) -> bool {
    is_active_within(last_seen_ms, now_ms, RECENTLY_ACTIVE_THRESHOLD_MS)
}

pub fn is_active_within(last_seen_ms: i64, now_ms: i64, threshold_ms: i64) -> bool {
    now_ms.saturating_sub(last_seen_ms) < threshold_ms
}

/// First letter of each whitespace-separated word, uppercased, at most two.
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect();
    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPolicy {
    /// Palette order by first sighting.
    #[default]
    RoundRobin,
    /// Derived from the user id, identical on every client.
    Hashed,
}

/// Palette slot for a user id under [`ColorPolicy::Hashed`].
pub fn hashed_color(user_id: &str) -> &'static str {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let index = u64::from_le_bytes(bytes) % USER_COLORS.len() as u64;
    USER_COLORS[index as usize]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarEntry {
    pub id: String,
    pub name: String,
    pub initials: String,
    pub color: String,
    pub avatar_url: Option<String>,
    pub recently_active: bool,
}

/// What the avatar stack renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStack {
    /// Other users, in join order, truncated to the display maximum.
    pub visible: Vec<AvatarEntry>,
    /// The "+N more" count.
    pub overflow: usize,
    /// Badge count over everyone on the channel, self included.
    pub active_count: usize,
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_user_id: String,
    policy: ColorPolicy,
    active_threshold_ms: i64,
    users: HashMap<String, PresenceUser>,
    /// Colours survive leave/rejoin for the lifetime of the tracker.
    assigned_colors: HashMap<String, String>,
    next_color_index: usize,
    next_seq: u64,
}

impl PresenceTracker {
    pub fn new(local_user_id: impl Into<String>, policy: ColorPolicy) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            policy,
            active_threshold_ms: RECENTLY_ACTIVE_THRESHOLD_MS,
            users: HashMap::new(),
            assigned_colors: HashMap::new(),
            next_color_index: 0,
            next_seq: 0,
        }
    }

    /// Override how long after a heartbeat a user still counts as active.
    pub fn with_active_threshold(mut self, threshold_ms: i64) -> Self {
        self.active_threshold_ms = threshold_ms;
        self
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Upsert a user from a join notification. Each join counts one open
    /// connection for the user.
    pub fn join(&mut self, meta: &PresenceMeta) -> &PresenceUser {
        let color = self.color_for(&meta.user_id, meta.color.as_deref());
        let seq = self.next_seq;

        let user = self
            .users
            .entry(meta.user_id.clone())
            .or_insert_with(|| PresenceUser {
                id: meta.user_id.clone(),
                name: meta.name.clone(),
                email: None,
                avatar_url: None,
                color,
                last_seen: meta.online_at,
                joined_seq: seq,
                connections: 0,
            });
        if user.joined_seq == seq {
            self.next_seq += 1;
            log::debug!(
                target: "scrumkit.presence",
                "User joined: {} ({})",
                meta.name,
                meta.user_id
            );
        }

        user.connections += 1;
        user.name = meta.name.clone();
        user.email = meta.email.clone();
        user.avatar_url = meta.avatar_url.clone();
        user.last_seen = user.last_seen.max(meta.online_at);
        user
    }

    /// Record a heartbeat. Older timestamps than the one on record are
    /// ignored. Returns false for users not on the channel.
    pub fn touch(&mut self, user_id: &str, timestamp_ms: i64) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.last_seen = user.last_seen.max(timestamp_ms);
                true
            }
            None => false,
        }
    }

    /// Close one of the user's connections. The user is removed, and
    /// returned, only when it was their last one.
    pub fn leave(&mut self, user_id: &str) -> Option<PresenceUser> {
        let user = self.users.get_mut(user_id)?;
        user.connections = user.connections.saturating_sub(1);
        if user.connections > 0 {
            return None;
        }
        log::debug!(target: "scrumkit.presence", "User left: {}", user_id);
        self.users.remove(user_id)
    }

    /// Replace the user set with a full channel snapshot.
    pub fn sync(&mut self, metas: &[PresenceMeta]) {
        self.users
            .retain(|id, _| metas.iter().any(|m| &m.user_id == id));
        for user in self.users.values_mut() {
            user.connections = 0;
        }
        for meta in metas {
            self.join(meta);
        }
    }

    /// Drop everyone; used when the channel is torn down.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceUser> {
        self.users.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// All users in join order.
    pub fn users(&self) -> Vec<&PresenceUser> {
        let mut users: Vec<&PresenceUser> = self.users.values().collect();
        users.sort_by_key(|u| u.joined_seq);
        users
    }

    /// Everyone except the local user, in join order.
    pub fn other_users(&self) -> Vec<&PresenceUser> {
        self.users()
            .into_iter()
            .filter(|u| u.id != self.local_user_id)
            .collect()
    }

    pub fn recently_active_count(&self, now_ms: i64) -> usize {
        self.users
            .values()
            .filter(|u| is_active_within(u.last_seen, now_ms, self.active_threshold_ms))
            .count()
    }

    pub fn avatar_stack(&self, now_ms: i64, max_visible: usize) -> AvatarStack {
        let others = self.other_users();
        let overflow = others.len().saturating_sub(max_visible);
        let visible = others
            .into_iter()
            .take(max_visible)
            .map(|u| AvatarEntry {
                id: u.id.clone(),
                name: u.name.clone(),
                initials: u.initials(),
                color: u.color.clone(),
                avatar_url: u.avatar_url.clone(),
                recently_active: is_active_within(u.last_seen, now_ms, self.active_threshold_ms),
            })
            .collect();

        AvatarStack {
            visible,
            overflow,
            active_count: self.users.len(),
        }
    }

    /// Avatar stack with the default display maximum.
    pub fn default_avatar_stack(&self, now_ms: i64) -> AvatarStack {
        self.avatar_stack(now_ms, MAX_DISPLAYED_AVATARS)
    }

    fn color_for(&mut self, user_id: &str, requested: Option<&str>) -> String {
        if let Some(color) = self.assigned_colors.get(user_id) {
            return color.clone();
        }
        let color = match (requested, self.policy) {
            (Some(requested), _) => requested.to_string(),
            (None, ColorPolicy::Hashed) => hashed_color(user_id).to_string(),
            (None, ColorPolicy::RoundRobin) => {
                let color = USER_COLORS[self.next_color_index % USER_COLORS.len()];
                self.next_color_index += 1;
                color.to_string()
            }
        };
        self.assigned_colors.insert(user_id.to_string(), color.clone());
        color
    }
}
