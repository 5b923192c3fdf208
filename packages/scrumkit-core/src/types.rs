use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timer::TimerState;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A retrospective card as stored in the `items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub column_id: String,
    /// Ordinal within the column. Rows created before ordering existed carry
    /// no position; those sort as slot 0.
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

impl Item {
    pub fn effective_position(&self) -> i32 {
        self.position.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub retrospective_id: String,
    pub title: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Row of the `retrospectives` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrospective {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub settings: BoardSettings,
}

/// The shared `settings` JSON blob of a board.
///
/// Only the facilitator sub-object is typed; every other key is carried
/// through untouched so writes never drop settings owned by other features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facilitator: Option<FacilitatorSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoardSettings {
    pub fn facilitator_mut(&mut self) -> &mut FacilitatorSettings {
        self.facilitator.get_or_insert_with(FacilitatorSettings::default)
    }

    pub fn timer(&self) -> Option<&TimerState> {
        self.facilitator.as_ref().and_then(|f| f.timer.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused_column_id: Option<String>,
    #[serde(default)]
    pub sound_enabled: bool,
}

/// A new ordinal for one item. Produced by the reconciler and consumed
/// immediately by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: String,
    pub position: i32,
}

impl PositionUpdate {
    pub fn new(id: impl Into<String>, position: i32) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// Moves an item into another column at the given slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRelocation {
    pub id: String,
    pub column_id: String,
    pub position: i32,
}

/// Fields needed to create an item; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub column_id: String,
    pub position: i32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
}

/// User identity as known to the auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub preferred_template: Option<String>,
    #[serde(default)]
    pub template_preferences: Option<Value>,
}
