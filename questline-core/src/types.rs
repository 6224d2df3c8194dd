use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{self, Attributes};

// ── Typed ID wrappers ──────────────────────────────────────────────

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

typed_id!(GuildId);
typed_id!(UserId);
typed_id!(BlueprintId);
typed_id!(NodeId);
typed_id!(LinkId);
typed_id!(AssignmentId);
typed_id!(ProgressId);

/// Fresh random identifier for rows the store owns.
pub fn new_id<T: From<String>>() -> T {
    T::from(uuid::Uuid::new_v4().to_string())
}

// ── Closed vocabularies ────────────────────────────────────────────

/// Enums persisted as text columns: `as_str` for writes, `FromStr` for reads.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    )),
                }
            }
        }
    };
}

/// Who may discover a blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Guild,
    LinkOnly,
    Private,
}

text_enum!(Visibility {
    Guild => "guild",
    LinkOnly => "link_only",
    Private => "private",
});

/// Step kind shown in the editor. Purely descriptive; group behavior comes
/// from `metadata.isGroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Deliver,
    Kill,
    Loot,
    SpeakWith,
    Explore,
    Tradeskill,
    Fish,
    Forage,
    Use,
    Touch,
    GiveCash,
    Group,
    #[default]
    Other,
}

text_enum!(NodeType {
    Deliver => "deliver",
    Kill => "kill",
    Loot => "loot",
    SpeakWith => "speak_with",
    Explore => "explore",
    Tradeskill => "tradeskill",
    Fish => "fish",
    Forage => "forage",
    Use => "use",
    Touch => "touch",
    GiveCash => "give_cash",
    Group => "group",
    Other => "other",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

text_enum!(AssignmentStatus {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl AssignmentStatus {
    /// Statuses that count toward the one-open-run-per-blueprint rule.
    pub const OPEN: &'static [Self] = &[Self::Active, Self::Paused];

    pub fn is_open(self) -> bool {
        Self::OPEN.contains(&self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

text_enum!(ProgressStatus {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Completed => "completed",
    Blocked => "blocked",
});

// ── Blueprint graph ────────────────────────────────────────────────

/// A guild-owned quest definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: BlueprintId,
    pub guild_id: GuildId,
    pub created_by: UserId,
    pub title: String,
    pub summary: Option<String>,
    pub visibility: Visibility,
    pub is_archived: bool,
    pub last_edited_by: Option<UserId>,
    pub last_edited_by_name: Option<String>,
    /// Incremented by every graph replacement.
    pub graph_revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Clamp editor coordinates into `[-limit, limit]` and round to integers.
    /// Non-finite coordinates snap to the lower bound.
    pub fn clamped(x: f64, y: f64, limit: i32) -> Self {
        Self {
            x: clamp_coordinate(x, limit),
            y: clamp_coordinate(y, limit),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_coordinate(value: f64, limit: i32) -> i32 {
    let bound = f64::from(limit.abs());
    if !value.is_finite() {
        return -limit.abs();
    }
    // halves round toward +inf, so -2.5 lands on -2
    (value.clamp(-bound, bound) + 0.5).floor() as i32
}

/// One step of a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestNode {
    pub id: NodeId,
    pub blueprint_id: BlueprintId,
    pub title: String,
    pub description: Option<String>,
    pub node_type: NodeType,
    pub position: Position,
    pub sort_order: i32,
    pub requirements: Attributes,
    pub metadata: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestNode {
    pub fn is_group(&self) -> bool {
        value::is_group(&self.metadata)
    }

    pub fn target_count(&self) -> u32 {
        value::target_count(&self.requirements)
    }
}

/// Directed prerequisite edge `parent -> child`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestLink {
    pub id: LinkId,
    pub blueprint_id: BlueprintId,
    pub parent_node_id: NodeId,
    pub child_node_id: NodeId,
    pub conditions: Attributes,
}

// ── Assignments ────────────────────────────────────────────────────

/// Roll-up counters over every progress row of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total_nodes: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub blocked: u32,
    pub not_started: u32,
    pub percent_complete: f64,
}

/// One user's run through a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub blueprint_id: BlueprintId,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub status: AssignmentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub progress_summary: ProgressSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-node, per-assignment completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub id: ProgressId,
    pub assignment_id: AssignmentId,
    pub blueprint_id: BlueprintId,
    pub node_id: NodeId,
    pub status: ProgressStatus,
    pub progress_count: u32,
    pub target_count: u32,
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl NodeProgress {
    /// A fresh `NotStarted` row for `node` within `assignment_id`.
    pub fn seed(assignment_id: &AssignmentId, node: &QuestNode, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            assignment_id: assignment_id.clone(),
            blueprint_id: node.blueprint_id.clone(),
            node_id: node.id.clone(),
            status: ProgressStatus::NotStarted,
            progress_count: 0,
            target_count: node.target_count(),
            notes: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Assignment counts per status for one blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssignmentCounts {
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
    pub cancelled: u64,
}

impl AssignmentCounts {
    pub fn add(&mut self, status: AssignmentStatus, count: u64) {
        match status {
            AssignmentStatus::Active => self.active += count,
            AssignmentStatus::Paused => self.paused += count,
            AssignmentStatus::Completed => self.completed += count,
            AssignmentStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn get(&self, status: AssignmentStatus) -> u64 {
        match status {
            AssignmentStatus::Active => self.active,
            AssignmentStatus::Paused => self.paused,
            AssignmentStatus::Completed => self.completed,
            AssignmentStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        self.active + self.paused + self.completed + self.cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentOrder {
    /// Oldest first (rosters).
    #[default]
    StartedAsc,
    /// Newest first (viewer history).
    StartedDesc,
}

/// Filter for assignment lookups. Empty `statuses` means any status.
#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub guild_id: Option<GuildId>,
    pub blueprint_id: Option<BlueprintId>,
    pub user_id: Option<UserId>,
    pub statuses: Vec<AssignmentStatus>,
    pub order: AssignmentOrder,
}

impl AssignmentFilter {
    pub fn for_blueprint(blueprint_id: &BlueprintId) -> Self {
        Self {
            blueprint_id: Some(blueprint_id.clone()),
            ..Default::default()
        }
    }
}

// ── Operation inputs ───────────────────────────────────────────────

/// Raw editor coordinates before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionInput {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A node as submitted in a full-graph replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    pub id: NodeId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: PositionInput,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub requirements: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    /// Explicit group flag; when absent `metadata.isGroup` decides.
    #[serde(default)]
    pub is_group: Option<bool>,
}

impl NodeInput {
    pub fn is_group(&self) -> bool {
        self.is_group
            .unwrap_or_else(|| value::is_group(&self.metadata))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInput {
    /// Generated when absent or empty.
    #[serde(default)]
    pub id: Option<LinkId>,
    pub parent_node_id: NodeId,
    pub child_node_id: NodeId,
    #[serde(default)]
    pub conditions: Attributes,
}

/// Full replacement node/link set for one blueprint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub nodes: Vec<NodeInput>,
    #[serde(default)]
    pub links: Vec<LinkInput>,
    /// When set, the write is rejected unless the stored revision matches.
    #[serde(default)]
    pub expected_revision: Option<u64>,
}

/// An explicit `null` deserializes to `Some(None)`, an absent field to `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// One leaf-node progress change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub node_id: NodeId,
    #[serde(default)]
    pub status: Option<ProgressStatus>,
    /// Fractional counts are accepted and truncated when applied.
    #[serde(default)]
    pub progress_count: Option<f64>,
    /// `Some(None)` clears the note; `None` leaves it alone.
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewBlueprint {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Partial metadata edit; absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlueprintPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub summary: Option<Option<String>>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub is_archived: Option<bool>,
}
