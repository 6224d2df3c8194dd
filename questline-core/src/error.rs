use crate::types::{AssignmentId, BlueprintId, LinkId, NodeId, UserId};

/// Top-level Questline error type.
///
/// All fallible operations in `questline-core` return [`Result<T, QuestError>`](Result).
/// The first four variants are the caller-facing taxonomy; `Store` and
/// `Config` wrap infrastructure failures.
#[derive(thiserror::Error, Debug)]
pub enum QuestError {
    /// Malformed graph payload, empty update batch or invalid field.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced blueprint, assignment or node does not exist.
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// The caller lacks ownership or the manager role.
    #[error("Permission denied: {0}")]
    Permission(#[from] PermissionError),

    /// The operation collides with existing state.
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Error from the `SQLite` store layer.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Graph payload and input validation failures. Raised before any write.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate quest node identifier ({0})")]
    DuplicateNode(NodeId),

    #[error("link {parent} -> {child} references an unknown node")]
    UnknownLinkEndpoint { parent: NodeId, child: NodeId },

    #[error("link cannot point node {0} at itself")]
    SelfLink(NodeId),

    #[error("duplicate link {parent} -> {child}")]
    DuplicateLink { parent: NodeId, child: NodeId },

    #[error("duplicate link identifier ({0})")]
    DuplicateLinkId(LinkId),

    #[error("group node {parent} cannot contain group node {child}")]
    NestedGroup { parent: NodeId, child: NodeId },

    #[error("links form a cycle through node {0}")]
    Cycle(NodeId),

    #[error("no quest progress updates supplied")]
    EmptyUpdateBatch,

    #[error("blueprint {0} is archived and cannot be started")]
    ArchivedBlueprint(BlueprintId),

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("quest blueprint {0}")]
    Blueprint(BlueprintId),

    #[error("quest assignment {0}")]
    Assignment(AssignmentId),

    #[error("quest node {0}")]
    Node(NodeId),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("user {0} is not a member of this guild")]
    NotMember(UserId),

    #[error("user {0} may not edit this quest blueprint")]
    BlueprintEdit(UserId),

    #[error("user {0} may not update this assignment")]
    AssignmentUpdate(UserId),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// The user already holds an Active or Paused run of the blueprint.
    #[error("user {user} already has an active assignment for blueprint {blueprint}")]
    ActiveAssignment {
        blueprint: BlueprintId,
        user: UserId,
    },

    /// The graph was replaced since the caller loaded it.
    #[error("graph revision is {actual}, expected {expected}")]
    StaleRevision { expected: u64, actual: u64 },
}

/// Errors from the SQLite-backed quest store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization of a map column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted column holds a value this build cannot interpret.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Errors in Questline configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, QuestError>`.
pub type Result<T> = std::result::Result<T, QuestError>;
