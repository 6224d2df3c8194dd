//! Caller context and permission predicates.
//!
//! Role and identity resolution live outside this crate; callers resolve
//! them per request and pass the result in as an [`Actor`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// The caller's role within the guild that owns the blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuildRole {
    Leader,
    Officer,
    Raider,
    Member,
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    /// Preferred display name, stamped as "last edited by".
    pub display_name: Option<String>,
    /// `None` when the caller is not a guild member.
    pub role: Option<GuildRole>,
}

impl Actor {
    pub fn new(user_id: impl Into<UserId>, role: Option<GuildRole>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            role,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn can_manage(&self) -> bool {
        can_manage_quest_blueprints(self.role)
    }

    /// Owner of a resource, or a manager acting on their behalf.
    pub fn can_act_for(&self, owner: &UserId) -> bool {
        &self.user_id == owner || self.can_manage()
    }
}

pub fn can_manage_quest_blueprints(role: Option<GuildRole>) -> bool {
    matches!(role, Some(GuildRole::Leader | GuildRole::Officer))
}

pub fn can_edit_quest_blueprint(role: Option<GuildRole>, actor: &UserId, creator: &UserId) -> bool {
    can_manage_quest_blueprints(role) || actor == creator
}

pub fn can_view_guild_quest_board(role: Option<GuildRole>) -> bool {
    role.is_some()
}

/// Display-name lookup for users other than the caller.
pub trait IdentityResolver: Send + Sync {
    fn display_name(&self, user: &UserId) -> Option<String>;
}

impl IdentityResolver for HashMap<UserId, String> {
    fn display_name(&self, user: &UserId) -> Option<String> {
        self.get(user).cloned()
    }
}

/// Resolver that knows nobody.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIdentities;

impl IdentityResolver for NoIdentities {
    fn display_name(&self, _user: &UserId) -> Option<String> {
        None
    }
}
