use chrono::Utc;
use tracing::{info, instrument};

use crate::access::{Actor, can_edit_quest_blueprint};
use crate::error::{PermissionError, Result, ValidationError};
use crate::types::{Blueprint, BlueprintId, BlueprintPatch, GuildId, NewBlueprint, new_id};

use super::sync::stamp_editor;
use super::{QuestTracker, load_guild_blueprint};

pub const MAX_TITLE_CHARS: usize = 191;
pub const MAX_SUMMARY_CHARS: usize = 500;

fn normalize_title(raw: &str) -> std::result::Result<String, ValidationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyField { field: "title" });
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::FieldTooLong {
            field: "title",
            max: MAX_TITLE_CHARS,
        });
    }
    Ok(title.to_string())
}

/// Blank summaries are stored as absent.
fn normalize_summary(raw: Option<&str>) -> std::result::Result<Option<String>, ValidationError> {
    let Some(summary) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        return Err(ValidationError::FieldTooLong {
            field: "summary",
            max: MAX_SUMMARY_CHARS,
        });
    }
    Ok(Some(summary.to_string()))
}

impl QuestTracker {
    /// Create an empty blueprint owned by the actor's guild.
    #[instrument(skip_all, name = "blueprint_create")]
    pub async fn create_blueprint(
        &self,
        guild_id: &GuildId,
        actor: &Actor,
        input: NewBlueprint,
    ) -> Result<Blueprint> {
        if actor.role.is_none() {
            return Err(PermissionError::NotMember(actor.user_id.clone()).into());
        }
        let title = normalize_title(&input.title)?;
        let summary = normalize_summary(input.summary.as_deref())?;

        let now = Utc::now();
        let blueprint = Blueprint {
            id: new_id(),
            guild_id: guild_id.clone(),
            created_by: actor.user_id.clone(),
            title,
            summary,
            visibility: input.visibility,
            is_archived: false,
            last_edited_by: Some(actor.user_id.clone()),
            last_edited_by_name: actor.display_name.clone(),
            graph_revision: 0,
            created_at: now,
            updated_at: now,
        };

        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self.store.insert_blueprint(&blueprint).await;
        self.finish(result).await?;

        info!(blueprint = %blueprint.id, title = %blueprint.title, "Quest blueprint created");
        Ok(blueprint)
    }

    /// Apply the fields present in `patch`.
    #[instrument(skip_all, name = "blueprint_update", fields(blueprint = %blueprint_id))]
    pub async fn update_blueprint_metadata(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
        patch: BlueprintPatch,
    ) -> Result<Blueprint> {
        let title = patch.title.as_deref().map(normalize_title).transpose()?;
        let summary = patch
            .summary
            .as_ref()
            .map(|s| normalize_summary(s.as_deref()))
            .transpose()?;

        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self
            .update_blueprint_metadata_tx(guild_id, blueprint_id, actor, &patch, title, summary)
            .await;
        let blueprint = self.finish(result).await?;

        info!(archived = blueprint.is_archived, "Quest blueprint updated");
        Ok(blueprint)
    }

    async fn update_blueprint_metadata_tx(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
        patch: &BlueprintPatch,
        title: Option<String>,
        summary: Option<Option<String>>,
    ) -> Result<Blueprint> {
        let store = self.store();
        let mut blueprint = load_guild_blueprint(store, guild_id, blueprint_id).await?;
        if !can_edit_quest_blueprint(actor.role, &actor.user_id, &blueprint.created_by) {
            return Err(PermissionError::BlueprintEdit(actor.user_id.clone()).into());
        }

        if let Some(title) = title {
            blueprint.title = title;
        }
        if let Some(summary) = summary {
            blueprint.summary = summary;
        }
        if let Some(visibility) = patch.visibility {
            blueprint.visibility = visibility;
        }
        if let Some(archived) = patch.is_archived {
            blueprint.is_archived = archived;
        }
        stamp_editor(&mut blueprint, actor, Utc::now());
        store.update_blueprint(&blueprint).await?;
        Ok(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::access::GuildRole;
    use crate::config::QuestConfig;
    use crate::error::{NotFoundError, QuestError};
    use crate::store::sqlite::SqliteStore;
    use crate::types::Visibility;

    fn tracker() -> QuestTracker {
        QuestTracker::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            QuestConfig::default(),
        )
    }

    fn new_blueprint(title: &str) -> NewBlueprint {
        NewBlueprint {
            title: title.to_string(),
            summary: Some("   ".into()),
            visibility: Visibility::LinkOnly,
        }
    }

    #[test]
    fn titles_are_trimmed_and_bounded() {
        assert_eq!(normalize_title("  Epic  ").unwrap(), "Epic");
        assert_eq!(
            normalize_title("   "),
            Err(ValidationError::EmptyField { field: "title" })
        );
        assert!(normalize_title(&"é".repeat(191)).is_ok());
        assert!(normalize_title(&"é".repeat(192)).is_err());
        assert_eq!(normalize_summary(Some(" ")), Ok(None));
        assert!(normalize_summary(Some(&"x".repeat(501))).is_err());
    }

    #[tokio::test]
    async fn create_stamps_creator_as_editor() {
        let tracker = tracker();
        let actor = Actor::new("u1", Some(GuildRole::Raider)).with_display_name("Frodo");
        let bp = tracker
            .create_blueprint(&GuildId::from("g"), &actor, new_blueprint(" Ring "))
            .await
            .unwrap();
        assert_eq!(bp.title, "Ring");
        assert!(bp.summary.is_none());
        assert_eq!(bp.visibility, Visibility::LinkOnly);
        assert_eq!(bp.last_edited_by_name.as_deref(), Some("Frodo"));
        let stored = tracker.store().get_blueprint(&bp.id).await.unwrap();
        assert_eq!(stored, Some(bp));
    }

    #[tokio::test]
    async fn non_members_cannot_create() {
        let tracker = tracker();
        let err = tracker
            .create_blueprint(&GuildId::from("g"), &Actor::new("x", None), new_blueprint("Ring"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(PermissionError::NotMember(_))));
    }

    #[tokio::test]
    async fn only_creator_or_manager_may_update() {
        let tracker = tracker();
        let guild = GuildId::from("g");
        let creator = Actor::new("u1", Some(GuildRole::Member));
        let bp = tracker
            .create_blueprint(&guild, &creator, new_blueprint("Ring"))
            .await
            .unwrap();

        let patch = BlueprintPatch {
            title: Some("Rings".into()),
            summary: Some(Some("One to rule them".into())),
            ..BlueprintPatch::default()
        };
        let err = tracker
            .update_blueprint_metadata(
                &guild,
                &bp.id,
                &Actor::new("u2", Some(GuildRole::Raider)),
                patch.clone(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));

        let officer = Actor::new("u3", Some(GuildRole::Officer)).with_display_name("Gandalf");
        let updated = tracker
            .update_blueprint_metadata(&guild, &bp.id, &officer, patch)
            .await
            .unwrap();
        assert_eq!(updated.title, "Rings");
        assert_eq!(updated.summary.as_deref(), Some("One to rule them"));
        assert_eq!(updated.last_edited_by_name.as_deref(), Some("Gandalf"));
        assert_eq!(updated.created_by, creator.user_id);

        let cleared = tracker
            .update_blueprint_metadata(
                &guild,
                &bp.id,
                &creator,
                BlueprintPatch {
                    summary: Some(None),
                    ..BlueprintPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.summary.is_none());
        assert_eq!(cleared.title, "Rings");
    }

    #[tokio::test]
    async fn other_guilds_blueprints_are_invisible() {
        let tracker = tracker();
        let actor = Actor::new("u1", Some(GuildRole::Leader));
        let bp = tracker
            .create_blueprint(&GuildId::from("g"), &actor, new_blueprint("Ring"))
            .await
            .unwrap();
        let err = tracker
            .update_blueprint_metadata(
                &GuildId::from("other"),
                &bp.id,
                &actor,
                BlueprintPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::NotFound(NotFoundError::Blueprint(_))));
    }
}
