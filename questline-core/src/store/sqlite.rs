use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::types::{
    Assignment, AssignmentCounts, AssignmentFilter, AssignmentId, AssignmentOrder,
    AssignmentStatus, Blueprint, BlueprintId, GuildId, NodeId, NodeProgress, Position, QuestLink,
    QuestNode,
};

use super::schema;
use super::{QuestStore, StoreStats};

/// SQLite-backed implementation of `QuestStore`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("questline store mutex poisoned")
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // In-memory databases stay in `memory` journal mode
        if self.db_path.is_some() {
            conn.execute_batch(schema::PRAGMAS_SQL)
                .map_err(StoreError::Sqlite)?;
        }

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO questline_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        Ok(())
    }

    fn row_to_blueprint(row: &Row<'_>) -> rusqlite::Result<Blueprint> {
        Ok(Blueprint {
            id: BlueprintId(row.get("id")?),
            guild_id: GuildId(row.get("guild_id")?),
            created_by: row.get::<_, String>("created_by")?.into(),
            title: row.get("title")?,
            summary: row.get("summary")?,
            visibility: get_text(row, "visibility")?,
            is_archived: row.get("is_archived")?,
            last_edited_by: row.get::<_, Option<String>>("last_edited_by")?.map(Into::into),
            last_edited_by_name: row.get("last_edited_by_name")?,
            graph_revision: row.get("graph_revision")?,
            created_at: get_time(row, "created_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }

    fn row_to_node(row: &Row<'_>) -> rusqlite::Result<QuestNode> {
        Ok(QuestNode {
            id: NodeId(row.get("id")?),
            blueprint_id: BlueprintId(row.get("blueprint_id")?),
            title: row.get("title")?,
            description: row.get("description")?,
            node_type: get_text(row, "node_type")?,
            position: Position {
                x: row.get("position_x")?,
                y: row.get("position_y")?,
            },
            sort_order: row.get("sort_order")?,
            requirements: get_json(row, "requirements")?,
            metadata: get_json(row, "metadata")?,
            created_at: get_time(row, "created_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }

    fn row_to_link(row: &Row<'_>) -> rusqlite::Result<QuestLink> {
        Ok(QuestLink {
            id: row.get::<_, String>("id")?.into(),
            blueprint_id: BlueprintId(row.get("blueprint_id")?),
            parent_node_id: NodeId(row.get("parent_node_id")?),
            child_node_id: NodeId(row.get("child_node_id")?),
            conditions: get_json(row, "conditions")?,
        })
    }

    fn row_to_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
        Ok(Assignment {
            id: AssignmentId(row.get("id")?),
            blueprint_id: BlueprintId(row.get("blueprint_id")?),
            guild_id: GuildId(row.get("guild_id")?),
            user_id: row.get::<_, String>("user_id")?.into(),
            status: get_text(row, "status")?,
            started_at: get_time(row, "started_at")?,
            completed_at: get_opt_time(row, "completed_at")?,
            cancelled_at: get_opt_time(row, "cancelled_at")?,
            last_progress_at: get_opt_time(row, "last_progress_at")?,
            progress_summary: get_json(row, "progress_summary")?,
            created_at: get_time(row, "created_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }

    fn row_to_progress(row: &Row<'_>) -> rusqlite::Result<NodeProgress> {
        Ok(NodeProgress {
            id: row.get::<_, String>("id")?.into(),
            assignment_id: AssignmentId(row.get("assignment_id")?),
            blueprint_id: BlueprintId(row.get("blueprint_id")?),
            node_id: NodeId(row.get("node_id")?),
            status: get_text(row, "status")?,
            progress_count: row.get("progress_count")?,
            target_count: row.get("target_count")?,
            notes: row.get("notes")?,
            started_at: get_opt_time(row, "started_at")?,
            completed_at: get_opt_time(row, "completed_at")?,
            updated_at: get_time(row, "updated_at")?,
        })
    }

    fn count(conn: &Connection, sql: &str) -> crate::error::Result<u64> {
        let n = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(n)
    }
}

// ── Column codecs ──────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn format_opt_time(ts: Option<&DateTime<Utc>>) -> Option<String> {
    ts.map(format_time)
}

fn to_json<T: Serialize>(value: &T) -> crate::error::Result<String> {
    Ok(serde_json::to_string(value).map_err(StoreError::Serialization)?)
}

fn conversion_error(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}

fn get_text<T: FromStr<Err = String>>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let idx = row.as_ref().column_index(col)?;
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e.into()))
}

fn get_json<T: DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let idx = row.as_ref().column_index(col)?;
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, Box::new(e)))
}

fn get_time(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let idx = row.as_ref().column_index(col)?;
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn get_opt_time(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let idx = row.as_ref().column_index(col)?;
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(idx, &s)).transpose()
}

fn expect_one_row(changed: usize, what: &str, id: &str) -> crate::error::Result<()> {
    if changed == 0 {
        return Err(StoreError::Corrupt(format!("{what} {id} vanished before update")).into());
    }
    Ok(())
}

#[async_trait::async_trait]
impl QuestStore for SqliteStore {
    // ── Blueprints ─────────────────────────────────────────────────

    async fn insert_blueprint(&self, blueprint: &Blueprint) -> crate::error::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO quest_blueprints
                (id, guild_id, created_by, title, summary, visibility, is_archived,
                 last_edited_by, last_edited_by_name, graph_revision, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                blueprint.id.as_str(),
                blueprint.guild_id.as_str(),
                blueprint.created_by.as_str(),
                blueprint.title,
                blueprint.summary,
                blueprint.visibility.as_str(),
                blueprint.is_archived,
                blueprint.last_edited_by.as_ref().map(|u| u.as_str()),
                blueprint.last_edited_by_name,
                blueprint.graph_revision,
                format_time(&blueprint.created_at),
                format_time(&blueprint.updated_at),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn get_blueprint(&self, id: &BlueprintId) -> crate::error::Result<Option<Blueprint>> {
        let conn = self.conn();
        let blueprint = conn
            .query_row(
                "SELECT * FROM quest_blueprints WHERE id = ?1",
                params![id.as_str()],
                Self::row_to_blueprint,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(blueprint)
    }

    async fn list_blueprints(&self, guild_id: &GuildId) -> crate::error::Result<Vec<Blueprint>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM quest_blueprints WHERE guild_id = ?1
                 ORDER BY is_archived ASC, title ASC, id ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let blueprints = stmt
            .query_map(params![guild_id.as_str()], Self::row_to_blueprint)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(blueprints)
    }

    async fn update_blueprint(&self, blueprint: &Blueprint) -> crate::error::Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE quest_blueprints SET
                    title = ?2, summary = ?3, visibility = ?4, is_archived = ?5,
                    last_edited_by = ?6, last_edited_by_name = ?7, graph_revision = ?8,
                    updated_at = ?9
                 WHERE id = ?1",
                params![
                    blueprint.id.as_str(),
                    blueprint.title,
                    blueprint.summary,
                    blueprint.visibility.as_str(),
                    blueprint.is_archived,
                    blueprint.last_edited_by.as_ref().map(|u| u.as_str()),
                    blueprint.last_edited_by_name,
                    blueprint.graph_revision,
                    format_time(&blueprint.updated_at),
                ],
            )
            .map_err(StoreError::Sqlite)?;
        expect_one_row(changed, "blueprint", blueprint.id.as_str())
    }

    // ── Graph ──────────────────────────────────────────────────────

    async fn list_nodes(&self, blueprint_id: &BlueprintId) -> crate::error::Result<Vec<QuestNode>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM quest_nodes WHERE blueprint_id = ?1
                 ORDER BY sort_order ASC, created_at ASC, id ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let nodes = stmt
            .query_map(params![blueprint_id.as_str()], Self::row_to_node)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(nodes)
    }

    async fn count_nodes(&self, blueprint_id: &BlueprintId) -> crate::error::Result<u64> {
        let conn = self.conn();
        let n = conn
            .query_row(
                "SELECT COUNT(*) FROM quest_nodes WHERE blueprint_id = ?1",
                params![blueprint_id.as_str()],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;
        Ok(n)
    }

    async fn insert_node(&self, node: &QuestNode) -> crate::error::Result<()> {
        let requirements = to_json(&node.requirements)?;
        let metadata = to_json(&node.metadata)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO quest_nodes
                (blueprint_id, id, title, description, node_type, position_x, position_y,
                 sort_order, requirements, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                node.blueprint_id.as_str(),
                node.id.as_str(),
                node.title,
                node.description,
                node.node_type.as_str(),
                node.position.x,
                node.position.y,
                node.sort_order,
                requirements,
                metadata,
                format_time(&node.created_at),
                format_time(&node.updated_at),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn update_node(&self, node: &QuestNode) -> crate::error::Result<()> {
        let requirements = to_json(&node.requirements)?;
        let metadata = to_json(&node.metadata)?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE quest_nodes SET
                    title = ?3, description = ?4, node_type = ?5, position_x = ?6,
                    position_y = ?7, sort_order = ?8, requirements = ?9, metadata = ?10,
                    updated_at = ?11
                 WHERE blueprint_id = ?1 AND id = ?2",
                params![
                    node.blueprint_id.as_str(),
                    node.id.as_str(),
                    node.title,
                    node.description,
                    node.node_type.as_str(),
                    node.position.x,
                    node.position.y,
                    node.sort_order,
                    requirements,
                    metadata,
                    format_time(&node.updated_at),
                ],
            )
            .map_err(StoreError::Sqlite)?;
        expect_one_row(changed, "quest node", node.id.as_str())
    }

    async fn delete_nodes(
        &self,
        blueprint_id: &BlueprintId,
        ids: &[NodeId],
    ) -> crate::error::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        let mut deleted = 0u64;
        {
            let mut stmt = sp
                .prepare_cached("DELETE FROM quest_nodes WHERE blueprint_id = ?1 AND id = ?2")
                .map_err(StoreError::Sqlite)?;
            for id in ids {
                let n = stmt
                    .execute(params![blueprint_id.as_str(), id.as_str()])
                    .map_err(StoreError::Sqlite)?;
                deleted += n as u64;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(deleted)
    }

    async fn list_links(&self, blueprint_id: &BlueprintId) -> crate::error::Result<Vec<QuestLink>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM quest_links WHERE blueprint_id = ?1
                 ORDER BY rowid ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let links = stmt
            .query_map(params![blueprint_id.as_str()], Self::row_to_link)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(links)
    }

    async fn replace_links(
        &self,
        blueprint_id: &BlueprintId,
        links: &[QuestLink],
    ) -> crate::error::Result<()> {
        let encoded = links
            .iter()
            .map(|link| to_json(&link.conditions))
            .collect::<crate::error::Result<Vec<_>>>()?;

        let mut conn = self.conn();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        sp.execute(
            "DELETE FROM quest_links WHERE blueprint_id = ?1",
            params![blueprint_id.as_str()],
        )
        .map_err(StoreError::Sqlite)?;
        {
            let mut stmt = sp
                .prepare_cached(
                    "INSERT INTO quest_links
                        (blueprint_id, id, parent_node_id, child_node_id, conditions)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(StoreError::Sqlite)?;
            for (link, conditions) in links.iter().zip(&encoded) {
                stmt.execute(params![
                    blueprint_id.as_str(),
                    link.id.as_str(),
                    link.parent_node_id.as_str(),
                    link.child_node_id.as_str(),
                    conditions,
                ])
                .map_err(StoreError::Sqlite)?;
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Assignments ────────────────────────────────────────────────

    async fn insert_assignment(&self, assignment: &Assignment) -> crate::error::Result<()> {
        let summary = to_json(&assignment.progress_summary)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO quest_assignments
                (id, blueprint_id, guild_id, user_id, status, started_at, completed_at,
                 cancelled_at, last_progress_at, progress_summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                assignment.id.as_str(),
                assignment.blueprint_id.as_str(),
                assignment.guild_id.as_str(),
                assignment.user_id.as_str(),
                assignment.status.as_str(),
                format_time(&assignment.started_at),
                format_opt_time(assignment.completed_at.as_ref()),
                format_opt_time(assignment.cancelled_at.as_ref()),
                format_opt_time(assignment.last_progress_at.as_ref()),
                summary,
                format_time(&assignment.created_at),
                format_time(&assignment.updated_at),
            ],
        )
        .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn get_assignment(&self, id: &AssignmentId) -> crate::error::Result<Option<Assignment>> {
        let conn = self.conn();
        let assignment = conn
            .query_row(
                "SELECT * FROM quest_assignments WHERE id = ?1",
                params![id.as_str()],
                Self::row_to_assignment,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(assignment)
    }

    async fn update_assignment(&self, assignment: &Assignment) -> crate::error::Result<()> {
        let summary = to_json(&assignment.progress_summary)?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE quest_assignments SET
                    status = ?2, completed_at = ?3, cancelled_at = ?4, last_progress_at = ?5,
                    progress_summary = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    assignment.id.as_str(),
                    assignment.status.as_str(),
                    format_opt_time(assignment.completed_at.as_ref()),
                    format_opt_time(assignment.cancelled_at.as_ref()),
                    format_opt_time(assignment.last_progress_at.as_ref()),
                    summary,
                    format_time(&assignment.updated_at),
                ],
            )
            .map_err(StoreError::Sqlite)?;
        expect_one_row(changed, "assignment", assignment.id.as_str())
    }

    async fn find_assignments(
        &self,
        filter: &AssignmentFilter,
    ) -> crate::error::Result<Vec<Assignment>> {
        let mut sql = String::from("SELECT * FROM quest_assignments WHERE 1=1");
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(guild_id) = &filter.guild_id {
            param_values.push(Box::new(guild_id.0.clone()));
            let _ = write!(sql, " AND guild_id = ?{}", param_values.len());
        }
        if let Some(blueprint_id) = &filter.blueprint_id {
            param_values.push(Box::new(blueprint_id.0.clone()));
            let _ = write!(sql, " AND blueprint_id = ?{}", param_values.len());
        }
        if let Some(user_id) = &filter.user_id {
            param_values.push(Box::new(user_id.0.clone()));
            let _ = write!(sql, " AND user_id = ?{}", param_values.len());
        }
        if !filter.statuses.is_empty() {
            let mut placeholders = Vec::with_capacity(filter.statuses.len());
            for status in &filter.statuses {
                param_values.push(Box::new(status.as_str()));
                placeholders.push(format!("?{}", param_values.len()));
            }
            let _ = write!(sql, " AND status IN ({})", placeholders.join(", "));
        }
        sql.push_str(match filter.order {
            AssignmentOrder::StartedAsc => " ORDER BY started_at ASC, id ASC",
            AssignmentOrder::StartedDesc => " ORDER BY started_at DESC, id ASC",
        });

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql).map_err(StoreError::Sqlite)?;
        let params_refs: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
        let assignments = stmt
            .query_map(params_refs.as_slice(), Self::row_to_assignment)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(assignments)
    }

    async fn count_assignments(
        &self,
        blueprint_id: &BlueprintId,
    ) -> crate::error::Result<AssignmentCounts> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT status, COUNT(*) FROM quest_assignments
                 WHERE blueprint_id = ?1 GROUP BY status",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![blueprint_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        let mut counts = AssignmentCounts::default();
        for (status, n) in rows {
            let status = AssignmentStatus::from_str(&status).map_err(StoreError::Corrupt)?;
            counts.add(status, n);
        }
        Ok(counts)
    }

    // ── Node progress ──────────────────────────────────────────────

    async fn insert_progress_batch(&self, rows: &[NodeProgress]) -> crate::error::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let sp = conn.savepoint().map_err(StoreError::Sqlite)?;
        {
            let mut stmt = sp
                .prepare_cached(
                    "INSERT INTO quest_node_progress
                        (id, assignment_id, blueprint_id, node_id, status, progress_count,
                         target_count, notes, started_at, completed_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .map_err(StoreError::Sqlite)?;
            for chunk in rows.chunks(1000) {
                for row in chunk {
                    stmt.execute(params![
                        row.id.as_str(),
                        row.assignment_id.as_str(),
                        row.blueprint_id.as_str(),
                        row.node_id.as_str(),
                        row.status.as_str(),
                        row.progress_count,
                        row.target_count,
                        row.notes,
                        format_opt_time(row.started_at.as_ref()),
                        format_opt_time(row.completed_at.as_ref()),
                        format_time(&row.updated_at),
                    ])
                    .map_err(StoreError::Sqlite)?;
                }
            }
        }
        sp.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn list_progress(
        &self,
        assignment_id: &AssignmentId,
    ) -> crate::error::Result<Vec<NodeProgress>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(
                "SELECT p.* FROM quest_node_progress p
                 JOIN quest_nodes n ON n.blueprint_id = p.blueprint_id AND n.id = p.node_id
                 WHERE p.assignment_id = ?1
                 ORDER BY n.sort_order ASC, n.created_at ASC, p.node_id ASC",
            )
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![assignment_id.as_str()], Self::row_to_progress)
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(rows)
    }

    async fn update_progress(&self, row: &NodeProgress) -> crate::error::Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE quest_node_progress SET
                    status = ?3, progress_count = ?4, target_count = ?5, notes = ?6,
                    started_at = ?7, completed_at = ?8, updated_at = ?9
                 WHERE assignment_id = ?1 AND node_id = ?2",
                params![
                    row.assignment_id.as_str(),
                    row.node_id.as_str(),
                    row.status.as_str(),
                    row.progress_count,
                    row.target_count,
                    row.notes,
                    format_opt_time(row.started_at.as_ref()),
                    format_opt_time(row.completed_at.as_ref()),
                    format_time(&row.updated_at),
                ],
            )
            .map_err(StoreError::Sqlite)?;
        expect_one_row(changed, "progress row for node", row.node_id.as_str())
    }

    // ── Transactions ──────────────────────────────────────────────

    async fn begin_transaction(&self) -> crate::error::Result<()> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn commit_transaction(&self) -> crate::error::Result<()> {
        let conn = self.conn();
        conn.execute_batch("COMMIT").map_err(StoreError::Sqlite)?;
        Ok(())
    }

    async fn rollback_transaction(&self) -> crate::error::Result<()> {
        let conn = self.conn();
        conn.execute_batch("ROLLBACK").map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> crate::error::Result<StoreStats> {
        let conn = self.conn();

        let blueprints = Self::count(&conn, "SELECT COUNT(*) FROM quest_blueprints")?;
        let nodes = Self::count(&conn, "SELECT COUNT(*) FROM quest_nodes")?;
        let links = Self::count(&conn, "SELECT COUNT(*) FROM quest_links")?;
        let assignments = Self::count(&conn, "SELECT COUNT(*) FROM quest_assignments")?;
        let progress_rows = Self::count(&conn, "SELECT COUNT(*) FROM quest_node_progress")?;

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(StoreStats {
            blueprints,
            nodes,
            links,
            assignments,
            progress_rows,
            db_size_bytes,
        })
    }
}
