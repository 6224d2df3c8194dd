/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for Questline's `SQLite` database.
///
/// Node identity is `(blueprint_id, id)`: ids are chosen by the editor and
/// only need to be unique within one blueprint. Deleting a node cascades
/// to its links and to every progress row that references it.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS questline_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quest_blueprints (
    id TEXT PRIMARY KEY,
    guild_id TEXT NOT NULL,
    created_by TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT,
    visibility TEXT NOT NULL DEFAULT 'guild',
    is_archived INTEGER NOT NULL DEFAULT 0,
    last_edited_by TEXT,
    last_edited_by_name TEXT,
    graph_revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blueprints_guild ON quest_blueprints(guild_id);

CREATE TABLE IF NOT EXISTS quest_nodes (
    blueprint_id TEXT NOT NULL REFERENCES quest_blueprints(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    node_type TEXT NOT NULL,
    position_x INTEGER NOT NULL DEFAULT 0,
    position_y INTEGER NOT NULL DEFAULT 0,
    sort_order INTEGER NOT NULL DEFAULT 0,
    requirements TEXT NOT NULL DEFAULT '{}',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (blueprint_id, id)
);

CREATE TABLE IF NOT EXISTS quest_links (
    blueprint_id TEXT NOT NULL REFERENCES quest_blueprints(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    parent_node_id TEXT NOT NULL,
    child_node_id TEXT NOT NULL,
    conditions TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (blueprint_id, id),
    UNIQUE (blueprint_id, parent_node_id, child_node_id),
    FOREIGN KEY (blueprint_id, parent_node_id)
        REFERENCES quest_nodes(blueprint_id, id) ON DELETE CASCADE,
    FOREIGN KEY (blueprint_id, child_node_id)
        REFERENCES quest_nodes(blueprint_id, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_links_child ON quest_links(blueprint_id, child_node_id);

CREATE TABLE IF NOT EXISTS quest_assignments (
    id TEXT PRIMARY KEY,
    blueprint_id TEXT NOT NULL REFERENCES quest_blueprints(id) ON DELETE CASCADE,
    guild_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    started_at TEXT NOT NULL,
    completed_at TEXT,
    cancelled_at TEXT,
    last_progress_at TEXT,
    progress_summary TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assignments_guild ON quest_assignments(guild_id);
CREATE INDEX IF NOT EXISTS idx_assignments_user ON quest_assignments(user_id);
CREATE INDEX IF NOT EXISTS idx_assignments_blueprint ON quest_assignments(blueprint_id, status);
-- At most one open (active/paused) run per user and blueprint
CREATE UNIQUE INDEX IF NOT EXISTS uq_assignments_open
    ON quest_assignments(blueprint_id, user_id)
    WHERE status IN ('active', 'paused');

CREATE TABLE IF NOT EXISTS quest_node_progress (
    id TEXT PRIMARY KEY,
    assignment_id TEXT NOT NULL REFERENCES quest_assignments(id) ON DELETE CASCADE,
    blueprint_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_started',
    progress_count INTEGER NOT NULL DEFAULT 0,
    target_count INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE (assignment_id, node_id),
    FOREIGN KEY (blueprint_id, node_id)
        REFERENCES quest_nodes(blueprint_id, id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_progress_node ON quest_node_progress(blueprint_id, node_id);
";

/// `SQLite` PRAGMAs for file-backed stores.
pub const PRAGMAS_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_executes_on_in_memory_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for table in [
            "questline_meta",
            "quest_blueprints",
            "quest_nodes",
            "quest_links",
            "quest_assignments",
            "quest_node_progress",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
    }
}
