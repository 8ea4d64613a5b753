/// Schema for the mapping/preference store and the received-event log.
pub const SCHEMA: &str = r#"
-- Channel <-> project/component mappings
CREATE TABLE IF NOT EXISTS channel_mappings (
    workspace TEXT NOT NULL,
    channel TEXT NOT NULL,
    project_id TEXT NOT NULL,
    component_id TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (workspace, channel, project_id, component_id)
);

CREATE INDEX IF NOT EXISTS idx_channel_mappings_workspace
    ON channel_mappings(workspace);

-- Per-channel notification preferences (serialized JSON)
CREATE TABLE IF NOT EXISTS channel_preferences (
    workspace TEXT NOT NULL,
    channel TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (workspace, channel)
);

-- Repository -> channel links for dynamic channel discovery
CREATE TABLE IF NOT EXISTS repo_channels (
    workspace TEXT NOT NULL,
    repo TEXT NOT NULL,
    channel TEXT NOT NULL,
    PRIMARY KEY (workspace, repo, channel)
);

-- Every accepted webhook event, replayed to refresh footer content
CREATE TABLE IF NOT EXISTS issue_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace TEXT NOT NULL,
    issue_key TEXT NOT NULL,
    received_at TEXT NOT NULL,
    payload BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_issue_events_key
    ON issue_events(workspace, issue_key, id);
"#;
