/// Schema for the cache store and the sync queue.
pub const SCHEMA: &str = r#"
-- Cached responses, namespaced by generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    identity TEXT NOT NULL,
    resource_class TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation ON cache_entries(generation);

-- Offline-originated writes awaiting replay
CREATE TABLE IF NOT EXISTS sync_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    payload TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_sync_tasks_tag ON sync_tasks(tag, state, id);
"#;
