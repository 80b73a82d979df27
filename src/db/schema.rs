/// Schema for the worker-durable store.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache partitions; an empty partition still has a row here
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by sha256("METHOD url")
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES cache_partitions(name) ON DELETE CASCADE
);

-- Pending mutations; seq gives FIFO order
CREATE TABLE IF NOT EXISTS sync_tasks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS worker_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
