//! SQLite schema definition

/// SQL schema for the metadata database
///
/// Chunks deliberately carry no foreign key to documents: a document removed
/// out-of-band leaves orphan chunks behind until `vacuum` collects them.
pub const SCHEMA_SQL: &str = r#"
-- Documents: one uploaded file per row, scoped to a workspace
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    title TEXT,
    doc_type TEXT NOT NULL DEFAULT 'document',
    created_at TEXT NOT NULL
);

-- Pages: extracted page text
CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    page_number INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE(doc_id, page_number)
);

-- Chunks: page-bounded slices of document text, the unit of retrieval
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    page_start INTEGER NOT NULL,
    page_end INTEGER NOT NULL,
    text TEXT NOT NULL,
    doc_type TEXT NOT NULL DEFAULT 'document',
    created_at TEXT NOT NULL,
    UNIQUE(doc_id, chunk_index)
);

-- Precomputed per-document assets consumed by coverage queries
CREATE TABLE IF NOT EXISTS doc_index_assets (
    doc_id TEXT PRIMARY KEY,
    summary_text TEXT NOT NULL,
    outline_json TEXT NOT NULL DEFAULT '[]',
    entities_json TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

-- Structural units of a scope (lectures of a course, papers of a project)
CREATE TABLE IF NOT EXISTS scope_units (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    title TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS scope_unit_docs (
    unit_id TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    PRIMARY KEY(unit_id, doc_id)
);

-- Embedding cache keyed by hash(model, text); append-only
CREATE TABLE IF NOT EXISTS embedding_cache (
    key TEXT PRIMARY KEY,
    model TEXT NOT NULL,
    vector_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Background tasks
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    payload_json TEXT NOT NULL DEFAULT '{}',
    -- scheduler instance executing the task, and its last liveness write (epoch ms)
    owner TEXT,
    heartbeat_at INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id);
CREATE INDEX IF NOT EXISTS idx_pages_doc ON pages(doc_id);
CREATE INDEX IF NOT EXISTS idx_chunks_workspace_order ON chunks(workspace_id, doc_id, chunk_index);
CREATE INDEX IF NOT EXISTS idx_scope_units_scope ON scope_units(workspace_id, scope_id, position);
CREATE INDEX IF NOT EXISTS idx_tasks_workspace ON tasks(workspace_id, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;
