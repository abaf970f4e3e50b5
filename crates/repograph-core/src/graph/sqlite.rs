//! SQLite-backed graph store

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use super::{
    traversal, GraphStore, RankedId, Relation, RelationKind, RelationTarget, TraversalPattern,
};
use crate::embeddings::Embedding;
use crate::error::{StoreError, StoreWriteError};
use crate::index::{CodeElement, ElementId};
use crate::query::WeightedTerm;
use crate::similarity::SimilarityEdge;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS elements (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    payload TEXT NOT NULL,
    embedding BLOB
);

CREATE INDEX IF NOT EXISTS idx_elements_name ON elements(name);
CREATE INDEX IF NOT EXISTS idx_elements_file ON elements(file_path);

CREATE TABLE IF NOT EXISTS similarity_edges (
    a TEXT NOT NULL,
    b TEXT NOT NULL,
    structural_score REAL NOT NULL,
    embedding_score REAL,
    combined_score REAL NOT NULL,
    PRIMARY KEY (a, b)
);

CREATE INDEX IF NOT EXISTS idx_edges_b ON similarity_edges(b);

CREATE TABLE IF NOT EXISTS relations (
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    target_kind TEXT NOT NULL,
    target TEXT NOT NULL,
    line INTEGER NOT NULL DEFAULT -1,
    PRIMARY KEY (kind, source, target_kind, target, line)
);
"#;

pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unreachable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unreachable(format!("{}: {e}", path.display())))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Opened graph store");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Unreachable(format!("schema setup failed: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on a blocking thread
    async fn call<T, F>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?
    }

    async fn write<F>(&self, target: String, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&Connection) -> Result<usize, rusqlite::Error> + Send + 'static,
    {
        self.call(f).await.map(|_| ()).map_err(|e| write_error(target, e))
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        self.call(f).await.map_err(|e| StoreError::Query(e.to_string()))
    }

    pub async fn counts(&self) -> Result<(usize, usize, usize), StoreError> {
        self.read(|conn| {
            let count = |table: &str| -> Result<usize, rusqlite::Error> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as usize)
            };
            Ok((
                count("elements")?,
                count("similarity_edges")?,
                count("relations")?,
            ))
        })
        .await
    }
}

/// Storage-level failures end the run; anything else is per item
fn write_error(target: String, e: rusqlite::Error) -> StoreError {
    if is_fatal(&e) {
        return StoreError::Unreachable(e.to_string());
    }
    StoreError::Write(StoreWriteError {
        target,
        transient: is_transient(&e),
        reason: e.to_string(),
    })
}

fn is_fatal(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
            )
    )
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn element_from_row(
    payload: &str,
    embedding: Option<Vec<u8>>,
) -> Result<CodeElement, rusqlite::Error> {
    let mut element: CodeElement = serde_json::from_str(payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    element.embedding = embedding.and_then(|bytes| Embedding::from_bytes(&bytes).ok());
    Ok(element)
}

fn load_all(conn: &Connection) -> Result<Vec<CodeElement>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT payload, embedding FROM elements ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        let payload: String = row.get(0)?;
        let embedding: Option<Vec<u8>> = row.get(1)?;
        Ok((payload, embedding))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (payload, embedding) = row?;
        out.push(element_from_row(&payload, embedding)?);
    }
    Ok(out)
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.call(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    async fn upsert_node(&self, element: &CodeElement) -> Result<(), StoreError> {
        let payload = serde_json::to_string(element).map_err(|e| {
            StoreError::Write(StoreWriteError {
                target: element.id.to_string(),
                reason: e.to_string(),
                transient: false,
            })
        })?;
        let embedding = element.embedding.as_ref().map(Embedding::to_bytes);
        let e = element.clone();

        self.write(element.id.to_string(), move |conn| {
            conn.execute(
                "INSERT INTO elements (id, kind, name, qualified_name, file_path, line_start, line_end, content_hash, payload, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    name = excluded.name,
                    qualified_name = excluded.qualified_name,
                    file_path = excluded.file_path,
                    line_start = excluded.line_start,
                    line_end = excluded.line_end,
                    content_hash = excluded.content_hash,
                    payload = excluded.payload,
                    embedding = excluded.embedding",
                params![
                    e.id.as_str(),
                    e.kind.as_str(),
                    e.name,
                    e.qualified_name,
                    e.file_path,
                    e.line_start as i64,
                    e.line_end as i64,
                    e.content_hash,
                    payload,
                    embedding,
                ],
            )
        })
        .await
    }

    async fn upsert_edge(&self, edge: &SimilarityEdge) -> Result<(), StoreError> {
        let edge = edge.clone();
        let target = format!("{} <-> {}", edge.a, edge.b);
        self.write(target, move |conn| {
            conn.execute(
                "INSERT INTO similarity_edges (a, b, structural_score, embedding_score, combined_score)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(a, b) DO UPDATE SET
                    structural_score = excluded.structural_score,
                    embedding_score = excluded.embedding_score,
                    combined_score = excluded.combined_score",
                params![
                    edge.a.as_str(),
                    edge.b.as_str(),
                    edge.structural_score as f64,
                    edge.embedding_score.map(f64::from),
                    edge.combined_score as f64,
                ],
            )
        })
        .await
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<(), StoreError> {
        let r = relation.clone();
        let target = format!("{} {} {}", r.source, r.kind.as_str(), r.target.as_str());
        self.write(target, move |conn| {
            let target_kind = match &r.target {
                RelationTarget::Element(_) => "element",
                RelationTarget::External(_) => "external",
            };
            conn.execute(
                "INSERT INTO relations (kind, source, target_kind, target, line)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
                params![
                    r.kind.as_str(),
                    r.source.as_str(),
                    target_kind,
                    r.target.as_str(),
                    r.line.map(|l| l as i64).unwrap_or(-1),
                ],
            )
        })
        .await
    }

    async fn query_by_traversal(
        &self,
        pattern: &TraversalPattern,
        terms: &[WeightedTerm],
        limit: usize,
    ) -> Result<Vec<RankedId>, StoreError> {
        let elements = self.read(load_all).await?;
        let ranked = traversal::rank(pattern, &elements, terms, limit);
        debug!(
            pattern = pattern.name(),
            candidates = elements.len(),
            results = ranked.len(),
            "Traversal query"
        );
        Ok(ranked)
    }

    async fn get_node(&self, id: &ElementId) -> Result<Option<CodeElement>, StoreError> {
        let id = id.to_string();
        self.read(move |conn| {
            let row = conn
                .query_row(
                    "SELECT payload, embedding FROM elements WHERE id = ?1",
                    [id],
                    |row| {
                        let payload: String = row.get(0)?;
                        let embedding: Option<Vec<u8>> = row.get(1)?;
                        Ok((payload, embedding))
                    },
                )
                .optional()?;
            row.map(|(payload, embedding)| element_from_row(&payload, embedding))
                .transpose()
        })
        .await
    }

    async fn load_nodes(&self) -> Result<Vec<CodeElement>, StoreError> {
        self.read(load_all).await
    }

    async fn similar_edges(
        &self,
        id: &ElementId,
        limit: usize,
    ) -> Result<Vec<SimilarityEdge>, StoreError> {
        let id = id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT a, b, structural_score, embedding_score, combined_score,
                        CASE WHEN a = ?1 THEN b ELSE a END AS other
                 FROM similarity_edges
                 WHERE a = ?1 OR b = ?1
                 ORDER BY combined_score DESC, other ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![id, limit as i64], |row| {
                Ok(SimilarityEdge {
                    a: ElementId::from(row.get::<_, String>(0)?),
                    b: ElementId::from(row.get::<_, String>(1)?),
                    structural_score: row.get::<_, f64>(2)? as f32,
                    embedding_score: row.get::<_, Option<f64>>(3)?.map(|v| v as f32),
                    combined_score: row.get::<_, f64>(4)? as f32,
                })
            })?;
            let edges = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(edges)
        })
        .await
    }

    async fn relations_from(&self, id: &ElementId) -> Result<Vec<Relation>, StoreError> {
        let id = id.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT kind, source, target_kind, target, line FROM relations
                 WHERE source = ?1
                 ORDER BY kind, target_kind, target, line",
            )?;
            let rows = stmt.query_map([id], |row| {
                let kind: String = row.get(0)?;
                let source: String = row.get(1)?;
                let target_kind: String = row.get(2)?;
                let target: String = row.get(3)?;
                let line: i64 = row.get(4)?;
                Ok((kind, source, target_kind, target, line))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (kind, source, target_kind, target, line) = row?;
                let Some(kind) = RelationKind::parse(&kind) else {
                    continue;
                };
                out.push(Relation {
                    kind,
                    source: ElementId::from(source),
                    target: if target_kind == "element" {
                        RelationTarget::Element(ElementId::from(target))
                    } else {
                        RelationTarget::External(target)
                    },
                    line: (line >= 0).then_some(line as usize),
                });
            }
            out.sort();
            Ok(out)
        })
        .await
    }
}
