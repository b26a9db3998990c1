//! Relational file metadata used to turn a [`UserFilter`] into file ids.
//!
//! Each configured category id is a TEXT column of the files table.

use std::collections::{BTreeMap, HashSet};

use rusqlite::ToSql;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::filter::{UserFilter, check_column_identifier};
use crate::chat::retrieval::hybrid_index::IndexFuture;

/// File-level metadata record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileRecord {
    /// File id, shared with the chunk index.
    pub id: String,
    /// Name of the uploaded file.
    pub original_file_name: String,
    /// Author.
    pub author: Option<String>,
    /// Folder path.
    pub folder: Option<String>,
    /// Creation timestamp (`YYYY-MM-DD[ HH:MM:SS]`).
    pub created_at: String,
    /// Update timestamp (`YYYY-MM-DD[ HH:MM:SS]`).
    pub updated_at: String,
    /// Category id to value; ids must be configured on the catalog.
    pub categories: BTreeMap<String, String>,
}

/// Metadata store resolving filters to file ids.
pub trait DocumentCatalog: Send + Sync {
    /// Ids of files matching `filter`, in catalog order.
    ///
    /// # Errors
    /// Returns an error if the filter is invalid or the store cannot be queried.
    fn file_ids(&self, filter: UserFilter) -> IndexFuture<'_, ChatResult<Vec<String>>>;
}

/// `SQLite` implementation of [`DocumentCatalog`].
pub struct SqliteDocumentCatalog {
    conn: Connection,
    table: String,
    categories: Vec<String>,
}

impl SqliteDocumentCatalog {
    /// Open the catalog in the documents database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> ChatResult<Self> {
        let conn = Connection::open(&config.documents_path).await?;
        Self::with_connection(conn, config.files_table.clone(), config.category_ids.clone()).await
    }

    /// Create the catalog on an existing connection, adding any missing
    /// category column.
    ///
    /// # Errors
    /// Returns an error if a category id is not a column name or the schema
    /// cannot be created.
    pub async fn with_connection(
        conn: Connection,
        table: String,
        categories: Vec<String>,
    ) -> ChatResult<Self> {
        for category in &categories {
            check_column_identifier(category)?;
        }

        let table_name = table.clone();
        let wanted = categories.clone();
        let added = conn
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table_name} (
                        id TEXT PRIMARY KEY,
                        original_file_name TEXT NOT NULL,
                        author TEXT,
                        folder TEXT,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    )"
                ))?;

                let mut stmt = conn.prepare(&format!("PRAGMA table_info({table_name})"))?;
                let existing = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<Result<HashSet<_>, _>>()?;
                drop(stmt);
                let mut added = Vec::new();
                for category in wanted {
                    if !existing.contains(&category) {
                        conn.execute_batch(&format!(
                            "ALTER TABLE {table_name} ADD COLUMN {category} TEXT"
                        ))?;
                        added.push(category);
                    }
                }
                Ok(added)
            })
            .await?;
        if !added.is_empty() {
            info!(columns = ?added, "catalog category columns added");
        }

        Ok(Self {
            conn,
            table,
            categories,
        })
    }

    /// Configured category ids.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    fn check_known_category(&self, id: &str) -> ChatResult<()> {
        if self.categories.iter().any(|category| category == id) {
            Ok(())
        } else {
            Err(ChatError::InvalidFilter(format!("unknown category id {id:?}")))
        }
    }

    /// Insert or replace a file record.
    ///
    /// # Errors
    /// Returns `InvalidFilter` for an unconfigured category id, or a storage
    /// error if the write fails.
    pub async fn register_file(&self, record: FileRecord) -> ChatResult<()> {
        for id in record.categories.keys() {
            self.check_known_category(id)?;
        }

        let table = self.table.clone();
        self.conn
            .call(move |conn| {
                let mut columns = vec![
                    "id",
                    "original_file_name",
                    "author",
                    "folder",
                    "created_at",
                    "updated_at",
                ];
                let mut values: Vec<Option<String>> = vec![
                    Some(record.id),
                    Some(record.original_file_name),
                    record.author,
                    record.folder,
                    Some(record.created_at),
                    Some(record.updated_at),
                ];
                for (id, value) in &record.categories {
                    columns.push(id.as_str());
                    values.push(Some(value.clone()));
                }
                let placeholders = (1..=values.len())
                    .map(|index| format!("?{index}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {table} ({}) VALUES ({placeholders})",
                        columns.join(", ")
                    ),
                    rusqlite::params_from_iter(values.iter()),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl DocumentCatalog for SqliteDocumentCatalog {
    fn file_ids(&self, filter: UserFilter) -> IndexFuture<'_, ChatResult<Vec<String>>> {
        Box::pin(async move {
            for category in filter.category_ids.iter().flatten() {
                if !category.categories.is_empty() {
                    self.check_known_category(&category.id)?;
                }
            }
            let predicate = filter.to_predicate()?;
            let table = self.table.clone();
            let ids = self
                .conn
                .call(move |conn| {
                    let sql = format!(
                        "SELECT id FROM {table} WHERE {} ORDER BY rowid",
                        predicate.where_sql
                    );
                    let named: Vec<(&str, &dyn ToSql)> = predicate
                        .params
                        .iter()
                        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
                        .collect();
                    let mut stmt = conn.prepare(&sql)?;
                    let ids = stmt
                        .query_map(named.as_slice(), |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(ids)
                })
                .await?;
            debug!(matched = ids.len(), "catalog filter resolved");
            Ok(ids)
        })
    }
}
