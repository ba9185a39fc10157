//! Cache-aware artifact store.
//!
//! [`ArtifactStore`] owns the `DuckDB` connection and the cache directory
//! and is handed explicitly to every pipeline stage. An artifact is valid
//! iff something exists under its name; there is no staleness detection
//! beyond the parameter hash in the name.
//!
//! The existence check and the construction are separate steps, so two
//! processes sharing one data directory can race. Runs are expected to be
//! serialized by the caller.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use duckdb::Connection;
use taxi_map_pipeline_models::CachePolicy;

use crate::StoreError;
use crate::key::ArtifactKey;
use crate::paths::ensure_dir;
use crate::sql::{identifier, path_literal, string_literal};

/// Whether an `ensure_*` call reused an artifact or constructed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ArtifactOutcome {
    Reused,
    Built,
}

/// Storage class of a listed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A table in the artifact database.
    Table {
        /// Row count at listing time.
        rows: u64,
    },
    /// A file in the cache directory.
    File {
        /// Size on disk.
        bytes: u64,
    },
}

/// One entry of [`ArtifactStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub name: String,
    pub kind: ArtifactKind,
}

/// Handle to the artifact database and cache directory.
pub struct ArtifactStore {
    conn: Connection,
    cache_dir: PathBuf,
    policy: CachePolicy,
    /// Artifacts already ensured by this handle. Under
    /// [`CachePolicy::Rebuild`] only the first touch drops an artifact.
    touched: BTreeSet<String>,
}

impl ArtifactStore {
    /// Opens (or creates) the artifact database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a directory cannot be created or the
    /// database cannot be opened.
    pub fn open(db_path: &Path, cache_dir: &Path, policy: CachePolicy) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            ensure_dir(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(db_path)?;
        log::debug!("Opened artifact database {}", db_path.display());

        Self::with_connection(conn, cache_dir, policy)
    }

    /// Opens a throwaway in-memory database. Cached files still go to
    /// `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache directory cannot be created.
    pub fn open_in_memory(cache_dir: &Path, policy: CachePolicy) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, cache_dir, policy)
    }

    /// Wraps an existing connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache directory cannot be created.
    pub fn with_connection(
        conn: Connection,
        cache_dir: &Path,
        policy: CachePolicy,
    ) -> Result<Self, StoreError> {
        ensure_dir(cache_dir).map_err(|e| StoreError::io(cache_dir, e))?;

        Ok(Self {
            conn,
            cache_dir: cache_dir.to_path_buf(),
            policy,
            touched: BTreeSet::new(),
        })
    }

    /// Applies `DuckDB` thread and memory limits.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a setting is rejected.
    pub fn set_resource_limits(
        &self,
        threads: Option<u32>,
        memory_limit: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(threads) = threads {
            self.conn.execute_batch(&format!("SET threads = {threads};"))?;
        }
        if let Some(limit) = memory_limit {
            self.conn
                .execute_batch(&format!("SET memory_limit = {};", string_literal(limit)))?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns `true` if a table named `name` exists in the main schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the catalog query fails.
    pub fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'main' AND table_name = ?",
            duckdb::params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Number of rows in a table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the table does not exist.
    pub fn row_count(&self, name: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", identifier(name)),
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// Path a file artifact with this key and extension lives at.
    #[must_use]
    pub fn file_path(&self, key: &ArtifactKey, extension: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.{extension}"))
    }

    /// Returns the table `key`, running `build` only if it does not exist.
    ///
    /// `build` receives the connection and the table name it must create.
    /// It runs inside a transaction: if it fails, nothing it created
    /// survives.
    ///
    /// # Errors
    ///
    /// Returns the error from `build`, or a [`StoreError`] (converted into
    /// `E`) if the catalog check or transaction control fails, or if
    /// `build` succeeded without creating the table.
    pub fn ensure_table<E, F>(&mut self, key: &ArtifactKey, build: F) -> Result<ArtifactOutcome, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Connection, &str) -> Result<(), E>,
    {
        let name = key.as_str();

        if self.first_touch(name) && self.policy == CachePolicy::Rebuild && self.drop_table(name)? {
            log::info!("Dropped table '{name}' for rebuild");
        }

        if self.table_exists(name)? {
            log::info!("Table '{name}' already exists, reusing");
            return Ok(ArtifactOutcome::Reused);
        }

        log::info!("Creating table '{name}'...");
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(StoreError::from)?;

        if let Err(e) = build(&self.conn, name) {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback after failed build of '{name}' failed: {rollback}");
            }
            return Err(e);
        }

        self.conn.execute_batch("COMMIT").map_err(StoreError::from)?;

        if !self.table_exists(name)? {
            return Err(StoreError::NotCreated {
                name: name.to_string(),
            }
            .into());
        }

        Ok(ArtifactOutcome::Built)
    }

    /// Returns the cached file `key.extension`, running `build` only if it
    /// does not exist.
    ///
    /// `build` receives a temporary path to write; it is renamed into place
    /// once `build` succeeds, so a failed build never leaves a file that
    /// later runs would mistake for a valid artifact.
    ///
    /// # Errors
    ///
    /// Returns the error from `build`, or a [`StoreError`] (converted into
    /// `E`) if the filesystem operations fail or `build` wrote nothing.
    pub fn ensure_file<E, F>(
        &mut self,
        key: &ArtifactKey,
        extension: &str,
        build: F,
    ) -> Result<(PathBuf, ArtifactOutcome), E>
    where
        E: From<StoreError>,
        F: FnOnce(&Connection, &Path) -> Result<(), E>,
    {
        let path = self.file_path(key, extension);
        let touch_name = format!("file:{key}.{extension}");

        if self.first_touch(&touch_name) && self.policy == CachePolicy::Rebuild && path.exists() {
            std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            log::info!("Removed {} for rebuild", path.display());
        }

        if path.exists() {
            log::info!("Loading {} from local file...", path.display());
            return Ok((path, ArtifactOutcome::Reused));
        }

        let tmp = self.cache_dir.join(format!("{key}.{extension}.tmp"));
        if tmp.exists() {
            std::fs::remove_file(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        }

        log::info!("Writing {}...", path.display());
        if let Err(e) = build(&self.conn, &tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        if !tmp.exists() {
            return Err(StoreError::NotCreated {
                name: path.display().to_string(),
            }
            .into());
        }

        std::fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;

        Ok((path, ArtifactOutcome::Built))
    }

    /// Drops a table. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the drop fails.
    pub fn drop_table(&self, name: &str) -> Result<bool, StoreError> {
        if !self.table_exists(name)? {
            return Ok(false);
        }
        self.conn
            .execute_batch(&format!("DROP TABLE {};", identifier(name)))?;
        Ok(true)
    }

    /// Writes a table to a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the `COPY` fails.
    pub fn export_parquet(conn: &Connection, table: &str, path: &Path) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "COPY {} TO {} (FORMAT parquet);",
            identifier(table),
            path_literal(path)
        ))?;
        Ok(())
    }

    /// Lists every table and cached file, tables first, each group sorted
    /// by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the catalog query or directory listing
    /// fails.
    pub fn list(&self) -> Result<Vec<ArtifactInfo>, StoreError> {
        let mut artifacts = Vec::new();

        for name in self.table_names()? {
            let rows = self.row_count(&name)?;
            artifacts.push(ArtifactInfo {
                name,
                kind: ArtifactKind::Table { rows },
            });
        }

        let mut files = Vec::new();
        let entries =
            std::fs::read_dir(&self.cache_dir).map_err(|e| StoreError::io(&self.cache_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.cache_dir, e))?;
            let meta = entry
                .metadata()
                .map_err(|e| StoreError::io(&entry.path(), e))?;
            if meta.is_file() {
                files.push(ArtifactInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    kind: ArtifactKind::File { bytes: meta.len() },
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        artifacts.extend(files);

        Ok(artifacts)
    }

    /// Drops every table and deletes every cached file. Returns how many
    /// artifacts were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a drop or delete fails.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;

        for artifact in self.list()? {
            match artifact.kind {
                ArtifactKind::Table { .. } => {
                    self.drop_table(&artifact.name)?;
                }
                ArtifactKind::File { .. } => {
                    let path = self.cache_dir.join(&artifact.name);
                    std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
                }
            }
            log::info!("Removed {}", artifact.name);
            removed += 1;
        }

        Ok(removed)
    }

    fn table_names(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = 'main' AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )?;
        let mut rows = stmt.query([])?;

        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn first_touch(&mut self, name: &str) -> bool {
        self.touched.insert(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "taxi_map_store_{}_{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn create_numbers(conn: &Connection, name: &str) -> Result<(), StoreError> {
        conn.execute_batch(&format!(
            "CREATE TABLE {name} AS SELECT * FROM range(5) t(n);"
        ))?;
        Ok(())
    }

    #[test]
    fn builds_once_then_reuses() {
        let dir = temp_dir("reuse");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        let key = ArtifactKey::new("numbers").unwrap();
        let builds = Cell::new(0);

        for _ in 0..3 {
            store
                .ensure_table::<StoreError, _>(&key, |conn, name| {
                    builds.set(builds.get() + 1);
                    create_numbers(conn, name)
                })
                .unwrap();
        }

        assert_eq!(builds.get(), 1);
        assert_eq!(store.row_count("numbers").unwrap(), 5);
    }

    #[test]
    fn failed_build_leaves_no_table() {
        let dir = temp_dir("rollback");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        let key = ArtifactKey::new("partial").unwrap();

        let result = store.ensure_table::<StoreError, _>(&key, |conn, name| {
            create_numbers(conn, name)?;
            conn.execute_batch("SELECT * FROM no_such_table;")?;
            Ok(())
        });

        assert!(result.is_err());
        assert!(!store.table_exists("partial").unwrap());
    }

    #[test]
    fn build_that_creates_nothing_is_an_error() {
        let dir = temp_dir("not_created");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        let key = ArtifactKey::new("ghost").unwrap();

        let result = store.ensure_table::<StoreError, _>(&key, |_, _| Ok(()));

        assert!(matches!(result, Err(StoreError::NotCreated { .. })));
    }

    #[test]
    fn rebuild_policy_rebuilds_once_per_handle() {
        let dir = temp_dir("rebuild");
        let conn = Connection::open_in_memory().unwrap();
        create_numbers(&conn, "numbers").unwrap();
        let mut store = ArtifactStore::with_connection(conn, &dir, CachePolicy::Rebuild).unwrap();
        let key = ArtifactKey::new("numbers").unwrap();
        let builds = Cell::new(0);

        let first = store
            .ensure_table::<StoreError, _>(&key, |conn, name| {
                builds.set(builds.get() + 1);
                create_numbers(conn, name)
            })
            .unwrap();
        let second = store
            .ensure_table::<StoreError, _>(&key, |conn, name| {
                builds.set(builds.get() + 1);
                create_numbers(conn, name)
            })
            .unwrap();

        assert_eq!(first, ArtifactOutcome::Built);
        assert_eq!(second, ArtifactOutcome::Reused);
        assert_eq!(builds.get(), 1);
    }

    #[test]
    fn file_artifact_is_written_atomically_and_reused() {
        let dir = temp_dir("files");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        let key = ArtifactKey::new("numbers").unwrap();

        let (path, outcome) = store
            .ensure_file::<StoreError, _>(&key, "parquet", |conn, tmp| {
                conn.execute_batch(&format!(
                    "COPY (SELECT * FROM range(3) t(n)) TO {} (FORMAT parquet);",
                    path_literal(tmp)
                ))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(outcome, ArtifactOutcome::Built);
        assert_eq!(path, dir.join("numbers.parquet"));
        assert!(path.exists());
        assert!(!dir.join("numbers.parquet.tmp").exists());

        let (_, outcome) = store
            .ensure_file::<StoreError, _>(&key, "parquet", |_, _| {
                panic!("cached file must not be rebuilt")
            })
            .unwrap();
        assert_eq!(outcome, ArtifactOutcome::Reused);
    }

    #[test]
    fn failed_file_build_leaves_nothing() {
        let dir = temp_dir("file_fail");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        let key = ArtifactKey::new("broken").unwrap();

        let result = store.ensure_file::<StoreError, _>(&key, "parquet", |_, tmp| {
            std::fs::write(tmp, b"partial").map_err(|e| StoreError::io(tmp, e))?;
            Err(StoreError::NotCreated {
                name: "broken".to_string(),
            })
        });

        assert!(result.is_err());
        assert!(!dir.join("broken.parquet").exists());
        assert!(!dir.join("broken.parquet.tmp").exists());
    }

    #[test]
    fn lists_and_clears_tables_and_files() {
        let dir = temp_dir("list");
        let mut store = ArtifactStore::open_in_memory(&dir, CachePolicy::Reuse).unwrap();
        store
            .ensure_table::<StoreError, _>(&ArtifactKey::new("numbers").unwrap(), create_numbers)
            .unwrap();
        std::fs::write(dir.join("buildings_abc.parquet"), b"1234").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(
            listed,
            vec![
                ArtifactInfo {
                    name: "numbers".to_string(),
                    kind: ArtifactKind::Table { rows: 5 },
                },
                ArtifactInfo {
                    name: "buildings_abc.parquet".to_string(),
                    kind: ArtifactKind::File { bytes: 4 },
                },
            ]
        );

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }
}
