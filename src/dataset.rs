//! Datasets: game content and schema a realm is provisioned from.
//!
//! The lifecycle only talks to the [`Dataset`] trait. `SqlDataset` is the
//! on-disk implementation used by the binary:
//!
//! ```text
//! datasets/<name>/dataset.yaml      game_build: 12340
//! datasets/<name>/sql/auth/*.sql
//! datasets/<name>/sql/world/*.sql
//! datasets/<name>/sql/characters/*.sql
//! datasets/<name>/client/           maps, dbc, vmaps ...
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::MySqlPool;
use tokio::sync::Mutex;

use crate::config::DbSettings;
use crate::error::{RealmError, RealmResult};

pub const DATASET_MANIFEST_FILE: &str = "dataset.yaml";

#[async_trait]
pub trait Dataset: Send + Sync {
    fn name(&self) -> &str;

    /// Client build the content targets, published in the realmlist.
    fn game_build(&self) -> u32;

    async fn connect(&self) -> RealmResult<()>;

    async fn setup_auth(&self, auth: &DbSettings) -> RealmResult<()>;

    async fn setup_world(&self, world: &DbSettings, characters: &DbSettings) -> RealmResult<()>;

    /// Make client data available and return the directory the server reads it from.
    async fn stage_client_data(&self) -> RealmResult<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct DatasetManifest {
    #[serde(default = "default_game_build")]
    game_build: u32,
}

fn default_game_build() -> u32 {
    12340
}

/// Where a schema's files are applied, and the ledger of what already was.
#[async_trait]
trait SchemaTarget: Send + Sync {
    async fn ensure_ledger(&self) -> RealmResult<()>;

    async fn is_applied(&self, file: &str) -> RealmResult<bool>;

    async fn execute(&self, sql: &str) -> RealmResult<()>;

    async fn mark_applied(&self, file: &str) -> RealmResult<()>;
}

#[async_trait]
impl SchemaTarget for MySqlPool {
    async fn ensure_ledger(&self) -> RealmResult<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS `dataset_applied` (
               `file` VARCHAR(255) NOT NULL PRIMARY KEY,
               `applied_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
             )",
        )
        .execute(self)
        .await?;
        Ok(())
    }

    async fn is_applied(&self, file: &str) -> RealmResult<bool> {
        let done: Option<(String,)> =
            sqlx::query_as("SELECT `file` FROM `dataset_applied` WHERE `file` = ?")
                .bind(file)
                .fetch_optional(self)
                .await?;
        Ok(done.is_some())
    }

    async fn execute(&self, sql: &str) -> RealmResult<()> {
        sqlx::raw_sql(sql).execute(self).await?;
        Ok(())
    }

    async fn mark_applied(&self, file: &str) -> RealmResult<()> {
        sqlx::query("INSERT INTO `dataset_applied` (`file`) VALUES (?)")
            .bind(file)
            .execute(self)
            .await?;
        Ok(())
    }
}

/// Directory-backed dataset applying plain `.sql` files.
///
/// One instance is shared by every realm using the dataset. Realms starting
/// together would otherwise race on the shared auth ledger, so applying
/// files is serialized through `provision`.
#[derive(Debug)]
pub struct SqlDataset {
    name: String,
    dir: PathBuf,
    game_build: u32,
    provision: Mutex<()>,
}

impl SqlDataset {
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Bad dataset directory: {}", dir.display()))?
            .to_string();

        let manifest_path = dir.join(DATASET_MANIFEST_FILE);
        let contents = fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
        let manifest: DatasetManifest = if contents.trim().is_empty() {
            DatasetManifest {
                game_build: default_game_build(),
            }
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML in {}", manifest_path.display()))?
        };

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            game_build: manifest.game_build,
            provision: Mutex::new(()),
        })
    }

    fn fail(&self, reason: impl Into<String>) -> RealmError {
        RealmError::Provision {
            dataset: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// `.sql` files of one schema, in the order they are applied.
    fn sql_files(&self, schema: &str) -> RealmResult<Vec<PathBuf>> {
        let dir = self.dir.join("sql").join(schema);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Apply every not-yet-applied file of `schema` to `target`.
    async fn apply(&self, schema: &str, target: &DbSettings) -> RealmResult<()> {
        let files = self.sql_files(schema)?;
        if files.is_empty() {
            return Ok(());
        }

        let pool = crate::database::connect(target, 1).await?;
        let result = self.apply_files(schema, &files, &pool).await;
        pool.close().await;
        result
    }

    async fn apply_files<T>(&self, schema: &str, files: &[PathBuf], target: &T) -> RealmResult<()>
    where
        T: SchemaTarget + ?Sized,
    {
        let _guard = self.provision.lock().await;
        target.ensure_ledger().await?;

        let mut applied = 0;
        for path in files {
            let file = format!(
                "{}/{}/{}",
                self.name,
                schema,
                path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
            );
            if target.is_applied(&file).await? {
                continue;
            }

            let sql = fs::read_to_string(path)?;
            target
                .execute(&sql)
                .await
                .map_err(|e| self.fail(format!("{}: {}", file, e)))?;
            target.mark_applied(&file).await?;
            applied += 1;
        }
        tracing::info!(
            "[dataset] [applied] dataset={} schema={} files={} new={}",
            self.name,
            schema,
            files.len(),
            applied
        );
        Ok(())
    }
}

#[async_trait]
impl Dataset for SqlDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn game_build(&self) -> u32 {
        self.game_build
    }

    async fn connect(&self) -> RealmResult<()> {
        if !self.dir.is_dir() {
            return Err(self.fail(format!("directory {} is gone", self.dir.display())));
        }
        Ok(())
    }

    async fn setup_auth(&self, auth: &DbSettings) -> RealmResult<()> {
        self.apply("auth", auth).await
    }

    async fn setup_world(&self, world: &DbSettings, characters: &DbSettings) -> RealmResult<()> {
        self.apply("world", world).await?;
        self.apply("characters", characters).await
    }

    async fn stage_client_data(&self) -> RealmResult<PathBuf> {
        let client = self.dir.join("client");
        if !client.is_dir() {
            return Err(self.fail(format!("missing client data in {}", client.display())));
        }
        Ok(client)
    }
}

/// Datasets by name, loaded once at startup.
#[derive(Default)]
pub struct DatasetRegistry {
    datasets: HashMap<String, Arc<dyn Dataset>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every subdirectory of `dir` that carries a `dataset.yaml`.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("[dataset] [missing_dir] dir={}", dir.display());
                return Ok(registry);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read datasets dir: {}", dir.display()))
            }
        };
        for entry in entries {
            let path = entry?.path();
            if path.join(DATASET_MANIFEST_FILE).is_file() {
                let dataset = SqlDataset::load(&path)?;
                tracing::info!(
                    "[dataset] [loaded] name={} build={}",
                    dataset.name,
                    dataset.game_build
                );
                registry.insert(Arc::new(dataset));
            }
        }
        Ok(registry)
    }

    pub fn insert(&mut self, dataset: Arc<dyn Dataset>) {
        self.datasets.insert(dataset.name().to_string(), dataset);
    }

    pub fn get(&self, name: &str) -> RealmResult<Arc<dyn Dataset>> {
        self.datasets.get(name).cloned().ok_or_else(|| {
            RealmError::Config(anyhow::anyhow!("Unknown dataset '{}'", name))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.datasets.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// In-memory ledger that yields between steps so concurrent callers interleave.
    #[derive(Default)]
    struct CountingTarget {
        applied: StdMutex<HashSet<String>>,
        executed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SchemaTarget for CountingTarget {
        async fn ensure_ledger(&self) -> RealmResult<()> {
            Ok(())
        }

        async fn is_applied(&self, file: &str) -> RealmResult<bool> {
            let done = self.applied.lock().unwrap().contains(file);
            tokio::task::yield_now().await;
            Ok(done)
        }

        async fn execute(&self, sql: &str) -> RealmResult<()> {
            self.executed.lock().unwrap().push(sql.to_string());
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn mark_applied(&self, file: &str) -> RealmResult<()> {
            if !self.applied.lock().unwrap().insert(file.to_string()) {
                return Err(RealmError::Config(anyhow::anyhow!("duplicate key '{}'", file)));
            }
            Ok(())
        }
    }

    fn make_dataset(root: &Path, name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("sql").join("world")).unwrap();
        fs::write(dir.join(DATASET_MANIFEST_FILE), manifest).unwrap();
        dir
    }

    #[test]
    fn test_load_manifest() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "classic", "game_build: 5875\n");
        let dataset = SqlDataset::load(&dir).unwrap();
        assert_eq!(dataset.name(), "classic");
        assert_eq!(dataset.game_build(), 5875);
    }

    #[test]
    fn test_empty_manifest_uses_default_build() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "default", "");
        assert_eq!(SqlDataset::load(&dir).unwrap().game_build(), 12340);
    }

    #[test]
    fn test_sql_files_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "default", "");
        let world = dir.join("sql").join("world");
        fs::write(world.join("02_data.sql"), "").unwrap();
        fs::write(world.join("01_schema.sql"), "").unwrap();
        fs::write(world.join("README.md"), "").unwrap();

        let dataset = SqlDataset::load(&dir).unwrap();
        let names: Vec<String> = dataset
            .sql_files("world")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["01_schema.sql", "02_data.sql"]);
        assert!(dataset.sql_files("auth").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_apply_runs_each_file_once() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "default", "");
        let auth = dir.join("sql").join("auth");
        fs::create_dir_all(&auth).unwrap();
        fs::write(auth.join("01_account.sql"), "CREATE TABLE account (id INT)").unwrap();
        fs::write(auth.join("02_realmlist.sql"), "CREATE TABLE realmlist (id INT)").unwrap();

        let dataset = SqlDataset::load(&dir).unwrap();
        let files = dataset.sql_files("auth").unwrap();
        let target = CountingTarget::default();

        let (a, b) = tokio::join!(
            dataset.apply_files("auth", &files, &target),
            dataset.apply_files("auth", &files, &target),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(target.executed.lock().unwrap().len(), 2);
        let applied = target.applied.lock().unwrap();
        assert!(applied.contains("default/auth/01_account.sql"));
        assert!(applied.contains("default/auth/02_realmlist.sql"));
    }

    #[tokio::test]
    async fn test_client_data_staging() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "default", "");
        let dataset = SqlDataset::load(&dir).unwrap();

        let err = dataset.stage_client_data().await.unwrap_err();
        assert!(matches!(err, RealmError::Provision { .. }));

        fs::create_dir_all(dir.join("client")).unwrap();
        assert_eq!(dataset.stage_client_data().await.unwrap(), dir.join("client"));
    }

    #[tokio::test]
    async fn test_connect_requires_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = make_dataset(root.path(), "default", "");
        let dataset = SqlDataset::load(&dir).unwrap();
        assert!(dataset.connect().await.is_ok());

        fs::remove_dir_all(&dir).unwrap();
        assert!(dataset.connect().await.is_err());
    }

    #[test]
    fn test_registry_load_dir() {
        let root = tempfile::tempdir().unwrap();
        make_dataset(root.path(), "default", "");
        make_dataset(root.path(), "tbc", "game_build: 8606\n");
        fs::create_dir_all(root.path().join("not_a_dataset")).unwrap();

        let registry = DatasetRegistry::load_dir(root.path()).unwrap();
        assert_eq!(registry.names(), vec!["default", "tbc"]);
        assert_eq!(registry.get("tbc").unwrap().game_build(), 8606);
        assert!(matches!(registry.get("wotlk"), Err(RealmError::Config(_))));
    }

    #[test]
    fn test_registry_missing_dir_is_empty() {
        let registry = DatasetRegistry::load_dir(Path::new("/no/such/datasets")).unwrap();
        assert!(registry.names().is_empty());
    }
}
