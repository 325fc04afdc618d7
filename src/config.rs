//! Manager and realm configuration
//!
//! Both files are YAML parsed by serde. `ManagerConfig` describes the whole
//! installation (databases, directories, default build); `RealmConfig` lives
//! in each realm directory as `realm.yaml` and describes one realm.
//!
//! Every optional field has a default function so that a freshly seeded
//! `realm.yaml` can be written back with all keys present.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection settings for one MySQL server/database pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSettings {
    pub host: String,

    #[serde(default = "default_sql_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Database name. Empty for server-level settings (`realm_db`).
    #[serde(default)]
    pub database: String,
}

impl DbSettings {
    /// Same server and credentials, different database.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// sqlx connection URL, including the database if one is set.
    pub fn url(&self) -> String {
        let mut url = format!(
            "mysql://{}:{}@{}:{}",
            self.user, self.password, self.host, self.port
        );
        if !self.database.is_empty() {
            url.push('/');
            url.push_str(&self.database);
        }
        url
    }

    /// `host;port;user;password;database` as the world server expects it.
    pub fn connection_string(&self) -> String {
        format!(
            "{};{};{};{};{}",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

/// Installation-wide configuration, normally `conf/realmkeeper.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    // ============================================
    // Databases
    // ============================================
    /// Shared authentication database (accounts, realmlist)
    pub auth_db: DbSettings,

    /// Server hosting the per-realm world and character databases
    pub realm_db: DbSettings,

    // ============================================
    // Directory Paths
    // ============================================
    /// Root of the module tree; realms live in `<module>/realms/<name>/`
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    /// One subdirectory per build variant, each holding `worldserver` and `configs/`
    #[serde(default = "default_builds_dir")]
    pub builds_dir: PathBuf,

    #[serde(default = "default_datasets_dir")]
    pub datasets_dir: PathBuf,

    /// Helper binary path handed to the world server as `MySQLExecutable`
    #[serde(default = "default_mysql_executable")]
    pub mysql_executable: PathBuf,

    // ============================================
    // Startup behaviour
    // ============================================
    #[serde(default = "default_build")]
    pub default_build: String,

    /// Realms targeted when a start/stop command names none. Empty means all.
    #[serde(default)]
    pub default_realms: Vec<String>,

    /// Master switch for starting `auto_start` realms at launch
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

// ============================================
// Default value functions
// These are called by serde when a field is missing
// ============================================

fn default_sql_port() -> u16 {
    3306
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("./modules")
}

fn default_builds_dir() -> PathBuf {
    PathBuf::from("./bin/core")
}

fn default_datasets_dir() -> PathBuf {
    PathBuf::from("./datasets")
}

fn default_mysql_executable() -> PathBuf {
    PathBuf::from("./bin/mysql/bin/mysql")
}

fn default_build() -> String {
    "RelWithDebInfo".to_string()
}

fn default_true() -> bool {
    true
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_subnet_mask() -> String {
    "255.255.255.0".to_string()
}

fn default_world_port() -> u16 {
    8085
}

fn default_realm_type() -> u8 {
    1
}

fn default_timezone() -> u8 {
    1
}

fn default_dataset() -> String {
    "default".to_string()
}

impl ManagerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ManagerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ManagerConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.auth_db.host.is_empty(), "auth_db.host cannot be empty");
        anyhow::ensure!(!self.auth_db.user.is_empty(), "auth_db.user cannot be empty");
        anyhow::ensure!(
            !self.auth_db.database.is_empty(),
            "auth_db.database cannot be empty"
        );
        anyhow::ensure!(!self.realm_db.host.is_empty(), "realm_db.host cannot be empty");
        anyhow::ensure!(!self.realm_db.user.is_empty(), "realm_db.user cannot be empty");
        anyhow::ensure!(!self.default_build.is_empty(), "default_build cannot be empty");
        anyhow::ensure!(
            !self.default_build.contains(['/', '\\']),
            "default_build must be a directory name, got '{}'",
            self.default_build
        );
        Ok(())
    }

    /// Directory of a build variant.
    pub fn build_dir(&self, build: &str) -> PathBuf {
        self.builds_dir.join(build)
    }
}

/// Per-realm configuration stored as `realm.yaml` in the realm directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmConfig {
    /// Name shown in the client realm list. Empty means "use the realm name".
    #[serde(default)]
    pub display_name: String,

    // ============================================
    // Network
    // ============================================
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_address")]
    pub local_address: String,

    #[serde(default = "default_subnet_mask")]
    pub local_subnet_mask: String,

    #[serde(default = "default_world_port")]
    pub port: u16,

    // ============================================
    // Realm list presentation
    // ============================================
    /// Realm icon/type (0 normal, 1 PvP, 6 RP, 8 RP-PvP)
    #[serde(default = "default_realm_type")]
    pub realm_type: u8,

    #[serde(default = "default_timezone")]
    pub timezone: u8,

    /// Minimum account security level allowed to log in
    #[serde(default)]
    pub security_level: u8,

    #[serde(default)]
    pub offline: bool,

    #[serde(default)]
    pub full: bool,

    #[serde(default)]
    pub new_players: bool,

    #[serde(default)]
    pub recommended: bool,

    // ============================================
    // Content & startup
    // ============================================
    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Build variant of the most recent start
    #[serde(default)]
    pub last_build: Option<String>,

    /// Overrides for the generated database names
    #[serde(default)]
    pub world_database: Option<String>,

    #[serde(default)]
    pub character_database: Option<String>,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            address: default_address(),
            local_address: default_address(),
            local_subnet_mask: default_subnet_mask(),
            port: default_world_port(),
            realm_type: default_realm_type(),
            timezone: default_timezone(),
            security_level: 0,
            offline: false,
            full: false,
            new_players: false,
            recommended: false,
            dataset: default_dataset(),
            auto_start: true,
            last_build: None,
            world_database: None,
            character_database: None,
        }
    }
}

impl RealmConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read realm config: {}", path.display()))?;
        Self::from_str(&contents)
            .with_context(|| format!("Invalid realm config: {}", path.display()))
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults config
        let config: RealmConfig = if contents.trim().is_empty() {
            RealmConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.address.is_empty(), "address cannot be empty");
        anyhow::ensure!(self.port != 0, "port cannot be 0");
        anyhow::ensure!(!self.dataset.is_empty(), "dataset cannot be empty");
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self).context("Failed to serialize realm config")?;

        fs::write(path.as_ref(), yaml).with_context(|| {
            format!("Failed to write realm config to {}", path.as_ref().display())
        })?;

        Ok(())
    }
}
