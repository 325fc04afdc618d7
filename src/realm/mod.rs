//! Realm identity, on-disk layout and fleet discovery.
//!
//! A realm lives in `<modules_dir>/<group>/realms/<name>/` and is addressed
//! by its fully-qualified name `group.name`.

pub mod id;
pub mod lifecycle;
pub mod realmlist;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::RealmConfig;
use crate::error::{RealmError, RealmResult};

pub const REALM_CONFIG_FILE: &str = "realm.yaml";
pub const SERVER_CONFIG_FILE: &str = "worldserver.conf";
pub const ID_MARKER_FILE: &str = "realm.id";
pub const MODULE_MANIFEST_FILE: &str = "modules.txt";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealmKey {
    pub group: String,
    pub name: String,
}

impl RealmKey {
    pub fn new(group: &str, name: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
        }
    }

    /// Split `group.name`. The realm name may not contain dots, the group may.
    pub fn parse(fqn: &str) -> Option<Self> {
        let (group, name) = fqn.rsplit_once('.')?;
        if group.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(group, name))
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

impl fmt::Display for RealmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Returns true for names usable as a realm directory and database suffix.
pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 32
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A realm and its resolved paths. Cheap to clone; holds no live resources.
#[derive(Debug, Clone)]
pub struct Realm {
    key: RealmKey,
    dir: PathBuf,
    config_path: PathBuf,
    server_config_path: PathBuf,
    id_path: PathBuf,
    manifest_path: PathBuf,
}

impl Realm {
    pub fn new(modules_dir: &Path, key: RealmKey) -> Self {
        let dir = modules_dir.join(&key.group).join("realms").join(&key.name);
        Self {
            config_path: dir.join(REALM_CONFIG_FILE),
            server_config_path: dir.join(SERVER_CONFIG_FILE),
            id_path: dir.join(ID_MARKER_FILE),
            manifest_path: dir.join(MODULE_MANIFEST_FILE),
            key,
            dir,
        }
    }

    pub fn key(&self) -> &RealmKey {
        &self.key
    }

    pub fn group(&self) -> &str {
        &self.key.group
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn fqn(&self) -> String {
        self.key.fqn()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn server_config_path(&self) -> &Path {
        &self.server_config_path
    }

    pub fn id_path(&self) -> &Path {
        &self.id_path
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Load `realm.yaml`. A missing file is a config integrity error.
    pub fn config(&self) -> RealmResult<RealmConfig> {
        if !self.config_path.exists() {
            return Err(RealmError::MissingConfig(self.config_path.clone()));
        }
        Ok(RealmConfig::from_file(&self.config_path)?)
    }

    pub fn save_config(&self, config: &RealmConfig) -> RealmResult<()> {
        config
            .save(&self.config_path)
            .with_context(|| format!("realm {}", self.key))?;
        Ok(())
    }

    /// Name shown to players; falls back to the realm name.
    pub fn display_name(&self, config: &RealmConfig) -> String {
        if config.display_name.is_empty() {
            self.key.name.clone()
        } else {
            config.display_name.clone()
        }
    }

    pub fn world_database(&self, config: &RealmConfig) -> String {
        config
            .world_database
            .clone()
            .unwrap_or_else(|| self.database_name("world"))
    }

    pub fn character_database(&self, config: &RealmConfig) -> String {
        config
            .character_database
            .clone()
            .unwrap_or_else(|| self.database_name("characters"))
    }

    fn database_name(&self, suffix: &str) -> String {
        let sanitize = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect()
        };
        format!(
            "{}_{}_{}",
            sanitize(&self.key.group),
            sanitize(&self.key.name),
            suffix
        )
    }
}

/// Directory-backed view of every module and realm on disk.
///
/// Nothing is cached: each call rescans `modules_dir`, so realms created
/// by this process are visible immediately.
#[derive(Debug, Clone)]
pub struct Fleet {
    modules_dir: PathBuf,
}

impl Fleet {
    pub fn new<P: Into<PathBuf>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.into(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn realm(&self, key: RealmKey) -> Realm {
        Realm::new(&self.modules_dir, key)
    }

    pub fn has_module(&self, group: &str) -> bool {
        !group.is_empty() && self.modules_dir.join(group).is_dir()
    }

    /// Module names, sorted.
    pub fn modules(&self) -> RealmResult<Vec<String>> {
        let mut modules = subdirectories(&self.modules_dir)?;
        modules.sort();
        Ok(modules)
    }

    /// Every realm of every module, sorted by fully-qualified name.
    pub fn realms(&self) -> RealmResult<Vec<Realm>> {
        let mut realms = Vec::new();
        for group in self.modules()? {
            let realms_dir = self.modules_dir.join(&group).join("realms");
            for name in subdirectories(&realms_dir)? {
                realms.push(self.realm(RealmKey::new(&group, &name)));
            }
        }
        realms.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(realms)
    }

    pub fn realms_in(&self, group: &str) -> RealmResult<Vec<Realm>> {
        Ok(self
            .realms()?
            .into_iter()
            .filter(|r| r.group() == group)
            .collect())
    }
}

fn subdirectories(dir: &Path) -> RealmResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
