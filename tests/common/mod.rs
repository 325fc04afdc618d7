//! Fleet on a temp dir with recording fakes for every external service.
//! The world server is a shell script, so these tests only run on unix.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use realmkeeper::account::{AccountStore, NewAccount};
use realmkeeper::config::{DbSettings, ManagerConfig};
use realmkeeper::database::RealmDatabase;
use realmkeeper::dataset::{Dataset, DatasetRegistry};
use realmkeeper::error::{RealmError, RealmResult};
use realmkeeper::instance::InstanceCache;
use realmkeeper::keeper::Keeper;
use realmkeeper::realm::lifecycle;
use realmkeeper::realm::realmlist::RealmlistRecord;
use realmkeeper::realm::{Realm, RealmKey};
use tempfile::TempDir;

pub const BUILD: &str = "RelWithDebInfo";

/// Logs its arguments and every stdin line into the working directory,
/// and exits on a shutdown command like the real server.
const FAKE_WORLDSERVER: &str = r#"#!/bin/sh
echo "$@" > args.log
while read line; do
  echo "$line" >> commands.log
  case "$line" in
    "server shutdown"*) exit 0 ;;
  esac
done
"#;

/// Never reads its console, so only a kill gets rid of it.
const STUBBORN_WORLDSERVER: &str = r#"#!/bin/sh
echo "$@" > args.log
exec sleep 600
"#;

const SERVER_TEMPLATE: &str = "\
# World server configuration
RealmID = 1
WorldServerPort = 8085
LoginDatabaseInfo = \"127.0.0.1;3306;trinity;trinity;auth\"
WorldDatabaseInfo = \"127.0.0.1;3306;trinity;trinity;world\"
CharacterDatabaseInfo = \"127.0.0.1;3306;trinity;trinity;characters\"
DataDir = \".\"
Updates.EnableDatabases = 7
";

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn record(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

pub struct FakeDatabase {
    fqn: String,
    events: Events,
}

#[async_trait]
impl RealmDatabase for FakeDatabase {
    async fn connect(&self, world: &DbSettings, characters: &DbSettings) -> RealmResult<()> {
        record(
            &self.events,
            format!("connect {} {} {}", self.fqn, world.database, characters.database),
        );
        Ok(())
    }

    async fn publish_realmlist(&self, row: &RealmlistRecord) -> RealmResult<()> {
        record(
            &self.events,
            format!("publish {} id={} name={}", self.fqn, row.id, row.name),
        );
        Ok(())
    }
}

pub struct FakeDataset {
    name: String,
    data_dir: PathBuf,
    fail_at: Option<&'static str>,
    events: Events,
}

impl FakeDataset {
    fn step(&self, step: &'static str) -> RealmResult<()> {
        record(&self.events, format!("dataset {}", step));
        if self.fail_at == Some(step) {
            return Err(RealmError::Provision {
                dataset: self.name.clone(),
                reason: format!("{} exploded", step),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Dataset for FakeDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn game_build(&self) -> u32 {
        12340
    }

    async fn connect(&self) -> RealmResult<()> {
        self.step("connect")
    }

    async fn setup_auth(&self, _auth: &DbSettings) -> RealmResult<()> {
        self.step("setup_auth")
    }

    async fn setup_world(&self, _world: &DbSettings, _characters: &DbSettings) -> RealmResult<()> {
        self.step("setup_world")
    }

    async fn stage_client_data(&self) -> RealmResult<PathBuf> {
        self.step("stage")?;
        Ok(self.data_dir.clone())
    }
}

#[derive(Default)]
pub struct FakeAccounts {
    pub accounts: Mutex<HashMap<String, (u32, NewAccount)>>,
    pub access: Mutex<Vec<(u32, u8)>>,
}

#[async_trait]
impl AccountStore for FakeAccounts {
    async fn account_exists(&self, username: &str) -> RealmResult<bool> {
        Ok(self.accounts.lock().unwrap().contains_key(username))
    }

    async fn insert_account(&self, account: &NewAccount) -> RealmResult<()> {
        let mut accounts = self.accounts.lock().unwrap();
        let id = accounts.len() as u32 + 1;
        accounts.insert(account.username.clone(), (id, account.clone()));
        Ok(())
    }

    async fn account_id(&self, username: &str) -> RealmResult<Option<u32>> {
        Ok(self.accounts.lock().unwrap().get(username).map(|(id, _)| *id))
    }

    async fn grant_access(&self, account_id: u32, gm_level: u8) -> RealmResult<()> {
        self.access.lock().unwrap().push((account_id, gm_level));
        Ok(())
    }
}

pub struct Harness {
    pub root: TempDir,
    pub keeper: Arc<Keeper>,
    pub events: Events,
    pub accounts: Arc<FakeAccounts>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None, &[])
    }

    /// Harness whose dataset fails at `step` (connect, setup_auth, setup_world, stage).
    pub fn failing_at(step: &'static str) -> Self {
        Self::build(Some(step), &[])
    }

    pub fn with_default_realms(realms: &[&str]) -> Self {
        Self::build(None, realms)
    }

    fn build(fail_at: Option<&'static str>, default_realms: &[&str]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let build_dir = base.join("builds").join(BUILD);
        let configs = build_dir.join("configs");
        fs::create_dir_all(&configs).unwrap();
        fs::write(configs.join("worldserver.conf.dist"), SERVER_TEMPLATE).unwrap();
        fs::write(configs.join("authserver.conf.dist"), "BindIP = \"0.0.0.0\"\n").unwrap();
        fs::write(configs.join("eluna.conf.dist"), "Eluna.Enabled = 1\n").unwrap();

        let server = lifecycle::worldserver_binary(&build_dir);
        fs::write(&server, FAKE_WORLDSERVER).unwrap();
        fs::set_permissions(&server, fs::Permissions::from_mode(0o755)).unwrap();

        fs::create_dir_all(base.join("modules")).unwrap();
        let data_dir = base.join("data");
        fs::create_dir_all(&data_dir).unwrap();

        let yaml = format!(
            "auth_db: {{ host: 127.0.0.1, user: trinity, password: trinity, database: auth }}\n\
             realm_db: {{ host: 127.0.0.1, user: trinity, password: trinity }}\n\
             modules_dir: {}\n\
             builds_dir: {}\n\
             datasets_dir: {}\n",
            base.join("modules").display(),
            base.join("builds").display(),
            base.join("datasets").display(),
        );
        let mut config = ManagerConfig::from_str(&yaml).unwrap();
        config.default_realms = default_realms.iter().map(|s| s.to_string()).collect();

        let events: Events = Arc::default();
        let db_events = Arc::clone(&events);
        let instances = InstanceCache::new(Arc::new(move |realm: &Realm| {
            Arc::new(FakeDatabase {
                fqn: realm.fqn(),
                events: Arc::clone(&db_events),
            }) as Arc<dyn RealmDatabase>
        }));

        let mut datasets = DatasetRegistry::new();
        datasets.insert(Arc::new(FakeDataset {
            name: "default".to_string(),
            data_dir,
            fail_at,
            events: Arc::clone(&events),
        }));

        let accounts = Arc::new(FakeAccounts::default());
        let keeper = Keeper::new(
            config,
            instances,
            datasets,
            Arc::clone(&accounts) as Arc<dyn AccountStore>,
        );

        Self {
            root,
            keeper: Arc::new(keeper),
            events,
            accounts,
        }
    }

    /// Swap in a world server that ignores shutdown commands.
    pub fn stubborn_worldserver(&self) {
        let build_dir = self.root.path().join("builds").join(BUILD);
        let server = lifecycle::worldserver_binary(&build_dir);
        fs::write(&server, STUBBORN_WORLDSERVER).unwrap();
        fs::set_permissions(&server, fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub fn add_module(&self, group: &str) {
        fs::create_dir_all(self.keeper.config.modules_dir.join(group)).unwrap();
    }

    /// Create a realm, adding its module first if needed.
    pub fn add_realm(&self, fqn: &str) -> Realm {
        let key = RealmKey::parse(fqn).unwrap();
        self.add_module(&key.group);
        lifecycle::create(&self.keeper, &key.group, &key.name, None).unwrap()
    }

    pub fn realm(&self, fqn: &str) -> Realm {
        self.keeper.fleet.realm(RealmKey::parse(fqn).unwrap())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    pub async fn shutdown(&self) {
        lifecycle::stop_all(&self.keeper, false).await;
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
