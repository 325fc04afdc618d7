//! Realm lifecycle: create, initialize, connect, provision, patch, launch, stop.
//!
//! `start` runs its stages strictly in order and spawns the world server
//! only after every earlier stage succeeded. Completed stages are not rolled
//! back on failure; each one is safe to repeat on the next attempt.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use super::realmlist::RealmlistRecord;
use super::{is_valid_name, Realm, RealmKey};
use crate::conf_file::ConfFile;
use crate::config::{DbSettings, RealmConfig};
use crate::dataset::Dataset;
use crate::error::{RealmError, RealmResult};
use crate::instance::RealmManager;
use crate::keeper::Keeper;

pub const SERVER_TEMPLATE: &str = "worldserver.conf.dist";
const TEMPLATE_SUFFIX: &str = ".conf.dist";
/// Templates of the authentication server are not a realm's business
const FOREIGN_TEMPLATE_PREFIX: &str = "authserver";

/// Switches forced on every start: the manager owns schema updates, and
/// scripts are reloaded live.
const FIXED_TOGGLES: &[(&str, bool)] = &[
    ("Updates.EnableDatabases", false),
    ("Updates.AutoSetup", false),
    ("Updates.Redundancy", false),
    ("HotReload.Enable", true),
];

pub fn worldserver_binary(build_dir: &Path) -> PathBuf {
    build_dir.join(format!("worldserver{}", std::env::consts::EXE_SUFFIX))
}

/// Database settings of a realm's world and character databases.
pub fn realm_databases(keeper: &Keeper, realm: &Realm, config: &RealmConfig) -> (DbSettings, DbSettings) {
    let server = &keeper.config.realm_db;
    (
        server.with_database(&realm.world_database(config)),
        server.with_database(&realm.character_database(config)),
    )
}

pub fn check_build(keeper: &Keeper, build: &str) -> RealmResult<PathBuf> {
    if !is_valid_name(build) {
        return Err(RealmError::invalid(build, "not a build variant name"));
    }
    let dir = keeper.config.build_dir(build);
    if !dir.is_dir() {
        return Err(RealmError::invalid(
            build,
            format!("no build variant at {}", dir.display()),
        ));
    }
    Ok(dir)
}

/// Copy `template` to `dest` unless `dest` already exists.
fn seed_file(template: &Path, dest: &Path) -> RealmResult<bool> {
    if dest.exists() {
        return Ok(false);
    }
    if !template.is_file() {
        return Err(RealmError::MissingConfig(template.to_path_buf()));
    }
    fs::copy(template, dest)?;
    Ok(true)
}

/// Make sure the realm's server config and `realm.yaml` exist, and that
/// `realm.yaml` spells out every defaulted key. Never overwrites a server
/// config that is already there.
pub fn initialize(keeper: &Keeper, realm: &Realm, build: &str) -> RealmResult<RealmConfig> {
    fs::create_dir_all(realm.dir())?;

    let template = keeper
        .config
        .build_dir(build)
        .join("configs")
        .join(SERVER_TEMPLATE);
    if seed_file(&template, realm.server_config_path())? {
        tracing::info!("[realm] [seeded] realm={} file={}", realm.fqn(), SERVER_TEMPLATE);
    }

    let config = if realm.config_path().exists() {
        realm.config()?
    } else {
        RealmConfig::default()
    };
    realm.save_config(&config)?;
    Ok(config)
}

/// Create a new realm directory under an existing module.
pub fn create(
    keeper: &Keeper,
    group: &str,
    name: &str,
    display_name: Option<&str>,
) -> RealmResult<Realm> {
    if !is_valid_name(name) {
        return Err(RealmError::invalid(
            name,
            "realm names use letters, digits, '_' and '-'",
        ));
    }
    if !keeper.fleet.has_module(group) {
        return Err(RealmError::UnknownModule(group.to_string()));
    }
    let realm = keeper.fleet.realm(RealmKey::new(group, name));
    if realm.exists() {
        return Err(RealmError::DuplicateRealm(realm.fqn()));
    }

    let seeded = initialize(keeper, &realm, &keeper.config.default_build).and_then(|mut config| {
        config.display_name = display_name.unwrap_or(name).to_string();
        realm.save_config(&config)
    });
    if let Err(e) = seeded {
        // Leaving it would block a retry
        if let Err(cleanup) = fs::remove_dir_all(realm.dir()) {
            tracing::warn!(
                "[realm] [cleanup_failed] realm={} dir={} err={}",
                realm.fqn(),
                realm.dir().display(),
                cleanup
            );
        }
        return Err(e);
    }

    tracing::info!("[realm] [created] realm={}", realm.fqn());
    Ok(realm)
}

/// Open the realm's databases, then the dataset's own connection.
pub async fn connect(
    manager: &RealmManager,
    dataset: &dyn Dataset,
    world: &DbSettings,
    characters: &DbSettings,
) -> RealmResult<()> {
    manager.database().connect(world, characters).await?;
    dataset.connect().await
}

/// One line per module, read by the world server's script loader.
fn write_module_manifest(keeper: &Keeper, realm: &Realm) -> RealmResult<()> {
    let mut manifest = keeper.fleet.modules()?.join("\n");
    manifest.push('\n');
    fs::write(realm.manifest_path(), manifest)?;
    Ok(())
}

/// Derive `<name>.conf` files from the build's `<name>.conf.dist` templates.
fn copy_config_templates(build_dir: &Path, realm: &Realm) -> RealmResult<()> {
    let configs = build_dir.join("configs");
    let entries = match fs::read_dir(&configs) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RealmError::MissingConfig(configs))
        }
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(".dist") else {
            continue;
        };
        if !file_name.ends_with(TEMPLATE_SUFFIX) || file_name.starts_with(FOREIGN_TEMPLATE_PREFIX) {
            continue;
        }
        seed_file(&entry.path(), &realm.dir().join(stem))?;
    }
    Ok(())
}

fn patch_server_config(
    keeper: &Keeper,
    realm: &Realm,
    config: &RealmConfig,
    id: u32,
    databases: (&DbSettings, &DbSettings),
    data_dir: &Path,
) -> RealmResult<()> {
    let (world, characters) = databases;
    let mut conf = ConfFile::load(realm.server_config_path())?;

    conf.set("LoginDatabaseInfo", keeper.config.auth_db.connection_string());
    conf.set("WorldDatabaseInfo", world.connection_string());
    conf.set("CharacterDatabaseInfo", characters.connection_string());
    conf.set("WorldServerPort", config.port);
    conf.set("RealmID", id);
    conf.set("DataDir", data_dir);
    conf.set("MySQLExecutable", keeper.config.mysql_executable.as_path());
    for &(key, value) in FIXED_TOGGLES {
        conf.set(key, value);
    }

    conf.save()
}

/// The realmlist row this realm publishes. Allocates the id if needed.
pub async fn realmlist_record(keeper: &Keeper, realm: &Realm) -> RealmResult<RealmlistRecord> {
    let config = realm.config()?;
    let dataset = keeper.datasets.get(&config.dataset)?;
    let id = keeper.ids.get_id(&keeper.fleet, realm).await?;
    Ok(RealmlistRecord::new(
        id,
        realm.display_name(&config),
        &config,
        dataset.game_build(),
    ))
}

/// Bring a realm from whatever state it is in to running on `build`.
/// Returns the pid of the new world server.
pub async fn start(keeper: &Keeper, realm: &Realm, build: &str) -> RealmResult<u32> {
    let build_dir = check_build(keeper, build)?;
    if !realm.exists() {
        return Err(RealmError::UnknownRealm(realm.fqn()));
    }

    let manager = keeper.instances.manager_for(realm);
    let _guard = manager.lock_lifecycle().await;
    if manager.is_running() {
        return Err(RealmError::AlreadyRunning(realm.fqn()));
    }
    tracing::info!("[realm] [starting] realm={} build={}", realm.fqn(), build);

    let mut config = initialize(keeper, realm, build)?;
    config.last_build = Some(build.to_string());
    realm.save_config(&config)?;

    let dataset = keeper.datasets.get(&config.dataset)?;
    let (world, characters) = realm_databases(keeper, realm, &config);

    connect(&manager, dataset.as_ref(), &world, &characters).await?;

    dataset.setup_auth(&keeper.config.auth_db).await?;
    dataset.setup_world(&world, &characters).await?;
    let data_dir = dataset.stage_client_data().await?;
    write_module_manifest(keeper, realm)?;
    tracing::info!("[realm] [provisioned] realm={} dataset={}", realm.fqn(), dataset.name());

    copy_config_templates(&build_dir, realm)?;
    let id = keeper.ids.get_id(&keeper.fleet, realm).await?;
    patch_server_config(keeper, realm, &config, id, (&world, &characters), &data_dir)?;

    let record = realmlist_record(keeper, realm).await?;
    manager.database().publish_realmlist(&record).await?;

    let server_config = realm.server_config_path().as_os_str().to_owned();
    let pid = manager
        .process()
        .spawn(
            &worldserver_binary(&build_dir),
            [std::ffi::OsString::from("-c"), server_config],
            realm.dir(),
        )
        .await?;
    tracing::info!("[realm] [started] realm={} id={} pid={}", realm.fqn(), id, pid);
    Ok(pid)
}

/// Stop a realm. Not running is not an error; returns whether a process was stopped.
///
/// A forced stop does not take the lifecycle lock, so it still gets through
/// while a graceful stop holds it waiting on a server that never exits.
pub async fn stop(keeper: &Keeper, realm: &Realm, force: bool, delay_secs: u32) -> RealmResult<bool> {
    let Some(manager) = keeper.instances.get(&realm.fqn()) else {
        return Ok(false);
    };
    if !manager.is_running() {
        return Ok(false);
    }
    if force {
        return Ok(manager.process().stop(true, delay_secs).await);
    }
    let _guard = manager.lock_lifecycle().await;
    Ok(manager.process().stop(false, delay_secs).await)
}

/// Forward one line to a realm's console. Silently dropped if it is not running.
pub async fn send_command(keeper: &Keeper, realm: &Realm, text: &str) -> bool {
    match keeper.instances.get(&realm.fqn()) {
        Some(manager) => manager.process().send(text).await,
        None => false,
    }
}

/// Per-realm outcome of a batch operation, sorted by realm name.
pub type BatchResult<T> = Vec<(String, RealmResult<T>)>;

async fn collect<T: 'static>(mut tasks: JoinSet<(String, RealmResult<T>)>) -> BatchResult<T> {
    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("[realm] [task_failed] err={}", e),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Start several realms concurrently. One realm failing does not affect the others.
pub async fn start_many(keeper: &Arc<Keeper>, realms: Vec<Realm>, build: &str) -> RealmResult<BatchResult<u32>> {
    if realms.is_empty() {
        return Err(RealmError::NoTargets);
    }
    let mut tasks = JoinSet::new();
    for realm in realms {
        let keeper = Arc::clone(keeper);
        let build = build.to_string();
        tasks.spawn(async move {
            let result = start(&keeper, &realm, &build).await;
            if let Err(e) = &result {
                tracing::error!("[realm] [start_failed] realm={} err={}", realm.fqn(), e);
            }
            (realm.fqn(), result)
        });
    }
    Ok(collect(tasks).await)
}

/// Stop several realms concurrently.
///
/// Fails without signalling anything unless at least one target is running.
pub async fn stop_many(
    keeper: &Arc<Keeper>,
    realms: Vec<Realm>,
    force: bool,
    delay_secs: u32,
) -> RealmResult<BatchResult<bool>> {
    if realms.is_empty() {
        return Err(RealmError::NoTargets);
    }
    if !realms.iter().any(|r| keeper.instances.is_running(&r.fqn())) {
        return Err(RealmError::NoneRunning);
    }
    let mut tasks = JoinSet::new();
    for realm in realms {
        let keeper = Arc::clone(keeper);
        tasks.spawn(async move {
            let result = stop(&keeper, &realm, force, delay_secs).await;
            (realm.fqn(), result)
        });
    }
    Ok(collect(tasks).await)
}

/// Stop everything still running, e.g. on manager shutdown.
pub async fn stop_all(keeper: &Arc<Keeper>, force: bool) -> BatchResult<bool> {
    let running: Vec<Realm> = keeper
        .instances
        .running()
        .iter()
        .filter_map(|m| RealmKey::parse(m.fqn()))
        .map(|key| keeper.fleet.realm(key))
        .collect();
    if running.is_empty() {
        return Vec::new();
    }
    stop_many(keeper, running, force, 0).await.unwrap_or_default()
}

/// Whether the realm has a live process, without creating a manager for it.
pub fn is_running(keeper: &Keeper, realm: &Realm) -> bool {
    keeper.instances.is_running(&realm.fqn())
}
