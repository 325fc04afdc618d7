//! Process-wide registry of realm managers.
//!
//! Every status query, command and lifecycle operation for a realm goes
//! through the one `RealmManager` cached under its fully-qualified name, so
//! they all see the same process handle and database connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::MySqlPool;
use tokio::sync::MutexGuard;

use crate::config::DbSettings;
use crate::database::{MySqlRealmDatabase, RealmDatabase};
use crate::process::WorldProcess;
use crate::realm::Realm;

/// Builds the database handle for a realm on first use.
pub type DatabaseFactory = Arc<dyn Fn(&Realm) -> Arc<dyn RealmDatabase> + Send + Sync>;

pub struct RealmManager {
    fqn: String,
    database: Arc<dyn RealmDatabase>,
    process: WorldProcess,
    lifecycle: tokio::sync::Mutex<()>,
}

impl RealmManager {
    fn new(fqn: String, database: Arc<dyn RealmDatabase>) -> Self {
        Self {
            process: WorldProcess::new(fqn.clone()),
            fqn,
            database,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn fqn(&self) -> &str {
        &self.fqn
    }

    pub fn database(&self) -> &dyn RealmDatabase {
        self.database.as_ref()
    }

    pub fn process(&self) -> &WorldProcess {
        &self.process
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    /// Held for the duration of a start or stop of this realm.
    pub async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }
}

pub struct InstanceCache {
    factory: DatabaseFactory,
    managers: Mutex<HashMap<String, Arc<RealmManager>>>,
}

impl InstanceCache {
    pub fn new(factory: DatabaseFactory) -> Self {
        Self {
            factory,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Cache whose realms live on `server` and publish into `auth`.
    pub fn mysql(server: DbSettings, auth: MySqlPool) -> Self {
        Self::new(Arc::new(move |realm: &Realm| {
            Arc::new(MySqlRealmDatabase::new(
                realm.fqn(),
                server.clone(),
                auth.clone(),
            )) as Arc<dyn RealmDatabase>
        }))
    }

    fn managers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<RealmManager>>> {
        self.managers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The manager for `realm`, created on the first call for its name.
    pub fn manager_for(&self, realm: &Realm) -> Arc<RealmManager> {
        let fqn = realm.fqn();
        let mut managers = self.managers();
        if let Some(manager) = managers.get(&fqn) {
            return Arc::clone(manager);
        }
        let manager = Arc::new(RealmManager::new(fqn.clone(), (self.factory)(realm)));
        managers.insert(fqn, Arc::clone(&manager));
        manager
    }

    /// Existing manager only; never constructs one.
    pub fn get(&self, fqn: &str) -> Option<Arc<RealmManager>> {
        self.managers().get(fqn).cloned()
    }

    pub fn is_running(&self, fqn: &str) -> bool {
        self.get(fqn).map(|m| m.is_running()).unwrap_or(false)
    }

    /// Managers with a live process, sorted by name.
    pub fn running(&self) -> Vec<Arc<RealmManager>> {
        let mut running: Vec<_> = self
            .managers()
            .values()
            .filter(|m| m.is_running())
            .cloned()
            .collect();
        running.sort_by(|a, b| a.fqn.cmp(&b.fqn));
        running
    }

    pub fn len(&self) -> usize {
        self.managers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
