//! Shared services of a running manager, built once at startup and passed
//! explicitly to the lifecycle and command layers.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::account::AccountStore;
use crate::config::ManagerConfig;
use crate::database::{self, MySqlAccountStore};
use crate::dataset::DatasetRegistry;
use crate::instance::InstanceCache;
use crate::realm::id::IdAllocator;
use crate::realm::Fleet;

pub struct Keeper {
    pub config: ManagerConfig,
    pub fleet: Fleet,
    pub ids: IdAllocator,
    pub instances: InstanceCache,
    pub datasets: DatasetRegistry,
    pub accounts: Arc<dyn AccountStore>,
}

impl Keeper {
    pub fn new(
        config: ManagerConfig,
        instances: InstanceCache,
        datasets: DatasetRegistry,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            fleet: Fleet::new(config.modules_dir.clone()),
            ids: IdAllocator::new(),
            config,
            instances,
            datasets,
            accounts,
        }
    }

    /// Production wiring: MySQL for realms and accounts, datasets from disk.
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: ManagerConfig) -> Result<Self> {
        let auth = database::auth_pool(&config.auth_db)
            .with_context(|| format!("Bad auth database settings for {}", config.auth_db.host))?;
        let datasets = DatasetRegistry::load_dir(&config.datasets_dir)?;
        let instances = InstanceCache::mysql(config.realm_db.clone(), auth.clone());
        let accounts = Arc::new(MySqlAccountStore::new(auth));
        Ok(Self::new(config, instances, datasets, accounts))
    }
}
