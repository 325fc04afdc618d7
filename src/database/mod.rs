//! MySQL access for realms and accounts.
//!
//! Pools are plain values handed to whoever needs them; nothing here is a
//! process-global.

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::config::DbSettings;
use crate::error::{RealmError, RealmResult};

pub mod accounts;
pub mod realms;

pub use accounts::MySqlAccountStore;
pub use realms::{MySqlRealmDatabase, RealmDatabase};

/// Shared auth database pool. Connections are opened on first use, so a
/// down database does not prevent the manager from starting.
pub fn auth_pool(settings: &DbSettings) -> RealmResult<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(5)
        .connect_lazy(&settings.url())?;
    Ok(pool)
}

/// Open a pool and verify the server answers.
pub async fn connect(settings: &DbSettings, max_connections: u32) -> RealmResult<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .connect(&settings.url())
        .await?;
    tracing::info!(
        "[db] [connected] host={}:{} db={}",
        settings.host,
        settings.port,
        settings.database
    );
    Ok(pool)
}

/// Database names are spliced into DDL, so only plain identifiers pass.
pub fn check_identifier(name: &str) -> RealmResult<()> {
    if !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(RealmError::Config(anyhow::anyhow!(
            "'{}' is not a valid database name",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("core_main_world").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("x`; DROP DATABASE auth; --").is_err());
        assert!(check_identifier("has-dash").is_err());
    }

    #[tokio::test]
    async fn test_auth_pool_is_lazy() {
        // Nothing listens on port 1; a lazy pool must still build.
        let settings = DbSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "nobody".to_string(),
            password: String::new(),
            database: "auth".to_string(),
        };
        assert!(auth_pool(&settings).is_ok());
    }
}
