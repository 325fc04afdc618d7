use async_trait::async_trait;
use sqlx::MySqlPool;
use tokio::sync::OnceCell;

use super::check_identifier;
use crate::config::DbSettings;
use crate::error::RealmResult;
use crate::realm::realmlist::RealmlistRecord;

/// The database side of one realm.
#[async_trait]
pub trait RealmDatabase: Send + Sync {
    /// Open the realm's connection and create its world and character
    /// databases if they do not exist yet. Safe to repeat.
    async fn connect(&self, world: &DbSettings, characters: &DbSettings) -> RealmResult<()>;

    /// Replace the realm's row in the auth `realmlist` table.
    async fn publish_realmlist(&self, record: &RealmlistRecord) -> RealmResult<()>;
}

/// MySQL-backed [`RealmDatabase`]. The server connection is opened on the
/// first `connect` and reused afterwards.
pub struct MySqlRealmDatabase {
    fqn: String,
    server: DbSettings,
    auth: MySqlPool,
    pool: OnceCell<MySqlPool>,
}

impl MySqlRealmDatabase {
    pub fn new(fqn: String, server: DbSettings, auth: MySqlPool) -> Self {
        Self {
            fqn,
            server: server.with_database(""),
            auth,
            pool: OnceCell::new(),
        }
    }
}

#[async_trait]
impl RealmDatabase for MySqlRealmDatabase {
    async fn connect(&self, world: &DbSettings, characters: &DbSettings) -> RealmResult<()> {
        let pool = self
            .pool
            .get_or_try_init(|| super::connect(&self.server, 2))
            .await?;

        for db in [&world.database, &characters.database] {
            check_identifier(db)?;
            sqlx::raw_sql(&format!(
                "CREATE DATABASE IF NOT EXISTS `{}` DEFAULT CHARACTER SET utf8mb4",
                db
            ))
            .execute(pool)
            .await?;
        }
        tracing::info!(
            "[db] [realm_ready] realm={} world={} characters={}",
            self.fqn,
            world.database,
            characters.database
        );
        Ok(())
    }

    async fn publish_realmlist(&self, record: &RealmlistRecord) -> RealmResult<()> {
        let mut tx = self.auth.begin().await?;

        sqlx::query("DELETE FROM `realmlist` WHERE `id` = ?")
            .bind(record.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO `realmlist` VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)")
            .bind(record.id)
            .bind(&record.name)
            .bind(&record.address)
            .bind(&record.local_address)
            .bind(&record.local_subnet_mask)
            .bind(record.port)
            .bind(record.icon)
            .bind(record.flag)
            .bind(record.timezone)
            .bind(record.allowed_security_level)
            .bind(record.population)
            .bind(record.gamebuild)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            "[db] [realmlist] realm={} id={} flag={:#04x}",
            self.fqn,
            record.id,
            record.flag
        );
        Ok(())
    }
}
