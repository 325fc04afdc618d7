use async_trait::async_trait;
use sqlx::MySqlPool;

use crate::account::{AccountStore, NewAccount};
use crate::error::RealmResult;

/// [`AccountStore`] over the auth database's `account` and `account_access` tables.
pub struct MySqlAccountStore {
    pool: MySqlPool,
}

impl MySqlAccountStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for MySqlAccountStore {
    async fn account_exists(&self, username: &str) -> RealmResult<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT COUNT(*) FROM `account` WHERE `username` = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(n,)| n > 0).unwrap_or(false))
    }

    async fn insert_account(&self, account: &NewAccount) -> RealmResult<()> {
        sqlx::query(
            "INSERT INTO `account` (`username`, `salt`, `verifier`, `email`, `reg_mail`)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&account.username)
        .bind(&account.salt[..])
        .bind(&account.verifier[..])
        .bind(&account.email)
        .bind(&account.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn account_id(&self, username: &str) -> RealmResult<Option<u32>> {
        let row: Option<(u32,)> = sqlx::query_as("SELECT `id` FROM `account` WHERE `username` = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn grant_access(&self, account_id: u32, gm_level: u8) -> RealmResult<()> {
        // RealmID -1 applies to every realm
        sqlx::query(
            "INSERT INTO `account_access` (`AccountID`, `SecurityLevel`, `RealmID`) VALUES (?, ?, -1)",
        )
        .bind(account_id)
        .bind(gm_level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
