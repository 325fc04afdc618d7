//! Account creation with SRP6 credentials.
//!
//! Passwords are never stored. The auth server authenticates clients against
//! a verifier `v = g^x mod N`, where `x` is derived from a random salt and
//! the upper-cased username and password.

use std::sync::OnceLock;

use async_trait::async_trait;
use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use crate::error::{RealmError, RealmResult};

/// SRP6 safe prime shared with the authentication server (big-endian hex).
const N_HEX: &str = "894B645E89E1535BBDAD5B8B290650530801B18EBFBF5E8FAB3C82872A3E9BB7";
const G: u32 = 7;

pub const SALT_LEN: usize = 32;
pub const VERIFIER_LEN: usize = 32;

pub const MAX_USERNAME_LEN: usize = 16;
pub const MAX_PASSWORD_LEN: usize = 16;
pub const MAX_EMAIL_LEN: usize = 64;

static MODULUS: OnceLock<BigUint> = OnceLock::new();

fn modulus() -> &'static BigUint {
    MODULUS.get_or_init(|| {
        BigUint::from_bytes_be(&hex::decode(N_HEX).expect("N_HEX is a valid hex constant"))
    })
}

/// Compute the SRP6 verifier for an already normalized username/password.
///
/// `x = SHA1(salt || SHA1(user ":" pass))` is read little-endian, and the
/// result is stored little-endian, zero-padded to 32 bytes.
pub fn make_verifier(username: &str, password: &str, salt: &[u8; SALT_LEN]) -> [u8; VERIFIER_LEN] {
    let h1 = Sha1::new()
        .chain_update(username.as_bytes())
        .chain_update(b":")
        .chain_update(password.as_bytes())
        .finalize();
    let h2 = Sha1::new().chain_update(salt).chain_update(h1).finalize();

    let x = BigUint::from_bytes_le(&h2);
    let v = BigUint::from(G).modpow(&x, modulus());

    let mut out = [0u8; VERIFIER_LEN];
    let bytes = v.to_bytes_le();
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Canonical case used for both usernames and passwords.
pub fn normalize(s: &str) -> String {
    s.to_ascii_uppercase()
}

/// Row written into the `account` table.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub salt: [u8; SALT_LEN],
    pub verifier: [u8; VERIFIER_LEN],
    pub email: String,
}

/// The statements account creation needs from the auth database.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account_exists(&self, username: &str) -> RealmResult<bool>;
    async fn insert_account(&self, account: &NewAccount) -> RealmResult<()>;
    async fn account_id(&self, username: &str) -> RealmResult<Option<u32>>;
    /// Grant `gm_level` on every realm, without expiry.
    async fn grant_access(&self, account_id: u32, gm_level: u8) -> RealmResult<()>;
}

fn validate(username: &str, password: &str, email: &str) -> RealmResult<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(RealmError::invalid(
            username,
            format!("username must be 1-{} characters", MAX_USERNAME_LEN),
        ));
    }
    if username.contains(':') || !username.chars().all(|c| c.is_ascii_graphic()) {
        return Err(RealmError::invalid(username, "username contains invalid characters"));
    }
    if password.is_empty() || password.len() > MAX_PASSWORD_LEN {
        return Err(RealmError::invalid(
            "<password>",
            format!("password must be 1-{} characters", MAX_PASSWORD_LEN),
        ));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(RealmError::invalid(email, "email too long"));
    }
    Ok(())
}

/// Create an account, optionally with GM access on every realm.
///
/// The duplicate check and the insert are separate round-trips; two
/// concurrent creations of one name are only stopped by the table's
/// unique key. Returns the normalized username.
pub async fn create_account(
    store: &dyn AccountStore,
    username: &str,
    password: &str,
    gm_level: u8,
    email: &str,
) -> RealmResult<String> {
    let username = normalize(username);
    let password = normalize(password);
    validate(&username, &password, email)?;

    let salt: [u8; SALT_LEN] = rand::random();
    let verifier = make_verifier(&username, &password, &salt);

    if store.account_exists(&username).await? {
        return Err(RealmError::DuplicateAccount(username));
    }

    store
        .insert_account(&NewAccount {
            username: username.clone(),
            salt,
            verifier,
            email: email.to_string(),
        })
        .await?;
    tracing::info!("[account] [created] username={}", username);

    if gm_level > 0 {
        let id = store
            .account_id(&username)
            .await?
            .ok_or_else(|| RealmError::Config(anyhow::anyhow!(
                "account {} vanished right after insert",
                username
            )))?;
        store.grant_access(id, gm_level).await?;
        tracing::info!("[account] [gm_granted] username={} id={} level={}", username, id, gm_level);
    }

    Ok(username)
}
