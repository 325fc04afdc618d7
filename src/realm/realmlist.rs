//! The row a realm publishes into the auth database's `realmlist` table.

use crate::config::RealmConfig;

// Realm flag bits understood by the client
pub const REALM_FLAG_OFFLINE: u8 = 0x02;
pub const REALM_FLAG_NEW_PLAYERS: u8 = 0x10;
pub const REALM_FLAG_RECOMMENDED: u8 = 0x20;
pub const REALM_FLAG_FULL: u8 = 0x40;

/// Combine the four visibility switches into a realmlist flag byte.
/// Bits are independent; any combination is valid.
pub fn realm_flags(offline: bool, new_players: bool, recommended: bool, full: bool) -> u8 {
    let mut flags = 0;
    if offline {
        flags |= REALM_FLAG_OFFLINE;
    }
    if new_players {
        flags |= REALM_FLAG_NEW_PLAYERS;
    }
    if recommended {
        flags |= REALM_FLAG_RECOMMENDED;
    }
    if full {
        flags |= REALM_FLAG_FULL;
    }
    flags
}

/// One `realmlist` row in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RealmlistRecord {
    pub id: u32,
    pub name: String,
    pub address: String,
    pub local_address: String,
    pub local_subnet_mask: String,
    pub port: u16,
    pub icon: u8,
    pub flag: u8,
    pub timezone: u8,
    pub allowed_security_level: u8,
    pub population: f32,
    pub gamebuild: u32,
}

impl RealmlistRecord {
    pub fn new(id: u32, name: String, config: &RealmConfig, gamebuild: u32) -> Self {
        Self {
            id,
            name,
            address: config.address.clone(),
            local_address: config.local_address.clone(),
            local_subnet_mask: config.local_subnet_mask.clone(),
            port: config.port,
            icon: config.realm_type,
            flag: realm_flags(
                config.offline,
                config.new_players,
                config.recommended,
                config.full,
            ),
            timezone: config.timezone,
            allowed_security_level: config.security_level,
            population: 0.0,
            gamebuild,
        }
    }

    /// Literal statement, for logs and manual replay. The database layer
    /// binds the same twelve values instead of using this text.
    pub fn to_insert_sql(&self) -> String {
        format!(
            "INSERT INTO realmlist VALUES ({},'{}','{}','{}','{}',{},{},{},{},{},{},{});",
            self.id,
            escape(&self.name),
            escape(&self.address),
            escape(&self.local_address),
            escape(&self.local_subnet_mask),
            self.port,
            self.icon,
            self.flag,
            self.timezone,
            self.allowed_security_level,
            self.population,
            self.gamebuild,
        )
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}
