//! Realmkeeper - world server fleet manager
//!
//! Creates realms, provisions their databases from a dataset, and runs one
//! world server process per realm, driven from an operator console.

// ============================================
// Configuration & Errors
// ============================================

/// Manager settings and per-realm `realm.yaml`
pub mod config;
/// Reader/writer for `Key = Value` world server configs
pub mod conf_file;
pub mod error;

// ============================================
// Realms
// ============================================

/// Realm layout, ids, realmlist records and lifecycle
pub mod realm;
/// One manager per realm name
pub mod instance;
/// Child world server processes
pub mod process;

// ============================================
// Storage & Content
// ============================================

/// MySQL access for realms and accounts
pub mod database;
pub mod dataset;
/// Game accounts and SRP6 verifiers
pub mod account;

// ============================================
// Operator Surface
// ============================================

pub mod keeper;
pub mod commands;
