//! Operator command surface.
//!
//! Commands are `<verb> <noun> [args...]` lines. The set is a static table
//! checked once when the router is built; each entry maps to a typed handler.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::account;
use crate::error::{RealmError, RealmResult};
use crate::keeper::Keeper;
use crate::process::ProcessState;
use crate::realm::lifecycle::{self, BatchResult};
use crate::realm::{Realm, RealmKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CreateRealm,
    StartRealm,
    StopRealm,
    ListRealm,
    SendRealm,
    CreateAccount,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub verb: &'static str,
    pub noun: &'static str,
    pub usage: &'static str,
    pub kind: CommandKind,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        verb: "create",
        noun: "realm",
        usage: "create realm <module> <name> [display name]",
        kind: CommandKind::CreateRealm,
    },
    CommandSpec {
        verb: "start",
        noun: "realm",
        usage: "start realm [realms...] [build]",
        kind: CommandKind::StartRealm,
    },
    CommandSpec {
        verb: "stop",
        noun: "realm",
        usage: "stop realm [realms...] [--force] [delay seconds]",
        kind: CommandKind::StopRealm,
    },
    CommandSpec {
        verb: "list",
        noun: "realm",
        usage: "list realm [module|realm]",
        kind: CommandKind::ListRealm,
    },
    CommandSpec {
        verb: "send",
        noun: "realm",
        usage: "send realm <realm> <command...>",
        kind: CommandKind::SendRealm,
    },
    CommandSpec {
        verb: "create",
        noun: "account",
        usage: "create account <username> <password> [gm level] [email]",
        kind: CommandKind::CreateAccount,
    },
];

/// Reject tables with a repeated `verb noun` pair or a handler bound twice.
pub fn validate_table(table: &[CommandSpec]) -> RealmResult<()> {
    let mut names = HashSet::new();
    let mut kinds = HashSet::new();
    for spec in table {
        if !names.insert((spec.verb, spec.noun)) {
            return Err(RealmError::Config(anyhow::anyhow!(
                "command '{} {}' registered twice",
                spec.verb,
                spec.noun
            )));
        }
        if !kinds.insert(spec.kind) {
            return Err(RealmError::Config(anyhow::anyhow!(
                "handler {:?} bound to more than one command",
                spec.kind
            )));
        }
        if !spec.usage.starts_with(&format!("{} {}", spec.verb, spec.noun)) {
            return Err(RealmError::Config(anyhow::anyhow!(
                "usage of '{} {}' does not start with its name",
                spec.verb,
                spec.noun
            )));
        }
    }
    Ok(())
}

/// Take up to `n` whitespace-separated tokens and return them with the
/// untouched remainder of the line.
fn split_tokens(line: &str, n: usize) -> (Vec<&str>, &str) {
    let mut tokens = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    while tokens.len() < n && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        tokens.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    (tokens, rest)
}

const FORCE_FLAGS: &[&str] = &["--force", "-f", "force"];

pub struct CommandRouter {
    keeper: Arc<Keeper>,
}

impl CommandRouter {
    pub fn new(keeper: Arc<Keeper>) -> RealmResult<Self> {
        validate_table(COMMANDS)?;
        Ok(Self { keeper })
    }

    pub fn keeper(&self) -> &Arc<Keeper> {
        &self.keeper
    }

    pub fn help(&self) -> String {
        let mut out: Vec<&str> = COMMANDS.iter().map(|c| c.usage).collect();
        out.push("help");
        out.push("exit");
        out.join("\n")
    }

    /// Run one command line and return the text to show the operator.
    pub async fn dispatch(&self, line: &str) -> RealmResult<String> {
        let (head, rest) = split_tokens(line, 2);
        match head.as_slice() {
            [] => return Ok(String::new()),
            ["help"] | ["?"] => return Ok(self.help()),
            _ => {}
        }

        let spec = match head.as_slice() {
            [verb, noun] => COMMANDS.iter().find(|c| c.verb == *verb && c.noun == *noun),
            _ => None,
        };
        let Some(spec) = spec else {
            return Err(RealmError::UnknownCommand(head.join(" ")));
        };
        let args: Vec<&str> = rest.split_whitespace().collect();
        tracing::debug!("[command] [dispatch] kind={:?} args={}", spec.kind, args.len());

        match spec.kind {
            CommandKind::CreateRealm => self.create_realm(&args),
            CommandKind::StartRealm => self.start_realm(&args).await,
            CommandKind::StopRealm => self.stop_realm(&args).await,
            CommandKind::ListRealm => self.list_realm(&args),
            CommandKind::SendRealm => self.send_realm(rest).await,
            CommandKind::CreateAccount => self.create_account(&args).await,
        }
    }

    // ============================================
    // Realm matching
    // ============================================

    /// One realm by `module.name`, or by a bare name that is unique in the fleet.
    pub fn resolve_exact(&self, ident: &str) -> RealmResult<Realm> {
        if let Some(key) = RealmKey::parse(ident) {
            let realm = self.keeper.fleet.realm(key);
            if realm.exists() {
                return Ok(realm);
            }
        }

        let mut matches: Vec<Realm> = self
            .keeper
            .fleet
            .realms()?
            .into_iter()
            .filter(|r| r.name() == ident)
            .collect();
        match matches.len() {
            0 => Err(RealmError::UnknownRealm(ident.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(RealmError::AmbiguousRealm {
                name: ident.to_string(),
                candidates: matches.iter().map(Realm::fqn).collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Every realm any argument names; arguments naming nothing are handed
    /// back as leftovers. With no match at all, the configured default set
    /// is selected.
    pub fn resolve_any(&self, args: &[&str]) -> RealmResult<(Vec<Realm>, Vec<String>)> {
        let all = self.keeper.fleet.realms()?;
        let mut targets: Vec<Realm> = Vec::new();
        let mut leftovers = Vec::new();

        for arg in args {
            let hits: Vec<&Realm> = if *arg == "all" || *arg == "*" {
                all.iter().collect()
            } else {
                all.iter()
                    .filter(|r| r.fqn() == *arg || r.group() == *arg || r.name() == *arg)
                    .collect()
            };
            if hits.is_empty() {
                leftovers.push(arg.to_string());
            }
            for realm in hits {
                if !targets.iter().any(|t| t.key() == realm.key()) {
                    targets.push(realm.clone());
                }
            }
        }

        if targets.is_empty() {
            targets = self.default_realms(all)?;
        }
        Ok((targets, leftovers))
    }

    fn default_realms(&self, all: Vec<Realm>) -> RealmResult<Vec<Realm>> {
        if self.keeper.config.default_realms.is_empty() {
            return Ok(all);
        }
        self.keeper
            .config
            .default_realms
            .iter()
            .map(|ident| self.resolve_exact(ident))
            .collect()
    }

    // ============================================
    // Handlers
    // ============================================

    fn create_realm(&self, args: &[&str]) -> RealmResult<String> {
        let (group, name) = match args {
            [group, name, ..] => (*group, *name),
            _ => return Err(RealmError::invalid(args.join(" "), "usage: create realm <module> <name> [display name]")),
        };
        let display = args[2..].join(" ");
        let display = (!display.is_empty()).then_some(display.as_str());

        let realm = lifecycle::create(&self.keeper, group, name, display)?;
        Ok(format!("Created realm {}", realm.fqn()))
    }

    async fn start_realm(&self, args: &[&str]) -> RealmResult<String> {
        let (targets, leftovers) = self.resolve_any(args)?;
        let build = match leftovers.as_slice() {
            [] => self.keeper.config.default_build.clone(),
            [build] => build.clone(),
            [_, extra, ..] => return Err(RealmError::invalid(extra.as_str(), "unexpected argument")),
        };
        lifecycle::check_build(&self.keeper, &build)?;

        let results = lifecycle::start_many(&self.keeper, targets, &build).await?;
        Ok(render_batch(&results, |pid| format!("started (pid {})", pid)))
    }

    async fn stop_realm(&self, args: &[&str]) -> RealmResult<String> {
        let force = args.iter().any(|a| FORCE_FLAGS.contains(a));
        let rest: Vec<&str> = args.iter().copied().filter(|a| !FORCE_FLAGS.contains(a)).collect();
        let (targets, leftovers) = self.resolve_any(&rest)?;
        let delay = leftovers
            .first()
            .and_then(|d| d.parse::<u32>().ok())
            .unwrap_or(0);

        let results = lifecycle::stop_many(&self.keeper, targets, force, delay).await?;
        Ok(render_batch(&results, |&stopped| {
            let status = if stopped { "stopped" } else { "not running" };
            status.to_string()
        }))
    }

    fn list_realm(&self, args: &[&str]) -> RealmResult<String> {
        let realms = match args.first() {
            None => self.keeper.fleet.realms()?,
            Some(group) if self.keeper.fleet.has_module(group) => {
                self.keeper.fleet.realms_in(group)?
            }
            Some(ident) => vec![self.resolve_exact(ident)?],
        };
        if realms.is_empty() {
            return Ok("No realms".to_string());
        }

        let mut rows: Vec<(bool, String, String)> = realms
            .iter()
            .map(|realm| {
                let fqn = realm.fqn();
                let state = self
                    .keeper
                    .instances
                    .get(&fqn)
                    .map(|m| m.process().state())
                    .unwrap_or(ProcessState::NotStarted);
                (state.is_running(), fqn, describe(&state))
            })
            .collect();
        // Running realms last, so they stay visible at the bottom of a terminal
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0);
        Ok(rows
            .iter()
            .map(|(_, fqn, status)| format!("{:<width$}  {}", fqn, status, width = width))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn send_realm(&self, rest: &str) -> RealmResult<String> {
        let (name, text) = split_tokens(rest, 1);
        let Some(name) = name.first() else {
            return Err(RealmError::invalid("", "usage: send realm <realm> <command...>"));
        };
        if text.is_empty() {
            return Err(RealmError::invalid(*name, "missing command text"));
        }
        let realm = self.resolve_exact(name)?;
        if lifecycle::send_command(&self.keeper, &realm, text).await {
            Ok(format!("Sent to {}", realm.fqn()))
        } else {
            Ok(String::new())
        }
    }

    async fn create_account(&self, args: &[&str]) -> RealmResult<String> {
        let (username, password) = match args {
            [u, p, ..] => (*u, *p),
            _ => return Err(RealmError::invalid(args.join(" "), "usage: create account <username> <password> [gm level] [email]")),
        };
        let gm_level = match args.get(2) {
            Some(level) => level
                .parse::<u8>()
                .map_err(|_| RealmError::invalid(*level, "gm level must be a number 0-255"))?,
            None => 0,
        };
        let email = args.get(3).copied().unwrap_or("");

        let username =
            account::create_account(self.keeper.accounts.as_ref(), username, password, gm_level, email)
                .await?;
        Ok(if gm_level > 0 {
            format!("Created account {} with gm level {}", username, gm_level)
        } else {
            format!("Created account {}", username)
        })
    }

    /// Start every realm marked `auto_start`, unless the manager was told not to.
    pub async fn auto_start(&self, suppressed: bool) -> BatchResult<u32> {
        if suppressed || !self.keeper.config.auto_start {
            tracing::info!("[command] [autostart_skipped]");
            return Vec::new();
        }
        let realms = match self.keeper.fleet.realms() {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("[command] [autostart_failed] err={}", e);
                return Vec::new();
            }
        };

        let mut targets = Vec::new();
        for realm in realms {
            match realm.config() {
                Ok(config) if config.auto_start => targets.push(realm),
                Ok(_) => {}
                Err(e) => tracing::error!("[command] [autostart_config] realm={} err={}", realm.fqn(), e),
            }
        }
        if targets.is_empty() {
            return Vec::new();
        }

        let build = self.keeper.config.default_build.clone();
        lifecycle::start_many(&self.keeper, targets, &build)
            .await
            .unwrap_or_default()
    }
}

fn describe(state: &ProcessState) -> String {
    match state {
        ProcessState::Running { pid, since } => {
            let up = (Utc::now() - *since).num_seconds().max(0);
            format!(
                "running  pid={} up={}h{:02}m{:02}s",
                pid,
                up / 3600,
                (up / 60) % 60,
                up % 60
            )
        }
        ProcessState::Stopping => "stopping".to_string(),
        ProcessState::Starting => "starting".to_string(),
        ProcessState::Failed { reason } => format!("stopped (failed: {})", reason),
        ProcessState::Stopped { code: Some(code) } if *code != 0 => {
            format!("stopped (exit {})", code)
        }
        _ => "stopped".to_string(),
    }
}

fn render_batch<T>(results: &BatchResult<T>, ok: impl Fn(&T) -> String) -> String {
    results
        .iter()
        .map(|(fqn, result)| match result {
            Ok(value) => format!("{}: {}", fqn, ok(value)),
            Err(e) => format!("{}: failed: {}", fqn, e),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_is_valid() {
        assert!(validate_table(COMMANDS).is_ok());
    }

    #[test]
    fn test_duplicate_command_rejected() {
        let table = [COMMANDS[0], COMMANDS[0]];
        assert!(validate_table(&table).is_err());
    }

    #[test]
    fn test_split_tokens() {
        let (head, rest) = split_tokens("  send realm  core.main   announce   hi there ", 3);
        assert_eq!(head, vec!["send", "realm", "core.main"]);
        assert_eq!(rest, "announce   hi there ");

        let (head, rest) = split_tokens("list", 2);
        assert_eq!(head, vec!["list"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&ProcessState::NotStarted), "stopped");
        assert_eq!(describe(&ProcessState::Stopped { code: Some(0) }), "stopped");
        assert_eq!(describe(&ProcessState::Stopped { code: Some(2) }), "stopped (exit 2)");
        let running = describe(&ProcessState::Running {
            pid: 7,
            since: Utc::now(),
        });
        assert!(running.starts_with("running  pid=7 up=0h00m0"));
    }
}
