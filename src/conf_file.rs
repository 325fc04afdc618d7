//! In-place editor for `Key = Value` server config files (worldserver.conf).
//!
//! The file is kept as raw lines so that comments, ordering and untouched
//! values survive a patch byte-for-byte.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RealmError, RealmResult};

/// A value that can be written into a conf file.
pub trait ConfValue {
    fn render(&self) -> String;
}

impl ConfValue for &str {
    fn render(&self) -> String {
        format!("\"{}\"", self)
    }
}

impl ConfValue for String {
    fn render(&self) -> String {
        self.as_str().render()
    }
}

impl ConfValue for &Path {
    fn render(&self) -> String {
        self.display().to_string().render()
    }
}

impl ConfValue for bool {
    fn render(&self) -> String {
        let flag = if *self { "1" } else { "0" };
        flag.to_string()
    }
}

macro_rules! int_conf_value {
    ($($t:ty),*) => {
        $(impl ConfValue for $t {
            fn render(&self) -> String {
                self.to_string()
            }
        })*
    };
}

int_conf_value!(u8, u16, u32, u64, i32, i64);

#[derive(Debug, Clone)]
pub struct ConfFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl ConfFile {
    pub fn load<P: AsRef<Path>>(path: P) -> RealmResult<Self> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RealmError::MissingConfig(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::parse(path, &content))
    }

    pub fn parse<P: AsRef<Path>>(path: P, content: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Index of the active (uncommented) line defining `key`.
    fn find(&self, key: &str) -> Option<usize> {
        self.lines.iter().position(|line| {
            let line = line.trim_start();
            if line.starts_with('#') {
                return false;
            }
            match line.split_once('=') {
                Some((k, _)) => k.trim() == key,
                None => false,
            }
        })
    }

    /// Raw value text with surrounding quotes removed.
    pub fn get(&self, key: &str) -> Option<&str> {
        let idx = self.find(key)?;
        let (_, val) = self.lines[idx].split_once('=')?;
        let val = val.trim();
        Some(
            val.strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(val),
        )
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }

    /// Rewrite the value of `key`, keeping the original indentation and key
    /// spelling. Keys not present in the file are appended at the end.
    pub fn set<V: ConfValue>(&mut self, key: &str, value: V) {
        let rendered = value.render();
        match self.find(key) {
            Some(idx) => {
                let line = &self.lines[idx];
                let eq = line.find('=').unwrap_or(line.len());
                let lhs = line[..eq].trim_end();
                self.lines[idx] = format!("{} = {}", lhs, rendered);
            }
            None => self.lines.push(format!("{} = {}", key, rendered)),
        }
    }

    pub fn save(&self) -> RealmResult<()> {
        let mut out = self.lines.join("\n");
        out.push('\n');
        fs::write(&self.path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"###############################################
# World server config
###############################################

[worldserver]

#    RealmID
#        Description: ID of the Realm using this config.
RealmID = 1

DataDir = "."
#WorldServerPort = 1234
    WorldServerPort = 8085
Updates.EnableDatabases = 7
"#;

    fn conf() -> ConfFile {
        ConfFile::parse("worldserver.conf", FIXTURE)
    }

    #[test]
    fn test_get_skips_comments() {
        let conf = conf();
        assert_eq!(conf.get("RealmID"), Some("1"));
        assert_eq!(conf.get("DataDir"), Some("."));
        assert_eq!(conf.get_int("WorldServerPort"), Some(8085));
        assert_eq!(conf.get("Missing"), None);
    }

    #[test]
    fn test_string_round_trip() {
        let mut conf = conf();
        conf.set("DataDir", "/srv/data");
        assert_eq!(conf.get("DataDir"), Some("/srv/data"));
    }

    #[test]
    fn test_int_round_trip() {
        let mut conf = conf();
        conf.set("RealmID", 42u32);
        assert_eq!(conf.get_int("RealmID"), Some(42));
    }

    #[test]
    fn test_bool_round_trip() {
        let mut conf = conf();
        conf.set("Updates.EnableDatabases", false);
        assert_eq!(conf.get_bool("Updates.EnableDatabases"), Some(false));
        assert_eq!(conf.get("Updates.EnableDatabases"), Some("0"));
        conf.set("Updates.EnableDatabases", true);
        assert_eq!(conf.get_bool("Updates.EnableDatabases"), Some(true));
    }

    #[test]
    fn test_patch_preserves_surroundings() {
        let mut conf = conf();
        conf.set("WorldServerPort", 9000u16);

        let text = conf.lines.join("\n");
        assert!(text.contains("#WorldServerPort = 1234"));
        assert!(text.contains("    WorldServerPort = 9000"));
        assert!(text.contains("#        Description: ID of the Realm using this config."));
        assert_eq!(conf.lines.len(), FIXTURE.lines().count());
    }

    #[test]
    fn test_missing_key_is_appended() {
        let mut conf = conf();
        conf.set("HotReload.Enable", true);
        assert_eq!(conf.lines.last().map(String::as_str), Some("HotReload.Enable = 1"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worldserver.conf");
        std::fs::write(&path, FIXTURE).unwrap();

        let mut conf = ConfFile::load(&path).unwrap();
        conf.set("LoginDatabaseInfo", "127.0.0.1;3306;u;p;auth");
        conf.save().unwrap();

        let loaded = ConfFile::load(&path).unwrap();
        assert_eq!(loaded.get("LoginDatabaseInfo"), Some("127.0.0.1;3306;u;p;auth"));
        assert_eq!(loaded.get_int("RealmID"), Some(1));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfFile::load(dir.path().join("nope.conf")).unwrap_err();
        assert!(matches!(err, RealmError::MissingConfig(_)));
    }
}
