//! Fleet-unique numeric realm ids, persisted in each realm's `realm.id`.

use std::collections::BTreeSet;
use std::fs;

use tokio::sync::Mutex;

use super::{Fleet, Realm};
use crate::error::{RealmError, RealmResult};

/// Hands out the smallest free positive id.
///
/// Allocation scans every marker in the fleet and then writes the new one,
/// so the whole step runs under `lock`. Other processes are not excluded.
#[derive(Debug, Default)]
pub struct IdAllocator {
    lock: Mutex<()>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_id(realm: &Realm) -> bool {
        realm.id_path().is_file()
    }

    /// Persisted id, `None` if the marker is absent.
    pub fn read_id(realm: &Realm) -> RealmResult<Option<u32>> {
        let path = realm.id_path();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match content.trim().parse::<u32>() {
            Ok(id) if id > 0 => Ok(Some(id)),
            _ => Err(RealmError::CorruptId {
                path: path.to_path_buf(),
                content: content.trim().to_string(),
            }),
        }
    }

    /// Existing id of `realm`, or a newly allocated and persisted one.
    pub async fn get_id(&self, fleet: &Fleet, realm: &Realm) -> RealmResult<u32> {
        let _guard = self.lock.lock().await;

        if let Some(id) = Self::read_id(realm)? {
            return Ok(id);
        }

        // A broken marker elsewhere only fails that realm's own start
        let mut used = BTreeSet::new();
        for other in fleet.realms()? {
            match Self::read_id(&other) {
                Ok(Some(id)) => {
                    used.insert(id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("[realm] [id_skipped] realm={} err={}", other.fqn(), e),
            }
        }
        let id = smallest_free(&used);

        fs::create_dir_all(realm.dir())?;
        fs::write(realm.id_path(), id.to_string())?;
        tracing::info!("[realm] [id_assigned] realm={} id={}", realm.fqn(), id);
        Ok(id)
    }
}

fn smallest_free(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 1;
    for &id in used {
        if id > candidate {
            break;
        }
        if id == candidate {
            candidate += 1;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::RealmKey;

    fn make_realm(fleet: &Fleet, group: &str, name: &str) -> Realm {
        let realm = fleet.realm(RealmKey::new(group, name));
        fs::create_dir_all(realm.dir()).unwrap();
        realm
    }

    #[test]
    fn test_smallest_free() {
        assert_eq!(smallest_free(&BTreeSet::new()), 1);
        assert_eq!(smallest_free(&[1, 2, 3].into_iter().collect()), 4);
        assert_eq!(smallest_free(&[1, 3, 4].into_iter().collect()), 2);
        assert_eq!(smallest_free(&[2, 9].into_iter().collect()), 1);
    }

    #[tokio::test]
    async fn test_sequential_allocation_is_dense() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let ids = IdAllocator::new();

        let mut assigned = BTreeSet::new();
        for i in 0..5 {
            let realm = make_realm(&fleet, "core", &format!("r{}", i));
            assigned.insert(ids.get_id(&fleet, &realm).await.unwrap());
        }
        assert_eq!(assigned, (1..=5).collect::<BTreeSet<u32>>());
    }

    #[tokio::test]
    async fn test_get_id_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let ids = IdAllocator::new();
        let realm = make_realm(&fleet, "core", "main");

        assert!(!IdAllocator::has_id(&realm));
        let first = ids.get_id(&fleet, &realm).await.unwrap();
        assert!(IdAllocator::has_id(&realm));
        let second = ids.get_id(&fleet, &realm).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fills_gap_across_modules() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let ids = IdAllocator::new();

        let a = make_realm(&fleet, "alpha", "one");
        let b = make_realm(&fleet, "beta", "two");
        fs::write(a.id_path(), "1").unwrap();
        fs::write(b.id_path(), "3\n").unwrap();

        let c = make_realm(&fleet, "gamma", "three");
        assert_eq!(ids.get_id(&fleet, &c).await.unwrap(), 2);
        assert_eq!(fs::read_to_string(c.id_path()).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let ids = IdAllocator::new();

        let realm = make_realm(&fleet, "core", "main");
        fs::write(realm.id_path(), "not-a-number").unwrap();

        let err = ids.get_id(&fleet, &realm).await.unwrap_err();
        assert!(matches!(err, RealmError::CorruptId { .. }));
        // Never silently repaired
        assert_eq!(fs::read_to_string(realm.id_path()).unwrap(), "not-a-number");
    }

    #[tokio::test]
    async fn test_corrupt_sibling_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let ids = IdAllocator::new();

        let broken = make_realm(&fleet, "alpha", "broken");
        fs::write(broken.id_path(), "garbage").unwrap();
        let first = make_realm(&fleet, "beta", "one");
        fs::write(first.id_path(), "1").unwrap();

        let fresh = make_realm(&fleet, "gamma", "fresh");
        assert_eq!(ids.get_id(&fleet, &fresh).await.unwrap(), 2);

        let err = ids.get_id(&fleet, &broken).await.unwrap_err();
        assert!(matches!(err, RealmError::CorruptId { .. }));
        assert_eq!(fs::read_to_string(broken.id_path()).unwrap(), "garbage");
    }

    #[test]
    fn test_zero_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let fleet = Fleet::new(dir.path());
        let realm = make_realm(&fleet, "core", "main");
        fs::write(realm.id_path(), "0").unwrap();
        assert!(IdAllocator::read_id(&realm).is_err());
    }
}
