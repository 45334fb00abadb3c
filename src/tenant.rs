use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::model::Ms;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// background tasks. Tenant = `database` from the connection's startup line.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    pending_ttl_ms: Option<Ms>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, pending_ttl_ms: Option<Ms>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            pending_ttl_ms,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // Two first connections for one tenant race here; the entry API makes
        // sure only one engine (and one WAL writer) survives.
        let entry = self.engines.entry(tenant.to_string());
        let engine = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(wal_path, notify)?);
                v.insert(engine.clone());
                engine
            }
        };

        if let Some(ttl) = self.pending_ttl_ms {
            tokio::spawn(reaper::run_reaper(engine.clone(), ttl));
        }
        tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {tenant} loaded");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000, None);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let business = Ulid::new();
        eng_a
            .create_business(business, "Shared Id".into(), 0, false, false)
            .await
            .unwrap();
        // Same id is free in the other tenant.
        eng_b
            .create_business(business, "Shared Id".into(), 0, false, false)
            .await
            .unwrap();

        eng_a.delete_business(business).await.unwrap();
        assert!(matches!(
            eng_a.get_business(business),
            Err(EngineError::NotFound(_))
        ));
        assert!(eng_b.get_business(business).is_ok());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000, None);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000, Some(60_000));

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000, None);

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000, None);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_state_survives_manager_restart() {
        let dir = test_data_dir("restart");
        let business = Ulid::new();
        {
            let tm = TenantManager::new(dir.clone(), 1000, None);
            let eng = tm.get_or_create("acme").unwrap();
            eng.create_business(business, "Acme Cuts".into(), -300, false, false)
                .await
                .unwrap();
        }
        let tm = TenantManager::new(dir, 1000, None);
        let eng = tm.get_or_create("acme").unwrap();
        assert_eq!(eng.get_business(business).unwrap().tz_offset_minutes, -300);
    }
}
