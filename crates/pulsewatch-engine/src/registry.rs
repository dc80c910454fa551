//! Service registry: creation, lookup, and soft removal.

use chrono::{DateTime, Utc};
use tracing::info;
use url::Url;

use pulsewatch_state::{RetryPolicy, Service, ServiceId, StateStore, retry_transient};

use crate::error::{EngineError, EngineResult};

/// Owns the set of monitored services.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    retry: RetryPolicy,
}

/// Check create input. Returns the trimmed name and the normalized URL.
pub fn validate_service(name: &str, url: &str) -> EngineResult<(String, String)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("name must not be empty".to_string()));
    }
    let parsed = Url::parse(url.trim())
        .map_err(|e| EngineError::Validation(format!("invalid url {url:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::Validation(format!(
            "unsupported url scheme {:?}, expected http or https",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(EngineError::Validation(format!("url {url:?} has no host")));
    }
    Ok((name.to_string(), parsed.to_string()))
}

impl Registry {
    pub fn new(store: StateStore, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Register a new service: status unknown, counters zero.
    pub fn create(&self, name: &str, url: &str, now: DateTime<Utc>) -> EngineResult<Service> {
        let (name, url) = validate_service(name, url)?;
        let service = retry_transient(&self.retry, "insert service", || {
            self.store
                .insert_service(|id| Service::new(id, &name, &url, now))
        })?;
        info!(service_id = service.id, name = %service.name, url = %service.url, "service registered");
        Ok(service)
    }

    /// Look up a service, removed ones included.
    pub fn get(&self, id: ServiceId) -> EngineResult<Service> {
        retry_transient(&self.retry, "get service", || self.store.get_service(id))?
            .ok_or_else(|| EngineError::service_not_found(id))
    }

    /// Active services, ascending id.
    pub fn list(&self) -> EngineResult<Vec<Service>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|s| s.active)
            .collect())
    }

    /// Every service ever registered, ascending id.
    pub fn list_all(&self) -> EngineResult<Vec<Service>> {
        Ok(retry_transient(&self.retry, "list services", || {
            self.store.list_services()
        })?)
    }

    pub fn put(&self, service: &Service) -> EngineResult<()> {
        Ok(retry_transient(&self.retry, "put service", || {
            self.store.put_service(service)
        })?)
    }

    /// Mark a service inactive, keeping its history.
    pub fn remove(&self, id: ServiceId, now: DateTime<Utc>) -> EngineResult<Service> {
        let mut service = self.get(id)?;
        if !service.active {
            return Err(EngineError::InvalidState(format!(
                "service {id} was already removed"
            )));
        }
        service.active = false;
        service.removed_at = Some(now);
        self.put(&service)?;
        info!(service_id = id, name = %service.name, "service removed");
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(StateStore::open_in_memory().unwrap(), RetryPolicy::none())
    }

    #[test]
    fn create_assigns_ids_and_unknown_status() {
        let reg = registry();
        let a = reg.create("api", "https://api.example.com/health", Utc::now()).unwrap();
        let b = reg.create(" web ", "http://web.example.com", Utc::now()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.name, "web");
        assert_eq!(a.status, pulsewatch_state::ServiceStatus::Unknown);
        assert_eq!(a.total_checks, 0);
        assert_eq!(a.uptime, None);
    }

    #[test]
    fn create_rejects_bad_input() {
        let reg = registry();
        for (name, url) in [
            ("", "https://ok.example"),
            ("   ", "https://ok.example"),
            ("api", "not a url"),
            ("api", "/relative/path"),
            ("api", "ftp://files.example"),
        ] {
            let err = reg.create(name, url, Utc::now()).unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "{name:?} {url:?}");
        }
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn list_is_ascending_and_skips_removed() {
        let reg = registry();
        let ids: Vec<_> = (0..3)
            .map(|i| {
                reg.create(&format!("s{i}"), "https://x.example", Utc::now())
                    .unwrap()
                    .id
            })
            .collect();
        reg.remove(ids[1], Utc::now()).unwrap();

        let listed: Vec<_> = reg.list().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![ids[0], ids[2]]);
        assert_eq!(reg.list_all().unwrap().len(), 3);
    }

    #[test]
    fn remove_is_soft_and_not_repeatable() {
        let reg = registry();
        let svc = reg.create("api", "https://api.example", Utc::now()).unwrap();

        let removed = reg.remove(svc.id, Utc::now()).unwrap();
        assert!(!removed.active);
        assert!(removed.removed_at.is_some());
        assert!(!reg.get(svc.id).unwrap().active);

        assert!(reg.remove(svc.id, Utc::now()).unwrap_err().is_invalid_state());
        assert!(matches!(
            reg.remove(999, Utc::now()),
            Err(EngineError::NotFound(_))
        ));
    }
}
