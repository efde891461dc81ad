//! Tenant registry: owns every tenant's task set, drives registration,
//! startup ordering, and recovery from the persistence layer.

pub mod refresh;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CredentialType, DEFAULT_INTERVAL_SECS};
use crate::error::RefreshError;
use crate::remote::{Callback, Supplier};
use crate::store::{distinct_join, StoreBackend, TenantStore};
use task::Task;

/// One registered application: an id/secret pair owning at most one task
/// per credential type.
pub struct Tenant {
    pub app_id: String,
    secret: RwLock<String>,
    tasks: RwLock<HashMap<CredentialType, Arc<Task>>>,
    pub store: TenantStore,
    pub client: Client,
    catalog: Arc<Catalog>,
}

impl Tenant {
    fn new(
        app_id: &str,
        secret: &str,
        store: TenantStore,
        client: Client,
        catalog: Arc<Catalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            app_id: app_id.to_owned(),
            secret: RwLock::new(secret.to_owned()),
            tasks: RwLock::new(HashMap::new()),
            store,
            client,
            catalog,
        })
    }

    pub async fn secret(&self) -> String {
        self.secret.read().await.clone()
    }

    async fn set_secret(&self, secret: &str) {
        *self.secret.write().await = secret.to_owned();
    }

    pub async fn task(&self, typ: CredentialType) -> Option<Arc<Task>> {
        self.tasks.read().await.get(&typ).cloned()
    }

    /// Create or rebind the task for `typ`. The supplier/callback addresses
    /// are persisted either way; a pre-existing task keeps its identity and
    /// schedule state and only has its hooks swapped.
    pub async fn register_task(
        self: &Arc<Self>,
        typ: CredentialType,
        dyn_addr: &str,
        cb_addr: &str,
    ) -> Arc<Task> {
        self.store.set(&format!("dyn-{}", typ.code()), dyn_addr);
        self.store.set(&format!("cb-{}", typ.code()), cb_addr);

        let supplier = Supplier::from_addr(dyn_addr);
        let callback = Callback::from_addr(cb_addr);

        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&typ) {
            debug!(app_id = %self.app_id, typ = typ.code(), "rebinding existing task");
            existing.rebind(supplier, callback).await;
            return existing.clone();
        }

        let task = Task::new(
            typ,
            self.catalog.descriptor(typ).clone(),
            Duration::from_secs(DEFAULT_INTERVAL_SECS),
            supplier,
            callback,
            self,
        );

        let tasklist = match self.store.get("tasklist") {
            Some(list) if !list.is_empty() => distinct_join(&format!("{list},{}", typ.code())),
            _ => typ.code().to_string(),
        };
        self.store.set("tasklist", &tasklist);

        info!(app_id = %self.app_id, typ = typ.code(), task = typ.name(), "task registered");
        tasks.insert(typ, task.clone());
        task
    }

    /// Start every registered task's scheduler in ascending type order, so
    /// a type is always started after the types it may depend on.
    pub async fn run_all(&self) {
        let ordered: Vec<Arc<Task>> = {
            let tasks = self.tasks.read().await;
            CredentialType::ALL
                .iter()
                .filter_map(|typ| tasks.get(typ).cloned())
                .collect()
        };

        for task in ordered {
            task.start().await;
        }
    }

    /// Stop every task's scheduler.
    pub async fn stop_all(&self) {
        for task in self.tasks.read().await.values() {
            task.stop();
        }
    }
}

/// Process-wide tenant map plus the shared collaborators every tenant
/// needs. Safe for concurrent registration and query.
pub struct Registry {
    tenants: RwLock<HashMap<String, Arc<Tenant>>>,
    backend: StoreBackend,
    catalog: Arc<Catalog>,
    client: Client,
}

impl Registry {
    pub fn new(backend: StoreBackend, catalog: Catalog) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            tenants: RwLock::new(HashMap::new()),
            backend,
            catalog: Arc::new(catalog),
            client,
        }
    }

    /// Create or update a tenant. Re-registration swaps the secret in place
    /// and keeps the existing task map, so credential rotation never loses
    /// schedule state.
    pub async fn register_tenant(
        &self,
        app_id: &str,
        secret: &str,
    ) -> Result<Arc<Tenant>, RefreshError> {
        if app_id.is_empty() || secret.is_empty() {
            return Err(RefreshError::Validation(
                "appid and appsecret must not be empty".to_owned(),
            ));
        }

        let mut tenants = self.tenants.write().await;
        if let Some(existing) = tenants.get(app_id) {
            existing.set_secret(secret).await;
            existing.store.set("appid", app_id);
            existing.store.set("appsecret", secret);
            debug!(app_id, "tenant re-registered, secret updated");
            return Ok(existing.clone());
        }

        let store = self.backend.open(app_id);
        store.set("appid", app_id);
        store.set("appsecret", secret);

        let tenant = Tenant::new(
            app_id,
            secret,
            store,
            self.client.clone(),
            Arc::clone(&self.catalog),
        );
        tenants.insert(app_id.to_owned(), tenant.clone());
        info!(app_id, "tenant registered");
        Ok(tenant)
    }

    pub async fn tenant(&self, app_id: &str) -> Option<Arc<Tenant>> {
        self.tenants.read().await.get(app_id).cloned()
    }

    /// Rebuild all tenants and tasks from the persistence layer and start
    /// them. One bad tenant or task field logs and skips; recovery of the
    /// rest continues.
    pub async fn recover(&self) {
        let ids = self.backend.list();
        if ids.is_empty() {
            info!("no persisted tenants to recover");
            return;
        }

        info!(tenants = ids.len(), "recovering persisted tenants");
        for app_id in ids {
            let store = self.backend.open(&app_id);

            let secret = match store.get("appsecret") {
                Some(secret) if !secret.is_empty() => secret,
                _ => {
                    warn!(%app_id, "persisted tenant has no appsecret, skipping");
                    continue;
                }
            };

            let tenant = match self.register_tenant(&app_id, &secret).await {
                Ok(tenant) => tenant,
                Err(err) => {
                    warn!(%app_id, %err, "recovering tenant failed, skipping");
                    continue;
                }
            };

            let tasklist = store.get("tasklist").unwrap_or_default();
            for code_raw in tasklist.split(',').filter(|s| !s.is_empty()) {
                let typ = match code_raw.parse::<i64>().ok().and_then(CredentialType::from_code) {
                    Some(typ) => typ,
                    None => {
                        warn!(%app_id, code = code_raw, "unknown task type in tasklist, skipping");
                        continue;
                    }
                };

                let dyn_addr = store.get(&format!("dyn-{}", typ.code()));
                let cb_addr = store.get(&format!("cb-{}", typ.code()));
                let (dyn_addr, cb_addr) = match (dyn_addr, cb_addr) {
                    (Some(d), Some(c)) => (d, c),
                    _ => {
                        warn!(%app_id, typ = typ.code(), "task addresses missing, skipping");
                        continue;
                    }
                };

                let task = tenant.register_task(typ, &dyn_addr, &cb_addr).await;

                let prefix = format!("task-{}", typ.code());
                let persisted = (
                    store.get(&format!("{prefix}-result")),
                    store.get(&format!("{prefix}-value")),
                    store.get(&format!("{prefix}-lasttime")),
                );
                match persisted {
                    (Some(result), Some(value), Some(lasttime)) => {
                        if let Err(err) = task.restore(&result, &value, &lasttime).await {
                            warn!(%app_id, typ = typ.code(), %err, "restoring task state failed");
                        }
                    }
                    _ => {
                        debug!(%app_id, typ = typ.code(), "no persisted task state");
                    }
                }
            }

            tenant.run_all().await;
        }
    }
}
