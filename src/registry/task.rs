use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::catalog::{CredentialType, Descriptor};
use crate::error::RefreshError;
use crate::registry::refresh::RefreshStrategy;
use crate::registry::Tenant;
use crate::remote::{Callback, JsonMap, Supplier};
use crate::scheduler::{recovery_delay, RefreshFn, Scheduler, Status};

/// Fixed format for the persisted `lasttime` field (second precision).
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Mutable refresh state, written by the scheduler line and read by the
/// query path and by sibling tasks resolving dependencies.
#[derive(Debug, Default)]
pub struct TaskState {
    /// Raw decoded response of the last successful refresh.
    pub result: JsonMap,
    /// The extracted credential string.
    pub value: String,
    pub last_refreshed: Option<DateTime<Local>>,
}

/// Externally registered hooks, rebindable on re-registration.
struct Hooks {
    supplier: Supplier,
    callback: Callback,
}

/// One credential-refresh unit for one (tenant, type) pair. Identity is the
/// pair itself: re-registration rebinds hooks on the existing instance.
pub struct Task {
    typ: CredentialType,
    descriptor: Descriptor,
    strategy: RefreshStrategy,
    interval: Duration,
    hooks: RwLock<Hooks>,
    pub state: RwLock<TaskState>,
    scheduler: Scheduler,
    tenant: Weak<Tenant>,
}

impl Task {
    pub fn new(
        typ: CredentialType,
        descriptor: Descriptor,
        interval: Duration,
        supplier: Supplier,
        callback: Callback,
        tenant: &Arc<Tenant>,
    ) -> Arc<Self> {
        Arc::new(Self {
            typ,
            strategy: RefreshStrategy::for_type(typ),
            interval,
            hooks: RwLock::new(Hooks { supplier, callback }),
            state: RwLock::new(TaskState::default()),
            scheduler: Scheduler::new(&tenant.app_id, descriptor.name, interval),
            descriptor,
            tenant: Arc::downgrade(tenant),
        })
    }

    pub fn typ(&self) -> CredentialType {
        self.typ
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn scheduler_status(&self) -> Status {
        self.scheduler.status()
    }

    pub async fn supplier(&self) -> Supplier {
        self.hooks.read().await.supplier.clone()
    }

    pub async fn value(&self) -> String {
        self.state.read().await.value.clone()
    }

    /// Swap the supplier/callback pair in place.
    pub async fn rebind(&self, supplier: Supplier, callback: Callback) {
        let mut hooks = self.hooks.write().await;
        hooks.supplier = supplier;
        hooks.callback = callback;
    }

    /// Start the recurring refresh, waiting out the remainder of the
    /// interval when a recent persisted timestamp says the value is fresh.
    pub async fn start(self: &Arc<Self>) {
        let delay = match self.state.read().await.last_refreshed {
            Some(last) => {
                let elapsed = (Local::now() - last).num_seconds();
                recovery_delay(self.interval, elapsed)
            }
            None => Duration::ZERO,
        };

        let weak = Arc::downgrade(self);
        let refresh: RefreshFn = Arc::new(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(task) => task.refresh().await,
                    None => Err(RefreshError::Validation("task no longer exists".to_owned())),
                }
            }
            .boxed()
        });

        self.scheduler.start(delay, refresh);
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// One refresh attempt: gather parameters, call the endpoint, extract
    /// the credential, update state, persist, then notify the callback.
    /// State is persisted before the callback fires, so a crash cannot
    /// deliver a callback for a value that was never saved.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let tenant = self
            .tenant
            .upgrade()
            .ok_or_else(|| RefreshError::Validation("owning tenant dropped".to_owned()))?;

        let (result, value) = self.strategy.execute(self, &tenant).await?;

        {
            let mut state = self.state.write().await;
            state.result = result.clone();
            state.value = value;
            state.last_refreshed = Some(Local::now());
        }

        self.save(&tenant).await;

        let callback = self.hooks.read().await.callback.clone();
        callback
            .notify(&tenant.client, &tenant.app_id, self.typ, &result)
            .await;

        Ok(())
    }

    /// Persist the current state under the `task-<type>-*` keys.
    pub async fn save(&self, tenant: &Tenant) {
        let prefix = format!("task-{}", self.typ.code());
        let state = self.state.read().await;

        if let Some(last) = state.last_refreshed {
            tenant
                .store
                .set(&format!("{prefix}-lasttime"), &last.format(TIME_FORMAT).to_string());
        }

        match serde_json::to_string(&Value::Object(state.result.clone())) {
            Ok(raw) => tenant.store.set(&format!("{prefix}-result"), &raw),
            Err(err) => warn!(
                app_id = %tenant.app_id,
                typ = self.typ.code(),
                %err,
                "encoding task result for persistence failed"
            ),
        }

        tenant.store.set(&format!("{prefix}-value"), &state.value);
    }

    /// Rebuild state from the three persisted fields. All-or-nothing: a
    /// field that fails to parse leaves the state untouched.
    pub async fn restore(&self, result: &str, value: &str, lasttime: &str) -> Result<()> {
        let parsed: JsonMap = serde_json::from_str(result)?;
        let last = parse_local(lasttime)?;

        let mut state = self.state.write().await;
        state.result = parsed;
        state.value = value.to_owned();
        state.last_refreshed = Some(last);
        Ok(())
    }
}

fn parse_local(raw: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIME_FORMAT)?;
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Ok(t),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest),
        LocalResult::None => Err(anyhow!("timestamp {raw} does not exist in the local zone")),
    }
}
