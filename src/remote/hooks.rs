use reqwest::Client;
use tracing::{debug, warn};

use crate::catalog::CredentialType;
use crate::error::RefreshError;
use crate::remote::call::JsonMap;

/// Dynamic-parameters supplier: an external HTTP endpoint that hands a task
/// parameters it cannot derive internally (e.g. a verify ticket pushed to
/// the business app out of band). Registered per task; absent when the
/// registration carried an empty address.
#[derive(Debug, Clone)]
pub enum Supplier {
    Disabled,
    Http { addr: String },
}

impl Supplier {
    pub fn from_addr(addr: &str) -> Self {
        if addr.is_empty() {
            Supplier::Disabled
        } else {
            Supplier::Http {
                addr: addr.to_owned(),
            }
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Supplier::Disabled)
    }

    /// Fetch parameters as a JSON map. A disabled supplier is a missing
    /// dependency, not a remote failure.
    pub async fn fetch(
        &self,
        client: &Client,
        app_id: &str,
        typ: CredentialType,
    ) -> Result<JsonMap, RefreshError> {
        let addr = match self {
            Supplier::Disabled => {
                return Err(RefreshError::DependencyMissing(
                    "no dynamic-params supplier registered".to_owned(),
                ))
            }
            Supplier::Http { addr } => addr,
        };

        debug!(%addr, app_id, typ = typ.code(), "fetching dynamic params");

        let code = typ.code().to_string();
        let response = client
            .get(addr)
            .query(&[("appid", app_id), ("type", code.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RefreshError::RemoteCall(format!(
                "dynamic-params supplier returned HTTP {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| {
            RefreshError::RemoteCall(format!("decoding dynamic-params response: {e}"))
        })
    }
}

/// Success callback: an external HTTP endpoint notified with the refresh
/// result. Fire-and-forget; the response is ignored and errors only logged.
#[derive(Debug, Clone)]
pub enum Callback {
    Disabled,
    Http { addr: String },
}

impl Callback {
    pub fn from_addr(addr: &str) -> Self {
        if addr.is_empty() {
            Callback::Disabled
        } else {
            Callback::Http {
                addr: addr.to_owned(),
            }
        }
    }

    pub async fn notify(
        &self,
        client: &Client,
        app_id: &str,
        typ: CredentialType,
        result: &JsonMap,
    ) {
        let addr = match self {
            Callback::Disabled => return,
            Callback::Http { addr } => addr,
        };

        debug!(%addr, app_id, typ = typ.code(), "delivering refresh callback");

        let code = typ.code().to_string();
        let outcome = client
            .post(addr)
            .query(&[("appid", app_id), ("type", code.as_str())])
            .json(result)
            .send()
            .await;

        if let Err(err) = outcome {
            warn!(%addr, app_id, typ = typ.code(), %err, "refresh callback delivery failed");
        }
    }
}
