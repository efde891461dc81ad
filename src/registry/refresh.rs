//! Per-type refresh algorithms. Every type follows the same shape — gather
//! parameters, call the endpoint, validate the envelope, extract the
//! credential — but each sources its parameters differently (tenant
//! credentials, a sibling task's value, the prior result, or the external
//! dynamic-params supplier).

use serde_json::{json, Value};

use crate::catalog::CredentialType;
use crate::error::RefreshError;
use crate::registry::task::Task;
use crate::registry::Tenant;
use crate::remote::{call, check_envelope, JsonMap};

/// Refresh algorithm, chosen once at task construction.
#[derive(Debug, Clone, Copy)]
pub enum RefreshStrategy {
    PrimaryToken,
    WebOauthToken,
    JsApiTicket,
    ComponentToken,
    AuthorizerToken,
}

impl RefreshStrategy {
    pub fn for_type(typ: CredentialType) -> Self {
        match typ {
            CredentialType::PrimaryToken => RefreshStrategy::PrimaryToken,
            CredentialType::WebOauthToken => RefreshStrategy::WebOauthToken,
            CredentialType::JsApiTicket => RefreshStrategy::JsApiTicket,
            CredentialType::ComponentToken => RefreshStrategy::ComponentToken,
            CredentialType::AuthorizerToken => RefreshStrategy::AuthorizerToken,
        }
    }

    /// Run one attempt, returning the decoded response and the extracted
    /// credential string.
    pub async fn execute(
        &self,
        task: &Task,
        tenant: &Tenant,
    ) -> Result<(JsonMap, String), RefreshError> {
        match self {
            RefreshStrategy::PrimaryToken => primary_token(task, tenant).await,
            RefreshStrategy::WebOauthToken => web_oauth_token(task, tenant).await,
            RefreshStrategy::JsApiTicket => js_api_ticket(task, tenant).await,
            RefreshStrategy::ComponentToken => component_token(task, tenant).await,
            RefreshStrategy::AuthorizerToken => authorizer_token(task, tenant).await,
        }
    }
}

/// Primary token: everything it needs lives on the tenant itself.
async fn primary_token(task: &Task, tenant: &Tenant) -> Result<(JsonMap, String), RefreshError> {
    let query = [
        ("appid", tenant.app_id.clone()),
        ("secret", tenant.secret().await),
    ];

    let result = call(&tenant.client, task.descriptor(), &query, None).await?;
    check_envelope(&result)?;

    let value = extract(&result, task.typ())?;
    Ok((result, value))
}

/// Web-oauth token: the refresh token comes from the prior result, falling
/// back to the dynamic-params supplier.
async fn web_oauth_token(task: &Task, tenant: &Tenant) -> Result<(JsonMap, String), RefreshError> {
    let mut refresh_token = {
        let state = task.state.read().await;
        field(&state.result, "refresh_token")
    };

    if refresh_token.is_none() {
        let params = task
            .supplier()
            .await
            .fetch(&tenant.client, &tenant.app_id, task.typ())
            .await?;
        refresh_token = field(&params, "refresh_token");
    }

    let refresh_token = refresh_token.ok_or_else(|| {
        RefreshError::DependencyMissing("no refresh_token available".to_owned())
    })?;

    let query = [
        ("appid", tenant.app_id.clone()),
        ("refresh_token", refresh_token),
    ];

    let result = call(&tenant.client, task.descriptor(), &query, None).await?;
    check_envelope(&result)?;

    let value = extract(&result, task.typ())?;
    Ok((result, value))
}

/// Js-api ticket: the access token comes from the sibling primary-token
/// task, falling back to the dynamic-params supplier.
async fn js_api_ticket(task: &Task, tenant: &Tenant) -> Result<(JsonMap, String), RefreshError> {
    let mut access_token = match tenant.task(CredentialType::PrimaryToken).await {
        Some(sibling) => {
            let value = sibling.value().await;
            (!value.is_empty()).then_some(value)
        }
        None => None,
    };

    if access_token.is_none() && !task.supplier().await.is_disabled() {
        let params = task
            .supplier()
            .await
            .fetch(&tenant.client, &tenant.app_id, CredentialType::PrimaryToken)
            .await?;
        access_token = field(&params, "access_token");
    }

    let access_token = access_token.ok_or_else(|| {
        RefreshError::DependencyMissing("no access_token available".to_owned())
    })?;

    let query = [("access_token", access_token)];

    let result = call(&tenant.client, task.descriptor(), &query, None).await?;
    check_envelope(&result)?;

    let value = extract(&result, task.typ())?;
    Ok((result, value))
}

/// Component token: the verify ticket is pushed to the business app out of
/// band, so the supplier is the only source.
async fn component_token(task: &Task, tenant: &Tenant) -> Result<(JsonMap, String), RefreshError> {
    let params = task
        .supplier()
        .await
        .fetch(&tenant.client, &tenant.app_id, task.typ())
        .await?;

    let ticket = field(&params, "component_verify_ticket").ok_or_else(|| {
        RefreshError::DependencyMissing("no component_verify_ticket available".to_owned())
    })?;

    let body = json!({
        "component_appid": tenant.app_id,
        "component_appsecret": tenant.secret().await,
        "component_verify_ticket": ticket,
    });

    let result = call(&tenant.client, task.descriptor(), &[], Some(&body)).await?;
    check_envelope(&result)?;

    let value = extract(&result, task.typ())?;
    Ok((result, value))
}

/// Authorizer token: the widest parameter set — authorizer id and refresh
/// token from the supplier (refresh token also from the prior result), and
/// the component access token from the supplier or the sibling
/// component-token task.
async fn authorizer_token(task: &Task, tenant: &Tenant) -> Result<(JsonMap, String), RefreshError> {
    let params = task
        .supplier()
        .await
        .fetch(&tenant.client, &tenant.app_id, task.typ())
        .await?;

    let authorizer_appid = field(&params, "authorizer_appid").ok_or_else(|| {
        RefreshError::DependencyMissing("no authorizer_appid available".to_owned())
    })?;

    let refresh_token = match field(&params, "authorizer_refresh_token") {
        Some(token) => token,
        None => {
            let state = task.state.read().await;
            field(&state.result, "authorizer_refresh_token").ok_or_else(|| {
                RefreshError::DependencyMissing(
                    "no authorizer_refresh_token available".to_owned(),
                )
            })?
        }
    };

    let component_token = match field(&params, "component_access_token") {
        Some(token) => token,
        None => {
            let sibling = tenant.task(CredentialType::ComponentToken).await;
            let value = match sibling {
                Some(sibling) => sibling.value().await,
                None => String::new(),
            };
            if value.is_empty() {
                return Err(RefreshError::DependencyMissing(
                    "no component_access_token available".to_owned(),
                ));
            }
            value
        }
    };

    let body = json!({
        "component_appid": tenant.app_id,
        "authorizer_appid": authorizer_appid,
        "authorizer_refresh_token": refresh_token,
    });

    let query = [("component_access_token", component_token)];

    let result = call(&tenant.client, task.descriptor(), &query, Some(&body)).await?;
    check_envelope(&result)?;

    let value = extract(&result, task.typ())?;
    Ok((result, value))
}

/// Non-empty string field lookup.
fn field(map: &JsonMap, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// The per-type credential field must be present in a successful response.
fn extract(result: &JsonMap, typ: CredentialType) -> Result<String, RefreshError> {
    field(result, typ.value_field()).ok_or_else(|| {
        RefreshError::RemoteCall(format!(
            "response for {} is missing `{}`",
            typ.name(),
            typ.value_field()
        ))
    })
}
