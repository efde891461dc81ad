use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::Descriptor;
use crate::error::RefreshError;

/// Decoded response body: a flat JSON object.
pub type JsonMap = serde_json::Map<String, Value>;

/// Perform one call against a credential endpoint.
///
/// `query` values are substituted into the descriptor's URL template: only
/// keys already present in the template are replaced, everything else in the
/// template stays as-is. `body` is sent as JSON for non-GET methods.
pub async fn call(
    client: &Client,
    api: &Descriptor,
    query: &[(&str, String)],
    body: Option<&Value>,
) -> Result<JsonMap, RefreshError> {
    let url = apply_query(&api.url, query)
        .map_err(|e| RefreshError::RemoteCall(format!("bad endpoint URL for {}: {e}", api.name)))?;

    debug!(endpoint = api.name, method = %api.method, %url, "remote request");

    let mut request = client.request(api.method.clone(), url);
    if api.method != http::Method::GET {
        if let Some(body) = body {
            request = request.json(body);
        }
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(RefreshError::RemoteCall(format!(
            "{} returned HTTP {}",
            api.name,
            response.status()
        )));
    }

    let result: JsonMap = response
        .json()
        .await
        .map_err(|e| RefreshError::RemoteCall(format!("decoding {} response: {e}", api.name)))?;

    debug!(endpoint = api.name, fields = result.len(), "remote response decoded");
    Ok(result)
}

/// Validate the conventional response envelope: no `errcode` field, or
/// `errcode == 0` (numeric or string), means success.
pub fn check_envelope(result: &JsonMap) -> Result<(), RefreshError> {
    let code = match result.get("errcode") {
        None => return Ok(()),
        Some(code) => code,
    };

    let ok = match code {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        _ => false,
    };

    if ok {
        return Ok(());
    }

    let msg = result
        .get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or_default();
    warn!(%code, msg, "remote endpoint reported an error");
    Err(RefreshError::RemoteCall(format!("errcode {code}: {msg}")))
}

/// Replace template query values by key, preserving unmatched template pairs.
fn apply_query(template: &str, params: &[(&str, String)]) -> anyhow::Result<Url> {
    let mut url = Url::parse(template)?;

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let replaced = params
                .iter()
                .find(|(pk, _)| *pk == k)
                .map(|(_, pv)| pv.clone())
                .unwrap_or_else(|| v.into_owned());
            (k.into_owned(), replaced)
        })
        .collect();

    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(url)
}
