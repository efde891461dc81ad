// End-to-end refresh flows against mock credential endpoints: register over
// HTTP, let the scheduler tick, and read values back through the query API.

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::time::sleep;

    use crate::catalog::{Catalog, CredentialType};
    use crate::registry::Registry;
    use crate::scheduler::Status;
    use crate::server;
    use crate::store::StoreBackend;
    use crate::tests::common::{build_reqwest_client, spawn_axum};

    async fn spawn_app(catalog: Catalog) -> (Arc<Registry>, SocketAddr) {
        let registry = Arc::new(Registry::new(StoreBackend::memory(), catalog));
        let (_handle, addr) = spawn_axum(server::router(registry.clone())).await;
        (registry, addr)
    }

    /// Poll the query endpoint until it returns a value or attempts run out.
    async fn poll_value(app: SocketAddr, appid: &str, typ: i64) -> Option<String> {
        let client = build_reqwest_client();
        for _ in 0..100 {
            let resp = client
                .get(format!("http://{app}/task/{appid}/{typ}"))
                .send()
                .await
                .expect("query request");
            let body: Value = resp.json().await.expect("query envelope");
            if body["code"] == 200 {
                return body["result"].as_str().map(str::to_owned);
            }
            sleep(Duration::from_millis(50)).await;
        }
        None
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn primary_token_registration_to_query() {
        let issuer = Router::new().route(
            "/cgi-bin/token",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("appid").map(String::as_str), Some("wx1"));
                assert_eq!(q.get("secret").map(String::as_str), Some("s1"));
                Json(json!({"access_token": "AT1", "expires_in": 7200}))
            }),
        );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        let client = build_reqwest_client();
        let resp = client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 0, "notify": "", "params": ""}]
            }))
            .send()
            .await
            .expect("register request");
        let body: Value = resp.json().await.expect("register envelope");
        assert_eq!(body["code"], 200);

        assert_eq!(poll_value(app, "wx1", 0).await.as_deref(), Some("AT1"));

        // The refresh persisted its state before the value became queryable.
        let tenant = registry.tenant("wx1").await.unwrap();
        assert_eq!(tenant.store.get("task-0-value"), Some("AT1".to_owned()));
        assert!(tenant.store.get("task-0-lasttime").is_some());
        tenant.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jsapi_without_dependency_keeps_failing_and_returns_no_value() {
        // The ticket endpoint exists but must never be reached: the task has
        // no sibling primary-token task and no supplier.
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let issuer = Router::new().route(
            "/cgi-bin/ticket/getticket",
            get(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                async { Json(json!({"errcode": 0, "ticket": "T"})) }
            }),
        );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        let client = build_reqwest_client();
        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 2}]
            }))
            .send()
            .await
            .expect("register request");

        // Give the first attempt time to fail.
        sleep(Duration::from_millis(300)).await;

        let resp = client
            .get(format!("http://{app}/task/wx1/2"))
            .send()
            .await
            .expect("query request");
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 404);
        assert_eq!(body["result"], Value::Null);

        // Still retrying (missing dependency counts as an attempt failure,
        // not a terminal one), and the endpoint was never called.
        let tenant = registry.tenant("wx1").await.unwrap();
        let task = tenant.task(CredentialType::JsApiTicket).await.unwrap();
        assert_eq!(task.scheduler_status(), Status::Running);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tenant.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jsapi_falls_back_to_the_supplier_and_notifies_the_callback() {
        let issuer = Router::new().route(
            "/cgi-bin/ticket/getticket",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("access_token").map(String::as_str), Some("SUP-AT"));
                Json(json!({"errcode": 0, "errmsg": "ok", "ticket": "TICKET1"}))
            }),
        );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let supplier = Router::new().route(
            "/params",
            get(|| async { Json(json!({"access_token": "SUP-AT"})) }),
        );
        let (_h, supplier_addr) = spawn_axum(supplier).await;

        let delivered: Arc<Mutex<Option<(HashMap<String, String>, Value)>>> =
            Arc::new(Mutex::new(None));
        let delivered_clone = delivered.clone();
        let callback = Router::new().route(
            "/notify",
            post(
                move |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| {
                    *delivered_clone.lock().unwrap() = Some((q, body));
                    async { "ok" }
                },
            ),
        );
        let (_h, callback_addr) = spawn_axum(callback).await;

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        let client = build_reqwest_client();
        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{
                    "type": 2,
                    "params": format!("http://{supplier_addr}/params"),
                    "notify": format!("http://{callback_addr}/notify"),
                }]
            }))
            .send()
            .await
            .expect("register request");

        assert_eq!(poll_value(app, "wx1", 2).await.as_deref(), Some("TICKET1"));

        // Callback carries (appid, type) and the full refresh result.
        for _ in 0..100 {
            if delivered.lock().unwrap().is_some() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        let (query, body) = delivered.lock().unwrap().take().expect("callback delivered");
        assert_eq!(query.get("appid").map(String::as_str), Some("wx1"));
        assert_eq!(query.get("type").map(String::as_str), Some("2"));
        assert_eq!(body["ticket"], "TICKET1");

        // Persisted before the callback fired.
        let tenant = registry.tenant("wx1").await.unwrap();
        assert_eq!(tenant.store.get("task-2-value"), Some("TICKET1".to_owned()));
        tenant.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn web_oauth_prefers_the_prior_refresh_token_over_the_supplier() {
        // The issuer records every refresh token it is handed and rotates it
        // in each response.
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let issuer = Router::new().route(
            "/sns/oauth2/refresh_token",
            get(move |Query(q): Query<HashMap<String, String>>| {
                assert_eq!(q.get("appid").map(String::as_str), Some("wx1"));
                assert_eq!(
                    q.get("grant_type").map(String::as_str),
                    Some("refresh_token")
                );
                let n = {
                    let mut seen = seen_clone.lock().unwrap();
                    seen.push(q.get("refresh_token").cloned().unwrap_or_default());
                    seen.len()
                };
                async move {
                    Json(json!({
                        "access_token": format!("WAT{n}"),
                        "refresh_token": format!("RT{n}"),
                        "expires_in": 7200
                    }))
                }
            }),
        );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let supplier = Router::new().route(
            "/params",
            get(|| async { Json(json!({"refresh_token": "RT-SUP"})) }),
        );
        let (_h, supplier_addr) = spawn_axum(supplier).await;

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        let client = build_reqwest_client();
        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 1, "params": format!("http://{supplier_addr}/params")}]
            }))
            .send()
            .await
            .expect("register request");

        // The first attempt has no prior result, so the supplier's token is
        // the fallback source.
        assert_eq!(poll_value(app, "wx1", 1).await.as_deref(), Some("WAT1"));
        assert_eq!(seen.lock().unwrap().join(","), "RT-SUP");

        // A later attempt carries the rotated token from its own prior
        // result even though the supplier is still registered.
        let tenant = registry.tenant("wx1").await.unwrap();
        let task = tenant.task(CredentialType::WebOauthToken).await.unwrap();
        task.refresh().await.expect("second refresh");

        assert_eq!(task.value().await, "WAT2");
        assert_eq!(seen.lock().unwrap().join(","), "RT-SUP,RT1");
        tenant.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nonzero_errcode_counts_as_a_failed_attempt() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let issuer = Router::new().route(
            "/cgi-bin/token",
            get(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                async { Json(json!({"errcode": 40001, "errmsg": "invalid secret"})) }
            }),
        );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        let client = build_reqwest_client();
        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 0}]
            }))
            .send()
            .await
            .expect("register request");

        // One attempt happens, fails on the envelope, and the task enters
        // its cool-down with no value to serve.
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) >= 1 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        sleep(Duration::from_millis(100)).await;

        let resp = client
            .get(format!("http://{app}/task/wx1/0"))
            .send()
            .await
            .expect("query request");
        assert_eq!(resp.status(), 404);

        let tenant = registry.tenant("wx1").await.unwrap();
        let task = tenant.task(CredentialType::PrimaryToken).await.unwrap();
        assert_eq!(task.scheduler_status(), Status::Running);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tenant.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn authorizer_token_reads_the_sibling_component_value() {
        let component_query: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let component_query_clone = component_query.clone();

        let issuer = Router::new()
            .route(
                "/cgi-bin/component/api_component_token",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["component_appid"], "wx1");
                    assert_eq!(body["component_verify_ticket"], "VT1");
                    Json(json!({"component_access_token": "CAT1", "expires_in": 7200}))
                }),
            )
            .route(
                "/cgi-bin/component/api_authorizer_token",
                post(
                    move |Query(q): Query<HashMap<String, String>>, Json(body): Json<Value>| {
                        *component_query_clone.lock().unwrap() =
                            q.get("component_access_token").cloned();
                        async move {
                            assert_eq!(body["authorizer_appid"], "wxa");
                            assert_eq!(body["authorizer_refresh_token"], "ART1");
                            Json(json!({
                                "authorizer_access_token": "AAT1",
                                "authorizer_refresh_token": "ART2",
                                "expires_in": 7200
                            }))
                        }
                    },
                ),
            );
        let (_h, issuer_addr) = spawn_axum(issuer).await;

        let supplier = Router::new().route(
            "/params",
            get(|| async {
                Json(json!({
                    "component_verify_ticket": "VT1",
                    "authorizer_appid": "wxa",
                    "authorizer_refresh_token": "ART1"
                }))
            }),
        );
        let (_h, supplier_addr) = spawn_axum(supplier).await;
        let supplier_url = format!("http://{supplier_addr}/params");

        let (registry, app) = spawn_app(Catalog::new(&format!("http://{issuer_addr}"))).await;

        // Register the component-token task first and wait for its value, so
        // the authorizer task's first attempt can rely on the sibling.
        let client = build_reqwest_client();
        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 3, "params": supplier_url}]
            }))
            .send()
            .await
            .expect("register component task");
        assert_eq!(poll_value(app, "wx1", 3).await.as_deref(), Some("CAT1"));

        client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 4, "params": supplier_url}]
            }))
            .send()
            .await
            .expect("register authorizer task");
        assert_eq!(poll_value(app, "wx1", 4).await.as_deref(), Some("AAT1"));

        // The component access token came from the sibling task's value.
        assert_eq!(
            component_query.lock().unwrap().as_deref(),
            Some("CAT1")
        );

        let tenant = registry.tenant("wx1").await.unwrap();
        assert_eq!(tenant.store.get("tasklist"), Some("3,4".to_owned()));
        tenant.stop_all().await;
    }
}
