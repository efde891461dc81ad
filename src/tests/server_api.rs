// API boundary contract: envelope shape, validation ordering (first failure
// terminates the request before anything is registered), and query errors.

#[cfg(test)]
mod test {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use crate::catalog::Catalog;
    use crate::registry::Registry;
    use crate::server;
    use crate::store::StoreBackend;
    use crate::tests::common::{build_reqwest_client, spawn_axum};

    async fn spawn_app() -> (Arc<Registry>, SocketAddr) {
        let registry = Arc::new(Registry::new(StoreBackend::memory(), Catalog::default()));
        let (_handle, addr) = spawn_axum(server::router(registry.clone())).await;
        (registry, addr)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_credentials_are_rejected() {
        let (_registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        let resp = client
            .post(format!("http://{app}/register"))
            .json(&json!({"appid": "wx1", "appsecret": ""}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 400);
        assert!(body["message"].as_str().unwrap().contains("appsecret"));
        assert_eq!(body["result"], Value::Null);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_json_yields_the_error_envelope() {
        let (_registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        let resp = client
            .post(format!("http://{app}/register"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_task_type_aborts_the_whole_registration() {
        let (registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        let resp = client
            .post(format!("http://{app}/register"))
            .json(&json!({
                "appid": "wx1",
                "appsecret": "s1",
                "tasks": [{"type": 0}, {"type": 9}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: Value = resp.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("9"));

        // First failure wins: nothing was registered, not even the valid
        // leading task or the tenant itself.
        assert!(registry.tenant("wx1").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tenant_registration_without_tasks_is_allowed() {
        let (registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        let resp = client
            .post(format!("http://{app}/register"))
            .json(&json!({"appid": "wx1", "appsecret": "s1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(registry.tenant("wx1").await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_numeric_task_type_still_gets_the_envelope() {
        let (_registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        let resp = client
            .get(format!("http://{app}/task/wx1/abc"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 400);
        assert!(body["message"].as_str().unwrap().contains("abc"));
        assert_eq!(body["result"], Value::Null);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_errors_name_the_missing_piece() {
        let (registry, app) = spawn_app().await;
        let client = build_reqwest_client();

        // Unknown tenant.
        let resp = client
            .get(format!("http://{app}/task/ghost/0"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("appid"));

        // Known tenant, out-of-range type.
        registry.register_tenant("wx1", "s1").await.unwrap();
        let resp = client
            .get(format!("http://{app}/task/wx1/42"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        // Known tenant, unregistered type.
        let resp = client
            .get(format!("http://{app}/task/wx1/0"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["message"].as_str().unwrap().contains("not registered"));
    }
}
