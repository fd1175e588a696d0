//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    let entry_path = state.config.proxy.entry_path.clone();

    Router::new()
        .route(
            &entry_path,
            get(handlers::proxy::proxy).post(handlers::proxy::proxy),
        )
        .route(
            "/robot",
            get(handlers::robot::admin).post(handlers::robot::report),
        )
        .route("/bump", get(handlers::bump::trigger))
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::clock::Clock;
    use crate::models::TenantRecord;
    use crate::test_support::{self, ManualClock, MemoryTenantStore, ScriptedFetcher};

    fn tenant(active: bool) -> TenantRecord {
        let clock = ManualClock::default();
        TenantRecord {
            name: "Alice".to_string(),
            active,
            cookies: Some("sid=1".to_string()),
            cookie_timestamp: Some(
                (clock.now() - chrono::Duration::minutes(90)).timestamp_millis(),
            ),
            ..TenantRecord::default()
        }
    }

    fn app(store: Arc<MemoryTenantStore>, fetcher: Arc<ScriptedFetcher>) -> Router {
        let state = AppState::new(
            test_support::config(),
            store,
            fetcher,
            Arc::new(ManualClock::default()),
        );
        create_router(state)
    }

    fn page_fetcher() -> Arc<ScriptedFetcher> {
        ScriptedFetcher::new(|r| {
            Ok(match r.url.path() {
                "/users/posts" => {
                    test_support::html(&r.url, r#"<a href="/users/posts/bump/123456">b</a>"#)
                }
                _ => test_support::html(&r.url, "<html><body>ok</body></html>"),
            })
        })
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &str) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(MemoryTenantStore::with([]), page_fetcher());
        let response = send(&app, Method::GET, "/health", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_proxy_route() {
        let store = MemoryTenantStore::with([("alice", tenant(true)), ("bob", tenant(false))]);
        let fetcher = page_fetcher();
        let app = app(store, fetcher.clone());

        let ok = send(
            &app,
            Method::GET,
            "/proxy?u=alice&url=https%3A%2F%2Fsite.example%2Fhome",
            "",
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = send(&app, Method::GET, "/proxy?u=bob&url=https%3A%2F%2Fsite.example%2F", "").await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let missing = send(&app, Method::GET, "/proxy?u=alice", "").await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(missing).await["error"]
            .as_str()
            .unwrap()
            .contains("url"));

        let posted = send(
            &app,
            Method::POST,
            "/proxy?u=alice&url=https%3A%2F%2Fsite.example%2Fsave",
            r#"{"a":1}"#,
        )
        .await;
        assert_eq!(posted.status(), StatusCode::OK);

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, Method::POST);
        assert_eq!(requests[1].content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_admin_requires_secret() {
        let app = app(MemoryTenantStore::with([("alice", tenant(true))]), page_fetcher());

        for uri in ["/robot?action=status", "/robot?admin=wrong&action=status"] {
            let response = send(&app, Method::GET, uri, "").await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }

        let unknown = send(&app, Method::GET, "/robot?admin=admin-secret&action=reboot", "").await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_status() {
        let store = MemoryTenantStore::with([("alice", tenant(true)), ("bob", tenant(false))]);
        let app = app(store, page_fetcher());

        let response = send(&app, Method::GET, "/robot?admin=admin-secret&action=status", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["tenants"][0],
            json!({
                "id": "alice",
                "name": "Alice",
                "active": true,
                "robotOn": true,
                "robotPaused": false,
                "eligibility": "eligible",
                "cookieAgeHours": 1.5
            })
        );
        assert_eq!(body["tenants"][1]["eligibility"], "inactive");
    }

    #[tokio::test]
    async fn test_admin_pause_and_resume() {
        let store = MemoryTenantStore::with([("alice", tenant(true)), ("bob", tenant(true))]);
        let app = app(store.clone(), page_fetcher());

        let no_user = send(&app, Method::GET, "/robot?admin=admin-secret&action=pause", "").await;
        assert_eq!(no_user.status(), StatusCode::BAD_REQUEST);

        let ghost = send(
            &app,
            Method::GET,
            "/robot?admin=admin-secret&action=pause&user=ghost",
            "",
        )
        .await;
        assert_eq!(ghost.status(), StatusCode::NOT_FOUND);

        for _ in 0..2 {
            let response = send(
                &app,
                Method::GET,
                "/robot?admin=admin-secret&action=pause&user=alice",
                "",
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(store.get("alice").unwrap().robot_paused, Some(true));
        assert_eq!(store.get("bob").unwrap().robot_paused, None);

        let response = send(&app, Method::GET, "/robot?admin=admin-secret&action=resumeAll", "").await;
        assert_eq!(json_body(response).await["updated"], 2);
        assert_eq!(store.get("alice").unwrap().robot_paused, Some(false));
        assert_eq!(store.get("bob").unwrap().robot_paused, Some(false));
    }

    #[tokio::test]
    async fn test_self_report() {
        let store = MemoryTenantStore::with([("alice", tenant(true))]);
        let app = app(store.clone(), page_fetcher());

        let response = send(&app, Method::POST, "/robot?u=alice", r#"{"robotOn":false}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        let alice = store.get("alice").unwrap();
        assert_eq!(alice.robot_on, Some(false));
        assert_eq!(alice.robot_paused, None);

        let unknown = send(&app, Method::POST, "/robot?u=ghost", r#"{"robotOn":true}"#).await;
        assert_eq!(unknown.status(), StatusCode::FORBIDDEN);

        let missing = send(&app, Method::POST, "/robot", r#"{"robotOn":true}"#).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let garbage = send(&app, Method::POST, "/robot?u=alice", "not json").await;
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bump_trigger() {
        let store = MemoryTenantStore::with([("alice", tenant(true)), ("bob", tenant(false))]);
        let app = app(store, page_fetcher());

        let denied = send(&app, Method::GET, "/bump?secret=nope", "").await;
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, Method::GET, "/bump?secret=bump-secret", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["timestamp"].is_string());
        assert!(body.get("error").is_none());
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["kind"], "bumped");
        assert_eq!(body["results"][0]["bumped"], 1);
    }

    #[tokio::test]
    async fn test_bump_trigger_run_failure() {
        let store = MemoryTenantStore::with([("alice", tenant(true))]);
        store.fail_reads();
        let app = app(store, page_fetcher());

        let response = send(&app, Method::GET, "/bump?secret=bump-secret", "").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("store unavailable"));
        assert_eq!(body["results"], json!([]));
    }
}
