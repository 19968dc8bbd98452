//! Router construction for the schema check server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use schema_check_core::orchestrator::CheckService;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::identity;

/// Build the full axum router with all routes and middleware.
pub fn build_router(service: Arc<dyn CheckService>) -> Router {
    // Routes that require a caller identity
    let protected = Router::new()
        .route("/checks", post(handlers::checks::check))
        .route("/checks/:id", get(handlers::checks::get_check))
        .route(
            "/checks/:id/force-success",
            post(handlers::checks::force_success),
        )
        .route("/publish", post(handlers::checks::publish))
        .route("/delete", post(handlers::checks::delete))
        .layer(axum_mw::from_fn(identity));

    // Public routes (no identity)
    let public = Router::new().route("/health", get(handlers::health::health));

    public
        .merge(protected)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use hyper::{Request, StatusCode};
    use schema_check_core::config::EngineConfig;
    use schema_check_core::labels::{parse_labels, LabelMatcher};
    use schema_check_core::memory::MemoryStore;
    use schema_check_core::orchestrator::CheckServiceImpl;
    use schema_check_core::types::{FederatedGraph, Namespace, NamespaceSettings, Subgraph};
    use tower::ServiceExt;
    use uuid::Uuid;

    const PRODUCTS: &str = r#"
        type Product @key(fields: "upc") {
          upc: String!
          name: String
        }
        type Query { topProducts: [Product] }
    "#;

    const REVIEWS: &str = r#"
        type Review {
          id: ID!
          body: String
        }
        type Query { reviews: [Review] }
    "#;

    struct TestApp {
        app: Router,
        org: Uuid,
    }

    async fn test_app() -> TestApp {
        let org = Uuid::new_v4();
        let store = MemoryStore::new();
        let namespace = Namespace {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "default".into(),
            settings: NamespaceSettings::default(),
        };
        store.add_namespace(namespace.clone()).await;
        store
            .add_federated_graph(FederatedGraph {
                id: Uuid::new_v4(),
                namespace_id: namespace.id,
                name: "prod".into(),
                routing_url: "http://router/graphql".into(),
                label_matchers: vec![LabelMatcher::parse("team=core").unwrap()],
            })
            .await;
        store
            .add_subgraph(Subgraph {
                id: Uuid::new_v4(),
                namespace_id: namespace.id,
                name: "products".into(),
                routing_url: "http://products".into(),
                subscription_url: None,
                subscription_protocol: None,
                labels: parse_labels(&["team=core"]).unwrap(),
                sdl: Some(PRODUCTS.into()),
                base_subgraph_id: None,
            })
            .await;

        let service: Arc<dyn CheckService> = Arc::new(CheckServiceImpl::new(
            Arc::new(store.clone()),
            Arc::new(store),
            EngineConfig::default(),
        ));
        TestApp {
            app: build_router(service),
            org,
        }
    }

    fn post_json(uri: &str, org: Uuid, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-actor-id", "alice")
            .header("x-organization-id", org.to_string())
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn reviews_body(sdl: &str) -> serde_json::Value {
        serde_json::json!({
            "namespace": "default",
            "subgraph_name": "reviews",
            "schema_sdl": sdl,
            "labels": ["team=core"],
            "routing_url": "http://reviews",
        })
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap_or_else(
            |_| serde_json::json!({ "raw": String::from_utf8_lossy(&bytes).to_string() }),
        )
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let t = test_app().await;
        let resp = t
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn check_requires_identity() {
        let t = test_app().await;
        let resp = t
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/checks")
                    .header("content-type", "application/json")
                    .body(Body::from(reviews_body(REVIEWS).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn check_then_read_back() {
        let t = test_app().await;
        let resp = t
            .app
            .clone()
            .oneshot(post_json("/checks", t.org, reviews_body(REVIEWS)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["verdict"], "success");
        assert_eq!(body["targets"][0]["target_name"], "prod");
        assert_eq!(body["targets"][0]["is_composable"], true);

        let id = body["operation_id"].as_str().unwrap();
        let resp = t
            .app
            .oneshot(
                Request::builder()
                    .uri(format!("/checks/{id}"))
                    .header("x-actor-id", "alice")
                    .header("x-organization-id", t.org.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["operation_id"], id);
    }

    #[tokio::test]
    async fn failed_composition_is_a_200_with_verdict() {
        let t = test_app().await;
        let sdl = "type Product @key(fields: \"upc\") { upc: Int! } type Query { x: Int }";
        let resp = t
            .app
            .oneshot(post_json("/publish", t.org, reviews_body(sdl)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["verdict"], "not_composable");
        assert!(body["activated_version_ids"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_namespace_is_404() {
        let t = test_app().await;
        let mut body = reviews_body(REVIEWS);
        body["namespace"] = "missing".into();
        let resp = t
            .app
            .oneshot(post_json("/checks", t.org, body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["retryable"], false);
    }

    #[tokio::test]
    async fn empty_sdl_is_400() {
        let t = test_app().await;
        let resp = t
            .app
            .oneshot(post_json("/checks", t.org, reviews_body("  ")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_unknown_subgraph_is_404() {
        let t = test_app().await;
        let resp = t
            .app
            .oneshot(post_json(
                "/delete",
                t.org,
                serde_json::json!({ "namespace": "default", "subgraph_name": "nope" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn force_success_rejects_publish() {
        let t = test_app().await;
        let resp = t
            .app
            .clone()
            .oneshot(post_json("/publish", t.org, reviews_body(REVIEWS)))
            .await
            .unwrap();
        let id = body_json(resp).await["operation_id"]
            .as_str()
            .unwrap()
            .to_string();
        let resp = t
            .app
            .oneshot(post_json(
                &format!("/checks/{id}/force-success"),
                t.org,
                serde_json::json!({ "reason": "ship it" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
