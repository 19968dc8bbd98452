//! Caller identity. Authentication happens at the gateway, which forwards the
//! actor and organization as headers.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use schema_check_core::principal::Principal;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Resolve the `Principal` from headers and attach it as a request extension.
/// Missing or malformed identity is rejected with 401.
pub async fn identity(mut req: Request, next: Next) -> Response {
    let resolved = {
        let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
        Principal::from_headers(header(ACTOR_HEADER), header(ORGANIZATION_HEADER))
    };
    let principal = match resolved {
        Ok(p) => p,
        Err(e) => {
            let body = serde_json::json!({ "error": e.to_string(), "retryable": false });
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    };
    tracing::debug!(actor = %principal.actor_id, org = %principal.organization_id, "caller identified");
    req.extensions_mut().insert(principal);
    next.run(req).await
}
