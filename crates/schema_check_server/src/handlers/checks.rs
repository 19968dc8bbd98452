//! Check, publish and delete endpoints, plus read-back and operator override.
//!
//! Every handler returns the full `CheckReport`; a failed verdict is a
//! successful request (200) whose body says why. Only input, lookup and
//! infrastructure failures map to error statuses.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use schema_check_core::audit::CheckReport;
use schema_check_core::orchestrator::{
    CheckService, DeleteSubgraphRequest, ForceSuccessRequest, SchemaChangeRequest,
};
use schema_check_core::principal::Principal;
use uuid::Uuid;

use crate::error::AppError;

/// POST /checks
pub async fn check(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn CheckService>>,
    Json(req): Json<SchemaChangeRequest>,
) -> Result<Json<CheckReport>, AppError> {
    Ok(Json(service.check(&principal, req).await?))
}

/// POST /publish
pub async fn publish(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn CheckService>>,
    Json(req): Json<SchemaChangeRequest>,
) -> Result<Json<CheckReport>, AppError> {
    Ok(Json(service.publish(&principal, req).await?))
}

/// POST /delete
pub async fn delete(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn CheckService>>,
    Json(req): Json<DeleteSubgraphRequest>,
) -> Result<Json<CheckReport>, AppError> {
    Ok(Json(service.delete(&principal, req).await?))
}

/// GET /checks/:id
pub async fn get_check(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn CheckService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckReport>, AppError> {
    Ok(Json(service.get_check(&principal, id).await?))
}

/// POST /checks/:id/force-success
pub async fn force_success(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn CheckService>>,
    Path(id): Path<Uuid>,
    body: Option<Json<ForceSuccessRequest>>,
) -> Result<Json<CheckReport>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(
        service.force_check_success(&principal, id, reason).await?,
    ))
}
