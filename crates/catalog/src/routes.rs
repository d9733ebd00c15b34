//! HTTP surface
//!
//! Guards run as middleware, outermost first: credential check and
//! app-mode guard, record resolution, then the access gate for the
//! permission each method needs. Handlers own their unit of work.

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_mode::{check_app_mode, AuthMode};
use crate::attributes::reconcile::as_pairs;
use crate::attributes::{AttributeMatcher, AttributePair, Reconciler, Reconciliation};
use crate::context::{ObjectHead, ObjectResolver, RequestContext};
use crate::database::{settle, Database};
use crate::entity::{object_permission, version};
use crate::error::{CatalogError, GateError, Result};
use crate::gate::AccessGate;
use crate::identity::{IdentityVerifier, RequestIdentity};
use crate::permissions::{Permission, PermissionFilter, PermissionStore, StoredGrants};

const TAGGING_PATH: &str = "/object/:object_id/version/:version_id/tagging";
const METADATA_PATH: &str = "/object/:object_id/version/:version_id/metadata";
const PERMISSION_PATH: &str = "/permission/object/:object_id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub auth_mode: AuthMode,
    pub verifier: IdentityVerifier,
    pub gate: AccessGate,
    pub resolver: ObjectResolver,
    pub permissions: PermissionStore,
}

impl AppState {
    pub fn new(
        db: Database,
        auth_mode: AuthMode,
        verifier: IdentityVerifier,
        storage: Option<Arc<dyn ObjectHead>>,
    ) -> Self {
        let connection = db.connection().clone();
        let gate = AccessGate::new(
            auth_mode.enforcement(),
            Arc::new(StoredGrants::new(connection.clone())),
        );
        Self {
            resolver: ObjectResolver::new(connection, storage),
            db,
            auth_mode,
            verifier,
            gate,
            permissions: PermissionStore,
        }
    }
}

/// Access gate bound to the permission one route needs
#[derive(Clone)]
struct PermissionGuard {
    gate: AccessGate,
    permission: Permission,
}

impl PermissionGuard {
    fn new(state: &AppState, permission: Permission) -> Self {
        Self {
            gate: state.gate.clone(),
            permission,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let tagging = attribute_routes(&state, TAGGING_PATH, Reconciler::tags());
    let metadata = attribute_routes(&state, METADATA_PATH, Reconciler::metadata());

    let permissions = Router::new()
        .route(
            PERMISSION_PATH,
            get(search_permissions).put(grant_permissions).delete(revoke_permissions),
        )
        .route_layer(middleware::from_fn_with_state(
            PermissionGuard::new(&state, Permission::Manage),
            require_permission,
        ));

    let guarded = tagging
        .merge(metadata)
        .merge(permissions)
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_object))
        .layer(middleware::from_fn_with_state(state.clone(), identify_request));

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .with_state(state)
}

fn attribute_routes(state: &AppState, path: &str, reconciler: Reconciler) -> Router<AppState> {
    let read = get(list_attributes).route_layer(middleware::from_fn_with_state(
        PermissionGuard::new(state, Permission::Read),
        require_permission,
    ));
    let write = put(replace_attributes)
        .patch(associate_attributes)
        .delete(dissociate_attributes)
        .route_layer(middleware::from_fn_with_state(
            PermissionGuard::new(state, Permission::Update),
            require_permission,
        ));

    Router::new()
        .route(path, read.merge(write))
        .layer(Extension(reconciler))
}

async fn identify_request(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, GateError> {
    let auth_type = IdentityVerifier::classify(request.headers());
    check_app_mode(state.auth_mode, auth_type)?;

    let identity = state.verifier.identify(request.headers()).map_err(|e| {
        warn!("Rejected credentials: {}", e);
        GateError::Unauthenticated
    })?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

async fn resolve_object(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = request
        .extensions()
        .get::<RequestIdentity>()
        .cloned()
        .unwrap_or_else(RequestIdentity::anonymous);

    let object = match params.get("object_id").map(|raw| Uuid::parse_str(raw)) {
        Some(Ok(object_id)) => state.resolver.resolve(object_id).await,
        Some(Err(e)) => {
            debug!("Unparseable object id in path: {}", e);
            None
        }
        None => None,
    };

    request
        .extensions_mut()
        .insert(RequestContext::new(identity, object));
    next.run(request).await
}

async fn require_permission(
    State(guard): State<PermissionGuard>,
    Extension(ctx): Extension<RequestContext>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, GateError> {
    guard.gate.authorize(guard.permission, &ctx).await?;
    Ok(next.run(request).await)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.db.health_check().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

/// Version must exist and belong to the object in the path
async fn ensure_version<C>(db: &C, object_id: Uuid, version_id: Uuid) -> Result<()>
where
    C: ConnectionTrait,
{
    version::Entity::find_by_id(version_id)
        .one(db)
        .await?
        .filter(|v| v.object_id == object_id)
        .ok_or(CatalogError::VersionNotFound(version_id))?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSet {
    pub version_id: Uuid,
    pub kind: &'static str,
    pub attributes: Vec<AttributePair>,
}

async fn list_attributes(
    State(state): State<AppState>,
    Extension(reconciler): Extension<Reconciler>,
    Path((object_id, version_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AttributeSet>> {
    let db = state.db.connection();
    ensure_version(db, object_id, version_id).await?;
    let records = reconciler.current(db, version_id).await?;

    Ok(Json(AttributeSet {
        version_id,
        kind: reconciler.kind().label(),
        attributes: as_pairs(&records),
    }))
}

async fn replace_attributes(
    State(state): State<AppState>,
    Extension(reconciler): Extension<Reconciler>,
    Extension(ctx): Extension<RequestContext>,
    Path((object_id, version_id)): Path<(Uuid, Uuid)>,
    Json(pairs): Json<Vec<AttributePair>>,
) -> Result<Json<Reconciliation>> {
    let txn = state.db.begin().await?;
    let outcome = async {
        ensure_version(&txn, object_id, version_id).await?;
        reconciler
            .replace(&txn, version_id, &pairs, ctx.identity.actor())
            .await
    }
    .await;
    Ok(Json(settle(txn, outcome).await?))
}

async fn associate_attributes(
    State(state): State<AppState>,
    Extension(reconciler): Extension<Reconciler>,
    Extension(ctx): Extension<RequestContext>,
    Path((object_id, version_id)): Path<(Uuid, Uuid)>,
    Json(pairs): Json<Vec<AttributePair>>,
) -> Result<Json<Reconciliation>> {
    let txn = state.db.begin().await?;
    let outcome = async {
        ensure_version(&txn, object_id, version_id).await?;
        reconciler
            .associate(&txn, version_id, &pairs, ctx.identity.actor())
            .await
    }
    .await;
    Ok(Json(settle(txn, outcome).await?))
}

async fn dissociate_attributes(
    State(state): State<AppState>,
    Extension(reconciler): Extension<Reconciler>,
    Path((object_id, version_id)): Path<(Uuid, Uuid)>,
    Json(matchers): Json<Vec<AttributeMatcher>>,
) -> Result<Json<Reconciliation>> {
    let txn = state.db.begin().await?;
    let outcome = async {
        ensure_version(&txn, object_id, version_id).await?;
        reconciler.dissociate(&txn, version_id, &matchers).await
    }
    .await;
    Ok(Json(settle(txn, outcome).await?))
}

/// Wire form of a stored grant
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub id: Uuid,
    pub object_id: Uuid,
    pub user_id: Uuid,
    pub permission_code: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<object_permission::Model> for PermissionGrant {
    fn from(model: object_permission::Model) -> Self {
        Self {
            id: model.id,
            object_id: model.object_id,
            user_id: model.user_id,
            permission_code: model.permission_code,
            created_by: model.created_by,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionQuery {
    pub user_id: Option<Uuid>,
    pub permission: Option<Permission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: Uuid,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

async fn search_permissions(
    State(state): State<AppState>,
    Path(object_id): Path<Uuid>,
    Query(query): Query<PermissionQuery>,
) -> Result<Json<Vec<PermissionGrant>>> {
    let filter = PermissionFilter {
        object_id: Some(object_id),
        user_ids: query.user_id.into_iter().collect(),
        permissions: query.permission.into_iter().collect(),
    };
    let grants = state.permissions.search(state.db.connection(), &filter).await?;
    Ok(Json(grants.into_iter().map(PermissionGrant::from).collect()))
}

async fn grant_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(object_id): Path<Uuid>,
    Json(body): Json<GrantRequest>,
) -> Result<(StatusCode, Json<Vec<PermissionGrant>>)> {
    if ctx.object.is_none() {
        return Err(CatalogError::ObjectNotFound(object_id));
    }

    let txn = state.db.begin().await?;
    let outcome = state
        .permissions
        .grant(&txn, object_id, body.user_id, &body.permissions, ctx.identity.actor())
        .await;
    let inserted = settle(txn, outcome).await?;

    let status = if inserted.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(inserted.into_iter().map(PermissionGrant::from).collect())))
}

async fn revoke_permissions(
    State(state): State<AppState>,
    Path(object_id): Path<Uuid>,
    Json(body): Json<RevokeRequest>,
) -> Result<Json<serde_json::Value>> {
    let txn = state.db.begin().await?;
    let outcome = state
        .permissions
        .revoke(&txn, object_id, &body.user_ids, &body.permissions)
        .await;
    let revoked = settle(txn, outcome).await?;
    Ok(Json(json!({ "revoked": revoked })))
}
