pub mod access_requests;
pub mod audit;
pub mod auth;
pub mod dependencies;
pub mod entities;
pub mod groups;
pub mod identities;
pub mod issues;
pub mod organizations;
pub mod rbac;
pub mod roles;
pub mod scim;

use axum::{middleware as axum_middleware, routing::get, Json, Router};
use utoipa::OpenApi;

use crate::config::CONFIG;
use crate::middleware::require_auth;
use crate::schemas;
use crate::services;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Elder",
        description = "Configuration management database for organizations, assets and their dependencies"
    ),
    components(
        schemas(
            schemas::LoginRequest,
            schemas::LoginResponse,
            schemas::CreateOrganization,
            schemas::UpdateOrganization,
            schemas::OrganizationResponse,
            schemas::ChildOrganization,
            schemas::CreateEntity,
            schemas::UpdateEntity,
            schemas::EntityResponse,
            schemas::ReachedEntityResponse,
            schemas::WalkResponse,
            schemas::CreateDependency,
            schemas::DependencyResponse,
            schemas::CreateIdentity,
            schemas::UpdateIdentity,
            schemas::ChangePassword,
            schemas::IdentityResponse,
            schemas::AssignRole,
            schemas::RoleAssignmentResponse,
            schemas::CreateGroup,
            schemas::UpdateGroup,
            schemas::GroupResponse,
            schemas::SetApprovers,
            schemas::AddMember,
            schemas::MemberResponse,
            schemas::SubmitAccessRequest,
            schemas::DecideAccessRequest,
            schemas::DecisionResponse,
            schemas::AccessRequestResponse,
            schemas::DecisionOutcomeResponse,
            schemas::CreateRole,
            schemas::UpdateRole,
            schemas::SetRolePermissions,
            schemas::RoleResponse,
            schemas::PermissionInfo,
            schemas::RbacCheckResponse,
            schemas::MyPermissionsResponse,
            schemas::CreateIssue,
            schemas::UpdateIssue,
            schemas::IssueResponse,
            services::dependency_graph::OrganizationGraph,
            services::dependency_graph::GraphNode,
            services::dependency_graph::GraphEdge,
            services::audit::AuditLogResponse,
            services::audit::AuditStats,
            services::audit::NamedCount,
            services::audit::ComplianceReport,
            services::audit::AccessDecisionSummary,
            audit::ClearLogsRequest,
            audit::ClearLogsResponse,
        )
    ),
    tags(
        (name = "Organizations", description = "Organization tree and graph view"),
        (name = "Inventory", description = "Entities and their dependencies"),
        (name = "Identity", description = "Identities, groups and access requests"),
        (name = "RBAC", description = "Roles, permissions and assignments"),
        (name = "Audit", description = "Audit log and compliance reports"),
    )
)]
pub struct ApiDoc;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/system/health", get(health_check))
        .route("/api/system/version", get(get_version))
        .route("/api/openapi.json", get(openapi_document))
        .nest("/auth", auth::auth_routes(state.clone()))
        .nest("/scim/v2", scim::scim_routes(state.clone(), CONFIG.scim.clone()));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .nest("/api", api_routes(state.clone()))
        .layer(axum_middleware::from_fn_with_state(state, require_auth));

    public_routes.merge(protected_routes)
}

/// API routes under /api/* (protected by auth middleware)
fn api_routes(state: AppState) -> Router {
    Router::new()
        .nest("/auth", auth::session_routes(state.clone()))
        .nest(
            "/organizations",
            organizations::organizations_routes(state.clone()),
        )
        .nest("/entities", entities::entities_routes(state.clone()))
        .nest(
            "/dependencies",
            dependencies::dependencies_routes(state.clone()),
        )
        .nest("/identities", identities::identities_routes(state.clone()))
        .nest("/groups", groups::groups_routes(state.clone()))
        .nest(
            "/access-requests",
            access_requests::access_requests_routes(state.clone()),
        )
        .nest("/roles", roles::roles_routes(state.clone()))
        .nest("/rbac", rbac::rbac_routes(state.clone()))
        .nest("/issues", issues::issues_routes(state.clone()))
        .nest("/audit", audit::audit_routes(state))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Version info endpoint
async fn get_version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": CONFIG.version,
        "commit_hash": CONFIG.commit_hash,
        "build_time": CONFIG.build_time,
        "rust_version": "1.83",
    }))
}

async fn openapi_document() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_lists_schemas() {
        let doc = ApiDoc::openapi();
        let schemas = doc
            .components
            .expect("components are generated")
            .schemas;
        assert!(schemas.contains_key("OrganizationResponse"));
        assert!(schemas.contains_key("ComplianceReport"));
        assert!(schemas.contains_key("DecisionOutcomeResponse"));
    }
}
