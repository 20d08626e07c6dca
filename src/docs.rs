use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::models;
use crate::permissions::cascade::CascadeReport;
use crate::permissions::resolver::ProjectPermissionSet;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
        routes::auth::logout,
    ),
    components(
        schemas(
            models::user::User,
            models::user::CustomPermissions,
            models::user::UserRestrictions,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::user::SetPermissionsRequest,
            models::user::PermissionTokensRequest,
            models::user::ReassignRoleRequest,
            models::user::RestrictionsRequest,
            models::user::EffectivePermissionsResponse,
            models::role::Role,
            models::role::RoleCreateRequest,
            models::role::RoleRenameRequest,
            models::role::RoleLevelRequest,
            models::role::RolePermissionsRequest,
            models::project::Project,
            models::project::ProjectCreateRequest,
            models::project::ProjectMemberRequest,
            models::project::ProjectResponse,
            models::project_permission::UserProjectPermission,
            models::project_permission::ProjectPermissionOverrides,
            models::project_permission::ProjectRestrictions,
            models::project_permission::OverlayUpsertRequest,
            models::reporting::ReportingLink,
            models::reporting::ReportingLinkRequest,
            models::reporting::ReportingOverviewResponse,
            models::reporting::ReportingPeerDto,
            CascadeReport,
            ProjectPermissionSet,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Users", description = "User and permission administration"),
        (name = "Roles", description = "Role management with cascading updates"),
        (name = "Projects", description = "Projects and membership"),
        (name = "Project permissions", description = "Per-project permission overlays"),
        (name = "Reporting", description = "Reporting hierarchy graph"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn build_openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
