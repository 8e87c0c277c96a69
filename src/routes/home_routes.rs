use axum::{
    Json, Router,
    extract::Query,
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState};
use crate::navigation::{self, RouteDecision};
use crate::permissions::{Capability, Role};

#[derive(Serialize)]
pub struct HomeData {
    pub view: &'static str,
    pub role: Role,
    pub landing_path: String,
    pub capabilities: &'static [Capability],
}

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub path: String,
}

/// `/home` sits outside `/api/v1`, the navigation resolver inside.
pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

pub fn api_router() -> Router<AppState> {
    Router::new().route("/navigation/resolve", get(resolve_route))
}

fn view_for(role: Role) -> &'static str {
    match role {
        Role::SuperAdmin => "platform",
        Role::Admin | Role::AdminDoctor => "admin",
        Role::Doctor => "doctor",
        Role::Assistant => "assistant",
        Role::Reception => "reception",
        Role::Finance => "finance",
    }
}

pub async fn home(auth: AuthContext) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    Ok(Json(ApiOk::new(HomeData {
        view: view_for(auth.role),
        role: auth.role,
        landing_path: navigation::landing_path(auth.role, auth.clinic_slug.as_deref()),
        capabilities: auth.role.capabilities(),
    })))
}

pub async fn resolve_route(
    auth: AuthContext,
    Query(q): Query<ResolveQuery>,
) -> Result<Json<ApiOk<RouteDecision>>, ApiError> {
    let decision = navigation::resolve(auth.role, auth.clinic_slug.as_deref(), &q.path);
    if let RouteDecision::Deny { reason } = &decision {
        tracing::debug!(user_id = %auth.user_id, path = %q.path, reason, "navigation denied");
    }
    Ok(Json(ApiOk::new(decision)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_view() {
        assert_eq!(view_for(Role::SuperAdmin), "platform");
        assert_eq!(view_for(Role::AdminDoctor), "admin");
        assert_eq!(view_for(Role::Finance), "finance");
    }
}
