use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::{ApiError, GuardError};
use crate::guard::rate_limit::RateDecision;
use crate::state::AppState;

pub const TENANT_HEADER: &str = "x-gatehouse-tenant";

/// Admission middleware, applied ahead of every tenant-scoped handler.
///
/// Order matters: panic mode first, then traffic shaping, then the request
/// proceeds with a `TenantCtx` extension for handlers to consume.
pub async fn tenant_admission(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant_id = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Missing tenant header"))?;

    let tenant = state.tenants.resolve(&tenant_id).await;

    if state.panic.is_suspended(&tenant.id).await {
        return Err(GuardError::Suspended.into());
    }

    let client_ip = client_ip(&request);
    let rule = state
        .rules
        .match_rule(request.method().as_str(), request.uri().path())
        .await;
    match state.limiter.check(&tenant.id, &client_ip, rule.as_ref()).await {
        RateDecision::Allowed { .. } => {}
        RateDecision::Blocked { retry_after_secs, message } => {
            return Err(GuardError::RateLimited { retry_after_secs, message }.into());
        }
    }

    request.extensions_mut().insert(tenant);
    request.extensions_mut().insert(ClientIp(client_ip));
    Ok(next.run(request).await)
}

/// Client address as the platform edge reports it.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
