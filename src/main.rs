use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use gatehouse_api::config::CONFIG;
use gatehouse_api::handlers::{challenge, health, oauth, signup, token, user, verify};
use gatehouse_api::middleware::{auth::jwt_auth, tenant::tenant_admission};
use gatehouse_api::state::AppState;
use gatehouse_api::store::AuthStore;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = &*CONFIG;
    tracing::info!("starting gatehouse-api in {:?} mode", config.environment);

    let state = AppState::build(config).await;
    let _rule_refresh = spawn_rule_refresh(Arc::clone(&state));

    let app = app(Arc::clone(&state));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server");

    // Drain every tenant pool before the process exits.
    state.pools.close_all().await;
    tracing::info!("pools drained, shutting down");
}

fn app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/auth/v1/user", get(user::user_get).put(user::user_put))
        .route("/auth/v1/logout", post(user::logout_post))
        .layer(from_fn_with_state(Arc::clone(&state), jwt_auth));

    let public = Router::new()
        .route("/auth/v1/signup", post(signup::signup_post))
        .route("/auth/v1/token", post(token::token_post))
        .route("/auth/v1/verify", get(verify::verify_get))
        .route("/auth/v1/recover", post(verify::recover_post))
        .route("/auth/v1/magiclink", post(verify::magiclink_post))
        .route("/auth/v1/authorize", get(oauth::authorize_get))
        .route("/auth/v1/callback", get(oauth::callback_get))
        // Legacy surface kept for pre-v1 clients
        .route("/auth/token", post(challenge::legacy_token_post))
        .route("/auth/challenge", post(challenge::challenge_post))
        .route("/auth/verify-challenge", post(challenge::verify_challenge_post));

    Router::new()
        .merge(public)
        .merge(protected)
        // Everything above is tenant-scoped and goes through admission;
        // health stays outside it.
        .layer(from_fn_with_state(Arc::clone(&state), tenant_admission))
        .route("/health", get(health::health_get))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically reload per-route rate rules from the platform control
/// database into the in-process cache.
fn spawn_rule_refresh(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Some(pool) = state.control.clone() else {
            tracing::error!("rate rule refresh disabled, control database unavailable");
            return;
        };
        let store = AuthStore::new(pool);
        let interval = Duration::from_secs(state.config.limits.rule_refresh_secs.max(1));

        loop {
            match store.load_rate_rules().await {
                Ok(rules) => {
                    tracing::debug!(count = rules.len(), "rate rules refreshed");
                    state.rules.replace(rules).await;
                }
                Err(e) => tracing::warn!("rate rule refresh failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
