//! Route registration. Everything protocol-facing lives under `/api/v1`;
//! the auth endpoints and the ticket-authenticated websocket are public,
//! the rest goes through the token middleware.

use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, chunk, collection, health, invitation, item, member, ws};
use crate::middleware::mw_require_auth;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/authentication/is_etebase/", get(auth::is_etebase))
        .route("/authentication/signup/", post(auth::signup))
        .route("/authentication/login_challenge/", post(auth::login_challenge))
        .route("/authentication/login/", post(auth::login))
        .route("/ws/{ticket}/", get(ws::subscribe));

    let authed = Router::new()
        .route("/authentication/logout/", post(auth::logout))
        .route("/authentication/change_password/", post(auth::change_password))
        .route("/authentication/dashboard_url/", post(auth::dashboard_url))
        .route("/collection/", get(collection::list).post(collection::create))
        .route("/collection/list_multi/", post(collection::list_multi))
        .route("/collection/{collection_uid}/", get(collection::get))
        .route("/collection/{collection_uid}/item/", get(item::list))
        .route("/collection/{collection_uid}/item/{item_uid}/", get(item::get))
        .route(
            "/collection/{collection_uid}/item/{item_uid}/revision/",
            get(item::revisions),
        )
        .route("/collection/{collection_uid}/item/batch/", post(item::batch))
        .route(
            "/collection/{collection_uid}/item/transaction/",
            post(item::transaction),
        )
        .route(
            "/collection/{collection_uid}/item/fetch_updates/",
            post(item::fetch_updates),
        )
        .route(
            "/collection/{collection_uid}/item/{item_uid}/chunk/{chunk_uid}/",
            put(chunk::upload),
        )
        .route(
            "/collection/{collection_uid}/item/{item_uid}/chunk/{chunk_uid}/download/",
            get(chunk::download),
        )
        .route("/collection/{collection_uid}/member/", get(member::list))
        .route(
            "/collection/{collection_uid}/member/leave/",
            post(member::leave),
        )
        .route(
            "/collection/{collection_uid}/member/{username}/",
            delete(member::remove).patch(member::modify),
        )
        .route(
            "/collection/{collection_uid}/subscription-ticket/",
            post(ws::create_ticket),
        )
        .route("/invitation/incoming/", get(invitation::list_incoming))
        .route(
            "/invitation/incoming/{invitation_uid}/",
            get(invitation::get_incoming).delete(invitation::reject_incoming),
        )
        .route(
            "/invitation/incoming/{invitation_uid}/accept/",
            post(invitation::accept_incoming),
        )
        .route(
            "/invitation/outgoing/",
            get(invitation::list_outgoing).post(invitation::create_outgoing),
        )
        .route(
            "/invitation/outgoing/{invitation_uid}/",
            delete(invitation::delete_outgoing),
        )
        .route(
            "/invitation/outgoing/fetch_user_profile/",
            post(invitation::fetch_user_profile),
        )
        .layer(from_fn_with_state(state.clone(), mw_require_auth));

    Router::new()
        .nest("/api/v1", public.merge(authed))
        // some clients probe the root
        .route("/is_etebase", get(auth::is_etebase))
        .route("/healthz/live", get(health::live))
        .route("/healthz/ready", get(health::ready))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers(Any)
    }
}
