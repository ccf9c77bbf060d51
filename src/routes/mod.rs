use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod assignments;
pub mod attendant_portal;
pub mod attendants;
pub mod auth;
pub mod documents;
pub mod event_attendants;
pub mod events;
pub mod files;
pub mod health;
pub mod oversight;
pub mod permissions;
pub mod positions;
pub mod shifts;
pub mod users;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());
    let body_limit = state.config.max_upload_bytes;

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let position_routes = Router::new()
        .route(
            "/",
            get(positions::list_positions).post(positions::create_position),
        )
        .route("/bulk", post(positions::bulk_create_positions))
        .route("/apply-template", post(positions::apply_template))
        .route(
            "/:position_id",
            get(positions::get_position)
                .put(positions::update_position)
                .delete(positions::delete_position),
        )
        .route("/:position_id/shifts", post(shifts::create_shift))
        .route(
            "/:position_id/shifts/:shift_id",
            delete(shifts::delete_shift),
        )
        .route(
            "/:position_id/oversight",
            get(oversight::get_oversight)
                .put(oversight::set_oversight)
                .delete(oversight::clear_oversight),
        );

    let event_routes = Router::new()
        .route("/", get(events::list_events).post(events::create_event))
        .route(
            "/:id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route(
            "/:id/permissions",
            get(permissions::list_permissions).post(permissions::grant_permission),
        )
        .route(
            "/:id/permissions/:user_id",
            delete(permissions::revoke_permission),
        )
        .nest("/:id/positions", position_routes)
        .route(
            "/:id/assignments",
            get(assignments::list_assignments)
                .post(assignments::create_assignment)
                .delete(assignments::clear_assignments),
        )
        .route(
            "/:id/assignments/:assignment_id",
            patch(assignments::update_assignment).delete(assignments::delete_assignment),
        )
        .route(
            "/:id/attendants",
            get(event_attendants::list_roster).post(event_attendants::add_to_roster),
        )
        .route(
            "/:id/attendants/:attendant_id",
            delete(event_attendants::remove_from_roster),
        )
        .route(
            "/:id/documents",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id/documents/:document_id",
            delete(documents::delete_document),
        );

    let attendant_routes = Router::new()
        .route(
            "/",
            get(attendants::list_attendants)
                .post(attendants::create_attendant)
                .put(attendants::import_attendants),
        )
        .route(
            "/:id",
            get(attendants::get_attendant)
                .put(attendants::update_attendant)
                .delete(attendants::delete_attendant),
        )
        .route("/:id/pin", post(attendants::set_pin));

    let admin_routes = Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/bulk", post(users::bulk_users))
        .route(
            "/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let protected_state = state.clone();
    let staff_routes = Router::new()
        .nest("/api/events", event_routes)
        .nest("/api/attendants", attendant_routes)
        .nest("/api/admin", admin_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    // Portal and file routes authenticate per handler since attendants use their own tokens.
    let portal_routes = Router::new()
        .route("/api/attendant/login", post(attendant_portal::attendant_login))
        .route(
            "/api/attendant/dashboard",
            get(attendant_portal::attendant_dashboard),
        )
        .route("/api/files/:key", get(files::serve_file));

    Router::new()
        .merge(staff_routes)
        .merge(portal_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
