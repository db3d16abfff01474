//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        LocalBlobStore, PgDocumentStore, ResilientStore, RetryConfig, SimulatedPaymentRail,
        StoreAuthProvider, StoreNotificationSink,
    },
    config::{Config, StoreBackend},
    error::ApiError,
    web::{
        admin::{
            add_subject_handler, list_applications_handler, list_issues_handler,
            list_subjects_handler, resolve_issue_handler, review_application_handler,
            submit_application_handler,
        },
        auth::{login_handler, logout_handler, password_reset_handler, signup_handler},
        availability::{add_slots_handler, list_availability_handler, remove_slot_handler},
        chat_ws_handler,
        chats::{
            delete_chat_handler, end_chat_handler, get_chat_handler, list_chats_handler,
            list_messages_handler, mark_read_handler, send_message_handler, typing_handler,
        },
        profiles::{
            browse_tutors_handler, get_me_handler, get_user_handler, list_notifications_handler,
            list_tutor_reviews_handler, mark_notification_read_handler, update_me_handler,
            upload_photo_handler,
        },
        require_auth,
        rest::ApiDoc,
        sessions::{
            accept_reschedule_handler, book_session_handler, cancel_session_handler,
            complete_session_handler, confirm_session_handler, decline_reschedule_handler,
            decline_session_handler, get_session_handler, list_sessions_handler,
            report_issue_handler, reschedule_session_handler, submit_review_handler,
            update_status_handler,
        },
        state::AppState,
    },
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutoring_core::{DocumentStore, Marketplace, MemoryDocumentStore, SystemClock};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Auth tokens live as long as the session cookie.
const TOKEN_TTL_DAYS: i64 = 30;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Open the Document Store ---
    let base_store: Arc<dyn DocumentStore> = match &config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory document store; data is lost on restart.");
            Arc::new(MemoryDocumentStore::new())
        }
        StoreBackend::Postgres { database_url } => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let pg_store = PgDocumentStore::new(db_pool);
            info!("Running database migrations...");
            pg_store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(pg_store)
        }
    };
    let store: Arc<dyn DocumentStore> = Arc::new(ResilientStore::new(
        base_store,
        RetryConfig {
            max_attempts: config.store_read_retries.saturating_add(1),
            timeout: config.store_timeout,
            ..RetryConfig::default()
        },
    ));

    // --- 3. Initialize Service Adapters ---
    let auth = Arc::new(
        StoreAuthProvider::new(store.clone(), chrono::Duration::days(TOKEN_TTL_DAYS))?,
    );
    let blobs = Arc::new(LocalBlobStore::new(
        config.blob_root.clone(),
        config.blob_public_url.clone(),
    ));
    let notifier = Arc::new(StoreNotificationSink::new(store.clone()));

    let market = Marketplace::new(
        store,
        blobs,
        notifier,
        Arc::new(SimulatedPaymentRail),
        Arc::new(SystemClock),
        config.policy.clone(),
    );

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        market,
        auth,
        config: config.clone(),
    });

    // --- 5. Configure CORS ---
    let origin =
        config
            .cors_origin
            .parse::<HeaderValue>()
            .map_err(|source| ApiError::CorsOrigin {
                origin: config.cors_origin.clone(),
                source,
            })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/password-reset", post(password_reset_handler))
        .route("/subjects", get(list_subjects_handler))
        .route("/tutors", get(browse_tutors_handler))
        .route("/tutors/{tutor_id}/reviews", get(list_tutor_reviews_handler))
        .route("/tutors/{tutor_id}/availability", get(list_availability_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(get_me_handler).patch(update_me_handler))
        .route("/me/photo", post(upload_photo_handler))
        .route("/users/{uid}", get(get_user_handler))
        .route("/notifications", get(list_notifications_handler))
        .route(
            "/notifications/{notification_id}/read",
            post(mark_notification_read_handler),
        )
        .route(
            "/availability",
            post(add_slots_handler).delete(remove_slot_handler),
        )
        .route("/sessions", post(book_session_handler).get(list_sessions_handler))
        .route("/sessions/{session_id}", get(get_session_handler))
        .route("/sessions/{session_id}/status", post(update_status_handler))
        .route("/sessions/{session_id}/cancel", post(cancel_session_handler))
        .route("/sessions/{session_id}/confirm", post(confirm_session_handler))
        .route("/sessions/{session_id}/decline", post(decline_session_handler))
        .route("/sessions/{session_id}/reschedule", post(reschedule_session_handler))
        .route(
            "/sessions/{session_id}/reschedule/accept",
            post(accept_reschedule_handler),
        )
        .route(
            "/sessions/{session_id}/reschedule/decline",
            post(decline_reschedule_handler),
        )
        .route("/sessions/{session_id}/complete", post(complete_session_handler))
        .route("/sessions/{session_id}/issues", post(report_issue_handler))
        .route("/reviews", post(submit_review_handler))
        .route("/chats", get(list_chats_handler))
        .route(
            "/chats/{chat_id}",
            get(get_chat_handler).delete(delete_chat_handler),
        )
        .route(
            "/chats/{chat_id}/messages",
            get(list_messages_handler).post(send_message_handler),
        )
        .route("/chats/{chat_id}/read", post(mark_read_handler))
        .route("/chats/{chat_id}/typing", post(typing_handler))
        .route("/chats/{chat_id}/end", post(end_chat_handler))
        .route("/ws/chats/{chat_id}", get(chat_ws_handler))
        .route("/applications", post(submit_application_handler))
        .route("/admin/subjects", post(add_subject_handler))
        .route("/admin/applications", get(list_applications_handler))
        .route(
            "/admin/applications/{application_id}/review",
            post(review_application_handler),
        )
        .route("/admin/issues", get(list_issues_handler))
        .route("/admin/issues/{issue_id}/resolve", post(resolve_issue_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with uploaded files and the Swagger UI for a complete application.
    let app = Router::new()
        .merge(api_router)
        .nest_service("/blobs", ServeDir::new(&config.blob_root))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
