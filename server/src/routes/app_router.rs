use axum::{
    routing::{get, post},
    Router,
};
use http::HeaderValue;
use tower_http::cors::CorsLayer;

use crate::{request_tracing, ServerState};

#[cfg(debug_assertions)]
use super::handlers::dev_only;
use super::{
    handler_404,
    handlers::{email, embeddings, threads, workflow},
};

const ALLOWED_ORIGINS: [&str; 2] = ["https://localhost:3000", "http://localhost:3000"];

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = ALLOWED_ORIGINS
            .into_iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true);

        let router = Router::new()
            .route("/", get(|| async { "Mailmind server" }))
            .nest(
                "/email",
                Router::new()
                    .route("/search", get(email::search))
                    .route("/:id/similar", get(email::similar))
                    .route("/:id/embeddings", post(email::generate_embeddings)),
            )
            .nest(
                "/embeddings",
                Router::new()
                    .route("/stats", get(embeddings::stats))
                    .route("/retry", post(embeddings::retry)),
            )
            .route("/threads", get(threads::detect))
            .nest(
                "/workflow",
                Router::new()
                    .route("/run", post(workflow::run))
                    .route("/tasks", get(workflow::list_tasks)),
            );

        #[cfg(debug_assertions)]
        let router = router.route("/dev/token", get(dev_only::dev_token));

        // The fallback goes in before the layers so 404s carry a request id too
        let router = router.fallback(handler_404);

        request_tracing::with_request_id_tracing(router)
            .layer(cors_layer)
            .with_state(state)
    }
}
