pub mod health;

use axum::{
    routing::{get, patch, post, put},
    Router,
};

use crate::billing::handlers as billing;
use crate::itineraries::handlers as itineraries;
use crate::profiles::handlers as profiles;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Itineraries
        .route("/api/itineraries", get(itineraries::handle_list_public))
        .route("/api/itineraries/mine", get(itineraries::handle_list_mine))
        .route(
            "/api/itineraries/generate",
            post(itineraries::handle_generate),
        )
        .route(
            "/api/itineraries/:id",
            get(itineraries::handle_get).delete(itineraries::handle_delete),
        )
        .route(
            "/api/itineraries/:id/privacy",
            patch(itineraries::handle_set_privacy),
        )
        .route(
            "/api/itineraries/:id/status",
            patch(itineraries::handle_set_status),
        )
        .route(
            "/api/itineraries/:id/like",
            post(itineraries::handle_toggle_like),
        )
        .route("/api/tags", get(itineraries::handle_tags))
        .route("/api/stats", get(itineraries::handle_stats))
        // Profiles
        .route(
            "/api/profile",
            get(profiles::handle_get_profile).patch(profiles::handle_update_profile),
        )
        .route("/api/usage", get(profiles::handle_usage))
        .route(
            "/api/admin/users/:id/tier",
            put(profiles::handle_admin_set_tier),
        )
        // Billing
        .route("/api/billing/checkout", post(billing::handle_checkout))
        .route("/api/billing/portal", post(billing::handle_portal))
        .route("/api/billing/webhook", post(billing::handle_webhook))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::anon_guard::GuardPolicy;
    use crate::billing::stripe_client::StripeClient;
    use crate::captcha::DisabledCaptcha;
    use crate::config::Config;
    use crate::llm_client::LlmClient;

    /// Router over a lazily connected pool; requests that reach the database would fail.
    fn test_router() -> Router {
        let config = Config::for_tests();
        let db = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let llm = LlmClient::new(
            config.openrouter_api_key.clone(),
            config.openrouter_base_url.clone(),
            config.app_url.clone(),
        )
        .unwrap();
        let stripe = StripeClient::new(
            reqwest::Client::new(),
            config.stripe.secret_key.clone(),
            config.stripe.webhook_secret.clone(),
        );

        build_router(AppState {
            db,
            llm: Arc::new(llm),
            stripe: Arc::new(stripe),
            captcha: Arc::new(DisabledCaptcha),
            anon_policy: GuardPolicy::default(),
            config,
        })
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = test_router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "tripgen-api");
    }

    #[tokio::test]
    async fn test_malformed_itinerary_id_is_rejected() {
        let (status, body) = send(
            Request::get("/api/itineraries/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_owner_routes_require_auth() {
        let (status, body) = send(
            Request::get("/api/itineraries/mine")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(
            Request::post("/api/billing/checkout")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"product":"premium"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_on_optional_auth_route() {
        let (status, _) = send(
            Request::get("/api/usage")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let (status, body) = send(
            Request::post("/api/billing/webhook")
                .header("stripe-signature", "t=1,v1=deadbeef")
                .body(Body::from(r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            Request::post("/api/billing/webhook")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_unhandled_event() {
        let payload = r#"{"id":"evt_2","type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        let signature = crate::billing::stripe_client::sign_payload(
            "whsec_test_secret",
            payload.as_bytes(),
            chrono::Utc::now().timestamp(),
        );
        let (status, body) = send(
            Request::post("/api/billing/webhook")
                .header("stripe-signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_request_before_any_lookup() {
        let (status, body) = send(
            Request::post("/api/itineraries/generate")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"destination":"Rome","days":12}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }
}
