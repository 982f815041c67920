//! HTTP/JSON surface of the service.
//!
//! One route per operation. Handlers only extract the caller and the request
//! body, delegate to [`Backend`], and serialize the result; authorization
//! lives in the service.

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};
use crate::gateway::ShoppingItem;
use crate::identity::{Caller, Identity, Role, UserProfile};
use crate::orders::OrderStatus;
use crate::payment_config::StripeConfiguration;
use crate::service::{Backend, CreateOrder};
use crate::transform::{TransformInput, transform};

type Data = web::Data<Backend>;

#[derive(Deserialize)]
struct StatusUpdate {
    status: OrderStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest {
    items: Vec<ShoppingItem>,
    success_url: String,
    cancel_url: String,
    /// Purchase-attempt token; reuse it only to retry the same attempt.
    #[serde(default)]
    attempt_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigurationRequest {
    secret_key: String,
    #[serde(default)]
    allowed_countries: Vec<String>,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: Role,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .route("/ranks", web::get().to(get_ranks))
        .route("/orders", web::post().to(create_order))
        .route("/orders", web::get().to(get_all_orders))
        .route("/orders/by-username/{username}", web::get().to(get_orders_by_username))
        .route("/orders/{id}/status", web::put().to(update_order_status))
        .route("/orders/{id}/reconcile", web::post().to(reconcile_order))
        .route("/checkout/sessions", web::post().to(create_checkout_session))
        .route("/checkout/sessions/{id}", web::get().to(get_session_status))
        .route("/stripe/configured", web::get().to(is_stripe_configured))
        .route("/stripe/configuration", web::put().to(set_stripe_configuration))
        .route("/roles/me", web::get().to(get_caller_role))
        .route("/roles/me/admin", web::get().to(is_caller_admin))
        .route("/roles/claim-admin", web::post().to(claim_first_admin))
        .route("/roles/{identity}", web::put().to(assign_role))
        .route("/profiles/me", web::get().to(get_caller_profile))
        .route("/profiles/me", web::put().to(save_caller_profile))
        .route("/profiles/{identity}", web::get().to(get_user_profile))
        .route("/transform", web::post().to(transform_response));
}

/// Liveness probe: returns 200 if the process is running.
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Readiness probe with service counters.
async fn status(backend: Data) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "running",
        "stripe_configured": backend.is_stripe_configured(),
        "metrics": backend.metrics().to_json(),
    }))
}

async fn get_ranks(backend: Data) -> HttpResponse {
    HttpResponse::Ok().json(backend.ranks())
}

async fn create_order(backend: Data, caller: Caller, body: web::Json<CreateOrder>) -> ServiceResult<HttpResponse> {
    let id = backend.create_order(&caller, body.into_inner())?;
    Ok(HttpResponse::Ok().json(id))
}

async fn get_all_orders(backend: Data, caller: Caller) -> ServiceResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(backend.all_orders(&caller)?))
}

async fn get_orders_by_username(backend: Data, username: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(backend.orders_by_username(&username))
}

async fn update_order_status(
    backend: Data,
    caller: Caller,
    id: web::Path<u64>,
    body: web::Json<StatusUpdate>,
) -> ServiceResult<HttpResponse> {
    let found = backend.update_order_status(&caller, id.into_inner(), body.status)?;
    Ok(HttpResponse::Ok().json(found))
}

async fn reconcile_order(backend: Data, caller: Caller, id: web::Path<u64>) -> ServiceResult<HttpResponse> {
    let outcome = backend.reconcile_order(&caller, id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

async fn create_checkout_session(
    backend: Data,
    caller: Caller,
    body: web::Json<CheckoutRequest>,
) -> ServiceResult<HttpResponse> {
    let session = backend
        .create_checkout_session(
            &caller,
            body.attempt_id.as_deref(),
            &body.items,
            &body.success_url,
            &body.cancel_url,
        )
        .await?;
    Ok(HttpResponse::Ok().json(session))
}

async fn get_session_status(backend: Data, id: web::Path<String>) -> HttpResponse {
    HttpResponse::Ok().json(backend.session_status(&id).await)
}

async fn is_stripe_configured(backend: Data) -> HttpResponse {
    HttpResponse::Ok().json(backend.is_stripe_configured())
}

async fn set_stripe_configuration(
    backend: Data,
    caller: Caller,
    body: web::Json<ConfigurationRequest>,
) -> ServiceResult<HttpResponse> {
    let body = body.into_inner();
    let config = StripeConfiguration::normalized(&body.secret_key, body.allowed_countries)?;
    backend.set_stripe_configuration(&caller, config)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn get_caller_role(backend: Data, caller: Caller) -> HttpResponse {
    HttpResponse::Ok().json(backend.caller_role(&caller))
}

async fn is_caller_admin(backend: Data, caller: Caller) -> HttpResponse {
    HttpResponse::Ok().json(backend.is_caller_admin(&caller))
}

async fn claim_first_admin(backend: Data, caller: Caller) -> HttpResponse {
    HttpResponse::Ok().json(backend.claim_first_admin(&caller))
}

fn path_identity(raw: String) -> ServiceResult<Identity> {
    Identity::new(raw).ok_or_else(|| ServiceError::invalid("identity", "anonymous identity"))
}

async fn assign_role(
    backend: Data,
    caller: Caller,
    target: web::Path<String>,
    body: web::Json<RoleRequest>,
) -> ServiceResult<HttpResponse> {
    let target = path_identity(target.into_inner())?;
    backend.assign_role(&caller, target, body.role)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn get_caller_profile(backend: Data, caller: Caller) -> HttpResponse {
    HttpResponse::Ok().json(backend.caller_profile(&caller))
}

async fn save_caller_profile(
    backend: Data,
    caller: Caller,
    body: web::Json<UserProfile>,
) -> ServiceResult<HttpResponse> {
    backend.save_caller_profile(&caller, body.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

async fn get_user_profile(backend: Data, caller: Caller, target: web::Path<String>) -> ServiceResult<HttpResponse> {
    let target = path_identity(target.into_inner())?;
    Ok(HttpResponse::Ok().json(backend.user_profile(&caller, &target)))
}

async fn transform_response(body: web::Json<TransformInput>) -> HttpResponse {
    HttpResponse::Ok().json(transform(body.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::gateway::StripeGateway;
    use crate::identity::{DEFAULT_IDENTITY_HEADER, IdentityHeader};
    use crate::metrics::Metrics;
    use crate::persistence::Snapshot;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn data() -> Data {
        let metrics = Arc::new(Metrics::new());
        let gateway = StripeGateway::new("http://127.0.0.1:9", Duration::from_secs(2), metrics.clone());
        web::Data::new(Backend::new(
            Snapshot::default(),
            Catalog::default(),
            gateway,
            None,
            false,
            metrics,
        ))
    }

    macro_rules! app {
        ($data:expr) => {
            test::init_service(
                App::new()
                    .app_data($data.clone())
                    .app_data(web::Data::new(IdentityHeader(DEFAULT_IDENTITY_HEADER.into())))
                    .configure(routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn order_lifecycle_over_http() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/roles/claim-admin")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .to_request();
        let claimed: bool = test::call_and_read_body_json(&app, req).await;
        assert!(claimed);

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({
                "minecraftUsername": "Steve",
                "rankName": "SEAMON",
                "duration": "SevenDay",
                "priceUsd": 15
            }))
            .to_request();
        let id: u64 = test::call_and_read_body_json(&app, req).await;
        assert_eq!(id, 1);

        let req = test::TestRequest::get()
            .uri("/orders/by-username/Steve")
            .to_request();
        let orders: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(orders[0]["status"], "pending");
        assert_eq!(orders[0]["priceUsd"], 15);
        assert_eq!(orders[0]["stripeSessionId"], "");

        let req = test::TestRequest::put()
            .uri("/orders/1/status")
            .insert_header((DEFAULT_IDENTITY_HEADER, "someone"))
            .set_json(json!({"status": "paid"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri("/orders/1/status")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .set_json(json!({"status": "paid"}))
            .to_request();
        let found: bool = test::call_and_read_body_json(&app, req).await;
        assert!(found);

        let req = test::TestRequest::put()
            .uri("/orders/99/status")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .set_json(json!({"status": "paid"}))
            .to_request();
        let found: bool = test::call_and_read_body_json(&app, req).await;
        assert!(!found);

        let req = test::TestRequest::get()
            .uri("/orders")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .to_request();
        let all: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert_eq!(all[0]["status"], "paid");
    }

    #[actix_web::test]
    async fn checkout_reports_not_configured() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::get().uri("/stripe/configured").to_request();
        let configured: bool = test::call_and_read_body_json(&app, req).await;
        assert!(!configured);

        let req = test::TestRequest::post()
            .uri("/checkout/sessions")
            .set_json(json!({
                "items": [{
                    "productName": "SEAMON",
                    "productDescription": "7 day rank",
                    "currency": "usd",
                    "quantity": 1,
                    "priceInCents": 1500
                }],
                "successUrl": "https://store.example/success",
                "cancelUrl": "https://store.example/cancel"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "NOT_CONFIGURED");
        assert_eq!(data.metrics().snapshot_outbound_calls(), 0);
    }

    #[actix_web::test]
    async fn configuration_key_is_never_returned() {
        let data = data();
        let app = app!(data);
        data.claim_first_admin(&Caller::from_header(Some("admin-1")));

        let req = test::TestRequest::put()
            .uri("/stripe/configuration")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .set_json(json!({"secretKey": "sk_test_hidden", "allowedCountries": ["us"]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        for uri in ["/stripe/configured", "/status"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let body = test::call_and_read_body(&app, req).await;
            assert!(!String::from_utf8_lossy(&body).contains("sk_test_hidden"));
        }

        let req = test::TestRequest::put()
            .uri("/stripe/configuration")
            .insert_header((DEFAULT_IDENTITY_HEADER, "admin-1"))
            .set_json(json!({"secretKey": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn roles_and_profiles() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::get().uri("/roles/me").to_request();
        let role: Role = test::call_and_read_body_json(&app, req).await;
        assert_eq!(role, Role::Guest);

        let req = test::TestRequest::post().uri("/roles/claim-admin").to_request();
        let claimed: bool = test::call_and_read_body_json(&app, req).await;
        assert!(!claimed);

        let req = test::TestRequest::put()
            .uri("/profiles/me")
            .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
            .set_json(json!({"name": "Alice", "minecraftUsername": "Alice_01"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri("/profiles/alice")
            .insert_header((DEFAULT_IDENTITY_HEADER, "bob"))
            .to_request();
        let profile: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(profile, Value::Null);

        let req = test::TestRequest::get()
            .uri("/profiles/me")
            .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
            .to_request();
        let profile: UserProfile = test::call_and_read_body_json(&app, req).await;
        assert_eq!(profile.minecraft_username.as_deref(), Some("Alice_01"));

        let req = test::TestRequest::put()
            .uri("/roles/bob")
            .insert_header((DEFAULT_IDENTITY_HEADER, "alice"))
            .set_json(json!({"role": "admin"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn session_status_is_a_tagged_union() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::get()
            .uri("/checkout/sessions/cs_test_1")
            .to_request();
        let status: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["status"], "failed");
        assert!(status["error"].as_str().unwrap().contains("not configured"));
    }

    #[actix_web::test]
    async fn transform_strips_headers() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::post()
            .uri("/transform")
            .set_json(json!({
                "response": {
                    "status": 200,
                    "headers": [{"name": "set-cookie", "value": "a=b"}],
                    "body": "e30="
                },
                "context": "AQI="
            }))
            .to_request();
        let out: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(out["status"], 200);
        assert_eq!(out["headers"], json!([]));
        assert_eq!(out["body"], "e30=");
        assert_eq!(out["context"], "AQI=");
    }

    #[actix_web::test]
    async fn ranks_are_listed_by_tier() {
        let data = data();
        let app = app!(data);

        let req = test::TestRequest::get().uri("/ranks").to_request();
        let ranks: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(ranks[0]["name"], "SEAMON");
        assert_eq!(ranks[0]["sevenDayPrice"], 15);
        assert_eq!(ranks.as_array().unwrap().len(), 6);
    }
}
