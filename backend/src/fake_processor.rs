//! In-process stand-in for the processor's checkout-session endpoints.
//!
//! Binds an ephemeral local port, serves sessions from a table the test
//! fills, and records the `Idempotency-Key` of every create call. A lookup
//! can be held open until the test releases it.

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Default)]
pub struct ProcessorState {
    created: AtomicU64,
    idempotency_keys: Mutex<Vec<Option<String>>>,
    sessions: Mutex<HashMap<String, Value>>,
    hold_lookups: AtomicBool,
    pub lookup_arrived: Notify,
    pub lookup_release: Notify,
}

impl ProcessorState {
    pub fn insert_session(&self, id: &str, body: Value) {
        self.sessions.lock().unwrap().insert(id.to_string(), body);
    }

    pub fn idempotency_keys(&self) -> Vec<Option<String>> {
        self.idempotency_keys.lock().unwrap().clone()
    }

    /// Make every lookup signal `lookup_arrived` and wait for `lookup_release`.
    pub fn hold_lookups(&self) {
        self.hold_lookups.store(true, Ordering::SeqCst);
    }
}

/// A paid session for `amount_total` US cents.
pub fn paid_session(id: &str, amount_total: u64) -> Value {
    json!({
        "id": id,
        "object": "checkout.session",
        "status": "complete",
        "payment_status": "paid",
        "amount_total": amount_total,
        "currency": "usd",
        "metadata": {},
    })
}

async fn create(req: HttpRequest, state: web::Data<ProcessorState>) -> HttpResponse {
    let key = req
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.idempotency_keys.lock().unwrap().push(key);
    let n = state.created.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("cs_test_{n}");
    HttpResponse::Ok().json(json!({
        "id": id,
        "url": format!("https://checkout.example/c/pay/{id}"),
    }))
}

async fn lookup(path: web::Path<String>, state: web::Data<ProcessorState>) -> HttpResponse {
    if state.hold_lookups.load(Ordering::SeqCst) {
        state.lookup_arrived.notify_one();
        state.lookup_release.notified().await;
    }
    let session = state.sessions.lock().unwrap().get(path.as_str()).cloned();
    match session {
        Some(body) => HttpResponse::Ok().json(body),
        None => HttpResponse::NotFound().json(json!({
            "error": { "message": format!("No such checkout.session: {}", path.as_str()) }
        })),
    }
}

/// Start the fake processor and return its base URL. Must run inside an
/// actix system (`#[actix_web::test]`).
pub fn start(state: web::Data<ProcessorState>) -> String {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/v1/checkout/sessions", web::post().to(create))
            .route("/v1/checkout/sessions/{id}", web::get().to(lookup))
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{addr}")
}
