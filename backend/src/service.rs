//! The order/payment service: authorization and state around the tables.
//!
//! All tables live behind one mutex. Every mutation runs to completion while
//! holding it, so mutations are serialized. The lock is never held across an
//! `.await`: processor calls copy what they need out of the state, release
//! the lock, and re-read the state after the call before deciding anything.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::catalog::{Catalog, Duration, Rank};
use crate::error::{ServiceError, ServiceResult};
use crate::gateway::{CheckoutSession, SessionCharge, SessionStatus, ShoppingItem, StripeGateway, validate_cart};
use crate::identity::{Caller, Identity, Role, UserProfile};
use crate::metrics::Metrics;
use crate::orders::{NewOrder, Order, OrderStatus, is_valid_username};
use crate::payment_config::StripeConfiguration;
use crate::persistence::{Snapshot, SnapshotFile, SnapshotWriter};

/// Purchaser-supplied order fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    pub minecraft_username: String,
    pub rank_name: String,
    pub duration: Duration,
    pub price_usd: u64,
    #[serde(default)]
    pub stripe_session_id: Option<String>,
}

/// Result of reconciling one order against its checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ReconcileOutcome {
    NotFound,
    NoSession,
    AlreadySettled { status: OrderStatus },
    Paid,
    Unpaid { error: String },
}

pub struct Backend {
    state: Mutex<Snapshot>,
    catalog: Catalog,
    gateway: StripeGateway,
    snapshots: Option<Arc<SnapshotWriter>>,
    enforce_catalog_price: bool,
    metrics: Arc<Metrics>,
}

impl Backend {
    pub fn new(
        initial: Snapshot,
        catalog: Catalog,
        gateway: StripeGateway,
        snapshot_file: Option<SnapshotFile>,
        enforce_catalog_price: bool,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state: Mutex::new(initial),
            catalog,
            gateway,
            snapshots: snapshot_file.map(SnapshotWriter::new),
            enforce_catalog_price,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn state(&self) -> MutexGuard<'_, Snapshot> {
        // A panic mid-mutation cannot leave a table half-written: every
        // mutation is a single insert or field store.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a copy of the tables while the caller still holds the lock.
    ///
    /// The in-memory tables stay authoritative: a failed write is logged and
    /// retried implicitly by the next mutation.
    fn persist(&self, state: &Snapshot) {
        if let Some(writer) = &self.snapshots {
            writer.submit(state.clone());
        }
    }

    /// Write the current tables synchronously. Used on shutdown.
    pub fn flush_state(&self) -> anyhow::Result<()> {
        match &self.snapshots {
            Some(writer) => writer.flush(&self.state()),
            None => Ok(()),
        }
    }

    fn require_admin(state: &Snapshot, caller: &Caller, operation: &'static str) -> ServiceResult<()> {
        if state.registry.is_admin(caller) {
            Ok(())
        } else {
            warn!(caller = ?caller.identity().map(Identity::as_str), operation, "Rejected non-admin call");
            Err(ServiceError::Unauthorized { operation })
        }
    }

    // ---------------------------------------------------------------------
    // Identity & roles
    // ---------------------------------------------------------------------

    pub fn caller_role(&self, caller: &Caller) -> Role {
        self.state().registry.role_of(caller)
    }

    pub fn is_caller_admin(&self, caller: &Caller) -> bool {
        self.state().registry.is_admin(caller)
    }

    pub fn assign_role(&self, caller: &Caller, target: Identity, role: Role) -> ServiceResult<()> {
        let mut state = self.state();
        Self::require_admin(&state, caller, "assignCallerUserRole")?;
        info!(target = %target, role = ?role, "Assigning role");
        state.registry.assign(target, role);
        self.persist(&state);
        Ok(())
    }

    /// One-time bootstrap: the check and the write happen under one lock.
    pub fn claim_first_admin(&self, caller: &Caller) -> bool {
        let Some(identity) = caller.identity() else {
            warn!("Anonymous caller attempted to claim admin");
            return false;
        };
        let mut state = self.state();
        if !state.registry.claim_first_admin(identity) {
            return false;
        }
        self.persist(&state);
        true
    }

    pub fn save_caller_profile(&self, caller: &Caller, profile: UserProfile) -> ServiceResult<()> {
        let identity = caller.identity().ok_or(ServiceError::Anonymous {
            operation: "saveCallerUserProfile",
        })?;
        let mut state = self.state();
        state.registry.save_profile(identity.clone(), profile);
        self.persist(&state);
        Ok(())
    }

    pub fn caller_profile(&self, caller: &Caller) -> Option<UserProfile> {
        let identity = caller.identity()?;
        self.state().registry.profile(identity).cloned()
    }

    /// Admins may read any profile; others only their own. A denied read is
    /// indistinguishable from a missing profile.
    pub fn user_profile(&self, caller: &Caller, target: &Identity) -> Option<UserProfile> {
        let state = self.state();
        let is_self = caller.identity() == Some(target);
        if !is_self && !state.registry.is_admin(caller) {
            return None;
        }
        state.registry.profile(target).cloned()
    }

    // ---------------------------------------------------------------------
    // Catalog & orders
    // ---------------------------------------------------------------------

    pub fn ranks(&self) -> Vec<Rank> {
        self.catalog.ranks().to_vec()
    }

    pub fn create_order(&self, caller: &Caller, req: CreateOrder) -> ServiceResult<u64> {
        let username = req.minecraft_username.trim().to_string();
        if !is_valid_username(&username) {
            return Err(ServiceError::invalid(
                "minecraftUsername",
                "must be 3-16 letters, digits or underscores",
            ));
        }

        match self.catalog.price_for(&req.rank_name, req.duration) {
            Some(price) if price == req.price_usd => {}
            expected if self.enforce_catalog_price => {
                let message = match expected {
                    Some(price) => format!("expected {price}, got {}", req.price_usd),
                    None => format!("unknown rank {:?}", req.rank_name),
                };
                return Err(ServiceError::invalid("priceUsd", message));
            }
            expected => {
                warn!(
                    rank = %req.rank_name,
                    duration = ?req.duration,
                    submitted = req.price_usd,
                    catalog = ?expected,
                    "Order price does not match catalog"
                );
            }
        }

        let session_id = req.stripe_session_id.unwrap_or_default().trim().to_string();

        let mut state = self.state();
        // One order per checkout session.
        if !session_id.is_empty() && state.orders.session_in_use(&session_id) {
            return Err(ServiceError::invalid(
                "stripeSessionId",
                "session is already bound to another order",
            ));
        }
        let id = state.orders.create(NewOrder {
            owner: caller.identity().cloned(),
            minecraft_username: username,
            rank_name: req.rank_name,
            duration: req.duration,
            price_usd: req.price_usd,
            stripe_session_id: session_id,
        });
        self.persist(&state);
        drop(state);

        self.metrics.record_order();
        info!(order_id = id, "Order created");
        Ok(id)
    }

    /// Returns `Ok(false)` when the order does not exist.
    pub fn update_order_status(&self, caller: &Caller, order_id: u64, status: OrderStatus) -> ServiceResult<bool> {
        let mut state = self.state();
        Self::require_admin(&state, caller, "updateOrderStatus")?;
        if !state.orders.set_status(order_id, status) {
            return Ok(false);
        }
        self.persist(&state);
        drop(state);

        self.metrics.record_status_update();
        info!(order_id, status = ?status, "Order status updated");
        Ok(true)
    }

    pub fn orders_by_username(&self, username: &str) -> Vec<Order> {
        self.state().orders.by_username(username)
    }

    pub fn all_orders(&self, caller: &Caller) -> ServiceResult<Vec<Order>> {
        let state = self.state();
        Self::require_admin(&state, caller, "getAllOrders")?;
        Ok(state.orders.all())
    }

    // ---------------------------------------------------------------------
    // Payment configuration & gateway
    // ---------------------------------------------------------------------

    pub fn is_stripe_configured(&self) -> bool {
        self.state().payment.is_configured()
    }

    pub fn set_stripe_configuration(&self, caller: &Caller, config: StripeConfiguration) -> ServiceResult<()> {
        let mut state = self.state();
        Self::require_admin(&state, caller, "setStripeConfiguration")?;
        info!(countries = config.allowed_countries.len(), "Stripe configuration updated");
        state.payment.set(config);
        self.persist(&state);
        Ok(())
    }

    fn stripe_config(&self) -> Option<StripeConfiguration> {
        self.state().payment.current().cloned()
    }

    /// Create a hosted checkout session. Fails with `NotConfigured` before
    /// any network activity when no key is stored.
    pub async fn create_checkout_session(
        &self,
        caller: &Caller,
        attempt: Option<&str>,
        items: &[ShoppingItem],
        success_url: &str,
        cancel_url: &str,
    ) -> ServiceResult<CheckoutSession> {
        let config = self.stripe_config().ok_or(ServiceError::NotConfigured)?;
        validate_cart(items, success_url, cancel_url)?;

        let result = self
            .gateway
            .create_session(
                &config,
                caller.identity().map(Identity::as_str),
                attempt.filter(|a| !a.is_empty()),
                items,
                success_url,
                cancel_url,
            )
            .await;

        self.metrics.record_session(result.is_ok());
        match &result {
            Ok(session) => info!(session_id = %session.id, "Checkout session created"),
            Err(e) => warn!(error = %e, "Checkout session creation failed"),
        }
        result
    }

    pub async fn session_status(&self, session_id: &str) -> SessionStatus {
        let status = match self.stripe_config() {
            Some(config) => self.gateway.session_status(&config, session_id).await,
            None => SessionStatus::Failed {
                error: ServiceError::NotConfigured.to_string(),
            },
        };
        self.metrics
            .record_status_lookup(matches!(status, SessionStatus::Failed { .. }));
        status
    }

    /// Admin-triggered reconciliation of a single order.
    pub async fn reconcile_order(&self, caller: &Caller, order_id: u64) -> ServiceResult<ReconcileOutcome> {
        Self::require_admin(&self.state(), caller, "reconcileOrder")?;
        self.reconcile(order_id).await
    }

    /// Pending orders with a correlated session, for the background reconciler.
    pub fn pending_sessions(&self) -> Vec<(u64, String)> {
        self.state().orders.pending_sessions()
    }

    /// Check an order's session and move it to `paid` if the processor
    /// confirms payment of the order's price and the order is still pending
    /// afterwards.
    pub async fn reconcile(&self, order_id: u64) -> ServiceResult<ReconcileOutcome> {
        let (session_id, price_usd) = {
            let state = self.state();
            match state.orders.get(order_id) {
                None => return Ok(ReconcileOutcome::NotFound),
                Some(order) if order.status != OrderStatus::Pending => {
                    return Ok(ReconcileOutcome::AlreadySettled {
                        status: order.status,
                    });
                }
                Some(order) if order.stripe_session_id.is_empty() => {
                    return Ok(ReconcileOutcome::NoSession);
                }
                Some(order) => (order.stripe_session_id.clone(), order.price_usd),
            }
        };

        let response = match self.session_status(&session_id).await {
            SessionStatus::Completed { response, .. } => response,
            SessionStatus::Failed { error } => return Ok(ReconcileOutcome::Unpaid { error }),
        };
        let charged = SessionCharge::from_response(&response)
            .ok_or_else(|| "session does not report an amount".to_string())
            .and_then(|charge| charge.covers_usd(price_usd));
        if let Err(error) = charged {
            warn!(order_id, session_id = %session_id, reason = %error, "Session does not pay for order");
            return Ok(ReconcileOutcome::Unpaid { error });
        }

        // The order may have changed while the lookup was in flight.
        let mut state = self.state();
        match state.orders.mark_paid_if_pending(order_id, &session_id) {
            None => Ok(ReconcileOutcome::NotFound),
            Some(OrderStatus::Pending) => {
                self.persist(&state);
                drop(state);
                self.metrics.record_reconciled();
                info!(order_id, session_id = %session_id, "Order marked paid");
                Ok(ReconcileOutcome::Paid)
            }
            Some(status) => Ok(ReconcileOutcome::AlreadySettled { status }),
        }
    }
}
