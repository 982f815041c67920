//! Background payment reconciliation.
//!
//! Periodically collects pending orders that carry a checkout session id and
//! asks the processor whether each session was paid. Confirmed orders move to
//! `paid`; everything else is left untouched for the next pass. Lookups run
//! concurrently, bounded by a semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::service::{Backend, ReconcileOutcome};

/// Run reconciliation passes forever, one every `interval`.
pub async fn run_reconciler(backend: Arc<Backend>, interval: Duration, concurrency: usize) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    info!(interval = ?interval, concurrency, "Reconciler started");

    loop {
        ticker.tick().await;
        if !backend.is_stripe_configured() {
            debug!("Stripe not configured, skipping reconcile pass");
            continue;
        }
        reconcile_pass(&backend, &semaphore).await;
    }
}

/// Reconcile every pending order with a session once. Returns how many
/// orders were marked paid.
#[instrument(skip_all)]
pub async fn reconcile_pass(backend: &Arc<Backend>, semaphore: &Arc<Semaphore>) -> usize {
    let pending = backend.pending_sessions();
    if pending.is_empty() {
        return 0;
    }

    let start = Instant::now();
    info!(count = pending.len(), "Reconciling pending orders");

    let mut tasks = JoinSet::new();
    for (order_id, session_id) in pending {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                error!("Semaphore closed, stopping reconcile pass");
                break;
            }
        };
        let backend = backend.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let outcome = backend.reconcile(order_id).await;
            (order_id, session_id, outcome)
        });
    }

    let mut paid = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((order_id, _, Ok(ReconcileOutcome::Paid))) => {
                paid += 1;
                debug!(order_id, "Reconciled to paid");
            }
            Ok((order_id, session_id, Ok(ReconcileOutcome::Unpaid { error }))) => {
                debug!(order_id, session_id = %session_id, reason = %error, "Session not paid yet");
            }
            Ok((order_id, _, Ok(outcome))) => {
                debug!(order_id, outcome = ?outcome, "Order settled elsewhere");
            }
            Ok((order_id, _, Err(e))) => {
                warn!(order_id, error = %e, "Reconcile failed");
            }
            Err(e) => {
                error!(error = %e, "Reconcile task panicked");
            }
        }
    }

    info!(
        paid,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Reconcile pass finished"
    );
    paid
}
