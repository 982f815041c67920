//! Order table.
//!
//! Orders move `pending -> paid -> fulfilled`. Admin status writes are not
//! restricted to that path; only the payment-driven `pending -> paid` step
//! (see [`OrderStore::mark_paid_if_pending`]) checks the current status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::Duration;
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Fulfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    pub owner: Option<Identity>,
    pub minecraft_username: String,
    pub rank_name: String,
    pub duration: Duration,
    pub price_usd: u64,
    pub stripe_session_id: String,
    pub status: OrderStatus,
    /// Nanoseconds since the Unix epoch.
    pub created_at: u64,
}

/// Fields supplied by the purchaser when an order is created.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub owner: Option<Identity>,
    pub minecraft_username: String,
    pub rank_name: String,
    pub duration: Duration,
    pub price_usd: u64,
    pub stripe_session_id: String,
}

/// Orders keyed by id. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStore {
    next_id: u64,
    orders: BTreeMap<u64, Order>,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self {
            next_id: 1,
            orders: BTreeMap::new(),
        }
    }
}

impl OrderStore {
    pub fn create(&mut self, new: NewOrder) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.orders.insert(
            id,
            Order {
                id,
                owner: new.owner,
                minecraft_username: new.minecraft_username,
                rank_name: new.rank_name,
                duration: new.duration,
                price_usd: new.price_usd,
                stripe_session_id: new.stripe_session_id,
                status: OrderStatus::Pending,
                created_at: now_nanos(),
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Overwrite an order's status. Returns `false` if the order is unknown.
    pub fn set_status(&mut self, id: u64, status: OrderStatus) -> bool {
        match self.orders.get_mut(&id) {
            Some(order) => {
                order.status = status;
                true
            }
            None => false,
        }
    }

    /// Move an order to `paid` only if it is still `pending` and still
    /// correlated with `session_id`. Returns the status it was found in.
    pub fn mark_paid_if_pending(&mut self, id: u64, session_id: &str) -> Option<OrderStatus> {
        let order = self.orders.get_mut(&id)?;
        let found = order.status;
        if found == OrderStatus::Pending && order.stripe_session_id == session_id {
            order.status = OrderStatus::Paid;
        }
        Some(found)
    }

    /// Whether any order is already correlated with `session_id`.
    pub fn session_in_use(&self, session_id: &str) -> bool {
        self.orders.values().any(|o| o.stripe_session_id == session_id)
    }

    /// Exact, case-sensitive match on the purchaser handle.
    pub fn by_username(&self, username: &str) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| o.minecraft_username == username)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    /// `(order id, session id)` for every pending order that has a session.
    pub fn pending_sessions(&self) -> Vec<(u64, String)> {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && !o.stripe_session_id.is_empty())
            .map(|o| (o.id, o.stripe_session_id.clone()))
            .collect()
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Boundary check for purchaser handles: 3-16 of `[A-Za-z0-9_]`.
pub fn is_valid_username(username: &str) -> bool {
    (3..=16).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(username: &str, session: &str) -> NewOrder {
        NewOrder {
            owner: None,
            minecraft_username: username.into(),
            rank_name: "SEAMON".into(),
            duration: Duration::SevenDay,
            price_usd: 15,
            stripe_session_id: session.into(),
        }
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut store = OrderStore::default();
        let ids: Vec<u64> = (0..50).map(|_| store.create(new_order("Steve", ""))).collect();
        assert_eq!(ids[0], 1);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn username_lookup_is_exact() {
        let mut store = OrderStore::default();
        store.create(new_order("Alice", ""));
        store.create(new_order("alice", ""));
        store.create(new_order("Bob", ""));
        store.create(new_order("Alice", ""));

        let found = store.by_username("Alice");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|o| o.minecraft_username == "Alice"));
        assert!(store.by_username("Carol").is_empty());
    }

    #[test]
    fn set_status_on_unknown_order() {
        let mut store = OrderStore::default();
        assert!(!store.set_status(7, OrderStatus::Paid));
        assert!(store.all().is_empty());
    }

    #[test]
    fn admin_writes_are_unrestricted() {
        let mut store = OrderStore::default();
        let id = store.create(new_order("Steve", ""));
        assert!(store.set_status(id, OrderStatus::Fulfilled));
        assert!(store.set_status(id, OrderStatus::Pending));
        assert_eq!(store.get(id).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn mark_paid_requires_pending_and_matching_session() {
        let mut store = OrderStore::default();
        let id = store.create(new_order("Steve", "cs_test_1"));

        assert_eq!(
            store.mark_paid_if_pending(id, "cs_other"),
            Some(OrderStatus::Pending)
        );
        assert_eq!(store.get(id).unwrap().status, OrderStatus::Pending);

        assert_eq!(
            store.mark_paid_if_pending(id, "cs_test_1"),
            Some(OrderStatus::Pending)
        );
        assert_eq!(store.get(id).unwrap().status, OrderStatus::Paid);

        store.set_status(id, OrderStatus::Fulfilled);
        assert_eq!(
            store.mark_paid_if_pending(id, "cs_test_1"),
            Some(OrderStatus::Fulfilled)
        );
        assert_eq!(store.get(id).unwrap().status, OrderStatus::Fulfilled);
        assert_eq!(store.mark_paid_if_pending(99, "cs_test_1"), None);
    }

    #[test]
    fn pending_sessions_skip_orders_without_session() {
        let mut store = OrderStore::default();
        store.create(new_order("Steve", ""));
        let id = store.create(new_order("Alex", "cs_test_2"));
        assert_eq!(store.pending_sessions(), vec![(id, "cs_test_2".to_string())]);
    }

    #[test]
    fn session_in_use_ignores_other_sessions() {
        let mut store = OrderStore::default();
        store.create(new_order("Steve", "cs_test_1"));
        assert!(store.session_in_use("cs_test_1"));
        assert!(!store.session_in_use("cs_test_2"));
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("Steve"));
        assert!(is_valid_username("a_b"));
        assert!(is_valid_username("abcdefghijklmnop"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("abcdefghijklmnopq"));
        assert!(!is_valid_username("bad name"));
        assert!(!is_valid_username("émile"));
    }
}
