//! In-process cache in front of the durable store.
//!
//! Two maps (users by email, orders by number) behind independent
//! read-write locks, warmed once at startup. Writes go through the keeper
//! first and install the canonical row it returns; ledger operations pass
//! straight through. No lock is ever held across a keeper call.
//!
//! Without a keeper the maps start empty and writes live only in memory;
//! ledger pass-throughs report the store as unavailable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{AccrualReply, BalanceSummary, Order, User, WithdrawalRecord};
use crate::store::{Keeper, Saved, StoreError};

pub struct MemCache {
    users: RwLock<HashMap<String, User>>,
    orders: RwLock<HashMap<String, Order>>,
    keeper: Option<Arc<dyn Keeper>>,
}

impl MemCache {
    /// Build the cache, warming both maps from the keeper when present.
    /// A failed load logs and leaves the map empty rather than failing
    /// startup.
    pub async fn new(keeper: Option<Arc<dyn Keeper>>) -> Self {
        let mut users = HashMap::new();
        let mut orders = HashMap::new();

        if let Some(k) = &keeper {
            match k.load_users().await {
                Ok(loaded) => users = loaded,
                Err(e) => tracing::warn!("cannot load user data: {e}"),
            }
            match k.load_orders().await {
                Ok(loaded) => orders = loaded,
                Err(e) => tracing::warn!("cannot load order data: {e}"),
            }
        }

        tracing::info!(users = users.len(), orders = orders.len(), "cache warmed");

        Self {
            users: RwLock::new(users),
            orders: RwLock::new(orders),
            keeper,
        }
    }

    fn keeper(&self) -> Result<&Arc<dyn Keeper>, StoreError> {
        self.keeper.as_ref().ok_or(StoreError::Unavailable)
    }

    pub fn user(&self, email: &str) -> Option<User> {
        self.users.read().unwrap().get(email).cloned()
    }

    pub fn order(&self, number: &str) -> Option<Order> {
        self.orders.read().unwrap().get(number).cloned()
    }

    /// Save a user and install the canonical row. A `Saved::Existing`
    /// outcome is forwarded untouched; the handler decides what a duplicate
    /// registration means. Without a keeper the map itself enforces the
    /// unique email.
    pub async fn insert_user(&self, user: User) -> Result<Saved<User>, StoreError> {
        let saved = match &self.keeper {
            Some(k) => k.save_user(&user).await?,
            None => match self.user(&user.email) {
                Some(existing) => Saved::Existing(existing),
                None => Saved::Fresh(user),
            },
        };

        let row = saved.row().clone();
        self.users.write().unwrap().insert(row.email.clone(), row);

        Ok(saved)
    }

    /// Save an order and install the canonical row; symmetric with
    /// [`MemCache::insert_user`].
    pub async fn insert_order(&self, order: Order) -> Result<Saved<Order>, StoreError> {
        let saved = match &self.keeper {
            Some(k) => k.save_order(&order).await?,
            None => match self.order(&order.number) {
                Some(existing) => Saved::Existing(existing),
                None => Saved::Fresh(order),
            },
        };

        let row = saved.row().clone();
        self.orders.write().unwrap().insert(row.number.clone(), row);

        Ok(saved)
    }

    /// Snapshot of the user's orders, most recently uploaded first.
    pub fn user_orders(&self, user_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .unwrap()
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();

        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        orders
    }

    /// Batch-apply external replies: durable first, then the cached rows.
    /// Terminal cached rows are left alone, mirroring the store's guard.
    pub async fn update_order_statuses(&self, updates: &[AccrualReply]) -> Result<(), StoreError> {
        self.keeper()?.update_order_statuses(updates).await?;

        let mut orders = self.orders.write().unwrap();
        for update in updates {
            if let Some(order) = orders.get_mut(&update.order) {
                if order.status.is_terminal() {
                    continue;
                }
                order.status = update.status;
                order.accrual = update.accrual;
            }
        }

        Ok(())
    }

    pub async fn insert_accruals(
        &self,
        accruals: &HashMap<String, AccrualReply>,
    ) -> Result<(), StoreError> {
        self.keeper()?.insert_accruals(accruals).await
    }

    /// Open-order discovery stays with the store: its status filter is
    /// authoritative.
    pub async fn open_orders(&self) -> Result<Vec<String>, StoreError> {
        self.keeper()?.open_orders().await
    }

    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order: &str,
        sum: Decimal,
    ) -> Result<(), StoreError> {
        self.keeper()?.withdraw(user_id, order, sum).await
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<BalanceSummary, StoreError> {
        self.keeper()?.balance(user_id).await
    }

    pub async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
        self.keeper()?.withdrawals(user_id).await
    }

    pub async fn ping(&self) -> bool {
        match &self.keeper {
            Some(k) => k.ping().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Keeper stub backed by plain maps; unique keys behave like the real
    /// store's constraints.
    #[derive(Default)]
    struct StubKeeper {
        users: Mutex<HashMap<String, User>>,
        orders: Mutex<HashMap<String, Order>>,
    }

    #[async_trait]
    impl Keeper for StubKeeper {
        async fn load_orders(&self) -> Result<HashMap<String, Order>, StoreError> {
            Ok(self.orders.lock().unwrap().clone())
        }

        async fn load_users(&self) -> Result<HashMap<String, User>, StoreError> {
            Ok(self.users.lock().unwrap().clone())
        }

        async fn save_user(&self, user: &User) -> Result<Saved<User>, StoreError> {
            let mut users = self.users.lock().unwrap();
            if let Some(existing) = users.get(&user.email) {
                return Ok(Saved::Existing(existing.clone()));
            }
            users.insert(user.email.clone(), user.clone());
            Ok(Saved::Fresh(user.clone()))
        }

        async fn save_order(&self, order: &Order) -> Result<Saved<Order>, StoreError> {
            let mut orders = self.orders.lock().unwrap();
            if let Some(existing) = orders.get(&order.number) {
                return Ok(Saved::Existing(existing.clone()));
            }
            orders.insert(order.number.clone(), order.clone());
            Ok(Saved::Fresh(order.clone()))
        }

        async fn open_orders(&self) -> Result<Vec<String>, StoreError> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .values()
                .filter(|o| !o.status.is_terminal() && !o.number.is_empty())
                .map(|o| o.number.clone())
                .collect())
        }

        async fn update_order_statuses(&self, updates: &[AccrualReply]) -> Result<(), StoreError> {
            let mut orders = self.orders.lock().unwrap();
            for update in updates {
                if let Some(order) = orders.get_mut(&update.order) {
                    if !order.status.is_terminal() {
                        order.status = update.status;
                    }
                }
            }
            Ok(())
        }

        async fn insert_accruals(
            &self,
            _accruals: &HashMap<String, AccrualReply>,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn withdraw(
            &self,
            _user_id: Uuid,
            _order: &str,
            _sum: Decimal,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn balance(&self, _user_id: Uuid) -> Result<BalanceSummary, StoreError> {
            Ok(BalanceSummary {
                current: Decimal::ZERO,
                withdrawn: Decimal::ZERO,
            })
        }

        async fn withdrawals(&self, _user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            hash: vec![1, 2, 3],
            name: String::new(),
        }
    }

    #[tokio::test]
    async fn insert_user_is_readable_right_after() {
        let cache = MemCache::new(Some(Arc::new(StubKeeper::default()))).await;

        let saved = cache.insert_user(user("a@x")).await.unwrap();
        assert!(!saved.is_existing());

        let cached = cache.user("a@x").expect("user must be cached");
        assert_eq!(&cached, saved.row());
    }

    #[tokio::test]
    async fn duplicate_email_forwards_the_conflict() {
        let cache = MemCache::new(Some(Arc::new(StubKeeper::default()))).await;

        let first = cache.insert_user(user("a@x")).await.unwrap();
        let second = cache.insert_user(user("a@x")).await.unwrap();

        assert!(second.is_existing());
        // the canonical row is the first registration, not the retry
        assert_eq!(second.row().id, first.row().id);
    }

    #[tokio::test]
    async fn order_conflict_reports_the_original_owner() {
        let cache = MemCache::new(Some(Arc::new(StubKeeper::default()))).await;
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();

        cache
            .insert_order(Order::new("79927398713", owner))
            .await
            .unwrap();
        let second = cache
            .insert_order(Order::new("79927398713", other))
            .await
            .unwrap();

        assert!(second.is_existing());
        assert_eq!(second.row().user_id, owner);
    }

    #[tokio::test]
    async fn user_orders_come_back_newest_first() {
        let cache = MemCache::new(Some(Arc::new(StubKeeper::default()))).await;
        let me = Uuid::new_v4();

        let mut older = Order::new("79927398713", me);
        older.uploaded_at = Utc::now() - Duration::hours(1);
        let newer = Order::new("4561261212345467", me);
        let foreign = Order::new("18", Uuid::new_v4());

        cache.insert_order(older).await.unwrap();
        cache.insert_order(newer).await.unwrap();
        cache.insert_order(foreign).await.unwrap();

        let listed = cache.user_orders(me);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].number, "4561261212345467");
        assert_eq!(listed[1].number, "79927398713");
    }

    #[tokio::test]
    async fn status_updates_reach_cached_rows_but_not_terminal_ones() {
        let cache = MemCache::new(Some(Arc::new(StubKeeper::default()))).await;
        let me = Uuid::new_v4();

        cache
            .insert_order(Order::new("79927398713", me))
            .await
            .unwrap();
        let mut done = Order::new("4561261212345467", me);
        done.status = OrderStatus::Invalid;
        cache.insert_order(done).await.unwrap();

        cache
            .update_order_statuses(&[
                AccrualReply {
                    order: "79927398713".into(),
                    status: OrderStatus::Processed,
                    accrual: dec!(500),
                },
                AccrualReply {
                    order: "4561261212345467".into(),
                    status: OrderStatus::Processed,
                    accrual: dec!(7),
                },
            ])
            .await
            .unwrap();

        let updated = cache.order("79927398713").unwrap();
        assert_eq!(updated.status, OrderStatus::Processed);
        assert_eq!(updated.accrual, dec!(500));

        let untouched = cache.order("4561261212345467").unwrap();
        assert_eq!(untouched.status, OrderStatus::Invalid);
        assert_eq!(untouched.accrual, Decimal::ZERO);
    }

    #[tokio::test]
    async fn without_a_keeper_writes_stay_in_memory() {
        let cache = MemCache::new(None).await;

        cache.insert_user(user("a@x")).await.unwrap();
        assert!(cache.user("a@x").is_some());

        assert!(!cache.ping().await);
        assert!(matches!(
            cache.balance(Uuid::new_v4()).await,
            Err(StoreError::Unavailable)
        ));
        assert!(matches!(
            cache.open_orders().await,
            Err(StoreError::Unavailable)
        ));
    }
}
