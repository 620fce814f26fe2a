//! Durable store: the `Keeper` capability the cache layer consumes.
//!
//! The cache holds a `Keeper` and calls down; the store never calls back up.
//! `PgStore` is the Postgres implementation; tests substitute their own.

pub mod pg;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccrualReply, BalanceSummary, Order, User, WithdrawalRecord};

pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Withdrawal amount exceeds the user's current balance.
    #[error("insufficient balance")]
    Insufficient,

    /// No durable store is configured (service runs on the in-process maps).
    #[error("durable store is not configured")]
    Unavailable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of an insert against a unique key: either a freshly created row
/// or the canonical row that already occupied the key.
#[derive(Debug, Clone, PartialEq)]
pub enum Saved<T> {
    Fresh(T),
    Existing(T),
}

impl<T> Saved<T> {
    pub fn row(&self) -> &T {
        match self {
            Saved::Fresh(row) | Saved::Existing(row) => row,
        }
    }

    pub fn into_row(self) -> T {
        match self {
            Saved::Fresh(row) | Saved::Existing(row) => row,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Saved::Existing(_))
    }
}

/// Transactional persistence for users, orders and the points ledger.
#[async_trait]
pub trait Keeper: Send + Sync {
    /// All orders keyed by number; called once to warm the cache.
    async fn load_orders(&self) -> Result<HashMap<String, Order>, StoreError>;

    /// All users keyed by email; called once to warm the cache.
    async fn load_users(&self) -> Result<HashMap<String, User>, StoreError>;

    /// Insert a user; on a unique-email collision the stored row is returned
    /// as `Existing`.
    async fn save_user(&self, user: &User) -> Result<Saved<User>, StoreError>;

    /// Insert an order; on a unique-number collision the stored row is
    /// returned as `Existing` (its `user_id` tells the caller who owns it).
    async fn save_order(&self, order: &Order) -> Result<Saved<Order>, StoreError>;

    /// Numbers of up to 100 orders still awaiting a terminal status.
    async fn open_orders(&self) -> Result<Vec<String>, StoreError>;

    /// Batch status update from external accrual replies; one statement,
    /// terminal rows are left untouched.
    async fn update_order_statuses(&self, updates: &[AccrualReply]) -> Result<(), StoreError>;

    /// Insert one credit row per reply unless a credit for that order number
    /// already exists.
    async fn insert_accruals(
        &self,
        accruals: &HashMap<String, AccrualReply>,
    ) -> Result<(), StoreError>;

    /// Spend `sum` points against `order`, consuming the user's accruals
    /// oldest-first inside a single serialized transaction.
    async fn withdraw(&self, user_id: Uuid, order: &str, sum: Decimal) -> Result<(), StoreError>;

    async fn balance(&self, user_id: Uuid) -> Result<BalanceSummary, StoreError>;

    /// Completed withdrawals, ascending by `processed_at`.
    async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError>;

    /// Connectivity probe with an aggressive deadline; never errors.
    async fn ping(&self) -> bool;

    /// Release the underlying connections.
    async fn close(&self);
}
