//! Domain types shared across the store, cache, accrual pipeline and gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Processing state of an order, backed by the `statuses` Postgres enum.
///
/// Transitions are monotone: `NEW` → (`PROCESSING`) → `PROCESSED` | `INVALID`.
/// Terminal orders are never re-polled and never rewritten.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema, Default,
)]
#[sqlx(type_name = "statuses", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    #[default]
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// Terminal orders have left the accrual polling set for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user. Created once at registration, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Deterministic salted digest of (email, password).
    pub hash: Vec<u8>,
    pub name: String,
}

/// An uploaded order. `number` is the external identity (Luhn-valid digits);
/// `id` is the internal key referenced nowhere outside the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub number: String,
    pub user_id: Uuid,
    pub uploaded_at: DateTime<Utc>,
    pub status: OrderStatus,
    /// Points credited for this order; zero until the accrual lands.
    pub accrual: Decimal,
}

impl Order {
    /// A fresh `NEW` order for `number` owned by `user_id`.
    pub fn new(number: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            user_id,
            uploaded_at: Utc::now(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
        }
    }
}

/// Response of the external accrual service for a single order.
///
/// `accrual` is absent from the body while the amount is still being
/// computed; it decodes to zero in that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: OrderStatus,
    #[serde(default, with = "rust_decimal::serde::float")]
    pub accrual: Decimal,
}

/// Current balance and lifetime withdrawn total for a user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct BalanceSummary {
    #[schema(value_type = f64, example = 500.5)]
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[schema(value_type = f64, example = 42.0)]
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// One completed withdrawal, keyed by the order the points were spent on.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WithdrawalRecord {
    pub order: String,
    #[schema(value_type = f64, example = 500.0)]
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}
