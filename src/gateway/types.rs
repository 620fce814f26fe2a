//! Request and response DTOs for the gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderStatus};

/// Credentials for registration and login; `login` doubles as the email.
#[derive(Debug, Deserialize, ToSchema)]
pub struct Credentials {
    #[schema(example = "user@example.com")]
    #[serde(default)]
    pub login: String,
    #[schema(example = "password123")]
    #[serde(default)]
    pub password: String,
    /// Display name; optional at registration.
    #[serde(default)]
    pub name: String,
}

/// Body of `POST /api/user/balance/withdraw`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WithdrawRequest {
    #[schema(example = "2377225624")]
    pub order: String,
    #[schema(value_type = f64, example = 751.0)]
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

/// One order in the `GET /api/user/orders` listing. `accrual` is omitted
/// while it is zero.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    #[schema(example = "79927398713")]
    pub number: String,
    pub status: OrderStatus,
    /// Upload time, RFC 3339.
    #[schema(example = "2020-12-10T15:15:45+03:00")]
    pub uploaded_at: String,
    #[schema(value_type = Option<f64>)]
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            number: order.number.clone(),
            status: order.status,
            uploaded_at: order
                .uploaded_at
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            accrual: if order.accrual.is_zero() {
                None
            } else {
                Some(order.accrual)
            },
        }
    }
}
