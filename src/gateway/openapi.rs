//! OpenAPI document for the loyalty API.

use utoipa::OpenApi;

use super::handlers;
use super::types::{Credentials, OrderView, WithdrawRequest};
use crate::models::{BalanceSummary, OrderStatus, WithdrawalRecord};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register,
        handlers::login,
        handlers::submit_order,
        handlers::list_orders,
        handlers::balance,
        handlers::withdraw,
        handlers::list_withdrawals,
        handlers::ping,
    ),
    components(schemas(
        Credentials,
        WithdrawRequest,
        OrderView,
        OrderStatus,
        BalanceSummary,
        WithdrawalRecord,
    )),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "orders", description = "Order upload and listing"),
        (name = "balance", description = "Balance, withdrawal and history"),
        (name = "ops", description = "Operational probes"),
    ),
    info(
        title = "bonusledger",
        description = "Loyalty points service API"
    )
)]
pub struct ApiDoc;
