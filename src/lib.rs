//! bonusledger - a loyalty-points service for an online retailer.
//!
//! Authenticated users upload order numbers; a background dispatcher polls
//! an external accrual service for earned points, credits them to an
//! append-only per-user ledger, and users spend the balance through
//! withdrawals.
//!
//! # Modules
//!
//! - [`config`] - CLI flags and environment overrides
//! - [`logging`] - tracing initialization
//! - [`models`] - domain types (users, orders, ledger rows)
//! - [`luhn`] - order-number checksum validation
//! - [`store`] - durable Postgres store behind the `Keeper` trait
//! - [`cache`] - in-process user/order maps in front of the store
//! - [`workerpool`] - bounded background task executor
//! - [`accrual`] - external-service polling dispatcher and client
//! - [`auth`] - password digests, JWT, request middleware
//! - [`gateway`] - HTTP routes, handlers and the server loop

pub mod accrual;
pub mod auth;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod luhn;
pub mod models;
pub mod store;
pub mod workerpool;

// Convenient re-exports at crate root
pub use accrual::{AccrualClient, AccrualService};
pub use cache::MemCache;
pub use config::Options;
pub use models::{AccrualReply, BalanceSummary, Order, OrderStatus, User, WithdrawalRecord};
pub use store::{Keeper, PgStore, Saved, StoreError};
pub use workerpool::WorkerPool;
