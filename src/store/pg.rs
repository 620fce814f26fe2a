//! Postgres implementation of the [`Keeper`] capability.
//!
//! Owns every SQL statement in the service, including the serialized
//! withdrawal transaction. Batch statements bind `UNNEST` arrays so each
//! batch stays a single atomic statement.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{Keeper, Saved, StoreError};
use crate::models::{AccrualReply, BalanceSummary, Order, User, WithdrawalRecord};

/// Deadline for the readiness probe; probes must fail fast.
const PING_DEADLINE: Duration = Duration::from_secs(1);

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect, apply pending migrations, and hand back the store.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

        tracing::info!("connected to postgres, migrations up to date");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        hash: row.get("hash"),
        name: row.get("name"),
    }
}

fn order_from_row(row: &PgRow) -> Order {
    Order {
        id: row.get("id"),
        number: row.get("number"),
        user_id: row.get("user_id"),
        uploaded_at: row.get("date"),
        status: row.get("status"),
        accrual: row.get("accrual"),
    }
}

/// Order row joined to its credit ledger entry (zero when none landed yet).
const SELECT_ORDER: &str = r#"
    SELECT
        o.id,
        o.number,
        o.user_id,
        o.date,
        o.status,
        COALESCE(s.accrual, 0) AS accrual
    FROM orders AS o
    LEFT JOIN savings_account AS s
        ON s.id_order_in = o.number
        AND s.id_order_out IS NULL
"#;

#[async_trait]
impl Keeper for PgStore {
    async fn load_orders(&self) -> Result<HashMap<String, Order>, StoreError> {
        let rows = sqlx::query(SELECT_ORDER).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(order_from_row)
            .map(|o| (o.number.clone(), o))
            .collect())
    }

    async fn load_users(&self) -> Result<HashMap<String, User>, StoreError> {
        let rows = sqlx::query("SELECT id, email, hash, name FROM users")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(user_from_row)
            .map(|u| (u.email.clone(), u))
            .collect())
    }

    async fn save_user(&self, user: &User) -> Result<Saved<User>, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, email, hash, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.hash)
        .bind(&user.name)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let row = sqlx::query("SELECT id, email, hash, name FROM users WHERE email = $1")
            .bind(&user.email)
            .fetch_one(&self.pool)
            .await?;
        let stored = user_from_row(&row);

        if inserted == 0 {
            tracing::info!(email = %user.email, "email already registered");
            Ok(Saved::Existing(stored))
        } else {
            Ok(Saved::Fresh(stored))
        }
    }

    async fn save_order(&self, order: &Order) -> Result<Saved<Order>, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (id, number, user_id, date, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(&order.number)
        .bind(order.user_id)
        .bind(order.uploaded_at)
        .bind(order.status)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE o.number = $1"))
            .bind(&order.number)
            .fetch_one(&self.pool)
            .await?;
        let stored = order_from_row(&row);

        if inserted == 0 {
            tracing::info!(number = %order.number, "order number already uploaded");
            Ok(Saved::Existing(stored))
        } else {
            Ok(Saved::Fresh(stored))
        }
    }

    async fn open_orders(&self) -> Result<Vec<String>, StoreError> {
        let numbers = sqlx::query_scalar(
            r#"
            SELECT number
            FROM orders
            WHERE status <> 'INVALID'
              AND status <> 'PROCESSED'
              AND number <> ''
            LIMIT 100
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers)
    }

    async fn update_order_statuses(&self, updates: &[AccrualReply]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }

        let numbers: Vec<String> = updates.iter().map(|u| u.order.clone()).collect();
        let statuses: Vec<String> = updates.iter().map(|u| u.status.to_string()).collect();

        // Terminal rows are excluded: a poll result that raced a finished
        // order must not rewrite it.
        sqlx::query(
            r#"
            UPDATE orders
            SET status = d.status::statuses
            FROM UNNEST($1::text[], $2::text[]) AS d(number, status)
            WHERE orders.number = d.number
              AND orders.status <> 'INVALID'
              AND orders.status <> 'PROCESSED'
            "#,
        )
        .bind(&numbers)
        .bind(&statuses)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_accruals(
        &self,
        accruals: &HashMap<String, AccrualReply>,
    ) -> Result<(), StoreError> {
        if accruals.is_empty() {
            return Ok(());
        }

        let numbers: Vec<String> = accruals.keys().cloned().collect();
        let amounts: Vec<Decimal> = numbers
            .iter()
            .map(|n| accruals[n].accrual)
            .collect();

        // The left join keeps the insert idempotent: an order with a credit
        // row already in the ledger is skipped.
        sqlx::query(
            r#"
            INSERT INTO savings_account (user_id, processed_at, id_order_in, accrual)
            SELECT o.user_id, now(), d.number, d.accrual
            FROM UNNEST($1::text[], $2::numeric[]) AS d(number, accrual)
            INNER JOIN orders AS o
                ON o.number = d.number
            LEFT JOIN savings_account AS sa
                ON sa.id_order_in = d.number
                AND sa.id_order_out IS NULL
            WHERE sa.id_order_in IS NULL
            "#,
        )
        .bind(&numbers)
        .bind(&amounts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn withdraw(&self, user_id: Uuid, order: &str, sum: Decimal) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Locking every order row of the user serializes concurrent
        // withdrawals for that user. Each group's SUM nets out earlier
        // debits, so `accrual` is the credit still unspent on that order;
        // groups come back oldest order first.
        let groups = sqlx::query(
            r#"
            WITH _orders AS (
                SELECT *
                FROM orders
                WHERE user_id = $1
                FOR UPDATE
            )
            SELECT
                sa.id_order_in AS number,
                _orders.date AS date,
                SUM(sa.accrual) AS accrual,
                nq.user_accrual
            FROM savings_account AS sa
            INNER JOIN _orders
                ON sa.id_order_in = _orders.number
            INNER JOIN (
                SELECT user_id, SUM(accrual) AS user_accrual
                FROM savings_account
                WHERE user_id = $1
                GROUP BY user_id
            ) AS nq
                ON nq.user_id = sa.user_id
            WHERE sa.user_id = $1
            GROUP BY sa.id_order_in, _orders.date, nq.user_accrual
            ORDER BY _orders.date ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now();
        let mut remaining = sum;
        let mut debit_sources: Vec<String> = Vec::new();
        let mut debit_amounts: Vec<Decimal> = Vec::new();

        for group in &groups {
            if remaining <= Decimal::ZERO {
                break;
            }

            let total: Decimal = group.get("user_accrual");
            if total < sum {
                return Err(StoreError::Insufficient);
            }

            let credit: Decimal = group.get("accrual");
            let consumed = remaining.min(credit);
            if consumed <= Decimal::ZERO {
                continue;
            }

            remaining -= consumed;
            debit_sources.push(group.get("number"));
            debit_amounts.push(-consumed);
        }

        // Covers both an empty ledger and a (should-not-happen) shortfall
        // after consuming every group.
        if remaining > Decimal::ZERO {
            return Err(StoreError::Insufficient);
        }

        sqlx::query(
            r#"
            INSERT INTO savings_account (user_id, processed_at, id_order_in, id_order_out, accrual)
            SELECT $1, $2, d.id_order_in, $3, d.accrual
            FROM UNNEST($4::text[], $5::numeric[]) AS d(id_order_in, accrual)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(order)
        .bind(&debit_sources)
        .bind(&debit_amounts)
        .execute(&mut *tx)
        .await?;

        // Re-check under the lock before committing; the balance must never
        // go negative no matter how requests interleave.
        let total: Option<Decimal> =
            sqlx::query_scalar("SELECT SUM(accrual) FROM savings_account WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        if total.unwrap_or_default() < Decimal::ZERO {
            return Err(StoreError::Insufficient);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn balance(&self, user_id: Uuid) -> Result<BalanceSummary, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(accrual), 0) AS current,
                COALESCE(-SUM(accrual) FILTER (WHERE accrual < 0), 0) AS withdrawn
            FROM savings_account
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BalanceSummary {
            current: row.get("current"),
            withdrawn: row.get("withdrawn"),
        })
    }

    async fn withdrawals(&self, user_id: Uuid) -> Result<Vec<WithdrawalRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id_order_out AS "order",
                -SUM(accrual) AS sum,
                MIN(processed_at) AS processed_at
            FROM savings_account
            WHERE user_id = $1
              AND id_order_out IS NOT NULL
            GROUP BY id_order_out
            ORDER BY processed_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| WithdrawalRecord {
                order: row.get("order"),
                sum: row.get("sum"),
                processed_at: row.get("processed_at"),
            })
            .collect())
    }

    async fn ping(&self) -> bool {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        matches!(tokio::time::timeout(PING_DEADLINE, probe).await, Ok(Ok(_)))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
