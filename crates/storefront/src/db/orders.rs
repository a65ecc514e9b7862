//! Order persistence.
//!
//! Status writes are compare-and-swap on `payment_status = 'pending'`, and
//! grants are inserted with `ON CONFLICT (order_id, product_id) DO NOTHING`,
//! so concurrent finalizations of the same order converge on a single
//! completed order with one grant per item.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};

use wallcraft_core::{
    DownloadId, OrderId, OrderItemId, OrderNumber, PaymentMethod, PaymentStatus, Price,
    ProductId, UserId,
};

use super::downloads::{DOWNLOAD_COLUMNS, DownloadRow};
use super::products::parse_currency;
use super::{OrderStore, PgStore, RepositoryError, TransitionOutcome, conflict_on_unique};
use crate::models::{Download, NewDownload, NewOrder, Order, OrderItem};

const ORDER_COLUMNS: &str = "id, order_number, user_id, total_amount, currency, payment_method, \
     payment_status, payment_id, metadata, created_at, updated_at, paid_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: OrderNumber,
    user_id: UserId,
    total_amount: Decimal,
    currency: String,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    payment_id: Option<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_number: row.order_number,
            user_id: row.user_id,
            total: Price::new(row.total_amount, parse_currency(&row.currency)?),
            payment_method: row.payment_method,
            payment_status: row.payment_status,
            payment_id: row.payment_id,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    price: Decimal,
    currency: String,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            price: Price::new(row.price, parse_currency(&row.currency)?),
        })
    }
}

async fn fetch_order(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
) -> Result<Option<Order>, RepositoryError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    row.map(Order::try_from).transpose()
}

/// Classify a CAS miss: the order is missing, already at `target`, or in
/// some other terminal status.
async fn classify_miss(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
    target: PaymentStatus,
) -> Result<TransitionOutcome, RepositoryError> {
    Ok(match fetch_order(tx, id).await? {
        None => TransitionOutcome::NotFound,
        Some(order) if order.payment_status == target => TransitionOutcome::Unchanged(order),
        Some(order) => TransitionOutcome::Rejected(order),
    })
}

async fn insert_grant(
    tx: &mut Transaction<'_, Postgres>,
    grant: &NewDownload,
    now: DateTime<Utc>,
) -> Result<Option<Download>, RepositoryError> {
    let row: Option<DownloadRow> = sqlx::query_as(&format!(
        r"
        INSERT INTO storefront.downloads
            (id, token, user_id, order_id, product_id, expires_at, max_downloads, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (order_id, product_id) DO NOTHING
        RETURNING {DOWNLOAD_COLUMNS}
        "
    ))
    .bind(DownloadId::generate())
    .bind(&grant.token)
    .bind(grant.user_id)
    .bind(grant.order_id)
    .bind(grant.product_id)
    .bind(grant.expires_at)
    .bind(grant.max_downloads)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(Download::from))
}

#[async_trait]
impl OrderStore for PgStore {
    #[instrument(skip(self, order), fields(order_number = %order.order_number, user_id = %order.user_id))]
    async fn insert_order(
        &self,
        order: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderItem>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: OrderRow = sqlx::query_as(&format!(
            r"
            INSERT INTO storefront.orders
                (id, order_number, user_id, total_amount, currency, payment_method,
                 payment_status, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', '{{}}'::jsonb, $7, $7)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(OrderId::generate())
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.total.amount)
        .bind(order.total.currency_code.code())
        .bind(order.payment_method)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "order number"))?;
        let created = Order::try_from(row)?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let row: OrderItemRow = sqlx::query_as(
                r"
                INSERT INTO storefront.order_items (id, order_id, product_id, price, currency)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, order_id, product_id, price, currency
                ",
            )
            .bind(OrderItemId::generate())
            .bind(created.id)
            .bind(item.product_id)
            .bind(item.price.amount)
            .bind(item.price.currency_code.code())
            .fetch_one(&mut *tx)
            .await?;
            items.push(OrderItem::try_from(row)?);
        }

        tx.commit().await?;
        debug!(order_id = %created.id, "Inserted pending order");
        Ok((created, items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn get_order_items(&self, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows: Vec<OrderItemRow> = sqlx::query_as(
            r"
            SELECT id, order_id, product_id, price, currency
            FROM storefront.order_items
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn find_order_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM storefront.orders WHERE payment_id = $1 LIMIT 1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    async fn user_owns_product(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let (owned,): (bool,) = sqlx::query_as(
            r"
            SELECT EXISTS (
                SELECT 1
                FROM storefront.order_items oi
                JOIN storefront.orders o ON o.id = oi.order_id
                WHERE o.user_id = $1
                  AND oi.product_id = $2
                  AND o.payment_status = 'completed'
            )
            ",
        )
        .bind(user)
        .bind(product)
        .fetch_one(&self.pool)
        .await?;

        Ok(owned)
    }

    async fn set_payment_reference(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        metadata: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.orders
            SET payment_id = COALESCE($2, payment_id),
                metadata = metadata || $3,
                updated_at = $4
            WHERE id = $1 AND payment_status = 'pending'
            ",
        )
        .bind(id)
        .bind(payment_id)
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, grants), fields(grants = grants.len()))]
    async fn complete_order(
        &self,
        id: OrderId,
        payment_id: Option<&str>,
        grants: &[NewDownload],
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r"
            UPDATE storefront.orders
            SET payment_status = 'completed',
                payment_id = COALESCE($2, payment_id),
                paid_at = $3,
                updated_at = $3
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(payment_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let outcome = classify_miss(&mut tx, id, PaymentStatus::Completed).await?;
            tx.rollback().await?;
            return Ok(outcome);
        };
        let order = Order::try_from(row)?;

        let mut issued = Vec::with_capacity(grants.len());
        for grant in grants {
            if let Some(download) = insert_grant(&mut tx, grant, now).await? {
                sqlx::query(
                    r"
                    UPDATE storefront.products
                    SET downloads = downloads + 1
                    WHERE id = $1
                    ",
                )
                .bind(download.product_id)
                .execute(&mut *tx)
                .await?;
                issued.push(download);
            }
        }

        tx.commit().await?;
        Ok(TransitionOutcome::Applied { order, issued })
    }

    #[instrument(skip(self))]
    async fn fail_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r"
            UPDATE storefront.orders
            SET payment_status = 'failed',
                updated_at = $2
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match row {
            Some(row) => TransitionOutcome::Applied {
                order: Order::try_from(row)?,
                issued: Vec::new(),
            },
            None => classify_miss(&mut tx, id, PaymentStatus::Failed).await?,
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
