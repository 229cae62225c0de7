use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    IdempotencyKey, Money, OrderId, ProductId, ReservationId, ReservationState, SessionId, UserId,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CartLine, CartRecord, NewOrder, OrderItemRecord, OrderPage, OrderQuery, OrderRecord,
    OrderUpdate, PaymentEventRecord, Product, ReservationRecord, ReserveOutcome, Result,
    StockLine, StoreError, TransitionOutcome,
    store::{CartSessionStore, CatalogStore, OrderStore, PaymentEventStore, ReservationStore},
};

const ORDER_COLUMNS: &str = "id, user_id, session_id, email, idempotency_key, reservation_id, status, \
     payment_status, payment_method, shipping_address, total_cents, currency, \
     external_payment_ref, external_capture_id, version, created_at, updated_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_quantity: to_quantity(row.try_get("stock_quantity")?)?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<ReservationRecord> {
        let lines: serde_json::Value = row.try_get("lines")?;
        let state: String = row.try_get("state")?;

        Ok(ReservationRecord {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
            lines: serde_json::from_value(lines)?,
            state: state.parse()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order(row: PgRow, items: Vec<OrderItemRecord>) -> Result<OrderRecord> {
        let shipping_address: serde_json::Value = row.try_get("shipping_address")?;
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;
        let payment_method: String = row.try_get("payment_method")?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: row
                .try_get::<Option<Uuid>, _>("user_id")?
                .map(UserId::from_uuid),
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            email: row.try_get("email")?,
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
            reservation_id: ReservationId::from_uuid(row.try_get::<Uuid, _>("reservation_id")?),
            status: status.parse()?,
            payment_status: payment_status.parse()?,
            payment_method: payment_method.parse()?,
            shipping_address: serde_json::from_value(shipping_address)?,
            total: Money::from_cents(row.try_get("total_cents")?),
            currency: row.try_get("currency")?,
            external_payment_ref: row.try_get("external_payment_ref")?,
            external_capture_id: row.try_get("external_capture_id")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            items,
        })
    }

    fn row_to_payment_event(row: PgRow) -> Result<PaymentEventRecord> {
        let kind: String = row.try_get("kind")?;

        Ok(PaymentEventRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            kind: kind.parse()?,
            external_ref: row.try_get("external_ref")?,
            external_event_id: row.try_get("external_event_id")?,
            amount: row
                .try_get::<Option<i64>, _>("amount_cents")?
                .map(Money::from_cents),
            detail: row.try_get("detail")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    async fn items_for(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItemRecord>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, quantity, price_at_purchase_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY product_id ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItemRecord>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id")?;
            grouped.entry(order_id).or_default().push(OrderItemRecord {
                order_id: OrderId::from_uuid(order_id),
                product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                quantity: to_quantity(row.try_get("quantity")?)?,
                price_at_purchase: Money::from_cents(row.try_get("price_at_purchase_cents")?),
            });
        }
        Ok(grouped)
    }

    async fn rows_to_orders(&self, rows: Vec<PgRow>) -> Result<Vec<OrderRecord>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.items_for(&ids).await?;

        rows.into_iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    async fn fetch_one_order(&self, sql: &str, bind: impl ToString) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(sql)
            .bind(bind.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.rows_to_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_reservation_by_key(
        tx: &mut Transaction<'_, Postgres>,
        key: &IdempotencyKey,
    ) -> Result<Option<ReservationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, idempotency_key, state, lines, created_at, updated_at
            FROM reservations
            WHERE idempotency_key = $1 AND state <> 'RELEASED'
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn transition(
        &self,
        id: ReservationId,
        target: ReservationState,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE reservations
            SET state = $2, updated_at = NOW()
            WHERE id = $1 AND state = 'RESERVED'
            RETURNING id, idempotency_key, state, lines, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = updated {
            let record = Self::row_to_reservation(row)?;
            if target == ReservationState::Released {
                for line in &record.lines {
                    return_stock(&mut tx, &line.product_id, line.quantity).await?;
                }
            }
            tx.commit().await?;
            return Ok(TransitionOutcome::Applied(record));
        }

        let current = sqlx::query(
            "SELECT id, idempotency_key, state, lines, created_at, updated_at FROM reservations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        tx.rollback().await?;

        let current = current
            .map(Self::row_to_reservation)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                key: id.to_string(),
            })?;

        if current.state == target {
            Ok(TransitionOutcome::Unchanged(current))
        } else {
            Ok(TransitionOutcome::Conflict(current))
        }
    }
}

fn to_quantity(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidData(format!("negative quantity {value}")))
}

fn to_column(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::InvalidData(format!("quantity {quantity} out of range")))
}

/// Conditional decrement: takes `quantity` only if at least that much is
/// left. Every reservation is built from this primitive.
async fn take_stock(conn: &mut PgConnection, id: &ProductId, quantity: u32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE products
        SET stock_quantity = stock_quantity - $2, updated_at = NOW()
        WHERE id = $1 AND stock_quantity >= $2
        "#,
    )
    .bind(id.as_str())
    .bind(to_column(quantity)?)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Adds `quantity` back. Returns false if the product is unknown.
async fn return_stock(conn: &mut PgConnection, id: &ProductId, quantity: u32) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id.as_str())
    .bind(to_column(quantity)?)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn is_violation_of(e: &sqlx::Error, constraint: &str) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents, stock_quantity FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn decrement_stock(&self, id: &ProductId, quantity: u32) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        take_stock(&mut conn, id, quantity).await
    }

    async fn increment_stock(&self, id: &ProductId, quantity: u32) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        if !return_stock(&mut conn, id, quantity).await? {
            return Err(StoreError::NotFound {
                entity: "product",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price_cents, stock_quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock_quantity = EXCLUDED.stock_quantity,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(to_column(product.stock_quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn reserve(
        &self,
        id: ReservationId,
        key: &IdempotencyKey,
        lines: &[StockLine],
    ) -> Result<ReserveOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = Self::find_reservation_by_key(&mut tx, key).await? {
            tx.rollback().await?;
            return Ok(ReserveOutcome::Existing(existing));
        }

        // Row locks are taken in product ID order.
        let lines = StockLine::merge(lines.iter().cloned());

        for line in &lines {
            if !take_stock(&mut tx, &line.product_id, line.quantity).await? {
                let available: Option<i32> =
                    sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
                        .bind(line.product_id.as_str())
                        .fetch_optional(&mut *tx)
                        .await?;
                tx.rollback().await?;
                tracing::debug!(product_id = %line.product_id, "reservation rolled back");

                return Ok(match available {
                    None => ReserveOutcome::UnknownProduct(line.product_id.clone()),
                    Some(available) => ReserveOutcome::InsufficientStock {
                        product_id: line.product_id.clone(),
                        requested: line.quantity,
                        available: to_quantity(available)?,
                    },
                });
            }
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO reservations (id, idempotency_key, state, lines)
            VALUES ($1, $2, 'RESERVED', $3)
            RETURNING id, idempotency_key, state, lines, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(key.as_str())
        .bind(serde_json::to_value(&lines)?)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                let record = Self::row_to_reservation(row)?;
                tx.commit().await?;
                Ok(ReserveOutcome::Reserved(record))
            }
            Err(e) if is_violation_of(&e, "unique_live_reservation_key") => {
                // A concurrent call with the same key won; undo our decrements.
                tx.rollback().await?;
                let mut tx = self.pool.begin().await?;
                let existing = Self::find_reservation_by_key(&mut tx, key).await?;
                tx.rollback().await?;
                existing
                    .map(ReserveOutcome::Existing)
                    .ok_or_else(|| StoreError::Duplicate {
                        entity: "reservation idempotency key",
                        key: key.to_string(),
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self, id: ReservationId) -> Result<TransitionOutcome> {
        self.transition(id, ReservationState::Released).await
    }

    async fn commit(&self, id: ReservationId) -> Result<TransitionOutcome> {
        self.transition(id, ReservationState::Committed).await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>> {
        let row = sqlx::query(
            "SELECT id, idempotency_key, state, lines, created_at, updated_at FROM reservations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, session_id, email, idempotency_key, reservation_id, status,
                payment_status, payment_method, shipping_address, total_cents, currency, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', 'PENDING', $7, $8, $9, $10, 1)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.map(|u| u.as_uuid()))
        .bind(order.session_id.as_str())
        .bind(&order.email)
        .bind(order.idempotency_key.as_str())
        .bind(order.reservation_id.as_uuid())
        .bind(order.payment_method.as_str())
        .bind(serde_json::to_value(&order.shipping_address)?)
        .bind(order.total.cents())
        .bind(&order.currency)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_violation_of(&e, "unique_order_idempotency_key") {
                return Err(StoreError::Duplicate {
                    entity: "order idempotency key",
                    key: order.idempotency_key.to_string(),
                });
            }
            return Err(e.into());
        }

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, price_at_purchase_cents)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(to_column(item.quantity)?)
            .bind(item.price_at_purchase.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_order(order.id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                key: order.id.to_string(),
            })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.rows_to_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_order_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderRecord>> {
        self.fetch_one_order(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = $1"),
            key,
        )
        .await
    }

    async fn find_order_by_payment_ref(&self, external_ref: &str) -> Result<Option<OrderRecord>> {
        self.fetch_one_order(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE external_payment_ref = $1"),
            external_ref,
        )
        .await
    }

    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> Result<OrderRecord> {
        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3,
                payment_status = $4,
                external_payment_ref = $5,
                external_capture_id = $6,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(update.expected_version)
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(&update.external_payment_ref)
        .bind(&update.external_capture_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_violation_of(&e, "unique_order_payment_ref") {
                return StoreError::Duplicate {
                    entity: "external payment ref",
                    key: update.external_payment_ref.clone().unwrap_or_default(),
                };
            }
            StoreError::Database(e)
        })?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

            return Err(match actual {
                Some(actual) => StoreError::ConcurrencyConflict {
                    order_id: id,
                    expected: update.expected_version,
                    actual,
                },
                None => StoreError::NotFound {
                    entity: "order",
                    key: id.to_string(),
                },
            });
        }

        self.get_order(id).await?.ok_or_else(|| StoreError::NotFound {
            entity: "order",
            key: id.to_string(),
        })
    }

    async fn list_orders(&self, query: OrderQuery) -> Result<OrderPage> {
        let mut filter = String::from(" WHERE 1=1");
        let mut param_count = 0;

        if query.user_id.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND user_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            filter.push_str(&format!(" AND status = ${param_count}"));
        }

        let limit = query.effective_limit();
        let offset = query.effective_offset();

        let count_sql = format!("SELECT COUNT(*) FROM orders{filter}");
        let page_sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders{filter} ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut page_query = sqlx::query(&page_sql);

        if let Some(user_id) = query.user_id {
            count_query = count_query.bind(user_id.as_uuid());
            page_query = page_query.bind(user_id.as_uuid());
        }
        if let Some(status) = query.status {
            count_query = count_query.bind(status.as_str());
            page_query = page_query.bind(status.as_str());
        }

        let total = count_query.fetch_one(&self.pool).await?;
        let rows = page_query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(OrderPage {
            orders: self.rows_to_orders(rows).await?,
            total: usize::try_from(total).unwrap_or_default(),
            limit,
            offset,
        })
    }
}

#[async_trait]
impl PaymentEventStore for PostgresStore {
    async fn append_payment_event(&self, event: PaymentEventRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                id, order_id, kind, external_ref, external_event_id, amount_cents, detail, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (external_event_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.order_id.as_uuid())
        .bind(event.kind.as_str())
        .bind(&event.external_ref)
        .bind(&event.external_event_id)
        .bind(event.amount.map(|m| m.cents()))
        .bind(&event.detail)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn payment_events(&self, order_id: OrderId) -> Result<Vec<PaymentEventRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, kind, external_ref, external_event_id, amount_cents, detail, recorded_at
            FROM payment_events
            WHERE order_id = $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment_event).collect()
    }
}

#[async_trait]
impl CartSessionStore for PostgresStore {
    async fn load_cart(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<CartRecord>> {
        let row = sqlx::query("SELECT items, expires_at FROM carts WHERE session_id = $1 AND expires_at > $2")
            .bind(session_id.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: serde_json::Value = row.try_get("items")?;
        let items: Vec<CartLine> = serde_json::from_value(items)?;

        Ok(Some(CartRecord {
            session_id: session_id.clone(),
            items,
            expires_at: row.try_get("expires_at")?,
        }))
    }

    async fn save_cart(&self, cart: CartRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (session_id, items, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO UPDATE SET
                items = EXCLUDED.items,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(cart.session_id.as_str())
        .bind(serde_json::to_value(&cart.items)?)
        .bind(cart.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_cart(&self, session_id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
