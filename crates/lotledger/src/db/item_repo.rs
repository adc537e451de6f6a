//! `inventory_items` table: the SQLite persistence gateway.

use chrono::Utc;
use rusqlite::{params, ErrorCode};

use crate::normalizer::ClassifiedItem;
use crate::storage::{CommitReceipt, PersistenceError, PersistenceGateway};

use super::{format_timestamp, Database, DatabaseError};

#[derive(Clone)]
pub struct SqliteItemGateway {
    db: Database,
}

impl SqliteItemGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stored items of one invoice, in line order.
    pub fn items_for_invoice(&self, invoice_id: &str) -> Result<Vec<ClassifiedItem>, DatabaseError> {
        let payloads = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM inventory_items WHERE invoice_id = ?1
                 ORDER BY line_position ASC",
            )?;
            let rows = stmt
                .query_map(params![invoice_id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        payloads
            .iter()
            .map(|p| {
                serde_json::from_str(p).map_err(|source| DatabaseError::Serialization {
                    column: "payload",
                    source,
                })
            })
            .collect()
    }

    pub fn count(&self) -> Result<usize, DatabaseError> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM inventory_items", [], |r| r.get(0))?;
            Ok(count as usize)
        })
    }
}

fn persistence_error(err: DatabaseError) -> PersistenceError {
    match &err {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            PersistenceError::Unavailable(err.to_string())
        }
        DatabaseError::LockPoisoned => PersistenceError::Unavailable(err.to_string()),
        _ => PersistenceError::Storage(err.to_string()),
    }
}

impl PersistenceGateway for SqliteItemGateway {
    fn upsert_batch(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
        items: &[ClassifiedItem],
    ) -> Result<CommitReceipt, PersistenceError> {
        let now = format_timestamp(Utc::now());

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let payload = serde_json::to_string(item).map_err(|e| {
                PersistenceError::Storage(format!(
                    "failed to encode item at line {}: {}",
                    item.item.line_position, e
                ))
            })?;
            rows.push((item, payload));
        }

        let receipt = self
            .db
            .with_conn(|conn| {
                let tx = conn.unchecked_transaction()?;
                let mut receipt = CommitReceipt::default();

                for (classified, payload) in &rows {
                    let item = &classified.item;
                    let exists: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM inventory_items
                         WHERE invoice_id = ?1 AND line_position = ?2)",
                        params![invoice_id, item.line_position],
                        |r| r.get(0),
                    )?;

                    tx.execute(
                        "INSERT INTO inventory_items (invoice_id, line_position, idempotency_key,
                         auction_id, lot_number, name, description, quantity, bid_amount,
                         buyers_premium, sales_tax, shipping, buyers_premium_percent,
                         sales_tax_percent, invoice_date, category, condition, confidence,
                         payload, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                                 ?15, ?16, ?17, ?18, ?19, ?20, ?20)
                         ON CONFLICT(invoice_id, line_position) DO UPDATE SET
                            idempotency_key = excluded.idempotency_key,
                            auction_id = excluded.auction_id,
                            lot_number = excluded.lot_number,
                            name = excluded.name,
                            description = excluded.description,
                            quantity = excluded.quantity,
                            bid_amount = excluded.bid_amount,
                            buyers_premium = excluded.buyers_premium,
                            sales_tax = excluded.sales_tax,
                            shipping = excluded.shipping,
                            buyers_premium_percent = excluded.buyers_premium_percent,
                            sales_tax_percent = excluded.sales_tax_percent,
                            invoice_date = excluded.invoice_date,
                            category = excluded.category,
                            condition = excluded.condition,
                            confidence = excluded.confidence,
                            payload = excluded.payload,
                            updated_at = excluded.updated_at",
                        params![
                            invoice_id,
                            item.line_position,
                            idempotency_key,
                            item.auction_id,
                            item.lot_number,
                            item.name,
                            item.description,
                            item.quantity,
                            item.bid_amount.map(|d| d.to_string()),
                            item.buyers_premium.map(|d| d.to_string()),
                            item.sales_tax.map(|d| d.to_string()),
                            item.shipping.map(|d| d.to_string()),
                            item.buyers_premium_percent.to_string(),
                            item.sales_tax_percent.to_string(),
                            item.invoice_date.map(|d| d.to_string()),
                            classified.category.as_str(),
                            classified.condition.as_str(),
                            classified.confidence,
                            payload,
                            now,
                        ],
                    )?;

                    if exists {
                        receipt.updated += 1;
                    } else {
                        receipt.inserted += 1;
                    }
                }

                let kept: Vec<u32> = rows.iter().map(|(c, _)| c.item.line_position).collect();
                let kept = serde_json::to_string(&kept).map_err(|source| {
                    DatabaseError::Serialization {
                        column: "line_position",
                        source,
                    }
                })?;
                receipt.removed = tx.execute(
                    "DELETE FROM inventory_items WHERE invoice_id = ?1
                     AND line_position NOT IN (SELECT value FROM json_each(?2))",
                    params![invoice_id, kept],
                )?;

                tx.commit()?;
                Ok(receipt)
            })
            .map_err(persistence_error)?;

        log::debug!(
            "Committed invoice {}: {} inserted, {} updated, {} removed",
            invoice_id,
            receipt.inserted,
            receipt.updated,
            receipt.removed
        );
        Ok(receipt)
    }
}
