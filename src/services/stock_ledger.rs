use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::{
    entities::{
        material::{self, Entity as Material},
        technician_balance::{self, Entity as TechnicianBalance},
        warehouse_balance::{self, Entity as WarehouseBalance},
    },
    errors::InventoryError,
};

/// The party holding a fungible balance. Every balance row belongs to exactly
/// one holder; there is no "unassigned" stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holder {
    Warehouse(Uuid),
    Technician(Uuid),
}

impl Holder {
    pub fn id(&self) -> Uuid {
        match self {
            Holder::Warehouse(id) | Holder::Technician(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Holder::Warehouse(_) => "warehouse",
            Holder::Technician(_) => "technician",
        }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Result of one balance adjustment, carried into the audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceChange {
    pub balance_id: Uuid,
    pub material_id: Uuid,
    pub holder: Holder,
    pub before: Decimal,
    pub after: Decimal,
    pub delta: Decimal,
}

/// Sorts (material, holder) pairs into the fixed global lock order: material
/// id first, then holder id. Every multi-balance operation locks in this
/// order so concurrent transfers cannot deadlock against each other.
pub fn lock_order(pairs: &mut [(Uuid, Holder)]) {
    pairs.sort_by_key(|(material_id, holder)| (*material_id, holder.id()));
}

/// Reads the current balance for a material/holder pair. A known material
/// with no balance row reads as zero; an unknown material is `NotFound`.
pub async fn get_balance<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    holder: Holder,
) -> Result<Decimal, InventoryError> {
    require_material(conn, material_id).await?;

    let stock = match holder {
        Holder::Warehouse(warehouse_id) => WarehouseBalance::find()
            .filter(warehouse_balance::Column::MaterialId.eq(material_id))
            .filter(warehouse_balance::Column::WarehouseId.eq(warehouse_id))
            .one(conn)
            .await
            .map_err(InventoryError::db_error)?
            .map(|b| b.stock),
        Holder::Technician(technician_id) => TechnicianBalance::find()
            .filter(technician_balance::Column::MaterialId.eq(material_id))
            .filter(technician_balance::Column::TechnicianId.eq(technician_id))
            .one(conn)
            .await
            .map_err(InventoryError::db_error)?
            .map(|b| b.stock),
    };

    Ok(stock.unwrap_or(Decimal::ZERO))
}

/// Applies a signed delta to a material/holder balance. This is the sole
/// mutation entry point for fungible stock; the movement, assignment and
/// installation services all funnel through here inside their transactions.
///
/// A negative delta that would drive the balance below zero fails with
/// `InsufficientStock` and leaves the row untouched. A positive delta may
/// create the balance row when `allow_create` is set; with it unset a missing
/// row is `NotFound` (transfers require the destination to already exist,
/// inbound receipts do not). `unit_cost` (inbound warehouse stock only) folds
/// into the weighted average cost.
///
/// The material's `aggregate_stock` cache is recomputed from the balance
/// tables before returning, inside the caller's transaction.
pub async fn adjust_balance<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    holder: Holder,
    delta: Decimal,
    unit_cost: Option<Decimal>,
    allow_create: bool,
) -> Result<BalanceChange, InventoryError> {
    if delta.is_zero() {
        return Err(InventoryError::ValidationError(
            "balance adjustment delta must be non-zero".into(),
        ));
    }
    require_material(conn, material_id).await?;

    let change = match holder {
        Holder::Warehouse(warehouse_id) => {
            adjust_warehouse(conn, material_id, warehouse_id, delta, unit_cost, allow_create)
                .await?
        }
        Holder::Technician(technician_id) => {
            adjust_technician(conn, material_id, technician_id, delta, allow_create).await?
        }
    };

    recompute_aggregate_stock(conn, material_id).await?;

    debug!(
        material_id = %material_id,
        holder = %holder,
        before = %change.before,
        after = %change.after,
        "Balance adjusted"
    );
    Ok(change)
}

/// Recomputes the material's denormalized `aggregate_stock` as the sum of all
/// warehouse and technician balances. Always a full recompute, never an
/// incremental patch, so call sites cannot introduce drift.
pub async fn recompute_aggregate_stock<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
) -> Result<Decimal, InventoryError> {
    let warehouse_rows = WarehouseBalance::find()
        .filter(warehouse_balance::Column::MaterialId.eq(material_id))
        .all(conn)
        .await
        .map_err(InventoryError::db_error)?;
    let technician_rows = TechnicianBalance::find()
        .filter(technician_balance::Column::MaterialId.eq(material_id))
        .all(conn)
        .await
        .map_err(InventoryError::db_error)?;

    let total: Decimal = warehouse_rows.iter().map(|b| b.stock).sum::<Decimal>()
        + technician_rows.iter().map(|b| b.stock).sum::<Decimal>();

    let material = require_material(conn, material_id).await?;
    let mut active: material::ActiveModel = material.into();
    active.aggregate_stock = Set(total);
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(InventoryError::db_error)?;

    Ok(total)
}

pub(crate) async fn require_material<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
) -> Result<material::Model, InventoryError> {
    Material::find_by_id(material_id)
        .one(conn)
        .await
        .map_err(InventoryError::db_error)?
        .ok_or_else(|| InventoryError::NotFound(format!("Material {} not found", material_id)))
}

async fn adjust_warehouse<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    warehouse_id: Uuid,
    delta: Decimal,
    unit_cost: Option<Decimal>,
    allow_create: bool,
) -> Result<BalanceChange, InventoryError> {
    let mut query = WarehouseBalance::find()
        .filter(warehouse_balance::Column::MaterialId.eq(material_id))
        .filter(warehouse_balance::Column::WarehouseId.eq(warehouse_id));
    // SELECT ... FOR UPDATE; sqlite serializes writers on its own.
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    let existing = query.one(conn).await.map_err(InventoryError::db_error)?;

    match existing {
        Some(row) => {
            let before = row.stock;
            let after = before + delta;
            if after < Decimal::ZERO {
                return Err(InventoryError::InsufficientStock {
                    material_id,
                    holder: Holder::Warehouse(warehouse_id),
                    available: before,
                    requested: -delta,
                });
            }
            let average_cost = match (unit_cost, delta > Decimal::ZERO) {
                (Some(cost), true) => weighted_average(before, row.average_cost, delta, cost),
                _ => row.average_cost,
            };
            let balance_id = row.id;
            let mut active: warehouse_balance::ActiveModel = row.into();
            active.stock = Set(after);
            active.average_cost = Set(average_cost);
            active.updated_at = Set(Utc::now());
            active.update(conn).await.map_err(InventoryError::db_error)?;
            Ok(BalanceChange {
                balance_id,
                material_id,
                holder: Holder::Warehouse(warehouse_id),
                before,
                after,
                delta,
            })
        }
        None => {
            if delta < Decimal::ZERO {
                return Err(InventoryError::InsufficientStock {
                    material_id,
                    holder: Holder::Warehouse(warehouse_id),
                    available: Decimal::ZERO,
                    requested: -delta,
                });
            }
            if !allow_create {
                return Err(InventoryError::NotFound(format!(
                    "No balance for material {} in warehouse {}",
                    material_id, warehouse_id
                )));
            }
            let balance_id = Uuid::new_v4();
            let now = Utc::now();
            warehouse_balance::ActiveModel {
                id: Set(balance_id),
                material_id: Set(material_id),
                warehouse_id: Set(warehouse_id),
                stock: Set(delta),
                average_cost: Set(unit_cost.unwrap_or(Decimal::ZERO)),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(InventoryError::db_error)?;
            Ok(BalanceChange {
                balance_id,
                material_id,
                holder: Holder::Warehouse(warehouse_id),
                before: Decimal::ZERO,
                after: delta,
                delta,
            })
        }
    }
}

async fn adjust_technician<C: ConnectionTrait>(
    conn: &C,
    material_id: Uuid,
    technician_id: Uuid,
    delta: Decimal,
    allow_create: bool,
) -> Result<BalanceChange, InventoryError> {
    let mut query = TechnicianBalance::find()
        .filter(technician_balance::Column::MaterialId.eq(material_id))
        .filter(technician_balance::Column::TechnicianId.eq(technician_id));
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    let existing = query.one(conn).await.map_err(InventoryError::db_error)?;

    match existing {
        Some(row) => {
            let before = row.stock;
            let after = before + delta;
            if after < Decimal::ZERO {
                return Err(InventoryError::InsufficientStock {
                    material_id,
                    holder: Holder::Technician(technician_id),
                    available: before,
                    requested: -delta,
                });
            }
            let balance_id = row.id;
            let mut active: technician_balance::ActiveModel = row.into();
            active.stock = Set(after);
            active.updated_at = Set(Utc::now());
            active.update(conn).await.map_err(InventoryError::db_error)?;
            Ok(BalanceChange {
                balance_id,
                material_id,
                holder: Holder::Technician(technician_id),
                before,
                after,
                delta,
            })
        }
        None => {
            if delta < Decimal::ZERO {
                return Err(InventoryError::InsufficientStock {
                    material_id,
                    holder: Holder::Technician(technician_id),
                    available: Decimal::ZERO,
                    requested: -delta,
                });
            }
            if !allow_create {
                return Err(InventoryError::NotFound(format!(
                    "No balance for material {} held by technician {}",
                    material_id, technician_id
                )));
            }
            let balance_id = Uuid::new_v4();
            let now = Utc::now();
            technician_balance::ActiveModel {
                id: Set(balance_id),
                technician_id: Set(technician_id),
                material_id: Set(material_id),
                stock: Set(delta),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(conn)
            .await
            .map_err(InventoryError::db_error)?;
            Ok(BalanceChange {
                balance_id,
                material_id,
                holder: Holder::Technician(technician_id),
                before: Decimal::ZERO,
                after: delta,
                delta,
            })
        }
    }
}

fn weighted_average(
    stock: Decimal,
    average_cost: Decimal,
    incoming_qty: Decimal,
    incoming_cost: Decimal,
) -> Decimal {
    let total_qty = stock + incoming_qty;
    if total_qty.is_zero() {
        return incoming_cost;
    }
    (stock * average_cost + incoming_qty * incoming_cost) / total_qty
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn lock_order_sorts_by_material_then_holder() {
        let m1 = Uuid::from_u128(1);
        let m2 = Uuid::from_u128(2);
        let h1 = Holder::Warehouse(Uuid::from_u128(10));
        let h2 = Holder::Technician(Uuid::from_u128(20));

        let mut pairs = vec![(m2, h1), (m1, h2), (m1, h1), (m2, h2)];
        lock_order(&mut pairs);
        assert_eq!(pairs, vec![(m1, h1), (m1, h2), (m2, h1), (m2, h2)]);
    }

    #[test]
    fn weighted_average_folds_incoming_cost() {
        // 10 units at 2.00 plus 10 units at 4.00 -> 3.00
        let avg = weighted_average(dec!(10), dec!(2), dec!(10), dec!(4));
        assert_eq!(avg, dec!(3));
    }

    #[test]
    fn weighted_average_of_empty_stock_is_incoming_cost() {
        let avg = weighted_average(dec!(0), dec!(0), dec!(5), dec!(7.5));
        assert_eq!(avg, dec!(7.5));
    }
}
