use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::stock_movement::{self, Entity as StockMovement},
    errors::InventoryError,
    events::{Event, EventSender},
    services::{
        audit::{self, NewAuditEntry},
        serialized_units,
        stock_ledger::{self, BalanceChange, Holder},
    },
};

lazy_static! {
    static ref MOVEMENTS_RECORDED: IntCounterVec = IntCounterVec::new(
        Opts::new("stock_movements_total", "Total stock movements recorded"),
        &["movement_type"]
    )
    .expect("metric can be created");
    static ref MOVEMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_movement_failures_total",
            "Total failed stock movement creations"
        ),
        &["error_kind"]
    )
    .expect("metric can be created");
}

/// The four movement types. The set is closed; new flows reuse these with
/// different origin/destination holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    Entrada,
    Salida,
    Devolucion,
    Traslado,
}

/// Serialized-unit transition to run inside the same transaction as the
/// movement's ledger deltas.
#[derive(Debug, Clone)]
pub enum SerializedTransition {
    ToTechnician { technician_id: Uuid, carry_id: Uuid },
    ToWarehouse { warehouse_id: Option<Uuid> },
    ToInstallation {
        installation_id: Uuid,
        installation_material_id: Uuid,
    },
    FromInstallation,
}

#[derive(Debug, Clone)]
pub struct CreateMovementInput {
    pub movement_type: MovementType,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub origin: Option<Holder>,
    pub destination: Option<Holder>,
    pub idempotency_key: String,
    pub serialized_unit_ids: Vec<Uuid>,
    pub serialized_transition: Option<SerializedTransition>,
    pub assignment_id: Option<Uuid>,
    pub installation_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl CreateMovementInput {
    /// Shape checks that do not need database state.
    fn validate(&self) -> Result<(), InventoryError> {
        if self.quantity <= Decimal::ZERO {
            return Err(InventoryError::ValidationError(
                "movement quantity must be positive".into(),
            ));
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(InventoryError::ValidationError(
                "idempotency key must not be empty".into(),
            ));
        }
        if !self.serialized_unit_ids.is_empty() && self.serialized_transition.is_none() {
            return Err(InventoryError::ValidationError(
                "serialized unit ids given without a transition".into(),
            ));
        }
        // Equal holders would make the two ledger legs cancel out at best;
        // the type-specific checks below assume they are distinct.
        if let (Some(origin), Some(destination)) = (self.origin, self.destination) {
            if origin == destination {
                return Err(InventoryError::ValidationError(
                    "origin and destination holders must differ".into(),
                ));
            }
        }
        match self.movement_type {
            MovementType::Entrada => {
                if self.origin.is_some() {
                    return Err(InventoryError::ValidationError(
                        "entrada takes no origin holder".into(),
                    ));
                }
                match self.destination {
                    Some(Holder::Warehouse(_)) => Ok(()),
                    _ => Err(InventoryError::ValidationError(
                        "entrada requires a destination warehouse".into(),
                    )),
                }
            }
            MovementType::Salida => match self.origin {
                Some(_) => Ok(()),
                None => Err(InventoryError::ValidationError(
                    "salida requires an origin holder".into(),
                )),
            },
            MovementType::Devolucion => match self.destination {
                Some(_) => Ok(()),
                None => Err(InventoryError::ValidationError(
                    "devolucion requires a destination holder".into(),
                )),
            },
            MovementType::Traslado => match (self.origin, self.destination) {
                (Some(Holder::Warehouse(_)), Some(Holder::Warehouse(_))) => Ok(()),
                _ => Err(InventoryError::ValidationError(
                    "traslado requires two warehouse holders".into(),
                )),
            },
        }
    }

    /// Signed deltas this movement applies, in fixed lock order. The bool is
    /// the `allow_create` flag: transfers require the destination balance row
    /// to already exist (stock may be zero), every other inbound leg may
    /// create it.
    fn ledger_deltas(&self) -> Vec<(Holder, Decimal, bool)> {
        let mut deltas = Vec::with_capacity(2);
        match self.movement_type {
            MovementType::Entrada => {
                if let Some(dst) = self.destination {
                    deltas.push((dst, self.quantity, true));
                }
            }
            MovementType::Salida => {
                if let Some(src) = self.origin {
                    deltas.push((src, -self.quantity, true));
                }
                if let Some(dst) = self.destination {
                    deltas.push((dst, self.quantity, true));
                }
            }
            MovementType::Devolucion => {
                // Origin is absent when the return comes from an
                // installation, which holds no fungible balance.
                if let Some(src) = self.origin {
                    deltas.push((src, -self.quantity, true));
                }
                if let Some(dst) = self.destination {
                    deltas.push((dst, self.quantity, true));
                }
            }
            MovementType::Traslado => {
                if let (Some(src), Some(dst)) = (self.origin, self.destination) {
                    deltas.push((src, -self.quantity, true));
                    deltas.push((dst, self.quantity, false));
                }
            }
        }
        // Same fixed lock order as stock_ledger::lock_order: one material
        // per movement, so holder id alone decides.
        deltas.sort_by_key(|(holder, _, _)| holder.id());
        deltas
    }
}

fn movement_code() -> String {
    format!("MOV-{}", &Uuid::new_v4().simple().to_string()[..8].to_uppercase())
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

/// Records the movement and applies its ledger deltas inside the caller's
/// transaction. Used directly by the assignment and installation services so
/// their batches stay in one transaction with exactly-once deltas.
pub(crate) async fn apply_movement_in_txn<C: ConnectionTrait>(
    conn: &C,
    input: &CreateMovementInput,
    actor_id: Uuid,
) -> Result<(stock_movement::Model, Vec<BalanceChange>), InventoryError> {
    input.validate()?;

    let existing = StockMovement::find()
        .filter(stock_movement::Column::IdempotencyKey.eq(input.idempotency_key.clone()))
        .one(conn)
        .await
        .map_err(InventoryError::db_error)?;
    if existing.is_some() {
        return Err(InventoryError::DuplicateMovement(
            input.idempotency_key.clone(),
        ));
    }

    let mut changes = Vec::with_capacity(2);
    for (holder, delta, allow_create) in input.ledger_deltas() {
        let unit_cost = if delta > Decimal::ZERO {
            input.unit_cost
        } else {
            None
        };
        changes.push(
            stock_ledger::adjust_balance(
                conn,
                input.material_id,
                holder,
                delta,
                unit_cost,
                allow_create,
            )
            .await?,
        );
    }

    if let Some(transition) = &input.serialized_transition {
        match transition {
            SerializedTransition::ToTechnician {
                technician_id,
                carry_id,
            } => {
                serialized_units::assign_to_technician_in_txn(
                    conn,
                    &input.serialized_unit_ids,
                    *technician_id,
                    *carry_id,
                    actor_id,
                )
                .await?;
            }
            SerializedTransition::ToWarehouse { warehouse_id } => {
                serialized_units::release_from_technician_in_txn(
                    conn,
                    &input.serialized_unit_ids,
                    *warehouse_id,
                    actor_id,
                )
                .await?;
            }
            SerializedTransition::ToInstallation {
                installation_id,
                installation_material_id,
            } => {
                serialized_units::assign_to_installation_in_txn(
                    conn,
                    &input.serialized_unit_ids,
                    *installation_id,
                    *installation_material_id,
                    actor_id,
                )
                .await?;
            }
            SerializedTransition::FromInstallation => {
                serialized_units::release_from_installation_in_txn(
                    conn,
                    &input.serialized_unit_ids,
                    actor_id,
                )
                .await?;
            }
        }
    }

    let unit_ids_json = if input.serialized_unit_ids.is_empty() {
        None
    } else {
        Some(serde_json::to_value(&input.serialized_unit_ids).unwrap_or_default())
    };
    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(movement_code()),
        movement_type: Set(input.movement_type.to_string()),
        material_id: Set(input.material_id),
        quantity: Set(input.quantity),
        unit_cost: Set(input.unit_cost),
        origin_holder_type: Set(input.origin.map(|h| h.kind().to_string())),
        origin_holder_id: Set(input.origin.map(|h| h.id())),
        destination_holder_type: Set(input.destination.map(|h| h.kind().to_string())),
        destination_holder_id: Set(input.destination.map(|h| h.id())),
        assignment_id: Set(input.assignment_id),
        installation_id: Set(input.installation_id),
        serialized_unit_ids: Set(unit_ids_json),
        idempotency_key: Set(input.idempotency_key.clone()),
        notes: Set(input.notes.clone()),
        created_by: Set(actor_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        // Unique index on the idempotency key backstops the pre-check when
        // two replays race.
        if is_unique_violation(&e) {
            InventoryError::DuplicateMovement(input.idempotency_key.clone())
        } else {
            InventoryError::db_error(e)
        }
    })?;

    for change in &changes {
        let entity_type = match change.holder {
            Holder::Warehouse(_) => audit::entity::WAREHOUSE_BALANCE,
            Holder::Technician(_) => audit::entity::TECHNICIAN_BALANCE,
        };
        audit::record(
            conn,
            NewAuditEntry {
                entity_type,
                entity_id: change.balance_id,
                before: Some(serde_json::json!({ "stock": change.before })),
                after: Some(serde_json::json!({ "stock": change.after })),
                actor_id,
                movement_id: Some(movement.id),
            },
        )
        .await?;
    }

    Ok((movement, changes))
}

/// Records inbound/outbound/return/transfer events and applies their ledger
/// deltas atomically.
#[derive(Clone)]
pub struct MovementService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl MovementService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates one movement in its own transaction. Replaying a previously
    /// seen idempotency key fails with `DuplicateMovement` and applies no
    /// ledger effect.
    #[instrument(skip(self, input), fields(movement_type = %input.movement_type, material_id = %input.material_id))]
    pub async fn create_movement(
        &self,
        input: CreateMovementInput,
        actor_id: Uuid,
    ) -> Result<stock_movement::Model, InventoryError> {
        let db = self.db.as_ref();
        let txn_input = input.clone();
        let result = db
            .transaction::<_, stock_movement::Model, InventoryError>(move |txn| {
                Box::pin(async move {
                    let (movement, _) = apply_movement_in_txn(txn, &txn_input, actor_id).await?;
                    Ok(movement)
                })
            })
            .await;

        let movement = match result {
            Ok(movement) => movement,
            Err(e) => {
                let err: InventoryError = e.into();
                MOVEMENT_FAILURES
                    .with_label_values(&[&format!("{:?}", err.kind())])
                    .inc();
                return Err(err);
            }
        };

        MOVEMENTS_RECORDED
            .with_label_values(&[&input.movement_type.to_string()])
            .inc();
        info!(
            movement_id = %movement.id,
            code = %movement.code,
            movement_type = %movement.movement_type,
            quantity = %movement.quantity,
            "Movement recorded"
        );
        self.event_sender
            .send(Event::MovementRecorded {
                movement_id: movement.id,
                movement_type: movement.movement_type.clone(),
                material_id: movement.material_id,
                quantity: movement.quantity,
                code: movement.code.clone(),
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(movement)
    }

    /// Warehouse-to-warehouse transfer: two linked ledger adjustments,
    /// both-or-neither.
    #[instrument(skip(self))]
    pub async fn create_transfer(
        &self,
        origin_warehouse_id: Uuid,
        destination_warehouse_id: Uuid,
        material_id: Uuid,
        quantity: Decimal,
        idempotency_key: String,
        actor_id: Uuid,
    ) -> Result<stock_movement::Model, InventoryError> {
        self.create_movement(
            CreateMovementInput {
                movement_type: MovementType::Traslado,
                material_id,
                quantity,
                unit_cost: None,
                origin: Some(Holder::Warehouse(origin_warehouse_id)),
                destination: Some(Holder::Warehouse(destination_warehouse_id)),
                idempotency_key,
                serialized_unit_ids: Vec::new(),
                serialized_transition: None,
                assignment_id: None,
                installation_id: None,
                notes: None,
            },
            actor_id,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_movement(
        &self,
        movement_id: Uuid,
    ) -> Result<stock_movement::Model, InventoryError> {
        StockMovement::find_by_id(movement_id)
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| InventoryError::NotFound(format!("Movement {} not found", movement_id)))
    }

    #[instrument(skip(self))]
    pub async fn find_by_material(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, InventoryError> {
        StockMovement::find()
            .filter(stock_movement::Column::MaterialId.eq(material_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), InventoryError> {
        let paginator = StockMovement::find()
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);
        let total = paginator
            .num_items()
            .await
            .map_err(InventoryError::db_error)?;
        let movements = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(InventoryError::db_error)?;
        Ok((movements, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn base_input(movement_type: MovementType) -> CreateMovementInput {
        CreateMovementInput {
            movement_type,
            material_id: Uuid::new_v4(),
            quantity: dec!(1),
            unit_cost: None,
            origin: None,
            destination: None,
            idempotency_key: "key-1".into(),
            serialized_unit_ids: Vec::new(),
            serialized_transition: None,
            assignment_id: None,
            installation_id: None,
            notes: None,
        }
    }

    #[test]
    fn movement_type_strings_round_trip() {
        for mt in [
            MovementType::Entrada,
            MovementType::Salida,
            MovementType::Devolucion,
            MovementType::Traslado,
        ] {
            assert_eq!(MovementType::from_str(&mt.to_string()).unwrap(), mt);
        }
    }

    #[test]
    fn entrada_requires_destination_warehouse() {
        let mut input = base_input(MovementType::Entrada);
        assert!(input.validate().is_err());
        input.destination = Some(Holder::Warehouse(Uuid::new_v4()));
        assert!(input.validate().is_ok());
        input.destination = Some(Holder::Technician(Uuid::new_v4()));
        assert!(input.validate().is_err());
    }

    #[test]
    fn traslado_rejects_same_warehouse() {
        let wh = Uuid::new_v4();
        let mut input = base_input(MovementType::Traslado);
        input.origin = Some(Holder::Warehouse(wh));
        input.destination = Some(Holder::Warehouse(wh));
        assert!(input.validate().is_err());
        input.destination = Some(Holder::Warehouse(Uuid::new_v4()));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn equal_origin_and_destination_holders_are_rejected() {
        let warehouse = Uuid::new_v4();
        let mut input = base_input(MovementType::Devolucion);
        input.origin = Some(Holder::Warehouse(warehouse));
        input.destination = Some(Holder::Warehouse(warehouse));
        assert!(input.validate().is_err());

        let technician = Uuid::new_v4();
        let mut input = base_input(MovementType::Salida);
        input.origin = Some(Holder::Technician(technician));
        input.destination = Some(Holder::Technician(technician));
        assert!(input.validate().is_err());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut input = base_input(MovementType::Entrada);
        input.destination = Some(Holder::Warehouse(Uuid::new_v4()));
        input.quantity = dec!(0);
        assert!(input.validate().is_err());
    }

    #[test]
    fn traslado_deltas_are_both_or_neither_and_lock_ordered() {
        let a = Uuid::from_u128(5);
        let b = Uuid::from_u128(3);
        let mut input = base_input(MovementType::Traslado);
        input.origin = Some(Holder::Warehouse(a));
        input.destination = Some(Holder::Warehouse(b));
        input.quantity = dec!(3);
        let deltas = input.ledger_deltas();
        assert_eq!(deltas.len(), 2);
        // Lock order is holder-id ascending, not origin-first.
        assert_eq!(deltas[0].0, Holder::Warehouse(b));
        assert_eq!(deltas[0].1, dec!(3));
        // The destination row must already exist for transfers.
        assert!(!deltas[0].2);
        assert_eq!(deltas[1].0, Holder::Warehouse(a));
        assert_eq!(deltas[1].1, dec!(-3));
        assert!(deltas[1].2);
    }
}
