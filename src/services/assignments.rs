use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        assignment::{self, Entity as Assignment},
        assignment_line::{self, Entity as AssignmentLine},
    },
    errors::InventoryError,
    events::{Event, EventSender},
    services::{
        audit::{self, NewAuditEntry},
        installations::ApprovalStatus,
        movements::{self, CreateMovementInput, MovementType, SerializedTransition},
        stock_ledger::Holder,
    },
};

/// One material line in an assignment batch. Serialized unit ids, when
/// present, move to the technician's carry stock in the same transaction.
#[derive(Debug, Clone)]
pub struct AssignmentLineInput {
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub serialized_unit_ids: Vec<Uuid>,
}

/// Batches material lines moved warehouse -> technician in one transaction.
#[derive(Clone)]
pub struct AssignmentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl AssignmentService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates the assignment: per line, -warehouse then +technician, one
    /// linked Salida movement, audit entries, all in one transaction. The
    /// resulting status is Approved; the technician may use the material
    /// immediately.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn create_assignment(
        &self,
        warehouse_id: Uuid,
        technician_id: Uuid,
        actor_id: Uuid,
        lines: Vec<AssignmentLineInput>,
    ) -> Result<(assignment::Model, Vec<assignment_line::Model>), InventoryError> {
        if lines.is_empty() {
            return Err(InventoryError::ValidationError(
                "assignment requires at least one line".into(),
            ));
        }
        let mut seen = HashSet::new();
        for line in &lines {
            if line.quantity <= Decimal::ZERO {
                return Err(InventoryError::ValidationError(format!(
                    "assignment line for material {} must have positive quantity",
                    line.material_id
                )));
            }
            if !seen.insert(line.material_id) {
                return Err(InventoryError::ValidationError(format!(
                    "duplicate assignment line for material {}",
                    line.material_id
                )));
            }
        }

        let db = self.db.as_ref();
        let line_count = lines.len();
        let (header, saved_lines) = db
            .transaction::<_, (assignment::Model, Vec<assignment_line::Model>), InventoryError>(
                move |txn| {
                    Box::pin(async move {
                        let assignment_id = Uuid::new_v4();
                        let now = Utc::now();
                        let header = assignment::ActiveModel {
                            id: Set(assignment_id),
                            warehouse_id: Set(warehouse_id),
                            technician_id: Set(technician_id),
                            status: Set(ApprovalStatus::Approved.to_string()),
                            created_by: Set(actor_id),
                            created_at: Set(now),
                            updated_at: Set(now),
                            reversed_at: Set(None),
                        }
                        .insert(txn)
                        .await
                        .map_err(InventoryError::db_error)?;

                        // Fixed global lock order across lines.
                        let mut lines = lines;
                        lines.sort_by_key(|l| l.material_id);

                        let mut saved_lines = Vec::with_capacity(lines.len());
                        for line in &lines {
                            let serialized_transition = if line.serialized_unit_ids.is_empty() {
                                None
                            } else {
                                Some(SerializedTransition::ToTechnician {
                                    technician_id,
                                    carry_id: assignment_id,
                                })
                            };
                            movements::apply_movement_in_txn(
                                txn,
                                &CreateMovementInput {
                                    movement_type: MovementType::Salida,
                                    material_id: line.material_id,
                                    quantity: line.quantity,
                                    unit_cost: None,
                                    origin: Some(Holder::Warehouse(warehouse_id)),
                                    destination: Some(Holder::Technician(technician_id)),
                                    idempotency_key: format!(
                                        "asg-{}-{}",
                                        assignment_id, line.material_id
                                    ),
                                    serialized_unit_ids: line.serialized_unit_ids.clone(),
                                    serialized_transition,
                                    assignment_id: Some(assignment_id),
                                    installation_id: None,
                                    notes: None,
                                },
                                actor_id,
                            )
                            .await?;

                            let saved = assignment_line::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                assignment_id: Set(assignment_id),
                                material_id: Set(line.material_id),
                                quantity: Set(line.quantity),
                            }
                            .insert(txn)
                            .await
                            .map_err(InventoryError::db_error)?;
                            saved_lines.push(saved);
                        }

                        audit::record(
                            txn,
                            NewAuditEntry {
                                entity_type: audit::entity::ASSIGNMENT,
                                entity_id: assignment_id,
                                before: None,
                                after: Some(serde_json::to_value(&header).unwrap_or_default()),
                                actor_id,
                                movement_id: None,
                            },
                        )
                        .await?;

                        Ok((header, saved_lines))
                    })
                },
            )
            .await?;

        info!(
            assignment_id = %header.id,
            warehouse_id = %warehouse_id,
            technician_id = %technician_id,
            lines = line_count,
            "Assignment created"
        );
        self.event_sender
            .send(Event::MaterialsAssigned {
                assignment_id: header.id,
                warehouse_id,
                technician_id,
                line_count,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok((header, saved_lines))
    }

    /// Reverses an assignment by applying the exact negated deltas it
    /// originally applied, one compensating Devolución per line. Balances are
    /// never re-zeroed wholesale.
    #[instrument(skip(self))]
    pub async fn reverse_assignment(
        &self,
        assignment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<assignment::Model, InventoryError> {
        let db = self.db.as_ref();
        let header = db
            .transaction::<_, assignment::Model, InventoryError>(move |txn| {
                Box::pin(async move {
                    let header = Assignment::find_by_id(assignment_id)
                        .one(txn)
                        .await
                        .map_err(InventoryError::db_error)?
                        .ok_or_else(|| {
                            InventoryError::NotFound(format!(
                                "Assignment {} not found",
                                assignment_id
                            ))
                        })?;
                    if header.reversed_at.is_some() {
                        return Err(InventoryError::Conflict(format!(
                            "Assignment {} already reversed",
                            assignment_id
                        )));
                    }

                    let mut lines = AssignmentLine::find()
                        .filter(assignment_line::Column::AssignmentId.eq(assignment_id))
                        .all(txn)
                        .await
                        .map_err(InventoryError::db_error)?;
                    lines.sort_by_key(|l| l.material_id);

                    for line in &lines {
                        movements::apply_movement_in_txn(
                            txn,
                            &CreateMovementInput {
                                movement_type: MovementType::Devolucion,
                                material_id: line.material_id,
                                quantity: line.quantity,
                                unit_cost: None,
                                origin: Some(Holder::Technician(header.technician_id)),
                                destination: Some(Holder::Warehouse(header.warehouse_id)),
                                idempotency_key: format!(
                                    "asg-rev-{}-{}",
                                    assignment_id, line.material_id
                                ),
                                serialized_unit_ids: Vec::new(),
                                serialized_transition: None,
                                assignment_id: Some(assignment_id),
                                installation_id: None,
                                notes: Some("assignment reversal".into()),
                            },
                            actor_id,
                        )
                        .await?;
                    }

                    let before = serde_json::to_value(&header).unwrap_or_default();
                    let mut active: assignment::ActiveModel = header.into();
                    active.status = Set(ApprovalStatus::Rejected.to_string());
                    active.reversed_at = Set(Some(Utc::now()));
                    active.updated_at = Set(Utc::now());
                    let updated = active
                        .update(txn)
                        .await
                        .map_err(InventoryError::db_error)?;

                    audit::record(
                        txn,
                        NewAuditEntry {
                            entity_type: audit::entity::ASSIGNMENT,
                            entity_id: assignment_id,
                            before: Some(before),
                            after: Some(serde_json::to_value(&updated).unwrap_or_default()),
                            actor_id,
                            movement_id: None,
                        },
                    )
                    .await?;

                    Ok(updated)
                })
            })
            .await?;

        self.event_sender
            .send(Event::AssignmentReversed {
                assignment_id: header.id,
                technician_id: header.technician_id,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(header)
    }

    #[instrument(skip(self))]
    pub async fn get_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<(assignment::Model, Vec<assignment_line::Model>), InventoryError> {
        let header = Assignment::find_by_id(assignment_id)
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::NotFound(format!("Assignment {} not found", assignment_id))
            })?;
        let lines = AssignmentLine::find()
            .filter(assignment_line::Column::AssignmentId.eq(assignment_id))
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?;
        Ok((header, lines))
    }

    #[instrument(skip(self))]
    pub async fn find_by_technician(
        &self,
        technician_id: Uuid,
    ) -> Result<Vec<assignment::Model>, InventoryError> {
        Assignment::find()
            .filter(assignment::Column::TechnicianId.eq(technician_id))
            .order_by_desc(assignment::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }
}
