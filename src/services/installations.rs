use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{
        installation_material::{self, Entity as InstallationMaterial},
        serialized_unit::{self, Entity as SerializedUnit},
    },
    errors::InventoryError,
    events::{Event, EventSender},
    services::{
        audit::{self, NewAuditEntry},
        movements::{self, CreateMovementInput, MovementType, SerializedTransition},
        serialized_units::UnitState,
        stock_ledger::Holder,
    },
};

/// Tri-state review outcome. Modeled as an explicit enum so an unreviewed
/// consumption can never be confused with a rejected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ConsumeInput {
    pub installation_id: Uuid,
    pub technician_id: Uuid,
    pub material_id: Uuid,
    pub quantity: Decimal,
    pub serialized_unit_ids: Vec<Uuid>,
    pub notes: Option<String>,
}

/// Binds material and serialized-unit consumption to installation jobs, with
/// a tri-state review outcome and compensating returns on rejection.
#[derive(Clone)]
pub struct InstallationService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl InstallationService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Records consumption for an installation: decrements the technician's
    /// carry stock, moves the named units AtInstallation, and leaves the
    /// consumption Pending review. One transaction.
    #[instrument(skip(self, input), fields(installation_id = %input.installation_id, material_id = %input.material_id))]
    pub async fn consume_for_installation(
        &self,
        input: ConsumeInput,
        actor_id: Uuid,
    ) -> Result<installation_material::Model, InventoryError> {
        if input.quantity <= Decimal::ZERO {
            return Err(InventoryError::ValidationError(
                "consumed quantity must be positive".into(),
            ));
        }
        if !input.serialized_unit_ids.is_empty()
            && Decimal::from(input.serialized_unit_ids.len() as i64) != input.quantity
        {
            return Err(InventoryError::ValidationError(format!(
                "serialized consumption of {} unit(s) must match quantity {}",
                input.serialized_unit_ids.len(),
                input.quantity
            )));
        }

        let db = self.db.as_ref();
        let txn_input = input.clone();
        let row = db
            .transaction::<_, installation_material::Model, InventoryError>(move |txn| {
                Box::pin(async move {
                    let id = Uuid::new_v4();
                    let now = Utc::now();
                    let unit_ids_json = if txn_input.serialized_unit_ids.is_empty() {
                        None
                    } else {
                        Some(
                            serde_json::to_value(&txn_input.serialized_unit_ids)
                                .unwrap_or_default(),
                        )
                    };
                    let row = installation_material::ActiveModel {
                        id: Set(id),
                        installation_id: Set(txn_input.installation_id),
                        material_id: Set(txn_input.material_id),
                        technician_id: Set(txn_input.technician_id),
                        quantity: Set(txn_input.quantity),
                        serialized_unit_ids: Set(unit_ids_json),
                        approval_status: Set(ApprovalStatus::Pending.to_string()),
                        created_by: Set(actor_id),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await
                    .map_err(InventoryError::db_error)?;

                    let serialized_transition = if txn_input.serialized_unit_ids.is_empty() {
                        None
                    } else {
                        Some(SerializedTransition::ToInstallation {
                            installation_id: txn_input.installation_id,
                            installation_material_id: id,
                        })
                    };
                    movements::apply_movement_in_txn(
                        txn,
                        &CreateMovementInput {
                            movement_type: MovementType::Salida,
                            material_id: txn_input.material_id,
                            quantity: txn_input.quantity,
                            unit_cost: None,
                            origin: Some(Holder::Technician(txn_input.technician_id)),
                            destination: None,
                            idempotency_key: format!("inst-consume-{}", id),
                            serialized_unit_ids: txn_input.serialized_unit_ids.clone(),
                            serialized_transition,
                            assignment_id: None,
                            installation_id: Some(txn_input.installation_id),
                            notes: txn_input.notes.clone(),
                        },
                        actor_id,
                    )
                    .await?;

                    audit::record(
                        txn,
                        NewAuditEntry {
                            entity_type: audit::entity::INSTALLATION_MATERIAL,
                            entity_id: id,
                            before: None,
                            after: Some(serde_json::to_value(&row).unwrap_or_default()),
                            actor_id,
                            movement_id: None,
                        },
                    )
                    .await?;
                    Ok(row)
                })
            })
            .await?;

        self.event_sender
            .send(Event::ConsumptionRecorded {
                installation_material_id: row.id,
                installation_id: row.installation_id,
                material_id: row.material_id,
                quantity: row.quantity,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(row)
    }

    /// Reviews a pending consumption. Approved finalizes it (units become
    /// eligible for `mark_installed`); Rejected returns the quantity to the
    /// technician's carry stock via a compensating Devolución and releases
    /// the units from the installation.
    #[instrument(skip(self))]
    pub async fn review_consumption(
        &self,
        installation_material_id: Uuid,
        outcome: ApprovalStatus,
        actor_id: Uuid,
    ) -> Result<installation_material::Model, InventoryError> {
        if outcome == ApprovalStatus::Pending {
            return Err(InventoryError::ValidationError(
                "review outcome must be approved or rejected".into(),
            ));
        }

        let db = self.db.as_ref();
        let row = db
            .transaction::<_, installation_material::Model, InventoryError>(move |txn| {
                Box::pin(async move {
                    let row = InstallationMaterial::find_by_id(installation_material_id)
                        .one(txn)
                        .await
                        .map_err(InventoryError::db_error)?
                        .ok_or_else(|| {
                            InventoryError::NotFound(format!(
                                "Installation material {} not found",
                                installation_material_id
                            ))
                        })?;
                    if row.approval_status != ApprovalStatus::Pending.to_string() {
                        return Err(InventoryError::Conflict(format!(
                            "Consumption {} already reviewed ({})",
                            installation_material_id, row.approval_status
                        )));
                    }

                    if outcome == ApprovalStatus::Rejected {
                        let unit_ids = unit_ids_of(&row)?;
                        let serialized_transition = if unit_ids.is_empty() {
                            None
                        } else {
                            Some(SerializedTransition::FromInstallation)
                        };
                        movements::apply_movement_in_txn(
                            txn,
                            &CreateMovementInput {
                                movement_type: MovementType::Devolucion,
                                material_id: row.material_id,
                                quantity: row.quantity,
                                unit_cost: None,
                                origin: None,
                                destination: Some(Holder::Technician(row.technician_id)),
                                idempotency_key: format!(
                                    "inst-reject-{}",
                                    installation_material_id
                                ),
                                serialized_unit_ids: unit_ids,
                                serialized_transition,
                                assignment_id: None,
                                installation_id: Some(row.installation_id),
                                notes: Some("consumption rejected".into()),
                            },
                            actor_id,
                        )
                        .await?;
                    }

                    let before = serde_json::to_value(&row).unwrap_or_default();
                    let mut active: installation_material::ActiveModel = row.into();
                    active.approval_status = Set(outcome.to_string());
                    active.updated_at = Set(Utc::now());
                    let updated = active
                        .update(txn)
                        .await
                        .map_err(InventoryError::db_error)?;

                    audit::record(
                        txn,
                        NewAuditEntry {
                            entity_type: audit::entity::INSTALLATION_MATERIAL,
                            entity_id: installation_material_id,
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
            .send(Event::ConsumptionReviewed {
                installation_material_id: row.id,
                outcome: row.approval_status.clone(),
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(row)
    }

    /// Annuls an installation that never went through the release path.
    /// Policy: every unit still AtInstallation cascades back to
    /// WithTechnician, and unfinalized fungible consumption returns to the
    /// technician; nothing is left holding a dangling installation reference.
    #[instrument(skip(self))]
    pub async fn annul_installation(
        &self,
        installation_id: Uuid,
        actor_id: Uuid,
    ) -> Result<usize, InventoryError> {
        let db = self.db.as_ref();
        let released = db
            .transaction::<_, usize, InventoryError>(move |txn| {
                Box::pin(async move { annul_in_txn(txn, installation_id, actor_id).await })
            })
            .await?;

        self.event_sender
            .send(Event::InstallationAnnulled {
                installation_id,
                released_units: released,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(released)
    }

    #[instrument(skip(self))]
    pub async fn find_by_installation(
        &self,
        installation_id: Uuid,
    ) -> Result<Vec<installation_material::Model>, InventoryError> {
        InstallationMaterial::find()
            .filter(installation_material::Column::InstallationId.eq(installation_id))
            .order_by_asc(installation_material::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_consumption(
        &self,
        installation_material_id: Uuid,
    ) -> Result<installation_material::Model, InventoryError> {
        InstallationMaterial::find_by_id(installation_material_id)
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::NotFound(format!(
                    "Installation material {} not found",
                    installation_material_id
                ))
            })
    }
}

fn unit_ids_of(row: &installation_material::Model) -> Result<Vec<Uuid>, InventoryError> {
    match &row.serialized_unit_ids {
        None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            InventoryError::Integrity(format!(
                "Consumption {} has malformed unit id list: {}",
                row.id, e
            ))
        }),
    }
}

async fn annul_in_txn<C: ConnectionTrait>(
    conn: &C,
    installation_id: Uuid,
    actor_id: Uuid,
) -> Result<usize, InventoryError> {
    let rows = InstallationMaterial::find()
        .filter(installation_material::Column::InstallationId.eq(installation_id))
        .all(conn)
        .await
        .map_err(InventoryError::db_error)?;
    if rows.is_empty() {
        return Err(InventoryError::NotFound(format!(
            "No consumption recorded for installation {}",
            installation_id
        )));
    }

    let mut released = 0usize;
    for row in rows {
        if row.approval_status == ApprovalStatus::Rejected.to_string() {
            continue;
        }
        let unit_ids = unit_ids_of(&row)?;

        // Units already Installed are terminal; a consumption with any
        // installed unit stays finalized.
        let at_installation: Vec<Uuid> = if unit_ids.is_empty() {
            Vec::new()
        } else {
            SerializedUnit::find()
                .filter(serialized_unit::Column::Id.is_in(unit_ids.clone()))
                .filter(serialized_unit::Column::State.eq(UnitState::AtInstallation.to_string()))
                .all(conn)
                .await
                .map_err(InventoryError::db_error)?
                .into_iter()
                .map(|u| u.id)
                .collect()
        };
        if !unit_ids.is_empty() && at_installation.len() != unit_ids.len() {
            warn!(
                installation_material_id = %row.id,
                "Skipping annulment of consumption with installed units"
            );
            continue;
        }

        let serialized_transition = if at_installation.is_empty() {
            None
        } else {
            Some(SerializedTransition::FromInstallation)
        };
        movements::apply_movement_in_txn(
            conn,
            &CreateMovementInput {
                movement_type: MovementType::Devolucion,
                material_id: row.material_id,
                quantity: row.quantity,
                unit_cost: None,
                origin: None,
                destination: Some(Holder::Technician(row.technician_id)),
                idempotency_key: format!("inst-annul-{}", row.id),
                serialized_unit_ids: at_installation.clone(),
                serialized_transition,
                assignment_id: None,
                installation_id: Some(installation_id),
                notes: Some("installation annulled".into()),
            },
            actor_id,
        )
        .await?;
        released += at_installation.len();

        let before = serde_json::to_value(&row).unwrap_or_default();
        let row_id = row.id;
        let mut active: installation_material::ActiveModel = row.into();
        active.approval_status = Set(ApprovalStatus::Rejected.to_string());
        active.updated_at = Set(Utc::now());
        let updated = active
            .update(conn)
            .await
            .map_err(InventoryError::db_error)?;
        audit::record(
            conn,
            NewAuditEntry {
                entity_type: audit::entity::INSTALLATION_MATERIAL,
                entity_id: row_id,
                before: Some(before),
                after: Some(serde_json::to_value(&updated).unwrap_or_default()),
                actor_id,
                movement_id: None,
            },
        )
        .await?;
    }

    info!(
        installation_id = %installation_id,
        released_units = released,
        "Installation annulled"
    );
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn approval_status_strings_round_trip() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
        ] {
            assert_eq!(
                ApprovalStatus::from_str(&status.to_string()).unwrap(),
                status
            );
        }
    }
}
