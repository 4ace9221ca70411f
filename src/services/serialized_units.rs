use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{info, instrument};
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
        installations::ApprovalStatus,
        stock_ledger,
    },
};

/// Lifecycle state of a serialized unit. `Installed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum UnitState {
    Available,
    WithTechnician,
    AtInstallation,
    Installed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        self == UnitState::Installed
    }

    /// The transition table. Everything not listed here is rejected.
    pub fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Available, WithTechnician)
                | (WithTechnician, Available)
                | (WithTechnician, AtInstallation)
                | (AtInstallation, WithTechnician)
                | (AtInstallation, Installed)
        )
    }
}

/// Current holder of a unit, exactly one at a time. Persisted as the
/// (holder_type, holder_id) column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitHolder {
    Warehouse(Uuid),
    TechnicianCarry(Uuid),
    InstallationMaterial(Uuid),
}

impl UnitHolder {
    pub fn kind(&self) -> &'static str {
        match self {
            UnitHolder::Warehouse(_) => "warehouse",
            UnitHolder::TechnicianCarry(_) => "technician_carry",
            UnitHolder::InstallationMaterial(_) => "installation_material",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            UnitHolder::Warehouse(id)
            | UnitHolder::TechnicianCarry(id)
            | UnitHolder::InstallationMaterial(id) => *id,
        }
    }

    pub fn from_columns(
        holder_type: Option<&str>,
        holder_id: Option<Uuid>,
    ) -> Result<Option<Self>, InventoryError> {
        match (holder_type, holder_id) {
            (None, None) => Ok(None),
            (Some("warehouse"), Some(id)) => Ok(Some(UnitHolder::Warehouse(id))),
            (Some("technician_carry"), Some(id)) => Ok(Some(UnitHolder::TechnicianCarry(id))),
            (Some("installation_material"), Some(id)) => {
                Ok(Some(UnitHolder::InstallationMaterial(id)))
            }
            (kind, id) => Err(InventoryError::Integrity(format!(
                "serialized unit holder columns out of sync: {:?}/{:?}",
                kind, id
            ))),
        }
    }
}

/// Parses the persisted state column, treating garbage as an integrity fault
/// rather than a caller error.
pub fn unit_state(model: &serialized_unit::Model) -> Result<UnitState, InventoryError> {
    UnitState::from_str(&model.state).map_err(|_| {
        InventoryError::Integrity(format!(
            "serialized unit {} has unknown state '{}'",
            model.id, model.state
        ))
    })
}

/// Registry and state machine for individually numbered units.
#[derive(Clone)]
pub struct SerializedUnitService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl SerializedUnitService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Registers a new unit as Available in a warehouse. Serial numbers are
    /// globally unique and immutable.
    #[instrument(skip(self))]
    pub async fn register_unit(
        &self,
        serial_number: &str,
        material_id: Uuid,
        warehouse_id: Uuid,
        actor_id: Uuid,
    ) -> Result<serialized_unit::Model, InventoryError> {
        let serial_number = serial_number.trim().to_string();
        if serial_number.is_empty() {
            return Err(InventoryError::ValidationError(
                "serial number must not be empty".into(),
            ));
        }
        let db = self.db.as_ref();
        let unit = db
            .transaction::<_, serialized_unit::Model, InventoryError>(move |txn| {
                Box::pin(async move {
                    let material = stock_ledger::require_material(txn, material_id).await?;
                    if !material.is_serialized {
                        return Err(InventoryError::ValidationError(format!(
                            "Material {} is not serialized",
                            material.code
                        )));
                    }
                    let existing = SerializedUnit::find()
                        .filter(serialized_unit::Column::SerialNumber.eq(serial_number.clone()))
                        .one(txn)
                        .await
                        .map_err(InventoryError::db_error)?;
                    if existing.is_some() {
                        return Err(InventoryError::Conflict(format!(
                            "Serial number {} already registered",
                            serial_number
                        )));
                    }
                    let now = Utc::now();
                    let unit = serialized_unit::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        serial_number: Set(serial_number),
                        material_id: Set(material_id),
                        state: Set(UnitState::Available.to_string()),
                        holder_type: Set(Some("warehouse".into())),
                        holder_id: Set(Some(warehouse_id)),
                        technician_id: Set(None),
                        installation_id: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await
                    .map_err(InventoryError::db_error)?;
                    audit::record(
                        txn,
                        NewAuditEntry {
                            entity_type: audit::entity::SERIALIZED_UNIT,
                            entity_id: unit.id,
                            before: None,
                            after: Some(serde_json::to_value(&unit).unwrap_or_default()),
                            actor_id,
                            movement_id: None,
                        },
                    )
                    .await?;
                    Ok(unit)
                })
            })
            .await?;
        Ok(unit)
    }

    /// Available -> WithTechnician for the whole batch, or nothing.
    #[instrument(skip(self))]
    pub async fn assign_to_technician(
        &self,
        unit_ids: Vec<Uuid>,
        technician_id: Uuid,
        carry_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        let db = self.db.as_ref();
        let ids = unit_ids.clone();
        let updated = db
            .transaction::<_, Vec<serialized_unit::Model>, InventoryError>(move |txn| {
                Box::pin(async move {
                    assign_to_technician_in_txn(txn, &ids, technician_id, carry_id, actor_id).await
                })
            })
            .await?;
        self.event_sender
            .send(Event::UnitsAssignedToTechnician {
                technician_id,
                carry_id,
                unit_ids,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(updated)
    }

    /// WithTechnician -> Available. The receiving warehouse is optional; with
    /// no warehouse the unit is left Available and unheld.
    #[instrument(skip(self))]
    pub async fn release_from_technician(
        &self,
        unit_ids: Vec<Uuid>,
        warehouse_id: Option<Uuid>,
        actor_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        let db = self.db.as_ref();
        let ids = unit_ids.clone();
        let updated = db
            .transaction::<_, Vec<serialized_unit::Model>, InventoryError>(move |txn| {
                Box::pin(async move {
                    release_from_technician_in_txn(txn, &ids, warehouse_id, actor_id).await
                })
            })
            .await?;
        self.event_sender
            .send(Event::UnitsReleasedToWarehouse {
                warehouse_id,
                unit_ids,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(updated)
    }

    /// WithTechnician -> AtInstallation.
    #[instrument(skip(self))]
    pub async fn assign_to_installation(
        &self,
        unit_ids: Vec<Uuid>,
        installation_id: Uuid,
        installation_material_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        let db = self.db.as_ref();
        let ids = unit_ids.clone();
        let updated = db
            .transaction::<_, Vec<serialized_unit::Model>, InventoryError>(move |txn| {
                Box::pin(async move {
                    assign_to_installation_in_txn(
                        txn,
                        &ids,
                        installation_id,
                        installation_material_id,
                        actor_id,
                    )
                    .await
                })
            })
            .await?;
        self.event_sender
            .send(Event::UnitsAtInstallation {
                installation_id,
                unit_ids,
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(updated)
    }

    /// AtInstallation -> WithTechnician (back to the carry stock recorded on
    /// the consumption row).
    #[instrument(skip(self))]
    pub async fn release_from_installation(
        &self,
        unit_ids: Vec<Uuid>,
        actor_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        let db = self.db.as_ref();
        let ids = unit_ids.clone();
        let updated = db
            .transaction::<_, Vec<serialized_unit::Model>, InventoryError>(move |txn| {
                Box::pin(async move { release_from_installation_in_txn(txn, &ids, actor_id).await })
            })
            .await?;
        self.event_sender
            .send(Event::UnitsReleasedFromInstallation { unit_ids })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(updated)
    }

    /// Bulk terminal transition: every AtInstallation unit of the
    /// installation becomes Installed. Units consumed under a non-approved
    /// consumption row block the whole call.
    #[instrument(skip(self))]
    pub async fn mark_installed(
        &self,
        installation_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        let db = self.db.as_ref();
        let updated = db
            .transaction::<_, Vec<serialized_unit::Model>, InventoryError>(move |txn| {
                Box::pin(async move { mark_installed_in_txn(txn, installation_id, actor_id).await })
            })
            .await?;
        self.event_sender
            .send(Event::UnitsInstalled {
                installation_id,
                unit_count: updated.len(),
            })
            .await
            .map_err(InventoryError::EventError)?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_unit(
        &self,
        unit_id: Uuid,
    ) -> Result<serialized_unit::Model, InventoryError> {
        SerializedUnit::find_by_id(unit_id)
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::NotFound(format!("Serialized unit {} not found", unit_id))
            })
    }

    #[instrument(skip(self))]
    pub async fn find_by_serial(
        &self,
        serial_number: &str,
    ) -> Result<serialized_unit::Model, InventoryError> {
        SerializedUnit::find()
            .filter(serialized_unit::Column::SerialNumber.eq(serial_number))
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::NotFound(format!("Serialized unit {} not found", serial_number))
            })
    }

    #[instrument(skip(self))]
    pub async fn find_by_material(
        &self,
        material_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        SerializedUnit::find()
            .filter(serialized_unit::Column::MaterialId.eq(material_id))
            .order_by_asc(serialized_unit::Column::SerialNumber)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn find_by_technician(
        &self,
        technician_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        SerializedUnit::find()
            .filter(serialized_unit::Column::TechnicianId.eq(technician_id))
            .order_by_asc(serialized_unit::Column::SerialNumber)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn find_by_installation(
        &self,
        installation_id: Uuid,
    ) -> Result<Vec<serialized_unit::Model>, InventoryError> {
        SerializedUnit::find()
            .filter(serialized_unit::Column::InstallationId.eq(installation_id))
            .order_by_asc(serialized_unit::Column::SerialNumber)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }
}

/// Loads a batch of units and verifies every one is in `expected`. Missing
/// ids are `NotFound`; a uniformly wrong batch (or single unit) is `Conflict`
/// naming the first offender; a mixed batch is `Integrity`, because applying
/// it would leave some units transitioned and others not.
async fn load_batch_expecting<C: ConnectionTrait>(
    conn: &C,
    unit_ids: &[Uuid],
    expected: UnitState,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    if unit_ids.is_empty() {
        return Err(InventoryError::ValidationError(
            "unit id batch must not be empty".into(),
        ));
    }
    let mut deduped = unit_ids.to_vec();
    deduped.sort();
    deduped.dedup();
    if deduped.len() != unit_ids.len() {
        return Err(InventoryError::Integrity(
            "unit id batch contains duplicates".into(),
        ));
    }

    let mut query = SerializedUnit::find().filter(serialized_unit::Column::Id.is_in(deduped));
    if conn.get_database_backend() == DbBackend::Postgres {
        query = query.lock_exclusive();
    }
    let units = query.all(conn).await.map_err(InventoryError::db_error)?;

    if units.len() != unit_ids.len() {
        let found: Vec<Uuid> = units.iter().map(|u| u.id).collect();
        let missing: Vec<String> = unit_ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(|id| id.to_string())
            .collect();
        return Err(InventoryError::NotFound(format!(
            "Serialized unit(s) not found: {}",
            missing.join(", ")
        )));
    }

    let mut offenders = Vec::new();
    for unit in &units {
        let state = unit_state(unit)?;
        if state != expected {
            offenders.push((unit.serial_number.clone(), state));
        }
    }
    if !offenders.is_empty() {
        if offenders.len() == units.len() || units.len() == 1 {
            let (serial, state) = &offenders[0];
            return Err(InventoryError::Conflict(format!(
                "Unit {} is {} (expected {})",
                serial, state, expected
            )));
        }
        let serials: Vec<String> = offenders.iter().map(|(s, _)| s.clone()).collect();
        return Err(InventoryError::Integrity(format!(
            "Batch rejected: unit(s) {} not in state {}",
            serials.join(", "),
            expected
        )));
    }

    Ok(units)
}

async fn apply_transition<C: ConnectionTrait>(
    conn: &C,
    unit: serialized_unit::Model,
    next: UnitState,
    holder: Option<UnitHolder>,
    technician_id: Option<Uuid>,
    installation_id: Option<Uuid>,
    actor_id: Uuid,
) -> Result<serialized_unit::Model, InventoryError> {
    let state = unit_state(&unit)?;
    if !state.can_transition_to(next) {
        return Err(InventoryError::Conflict(format!(
            "Unit {} cannot move {} -> {}",
            unit.serial_number, state, next
        )));
    }
    let before = serde_json::to_value(&unit).unwrap_or_default();
    let unit_id = unit.id;

    let mut active: serialized_unit::ActiveModel = unit.into();
    active.state = Set(next.to_string());
    active.holder_type = Set(holder.map(|h| h.kind().to_string()));
    active.holder_id = Set(holder.map(|h| h.id()));
    active.technician_id = Set(technician_id);
    active.installation_id = Set(installation_id);
    active.updated_at = Set(Utc::now());
    let updated = active
        .update(conn)
        .await
        .map_err(InventoryError::db_error)?;

    audit::record(
        conn,
        NewAuditEntry {
            entity_type: audit::entity::SERIALIZED_UNIT,
            entity_id: unit_id,
            before: Some(before),
            after: Some(serde_json::to_value(&updated).unwrap_or_default()),
            actor_id,
            movement_id: None,
        },
    )
    .await?;
    Ok(updated)
}

pub(crate) async fn assign_to_technician_in_txn<C: ConnectionTrait>(
    conn: &C,
    unit_ids: &[Uuid],
    technician_id: Uuid,
    carry_id: Uuid,
    actor_id: Uuid,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    let units = load_batch_expecting(conn, unit_ids, UnitState::Available).await?;
    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        updated.push(
            apply_transition(
                conn,
                unit,
                UnitState::WithTechnician,
                Some(UnitHolder::TechnicianCarry(carry_id)),
                Some(technician_id),
                None,
                actor_id,
            )
            .await?,
        );
    }
    info!(technician_id = %technician_id, carry_id = %carry_id, count = updated.len(), "Units assigned to technician");
    Ok(updated)
}

pub(crate) async fn release_from_technician_in_txn<C: ConnectionTrait>(
    conn: &C,
    unit_ids: &[Uuid],
    warehouse_id: Option<Uuid>,
    actor_id: Uuid,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    let units = load_batch_expecting(conn, unit_ids, UnitState::WithTechnician).await?;
    let holder = warehouse_id.map(UnitHolder::Warehouse);
    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        updated.push(
            apply_transition(conn, unit, UnitState::Available, holder, None, None, actor_id)
                .await?,
        );
    }
    Ok(updated)
}

pub(crate) async fn assign_to_installation_in_txn<C: ConnectionTrait>(
    conn: &C,
    unit_ids: &[Uuid],
    installation_id: Uuid,
    installation_material_id: Uuid,
    actor_id: Uuid,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    let units = load_batch_expecting(conn, unit_ids, UnitState::WithTechnician).await?;
    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        updated.push(
            apply_transition(
                conn,
                unit,
                UnitState::AtInstallation,
                Some(UnitHolder::InstallationMaterial(installation_material_id)),
                None,
                Some(installation_id),
                actor_id,
            )
            .await?,
        );
    }
    Ok(updated)
}

pub(crate) async fn release_from_installation_in_txn<C: ConnectionTrait>(
    conn: &C,
    unit_ids: &[Uuid],
    actor_id: Uuid,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    let units = load_batch_expecting(conn, unit_ids, UnitState::AtInstallation).await?;
    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        // The consumption row the unit was bound to records the carry stock
        // it returns to.
        let holder = UnitHolder::from_columns(unit.holder_type.as_deref(), unit.holder_id)?;
        let consumption_id = match holder {
            Some(UnitHolder::InstallationMaterial(id)) => id,
            other => {
                return Err(InventoryError::Integrity(format!(
                    "Unit {} at installation has holder {:?}",
                    unit.serial_number, other
                )))
            }
        };
        let consumption = InstallationMaterial::find_by_id(consumption_id)
            .one(conn)
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::Integrity(format!(
                    "Unit {} references missing consumption {}",
                    unit.serial_number, consumption_id
                ))
            })?;
        updated.push(
            apply_transition(
                conn,
                unit,
                UnitState::WithTechnician,
                Some(UnitHolder::TechnicianCarry(consumption.technician_id)),
                Some(consumption.technician_id),
                None,
                actor_id,
            )
            .await?,
        );
    }
    Ok(updated)
}

pub(crate) async fn mark_installed_in_txn<C: ConnectionTrait>(
    conn: &C,
    installation_id: Uuid,
    actor_id: Uuid,
) -> Result<Vec<serialized_unit::Model>, InventoryError> {
    let units = SerializedUnit::find()
        .filter(serialized_unit::Column::InstallationId.eq(installation_id))
        .filter(serialized_unit::Column::State.eq(UnitState::AtInstallation.to_string()))
        .all(conn)
        .await
        .map_err(InventoryError::db_error)?;
    if units.is_empty() {
        return Err(InventoryError::NotFound(format!(
            "No units at installation {}",
            installation_id
        )));
    }

    // Only units under an approved consumption may finalize.
    for unit in &units {
        let consumption_id = match UnitHolder::from_columns(
            unit.holder_type.as_deref(),
            unit.holder_id,
        )? {
            Some(UnitHolder::InstallationMaterial(id)) => id,
            other => {
                return Err(InventoryError::Integrity(format!(
                    "Unit {} at installation has holder {:?}",
                    unit.serial_number, other
                )))
            }
        };
        let consumption = InstallationMaterial::find_by_id(consumption_id)
            .one(conn)
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| {
                InventoryError::Integrity(format!(
                    "Unit {} references missing consumption {}",
                    unit.serial_number, consumption_id
                ))
            })?;
        if consumption.approval_status != ApprovalStatus::Approved.to_string() {
            return Err(InventoryError::Conflict(format!(
                "Unit {} consumption is {}, not approved",
                unit.serial_number, consumption.approval_status
            )));
        }
    }

    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        let holder = UnitHolder::from_columns(unit.holder_type.as_deref(), unit.holder_id)?;
        updated.push(
            apply_transition(
                conn,
                unit,
                UnitState::Installed,
                holder,
                None,
                Some(installation_id),
                actor_id,
            )
            .await?,
        );
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(UnitState::Available, UnitState::WithTechnician, true)]
    #[case(UnitState::WithTechnician, UnitState::Available, true)]
    #[case(UnitState::WithTechnician, UnitState::AtInstallation, true)]
    #[case(UnitState::AtInstallation, UnitState::WithTechnician, true)]
    #[case(UnitState::AtInstallation, UnitState::Installed, true)]
    #[case(UnitState::Available, UnitState::AtInstallation, false)]
    #[case(UnitState::Available, UnitState::Installed, false)]
    #[case(UnitState::Installed, UnitState::Available, false)]
    #[case(UnitState::Installed, UnitState::WithTechnician, false)]
    #[case(UnitState::Installed, UnitState::AtInstallation, false)]
    fn transition_table(#[case] from: UnitState, #[case] to: UnitState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn installed_is_terminal() {
        assert!(UnitState::Installed.is_terminal());
        assert!(!UnitState::Available.is_terminal());
    }

    #[test]
    fn holder_columns_round_trip() {
        let id = Uuid::new_v4();
        let holder = UnitHolder::TechnicianCarry(id);
        let parsed = UnitHolder::from_columns(Some(holder.kind()), Some(holder.id())).unwrap();
        assert_eq!(parsed, Some(holder));
        assert_eq!(UnitHolder::from_columns(None, None).unwrap(), None);
    }

    #[test]
    fn half_set_holder_columns_are_integrity_faults() {
        let err = UnitHolder::from_columns(Some("warehouse"), None).unwrap_err();
        assert!(matches!(err, InventoryError::Integrity(_)));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            UnitState::Available,
            UnitState::WithTechnician,
            UnitState::AtInstallation,
            UnitState::Installed,
        ] {
            assert_eq!(UnitState::from_str(&state.to_string()).unwrap(), state);
        }
    }
}
