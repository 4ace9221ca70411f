use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::audit_entry::{self, Entity as AuditEntry},
    errors::InventoryError,
};

/// Entity labels used in audit entries. Kept as constants so history queries
/// do not depend on scattered string literals.
pub mod entity {
    pub const WAREHOUSE_BALANCE: &str = "warehouse_balance";
    pub const TECHNICIAN_BALANCE: &str = "technician_balance";
    pub const ASSIGNMENT: &str = "assignment";
    pub const SERIALIZED_UNIT: &str = "serialized_unit";
    pub const INSTALLATION_MATERIAL: &str = "installation_material";
}

pub struct NewAuditEntry {
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor_id: Uuid,
    pub movement_id: Option<Uuid>,
}

/// Appends one audit entry inside the caller's transaction. The ledger write
/// and its audit entry commit or roll back together; there is no out-of-band
/// audit path.
pub async fn record<C: ConnectionTrait>(
    conn: &C,
    entry: NewAuditEntry,
) -> Result<audit_entry::Model, InventoryError> {
    audit_entry::ActiveModel {
        id: Set(Uuid::new_v4()),
        entity_type: Set(entry.entity_type.to_string()),
        entity_id: Set(entry.entity_id),
        before: Set(entry.before),
        after: Set(entry.after),
        actor_id: Set(entry.actor_id),
        movement_id: Set(entry.movement_id),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .map_err(InventoryError::db_error)
}

/// Read-side queries over the audit trail.
#[derive(Clone)]
pub struct AuditService {
    db: Arc<DatabaseConnection>,
}

impl AuditService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, InventoryError> {
        AuditEntry::find()
            .filter(audit_entry::Column::EntityType.eq(entity_type))
            .filter(audit_entry::Column::EntityId.eq(entity_id))
            .order_by_asc(audit_entry::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn find_by_movement(
        &self,
        movement_id: Uuid,
    ) -> Result<Vec<audit_entry::Model>, InventoryError> {
        AuditEntry::find()
            .filter(audit_entry::Column::MovementId.eq(movement_id))
            .order_by_asc(audit_entry::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<audit_entry::Model>, u64), InventoryError> {
        let paginator = AuditEntry::find()
            .order_by_desc(audit_entry::Column::CreatedAt)
            .paginate(self.db.as_ref(), limit);
        let total = paginator
            .num_items()
            .await
            .map_err(InventoryError::db_error)?;
        let entries = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(InventoryError::db_error)?;
        Ok((entries, total))
    }
}
