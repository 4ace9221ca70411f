use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::material::{self, Entity as Material},
    errors::InventoryError,
    services::stock_ledger::{self, Holder},
};

#[derive(Debug, Clone)]
pub struct CreateMaterialInput {
    pub code: String,
    pub name: String,
    pub unit_of_measure: String,
    pub is_serialized: bool,
}

/// Material catalogue and balance reads. All stock mutation goes through the
/// movement/assignment/installation services, never through here.
#[derive(Clone)]
pub struct MaterialService {
    db: Arc<DbPool>,
}

impl MaterialService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_material(
        &self,
        input: CreateMaterialInput,
    ) -> Result<material::Model, InventoryError> {
        let code = input.code.trim().to_string();
        if code.is_empty() {
            return Err(InventoryError::ValidationError(
                "material code must not be empty".into(),
            ));
        }
        let existing = Material::find()
            .filter(material::Column::Code.eq(code.clone()))
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?;
        if existing.is_some() {
            return Err(InventoryError::Conflict(format!(
                "Material code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = material::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            name: Set(input.name),
            unit_of_measure: Set(input.unit_of_measure),
            is_serialized: Set(input.is_serialized),
            aggregate_stock: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .map_err(InventoryError::db_error)?;
        info!(material_id = %created.id, code = %created.code, "Material created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_material(
        &self,
        material_id: Uuid,
    ) -> Result<material::Model, InventoryError> {
        stock_ledger::require_material(self.db.as_ref(), material_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_by_code(&self, code: &str) -> Result<material::Model, InventoryError> {
        Material::find()
            .filter(material::Column::Code.eq(code))
            .one(self.db.as_ref())
            .await
            .map_err(InventoryError::db_error)?
            .ok_or_else(|| InventoryError::NotFound(format!("Material {} not found", code)))
    }

    /// Current fungible balance for a material/holder pair.
    #[instrument(skip(self))]
    pub async fn get_balance(
        &self,
        material_id: Uuid,
        holder: Holder,
    ) -> Result<Decimal, InventoryError> {
        stock_ledger::get_balance(self.db.as_ref(), material_id, holder).await
    }

    #[instrument(skip(self))]
    pub async fn list_materials(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<material::Model>, u64), InventoryError> {
        let paginator = Material::find()
            .order_by_asc(material::Column::Code)
            .paginate(self.db.as_ref(), limit);
        let total = paginator
            .num_items()
            .await
            .map_err(InventoryError::db_error)?;
        let materials = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(InventoryError::db_error)?;
        Ok((materials, total))
    }
}
