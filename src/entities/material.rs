use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalogue row for a stockable material.
///
/// `aggregate_stock` is a denormalized cache recomputed transactionally from
/// the balance tables after every adjustment; it is never patched in place.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "materials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Uuid")]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    pub unit_of_measure: String,
    pub is_serialized: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub aggregate_stock: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::warehouse_balance::Entity")]
    WarehouseBalance,
    #[sea_orm(has_many = "super::technician_balance::Entity")]
    TechnicianBalance,
    #[sea_orm(has_many = "super::serialized_unit::Entity")]
    SerializedUnit,
}

impl Related<super::warehouse_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WarehouseBalance.def()
    }
}

impl Related<super::technician_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TechnicianBalance.def()
    }
}

impl Related<super::serialized_unit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SerializedUnit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
