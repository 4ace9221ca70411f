use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An individually numbered physical unit (e.g. a utility meter).
///
/// The current holder is the (holder_type, holder_id) pair: both set or both
/// null, never two holders at once. A freshly released unit with no receiving
/// warehouse is Available with a null holder pair.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "serialized_units")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Uuid")]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub serial_number: String,
    pub material_id: Uuid,
    pub state: String,
    pub holder_type: Option<String>,
    pub holder_id: Option<Uuid>,
    /// Denormalized query column, set while the unit is with a technician.
    pub technician_id: Option<Uuid>,
    /// Denormalized query column, set while the unit is at (or installed on)
    /// an installation.
    pub installation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::material::Entity",
        from = "Column::MaterialId",
        to = "super::material::Column::Id"
    )]
    Material,
}

impl Related<super::material::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Material.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
