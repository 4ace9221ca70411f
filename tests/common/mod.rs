// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use almacen_core::{
    db::{self, DbConfig, DbPool},
    events::{self, EventSender},
    services::{materials::CreateMaterialInput, movements::CreateMovementInput},
    services::movements::MovementType,
    services::stock_ledger::Holder,
    InventoryCore,
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Harness wiring an InventoryCore to a fresh in-memory SQLite database with
/// the schema applied and the event loop running.
pub struct TestCore {
    pub core: InventoryCore,
    pub db: Arc<DbPool>,
    pub event_sender: EventSender,
    _event_task: tokio::task::JoinHandle<()>,
}

pub async fn setup() -> TestCore {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let pool = db::establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");

    let db = Arc::new(pool);
    let (event_sender, rx) = events::event_channel(100);
    let event_task = tokio::spawn(events::process_events(rx));

    TestCore {
        core: InventoryCore::new(db.clone(), event_sender.clone()),
        db,
        event_sender,
        _event_task: event_task,
    }
}

pub fn dec(value: i64) -> Decimal {
    Decimal::new(value * 10_000, 4)
}

pub fn actor() -> Uuid {
    Uuid::from_u128(0xACCE55)
}

pub async fn create_material(
    harness: &TestCore,
    code: &str,
    is_serialized: bool,
) -> almacen_core::entities::material::Model {
    harness
        .core
        .materials
        .create_material(CreateMaterialInput {
            code: code.to_string(),
            name: format!("Material {}", code),
            unit_of_measure: "unidad".to_string(),
            is_serialized,
        })
        .await
        .expect("create material")
}

/// Seeds warehouse stock through a regular Entrada movement so the aggregate
/// cache and audit trail stay consistent with production paths.
pub async fn seed_warehouse_stock(
    harness: &TestCore,
    material_id: Uuid,
    warehouse_id: Uuid,
    quantity: Decimal,
) {
    harness
        .core
        .movements
        .create_movement(
            CreateMovementInput {
                movement_type: MovementType::Entrada,
                material_id,
                quantity,
                unit_cost: None,
                origin: None,
                destination: Some(Holder::Warehouse(warehouse_id)),
                idempotency_key: format!("seed-{}-{}-{}", material_id, warehouse_id, quantity),
                serialized_unit_ids: Vec::new(),
                serialized_transition: None,
                assignment_id: None,
                installation_id: None,
                notes: Some("seed".to_string()),
            },
            actor(),
        )
        .await
        .expect("seed entrada");
}

/// Checks the cross-table invariant: warehouse plus technician stock equals
/// the material's cached aggregate.
pub async fn assert_aggregate_invariant(harness: &TestCore, material_id: Uuid) {
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

    use almacen_core::entities::{
        material::Entity as Material,
        technician_balance::{self, Entity as TechnicianBalance},
        warehouse_balance::{self, Entity as WarehouseBalance},
    };

    let conn = harness.db.as_ref();
    let warehouse_sum: Decimal = WarehouseBalance::find()
        .filter(warehouse_balance::Column::MaterialId.eq(material_id))
        .all(conn)
        .await
        .expect("warehouse balances")
        .iter()
        .map(|b| b.stock)
        .sum();
    let technician_sum: Decimal = TechnicianBalance::find()
        .filter(technician_balance::Column::MaterialId.eq(material_id))
        .all(conn)
        .await
        .expect("technician balances")
        .iter()
        .map(|b| b.stock)
        .sum();
    let material = Material::find_by_id(material_id)
        .one(conn)
        .await
        .expect("material query")
        .expect("material exists");

    assert_eq!(
        warehouse_sum + technician_sum,
        material.aggregate_stock,
        "aggregate stock cache diverged for material {}",
        material_id
    );
}
