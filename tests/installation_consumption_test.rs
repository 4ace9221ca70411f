mod common;

use assert_matches::assert_matches;
use almacen_core::{
    errors::InventoryError,
    services::assignments::AssignmentLineInput,
    services::installations::{ApprovalStatus, ConsumeInput},
    services::stock_ledger::Holder,
};
use common::{actor, assert_aggregate_invariant, create_material, dec, seed_warehouse_stock, setup};
use uuid::Uuid;

struct Fixture {
    material_id: Uuid,
    technician: Uuid,
    unit_id: Uuid,
}

/// Serialized material in a technician's hands: one unit plus matching
/// fungible carry stock, brought in through a regular assignment.
async fn technician_with_unit(harness: &common::TestCore, code: &str) -> Fixture {
    let material = create_material(harness, code, true).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    seed_warehouse_stock(harness, material.id, warehouse, dec(1)).await;
    let unit = harness
        .core
        .serialized_units
        .register_unit(&format!("{}-U1", code), material.id, warehouse, actor())
        .await
        .expect("register unit");
    harness
        .core
        .assignments
        .create_assignment(
            warehouse,
            technician,
            actor(),
            vec![AssignmentLineInput {
                material_id: material.id,
                quantity: dec(1),
                serialized_unit_ids: vec![unit.id],
            }],
        )
        .await
        .expect("assignment");
    Fixture {
        material_id: material.id,
        technician,
        unit_id: unit.id,
    }
}

#[tokio::test]
async fn consumption_binds_units_and_decrements_carry_stock() {
    let harness = setup().await;
    let fx = technician_with_unit(&harness, "MED-CONS").await;
    let installation = Uuid::new_v4();

    let row = harness
        .core
        .installations
        .consume_for_installation(
            ConsumeInput {
                installation_id: installation,
                technician_id: fx.technician,
                material_id: fx.material_id,
                quantity: dec(1),
                serialized_unit_ids: vec![fx.unit_id],
                notes: None,
            },
            actor(),
        )
        .await
        .expect("consume");
    assert_eq!(row.approval_status, "pending");

    let carry = harness
        .core
        .materials
        .get_balance(fx.material_id, Holder::Technician(fx.technician))
        .await
        .unwrap();
    assert_eq!(carry, dec(0));

    let unit = harness
        .core
        .serialized_units
        .get_unit(fx.unit_id)
        .await
        .unwrap();
    assert_eq!(unit.state, "at_installation");
    assert_eq!(unit.holder_type.as_deref(), Some("installation_material"));
    assert_eq!(unit.holder_id, Some(row.id));
    assert_eq!(unit.installation_id, Some(installation));
    assert_aggregate_invariant(&harness, fx.material_id).await;
}

#[tokio::test]
async fn approved_consumption_allows_mark_installed() {
    let harness = setup().await;
    let fx = technician_with_unit(&harness, "MED-APPR").await;
    let installation = Uuid::new_v4();

    let row = harness
        .core
        .installations
        .consume_for_installation(
            ConsumeInput {
                installation_id: installation,
                technician_id: fx.technician,
                material_id: fx.material_id,
                quantity: dec(1),
                serialized_unit_ids: vec![fx.unit_id],
                notes: None,
            },
            actor(),
        )
        .await
        .unwrap();

    // Pending consumption blocks finalization.
    let err = harness
        .core
        .serialized_units
        .mark_installed(installation, actor())
        .await
        .expect_err("pending review");
    assert_matches!(err, InventoryError::Conflict(_));

    harness
        .core
        .installations
        .review_consumption(row.id, ApprovalStatus::Approved, actor())
        .await
        .expect("approve");

    let installed = harness
        .core
        .serialized_units
        .mark_installed(installation, actor())
        .await
        .expect("mark installed");
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].state, "installed");

    // Installed is terminal: no release path out of it.
    let err = harness
        .core
        .serialized_units
        .release_from_installation(vec![fx.unit_id], actor())
        .await
        .expect_err("terminal state");
    assert_matches!(err, InventoryError::Conflict(_));
}

#[tokio::test]
async fn rejected_consumption_returns_stock_and_units_to_technician() {
    let harness = setup().await;
    let fx = technician_with_unit(&harness, "MED-RECH").await;
    let installation = Uuid::new_v4();

    let row = harness
        .core
        .installations
        .consume_for_installation(
            ConsumeInput {
                installation_id: installation,
                technician_id: fx.technician,
                material_id: fx.material_id,
                quantity: dec(1),
                serialized_unit_ids: vec![fx.unit_id],
                notes: None,
            },
            actor(),
        )
        .await
        .unwrap();

    let reviewed = harness
        .core
        .installations
        .review_consumption(row.id, ApprovalStatus::Rejected, actor())
        .await
        .expect("reject");
    assert_eq!(reviewed.approval_status, "rejected");

    let carry = harness
        .core
        .materials
        .get_balance(fx.material_id, Holder::Technician(fx.technician))
        .await
        .unwrap();
    assert_eq!(carry, dec(1));

    let unit = harness
        .core
        .serialized_units
        .get_unit(fx.unit_id)
        .await
        .unwrap();
    assert_eq!(unit.state, "with_technician");
    assert_eq!(unit.technician_id, Some(fx.technician));
    assert_eq!(unit.installation_id, None);
    assert_aggregate_invariant(&harness, fx.material_id).await;

    // A reviewed consumption cannot be reviewed again.
    let err = harness
        .core
        .installations
        .review_consumption(row.id, ApprovalStatus::Approved, actor())
        .await
        .expect_err("already reviewed");
    assert_matches!(err, InventoryError::Conflict(_));
}

// Annulment policy: units left AtInstallation cascade back to WithTechnician
// and pending quantities return to the carry stock.
#[tokio::test]
async fn annulment_releases_dangling_units() {
    let harness = setup().await;
    let fx = technician_with_unit(&harness, "MED-ANUL").await;
    let installation = Uuid::new_v4();

    harness
        .core
        .installations
        .consume_for_installation(
            ConsumeInput {
                installation_id: installation,
                technician_id: fx.technician,
                material_id: fx.material_id,
                quantity: dec(1),
                serialized_unit_ids: vec![fx.unit_id],
                notes: None,
            },
            actor(),
        )
        .await
        .unwrap();

    let released = harness
        .core
        .installations
        .annul_installation(installation, actor())
        .await
        .expect("annul");
    assert_eq!(released, 1);

    let unit = harness
        .core
        .serialized_units
        .get_unit(fx.unit_id)
        .await
        .unwrap();
    assert_eq!(unit.state, "with_technician");
    assert_eq!(unit.technician_id, Some(fx.technician));

    let carry = harness
        .core
        .materials
        .get_balance(fx.material_id, Holder::Technician(fx.technician))
        .await
        .unwrap();
    assert_eq!(carry, dec(1));

    let rows = harness
        .core
        .installations
        .find_by_installation(installation)
        .await
        .unwrap();
    assert!(rows.iter().all(|r| r.approval_status == "rejected"));
    assert_aggregate_invariant(&harness, fx.material_id).await;
}

// Finalizing an installation nothing was consumed for is an error, not a
// silent no-op.
#[tokio::test]
async fn mark_installed_with_no_units_is_not_found() {
    let harness = setup().await;
    let err = harness
        .core
        .serialized_units
        .mark_installed(Uuid::new_v4(), actor())
        .await
        .expect_err("unknown installation");
    assert_matches!(err, InventoryError::NotFound(_));
}

#[tokio::test]
async fn serialized_quantity_must_match_unit_count() {
    let harness = setup().await;
    let fx = technician_with_unit(&harness, "MED-QTY").await;

    let err = harness
        .core
        .installations
        .consume_for_installation(
            ConsumeInput {
                installation_id: Uuid::new_v4(),
                technician_id: fx.technician,
                material_id: fx.material_id,
                quantity: dec(2),
                serialized_unit_ids: vec![fx.unit_id],
                notes: None,
            },
            actor(),
        )
        .await
        .expect_err("quantity mismatch");
    assert_matches!(err, InventoryError::ValidationError(_));
}
