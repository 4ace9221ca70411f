mod common;

use assert_matches::assert_matches;
use almacen_core::{
    errors::InventoryError,
    services::assignments::AssignmentLineInput,
    services::stock_ledger::Holder,
};
use common::{actor, assert_aggregate_invariant, create_material, dec, seed_warehouse_stock, setup};
use uuid::Uuid;

// Scenario B: assigning 5 units from a warehouse holding 6 leaves the
// warehouse at 1 and the technician carrying 5.
#[tokio::test]
async fn assignment_moves_stock_to_technician() {
    let harness = setup().await;
    let material = create_material(&harness, "CABLE-COAXIAL", false).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    seed_warehouse_stock(&harness, material.id, warehouse, dec(6)).await;

    let (header, lines) = harness
        .core
        .assignments
        .create_assignment(
            warehouse,
            technician,
            actor(),
            vec![AssignmentLineInput {
                material_id: material.id,
                quantity: dec(5),
                serialized_unit_ids: Vec::new(),
            }],
        )
        .await
        .expect("assignment");

    assert_eq!(header.status, "approved");
    assert_eq!(lines.len(), 1);

    let warehouse_stock = harness
        .core
        .materials
        .get_balance(material.id, Holder::Warehouse(warehouse))
        .await
        .unwrap();
    let technician_stock = harness
        .core
        .materials
        .get_balance(material.id, Holder::Technician(technician))
        .await
        .unwrap();
    assert_eq!(warehouse_stock, dec(1));
    assert_eq!(technician_stock, dec(5));
    assert_aggregate_invariant(&harness, material.id).await;

    // Each line leaves a linked salida movement behind.
    let movements = harness
        .core
        .movements
        .find_by_material(material.id)
        .await
        .unwrap();
    assert!(movements
        .iter()
        .any(|m| m.assignment_id == Some(header.id) && m.movement_type == "salida"));
}

// A multi-line assignment is all-or-nothing: one short line aborts the batch.
#[tokio::test]
async fn assignment_with_short_line_rolls_back_entirely() {
    let harness = setup().await;
    let abundant = create_material(&harness, "TORNILLO-6MM", false).await;
    let scarce = create_material(&harness, "ROUTER-AC", false).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    seed_warehouse_stock(&harness, abundant.id, warehouse, dec(100)).await;
    seed_warehouse_stock(&harness, scarce.id, warehouse, dec(1)).await;

    let err = harness
        .core
        .assignments
        .create_assignment(
            warehouse,
            technician,
            actor(),
            vec![
                AssignmentLineInput {
                    material_id: abundant.id,
                    quantity: dec(10),
                    serialized_unit_ids: Vec::new(),
                },
                AssignmentLineInput {
                    material_id: scarce.id,
                    quantity: dec(2),
                    serialized_unit_ids: Vec::new(),
                },
            ],
        )
        .await
        .expect_err("short line");
    assert_matches!(err, InventoryError::InsufficientStock { .. });

    // Nothing moved, including the line that had stock.
    let abundant_stock = harness
        .core
        .materials
        .get_balance(abundant.id, Holder::Warehouse(warehouse))
        .await
        .unwrap();
    assert_eq!(abundant_stock, dec(100));
    let technician_stock = harness
        .core
        .materials
        .get_balance(abundant.id, Holder::Technician(technician))
        .await
        .unwrap();
    assert_eq!(technician_stock, dec(0));
}

// Reversal applies the exact negated deltas, never a blind re-zero.
#[tokio::test]
async fn reversal_restores_original_balances() {
    let harness = setup().await;
    let material = create_material(&harness, "SPLITTER-2V", false).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    seed_warehouse_stock(&harness, material.id, warehouse, dec(9)).await;

    // The technician already carries 2 from elsewhere; a reversal must not
    // wipe that out.
    let other_warehouse = Uuid::new_v4();
    seed_warehouse_stock(&harness, material.id, other_warehouse, dec(2)).await;
    harness
        .core
        .assignments
        .create_assignment(
            other_warehouse,
            technician,
            actor(),
            vec![AssignmentLineInput {
                material_id: material.id,
                quantity: dec(2),
                serialized_unit_ids: Vec::new(),
            }],
        )
        .await
        .expect("pre-existing carry stock");

    let (header, _) = harness
        .core
        .assignments
        .create_assignment(
            warehouse,
            technician,
            actor(),
            vec![AssignmentLineInput {
                material_id: material.id,
                quantity: dec(4),
                serialized_unit_ids: Vec::new(),
            }],
        )
        .await
        .expect("assignment");

    let reversed = harness
        .core
        .assignments
        .reverse_assignment(header.id, actor())
        .await
        .expect("reversal");
    assert_eq!(reversed.status, "rejected");
    assert!(reversed.reversed_at.is_some());

    let warehouse_stock = harness
        .core
        .materials
        .get_balance(material.id, Holder::Warehouse(warehouse))
        .await
        .unwrap();
    let technician_stock = harness
        .core
        .materials
        .get_balance(material.id, Holder::Technician(technician))
        .await
        .unwrap();
    assert_eq!(warehouse_stock, dec(9));
    assert_eq!(technician_stock, dec(2));
    assert_aggregate_invariant(&harness, material.id).await;

    // Reversing twice is a conflict.
    let err = harness
        .core
        .assignments
        .reverse_assignment(header.id, actor())
        .await
        .expect_err("double reversal");
    assert_matches!(err, InventoryError::Conflict(_));
}

#[tokio::test]
async fn empty_and_duplicate_lines_are_rejected() {
    let harness = setup().await;
    let material = create_material(&harness, "CINTA-AISLANTE", false).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    seed_warehouse_stock(&harness, material.id, warehouse, dec(10)).await;

    let err = harness
        .core
        .assignments
        .create_assignment(warehouse, technician, actor(), Vec::new())
        .await
        .expect_err("empty batch");
    assert_matches!(err, InventoryError::ValidationError(_));

    let err = harness
        .core
        .assignments
        .create_assignment(
            warehouse,
            technician,
            actor(),
            vec![
                AssignmentLineInput {
                    material_id: material.id,
                    quantity: dec(1),
                    serialized_unit_ids: Vec::new(),
                },
                AssignmentLineInput {
                    material_id: material.id,
                    quantity: dec(2),
                    serialized_unit_ids: Vec::new(),
                },
            ],
        )
        .await
        .expect_err("duplicate material lines");
    assert_matches!(err, InventoryError::ValidationError(_));
}
