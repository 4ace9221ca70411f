mod common;

use assert_matches::assert_matches;
use almacen_core::errors::InventoryError;
use common::{actor, create_material, setup};
use uuid::Uuid;

// Scenario C: MED-001 Available in a warehouse; assigning it to technician 7
// with carry 42 sets WithTechnician and the carry holder; a second assign
// before release is a Conflict.
#[tokio::test]
async fn unit_assignment_follows_holder_state_machine() {
    let harness = setup().await;
    let material = create_material(&harness, "MEDIDOR-MONO", true).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();
    let carry = Uuid::new_v4();

    let unit = harness
        .core
        .serialized_units
        .register_unit("MED-001", material.id, warehouse, actor())
        .await
        .expect("register");
    assert_eq!(unit.state, "available");
    assert_eq!(unit.holder_type.as_deref(), Some("warehouse"));
    assert_eq!(unit.holder_id, Some(warehouse));

    let updated = harness
        .core
        .serialized_units
        .assign_to_technician(vec![unit.id], technician, carry, actor())
        .await
        .expect("assign");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].state, "with_technician");
    assert_eq!(updated[0].holder_type.as_deref(), Some("technician_carry"));
    assert_eq!(updated[0].holder_id, Some(carry));
    assert_eq!(updated[0].technician_id, Some(technician));

    let err = harness
        .core
        .serialized_units
        .assign_to_technician(vec![unit.id], technician, carry, actor())
        .await
        .expect_err("double assign");
    assert_matches!(err, InventoryError::Conflict(msg) => {
        assert!(msg.contains("MED-001"));
    });
}

// Round-trip: assign then release restores Available with the warehouse
// passed to release, or no holder when none is given.
#[tokio::test]
async fn release_round_trip_restores_available() {
    let harness = setup().await;
    let material = create_material(&harness, "MEDIDOR-TRIF", true).await;
    let warehouse = Uuid::new_v4();
    let return_warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();

    let unit_a = harness
        .core
        .serialized_units
        .register_unit("MED-100", material.id, warehouse, actor())
        .await
        .unwrap();
    let unit_b = harness
        .core
        .serialized_units
        .register_unit("MED-101", material.id, warehouse, actor())
        .await
        .unwrap();

    harness
        .core
        .serialized_units
        .assign_to_technician(vec![unit_a.id, unit_b.id], technician, Uuid::new_v4(), actor())
        .await
        .unwrap();

    let released = harness
        .core
        .serialized_units
        .release_from_technician(vec![unit_a.id], Some(return_warehouse), actor())
        .await
        .expect("release with warehouse");
    assert_eq!(released[0].state, "available");
    assert_eq!(released[0].holder_id, Some(return_warehouse));
    assert_eq!(released[0].technician_id, None);

    let released = harness
        .core
        .serialized_units
        .release_from_technician(vec![unit_b.id], None, actor())
        .await
        .expect("release without warehouse");
    assert_eq!(released[0].state, "available");
    assert_eq!(released[0].holder_type, None);
    assert_eq!(released[0].holder_id, None);
}

// Bulk transitions are all-or-nothing: a mixed batch is rejected without
// transitioning the valid units.
#[tokio::test]
async fn mixed_batch_is_rejected_atomically() {
    let harness = setup().await;
    let material = create_material(&harness, "MEDIDOR-PREP", true).await;
    let warehouse = Uuid::new_v4();
    let technician = Uuid::new_v4();

    let available = harness
        .core
        .serialized_units
        .register_unit("MED-200", material.id, warehouse, actor())
        .await
        .unwrap();
    let carried = harness
        .core
        .serialized_units
        .register_unit("MED-201", material.id, warehouse, actor())
        .await
        .unwrap();
    harness
        .core
        .serialized_units
        .assign_to_technician(vec![carried.id], technician, Uuid::new_v4(), actor())
        .await
        .unwrap();

    let err = harness
        .core
        .serialized_units
        .assign_to_technician(
            vec![available.id, carried.id],
            technician,
            Uuid::new_v4(),
            actor(),
        )
        .await
        .expect_err("mixed batch");
    assert_matches!(err, InventoryError::Integrity(msg) => {
        assert!(msg.contains("MED-201"));
    });

    // The valid unit stayed Available.
    let unit = harness
        .core
        .serialized_units
        .get_unit(available.id)
        .await
        .unwrap();
    assert_eq!(unit.state, "available");
}

#[tokio::test]
async fn duplicate_serial_is_conflict() {
    let harness = setup().await;
    let material = create_material(&harness, "MEDIDOR-DUP", true).await;
    let warehouse = Uuid::new_v4();

    harness
        .core
        .serialized_units
        .register_unit("MED-300", material.id, warehouse, actor())
        .await
        .unwrap();
    let err = harness
        .core
        .serialized_units
        .register_unit("MED-300", material.id, warehouse, actor())
        .await
        .expect_err("duplicate serial");
    assert_matches!(err, InventoryError::Conflict(_));
}

#[tokio::test]
async fn registering_unit_of_fungible_material_is_rejected() {
    let harness = setup().await;
    let material = create_material(&harness, "CABLE-SUELTO", false).await;
    let err = harness
        .core
        .serialized_units
        .register_unit("MED-400", material.id, Uuid::new_v4(), actor())
        .await
        .expect_err("not serialized");
    assert_matches!(err, InventoryError::ValidationError(_));
}

#[tokio::test]
async fn unknown_unit_in_batch_is_not_found() {
    let harness = setup().await;
    let material = create_material(&harness, "MEDIDOR-GHOST", true).await;
    let warehouse = Uuid::new_v4();
    let unit = harness
        .core
        .serialized_units
        .register_unit("MED-500", material.id, warehouse, actor())
        .await
        .unwrap();

    let err = harness
        .core
        .serialized_units
        .assign_to_technician(
            vec![unit.id, Uuid::new_v4()],
            Uuid::new_v4(),
            Uuid::new_v4(),
            actor(),
        )
        .await
        .expect_err("ghost id");
    assert_matches!(err, InventoryError::NotFound(_));
}
