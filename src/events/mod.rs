use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted after a ledger transaction commits.
///
/// Delivery (notifications, chat, webhooks) is a collaborator concern; the
/// core only publishes onto the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MovementRecorded {
        movement_id: Uuid,
        movement_type: String,
        material_id: Uuid,
        quantity: Decimal,
        code: String,
    },
    BalanceAdjusted {
        material_id: Uuid,
        holder: String,
        before: Decimal,
        after: Decimal,
    },
    MaterialsAssigned {
        assignment_id: Uuid,
        warehouse_id: Uuid,
        technician_id: Uuid,
        line_count: usize,
    },
    AssignmentReversed {
        assignment_id: Uuid,
        technician_id: Uuid,
    },
    UnitsAssignedToTechnician {
        technician_id: Uuid,
        carry_id: Uuid,
        unit_ids: Vec<Uuid>,
    },
    UnitsReleasedToWarehouse {
        warehouse_id: Option<Uuid>,
        unit_ids: Vec<Uuid>,
    },
    UnitsAtInstallation {
        installation_id: Uuid,
        unit_ids: Vec<Uuid>,
    },
    UnitsReleasedFromInstallation {
        unit_ids: Vec<Uuid>,
    },
    UnitsInstalled {
        installation_id: Uuid,
        unit_count: usize,
    },
    ConsumptionRecorded {
        installation_material_id: Uuid,
        installation_id: Uuid,
        material_id: Uuid,
        quantity: Decimal,
    },
    ConsumptionReviewed {
        installation_material_id: Uuid,
        outcome: String,
    },
    InstallationAnnulled {
        installation_id: Uuid,
        released_units: usize,
    },
}

/// Thin clonable wrapper over the outbound event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel pair.
pub fn event_channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event for downstream collaborators.
/// The notification service subscribes here in the full deployment.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::MovementRecorded {
                movement_id,
                movement_type,
                material_id,
                quantity,
                code,
            } => {
                info!(
                    movement_id = %movement_id,
                    movement_type = %movement_type,
                    material_id = %material_id,
                    quantity = %quantity,
                    code = %code,
                    "Movement recorded"
                );
            }
            Event::MaterialsAssigned {
                assignment_id,
                warehouse_id,
                technician_id,
                line_count,
            } => {
                info!(
                    assignment_id = %assignment_id,
                    warehouse_id = %warehouse_id,
                    technician_id = %technician_id,
                    line_count = %line_count,
                    "Materials assigned to technician"
                );
            }
            Event::InstallationAnnulled {
                installation_id,
                released_units,
            } => {
                warn!(
                    installation_id = %installation_id,
                    released_units = %released_units,
                    "Installation annulled, units released back to technician"
                );
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
