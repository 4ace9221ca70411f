//! Business logic of the inventory core. Each service owns one component of
//! the ledger; every mutating call runs as a single database transaction
//! together with its audit entries.

pub mod assignments;
pub mod audit;
pub mod installations;
pub mod materials;
pub mod movements;
pub mod serialized_units;
pub mod stock_ledger;

pub use assignments::AssignmentService;
pub use audit::AuditService;
pub use installations::InstallationService;
pub use materials::MaterialService;
pub use movements::MovementService;
pub use serialized_units::SerializedUnitService;
