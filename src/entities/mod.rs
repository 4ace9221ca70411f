pub mod assignment;
pub mod assignment_line;
pub mod audit_entry;
pub mod installation_material;
pub mod material;
pub mod serialized_unit;
pub mod stock_movement;
pub mod technician_balance;
pub mod warehouse_balance;
