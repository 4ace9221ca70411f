//! Almacen Core
//!
//! Inventory ledger and serialized-unit lifecycle for an installation-services
//! backend. Tracks fungible stock per warehouse and per technician, records
//! every stock-changing event as an auditable movement, and drives uniquely
//! numbered units through a strict holder-state machine.
//!
//! The crate exposes a synchronous service surface over a relational store;
//! HTTP routing, authentication and notification delivery are collaborator
//! concerns. Every call receives an already-authenticated actor id.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use db::DbPool;
use events::EventSender;
use services::{
    AssignmentService, AuditService, InstallationService, MaterialService, MovementService,
    SerializedUnitService,
};

/// Bundle of the core's services over one shared pool and event channel.
/// Collaborating layers (HTTP, gRPC, jobs) hold one of these.
#[derive(Clone)]
pub struct InventoryCore {
    pub db: Arc<DbPool>,
    pub event_sender: EventSender,
    pub materials: MaterialService,
    pub movements: MovementService,
    pub assignments: AssignmentService,
    pub serialized_units: SerializedUnitService,
    pub installations: InstallationService,
    pub audit: AuditService,
}

impl InventoryCore {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            materials: MaterialService::new(db.clone()),
            movements: MovementService::new(db.clone(), event_sender.clone()),
            assignments: AssignmentService::new(db.clone(), event_sender.clone()),
            serialized_units: SerializedUnitService::new(db.clone(), event_sender.clone()),
            installations: InstallationService::new(db.clone(), event_sender.clone()),
            audit: AuditService::new(db.clone()),
            db,
            event_sender,
        }
    }
}

/// Common query parameters for paginated list reads.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// Wrapper for paginated list responses.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, query: &ListQuery) -> Self {
        Self {
            items,
            total,
            page: query.page,
            limit: query.limit,
        }
    }
}
