//! Embedded schema migrations. The core assumes a fixed, already-migrated
//! schema at runtime; deployment applies these once at startup and tests run
//! them against sqlite::memory:.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_materials_table::Migration),
            Box::new(m20240301_000002_create_balance_tables::Migration),
            Box::new(m20240301_000003_create_stock_movements_table::Migration),
            Box::new(m20240301_000004_create_assignment_tables::Migration),
            Box::new(m20240301_000005_create_serialized_units_table::Migration),
            Box::new(m20240301_000006_create_installation_materials_table::Migration),
            Box::new(m20240301_000007_create_audit_entries_table::Migration),
        ]
    }
}

mod m20240301_000001_create_materials_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_materials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Materials::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Materials::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Materials::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Materials::Name).string().not_null())
                        .col(ColumnDef::new(Materials::UnitOfMeasure).string().not_null())
                        .col(ColumnDef::new(Materials::IsSerialized).boolean().not_null())
                        .col(
                            ColumnDef::new(Materials::AggregateStock)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Materials::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Materials::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Materials::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Materials {
        Table,
        Id,
        Code,
        Name,
        UnitOfMeasure,
        IsSerialized,
        AggregateStock,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_balance_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_balance_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WarehouseBalances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WarehouseBalances::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WarehouseBalances::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(WarehouseBalances::WarehouseId).uuid().not_null())
                        .col(
                            ColumnDef::new(WarehouseBalances::Stock)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WarehouseBalances::AverageCost)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WarehouseBalances::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(WarehouseBalances::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ux_warehouse_balances_material_warehouse")
                        .table(WarehouseBalances::Table)
                        .col(WarehouseBalances::MaterialId)
                        .col(WarehouseBalances::WarehouseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TechnicianBalances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TechnicianBalances::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TechnicianBalances::TechnicianId).uuid().not_null())
                        .col(ColumnDef::new(TechnicianBalances::MaterialId).uuid().not_null())
                        .col(
                            ColumnDef::new(TechnicianBalances::Stock)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TechnicianBalances::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(TechnicianBalances::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ux_technician_balances_technician_material")
                        .table(TechnicianBalances::Table)
                        .col(TechnicianBalances::TechnicianId)
                        .col(TechnicianBalances::MaterialId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TechnicianBalances::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(WarehouseBalances::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum WarehouseBalances {
        Table,
        Id,
        MaterialId,
        WarehouseId,
        Stock,
        AverageCost,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(Iden)]
    enum TechnicianBalances {
        Table,
        Id,
        TechnicianId,
        MaterialId,
        Stock,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_stock_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(StockMovements::MovementType).string().not_null())
                        .col(ColumnDef::new(StockMovements::MaterialId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::UnitCost).decimal())
                        .col(ColumnDef::new(StockMovements::OriginHolderType).string())
                        .col(ColumnDef::new(StockMovements::OriginHolderId).uuid())
                        .col(ColumnDef::new(StockMovements::DestinationHolderType).string())
                        .col(ColumnDef::new(StockMovements::DestinationHolderId).uuid())
                        .col(ColumnDef::new(StockMovements::AssignmentId).uuid())
                        .col(ColumnDef::new(StockMovements::InstallationId).uuid())
                        .col(ColumnDef::new(StockMovements::SerializedUnitIds).json())
                        .col(
                            ColumnDef::new(StockMovements::IdempotencyKey)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(StockMovements::Notes).string())
                        .col(ColumnDef::new(StockMovements::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_stock_movements_material")
                        .table(StockMovements::Table)
                        .col(StockMovements::MaterialId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum StockMovements {
        Table,
        Id,
        Code,
        MovementType,
        MaterialId,
        Quantity,
        UnitCost,
        OriginHolderType,
        OriginHolderId,
        DestinationHolderType,
        DestinationHolderId,
        AssignmentId,
        InstallationId,
        SerializedUnitIds,
        IdempotencyKey,
        Notes,
        CreatedBy,
        CreatedAt,
    }
}

mod m20240301_000004_create_assignment_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_assignment_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Assignments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Assignments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Assignments::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(Assignments::TechnicianId).uuid().not_null())
                        .col(ColumnDef::new(Assignments::Status).string().not_null())
                        .col(ColumnDef::new(Assignments::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(Assignments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Assignments::UpdatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Assignments::ReversedAt).timestamp())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_assignments_technician")
                        .table(Assignments::Table)
                        .col(Assignments::TechnicianId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(AssignmentLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AssignmentLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(AssignmentLines::AssignmentId).uuid().not_null())
                        .col(ColumnDef::new(AssignmentLines::MaterialId).uuid().not_null())
                        .col(
                            ColumnDef::new(AssignmentLines::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_assignment_lines_assignment")
                        .table(AssignmentLines::Table)
                        .col(AssignmentLines::AssignmentId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AssignmentLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Assignments::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum Assignments {
        Table,
        Id,
        WarehouseId,
        TechnicianId,
        Status,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
        ReversedAt,
    }

    #[derive(Iden)]
    enum AssignmentLines {
        Table,
        Id,
        AssignmentId,
        MaterialId,
        Quantity,
    }
}

mod m20240301_000005_create_serialized_units_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_serialized_units_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SerializedUnits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SerializedUnits::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SerializedUnits::SerialNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(SerializedUnits::MaterialId).uuid().not_null())
                        .col(ColumnDef::new(SerializedUnits::State).string().not_null())
                        .col(ColumnDef::new(SerializedUnits::HolderType).string())
                        .col(ColumnDef::new(SerializedUnits::HolderId).uuid())
                        .col(ColumnDef::new(SerializedUnits::TechnicianId).uuid())
                        .col(ColumnDef::new(SerializedUnits::InstallationId).uuid())
                        .col(ColumnDef::new(SerializedUnits::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(SerializedUnits::UpdatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_serialized_units_technician")
                        .table(SerializedUnits::Table)
                        .col(SerializedUnits::TechnicianId)
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_serialized_units_installation")
                        .table(SerializedUnits::Table)
                        .col(SerializedUnits::InstallationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SerializedUnits::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum SerializedUnits {
        Table,
        Id,
        SerialNumber,
        MaterialId,
        State,
        HolderType,
        HolderId,
        TechnicianId,
        InstallationId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_installation_materials_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_installation_materials_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InstallationMaterials::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InstallationMaterials::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstallationMaterials::InstallationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InstallationMaterials::MaterialId).uuid().not_null())
                        .col(
                            ColumnDef::new(InstallationMaterials::TechnicianId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstallationMaterials::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InstallationMaterials::SerializedUnitIds).json())
                        .col(
                            ColumnDef::new(InstallationMaterials::ApprovalStatus)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InstallationMaterials::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(InstallationMaterials::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InstallationMaterials::UpdatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_installation_materials_installation")
                        .table(InstallationMaterials::Table)
                        .col(InstallationMaterials::InstallationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InstallationMaterials::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum InstallationMaterials {
        Table,
        Id,
        InstallationId,
        MaterialId,
        TechnicianId,
        Quantity,
        SerializedUnitIds,
        ApprovalStatus,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000007_create_audit_entries_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_audit_entries_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuditEntries::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(AuditEntries::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(AuditEntries::EntityType).string().not_null())
                        .col(ColumnDef::new(AuditEntries::EntityId).uuid().not_null())
                        .col(ColumnDef::new(AuditEntries::Before).json())
                        .col(ColumnDef::new(AuditEntries::After).json())
                        .col(ColumnDef::new(AuditEntries::ActorId).uuid().not_null())
                        .col(ColumnDef::new(AuditEntries::MovementId).uuid())
                        .col(ColumnDef::new(AuditEntries::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .name("ix_audit_entries_entity")
                        .table(AuditEntries::Table)
                        .col(AuditEntries::EntityType)
                        .col(AuditEntries::EntityId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuditEntries::Table).to_owned())
                .await
        }
    }

    #[derive(Iden)]
    enum AuditEntries {
        Table,
        Id,
        EntityType,
        EntityId,
        Before,
        After,
        ActorId,
        MovementId,
        CreatedAt,
    }
}
