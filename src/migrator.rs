use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240901_000001_create_stock_batches_table::Migration),
            Box::new(m20240901_000002_create_bills_tables::Migration),
            Box::new(m20240901_000003_create_return_lines_table::Migration),
            Box::new(m20240901_000004_create_transports_tables::Migration),
            Box::new(m20240901_000005_create_payments_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20240901_000001_create_stock_batches_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240901_000001_create_stock_batches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockBatches::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockBatches::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockBatches::Barcode).string().not_null())
                        .col(ColumnDef::new(StockBatches::Branch).string().not_null())
                        .col(ColumnDef::new(StockBatches::NetPrice).decimal().not_null())
                        .col(ColumnDef::new(StockBatches::OutPrice).decimal().not_null())
                        .col(ColumnDef::new(StockBatches::Quantity).integer().not_null())
                        .col(ColumnDef::new(StockBatches::ExpireDate).date().null())
                        .col(
                            ColumnDef::new(StockBatches::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockBatches::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            // Lookup path used on every allocation and stock screen
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_batches_barcode_branch")
                        .table(StockBatches::Table)
                        .col(StockBatches::Barcode)
                        .col(StockBatches::Branch)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_batches_identity")
                        .table(StockBatches::Table)
                        .col(StockBatches::Barcode)
                        .col(StockBatches::Branch)
                        .col(StockBatches::NetPrice)
                        .col(StockBatches::OutPrice)
                        .col(StockBatches::ExpireDate)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockBatches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockBatches {
        Table,
        Id,
        Barcode,
        Branch,
        NetPrice,
        OutPrice,
        Quantity,
        ExpireDate,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240901_000002_create_bills_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240901_000002_create_bills_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Bills::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Bills::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Bills::BillNumber)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Bills::Kind).string().not_null())
                        .col(ColumnDef::new(Bills::CounterpartyId).uuid().not_null())
                        .col(ColumnDef::new(Bills::Branch).string().not_null())
                        .col(ColumnDef::new(Bills::BillDate).date().not_null())
                        .col(ColumnDef::new(Bills::PaymentStatus).string().null())
                        .col(
                            ColumnDef::new(Bills::IsConsignment)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Bills::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Bills::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Bills::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bills_counterparty_kind")
                        .table(Bills::Table)
                        .col(Bills::CounterpartyId)
                        .col(Bills::Kind)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BillItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BillItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BillItems::BillId).uuid().not_null())
                        .col(ColumnDef::new(BillItems::Barcode).string().not_null())
                        .col(ColumnDef::new(BillItems::Name).string().not_null())
                        .col(ColumnDef::new(BillItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(BillItems::NetPrice).decimal().not_null())
                        .col(ColumnDef::new(BillItems::OutPrice).decimal().not_null())
                        .col(ColumnDef::new(BillItems::ExpireDate).date().null())
                        .col(ColumnDef::new(BillItems::CreatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bill_items_bill_id")
                                .from(BillItems::Table, BillItems::BillId)
                                .to(Bills::Table, Bills::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bill_items_bill_id")
                        .table(BillItems::Table)
                        .col(BillItems::BillId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BatchAllocations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BatchAllocations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchAllocations::BillId).uuid().not_null())
                        .col(
                            ColumnDef::new(BatchAllocations::Barcode)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchAllocations::Branch).string().not_null())
                        .col(
                            ColumnDef::new(BatchAllocations::NetPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchAllocations::OutPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BatchAllocations::ExpireDate).date().null())
                        .col(
                            ColumnDef::new(BatchAllocations::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BatchAllocations::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_batch_allocations_bill_id")
                                .from(BatchAllocations::Table, BatchAllocations::BillId)
                                .to(Bills::Table, Bills::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_batch_allocations_bill_id")
                        .table(BatchAllocations::Table)
                        .col(BatchAllocations::BillId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BatchAllocations::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(BillItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Bills::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Bills {
        Table,
        Id,
        BillNumber,
        Kind,
        CounterpartyId,
        Branch,
        BillDate,
        PaymentStatus,
        IsConsignment,
        TotalAmount,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BillItems {
        Table,
        Id,
        BillId,
        Barcode,
        Name,
        Quantity,
        NetPrice,
        OutPrice,
        ExpireDate,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum BatchAllocations {
        Table,
        Id,
        BillId,
        Barcode,
        Branch,
        NetPrice,
        OutPrice,
        ExpireDate,
        Quantity,
        CreatedAt,
    }
}

mod m20240901_000003_create_return_lines_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240901_000003_create_return_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ReturnLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ReturnLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnLines::CounterpartyId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnLines::OriginBillNumber)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ReturnLines::Barcode).string().not_null())
                        .col(ColumnDef::new(ReturnLines::Name).string().not_null())
                        .col(ColumnDef::new(ReturnLines::Branch).string().not_null())
                        .col(ColumnDef::new(ReturnLines::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(ReturnLines::ReturnPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnLines::TotalAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ReturnLines::IsConsignment)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(ReturnLines::PaymentStatus).string().null())
                        .col(
                            ColumnDef::new(ReturnLines::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Remaining-returnable checks aggregate by (bill, barcode)
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_lines_origin_bill")
                        .table(ReturnLines::Table)
                        .col(ReturnLines::OriginBillNumber)
                        .col(ReturnLines::Barcode)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_return_lines_counterparty")
                        .table(ReturnLines::Table)
                        .col(ReturnLines::CounterpartyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ReturnLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ReturnLines {
        Table,
        Id,
        CounterpartyId,
        OriginBillNumber,
        Barcode,
        Name,
        Branch,
        Quantity,
        ReturnPrice,
        TotalAmount,
        IsConsignment,
        PaymentStatus,
        CreatedAt,
    }
}

mod m20240901_000004_create_transports_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240901_000004_create_transports_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Transports::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Transports::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Transports::FromBranch).string().not_null())
                        .col(ColumnDef::new(Transports::ToBranch).string().not_null())
                        .col(
                            ColumnDef::new(Transports::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Transports::SenderId).uuid().not_null())
                        .col(ColumnDef::new(Transports::SentAt).timestamp().not_null())
                        .col(ColumnDef::new(Transports::ReceiverId).uuid().null())
                        .col(ColumnDef::new(Transports::ReceivedAt).timestamp().null())
                        .col(ColumnDef::new(Transports::Notes).string().null())
                        .col(ColumnDef::new(Transports::ReceiverNotes).string().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transports_status")
                        .table(Transports::Table)
                        .col(Transports::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(TransportItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransportItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransportItems::TransportId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransportItems::Barcode).string().not_null())
                        .col(
                            ColumnDef::new(TransportItems::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransportItems::NetPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransportItems::OutPrice)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransportItems::ExpireDate).date().null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_transport_items_transport_id")
                                .from(TransportItems::Table, TransportItems::TransportId)
                                .to(Transports::Table, Transports::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_transport_items_transport_id")
                        .table(TransportItems::Table)
                        .col(TransportItems::TransportId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TransportItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Transports::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Transports {
        Table,
        Id,
        FromBranch,
        ToBranch,
        Status,
        SenderId,
        SentAt,
        ReceiverId,
        ReceivedAt,
        Notes,
        ReceiverNotes,
    }

    #[derive(DeriveIden)]
    enum TransportItems {
        Table,
        Id,
        TransportId,
        Barcode,
        Quantity,
        NetPrice,
        OutPrice,
        ExpireDate,
    }
}

mod m20240901_000005_create_payments_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240901_000005_create_payments_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::PaymentNumber)
                                .big_integer()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::CounterpartyId).uuid().not_null())
                        .col(
                            ColumnDef::new(Payments::SoldTotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Payments::ReturnTotal)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Payments::NetAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Payments::PaymentDate).date().not_null())
                        .col(
                            ColumnDef::new(Payments::HardcopyBillNumber)
                                .string()
                                .null(),
                        )
                        .col(ColumnDef::new(Payments::CreatedBy).uuid().not_null())
                        .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Payments::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_counterparty")
                        .table(Payments::Table)
                        .col(Payments::CounterpartyId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PaymentClaims::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentClaims::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentClaims::PaymentId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentClaims::RecordType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentClaims::RecordId).uuid().not_null())
                        .col(
                            ColumnDef::new(PaymentClaims::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payment_claims_payment_id")
                                .from(PaymentClaims::Table, PaymentClaims::PaymentId)
                                .to(Payments::Table, Payments::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // A record can be held by at most one payment
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_claims_record")
                        .table(PaymentClaims::Table)
                        .col(PaymentClaims::RecordType)
                        .col(PaymentClaims::RecordId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentClaims::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        PaymentNumber,
        CounterpartyId,
        SoldTotal,
        ReturnTotal,
        NetAmount,
        PaymentDate,
        HardcopyBillNumber,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PaymentClaims {
        Table,
        Id,
        PaymentId,
        RecordType,
        RecordId,
        CreatedAt,
    }
}
