use futures::future::BoxFuture;

use crate::migrations::Migration;
use crate::schema::{
    ColumnDef, ColumnType, ConstraintDef, DefaultValue, IndexDef, ReferentialAction, References,
    SchemaAdapter, SchemaError, TableDef,
};

pub const MIGRATION: Migration = Migration {
    id: "003-create-parking-spaces-table",
    description: "Create parking_spaces for parking management, with assignment tracking to users and contracts",
    up,
    down,
    down_note: None,
};

fn user_ref() -> References {
    References::new("users", "id")
}

fn parking_spaces() -> TableDef {
    TableDef::new()
        .column(
            "id",
            ColumnDef::new(ColumnType::Uuid)
                .primary_key()
                .default(DefaultValue::Sql("gen_random_uuid()".to_string())),
        )
        .column(
            "building_id",
            ColumnDef::new(ColumnType::Uuid).not_null().references(
                References::new("buildings", "id")
                    .on_update(ReferentialAction::Cascade)
                    .on_delete(ReferentialAction::Restrict),
            ),
        )
        .column("space_number", ColumnDef::new(ColumnType::Varchar(50)).not_null())
        .column(
            "parking_type",
            ColumnDef::new(ColumnType::enumeration(&[
                "STANDARD",
                "RESERVED",
                "HANDICAP",
                "ELECTRIC_CHARGING",
            ]))
            .not_null()
            .default(DefaultValue::Value("STANDARD".to_string())),
        )
        .column(
            "is_available",
            ColumnDef::new(ColumnType::Boolean)
                .not_null()
                .default(DefaultValue::Bool(true)),
        )
        .column(
            "assigned_to_user_id",
            ColumnDef::new(ColumnType::Uuid).references(
                user_ref()
                    .on_update(ReferentialAction::Cascade)
                    .on_delete(ReferentialAction::SetNull),
            ),
        )
        .column(
            "assigned_to_contract_id",
            ColumnDef::new(ColumnType::Uuid).references(
                References::new("contracts", "id")
                    .on_update(ReferentialAction::Cascade)
                    .on_delete(ReferentialAction::SetNull),
            ),
        )
        .column("assigned_at", ColumnDef::new(ColumnType::Timestamp))
        .column("monthly_fee", ColumnDef::new(ColumnType::Decimal(10, 2)))
        .column(
            "currency",
            ColumnDef::new(ColumnType::Varchar(3))
                .not_null()
                .default(DefaultValue::Value("USD".to_string())),
        )
        .column("notes", ColumnDef::new(ColumnType::Text))
        .column(
            "created_at",
            ColumnDef::new(ColumnType::Timestamp)
                .not_null()
                .default(DefaultValue::Sql("NOW()".to_string())),
        )
        .column(
            "updated_at",
            ColumnDef::new(ColumnType::Timestamp)
                .not_null()
                .default(DefaultValue::Sql("NOW()".to_string())),
        )
        .column("created_by", ColumnDef::new(ColumnType::Uuid).references(user_ref()))
        .column("updated_by", ColumnDef::new(ColumnType::Uuid).references(user_ref()))
        .column("deleted_at", ColumnDef::new(ColumnType::Timestamp))
        .column("deleted_by", ColumnDef::new(ColumnType::Uuid).references(user_ref()))
}

fn up(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema.create_table("parking_spaces", parking_spaces()).await?;

        schema
            .add_constraint(
                "parking_spaces",
                ConstraintDef::unique(
                    "parking_spaces_building_space_unique",
                    &["building_id", "space_number"],
                ),
            )
            .await?;

        let indexes = [
            IndexDef::new("idx_parking_spaces_building_id", &["building_id"]),
            IndexDef::new("idx_parking_spaces_assigned_to_user", &["assigned_to_user_id"]),
            IndexDef::new(
                "idx_parking_spaces_assigned_to_contract",
                &["assigned_to_contract_id"],
            ),
            IndexDef::new("idx_parking_spaces_available", &["is_available"])
                .partial("is_available = true"),
        ];

        for index in indexes {
            schema.add_index("parking_spaces", index).await?;
        }

        schema
            .execute_raw(
                "CREATE INDEX idx_parking_spaces_deleted_at
                ON parking_spaces(deleted_at)
                WHERE deleted_at IS NULL;",
            )
            .await?;

        Ok(())
    })
}

fn down(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema.drop_table("parking_spaces").await?;
        schema
            .execute_raw("DROP TYPE IF EXISTS \"enum_parking_spaces_parking_type\";")
            .await?;

        Ok(())
    })
}
