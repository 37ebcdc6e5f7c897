use futures::future::BoxFuture;

use crate::migrations::Migration;
use crate::schema::{ColumnDef, ColumnType, DefaultValue, IndexDef, SchemaAdapter, SchemaError};

pub const MIGRATION: Migration = Migration {
    id: "002-add-property-type-and-leave-management",
    description: "Add property_type to buildings and leave management fields to users",
    up,
    down,
    down_note: None,
};

fn up(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema
            .add_column(
                "buildings",
                "property_type",
                ColumnDef::new(ColumnType::enumeration(&["COMMERCIAL", "RESIDENTIAL", "MIXED_USE"]))
                    .not_null()
                    .default(DefaultValue::Value("COMMERCIAL".to_string())),
            )
            .await?;

        schema
            .add_index(
                "buildings",
                IndexDef::new("idx_buildings_property_type", &["property_type"]),
            )
            .await?;

        schema
            .add_column(
                "users",
                "leave_status",
                ColumnDef::new(ColumnType::enumeration(&["ACTIVE", "ON_LEAVE", "SICK_LEAVE", "VACATION"]))
                    .not_null()
                    .default(DefaultValue::Value("ACTIVE".to_string())),
            )
            .await?;

        schema
            .add_column("users", "leave_start_date", ColumnDef::new(ColumnType::Date))
            .await?;

        schema
            .add_column("users", "leave_end_date", ColumnDef::new(ColumnType::Date))
            .await?;

        // Leave lookups are only ever done for sales reps
        schema
            .execute_raw(
                "CREATE INDEX idx_users_leave_status
                ON users(leave_status, leave_start_date, leave_end_date)
                WHERE role = 'SALES_REP';",
            )
            .await?;

        Ok(())
    })
}

fn down(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema
            .remove_index("buildings", "idx_buildings_property_type")
            .await?;
        schema
            .execute_raw("DROP INDEX IF EXISTS idx_users_leave_status;")
            .await?;

        schema.remove_column("users", "leave_end_date").await?;
        schema.remove_column("users", "leave_start_date").await?;
        schema.remove_column("users", "leave_status").await?;
        schema.remove_column("buildings", "property_type").await?;

        // Enum types outlive their columns
        schema
            .execute_raw("DROP TYPE IF EXISTS \"enum_buildings_property_type\";")
            .await?;
        schema
            .execute_raw("DROP TYPE IF EXISTS \"enum_users_leave_status\";")
            .await?;

        Ok(())
    })
}
