use futures::future::BoxFuture;

use crate::migrations::Migration;
use crate::schema::{ColumnDef, ColumnType, ReferentialAction, References, SchemaAdapter, SchemaError};

/// Every table that takes part in the recycle bin
pub(crate) const SOFT_DELETE_TABLES: [&str; 11] = [
    "users",
    "buildings",
    "floors",
    "spaces",
    "bids",
    "contracts",
    "payments",
    "notifications",
    "private_visits",
    "role_hierarchy_config",
    "user_role_hierarchy",
];

pub const MIGRATION: Migration = Migration {
    id: "001-add-soft-delete-fields",
    description: "Add deleted_at and deleted_by to all existing tables for recycle bin functionality",
    up,
    down,
    down_note: None,
};

fn up(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        for table in SOFT_DELETE_TABLES {
            schema
                .add_column(table, "deleted_at", ColumnDef::new(ColumnType::Timestamp))
                .await?;

            schema
                .add_column(
                    table,
                    "deleted_by",
                    ColumnDef::new(ColumnType::Uuid).references(
                        References::new("users", "id")
                            .on_update(ReferentialAction::Cascade)
                            .on_delete(ReferentialAction::SetNull),
                    ),
                )
                .await?;

            // Partial index, only live rows are looked up by deleted_at
            schema
                .execute_raw(&format!(
                    "CREATE INDEX idx_{table}_deleted_at ON {table}(deleted_at) WHERE deleted_at IS NULL;"
                ))
                .await?;
        }

        Ok(())
    })
}

fn down(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        for table in SOFT_DELETE_TABLES {
            schema
                .execute_raw(&format!("DROP INDEX IF EXISTS idx_{table}_deleted_at;"))
                .await?;

            schema.remove_column(table, "deleted_by").await?;
            schema.remove_column(table, "deleted_at").await?;
        }

        Ok(())
    })
}
