use futures::future::BoxFuture;

use crate::migrations::Migration;
use crate::schema::{ColumnDef, ColumnType, IndexDef, ReferentialAction, References, SchemaAdapter, SchemaError};

pub const MIGRATION: Migration = Migration {
    id: "004-update-private-visits-rescheduling",
    description: "Add rescheduling fields to private_visits and the RESCHEDULED visit status",
    up,
    down,
    down_note: Some(
        "PostgreSQL cannot remove a value from an enum type, RESCHEDULED stays in enum_private_visits_status",
    ),
};

fn up(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema
            .execute_raw(
                "ALTER TYPE \"enum_private_visits_status\"
                ADD VALUE IF NOT EXISTS 'RESCHEDULED';",
            )
            .await?;

        schema
            .add_column(
                "private_visits",
                "rescheduled_from_visit_id",
                ColumnDef::new(ColumnType::Uuid).references(
                    References::new("private_visits", "id")
                        .on_update(ReferentialAction::Cascade)
                        .on_delete(ReferentialAction::SetNull),
                ),
            )
            .await?;

        schema
            .add_column("private_visits", "rescheduled_reason", ColumnDef::new(ColumnType::Text))
            .await?;

        schema
            .add_index(
                "private_visits",
                IndexDef::new("idx_private_visits_rescheduled_from", &["rescheduled_from_visit_id"]),
            )
            .await?;

        Ok(())
    })
}

fn down(schema: &mut dyn SchemaAdapter) -> BoxFuture<'_, Result<(), SchemaError>> {
    Box::pin(async move {
        schema
            .remove_index("private_visits", "idx_private_visits_rescheduled_from")
            .await?;

        schema.remove_column("private_visits", "rescheduled_reason").await?;
        schema
            .remove_column("private_visits", "rescheduled_from_visit_id")
            .await?;

        // RESCHEDULED is left in place, see down_note

        Ok(())
    })
}
