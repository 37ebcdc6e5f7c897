use std::time::Duration;

use super::m001_add_soft_delete_fields::SOFT_DELETE_TABLES;
use super::MIGRATIONS;
use crate::backend::memory::MemoryBackend;
use crate::registry::Registry;
use crate::runner::{Runner, RunnerOptions};
use crate::schema::{ColumnDef, ColumnType, TableDef};

/// The application schema as it was before the first migration
fn seeded() -> MemoryBackend {
    let mut backend = MemoryBackend::new().with_enum_type(
        "enum_private_visits_status",
        &["PENDING", "CONFIRMED", "COMPLETED", "CANCELLED"],
    );

    for table in SOFT_DELETE_TABLES {
        let mut def = TableDef::new().column("id", ColumnDef::new(ColumnType::Uuid).primary_key());
        match table {
            "users" => def = def.column("role", ColumnDef::new(ColumnType::Text).not_null()),
            "private_visits" => {
                def = def.column(
                    "status",
                    ColumnDef::new(ColumnType::enumeration(&[
                        "PENDING",
                        "CONFIRMED",
                        "COMPLETED",
                        "CANCELLED",
                    ]))
                    .not_null(),
                )
            }
            _ => {}
        }
        backend = backend.with_table(table, def);
    }

    backend
}

fn runner(backend: &MemoryBackend, registry: Registry) -> Runner<MemoryBackend> {
    Runner::new(backend.clone(), registry).with_options(RunnerOptions {
        lock_timeout: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(1),
        ..RunnerOptions::default()
    })
}

#[tokio::test]
async fn test_apply_then_revert_latest() {
    let backend = seeded();
    let runner = runner(&backend, Registry::new([MIGRATIONS[0], MIGRATIONS[1]]).unwrap());

    let applied = runner.up(None).await.unwrap();
    assert_eq!(
        applied,
        vec![
            "001-add-soft-delete-fields",
            "002-add-property-type-and-leave-management"
        ]
    );

    let status = runner.status().await.unwrap();
    let applied_ids: Vec<_> = status.applied.iter().map(|e| e.migration_id.as_str()).collect();
    assert_eq!(
        applied_ids,
        vec![
            "001-add-soft-delete-fields",
            "002-add-property-type-and-leave-management"
        ]
    );
    assert!(status.pending.is_empty());

    let reverted = runner.down(1).await.unwrap();
    assert_eq!(reverted, vec!["002-add-property-type-and-leave-management"]);

    let status = runner.status().await.unwrap();
    let applied_ids: Vec<_> = status.applied.iter().map(|e| e.migration_id.as_str()).collect();
    assert_eq!(applied_ids, vec!["001-add-soft-delete-fields"]);
    assert_eq!(status.pending, vec!["002-add-property-type-and-leave-management"]);

    let catalog = backend.catalog();
    assert!(!catalog.tables["buildings"].columns.contains_key("property_type"));
    assert!(!catalog.enum_types.contains_key("enum_buildings_property_type"));
    assert!(!catalog.enum_types.contains_key("enum_users_leave_status"));
    assert!(catalog.tables["buildings"].columns.contains_key("deleted_at"));
}

#[tokio::test]
async fn test_soft_delete_fields_on_every_table() {
    let backend = seeded();
    let runner = runner(&backend, Registry::new([MIGRATIONS[0]]).unwrap());
    runner.up(None).await.unwrap();

    let catalog = backend.catalog();
    for table in SOFT_DELETE_TABLES {
        let columns = &catalog.tables[table].columns;
        assert!(columns.contains_key("deleted_at"), "{} lacks deleted_at", table);

        let deleted_by = &columns["deleted_by"];
        assert_eq!(
            deleted_by.references.as_ref().map(|r| r.table.as_str()),
            Some("users")
        );

        let index = &catalog.indexes[&format!("idx_{}_deleted_at", table)];
        assert_eq!(index.table, table);
        assert_eq!(index.def.where_clause.as_deref(), Some("deleted_at IS NULL"));
    }
}

#[tokio::test]
async fn test_full_round_trip() {
    let backend = seeded();
    let runner = runner(&backend, Registry::builtin().unwrap());

    let before = backend.catalog();

    assert_eq!(runner.up(None).await.unwrap().len(), 4);
    let migrated = backend.catalog();

    let parking = &migrated.tables["parking_spaces"];
    assert_eq!(parking.columns.len(), 17);
    assert!(parking
        .constraints
        .contains_key("parking_spaces_building_space_unique"));
    assert_eq!(
        migrated.indexes["idx_parking_spaces_available"]
            .def
            .where_clause
            .as_deref(),
        Some("is_available = true")
    );
    assert!(migrated
        .enum_types
        .contains_key("enum_parking_spaces_parking_type"));
    assert!(migrated.enum_types["enum_private_visits_status"].contains(&"RESCHEDULED".to_string()));

    let reverted = runner.down(4).await.unwrap();
    assert_eq!(
        reverted,
        vec![
            "004-update-private-visits-rescheduling",
            "003-create-parking-spaces-table",
            "002-add-property-type-and-leave-management",
            "001-add-soft-delete-fields",
        ]
    );

    // The added enum value is the one change that survives a revert
    let mut after = backend.catalog();
    let statuses = after
        .enum_types
        .get_mut("enum_private_visits_status")
        .unwrap();
    assert_eq!(statuses.last().map(String::as_str), Some("RESCHEDULED"));
    statuses.pop();
    assert_eq!(after, before);

    // Re-applying has the same effect as the first time
    assert_eq!(runner.up(None).await.unwrap().len(), 4);
    assert_eq!(backend.catalog(), migrated);
}

#[tokio::test]
async fn test_uniqueness_violation_rolls_back_migration() {
    let backend = seeded();
    backend.fail_raw_containing(
        "CREATE INDEX idx_users_leave_status",
        "could not create unique index \"idx_users_leave_status\": duplicate key value",
    );
    let runner = runner(&backend, Registry::builtin().unwrap());

    let err = runner.up(None).await.unwrap_err();
    assert_eq!(err.category(), "SchemaOperationError");
    assert_eq!(
        err.migration_id(),
        Some("002-add-property-type-and-leave-management")
    );

    let ledger: Vec<_> = backend
        .ledger_entries()
        .into_iter()
        .map(|e| e.migration_id)
        .collect();
    assert_eq!(ledger, vec!["001-add-soft-delete-fields"]);

    let catalog = backend.catalog();
    assert!(!catalog.tables["buildings"].columns.contains_key("property_type"));
    assert!(!catalog.indexes.contains_key("idx_buildings_property_type"));
    assert!(!catalog.enum_types.contains_key("enum_buildings_property_type"));
    assert!(!catalog.tables.contains_key("parking_spaces"));
}

#[tokio::test]
async fn test_enum_alteration_needs_existing_type() {
    let backend = MemoryBackend::new()
        .with_table(
            "private_visits",
            TableDef::new().column("id", ColumnDef::new(ColumnType::Uuid).primary_key()),
        );
    let runner = runner(&backend, Registry::new([MIGRATIONS[3]]).unwrap());

    let err = runner.up(None).await.unwrap_err();
    assert_eq!(err.migration_id(), Some("004-update-private-visits-rescheduling"));
    assert!(err.to_string().contains("enum_private_visits_status"));
    assert!(backend.ledger_entries().is_empty());
}

#[test]
fn test_only_enum_alteration_is_irreversible() {
    let noted: Vec<_> = MIGRATIONS
        .iter()
        .filter(|m| m.down_note.is_some())
        .map(|m| m.id)
        .collect();
    assert_eq!(noted, vec!["004-update-private-visits-rescheduling"]);
}
