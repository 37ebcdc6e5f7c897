mod m001_add_soft_delete_fields;
mod m002_add_property_type_and_leave_management;
mod m003_create_parking_spaces_table;
mod m004_update_private_visits_rescheduling;

pub use crate::registry::Migration;

pub const MIGRATIONS: [Migration; 4] = [
    m001_add_soft_delete_fields::MIGRATION,
    m002_add_property_type_and_leave_management::MIGRATION,
    m003_create_parking_spaces_table::MIGRATION,
    m004_update_private_visits_rescheduling::MIGRATION,
];

#[cfg(test)]
mod tests;
