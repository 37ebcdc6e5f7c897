// PostgreSQL rendering of schema operations
use super::{
    enum_type_name, ColumnDef, ColumnType, ConstraintDef, ConstraintKind, DefaultValue, IndexDef,
    ReferentialAction, References, TableDef,
};

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_idents(idents: &[String]) -> String {
    idents
        .iter()
        .map(|i| quote_ident(i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn action_sql(action: ReferentialAction) -> &'static str {
    match action {
        ReferentialAction::Cascade => "CASCADE",
        ReferentialAction::SetNull => "SET NULL",
        ReferentialAction::Restrict => "RESTRICT",
        ReferentialAction::NoAction => "NO ACTION",
    }
}

pub fn type_sql(table: &str, column: &str, ty: &ColumnType) -> String {
    match ty {
        ColumnType::Uuid => "UUID".to_string(),
        ColumnType::Text => "TEXT".to_string(),
        ColumnType::Varchar(len) => format!("VARCHAR({})", len),
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Integer => "INTEGER".to_string(),
        ColumnType::Decimal(precision, scale) => format!("DECIMAL({}, {})", precision, scale),
        ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE".to_string(),
        ColumnType::Date => "DATE".to_string(),
        ColumnType::Enum(_) => quote_ident(&enum_type_name(table, column)),
    }
}

fn references_sql(references: &References) -> String {
    let mut sql = format!(
        "REFERENCES {} ({})",
        quote_ident(&references.table),
        quote_ident(&references.column)
    );

    if let Some(action) = references.on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action_sql(action));
    }

    if let Some(action) = references.on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action_sql(action));
    }

    sql
}

/// `CREATE TYPE` statement for an enum column, `None` for any other column type
pub fn create_enum_type(table: &str, column: &str, ty: &ColumnType) -> Option<String> {
    let ColumnType::Enum(values) = ty else {
        return None;
    };

    let values = values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(", ");

    Some(format!(
        "CREATE TYPE {} AS ENUM ({})",
        quote_ident(&enum_type_name(table, column)),
        values
    ))
}

/// A column definition as it appears in `CREATE TABLE`/`ADD COLUMN`
pub fn column_sql(table: &str, column: &str, def: &ColumnDef) -> String {
    let mut sql = format!("{} {}", quote_ident(column), type_sql(table, column, &def.ty));

    if def.primary_key {
        sql.push_str(" PRIMARY KEY");
    } else if !def.nullable {
        sql.push_str(" NOT NULL");
    }

    if let Some(ref default) = def.default {
        sql.push_str(" DEFAULT ");
        match default {
            DefaultValue::Value(v) => {
                sql.push_str(&quote_literal(v));
                // Literal defaults on enum columns need an explicit cast
                if matches!(def.ty, ColumnType::Enum(_)) {
                    sql.push_str("::");
                    sql.push_str(&quote_ident(&enum_type_name(table, column)));
                }
            }
            DefaultValue::Bool(b) => sql.push_str(if *b { "true" } else { "false" }),
            DefaultValue::Sql(expr) => sql.push_str(expr),
        }
    }

    if let Some(ref references) = def.references {
        sql.push(' ');
        sql.push_str(&references_sql(references));
    }

    sql
}

pub fn add_column(table: &str, column: &str, def: &ColumnDef) -> Vec<String> {
    let mut stmts = Vec::new();

    if let Some(stmt) = create_enum_type(table, column, &def.ty) {
        stmts.push(stmt);
    }

    stmts.push(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_sql(table, column, def)
    ));

    stmts
}

pub fn remove_column(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    )
}

pub fn create_table(table: &str, def: &TableDef) -> Vec<String> {
    let mut stmts = Vec::new();

    for (column, cdef) in def.columns.iter() {
        if let Some(stmt) = create_enum_type(table, column, &cdef.ty) {
            stmts.push(stmt);
        }
    }

    let columns = def
        .columns
        .iter()
        .map(|(column, cdef)| format!("    {}", column_sql(table, column, cdef)))
        .collect::<Vec<_>>()
        .join(",\n");

    stmts.push(format!("CREATE TABLE {} (\n{}\n)", quote_ident(table), columns));

    stmts
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn add_index(table: &str, index: &IndexDef) -> String {
    let mut sql = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(table),
        quote_idents(&index.columns)
    );

    if let Some(ref predicate) = index.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }

    sql
}

pub fn remove_index(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote_ident(name))
}

pub fn add_constraint(table: &str, constraint: &ConstraintDef) -> String {
    let body = match &constraint.kind {
        ConstraintKind::Unique(columns) => format!("UNIQUE ({})", quote_idents(columns)),
        ConstraintKind::ForeignKey {
            columns,
            references,
        } => format!(
            "FOREIGN KEY ({}) {}",
            quote_idents(columns),
            references_sql(references)
        ),
        ConstraintKind::Check(expr) => format!("CHECK ({})", expr),
    };

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        quote_ident(table),
        quote_ident(&constraint.name),
        body
    )
}

pub fn remove_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, ConstraintDef, DefaultValue, IndexDef, References};

    #[test]
    fn test_quoting() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_add_column_with_reference() {
        let def = ColumnDef::new(ColumnType::Uuid).references(
            References::new("users", "id")
                .on_update(ReferentialAction::Cascade)
                .on_delete(ReferentialAction::SetNull),
        );

        assert_eq!(
            add_column("buildings", "deleted_by", &def),
            vec![
                "ALTER TABLE \"buildings\" ADD COLUMN \"deleted_by\" UUID REFERENCES \"users\" (\"id\") ON UPDATE CASCADE ON DELETE SET NULL".to_string()
            ]
        );
    }

    #[test]
    fn test_add_enum_column_creates_type() {
        let def = ColumnDef::new(ColumnType::enumeration(&["COMMERCIAL", "RESIDENTIAL"]))
            .not_null()
            .default(DefaultValue::Value("COMMERCIAL".into()));

        let stmts = add_column("buildings", "property_type", &def);
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0],
            "CREATE TYPE \"enum_buildings_property_type\" AS ENUM ('COMMERCIAL', 'RESIDENTIAL')"
        );
        assert_eq!(
            stmts[1],
            "ALTER TABLE \"buildings\" ADD COLUMN \"property_type\" \"enum_buildings_property_type\" NOT NULL DEFAULT 'COMMERCIAL'::\"enum_buildings_property_type\""
        );
    }

    #[test]
    fn test_create_table() {
        let def = TableDef::new()
            .column(
                "id",
                ColumnDef::new(ColumnType::Uuid)
                    .primary_key()
                    .default(DefaultValue::Sql("gen_random_uuid()".into())),
            )
            .column("monthly_fee", ColumnDef::new(ColumnType::Decimal(10, 2)))
            .column(
                "is_available",
                ColumnDef::new(ColumnType::Boolean)
                    .not_null()
                    .default(DefaultValue::Bool(true)),
            );

        let stmts = create_table("parking_spaces", &def);
        assert_eq!(
            stmts,
            vec![
                "CREATE TABLE \"parking_spaces\" (\n    \"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid(),\n    \"monthly_fee\" DECIMAL(10, 2),\n    \"is_available\" BOOLEAN NOT NULL DEFAULT true\n)".to_string()
            ]
        );
    }

    #[test]
    fn test_indexes_and_constraints() {
        let idx = IndexDef::new("idx_parking_spaces_available", &["is_available"])
            .partial("is_available = true");
        assert_eq!(
            add_index("parking_spaces", &idx),
            "CREATE INDEX \"idx_parking_spaces_available\" ON \"parking_spaces\" (\"is_available\") WHERE is_available = true"
        );

        let idx = IndexDef::new("idx_u", &["a", "b"]).unique();
        assert_eq!(
            add_index("t", &idx),
            "CREATE UNIQUE INDEX \"idx_u\" ON \"t\" (\"a\", \"b\")"
        );

        assert_eq!(remove_index("idx_u"), "DROP INDEX IF EXISTS \"idx_u\"");

        let c = ConstraintDef::unique(
            "parking_spaces_building_space_unique",
            &["building_id", "space_number"],
        );
        assert_eq!(
            add_constraint("parking_spaces", &c),
            "ALTER TABLE \"parking_spaces\" ADD CONSTRAINT \"parking_spaces_building_space_unique\" UNIQUE (\"building_id\", \"space_number\")"
        );

        let c = ConstraintDef::check("fee_positive", "monthly_fee >= 0");
        assert_eq!(
            add_constraint("parking_spaces", &c),
            "ALTER TABLE \"parking_spaces\" ADD CONSTRAINT \"fee_positive\" CHECK (monthly_fee >= 0)"
        );

        assert_eq!(
            remove_constraint("parking_spaces", "fee_positive"),
            "ALTER TABLE \"parking_spaces\" DROP CONSTRAINT \"fee_positive\""
        );
    }
}
