use super::{
    ColumnGeneration, DdlBuilder, PlanBuilder, SchemaMutationPlan, Table, TableColumn,
    quote_identifier, quote_literal, require_name,
};
use crate::error::QueryRunnerError;

impl DdlBuilder {
    /// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    pub(super) fn column_definition(&self, column: &TableColumn) -> String {
        let mut sql = format!("{} {}", quote_identifier(&column.name), column.sql_type);
        if let Some(collation) = &column.collation {
            sql.push_str(&format!(" COLLATE {}", quote_identifier(collation)));
        }
        match &column.generated {
            Some(ColumnGeneration::IdentityAlways) => sql.push_str(" GENERATED ALWAYS AS IDENTITY"),
            Some(ColumnGeneration::IdentityByDefault) => {
                sql.push_str(" GENERATED BY DEFAULT AS IDENTITY");
            }
            Some(ColumnGeneration::Stored(expression)) => {
                sql.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
            }
            None => {}
        }
        if !column.is_nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(&format!(" DEFAULT {default}"));
        }
        sql
    }

    fn alter_column(&self, table: &Table, column: &str, action: &str) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {action}",
            self.escape_path(&table.path),
            quote_identifier(column)
        )
    }

    fn column_comment(&self, table: &Table, column: &str, comment: Option<&str>) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            self.escape_path(&table.path),
            quote_identifier(column),
            comment.map_or_else(|| "NULL".to_string(), quote_literal)
        )
    }

    fn column_type(&self, column: &TableColumn) -> String {
        match &column.collation {
            Some(collation) => format!("{} COLLATE {}", column.sql_type, quote_identifier(collation)),
            None => column.sql_type.clone(),
        }
    }

    fn find_column<'a>(&self, table: &'a Table, name: &str) -> Result<&'a TableColumn, QueryRunnerError> {
        table.find_column(name).ok_or_else(|| {
            QueryRunnerError::SchemaObjectNotFound(format!(
                "column \"{name}\" in table \"{}\"",
                table.path.name
            ))
        })
    }

    /// Add `column`; a primary column is folded into the (re-created) primary key.
    ///
    /// # Errors
    /// `InvalidMutation` if the column exists; `IrreversibleMutation` if the existing
    /// primary key must be replaced but its name is unknown.
    pub fn add_column(
        &self,
        table: &Table,
        column: &TableColumn,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        if table.find_column(&column.name).is_some() {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "column \"{}\" already exists in table \"{}\"",
                column.name, table.path.name
            )));
        }
        let path = self.escape_path(&table.path);
        let current_primary = table.primary_columns();
        let mut plan = PlanBuilder::default();

        if column.is_primary && !current_primary.is_empty() {
            let old = require_name(table.primary_key_name.as_deref(), "primary key", &table.path)?;
            self.primary_key_step(&mut plan, table, old, &current_primary, false);
        }

        let mut up = vec![format!("ALTER TABLE {path} ADD {}", self.column_definition(column))];
        if let Some(comment) = &column.comment {
            up.push(self.column_comment(table, &column.name, Some(comment)));
        }
        plan.step_many(
            up,
            vec![format!("ALTER TABLE {path} DROP COLUMN {}", quote_identifier(&column.name))],
        );

        if column.is_primary {
            let mut primary = current_primary;
            primary.push(column.name.clone());
            let name = self.primary_key_name_for(table);
            self.primary_key_step(&mut plan, table, &name, &primary, true);
        }
        Ok(plan.finish())
    }

    /// Add several columns, each seeing the ones added before it.
    ///
    /// # Errors
    /// As for [`add_column`](Self::add_column).
    pub fn add_columns(
        &self,
        table: &Table,
        columns: &[TableColumn],
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let mut current = table.clone();
        let mut plan = SchemaMutationPlan::default();
        for column in columns {
            plan.extend(self.add_column(&current, column)?);
            if column.is_primary && current.primary_key_name.is_none() {
                current.primary_key_name = Some(self.primary_key_name_for(&current));
            }
            current.columns.push(column.clone());
        }
        Ok(plan)
    }

    /// # Errors
    /// `SchemaObjectNotFound` if `old_name` is missing; `InvalidMutation` if `new_name` is taken.
    pub fn rename_column(
        &self,
        table: &Table,
        old_name: &str,
        new_name: &str,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.find_column(table, old_name)?;
        if table.find_column(new_name).is_some() {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "column \"{new_name}\" already exists in table \"{}\"",
                table.path.name
            )));
        }
        let mut plan = PlanBuilder::default();
        self.rename_step(&mut plan, table, old_name, new_name);
        Ok(plan.finish())
    }

    fn rename_step(&self, plan: &mut PlanBuilder, table: &Table, from: &str, to: &str) {
        let path = self.escape_path(&table.path);
        plan.step(
            format!(
                "ALTER TABLE {path} RENAME COLUMN {} TO {}",
                quote_identifier(from),
                quote_identifier(to)
            ),
            format!(
                "ALTER TABLE {path} RENAME COLUMN {} TO {}",
                quote_identifier(to),
                quote_identifier(from)
            ),
        );
    }

    /// Turn the column named `old_name` into `new_column`: rename, type/collation,
    /// nullability, default and comment changes, one reversible step each.
    ///
    /// # Errors
    /// `SchemaObjectNotFound` if `old_name` is missing; `InvalidMutation` for changes that
    /// need a drop and re-add (generation, primary key membership).
    pub fn change_column(
        &self,
        table: &Table,
        old_name: &str,
        new_column: &TableColumn,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let old = self.find_column(table, old_name)?;
        if old.generated != new_column.generated {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "changing generation of \"{old_name}\" requires dropping and re-adding the column"
            )));
        }
        if old.is_primary != new_column.is_primary {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "changing primary key membership of \"{old_name}\" goes through update_primary_keys"
            )));
        }

        let mut plan = PlanBuilder::default();
        let name = new_column.name.as_str();
        if old.name != new_column.name {
            if table.find_column(name).is_some() {
                return Err(QueryRunnerError::InvalidMutation(format!(
                    "column \"{name}\" already exists in table \"{}\"",
                    table.path.name
                )));
            }
            self.rename_step(&mut plan, table, &old.name, name);
        }

        if old.sql_type != new_column.sql_type || old.collation != new_column.collation {
            plan.step(
                self.alter_column(
                    table,
                    name,
                    &format!("TYPE {} USING {}::{}", self.column_type(new_column), quote_identifier(name), new_column.sql_type),
                ),
                self.alter_column(
                    table,
                    name,
                    &format!("TYPE {} USING {}::{}", self.column_type(old), quote_identifier(name), old.sql_type),
                ),
            );
        }

        if old.is_nullable != new_column.is_nullable {
            let (up, down) = if new_column.is_nullable {
                ("DROP NOT NULL", "SET NOT NULL")
            } else {
                ("SET NOT NULL", "DROP NOT NULL")
            };
            plan.step(self.alter_column(table, name, up), self.alter_column(table, name, down));
        }

        if old.default != new_column.default {
            let set_or_drop = |default: Option<&String>| match default {
                Some(expression) => format!("SET DEFAULT {expression}"),
                None => "DROP DEFAULT".to_string(),
            };
            plan.step(
                self.alter_column(table, name, &set_or_drop(new_column.default.as_ref())),
                self.alter_column(table, name, &set_or_drop(old.default.as_ref())),
            );
        }

        if old.comment != new_column.comment {
            plan.step(
                self.column_comment(table, name, new_column.comment.as_deref()),
                self.column_comment(table, name, old.comment.as_deref()),
            );
        }
        Ok(plan.finish())
    }

    /// Drop a column together with the indices and constraints built on it; the
    /// inverse restores the column first, then everything that depended on it.
    ///
    /// Checks and exclusions must list the columns they use: the server drops them
    /// silently with any column they read, so one with an empty list makes the
    /// inverse unknowable.
    ///
    /// # Errors
    /// `SchemaObjectNotFound` if the column is missing; `IrreversibleMutation` if a
    /// dependent object's name is unknown, or a check or exclusion on the table does
    /// not list its columns.
    pub fn drop_column(
        &self,
        table: &Table,
        column_name: &str,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let column = self.find_column(table, column_name)?;
        let uses = |columns: &[String]| columns.iter().any(|c| c == column_name);

        if let Some(check) = table.checks.iter().find(|c| c.columns.is_empty()) {
            return Err(unknown_dependency(table, "check", check.name.as_deref(), column_name));
        }
        if let Some(exclusion) = table.exclusions.iter().find(|e| e.columns.is_empty()) {
            return Err(unknown_dependency(
                table,
                "exclusion",
                exclusion.name.as_deref(),
                column_name,
            ));
        }

        let mut plan = SchemaMutationPlan::default();
        for index in table.indices.iter().filter(|i| uses(&i.columns)) {
            plan.extend(self.drop_index(table, index)?);
        }
        for fk in table.foreign_keys.iter().filter(|f| uses(&f.columns)) {
            plan.extend(self.drop_foreign_key(table, fk)?);
        }
        for unique in table.uniques.iter().filter(|u| uses(&u.columns)) {
            plan.extend(self.drop_unique_constraint(table, unique)?);
        }
        for check in table.checks.iter().filter(|c| uses(&c.columns)) {
            plan.extend(self.drop_check_constraint(table, check)?);
        }
        for exclusion in table.exclusions.iter().filter(|e| uses(&e.columns)) {
            plan.extend(self.drop_exclusion_constraint(table, exclusion)?);
        }

        let mut steps = PlanBuilder::default();
        let primary = table.primary_columns();
        let primary_name = if column.is_primary {
            let name = require_name(table.primary_key_name.as_deref(), "primary key", &table.path)?;
            self.primary_key_step(&mut steps, table, name, &primary, false);
            Some(name)
        } else {
            None
        };

        let path = self.escape_path(&table.path);
        let mut restore = vec![format!("ALTER TABLE {path} ADD {}", self.column_definition(column))];
        if let Some(comment) = &column.comment {
            restore.push(self.column_comment(table, &column.name, Some(comment)));
        }
        steps.step_many(
            vec![format!("ALTER TABLE {path} DROP COLUMN {}", quote_identifier(&column.name))],
            restore,
        );

        if let Some(name) = primary_name {
            let remaining: Vec<String> = primary.into_iter().filter(|c| c != column_name).collect();
            if !remaining.is_empty() {
                self.primary_key_step(&mut steps, table, name, &remaining, true);
            }
        }
        plan.extend(steps.finish());
        Ok(plan)
    }

    /// Drop several columns, each against the table as left by the previous drop.
    ///
    /// # Errors
    /// As for [`drop_column`](Self::drop_column).
    pub fn drop_columns(
        &self,
        table: &Table,
        column_names: &[&str],
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let mut current = table.clone();
        let mut plan = SchemaMutationPlan::default();
        for name in column_names {
            plan.extend(self.drop_column(&current, name)?);
            let uses = |columns: &[String]| columns.iter().any(|c| c == name);
            current.indices.retain(|i| !uses(&i.columns));
            current.foreign_keys.retain(|f| !uses(&f.columns));
            current.uniques.retain(|u| !uses(&u.columns));
            current.checks.retain(|c| !uses(&c.columns));
            current.exclusions.retain(|e| !uses(&e.columns));
            current.columns.retain(|c| c.name != *name);
        }
        Ok(plan)
    }
}

fn unknown_dependency(
    table: &Table,
    kind: &str,
    name: Option<&str>,
    column: &str,
) -> QueryRunnerError {
    QueryRunnerError::IrreversibleMutation(format!(
        "{kind} constraint {} on table \"{}\" does not list its columns; dropping \"{column}\" could remove it unrecorded",
        name.map_or_else(|| "(unnamed)".to_string(), |n| format!("\"{n}\"")),
        table.path.name
    ))
}
