use super::{
    DdlBuilder, PlanBuilder, SchemaMutationPlan, Table, TablePath, View, quote_identifier,
    quote_literal, require_name,
};
use crate::error::QueryRunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTableOptions {
    pub if_not_exists: bool,
    /// Add the table's foreign keys after creating it
    pub create_foreign_keys: bool,
    /// Create the table's indices after creating it
    pub create_indices: bool,
}

impl Default for CreateTableOptions {
    fn default() -> Self {
        Self {
            if_not_exists: false,
            create_foreign_keys: true,
            create_indices: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropTableOptions {
    pub if_exists: bool,
}

impl DdlBuilder {
    #[must_use]
    pub fn create_database(&self, name: &str) -> SchemaMutationPlan {
        let mut plan = PlanBuilder::default();
        plan.step(
            format!("CREATE DATABASE {}", quote_identifier(name)),
            format!("DROP DATABASE {}", quote_identifier(name)),
        );
        plan.finish()
    }

    #[must_use]
    pub fn drop_database(&self, name: &str, if_exists: bool) -> SchemaMutationPlan {
        let mut plan = PlanBuilder::default();
        plan.step(
            format!(
                "DROP DATABASE {}{}",
                if if_exists { "IF EXISTS " } else { "" },
                quote_identifier(name)
            ),
            format!("CREATE DATABASE {}", quote_identifier(name)),
        );
        plan.finish()
    }

    /// With `if_not_exists`, the inverse still drops the schema even if it existed before.
    #[must_use]
    pub fn create_schema(&self, name: &str, if_not_exists: bool) -> SchemaMutationPlan {
        let mut plan = PlanBuilder::default();
        plan.step(
            format!(
                "CREATE SCHEMA {}{}",
                if if_not_exists { "IF NOT EXISTS " } else { "" },
                quote_identifier(name)
            ),
            format!("DROP SCHEMA {}", quote_identifier(name)),
        );
        plan.finish()
    }

    /// # Errors
    /// `IrreversibleMutation` for `cascade`: the objects it would remove cannot be recreated.
    pub fn drop_schema(
        &self,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        if cascade {
            return Err(QueryRunnerError::IrreversibleMutation(format!(
                "DROP SCHEMA \"{name}\" CASCADE removes objects this plan cannot recreate"
            )));
        }
        let mut plan = PlanBuilder::default();
        plan.step(
            format!(
                "DROP SCHEMA {}{}",
                if if_exists { "IF EXISTS " } else { "" },
                quote_identifier(name)
            ),
            format!("CREATE SCHEMA {}", quote_identifier(name)),
        );
        Ok(plan.finish())
    }

    /// Create `table`, then its foreign keys, then its indices.
    ///
    /// Unnamed constraints get deterministic names so the inverse can address them.
    /// With `if_not_exists`, the inverse still drops the table even if it existed
    /// before the plan ran.
    ///
    /// # Errors
    /// `InvalidMutation` if a foreign key's column lists differ in length.
    pub fn create_table(
        &self,
        table: &Table,
        options: CreateTableOptions,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let mut plan = PlanBuilder::default();
        plan.step_many(
            self.create_table_statements(table, options.if_not_exists),
            vec![format!("DROP TABLE {}", self.escape_path(&table.path))],
        );
        let mut plan = plan.finish();

        if options.create_foreign_keys {
            for fk in &table.foreign_keys {
                plan.extend(self.create_foreign_key(table, fk)?);
            }
        }
        if options.create_indices {
            for index in &table.indices {
                plan.extend(self.create_index(table, index)?);
            }
        }
        Ok(plan)
    }

    /// Drop `table` after its indices and foreign keys; the inverse recreates all three
    /// in dependency order.
    ///
    /// # Errors
    /// `IrreversibleMutation` if the name of any constraint or index is unknown.
    pub fn drop_table(
        &self,
        table: &Table,
        options: DropTableOptions,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_fully_named(table)?;

        let mut plan = SchemaMutationPlan::default();
        for index in table.indices.iter().rev() {
            plan.extend(self.drop_index(table, index)?);
        }
        for fk in table.foreign_keys.iter().rev() {
            plan.extend(self.drop_foreign_key(table, fk)?);
        }

        let mut drop = PlanBuilder::default();
        drop.step_many(
            vec![format!(
                "DROP TABLE {}{}",
                if options.if_exists { "IF EXISTS " } else { "" },
                self.escape_path(&table.path)
            )],
            self.create_table_statements(table, false),
        );
        plan.extend(drop.finish());
        Ok(plan)
    }

    /// # Errors
    /// `InvalidMutation` if `new_name` is schema-qualified.
    pub fn rename_table(
        &self,
        table: &Table,
        new_name: &str,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        if new_name.contains('.') {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "cannot move \"{}\" to another schema by renaming it to \"{new_name}\"",
                table.path.name
            )));
        }
        let renamed: TablePath = table.path.with_name(new_name);
        let mut plan = PlanBuilder::default();
        plan.step(
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.escape_path(&table.path),
                quote_identifier(new_name)
            ),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.escape_path(&renamed),
                quote_identifier(&table.path.name)
            ),
        );
        Ok(plan.finish())
    }

    #[must_use]
    pub fn create_view(&self, view: &View) -> SchemaMutationPlan {
        let mut plan = PlanBuilder::default();
        plan.step(self.create_view_sql(view), self.drop_view_sql(view));
        plan.finish()
    }

    #[must_use]
    pub fn drop_view(&self, view: &View) -> SchemaMutationPlan {
        let mut plan = PlanBuilder::default();
        plan.step(self.drop_view_sql(view), self.create_view_sql(view));
        plan.finish()
    }

    fn create_view_sql(&self, view: &View) -> String {
        format!(
            "CREATE {}VIEW {} AS {}",
            if view.materialized { "MATERIALIZED " } else { "" },
            self.escape_path(&view.path),
            view.expression
        )
    }

    fn drop_view_sql(&self, view: &View) -> String {
        format!(
            "DROP {}VIEW {}",
            if view.materialized { "MATERIALIZED " } else { "" },
            self.escape_path(&view.path)
        )
    }

    /// `CREATE TABLE` followed by its comment statements.
    fn create_table_statements(&self, table: &Table, if_not_exists: bool) -> Vec<String> {
        let mut definitions: Vec<String> = table
            .columns
            .iter()
            .map(|column| self.column_definition(column))
            .collect();
        for unique in &table.uniques {
            let name = self.unique_name_for(table, unique);
            definitions.push(self.unique_clause(&name, unique));
        }
        for (ordinal, check) in table.checks.iter().enumerate() {
            let name = self.check_name_for(table, check, ordinal);
            definitions.push(self.check_clause(&name, check));
        }
        for (ordinal, exclusion) in table.exclusions.iter().enumerate() {
            let name = self.exclusion_name_for(table, exclusion, ordinal);
            definitions.push(self.exclusion_clause(&name, exclusion));
        }
        let primary = table.primary_columns();
        if !primary.is_empty() {
            definitions.push(self.primary_key_clause(&self.primary_key_name_for(table), &primary));
        }

        let path = self.escape_path(&table.path);
        let mut statements = vec![format!(
            "CREATE TABLE {}{path} ({})",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            definitions.join(", ")
        )];
        if let Some(comment) = &table.comment {
            statements.push(format!("COMMENT ON TABLE {path} IS {}", quote_literal(comment)));
        }
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                statements.push(format!(
                    "COMMENT ON COLUMN {path}.{} IS {}",
                    quote_identifier(&column.name),
                    quote_literal(comment)
                ));
            }
        }
        statements
    }

    fn ensure_fully_named(&self, table: &Table) -> Result<(), QueryRunnerError> {
        if !table.primary_columns().is_empty() {
            require_name(table.primary_key_name.as_deref(), "primary key", &table.path)?;
        }
        for unique in &table.uniques {
            require_name(unique.name.as_deref(), "unique constraint", &table.path)?;
        }
        for check in &table.checks {
            require_name(check.name.as_deref(), "check constraint", &table.path)?;
        }
        for exclusion in &table.exclusions {
            require_name(exclusion.name.as_deref(), "exclusion constraint", &table.path)?;
        }
        for fk in &table.foreign_keys {
            require_name(fk.name.as_deref(), "foreign key", &table.path)?;
        }
        for index in &table.indices {
            require_name(index.name.as_deref(), "index", &table.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::{Query, TableColumn, TableForeignKey, TableIndex};

    fn orders() -> Table {
        Table::new(TablePath::new("orders"))
            .column(TableColumn::new("id", "integer").primary())
            .column(TableColumn::new("customer_id", "integer").not_null())
            .foreign_key(TableForeignKey::new(
                Some("orders_customer_fk"),
                &["customer_id"],
                TablePath::new("customers"),
                &["id"],
            ))
            .index(TableIndex::new(Some("orders_customer_idx"), &["customer_id"]))
            .primary_key_name("orders_pkey")
    }

    fn sql(queries: &[Query]) -> Vec<&str> {
        queries.iter().map(|q| q.sql.as_str()).collect()
    }

    #[test]
    fn create_table_inverse_drops_dependents_first() {
        let plan = DdlBuilder::default()
            .create_table(&orders(), CreateTableOptions::default())
            .unwrap();
        assert_eq!(
            sql(&plan.up),
            vec![
                "CREATE TABLE \"orders\" (\"id\" integer NOT NULL, \"customer_id\" integer NOT NULL, CONSTRAINT \"orders_pkey\" PRIMARY KEY (\"id\"))",
                "ALTER TABLE \"orders\" ADD CONSTRAINT \"orders_customer_fk\" FOREIGN KEY (\"customer_id\") REFERENCES \"customers\" (\"id\")",
                "CREATE INDEX \"orders_customer_idx\" ON \"orders\" (\"customer_id\")",
            ]
        );
        assert_eq!(
            sql(&plan.down),
            vec![
                "DROP INDEX \"orders_customer_idx\"",
                "ALTER TABLE \"orders\" DROP CONSTRAINT \"orders_customer_fk\"",
                "DROP TABLE \"orders\"",
            ]
        );
    }

    #[test]
    fn if_not_exists_inverse_still_drops_the_table() {
        let options = CreateTableOptions {
            if_not_exists: true,
            create_foreign_keys: false,
            create_indices: false,
        };
        let plan = DdlBuilder::default().create_table(&orders(), options).unwrap();
        assert!(plan.up[0].sql.starts_with("CREATE TABLE IF NOT EXISTS \"orders\""));
        assert_eq!(sql(&plan.down), vec!["DROP TABLE \"orders\""]);
    }

    #[test]
    fn drop_table_is_mirror_of_create() {
        let builder = DdlBuilder::default();
        let created = builder
            .create_table(&orders(), CreateTableOptions::default())
            .unwrap();
        let dropped = builder.drop_table(&orders(), DropTableOptions::default()).unwrap();
        assert_eq!(dropped.up, created.down);
        assert_eq!(dropped.down, created.up);
    }

    #[test]
    fn drop_table_with_unnamed_index_is_irreversible() {
        let table = orders().index(TableIndex::new(None, &["id"]));
        let err = DdlBuilder::default()
            .drop_table(&table, DropTableOptions::default())
            .unwrap_err();
        assert!(matches!(err, QueryRunnerError::IrreversibleMutation(_)));
    }

    #[test]
    fn cascade_schema_drop_is_irreversible() {
        assert!(matches!(
            DdlBuilder::default().drop_schema("audit", false, true),
            Err(QueryRunnerError::IrreversibleMutation(_))
        ));
    }
}
