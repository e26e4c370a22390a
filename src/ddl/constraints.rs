use super::{
    DdlBuilder, PlanBuilder, SchemaMutationPlan, Table, TableCheck, TableExclusion,
    TableForeignKey, TableIndex, TableUnique, default_name, quote_columns, quote_identifier,
    require_name,
};
use crate::error::QueryRunnerError;

// Statement fragments shared with the table and column operations.
impl DdlBuilder {
    pub(super) fn primary_key_name_for(&self, table: &Table) -> String {
        table
            .primary_key_name
            .clone()
            .unwrap_or_else(|| default_name(&table.path.name, &[], "pkey"))
    }

    pub(super) fn unique_name_for(&self, table: &Table, unique: &TableUnique) -> String {
        unique
            .name
            .clone()
            .unwrap_or_else(|| default_name(&table.path.name, &unique.columns, "key"))
    }

    /// Anonymous checks are numbered like the server does: `t_check`, `t_check1`, ...
    pub(super) fn check_name_for(&self, table: &Table, check: &TableCheck, ordinal: usize) -> String {
        check.name.clone().unwrap_or_else(|| {
            let base = default_name(&table.path.name, &check.columns, "check");
            if ordinal == 0 { base } else { format!("{base}{ordinal}") }
        })
    }

    pub(super) fn exclusion_name_for(
        &self,
        table: &Table,
        exclusion: &TableExclusion,
        ordinal: usize,
    ) -> String {
        exclusion.name.clone().unwrap_or_else(|| {
            let base = default_name(&table.path.name, &[], "excl");
            if ordinal == 0 { base } else { format!("{base}{ordinal}") }
        })
    }

    pub(super) fn foreign_key_name_for(&self, table: &Table, fk: &TableForeignKey) -> String {
        fk.name
            .clone()
            .unwrap_or_else(|| default_name(&table.path.name, &fk.columns, "fkey"))
    }

    pub(super) fn index_name_for(&self, table: &Table, index: &TableIndex) -> String {
        index
            .name
            .clone()
            .unwrap_or_else(|| default_name(&table.path.name, &index.columns, "idx"))
    }

    pub(super) fn primary_key_clause(&self, name: &str, columns: &[String]) -> String {
        format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_identifier(name),
            quote_columns(columns)
        )
    }

    pub(super) fn unique_clause(&self, name: &str, unique: &TableUnique) -> String {
        let mut sql = format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_identifier(name),
            quote_columns(&unique.columns)
        );
        if let Some(deferrable) = &unique.deferrable {
            sql.push_str(&format!(" DEFERRABLE {deferrable}"));
        }
        sql
    }

    pub(super) fn check_clause(&self, name: &str, check: &TableCheck) -> String {
        format!("CONSTRAINT {} CHECK ({})", quote_identifier(name), check.expression)
    }

    pub(super) fn exclusion_clause(&self, name: &str, exclusion: &TableExclusion) -> String {
        format!("CONSTRAINT {} EXCLUDE {}", quote_identifier(name), exclusion.expression)
    }

    pub(super) fn foreign_key_clause(&self, name: &str, fk: &TableForeignKey) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_identifier(name),
            quote_columns(&fk.columns),
            self.escape_path(&fk.referenced_table),
            quote_columns(&fk.referenced_columns)
        );
        if let Some(action) = &fk.on_delete {
            sql.push_str(&format!(" ON DELETE {action}"));
        }
        if let Some(action) = &fk.on_update {
            sql.push_str(&format!(" ON UPDATE {action}"));
        }
        if let Some(deferrable) = &fk.deferrable {
            sql.push_str(&format!(" DEFERRABLE {deferrable}"));
        }
        sql
    }

    pub(super) fn add_constraint(&self, table: &Table, clause: &str) -> String {
        format!("ALTER TABLE {} ADD {clause}", self.escape_path(&table.path))
    }

    pub(super) fn drop_constraint(&self, table: &Table, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.escape_path(&table.path),
            quote_identifier(name)
        )
    }

    pub(super) fn create_index_sql(&self, table: &Table, name: &str, index: &TableIndex) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {}",
            if index.is_unique { "UNIQUE " } else { "" },
            quote_identifier(name),
            self.escape_path(&table.path)
        );
        if let Some(method) = &index.method {
            sql.push_str(&format!(" USING {method}"));
        }
        sql.push_str(&format!(" ({})", quote_columns(&index.columns)));
        if let Some(predicate) = &index.where_clause {
            sql.push_str(&format!(" WHERE {predicate}"));
        }
        sql
    }

    pub(super) fn drop_index_sql(&self, table: &Table, name: &str) -> String {
        format!("DROP INDEX {}", self.qualify(&table.path, name))
    }

    /// (drop, recreate) statement pairs for a primary key over `columns`.
    pub(super) fn primary_key_step(
        &self,
        plan: &mut PlanBuilder,
        table: &Table,
        name: &str,
        columns: &[String],
        adding: bool,
    ) {
        let add = self.add_constraint(table, &self.primary_key_clause(name, columns));
        let drop = self.drop_constraint(table, name);
        if adding {
            plan.step(add, drop);
        } else {
            plan.step(drop, add);
        }
    }

    fn ensure_columns(&self, table: &Table, columns: &[String]) -> Result<(), QueryRunnerError> {
        match columns.iter().find(|c| table.find_column(c).is_none()) {
            Some(missing) => Err(QueryRunnerError::SchemaObjectNotFound(format!(
                "column \"{missing}\" in table \"{}\"",
                table.path.name
            ))),
            None => Ok(()),
        }
    }
}

// Public constraint and index operations.
impl DdlBuilder {
    /// Add a primary key over `columns`. Without `name`, the table's known key name or
    /// `<table>_pkey` is used.
    ///
    /// # Errors
    /// `SchemaObjectNotFound` if a column does not exist.
    pub fn create_primary_key(
        &self,
        table: &Table,
        columns: &[String],
        name: Option<&str>,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_columns(table, columns)?;
        let name = name.map_or_else(|| self.primary_key_name_for(table), str::to_string);
        let mut plan = PlanBuilder::default();
        self.primary_key_step(&mut plan, table, &name, columns, true);
        Ok(plan.finish())
    }

    /// Replace the primary key's column set.
    ///
    /// # Errors
    /// `IrreversibleMutation` if the table has a key whose name is unknown;
    /// `SchemaObjectNotFound` if a new column does not exist.
    pub fn update_primary_keys(
        &self,
        table: &Table,
        columns: &[String],
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_columns(table, columns)?;
        let current = table.primary_columns();
        let mut plan = PlanBuilder::default();
        if !current.is_empty() {
            let old = require_name(table.primary_key_name.as_deref(), "primary key", &table.path)?;
            self.primary_key_step(&mut plan, table, old, &current, false);
        }
        if !columns.is_empty() {
            let new = self.primary_key_name_for(table);
            self.primary_key_step(&mut plan, table, &new, columns, true);
        }
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the key's constraint name or its columns are unknown.
    pub fn drop_primary_key(&self, table: &Table) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(table.primary_key_name.as_deref(), "primary key", &table.path)?;
        let columns = table.primary_columns();
        if columns.is_empty() {
            return Err(QueryRunnerError::IrreversibleMutation(format!(
                "primary key \"{name}\" on table \"{}\" has no known columns",
                table.path.name
            )));
        }
        let mut plan = PlanBuilder::default();
        self.primary_key_step(&mut plan, table, name, &columns, false);
        Ok(plan.finish())
    }

    /// # Errors
    /// `SchemaObjectNotFound` if a column does not exist.
    pub fn create_unique_constraint(
        &self,
        table: &Table,
        unique: &TableUnique,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_columns(table, &unique.columns)?;
        let name = self.unique_name_for(table, unique);
        let mut plan = PlanBuilder::default();
        plan.step(
            self.add_constraint(table, &self.unique_clause(&name, unique)),
            self.drop_constraint(table, &name),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the constraint has no name.
    pub fn drop_unique_constraint(
        &self,
        table: &Table,
        unique: &TableUnique,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(unique.name.as_deref(), "unique constraint", &table.path)?;
        let mut plan = PlanBuilder::default();
        plan.step(
            self.drop_constraint(table, name),
            self.add_constraint(table, &self.unique_clause(name, unique)),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// Currently infallible; kept fallible like the other constraint operations.
    pub fn create_check_constraint(
        &self,
        table: &Table,
        check: &TableCheck,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = self.check_name_for(table, check, table.checks.len());
        let mut plan = PlanBuilder::default();
        plan.step(
            self.add_constraint(table, &self.check_clause(&name, check)),
            self.drop_constraint(table, &name),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the constraint has no name.
    pub fn drop_check_constraint(
        &self,
        table: &Table,
        check: &TableCheck,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(check.name.as_deref(), "check constraint", &table.path)?;
        let mut plan = PlanBuilder::default();
        plan.step(
            self.drop_constraint(table, name),
            self.add_constraint(table, &self.check_clause(name, check)),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// Currently infallible; kept fallible like the other constraint operations.
    pub fn create_exclusion_constraint(
        &self,
        table: &Table,
        exclusion: &TableExclusion,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = self.exclusion_name_for(table, exclusion, table.exclusions.len());
        let mut plan = PlanBuilder::default();
        plan.step(
            self.add_constraint(table, &self.exclusion_clause(&name, exclusion)),
            self.drop_constraint(table, &name),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the constraint has no name.
    pub fn drop_exclusion_constraint(
        &self,
        table: &Table,
        exclusion: &TableExclusion,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(exclusion.name.as_deref(), "exclusion constraint", &table.path)?;
        let mut plan = PlanBuilder::default();
        plan.step(
            self.drop_constraint(table, name),
            self.add_constraint(table, &self.exclusion_clause(name, exclusion)),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `SchemaObjectNotFound` if a local column does not exist; `InvalidMutation` if the
    /// local and referenced column lists differ in length.
    pub fn create_foreign_key(
        &self,
        table: &Table,
        fk: &TableForeignKey,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_columns(table, &fk.columns)?;
        if fk.columns.len() != fk.referenced_columns.len() {
            return Err(QueryRunnerError::InvalidMutation(format!(
                "foreign key on \"{}\" lists {} columns but references {}",
                table.path.name,
                fk.columns.len(),
                fk.referenced_columns.len()
            )));
        }
        let name = self.foreign_key_name_for(table, fk);
        let mut plan = PlanBuilder::default();
        plan.step(
            self.add_constraint(table, &self.foreign_key_clause(&name, fk)),
            self.drop_constraint(table, &name),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the foreign key has no name.
    pub fn drop_foreign_key(
        &self,
        table: &Table,
        fk: &TableForeignKey,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(fk.name.as_deref(), "foreign key", &table.path)?;
        let mut plan = PlanBuilder::default();
        plan.step(
            self.drop_constraint(table, name),
            self.add_constraint(table, &self.foreign_key_clause(name, fk)),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `SchemaObjectNotFound` if a column does not exist.
    pub fn create_index(
        &self,
        table: &Table,
        index: &TableIndex,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        self.ensure_columns(table, &index.columns)?;
        let name = self.index_name_for(table, index);
        let mut plan = PlanBuilder::default();
        plan.step(
            self.create_index_sql(table, &name, index),
            self.drop_index_sql(table, &name),
        );
        Ok(plan.finish())
    }

    /// # Errors
    /// `IrreversibleMutation` if the index has no name.
    pub fn drop_index(
        &self,
        table: &Table,
        index: &TableIndex,
    ) -> Result<SchemaMutationPlan, QueryRunnerError> {
        let name = require_name(index.name.as_deref(), "index", &table.path)?;
        let mut plan = PlanBuilder::default();
        plan.step(
            self.drop_index_sql(table, name),
            self.create_index_sql(table, name, index),
        );
        Ok(plan.finish())
    }
}
