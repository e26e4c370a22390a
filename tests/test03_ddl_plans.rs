use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use query_runner::prelude::*;
use query_runner::test_utils::RecordingPool;
use regex::Regex;
use tokio::runtime::Runtime;

fn accounts() -> Table {
    Table::new(TablePath::new("accounts"))
        .column(TableColumn::new("id", "bigint").primary())
        .column(TableColumn::new("email", "text").not_null())
        .column(TableColumn::new("owner_id", "bigint"))
        .foreign_key(TableForeignKey::new(
            None,
            &["owner_id"],
            TablePath::new("owners"),
            &["id"],
        ))
        .index(TableIndex::new(None, &["email"]).unique())
}

fn sql(queries: &[Query]) -> Vec<String> {
    queries.iter().map(|q| q.sql.clone()).collect()
}

#[test]
fn plan_and_inverse_run_through_runner() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);

        let plan = runner
            .ddl()
            .create_table(&accounts(), CreateTableOptions::default())?;
        assert_eq!(plan.up.len(), 3);
        assert!(plan.up[1].sql.contains("\"accounts_owner_id_fkey\""));
        assert!(plan.up[2].sql.starts_with("CREATE UNIQUE INDEX \"accounts_email_idx\""));

        runner.execute_plan(&plan).await?;
        assert_eq!(pool.statements(), sql(&plan.up));

        pool.clear_statements();
        runner.execute_plan(&plan.clone().reversed()).await?;
        assert_eq!(
            pool.statements(),
            vec![
                "DROP INDEX \"accounts_email_idx\"",
                "ALTER TABLE \"accounts\" DROP CONSTRAINT \"accounts_owner_id_fkey\"",
                "DROP TABLE \"accounts\"",
            ]
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn dropping_unnamed_primary_key_is_refused_before_any_statement() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let runner = driver.create_query_runner(ReplicationMode::Master);

        let err = runner.ddl().drop_primary_key(&accounts()).unwrap_err();
        assert!(matches!(err, QueryRunnerError::IrreversibleMutation(_)));
        assert!(pool.statements().is_empty());

        let named = accounts().primary_key_name("accounts_pkey");
        let plan = runner.ddl().drop_primary_key(&named)?;
        assert_eq!(
            sql(&plan.up),
            vec!["ALTER TABLE \"accounts\" DROP CONSTRAINT \"accounts_pkey\""]
        );
        assert_eq!(
            sql(&plan.down),
            vec!["ALTER TABLE \"accounts\" ADD CONSTRAINT \"accounts_pkey\" PRIMARY KEY (\"id\")"]
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn failing_step_stops_the_plan() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);
        pool.fail_once(
            "ALTER TABLE",
            DriverError::new("relation \"owners\" does not exist").with_code("42P01"),
        );

        let plan = runner
            .ddl()
            .create_table(&accounts(), CreateTableOptions::default())?;
        let err = runner.execute_plan(&plan).await.unwrap_err();
        assert_eq!(err.statement(), Some(plan.up[1].sql.as_str()));
        assert_eq!(pool.statements(), sql(&plan.up[..2]));
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn sql_memory_records_instead_of_executing() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);

        runner.enable_sql_memory();
        let schema = runner.ddl().create_schema("billing", true);
        let table = runner.ddl().create_table(
            &Table::new(TablePath::new("invoices").in_schema("billing"))
                .column(TableColumn::new("id", "bigint").primary()),
            CreateTableOptions::default(),
        )?;
        runner.execute_plan(&schema).await?;
        runner.execute_plan(&table).await?;
        assert!(pool.statements().is_empty());

        let memory = runner.memory_sql();
        assert_eq!(
            sql(&memory.up),
            vec![
                "CREATE SCHEMA IF NOT EXISTS \"billing\"",
                "CREATE TABLE \"billing\".\"invoices\" (\"id\" bigint NOT NULL, CONSTRAINT \"invoices_pkey\" PRIMARY KEY (\"id\"))",
            ]
        );
        assert_eq!(
            sql(&memory.down),
            vec!["DROP TABLE \"billing\".\"invoices\"", "DROP SCHEMA \"billing\""]
        );

        runner.clear_sql_memory();
        assert!(runner.memory_sql().is_empty());
        runner.disable_sql_memory();
        runner.execute_plan(&schema).await?;
        assert_eq!(pool.statements(), vec!["CREATE SCHEMA IF NOT EXISTS \"billing\""]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn default_schema_qualifies_unqualified_paths() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(
            pool.shared(),
            RunnerConfig::default().with_default_schema("app"),
        ));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);

        let plan = runner.ddl().rename_table(&accounts(), "customers")?;
        assert_eq!(
            sql(&plan.up),
            vec!["ALTER TABLE \"app\".\"accounts\" RENAME TO \"customers\""]
        );
        assert_eq!(
            sql(&plan.down),
            vec!["ALTER TABLE \"app\".\"customers\" RENAME TO \"accounts\""]
        );

        runner.clear_table(&TablePath::new("accounts")).await?;
        assert_eq!(pool.statements(), vec!["TRUNCATE TABLE \"app\".\"accounts\""]);
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

/// Catalog view of one table, rebuilt by replaying the statements a client received.
///
/// `DROP COLUMN` removes every constraint and index that reads the column, as the
/// server does, so an inverse that forgets one of them shows up as a difference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CatalogModel {
    exists: bool,
    columns: BTreeMap<String, ColumnState>,
    /// `constraint:<name>` / `index:<name>` to the columns it reads
    objects: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ColumnState {
    sql_type: String,
    nullable: bool,
    default: Option<String>,
    comment: Option<String>,
}

fn captures<'a>(pattern: &str, sql: &'a str) -> Option<regex::Captures<'a>> {
    Regex::new(pattern).ok()?.captures(sql)
}

fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let (mut depth, mut start) = (0usize, 0usize);
    for (i, ch) in body.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(body[start..].trim());
    parts
}

fn parse_column(definition: &str) -> ColumnState {
    let end = [" NOT NULL", " DEFAULT ", " COLLATE ", " GENERATED "]
        .iter()
        .filter_map(|marker| definition.find(marker))
        .min()
        .unwrap_or(definition.len());
    ColumnState {
        sql_type: definition[..end].to_string(),
        nullable: !definition.contains(" NOT NULL"),
        default: definition.split_once(" DEFAULT ").map(|(_, d)| d.to_string()),
        comment: None,
    }
}

impl CatalogModel {
    fn reads(&self, text: &str) -> BTreeSet<String> {
        let local = text.split(" REFERENCES ").next().unwrap_or(text);
        self.columns
            .keys()
            .filter(|column| {
                let word = format!(r"(^|[^A-Za-z0-9_]){}([^A-Za-z0-9_]|$)", regex::escape(column));
                Regex::new(&word).is_ok_and(|re| re.is_match(local))
            })
            .cloned()
            .collect()
    }

    fn add_object(&mut self, key: String, text: &str) -> Result<(), String> {
        let reads = self.reads(text);
        if self.objects.insert(key.clone(), reads).is_some() {
            return Err(format!("{key} already exists"));
        }
        Ok(())
    }

    fn remove_object(&mut self, key: &str) -> Result<(), String> {
        self.objects.remove(key).map(|_| ()).ok_or_else(|| format!("{key} does not exist"))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut ColumnState, String> {
        self.columns.get_mut(name).ok_or_else(|| format!("column {name} does not exist"))
    }

    fn apply(&mut self, sql: &str) -> Result<(), String> {
        if let Some(c) = captures(r#"^CREATE TABLE (?:IF NOT EXISTS )?\S+ \((.*)\)$"#, sql) {
            if self.exists {
                return Err("table already exists".into());
            }
            self.exists = true;
            let parts = split_top_level(c.get(1).map_or("", |m| m.as_str()));
            for part in parts.iter().filter(|p| !p.starts_with("CONSTRAINT ")) {
                if let Some(c) = captures(r#"^"([^"]+)" (.+)$"#, part) {
                    self.columns.insert(c[1].to_string(), parse_column(&c[2]));
                }
            }
            for part in parts.iter().filter(|p| p.starts_with("CONSTRAINT ")) {
                if let Some(c) = captures(r#"^CONSTRAINT "([^"]+)" (.+)$"#, part) {
                    self.add_object(format!("constraint:{}", &c[1]), &c[2])?;
                }
            }
        } else if captures(r"^DROP TABLE (?:IF EXISTS )?\S+$", sql).is_some() {
            if !self.exists {
                return Err("table does not exist".into());
            }
            *self = CatalogModel::default();
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ ADD CONSTRAINT "([^"]+)" (.+)$"#, sql) {
            self.add_object(format!("constraint:{}", &c[1]), &c[2])?;
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ DROP CONSTRAINT "([^"]+)"$"#, sql) {
            self.remove_object(&format!("constraint:{}", &c[1]))?;
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ DROP COLUMN "([^"]+)"$"#, sql) {
            let column = c[1].to_string();
            self.columns.remove(&column).ok_or_else(|| format!("column {column} does not exist"))?;
            self.objects.retain(|_, reads| !reads.contains(&column));
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ ADD "([^"]+)" (.+)$"#, sql) {
            if self.columns.insert(c[1].to_string(), parse_column(&c[2])).is_some() {
                return Err(format!("column {} already exists", &c[1]));
            }
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ RENAME COLUMN "([^"]+)" TO "([^"]+)"$"#, sql) {
            let (from, to) = (c[1].to_string(), c[2].to_string());
            let state = self.columns.remove(&from).ok_or_else(|| format!("column {from} does not exist"))?;
            self.columns.insert(to.clone(), state);
            for reads in self.objects.values_mut() {
                if reads.remove(&from) {
                    reads.insert(to.clone());
                }
            }
        } else if let Some(c) = captures(r#"^ALTER TABLE \S+ ALTER COLUMN "([^"]+)" (.+)$"#, sql) {
            let action = c[2].to_string();
            let column = self.column_mut(&c[1])?;
            match action.as_str() {
                "SET NOT NULL" => column.nullable = false,
                "DROP NOT NULL" => column.nullable = true,
                "DROP DEFAULT" => column.default = None,
                other => {
                    if let Some(default) = other.strip_prefix("SET DEFAULT ") {
                        column.default = Some(default.to_string());
                    } else if let Some(retype) = other.strip_prefix("TYPE ") {
                        let sql_type = retype.split(" USING ").next().unwrap_or(retype);
                        column.sql_type = sql_type.to_string();
                    } else {
                        return Err(format!("unsupported column change: {other}"));
                    }
                }
            }
        } else if let Some(c) = captures(r#"^CREATE (?:UNIQUE )?INDEX "([^"]+)" ON \S+(.*)$"#, sql) {
            self.add_object(format!("index:{}", &c[1]), &c[2])?;
        } else if let Some(c) = captures(r#"^DROP INDEX (?:\S+\.)?"([^"]+)"$"#, sql) {
            self.remove_object(&format!("index:{}", &c[1]))?;
        } else if let Some(c) = captures(r#"^COMMENT ON COLUMN .*\."([^"]+)" IS (.+)$"#, sql) {
            let comment = (&c[2] != "NULL").then(|| c[2].to_string());
            self.column_mut(&c[1])?.comment = comment;
        } else if !sql.starts_with("COMMENT ON TABLE ") {
            return Err(format!("statement not understood: {sql}"));
        }
        Ok(())
    }

    fn replay(&mut self, statements: &[String]) -> Result<(), String> {
        statements.iter().try_for_each(|sql| self.apply(sql))
    }
}

fn bookings() -> Table {
    Table::new(TablePath::new("bookings"))
        .column(TableColumn::new("id", "bigint").primary())
        .column(TableColumn::new("room", "text").not_null())
        .column(TableColumn::new("age", "integer"))
        .column(TableColumn::new("during", "tstzrange"))
        .column(TableColumn::new("note", "text").comment("free text"))
        .unique(TableUnique::new(Some("bookings_note_key"), &["note"]))
        .check(TableCheck::new(Some("bookings_age_positive"), "age > 0").on_columns(&["age"]))
        .exclusion(
            TableExclusion::new(
                Some("bookings_no_overlap"),
                "USING gist (\"room\" WITH =, \"during\" WITH &&)",
            )
            .on_columns(&["room", "during"]),
        )
        .foreign_key(TableForeignKey::new(
            Some("bookings_room_fk"),
            &["room"],
            TablePath::new("rooms"),
            &["id"],
        ))
        .index(TableIndex::new(Some("bookings_room_idx"), &["room"]))
        .primary_key_name("bookings_pkey")
}

/// Create `table`, run `plan` forward and then its inverse through a session, and
/// replay what the client received: catalog before, after forward, after inverse.
fn round_trip(
    table: &Table,
    plan: &SchemaMutationPlan,
) -> Result<(CatalogModel, CatalogModel, CatalogModel), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let pool = RecordingPool::new("primary");
        let driver = Arc::new(Driver::new(pool.shared(), RunnerConfig::default()));
        let mut runner = driver.create_query_runner(ReplicationMode::Master);

        let create = runner.ddl().create_table(table, CreateTableOptions::default())?;
        runner.execute_plan(&create).await?;
        let created = pool.statements().len();
        runner.execute_plan(plan).await?;
        let forward = pool.statements().len();
        runner.execute_plan(&plan.clone().reversed()).await?;
        let statements = pool.statements();

        let mut model = CatalogModel::default();
        model.replay(&statements[..created])?;
        let before = model.clone();
        model.replay(&statements[created..forward])?;
        let after = model.clone();
        model.replay(&statements[forward..])?;
        Ok::<_, Box<dyn std::error::Error>>((before, after, model))
    })
}

fn assert_restores(plan: &SchemaMutationPlan) -> Result<CatalogModel, Box<dyn std::error::Error>> {
    let (before, after, restored) = round_trip(&bookings(), plan)?;
    assert_ne!(before, after, "forward plan changed nothing");
    assert_eq!(restored, before);
    Ok(after)
}

#[test]
fn dropping_a_column_restores_exclusion_reading_it() -> Result<(), Box<dyn std::error::Error>> {
    let plan = DdlBuilder::default().drop_column(&bookings(), "during")?;
    let after = assert_restores(&plan)?;
    assert!(!after.objects.contains_key("constraint:bookings_no_overlap"));
    Ok(())
}

#[test]
fn dropping_a_column_restores_check_reading_it() -> Result<(), Box<dyn std::error::Error>> {
    let plan = DdlBuilder::default().drop_column(&bookings(), "age")?;
    let after = assert_restores(&plan)?;
    assert!(!after.objects.contains_key("constraint:bookings_age_positive"));
    Ok(())
}

#[test]
fn dropping_several_columns_restores_every_dependent() -> Result<(), Box<dyn std::error::Error>> {
    let plan = DdlBuilder::default().drop_columns(&bookings(), &["room", "age"])?;
    let after = assert_restores(&plan)?;
    assert_eq!(
        after.objects.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["constraint:bookings_note_key", "constraint:bookings_pkey"]
    );
    Ok(())
}

#[test]
fn changing_a_column_is_undone_attribute_by_attribute() -> Result<(), Box<dyn std::error::Error>> {
    let changed = TableColumn::new("remark", "varchar(200)")
        .not_null()
        .default_value("''")
        .comment("shown to guests");
    let plan = DdlBuilder::default().change_column(&bookings(), "note", &changed)?;
    let after = assert_restores(&plan)?;
    assert_eq!(
        after.columns.get("remark"),
        Some(&ColumnState {
            sql_type: "varchar(200)".into(),
            nullable: false,
            default: Some("''".into()),
            comment: Some("'shown to guests'".into()),
        })
    );
    Ok(())
}

#[test]
fn replacing_primary_key_columns_is_undone() -> Result<(), Box<dyn std::error::Error>> {
    let columns = ["id".to_string(), "room".to_string()];
    let plan = DdlBuilder::default().update_primary_keys(&bookings(), &columns)?;
    let after = assert_restores(&plan)?;
    assert_eq!(
        after.objects.get("constraint:bookings_pkey"),
        Some(&BTreeSet::from(["id".to_string(), "room".to_string()]))
    );
    Ok(())
}

#[test]
fn dropping_the_table_is_undone() -> Result<(), Box<dyn std::error::Error>> {
    let plan = DdlBuilder::default().drop_table(&bookings(), DropTableOptions::default())?;
    let after = assert_restores(&plan)?;
    assert!(!after.exists);
    Ok(())
}

#[test]
fn column_drop_with_unlisted_check_columns_is_refused() {
    let table = bookings().check(TableCheck::new(Some("bookings_sane"), "length(note) < 500"));
    assert!(matches!(
        DdlBuilder::default().drop_column(&table, "during"),
        Err(QueryRunnerError::IrreversibleMutation(_))
    ));
    let table = bookings().exclusion(TableExclusion::new(
        Some("bookings_one_note"),
        "USING gist (\"note\" WITH =)",
    ));
    assert!(matches!(
        DdlBuilder::default().drop_columns(&table, &["age"]),
        Err(QueryRunnerError::IrreversibleMutation(_))
    ));
}
