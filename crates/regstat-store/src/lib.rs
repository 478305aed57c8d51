use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regstat_config::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_DATABASE_FILE, regstat_dir};
use regstat_core::{
    Attribute, CanonicalEntity, CategoryId, Dimension, NumericAttribute, YearRecord,
    normalize_code,
};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::{Connection, OptionalExtension, ToSql, params, params_from_iter};
use thiserror::Error;

mod regularization;

pub use regularization::RegularizationStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// One raw registration row as delivered by the import pipeline. Category
/// values are free-form codes; they are normalized and assigned ids on write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrationRecord {
    pub year: i32,
    pub make: Option<String>,
    pub model: Option<String>,
    pub model_year: Option<String>,
    pub fuel_type: Option<String>,
    pub vehicle_type: Option<String>,
    pub net_mass: Option<f64>,
    pub displacement: Option<f64>,
    pub cylinder_count: Option<i64>,
}

/// Grouped curated-year row used to build the canonical hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HierarchyRow {
    pub make: Option<CategoryId>,
    pub model: Option<CategoryId>,
    pub model_year: Option<CategoryId>,
    pub fuel_type: Option<CategoryId>,
    pub vehicle_type: Option<CategoryId>,
    pub rows: i64,
}

/// Bind value of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
        })
    }
}

/// Parameterized aggregate query. Must select, in order: `year`,
/// `category` (nullable integer), `value` (nullable number), `row_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateRow {
    pub year: i32,
    pub category: Option<CategoryId>,
    pub value: Option<f64>,
    pub row_count: i64,
}

pub trait Store {
    /// Monotonic counter bumped by every write to registrations, years or
    /// mappings.
    fn data_version(&self) -> Result<u64, StoreError>;

    fn ensure_category(
        &self,
        dimension: Dimension,
        code: &str,
        display_name: Option<&str>,
    ) -> Result<CategoryId, StoreError>;
    fn list_categories(&self, dimension: Dimension) -> Result<Vec<CanonicalEntity>, StoreError>;

    fn list_years(&self) -> Result<Vec<YearRecord>, StoreError>;
    fn set_year_curated(&self, year: i32, curated: bool) -> Result<YearRecord, StoreError>;

    fn insert_registrations(&self, rows: &[RegistrationRecord]) -> Result<usize, StoreError>;

    fn curated_hierarchy_rows(&self) -> Result<Vec<HierarchyRow>, StoreError>;
    /// Non-null values of a dimension column, optionally restricted to a make,
    /// a model and to rows of curated years.
    fn distinct_values(
        &self,
        dimension: Dimension,
        make: Option<CategoryId>,
        model: Option<CategoryId>,
        curated_only: bool,
    ) -> Result<Vec<CategoryId>, StoreError>;

    fn aggregate(&self, query: &SqlQuery) -> Result<Vec<AggregateRow>, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Opens the default database under `<workspace>/.regstat/`.
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = regstat_dir(workspace_root).join(DEFAULT_DATABASE_FILE);
        Self::open_path(db_path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
    }

    pub fn open_path(
        db_path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(busy_timeout)?;
        run_migrations(&conn)?;

        Ok(Self { conn, db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `read` inside one read transaction and returns the data version
    /// observed in that same transaction, so callers can tag what they build.
    pub fn read_snapshot<T>(
        &self,
        read: impl FnOnce(&Self) -> Result<T, StoreError>,
    ) -> Result<(u64, T), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let version = read_data_version(&tx)?;
        let value = read(self)?;
        tx.commit()?;
        Ok((version, value))
    }

    /// Number of rows in the registrations table. Mostly useful to tests and
    /// the CLI status line.
    pub fn registration_count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM registrations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Query plan detail lines, used to check that the hierarchy build is
    /// served by its covering index.
    pub fn explain_query_plan(&self, sql: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(3))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn data_version(&self) -> Result<u64, StoreError> {
        read_data_version(&self.conn)
    }

    fn ensure_category(
        &self,
        dimension: Dimension,
        code: &str,
        display_name: Option<&str>,
    ) -> Result<CategoryId, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let (id, created) = ensure_category_in(&tx, dimension, code, display_name)?;
        if created {
            bump_data_version(&tx)?;
        }
        tx.commit()?;
        Ok(id)
    }

    fn list_categories(&self, dimension: Dimension) -> Result<Vec<CanonicalEntity>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, code, display_name FROM {} ORDER BY id",
            dimension_table(dimension)
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok(CanonicalEntity {
                kind: dimension,
                id: CategoryId(row.get(0)?),
                code: row.get(1)?,
                display_name: row.get(2)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn list_years(&self) -> Result<Vec<YearRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, year, curated FROM years ORDER BY year")?;
        let rows = stmt.query_map([], |row| {
            Ok(YearRecord {
                id: CategoryId(row.get(0)?),
                year: row.get(1)?,
                curated: row.get::<_, i64>(2)? != 0,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn set_year_curated(&self, year: i32, curated: bool) -> Result<YearRecord, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let id = ensure_year_in(&tx, year)?;
        tx.execute(
            "UPDATE years SET curated = ?1 WHERE id = ?2",
            params![curated as i64, id.get()],
        )?;
        bump_data_version(&tx)?;
        tx.commit()?;

        Ok(YearRecord { id, year, curated })
    }

    fn insert_registrations(&self, rows: &[RegistrationRecord]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO registrations (
                    year_id, make_id, model_id, model_year_id, fuel_type_id, vehicle_type_id,
                    net_mass, displacement, cylinder_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for row in rows {
                let year_id = ensure_year_in(&tx, row.year)?;
                let make = optional_category(&tx, Dimension::Make, row.make.as_deref())?;
                let model = optional_category(&tx, Dimension::Model, row.model.as_deref())?;
                let model_year =
                    optional_category(&tx, Dimension::ModelYear, row.model_year.as_deref())?;
                let fuel_type =
                    optional_category(&tx, Dimension::FuelType, row.fuel_type.as_deref())?;
                let vehicle_type =
                    optional_category(&tx, Dimension::VehicleType, row.vehicle_type.as_deref())?;

                insert.execute(params![
                    year_id.get(),
                    make.map(CategoryId::get),
                    model.map(CategoryId::get),
                    model_year.map(CategoryId::get),
                    fuel_type.map(CategoryId::get),
                    vehicle_type.map(CategoryId::get),
                    row.net_mass,
                    row.displacement,
                    row.cylinder_count,
                ])?;
            }
        }
        bump_data_version(&tx)?;
        tx.commit()?;

        tracing::debug!(rows = rows.len(), "inserted registration batch");
        Ok(rows.len())
    }

    fn curated_hierarchy_rows(&self) -> Result<Vec<HierarchyRow>, StoreError> {
        let mut stmt = self.conn.prepare(CURATED_HIERARCHY_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(HierarchyRow {
                make: row.get::<_, Option<i64>>(0)?.map(CategoryId),
                model: row.get::<_, Option<i64>>(1)?.map(CategoryId),
                model_year: row.get::<_, Option<i64>>(2)?.map(CategoryId),
                fuel_type: row.get::<_, Option<i64>>(3)?.map(CategoryId),
                vehicle_type: row.get::<_, Option<i64>>(4)?.map(CategoryId),
                rows: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn distinct_values(
        &self,
        dimension: Dimension,
        make: Option<CategoryId>,
        model: Option<CategoryId>,
        curated_only: bool,
    ) -> Result<Vec<CategoryId>, StoreError> {
        let column = dimension_column(dimension);
        let sql = format!(
            r#"
            SELECT DISTINCT {column}
            FROM registrations
            WHERE {column} IS NOT NULL
              AND (?1 IS NULL OR make_id = ?1)
              AND (?2 IS NULL OR model_id = ?2)
              AND (?3 = 0 OR year_id IN (SELECT id FROM years WHERE curated = 1))
            ORDER BY {column}
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                make.map(CategoryId::get),
                model.map(CategoryId::get),
                curated_only
            ],
            |row| Ok(CategoryId(row.get(0)?)),
        )?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn aggregate(&self, query: &SqlQuery) -> Result<Vec<AggregateRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&query.sql)?;
        let rows = stmt.query_map(params_from_iter(query.binds.iter()), |row| {
            Ok(AggregateRow {
                year: row.get(0)?,
                category: row.get::<_, Option<i64>>(1)?.map(CategoryId),
                value: row.get(2)?,
                row_count: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// Grouping query behind the canonical hierarchy. Served entirely by
/// `idx_registrations_hierarchy`.
pub const CURATED_HIERARCHY_SQL: &str = r#"
    SELECT r.make_id, r.model_id, r.model_year_id, r.fuel_type_id, r.vehicle_type_id, COUNT(*)
    FROM registrations r
    WHERE r.year_id IN (SELECT id FROM years WHERE curated = 1)
    GROUP BY r.make_id, r.model_id, r.model_year_id, r.fuel_type_id, r.vehicle_type_id
"#;

pub fn dimension_table(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Make => "makes",
        Dimension::Model => "models",
        Dimension::ModelYear => "model_years",
        Dimension::FuelType => "fuel_types",
        Dimension::VehicleType => "vehicle_types",
    }
}

/// Column of `registrations` holding the dimension's id.
pub fn dimension_column(dimension: Dimension) -> &'static str {
    match dimension {
        Dimension::Make => "make_id",
        Dimension::Model => "model_id",
        Dimension::ModelYear => "model_year_id",
        Dimension::FuelType => "fuel_type_id",
        Dimension::VehicleType => "vehicle_type_id",
    }
}

pub fn numeric_column(attribute: NumericAttribute) -> &'static str {
    match attribute {
        NumericAttribute::NetMass => "net_mass",
        NumericAttribute::Displacement => "displacement",
        NumericAttribute::CylinderCount => "cylinder_count",
    }
}

pub fn attribute_column(attribute: Attribute) -> &'static str {
    match attribute {
        Attribute::Make => dimension_column(Dimension::Make),
        Attribute::Model => dimension_column(Dimension::Model),
        Attribute::ModelYear => dimension_column(Dimension::ModelYear),
        Attribute::FuelType => dimension_column(Dimension::FuelType),
        Attribute::VehicleType => dimension_column(Dimension::VehicleType),
        Attribute::NetMass => numeric_column(NumericAttribute::NetMass),
        Attribute::Displacement => numeric_column(NumericAttribute::Displacement),
        Attribute::CylinderCount => numeric_column(NumericAttribute::CylinderCount),
    }
}

pub(crate) fn bump_data_version(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE store_meta SET value = value + 1 WHERE key = 'data_version'",
        [],
    )?;
    Ok(())
}

fn read_data_version(conn: &Connection) -> Result<u64, StoreError> {
    let version: i64 = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'data_version'",
        [],
        |row| row.get(0),
    )?;
    Ok(version as u64)
}

fn ensure_year_in(conn: &Connection, year: i32) -> Result<CategoryId, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO years (year, curated) VALUES (?1, 0)",
        params![year],
    )?;
    let id = conn.query_row(
        "SELECT id FROM years WHERE year = ?1",
        params![year],
        |row| row.get(0),
    )?;
    Ok(CategoryId(id))
}

fn ensure_category_in(
    conn: &Connection,
    dimension: Dimension,
    code: &str,
    display_name: Option<&str>,
) -> Result<(CategoryId, bool), StoreError> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(StoreError::InvalidData(format!(
            "empty {} code",
            dimension.as_str()
        )));
    }

    let table = dimension_table(dimension);
    let existing = conn
        .query_row(
            &format!("SELECT id FROM {table} WHERE code = ?1"),
            params![code],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((CategoryId(id), false));
    }

    let display_name = display_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(code.as_str());
    conn.execute(
        &format!("INSERT INTO {table} (code, display_name) VALUES (?1, ?2)"),
        params![code, display_name],
    )?;

    Ok((CategoryId(conn.last_insert_rowid()), true))
}

fn optional_category(
    conn: &Connection,
    dimension: Dimension,
    code: Option<&str>,
) -> Result<Option<CategoryId>, StoreError> {
    match code.map(str::trim).filter(|code| !code.is_empty()) {
        Some(code) => Ok(Some(ensure_category_in(conn, dimension, code, None)?.0)),
        None => Ok(None),
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO store_meta (key, value) VALUES ('data_version', 0);

        CREATE TABLE IF NOT EXISTS years (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL UNIQUE,
            curated INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS makes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS models (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS model_years (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fuel_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vehicle_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS registrations (
            id INTEGER PRIMARY KEY,
            year_id INTEGER NOT NULL REFERENCES years(id),
            make_id INTEGER REFERENCES makes(id),
            model_id INTEGER REFERENCES models(id),
            model_year_id INTEGER REFERENCES model_years(id),
            fuel_type_id INTEGER REFERENCES fuel_types(id),
            vehicle_type_id INTEGER REFERENCES vehicle_types(id),
            net_mass REAL,
            displacement REAL,
            cylinder_count INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_registrations_hierarchy
            ON registrations (year_id, make_id, model_id, model_year_id, fuel_type_id, vehicle_type_id);
        CREATE INDEX IF NOT EXISTS idx_registrations_pair
            ON registrations (make_id, model_id, model_year_id, year_id);
        CREATE INDEX IF NOT EXISTS idx_registrations_vehicle_type
            ON registrations (vehicle_type_id, year_id);
        CREATE INDEX IF NOT EXISTS idx_registrations_fuel_type
            ON registrations (fuel_type_id, year_id);

        CREATE TABLE IF NOT EXISTS wildcard_mappings (
            uncurated_make_id INTEGER NOT NULL REFERENCES makes(id),
            uncurated_model_id INTEGER NOT NULL REFERENCES models(id),
            canonical_make_id INTEGER NOT NULL REFERENCES makes(id),
            canonical_model_id INTEGER NOT NULL REFERENCES models(id),
            vehicle_type_state TEXT NOT NULL
                CHECK (vehicle_type_state IN ('unreviewed', 'unknown', 'assigned')),
            vehicle_type_id INTEGER REFERENCES vehicle_types(id),
            PRIMARY KEY (uncurated_make_id, uncurated_model_id),
            CHECK ((vehicle_type_state = 'assigned') = (vehicle_type_id IS NOT NULL))
        );
        CREATE INDEX IF NOT EXISTS idx_wildcard_vehicle_type
            ON wildcard_mappings (vehicle_type_id, uncurated_make_id, uncurated_model_id);

        CREATE TABLE IF NOT EXISTS triplet_mappings (
            uncurated_make_id INTEGER NOT NULL,
            uncurated_model_id INTEGER NOT NULL,
            model_year_id INTEGER NOT NULL REFERENCES model_years(id),
            fuel_type_state TEXT NOT NULL
                CHECK (fuel_type_state IN ('unreviewed', 'unknown', 'assigned')),
            fuel_type_id INTEGER REFERENCES fuel_types(id),
            PRIMARY KEY (uncurated_make_id, uncurated_model_id, model_year_id),
            CHECK ((fuel_type_state = 'assigned') = (fuel_type_id IS NOT NULL))
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn record(year: i32, make: &str, model: &str, model_year: &str) -> RegistrationRecord {
        RegistrationRecord {
            year,
            make: Some(make.to_owned()),
            model: Some(model.to_owned()),
            model_year: Some(model_year.to_owned()),
            fuel_type: Some("GASOLINE".to_owned()),
            vehicle_type: Some("CAR".to_owned()),
            net_mass: Some(1_200.0),
            ..RegistrationRecord::default()
        }
    }

    #[test]
    fn store_creates_database_and_persists_rows() {
        let temp = tempdir().expect("tempdir");
        let workspace = temp.path();

        let store = SqliteStore::open(workspace).expect("open store");
        assert!(workspace.join(".regstat/regstat.sqlite").exists());
        assert_eq!(store.data_version().expect("initial version"), 0);

        store
            .insert_registrations(&[
                record(2020, "honda", "civic", "2019"),
                record(2020, "HONDA", "CIVIC", "2020"),
            ])
            .expect("insert rows");
        assert_eq!(store.registration_count().expect("count"), 2);

        let makes = store.list_categories(Dimension::Make).expect("list makes");
        assert_eq!(makes.len(), 1);
        assert_eq!(makes[0].code, "HONDA");

        drop(store);

        let reopened = SqliteStore::open(workspace).expect("reopen store");
        assert_eq!(reopened.registration_count().expect("count"), 2);
        assert_eq!(reopened.data_version().expect("version after reopen"), 1);
    }

    #[test]
    fn every_write_kind_bumps_data_version() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        let v0 = store.data_version().expect("v0");
        store
            .insert_registrations(&[record(2019, "TOYOTA", "COROLLA", "2018")])
            .expect("insert");
        let v1 = store.data_version().expect("v1");
        store.set_year_curated(2019, true).expect("curate");
        let v2 = store.data_version().expect("v2");
        store
            .ensure_category(Dimension::VehicleType, "BUS", Some("Bus"))
            .expect("new category");
        let v3 = store.data_version().expect("v3");
        store
            .ensure_category(Dimension::VehicleType, "bus", None)
            .expect("existing category");
        let v4 = store.data_version().expect("v4");

        assert!(v0 < v1 && v1 < v2 && v2 < v3);
        assert_eq!(v3, v4);
    }

    #[test]
    fn category_ids_are_never_reused() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        let first = store
            .ensure_category(Dimension::Make, "NOVA", None)
            .expect("first");
        store
            .connection()
            .execute("DELETE FROM makes WHERE id = ?1", params![first.get()])
            .expect("delete make");
        let second = store
            .ensure_category(Dimension::Make, "PREVOST", None)
            .expect("second");

        assert!(second > first);
    }

    #[test]
    fn year_curation_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store.set_year_curated(2011, true).expect("curate 2011");
        store.set_year_curated(2012, false).expect("uncurate 2012");
        let updated = store.set_year_curated(2011, false).expect("flip 2011");
        assert!(!updated.curated);

        let years = store.list_years().expect("list years");
        assert_eq!(
            years.iter().map(|year| (year.year, year.curated)).collect::<Vec<_>>(),
            vec![(2011, false), (2012, false)]
        );
    }

    #[test]
    fn hierarchy_rows_only_come_from_curated_years() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        store
            .insert_registrations(&[
                record(2015, "HONDA", "CIVIC", "2014"),
                record(2015, "HONDA", "CIVIC", "2014"),
                record(2016, "HONDA", "CIVC", "2015"),
            ])
            .expect("insert");
        store.set_year_curated(2015, true).expect("curate 2015");

        let rows = store.curated_hierarchy_rows().expect("hierarchy rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rows, 2);
    }

    #[test]
    fn hierarchy_query_uses_covering_index() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");

        let plan = store
            .explain_query_plan(CURATED_HIERARCHY_SQL)
            .expect("explain plan");
        assert!(
            plan.iter()
                .any(|detail| detail.contains("idx_registrations_hierarchy")),
            "plan did not use the hierarchy index: {plan:?}"
        );
    }

    #[test]
    fn read_snapshot_reports_version_of_its_transaction() {
        let temp = tempdir().expect("tempdir");
        let store = SqliteStore::open(temp.path()).expect("open store");
        store
            .insert_registrations(&[record(2020, "KIA", "RIO", "2020")])
            .expect("insert");

        let (version, years) = store
            .read_snapshot(|store| store.list_years())
            .expect("snapshot");
        assert_eq!(version, store.data_version().expect("version"));
        assert_eq!(years.len(), 1);
    }
}
