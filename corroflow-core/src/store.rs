//! SQLite-backed record source
//!
//! Schema mirrors the inspection database: `tmls` holds the measurement
//! points, `measurements` holds dated readings per TML, at most one per date.
//! The tracking query joins the readings of each TML at the two window dates
//! and computes the end category with the same bins as `category::classify`.
//! Databases written before the one-reading-per-date constraint may still
//! hold repeats; the query keeps the latest row for each TML and date.

use crate::category::Category;
use crate::record::{TmlKey, TmlRecord};
use crate::source::{FetchError, RecordSource};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, Row};
use rusqlite::types::Value;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tmls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    circuit_id TEXT NOT NULL,
    tml_id TEXT NOT NULL,
    UNIQUE (circuit_id, tml_id)
);
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tml_record_id INTEGER NOT NULL REFERENCES tmls(id),
    measurement_date TEXT NOT NULL,
    thickness REAL,
    temperature REAL,
    corrosion_rate REAL,
    UNIQUE (tml_record_id, measurement_date)
);
CREATE INDEX IF NOT EXISTS idx_measurements_date ON measurements(measurement_date);
";

// With a single MAX() aggregate SQLite takes bare columns from the row
// holding the maximum, so each CTE yields the latest reading per TML.
const TRACKING_SELECT: &str = "
WITH start AS (
    SELECT tml_record_id, corrosion_rate, MAX(id) AS latest_id
    FROM measurements
    WHERE measurement_date = ?1 AND corrosion_rate IS NOT NULL
    GROUP BY tml_record_id
),
finish AS (
    SELECT tml_record_id, corrosion_rate, MAX(id) AS latest_id
    FROM measurements
    WHERE measurement_date = ?2 AND corrosion_rate IS NOT NULL
    GROUP BY tml_record_id
)
SELECT
    start.tml_record_id,
    tml.circuit_id,
    tml.tml_id,
    start.corrosion_rate,
    finish.corrosion_rate,
    CASE
        WHEN finish.corrosion_rate < 10 THEN '< 10 mpy'
        WHEN finish.corrosion_rate < 20 THEN '10-20 mpy'
        WHEN finish.corrosion_rate < 30 THEN '20-30 mpy'
        WHEN finish.corrosion_rate < 50 THEN '30-50 mpy'
        ELSE '> 50 mpy'
    END
FROM start
JOIN finish ON start.tml_record_id = finish.tml_record_id
JOIN tmls tml ON start.tml_record_id = tml.id";

/// Restricts the tracking query to the (circuit, TML) pairs in the JSON
/// array bound to `?3`, so the key list costs one bound parameter
const TMLS_FILTER: &str = "
WHERE (tml.circuit_id, tml.tml_id) IN (
    SELECT json_extract(value, '$.circuit_id'), json_extract(value, '$.tml_id')
    FROM json_each(?3)
)";

fn tracking_sql(filter: &str) -> String {
    format!("{}{}\nORDER BY start.tml_record_id", TRACKING_SELECT, filter)
}

/// Record source over a SQLite inspection database
pub struct SqliteStore {
    conn: Connection,
    narrow_query: bool,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        let store = SqliteStore {
            conn,
            narrow_query: true,
        };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory database (tests, demos)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let store = SqliteStore {
            conn,
            narrow_query: true,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Enable or disable the TML-filtered query
    pub fn set_narrow_query(&mut self, enabled: bool) {
        self.narrow_query = enabled;
    }

    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("failed to initialize database schema")
    }

    /// Record a reading, creating the TML row on first sight
    ///
    /// A second reading for the same TML and date replaces the first.
    pub fn insert_measurement(
        &self,
        circuit_id: &str,
        tml_id: &str,
        date: NaiveDate,
        corrosion_rate: f64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO tmls (circuit_id, tml_id) VALUES (?1, ?2)",
                params![circuit_id, tml_id],
            )
            .context("failed to insert TML")?;
        let tml_row: i64 = self
            .conn
            .query_row(
                "SELECT id FROM tmls WHERE circuit_id = ?1 AND tml_id = ?2",
                params![circuit_id, tml_id],
                |row| row.get(0),
            )
            .context("failed to look up TML")?;
        let updated = self
            .conn
            .execute(
                "UPDATE measurements SET corrosion_rate = ?3
                 WHERE tml_record_id = ?1 AND measurement_date = ?2",
                params![tml_row, date.to_string(), corrosion_rate],
            )
            .context("failed to update measurement")?;
        if updated == 0 {
            self.conn
                .execute(
                    "INSERT INTO measurements (tml_record_id, measurement_date, corrosion_rate)
                     VALUES (?1, ?2, ?3)",
                    params![tml_row, date.to_string(), corrosion_rate],
                )
                .context("failed to insert measurement")?;
        }
        Ok(())
    }

    fn parse_tracking_row(row: &Row<'_>) -> rusqlite::Result<TmlRecord> {
        let label: String = row.get(5)?;
        Ok(TmlRecord {
            tml_record_id: Some(row.get(0)?),
            circuit_id: row.get(1)?,
            tml_id: row.get(2)?,
            start_rate: row.get(3)?,
            end_rate: row.get(4)?,
            end_category: Category::from_label(&label),
        })
    }

    fn query_tracking(&self, sql: &str, params: Vec<Value>) -> Result<Vec<TmlRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed to prepare tracking query")?;
        let rows = stmt
            .query_map(params_from_iter(params), Self::parse_tracking_row)
            .context("failed to run tracking query")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("failed to read tracking row")?);
        }
        Ok(records)
    }
}

impl RecordSource for SqliteStore {
    fn list_available_periods(&self) -> Result<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT measurement_date FROM measurements")
            .context("failed to prepare period query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to list periods")?;

        let mut periods = Vec::new();
        for row in rows {
            let raw = row.context("failed to read period")?;
            periods.push(crate::window::parse_period(&raw)?);
        }
        periods.sort();
        Ok(periods)
    }

    fn fetch_records(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        ceiling: Option<f64>,
    ) -> Result<Vec<TmlRecord>, FetchError> {
        let mut params = vec![Value::Text(start.to_string()), Value::Text(end.to_string())];
        let sql = match ceiling {
            Some(c) => {
                params.push(Value::Real(c));
                tracking_sql("\nWHERE start.corrosion_rate <= ?3")
            }
            None => tracking_sql(""),
        };
        Ok(self.query_tracking(&sql, params)?)
    }

    fn fetch_records_for_tmls(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        tmls: &[TmlKey],
    ) -> Result<Vec<TmlRecord>, FetchError> {
        if !self.narrow_query {
            return Err(FetchError::Unsupported);
        }
        if tmls.is_empty() {
            return Ok(Vec::new());
        }

        let keys = serde_json::to_string(tmls).context("failed to encode TML keys")?;
        let params = vec![
            Value::Text(start.to_string()),
            Value::Text(end.to_string()),
            Value::Text(keys),
        ];
        Ok(self.query_tracking(&tracking_sql(TMLS_FILTER), params)?)
    }
}
