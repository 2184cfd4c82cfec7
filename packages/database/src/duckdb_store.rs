//! Zone aggregate stores backed by `DuckDB`.
//!
//! One connection serves all three store contracts. `duckdb::Connection`
//! is `Send` but not `Sync`, so it is wrapped in a `Mutex`; no lock is
//! ever held across an `.await`. Every write is an `ON CONFLICT DO UPDATE`
//! upsert, so concurrent identical computations settle on the last write.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use duckdb::types::Value as SqlValue;
use zonestat_aggregates::StoreError;
use zonestat_aggregates::store::{GeoAggregateStore, ZoneAggregateStore, ZoneGeoMapStore};
use zonestat_aggregates_models::{
    GeoAggregateValue, GeoValuesQuery, ZoneAggregateKey, ZoneAggregateRecord, ZoneGeoWeight,
    ZoneGeoWeightRecord,
};

use crate::DbError;

/// Maximum number of geo codes bound into a single `IN (...)` list.
const GEO_CODE_CHUNK: usize = 1000;

/// All three store contracts over a single `DuckDB` connection.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        log::info!("Opening aggregates DuckDB at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens the store at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&crate::default_db_path())
    }

    /// Opens a transient in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Conversion {
            message: "DuckDB connection mutex poisoned".to_string(),
        })
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS zone_aggregates (
            zone_id TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            params_hash TEXT NOT NULL,
            coverage DOUBLE NOT NULL,
            source TEXT NOT NULL,
            source_version TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (zone_id, aggregate_id, period_year, params_hash)
        );
        CREATE TABLE IF NOT EXISTS geo_aggregate_values (
            aggregate_id TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            geo_level TEXT NOT NULL,
            geo_code TEXT NOT NULL,
            params_hash TEXT NOT NULL,
            params_family_hash TEXT NOT NULL,
            source TEXT NOT NULL,
            source_version TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (aggregate_id, period_year, geo_level, geo_code, params_hash)
        );
        CREATE INDEX IF NOT EXISTS idx_geo_aggregate_values_family
            ON geo_aggregate_values (aggregate_id, params_family_hash);
        CREATE TABLE IF NOT EXISTS zone_geo_weights (
            zone_id TEXT NOT NULL,
            geo_level TEXT NOT NULL,
            geo_code TEXT NOT NULL,
            weight DOUBLE NOT NULL,
            PRIMARY KEY (zone_id, geo_level, geo_code)
        );",
    )?;
    Ok(())
}

fn parse_computed_at(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Conversion {
            message: format!("invalid computed_at '{s}': {e}"),
        })
}

/// A `zone_aggregates` row before JSON/timestamp decoding.
type AggregateRow = (f64, String, String, String, String);

/// A `geo_aggregate_values` row before JSON decoding.
type GeoValueRow = (String, String, String, String, String);

impl DuckDbStore {
    fn select_aggregate(
        &self,
        key: &ZoneAggregateKey,
    ) -> Result<Option<ZoneAggregateRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT coverage, source, source_version, computed_at, payload
             FROM zone_aggregates
             WHERE zone_id = ? AND aggregate_id = ? AND period_year = ? AND params_hash = ?",
        )?;

        let mut rows = stmt.query_map(
            duckdb::params![
                key.zone_id,
                key.aggregate_id,
                key.period_year,
                key.params_hash
            ],
            |row| -> duckdb::Result<AggregateRow> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            },
        )?;

        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (coverage, source, source_version, computed_at, payload) = row?;

        Ok(Some(ZoneAggregateRecord {
            zone_id: key.zone_id.clone(),
            aggregate_id: key.aggregate_id.clone(),
            period_year: key.period_year,
            params_hash: key.params_hash.clone(),
            coverage,
            source,
            source_version,
            computed_at: parse_computed_at(&computed_at)?,
            payload: serde_json::from_str(&payload)?,
        }))
    }

    fn insert_aggregate(&self, record: &ZoneAggregateRecord) -> Result<(), DbError> {
        let payload = serde_json::to_string(&record.payload)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO zone_aggregates
                (zone_id, aggregate_id, period_year, params_hash, coverage,
                 source, source_version, computed_at, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (zone_id, aggregate_id, period_year, params_hash) DO UPDATE SET
                coverage = EXCLUDED.coverage,
                source = EXCLUDED.source,
                source_version = EXCLUDED.source_version,
                computed_at = EXCLUDED.computed_at,
                payload = EXCLUDED.payload",
            duckdb::params![
                record.zone_id,
                record.aggregate_id,
                record.period_year,
                record.params_hash,
                record.coverage,
                record.source,
                record.source_version,
                record.computed_at.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    fn select_geo_values(&self, query: &GeoValuesQuery) -> Result<Vec<GeoAggregateValue>, DbError> {
        let mut values = Vec::new();
        if query.geo_codes.is_empty() {
            return Ok(values);
        }

        let conn = self.lock()?;
        for chunk in query.geo_codes.chunks(GEO_CODE_CHUNK) {
            let placeholders: String = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT geo_code, params_family_hash, source, source_version, payload
                 FROM geo_aggregate_values
                 WHERE aggregate_id = ? AND period_year = ? AND geo_level = ? AND params_hash = ?
                   AND geo_code IN ({placeholders})"
            );

            let mut params = vec![
                SqlValue::Text(query.aggregate_id.clone()),
                SqlValue::Int(query.period_year),
                SqlValue::Text(query.geo_level.clone()),
                SqlValue::Text(query.params_hash.clone()),
            ];
            params.extend(chunk.iter().cloned().map(SqlValue::Text));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                duckdb::params_from_iter(params.iter()),
                |row| -> duckdb::Result<GeoValueRow> {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                },
            )?;

            for row in rows {
                let (geo_code, params_family_hash, source, source_version, payload) = row?;
                values.push(GeoAggregateValue {
                    aggregate_id: query.aggregate_id.clone(),
                    period_year: query.period_year,
                    geo_level: query.geo_level.clone(),
                    geo_code,
                    params_hash: query.params_hash.clone(),
                    params_family_hash,
                    source,
                    source_version,
                    payload: serde_json::from_str(&payload)?,
                });
            }
        }

        Ok(values)
    }

    fn select_latest_period_year(
        &self,
        aggregate_id: &str,
        params_family_hash: &str,
    ) -> Result<Option<i32>, DbError> {
        let conn = self.lock()?;
        let latest: Option<i32> = conn.query_row(
            "SELECT MAX(period_year)
             FROM geo_aggregate_values
             WHERE aggregate_id = ? AND params_family_hash = ?",
            duckdb::params![aggregate_id, params_family_hash],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn insert_geo_values(&self, records: &[GeoAggregateValue]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let payloads = records
            .iter()
            .map(|r| serde_json::to_string(&r.payload))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO geo_aggregate_values
                    (aggregate_id, period_year, geo_level, geo_code, params_hash,
                     params_family_hash, source, source_version, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (aggregate_id, period_year, geo_level, geo_code, params_hash)
                 DO UPDATE SET
                    params_family_hash = EXCLUDED.params_family_hash,
                    source = EXCLUDED.source,
                    source_version = EXCLUDED.source_version,
                    payload = EXCLUDED.payload",
            )?;

            for (record, payload) in records.iter().zip(&payloads) {
                stmt.execute(duckdb::params![
                    record.aggregate_id,
                    record.period_year,
                    record.geo_level,
                    record.geo_code,
                    record.params_hash,
                    record.params_family_hash,
                    record.source,
                    record.source_version,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Upserted {} geo aggregate values", records.len());
        Ok(())
    }

    fn select_zone_geo_weights(
        &self,
        zone_id: &str,
        geo_level: Option<&str>,
    ) -> Result<Vec<ZoneGeoWeight>, DbError> {
        let conn = self.lock()?;
        let mut params = vec![SqlValue::Text(zone_id.to_string())];
        let level_filter = match geo_level {
            Some(level) => {
                params.push(SqlValue::Text(level.to_string()));
                " AND geo_level = ?"
            }
            None => "",
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT geo_level, geo_code, weight
             FROM zone_geo_weights
             WHERE zone_id = ?{level_filter}
             ORDER BY geo_level, geo_code"
        ))?;

        let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), |row| {
            Ok(ZoneGeoWeight {
                geo_level: Some(row.get(0)?),
                geo_code: row.get(1)?,
                weight: row.get(2)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn insert_zone_geo_weights(&self, records: &[ZoneGeoWeightRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO zone_geo_weights (zone_id, geo_level, geo_code, weight)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (zone_id, geo_level, geo_code) DO UPDATE SET
                    weight = EXCLUDED.weight",
            )?;

            for record in records {
                stmt.execute(duckdb::params![
                    record.zone_id,
                    record.geo_level,
                    record.geo_code,
                    record.weight,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Upserted {} zone geo weights", records.len());
        Ok(())
    }
}

#[async_trait]
impl ZoneAggregateStore for DuckDbStore {
    async fn get_aggregate(
        &self,
        key: &ZoneAggregateKey,
    ) -> Result<Option<ZoneAggregateRecord>, StoreError> {
        Ok(self.select_aggregate(key)?)
    }

    async fn upsert_aggregate(&self, record: &ZoneAggregateRecord) -> Result<(), StoreError> {
        Ok(self.insert_aggregate(record)?)
    }
}

#[async_trait]
impl GeoAggregateStore for DuckDbStore {
    async fn get_geo_values(
        &self,
        query: &GeoValuesQuery,
    ) -> Result<Vec<GeoAggregateValue>, StoreError> {
        Ok(self.select_geo_values(query)?)
    }

    async fn get_latest_period_year(
        &self,
        aggregate_id: &str,
        params_family_hash: &str,
    ) -> Result<Option<i32>, StoreError> {
        Ok(self.select_latest_period_year(aggregate_id, params_family_hash)?)
    }

    async fn upsert_geo_values_batch(
        &self,
        records: &[GeoAggregateValue],
    ) -> Result<(), StoreError> {
        Ok(self.insert_geo_values(records)?)
    }
}

#[async_trait]
impl ZoneGeoMapStore for DuckDbStore {
    async fn get_zone_geo_weights(
        &self,
        zone_id: &str,
        geo_level: Option<&str>,
    ) -> Result<Vec<ZoneGeoWeight>, StoreError> {
        Ok(self.select_zone_geo_weights(zone_id, geo_level)?)
    }

    async fn upsert_zone_geo_weights_batch(
        &self,
        records: &[ZoneGeoWeightRecord],
    ) -> Result<(), StoreError> {
        Ok(self.insert_zone_geo_weights(records)?)
    }
}
