//! In-memory store adapters.
//!
//! Used by tests and by the server when no persistent store is
//! configured. Each store counts its reads so tests can assert that a
//! cached request never touches the geo values again.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use zonestat_aggregates_models::{
    GeoAggregateValue, GeoValuesQuery, ZoneAggregateKey, ZoneAggregateRecord, ZoneGeoWeight,
    ZoneGeoWeightRecord,
};

use crate::StoreError;
use crate::store::{GeoAggregateStore, ZoneAggregateStore, ZoneGeoMapStore};

fn poisoned() -> StoreError {
    StoreError::Backend {
        message: "in-memory store lock poisoned".to_string(),
    }
}

/// In-memory [`ZoneAggregateStore`].
#[derive(Debug, Default)]
pub struct MemoryZoneAggregateStore {
    records: RwLock<BTreeMap<ZoneAggregateKey, ZoneAggregateRecord>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryZoneAggregateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_aggregate` calls served.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `upsert_aggregate` calls served.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of stored records.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().expect("store lock poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ZoneAggregateStore for MemoryZoneAggregateStore {
    async fn get_aggregate(
        &self,
        key: &ZoneAggregateKey,
    ) -> Result<Option<ZoneAggregateRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn upsert_aggregate(&self, record: &ZoneAggregateRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(record.key(), record.clone());
        Ok(())
    }
}

type GeoValueKey = (String, i32, String, String, String);

fn geo_value_key(value: &GeoAggregateValue) -> GeoValueKey {
    (
        value.aggregate_id.clone(),
        value.period_year,
        value.geo_level.clone(),
        value.geo_code.clone(),
        value.params_hash.clone(),
    )
}

/// In-memory [`GeoAggregateStore`].
#[derive(Debug, Default)]
pub struct MemoryGeoAggregateStore {
    values: RwLock<BTreeMap<GeoValueKey, GeoAggregateValue>>,
    value_reads: AtomicUsize,
}

impl MemoryGeoAggregateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_geo_values` calls served.
    #[must_use]
    pub fn value_read_count(&self) -> usize {
        self.value_reads.load(Ordering::Relaxed)
    }

    /// Number of stored values.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().expect("store lock poisoned").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GeoAggregateStore for MemoryGeoAggregateStore {
    async fn get_geo_values(
        &self,
        query: &GeoValuesQuery,
    ) -> Result<Vec<GeoAggregateValue>, StoreError> {
        self.value_reads.fetch_add(1, Ordering::Relaxed);
        let values = self.values.read().map_err(|_| poisoned())?;

        Ok(query
            .geo_codes
            .iter()
            .filter_map(|code| {
                values
                    .get(&(
                        query.aggregate_id.clone(),
                        query.period_year,
                        query.geo_level.clone(),
                        code.clone(),
                        query.params_hash.clone(),
                    ))
                    .cloned()
            })
            .collect())
    }

    async fn get_latest_period_year(
        &self,
        aggregate_id: &str,
        params_family_hash: &str,
    ) -> Result<Option<i32>, StoreError> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values
            .values()
            .filter(|v| v.aggregate_id == aggregate_id && v.params_family_hash == params_family_hash)
            .map(|v| v.period_year)
            .max())
    }

    async fn upsert_geo_values_batch(
        &self,
        records: &[GeoAggregateValue],
    ) -> Result<(), StoreError> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        for record in records {
            values.insert(geo_value_key(record), record.clone());
        }
        Ok(())
    }
}

/// In-memory [`ZoneGeoMapStore`]. Preserves insertion order per zone.
#[derive(Debug, Default)]
pub struct MemoryZoneGeoMapStore {
    zones: RwLock<BTreeMap<String, Vec<ZoneGeoWeightRecord>>>,
}

impl MemoryZoneGeoMapStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ZoneGeoMapStore for MemoryZoneGeoMapStore {
    async fn get_zone_geo_weights(
        &self,
        zone_id: &str,
        geo_level: Option<&str>,
    ) -> Result<Vec<ZoneGeoWeight>, StoreError> {
        let zones = self.zones.read().map_err(|_| poisoned())?;
        Ok(zones
            .get(zone_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| geo_level.is_none_or(|level| r.geo_level == level))
                    .cloned()
                    .map(ZoneGeoWeight::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_zone_geo_weights_batch(
        &self,
        records: &[ZoneGeoWeightRecord],
    ) -> Result<(), StoreError> {
        let mut zones = self.zones.write().map_err(|_| poisoned())?;
        for record in records {
            let rows = zones.entry(record.zone_id.clone()).or_default();
            if let Some(existing) = rows
                .iter_mut()
                .find(|r| r.geo_level == record.geo_level && r.geo_code == record.geo_code)
            {
                existing.weight = record.weight;
            } else {
                rows.push(record.clone());
            }
        }
        Ok(())
    }
}
