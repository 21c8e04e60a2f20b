//! Redis-backed record store. All persistence flows through one multiplexed
//! connection; writes are serialized by a process-wide lock and transient
//! connection failures are retried with a fixed delay.

pub mod codec;
pub mod entity;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use codec::{store_val, use_val, CodecError, FieldValue};
use entity::{field_spec, Entity};

const KEY_SEPARATOR: char = ':';
const CONNECT_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store connection retries exhausted: {0}")]
    RetriesExhausted(redis::RedisError),
    #[error("field \"{field}\" failed to decode: {source}")]
    Codec {
        field: String,
        #[source]
        source: CodecError,
    },
}

fn is_transient(err: &redis::RedisError) -> bool {
    err.kind() == redis::ErrorKind::BusyLoadingError
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_io_error()
        || err.is_timeout()
}

fn codec_err(field: &str) -> impl FnOnce(CodecError) -> StoreError + '_ {
    move |source| StoreError::Codec {
        field: field.to_owned(),
        source,
    }
}

/// Retry a store command on transient connection failures, with a fixed
/// delay between attempts. Other failures propagate immediately.
macro_rules! with_retry {
    ($self:ident, $conn:ident, $expr:expr) => {{
        let mut attempt = 0u32;
        loop {
            #[allow(unused_mut)]
            let mut $conn = $self.conn.clone();
            match $expr.await {
                Ok(value) => break Ok(value),
                Err(err) if is_transient(&err) => {
                    attempt += 1;
                    if attempt > CONNECT_RETRIES {
                        break Err(StoreError::RetriesExhausted(err));
                    }
                    warn!(error = %err, attempt, "store connection failure, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(err) => break Err(StoreError::Redis(err)),
            }
        }
    }};
}

#[derive(Clone)]
pub struct Store {
    conn: MultiplexedConnection,
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut attempt = 0u32;
        let conn = loop {
            match client.get_multiplexed_tokio_connection().await {
                Ok(conn) => break conn,
                Err(err) if is_transient(&err) => {
                    attempt += 1;
                    if attempt > CONNECT_RETRIES {
                        return Err(StoreError::RetriesExhausted(err));
                    }
                    warn!(error = %err, attempt, "store not reachable yet, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(err) => return Err(err.into()),
            }
        };
        Ok(Self {
            conn,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// `<prefix>:<lowercase(name)>`, idempotent when `name` is already
    /// prefixed (in any case).
    pub fn key<E: Entity>(name: &str) -> String {
        let prefix = format!("{}{}", E::PREFIX, KEY_SEPARATOR);
        let bare = if name.len() >= prefix.len() && name[..prefix.len()].eq_ignore_ascii_case(&prefix)
        {
            &name[prefix.len()..]
        } else {
            name
        };
        format!("{}{}", prefix, bare.to_lowercase())
    }

    fn bare_name(key: &str) -> String {
        key.splitn(2, KEY_SEPARATOR).last().unwrap_or(key).to_owned()
    }

    pub async fn exists<E: Entity>(&self, name: &str) -> Result<bool, StoreError> {
        let key = Self::key::<E>(name);
        with_retry!(self, conn, conn.exists::<_, bool>(&key))
    }

    pub async fn get<E: Entity>(
        &self,
        name: &str,
        field: &str,
    ) -> Result<Option<FieldValue>, StoreError> {
        let spec = field_spec::<E>(field);
        let key = Self::key::<E>(name);
        let raw: Option<String> = with_retry!(self, conn, conn.hget(&key, field))?;
        raw.map(|raw| use_val(&raw, spec.kind).map_err(codec_err(field)))
            .transpose()
    }

    pub async fn mget<E: Entity>(
        &self,
        name: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<FieldValue>>, StoreError> {
        let specs: Vec<_> = fields.iter().map(|f| field_spec::<E>(f)).collect();
        let raw = self.mget_raw::<E>(name, fields).await?;
        specs
            .iter()
            .zip(raw)
            .map(|(spec, raw)| {
                raw.map(|raw| use_val(&raw, spec.kind).map_err(codec_err(spec.name)))
                    .transpose()
            })
            .collect()
    }

    async fn mget_raw<E: Entity>(
        &self,
        name: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, StoreError> {
        let key = Self::key::<E>(name);
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(&key);
        for field in fields {
            cmd.arg(*field);
        }
        let raw: Vec<Option<String>> = with_retry!(self, conn, cmd.query_async(&mut conn))?;
        Ok(raw)
    }

    /// Every set field of the record, decoded.
    pub async fn getall<E: Entity>(
        &self,
        name: &str,
    ) -> Result<HashMap<&'static str, FieldValue>, StoreError> {
        let fields: Vec<&str> = E::field_specs().iter().map(|spec| spec.name).collect();
        let values = self.mget::<E>(name, &fields).await?;
        Ok(fields
            .into_iter()
            .zip(values)
            .filter_map(|(field, value)| value.map(|value| (field_spec::<E>(field).name, value)))
            .collect())
    }

    pub async fn set<E: Entity>(
        &self,
        name: &str,
        field: &'static str,
        value: FieldValue,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.mset::<E>(name, vec![(field, value)]).await
    }

    /// Write a batch of fields under the global write lock, stamping
    /// `updated` with the current instant and returning it.
    pub async fn mset<E: Entity>(
        &self,
        name: &str,
        mapping: Vec<(&'static str, FieldValue)>,
    ) -> Result<DateTime<Utc>, StoreError> {
        assert!(!mapping.is_empty(), "nothing to set");
        let now = Utc::now();
        let mut pairs: Vec<(&'static str, String)> = Vec::with_capacity(mapping.len() + 1);
        for (field, value) in &mapping {
            let spec = field_spec::<E>(field);
            assert!(
                value.kind() == spec.kind,
                "field \"{field}\" of prefix \"{}\" does not take a {:?}",
                E::PREFIX,
                value.kind()
            );
            if *field != "updated" {
                pairs.push((*field, store_val(value)));
            }
        }
        pairs.push(("updated", store_val(&FieldValue::Date(now))));

        let key = Self::key::<E>(name);
        let _write = self.write_lock.lock().await;
        with_retry!(self, conn, conn.hset_multiple::<_, _, _, ()>(&key, &pairs))?;
        Ok(now)
    }

    /// Load a record, populated from the store when present.
    pub async fn load<E: Entity>(&self, name: &str) -> Result<E, StoreError> {
        let mut record = E::with_name(name);
        let fields: Vec<&str> = E::field_specs().iter().map(|spec| spec.name).collect();
        let raw = self.mget_raw::<E>(record.name(), &fields).await?;
        let mut existed = false;
        for (spec, raw) in E::field_specs().iter().zip(raw) {
            let Some(raw) = raw else {
                if spec.name == "name" {
                    record.state_mut().set_change(&["name"]);
                }
                continue;
            };
            if spec.name == "name" {
                existed = true;
                continue;
            }
            let value = use_val(&raw, spec.kind).map_err(codec_err(spec.name))?;
            record.apply(spec.name, value).map_err(codec_err(spec.name))?;
        }
        record.state_mut().existed = existed;
        Ok(record)
    }

    /// Load only when the record already exists.
    pub async fn query<E: Entity>(&self, name: &str) -> Result<Option<E>, StoreError> {
        if self.exists::<E>(name).await? {
            Ok(Some(self.load(name).await?))
        } else {
            Ok(None)
        }
    }

    /// All record names under the entity's prefix.
    pub async fn names<E: Entity>(&self) -> Result<Vec<String>, StoreError> {
        let pattern = Self::key::<E>("*");
        let keys: Vec<String> = with_retry!(self, conn, conn.keys(&pattern))?;
        Ok(keys.iter().map(|key| Self::bare_name(key)).collect())
    }

    pub async fn query_all<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        let mut records = Vec::new();
        for name in self.names::<E>().await? {
            records.push(self.load(&name).await?);
        }
        Ok(records)
    }

    /// Persist only the dirty fields of a record; clears the dirty set and
    /// adopts the store's commit timestamp.
    pub async fn commit_changes<E: Entity>(&self, record: &mut E) -> Result<(), StoreError> {
        if !record.state().has_changes() {
            return Ok(());
        }
        let fields = record.state().changed_fields();
        self.commit_fields(record, &fields).await
    }

    /// Persist every populated field of a record.
    pub async fn commit_all<E: Entity>(&self, record: &mut E) -> Result<(), StoreError> {
        let fields: Vec<&'static str> = E::field_specs().iter().map(|spec| spec.name).collect();
        self.commit_fields(record, &fields).await
    }

    async fn commit_fields<E: Entity>(
        &self,
        record: &mut E,
        fields: &[&'static str],
    ) -> Result<(), StoreError> {
        let mapping: Vec<(&'static str, FieldValue)> = fields
            .iter()
            .filter_map(|field| record.capture(field).map(|value| (*field, value)))
            .collect();
        if mapping.is_empty() {
            return Ok(());
        }
        let now = self.mset::<E>(record.name(), mapping).await?;
        record.set_updated(now);
        let state = record.state_mut();
        state.existed = true;
        state.clear_changes();
        Ok(())
    }

    /// Ask the backing service for a durable on-disk dump.
    pub async fn snapshot(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let saved: Result<(), StoreError> =
            with_retry!(self, conn, redis::cmd("SAVE").query_async(&mut conn));
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::repository::Repository;

    #[test]
    fn keys_are_prefixed_and_case_folded() {
        assert_eq!(Store::key::<Repository>("Alice/App"), "repo:alice/app");
        assert_eq!(Store::key::<Repository>("ALICE/APP"), "repo:alice/app");
    }

    #[test]
    fn key_generation_is_idempotent() {
        let once = Store::key::<Repository>("alice/app");
        assert_eq!(Store::key::<Repository>(&once), once);
        assert_eq!(Store::key::<Repository>("REPO:alice/app"), once);
    }
}
