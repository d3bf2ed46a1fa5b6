//! Redis adapter for the transceiver tables
//!
//! Identity and DOM rows live in STATE_DB, administrative settings in
//! CONFIG_DB.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, instrument};

use crate::attributes::FieldValues;
use crate::db::{AdminConfig, StateDatabase};
use crate::error::DatabaseError;
use crate::tables::{
    table_key, CFG_TRANSCEIVER_CONFIG_TABLE_NAME, STATE_TRANSCEIVER_DOM_SENSOR_TABLE_NAME,
    STATE_TRANSCEIVER_INFO_TABLE_NAME,
};

/// Redis-backed state database
pub struct RedisStateDb {
    state_db: ConnectionManager,
    config_db: ConnectionManager,
}

impl RedisStateDb {
    /// Connects to STATE_DB and CONFIG_DB
    #[instrument(skip_all)]
    pub async fn new(
        host: &str,
        port: u16,
        state_db: u32,
        config_db: u32,
    ) -> Result<Self, DatabaseError> {
        debug!(host, port, "Connecting to Redis databases");

        let state_db = Self::connect_db(host, port, state_db).await?;
        let config_db = Self::connect_db(host, port, config_db).await?;

        debug!("Connected to all Redis databases");
        Ok(Self {
            state_db,
            config_db,
        })
    }

    /// Connect to a specific database
    async fn connect_db(host: &str, port: u16, db: u32) -> Result<ConnectionManager, DatabaseError> {
        let url = format!("redis://{}:{}/{}", host, port, db);
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(manager)
    }
}

#[async_trait]
impl StateDatabase for RedisStateDb {
    /// Replaces both rows in one transaction
    #[instrument(skip(self, attributes, dom), fields(fields = attributes.len() + dom.len()))]
    async fn write_record(
        &mut self,
        external_id: &str,
        attributes: &FieldValues,
        dom: &FieldValues,
    ) -> Result<(), DatabaseError> {
        let info_key = table_key(STATE_TRANSCEIVER_INFO_TABLE_NAME, external_id);
        let dom_key = table_key(STATE_TRANSCEIVER_DOM_SENSOR_TABLE_NAME, external_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&info_key).ignore();
        pipe.del(&dom_key).ignore();
        if !attributes.is_empty() {
            pipe.hset_multiple(&info_key, attributes).ignore();
        }
        if !dom.is_empty() {
            pipe.hset_multiple(&dom_key, dom).ignore();
        }

        let _: () = pipe.query_async(&mut self.state_db).await?;
        debug!(info_key, "Wrote transceiver record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_record(&mut self, external_id: &str) -> Result<(), DatabaseError> {
        let info_key = table_key(STATE_TRANSCEIVER_INFO_TABLE_NAME, external_id);
        let dom_key = table_key(STATE_TRANSCEIVER_DOM_SENSOR_TABLE_NAME, external_id);

        let _: () = self.state_db.del(&[&info_key, &dom_key]).await?;
        debug!(info_key, "Cleared transceiver record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_admin_config(
        &mut self,
        external_id: &str,
    ) -> Result<Option<AdminConfig>, DatabaseError> {
        let key = table_key(CFG_TRANSCEIVER_CONFIG_TABLE_NAME, external_id);
        let values: HashMap<String, String> = self.config_db.hgetall(&key).await?;

        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(AdminConfig::from_fields(&values)))
    }
}
