//! Funds store backends

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

use super::supabase::SupabaseClient;
use super::{FundsRecord, StoreError};

const PLAYERS_TABLE: &str = "players";

/// Player funds persistence. Unknown names load as zero funds.
#[derive(Clone)]
pub enum FundsStore {
    Memory(MemoryFundsStore),
    Supabase(SupabaseFundsStore),
}

impl FundsStore {
    /// Supabase when credentials are configured, in-memory otherwise
    pub fn from_config(config: &ServerConfig) -> Self {
        match &config.supabase {
            Some(sb) => Self::Supabase(SupabaseFundsStore::new(SupabaseClient::new(sb))),
            None => Self::Memory(MemoryFundsStore::default()),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Supabase(_) => "supabase",
        }
    }

    pub async fn load(&self, name: &str) -> Result<u32, StoreError> {
        match self {
            Self::Memory(store) => Ok(store.load(name)),
            Self::Supabase(store) => store.load(name).await,
        }
    }

    pub async fn save(&self, record: &FundsRecord) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => {
                store.save(record);
                Ok(())
            }
            Self::Supabase(store) => store.save(record).await,
        }
    }
}

/// Process-local store; contents are lost on restart
#[derive(Clone, Default)]
pub struct MemoryFundsStore {
    records: Arc<DashMap<String, FundsRecord>>,
}

impl MemoryFundsStore {
    pub fn load(&self, name: &str) -> u32 {
        self.records.get(name).map(|r| r.funds).unwrap_or(0)
    }

    pub fn save(&self, record: &FundsRecord) {
        self.records.insert(record.name.clone(), record.clone());
    }
}

/// Row in the `players` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRow {
    pub name: String,
    pub funds: i64,
    pub item_count: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FundsOnly {
    funds: i64,
}

/// Funds in the Supabase `players` table, keyed by name
#[derive(Clone)]
pub struct SupabaseFundsStore {
    client: SupabaseClient,
}

impl SupabaseFundsStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn load(&self, name: &str) -> Result<u32, StoreError> {
        let query = [
            ("select", "funds".to_string()),
            ("name", format!("eq.{}", name)),
        ];
        let row: Option<FundsOnly> = self.client.get_one(PLAYERS_TABLE, &query).await?;
        match row {
            None => Ok(0),
            Some(r) => u32::try_from(r.funds).map_err(|_| StoreError::InvalidFunds(r.funds)),
        }
    }

    pub async fn save(&self, record: &FundsRecord) -> Result<(), StoreError> {
        let row = PlayerRow {
            name: record.name.clone(),
            funds: record.funds as i64,
            item_count: record.item_count as i64,
            last_seen: Utc::now(),
        };
        self.client.upsert(PLAYERS_TABLE, &row, "name").await?;
        Ok(())
    }
}
