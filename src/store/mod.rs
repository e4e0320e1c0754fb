//! Persistence for player funds (load-by-name / save-by-name)

pub mod funds;
pub mod supabase;

use uuid::Uuid;

use supabase::SupabaseError;

pub use funds::FundsStore;

/// What gets written when a named player leaves, extracts or the match ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundsRecord {
    pub name: String,
    pub funds: u32,
    pub item_count: usize,
}

/// Persistence work queued by a simulation; the room task executes it
/// off the tick path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreRequest {
    /// Fetch stored funds for a player that just took a name
    Load { session_id: Uuid, name: String },
    Save(FundsRecord),
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Stored funds out of range: {0}")]
    InvalidFunds(i64),
}
