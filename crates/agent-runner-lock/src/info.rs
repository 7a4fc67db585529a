use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata written into every lock file: who holds it, and since when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
}
