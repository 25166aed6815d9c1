//! Keys identifying aggregate rows.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Statement phase tracked separately per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan = 0,
    Exec = 1,
}

impl Phase {
    pub const COUNT: usize = 2;

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Exec => "exec",
        }
    }
}

/// Identity of a statement report before a bucket is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleKey {
    pub query_id: u64,
    pub user_id: u32,
    pub database_id: u32,
    /// IPv4 client address packed big-endian (`0` for local connections).
    pub client_address: u32,
}

impl SampleKey {
    #[must_use]
    pub const fn new(query_id: u64, user_id: u32, database_id: u32, client_address: u32) -> Self {
        Self {
            query_id,
            user_id,
            database_id,
            client_address,
        }
    }

    #[must_use]
    pub fn with_client(mut self, addr: Ipv4Addr) -> Self {
        self.client_address = u32::from(addr);
        self
    }

    /// Pin this sample to `bucket_id`.
    #[must_use]
    pub const fn in_bucket(self, bucket_id: usize) -> FingerprintKey {
        FingerprintKey {
            bucket_id,
            query_id: self.query_id,
            user_id: self.user_id,
            database_id: self.database_id,
            client_address: self.client_address,
        }
    }
}

/// Unique identity of one aggregate row.
///
/// Immutable once an entry is created. The derived `Ord` (bucket first, then
/// query, user, database, client) is the eviction tie-break among entries of
/// equal usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintKey {
    pub bucket_id: usize,
    pub query_id: u64,
    pub user_id: u32,
    pub database_id: u32,
    pub client_address: u32,
}

impl FingerprintKey {
    #[must_use]
    pub const fn sample_key(&self) -> SampleKey {
        SampleKey {
            query_id: self.query_id,
            user_id: self.user_id,
            database_id: self.database_id,
            client_address: self.client_address,
        }
    }

    #[must_use]
    pub fn client_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.client_address)
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "b{}/q{:016x}/u{}/d{}/{}",
            self.bucket_id,
            self.query_id,
            self.user_id,
            self.database_id,
            self.client_ip()
        )
    }
}
