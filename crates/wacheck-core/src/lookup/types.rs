//! Owned lookup result types.
//!
//! These are stored in the cache and cloned out to every waiter, so they
//! hold no references into client state.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::cache::CacheStatus;
use crate::client::Contact;

/// Public profile of a registered identifier. Absent fields are explicit `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub canonical_number: Option<String>,
    pub avatar_url: Option<String>,
    pub is_business: bool,
}

impl Profile {
    /// Normalize upstream contact data; empty strings count as absent
    pub fn from_contact(contact: Contact, avatar_url: Option<String>) -> Self {
        Self {
            display_name: non_empty(contact.pushname),
            canonical_number: non_empty(contact.number),
            avatar_url: non_empty(avatar_url),
            is_business: contact.is_business,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Outcome of a single upstream lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    NotRegistered,
    Registered(Profile),
}

impl LookupResult {
    pub fn is_registered(&self) -> bool {
        matches!(self, LookupResult::Registered(_))
    }
}

/// `{registered:false}` or `{registered:true, displayName, canonicalNumber, avatarUrl, isBusiness}`
impl Serialize for LookupResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LookupResult::NotRegistered => {
                let mut s = serializer.serialize_struct("LookupResult", 1)?;
                s.serialize_field("registered", &false)?;
                s.end()
            }
            LookupResult::Registered(profile) => {
                let mut s = serializer.serialize_struct("LookupResult", 5)?;
                s.serialize_field("registered", &true)?;
                s.serialize_field("displayName", &profile.display_name)?;
                s.serialize_field("canonicalNumber", &profile.canonical_number)?;
                s.serialize_field("avatarUrl", &profile.avatar_url)?;
                s.serialize_field("isBusiness", &profile.is_business)?;
                s.end()
            }
        }
    }
}

/// Where a successful lookup was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupSource {
    Cache,
    Live,
}

impl From<CacheStatus> for LookupSource {
    fn from(status: CacheStatus) -> Self {
        match status {
            CacheStatus::Hit => LookupSource::Cache,
            CacheStatus::Miss => LookupSource::Live,
        }
    }
}

impl LookupSource {
    pub fn cache_status(self) -> CacheStatus {
        match self {
            LookupSource::Cache => CacheStatus::Hit,
            LookupSource::Live => CacheStatus::Miss,
        }
    }
}

/// Successful pipeline result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutcome {
    pub result: LookupResult,
    pub source: LookupSource,
}
