//! Directory records and payload parsing.
//!
//! The registry serves its people as JSON using upper-case field names:
//!
//! ```json
//! [{"DN": "/DC=ch/DC=cern/OU=Users/CN=alice/CN=123/CN=Alice Example",
//!   "DNs": ["/DC=ch/DC=cern/OU=Users/CN=alice/CN=123/CN=Alice Example"],
//!   "ID": 123, "LOGIN": "alice", "NAME": "Alice Example",
//!   "ROLES": {"admin": ["group:ops"]}}]
//! ```
//!
//! Both a top-level array and an object of entries are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// One identity known to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Primary distinguished name
    #[serde(rename = "DN", default, deserialize_with = "nullable")]
    pub dn: String,
    /// Every DN the person may present
    #[serde(rename = "DNs", default, deserialize_with = "nullable")]
    pub dns: Vec<String>,
    /// Numeric person ID
    #[serde(rename = "ID", default, deserialize_with = "nullable")]
    pub id: i64,
    /// Login handle
    #[serde(rename = "LOGIN", default, deserialize_with = "nullable")]
    pub login: String,
    /// Display name
    #[serde(rename = "NAME", default, deserialize_with = "nullable")]
    pub name: String,
    /// Role name to ordered qualifiers
    #[serde(rename = "ROLES", default, deserialize_with = "nullable")]
    pub roles: BTreeMap<String, Vec<String>>,
}

impl IdentityRecord {
    /// DNs to index: `DNs`, or the primary `DN` when the list is empty.
    pub fn subject_dns(&self) -> impl Iterator<Item = &str> {
        let fallback = self.dns.is_empty() && !self.dn.is_empty();
        self.dns
            .iter()
            .map(String::as_str)
            .chain(fallback.then_some(self.dn.as_str()))
    }
}

/// How directory records are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Keyed by primary DN
    #[default]
    #[serde(alias = "")]
    Natural,
    /// Keyed by numeric person ID
    Id,
}

impl KeyMode {
    fn key_for(self, record: &IdentityRecord) -> String {
        match self {
            Self::Natural => record.dn.clone(),
            Self::Id => record.id.to_string(),
        }
    }
}

/// Full set of records keyed by primary key.
pub type IdentityDirectory = BTreeMap<String, Arc<IdentityRecord>>;

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<IdentityRecord>),
    Map(BTreeMap<String, IdentityRecord>),
}

/// Parse a directory payload fetched from `source_name`.
///
/// Records without any DN are dropped. When two records share a primary key
/// the later one wins.
///
/// # Errors
///
/// Returns [`Error::Parse`] when the payload is not a JSON list or object of
/// records.
pub fn parse_directory(bytes: &[u8], source_name: &str, mode: KeyMode) -> Result<IdentityDirectory> {
    let payload: Payload =
        serde_json::from_slice(bytes).map_err(|e| Error::parse(source_name, e))?;
    let records = match payload {
        Payload::List(list) => list,
        Payload::Map(map) => map.into_values().collect(),
    };

    let mut directory = IdentityDirectory::new();
    let mut dropped = 0usize;
    for record in records {
        if record.subject_dns().next().is_none() {
            dropped += 1;
            continue;
        }
        directory.insert(mode.key_for(&record), Arc::new(record));
    }
    if dropped > 0 {
        warn!(source = %source_name, dropped, "Dropped directory records without a DN");
    }
    Ok(directory)
}

fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
