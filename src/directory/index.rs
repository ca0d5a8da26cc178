//! Subject-token index over a directory snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::record::{IdentityDirectory, IdentityRecord, KeyMode};

const CN_SEPARATOR: &str = "/CN=";

/// Maps a single CN token (one DN component) to the record owning it.
#[derive(Debug, Default, Clone)]
pub struct SubjectIndex {
    tokens: HashMap<String, Arc<IdentityRecord>>,
}

impl SubjectIndex {
    /// Build the lookup index for a directory keyed by `mode`.
    ///
    /// In [`KeyMode::Natural`] the index holds the CN tokens of every DN. In
    /// [`KeyMode::Id`] it holds the person IDs, so subjects resolve through
    /// their numeric `CN=<id>` component.
    #[must_use]
    pub fn build(directory: &IdentityDirectory, mode: KeyMode) -> Self {
        match mode {
            KeyMode::Natural => Self::from_subject_dns(directory),
            KeyMode::Id => Self::from_ids(directory),
        }
    }

    /// Index every CN token of every DN.
    ///
    /// Records are visited in primary-key order; when two distinct records
    /// claim the same token the later one wins and the collision is logged.
    fn from_subject_dns(directory: &IdentityDirectory) -> Self {
        let mut tokens: HashMap<String, Arc<IdentityRecord>> = HashMap::new();
        for record in directory.values() {
            for dn in record.subject_dns() {
                for token in subject_tokens(dn) {
                    if let Some(previous) = tokens.insert(token.to_string(), Arc::clone(record))
                        && previous.as_ref() != record.as_ref()
                    {
                        warn!(
                            token,
                            previous = %previous.dn,
                            current = %record.dn,
                            "Subject token claimed by more than one directory record"
                        );
                    }
                }
            }
        }
        Self { tokens }
    }

    /// Index every record under its person ID.
    fn from_ids(directory: &IdentityDirectory) -> Self {
        let tokens = directory
            .values()
            .map(|record| (record.id.to_string(), Arc::clone(record)))
            .collect();
        Self { tokens }
    }

    /// Record owning `token`, if any.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<Arc<IdentityRecord>> {
        self.tokens.get(token).cloned()
    }

    /// Number of indexed tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// `true` when nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Indexed tokens, unordered.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }
}

/// Usable identity tokens of a slash-form DN.
///
/// `/DC=ch/DC=cern/OU=Users/CN=alice/CN=123/CN=Alice Example` yields
/// `alice` and `Alice Example`: the leading path fragment, empty fragments
/// and purely numeric fragments are not identities.
pub fn subject_tokens(dn: &str) -> impl Iterator<Item = &str> {
    dn.split(CN_SEPARATOR).filter(|fragment| {
        !fragment.is_empty()
            && !fragment.starts_with('/')
            && !fragment.bytes().all(|b| b.is_ascii_digit())
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(id: i64, dns: &[&str]) -> Arc<IdentityRecord> {
        Arc::new(IdentityRecord {
            dn: dns.first().map(ToString::to_string).unwrap_or_default(),
            dns: dns.iter().map(ToString::to_string).collect(),
            id,
            login: format!("user{id}"),
            name: format!("User {id}"),
            roles: BTreeMap::new(),
        })
    }

    fn directory(records: &[Arc<IdentityRecord>]) -> IdentityDirectory {
        records
            .iter()
            .map(|r| (r.id.to_string(), Arc::clone(r)))
            .collect()
    }

    #[test]
    fn splits_dn_on_cn_boundaries() {
        let tokens: Vec<_> =
            subject_tokens("/DC=ch/DC=cern/OU=Organic Units/OU=Users/CN=alice/CN=123/CN=Alice Example")
                .collect();
        assert_eq!(tokens, vec!["alice", "Alice Example"]);
    }

    #[test]
    fn numeric_tokens_never_indexed() {
        // GIVEN: DNs with serial-like numeric components
        let dir = directory(&[
            record(1, &["/DC=org/CN=alice/CN=4242/CN=Alice"]),
            record(2, &["/DC=org/CN=007/CN=bob"]),
        ]);

        // WHEN
        let index = SubjectIndex::build(&dir, KeyMode::Natural);

        // THEN: no key is all digits
        assert!(index.tokens().all(|t| !t.bytes().all(|b| b.is_ascii_digit())));
        assert!(index.lookup("4242").is_none());
        assert!(index.lookup("007").is_none());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn every_token_resolves_to_owner() {
        let alice = record(1, &["/DC=org/CN=alice/CN=Alice", "/O=Grid/CN=Alice A. Example"]);
        let bob = record(2, &["/DC=org/CN=bob"]);
        let index = SubjectIndex::build(
            &directory(&[Arc::clone(&alice), Arc::clone(&bob)]),
            KeyMode::Natural,
        );

        for token in ["alice", "Alice", "Alice A. Example"] {
            assert_eq!(index.lookup(token).unwrap().id, 1, "{token}");
        }
        assert_eq!(index.lookup("bob").unwrap().id, 2);
        assert!(index.lookup("carol").is_none());
    }

    #[test]
    fn collision_keeps_last_record_in_key_order() {
        // GIVEN: two records claiming the same CN token
        let first = record(1, &["/DC=org/CN=shared"]);
        let second = record(2, &["/DC=net/CN=shared"]);

        // WHEN: building twice from identical input
        let dir = directory(&[first, second]);
        let a = SubjectIndex::build(&dir, KeyMode::Natural);
        let b = SubjectIndex::build(&dir, KeyMode::Natural);

        // THEN: deterministic last-write-wins
        assert_eq!(a.lookup("shared").unwrap().id, 2);
        assert_eq!(b.lookup("shared").unwrap().id, 2);
    }

    #[test]
    fn id_mode_indexes_person_ids_only() {
        // GIVEN: a directory keyed by person ID
        let alice = record(4242, &["/DC=org/CN=alice/CN=4242/CN=Alice"]);
        let dir = directory(&[Arc::clone(&alice), record(7, &["/DC=org/CN=bob"])]);

        // WHEN
        let index = SubjectIndex::build(&dir, KeyMode::Id);

        // THEN: the numeric ID resolves, DN fragments do not
        assert_eq!(index.lookup("4242").unwrap().login, "user4242");
        assert_eq!(index.lookup("7").unwrap().id, 7);
        assert!(index.lookup("alice").is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn empty_directory_gives_empty_index() {
        let index = SubjectIndex::build(&IdentityDirectory::new(), KeyMode::Natural);
        assert!(index.is_empty());
    }
}
