use crate::Error;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Virtual nodes per shard when nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Longest accepted shard name (a DNS name).
pub const MAX_SHARD_NAME_LEN: usize = 253;

/// A key whose owner differs between two ring states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub key: String,
    pub from: String,
    pub to: String,
}

/// Consistent hash ring over named shards.
///
/// Each shard is placed at `replicas` points on a 32-bit ring, at
/// `crc32("<name>:<index>")`. A key is owned by the first point at or after
/// `crc32(key)`, wrapping around past the highest point.
///
/// The ring holds no I/O and no lock; callers that share it guard it
/// themselves.
#[derive(Debug, Clone)]
pub struct HashRing {
    vnodes: BTreeMap<u32, Arc<str>>,
    members: HashSet<Arc<str>>,
    replicas: usize,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            members: HashSet::new(),
            replicas,
        }
    }

    /// Build a ring already populated with `names`.
    pub fn with_shards<I, S>(replicas: usize, names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new(replicas);
        ring.add_shards(names)?;
        Ok(ring)
    }

    /// Add shards to the ring, returning the names that were inserted.
    ///
    /// Names already on the ring are skipped, so re-adding a shard never
    /// duplicates its virtual nodes. All names are validated first; if any
    /// is rejected the ring is not modified.
    pub fn add_shards<I, S>(&mut self, names: I) -> Result<Vec<String>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        for name in &names {
            validate_shard_name(name.as_ref())?;
        }

        let mut added = Vec::new();
        for name in &names {
            let name = name.as_ref();
            if self.members.contains(name) {
                continue;
            }

            let owner: Arc<str> = Arc::from(name);
            for i in 0..self.replicas {
                // Last write wins on a position collision.
                self.vnodes.insert(vnode_position(name, i), owner.clone());
            }
            self.members.insert(owner);
            debug!(shard = %name, replicas = self.replicas, "added shard to ring");
            added.push(name.to_string());
        }

        Ok(added)
    }

    /// Remove shards from the ring, returning the names that were present.
    pub fn remove_shards<I, S>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed: HashSet<Arc<str>> = HashSet::new();
        for name in names {
            if let Some(owner) = self.members.take(name.as_ref()) {
                removed.insert(owner);
            }
        }

        if removed.is_empty() {
            return Vec::new();
        }

        // Drop by owner rather than by recomputed position: a position that
        // collided was overwritten and now belongs to someone else.
        self.vnodes.retain(|_, owner| !removed.contains(&**owner));

        let mut removed: Vec<String> = removed.iter().map(|name| name.to_string()).collect();
        removed.sort();
        debug!(shards = ?removed, "removed shards from ring");
        removed
    }

    /// Find the shard that owns `key`.
    pub fn locate(&self, key: &str) -> Result<&str, Error> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let hash = key_position(key);
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, owner)| owner.as_ref())
            .ok_or(Error::EmptyRing)
    }

    /// Shards currently on the ring, sorted by name.
    pub fn shards(&self) -> BTreeSet<String> {
        self.members.iter().map(|name| name.to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    pub fn shard_count(&self) -> usize {
        self.members.len()
    }

    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    /// Keys from `keys` whose owner differs between `old` and `new`.
    ///
    /// Keys that cannot be located in either ring (empty key, empty ring)
    /// are skipped.
    pub fn diff<'a, I>(old: &HashRing, new: &HashRing, keys: I) -> Vec<Reassignment>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter()
            .filter_map(|key| {
                let from = old.locate(key).ok()?;
                let to = new.locate(key).ok()?;
                (from != to).then(|| Reassignment {
                    key: key.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                })
            })
            .collect()
    }
}

/// Check that `name` can be used as a shard name.
pub fn validate_shard_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SHARD_NAME_LEN
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ',' || c == '=');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidShardName(name.to_string()))
    }
}

#[inline]
fn vnode_position(name: &str, index: usize) -> u32 {
    crc32fast::hash(format!("{}:{}", name, index).as_bytes())
}

#[inline]
fn key_position(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(names: &[&str]) -> HashRing {
        HashRing::with_shards(DEFAULT_REPLICAS, names.iter().copied()).unwrap()
    }

    fn sample_keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user_{}", i)).collect()
    }

    #[test]
    fn test_positions_use_ieee_crc32() {
        // Standard CRC-32/ISO-HDLC check value.
        assert_eq!(key_position("123456789"), 0xCBF4_3926);
        assert_eq!(vnode_position("shard", 7), key_position("shard:7"));
    }

    #[test]
    fn test_each_shard_gets_replicas_vnodes() {
        let ring = ring(&["A", "B", "C"]);

        assert_eq!(ring.shard_count(), 3);
        assert_eq!(ring.vnode_count(), 3 * DEFAULT_REPLICAS);
        assert_eq!(ring.replicas(), DEFAULT_REPLICAS);
    }

    #[test]
    fn test_locate_on_empty_ring_fails() {
        let ring = HashRing::new(DEFAULT_REPLICAS);
        assert!(ring.is_empty());
        assert!(matches!(ring.locate("user_1"), Err(Error::EmptyRing)));
    }

    #[test]
    fn test_locate_empty_key_is_invalid() {
        let ring = ring(&["A"]);
        assert!(matches!(ring.locate(""), Err(Error::InvalidKey)));

        // Rejected before the ring is consulted.
        let empty = HashRing::new(DEFAULT_REPLICAS);
        assert!(matches!(empty.locate(""), Err(Error::InvalidKey)));
    }

    #[test]
    fn test_single_shard_owns_everything() {
        let ring = ring(&["only"]);
        for key in sample_keys(500) {
            assert_eq!(ring.locate(&key).unwrap(), "only");
        }
    }

    #[test]
    fn test_locate_wraps_past_highest_position() {
        let ring = ring(&["A", "B"]);
        let (_, first_owner) = ring.vnodes.iter().next().unwrap();
        let (&last, _) = ring.vnodes.iter().next_back().unwrap();

        // Any key hashing above the last position lands on the first vnode.
        let key = (0..100_000)
            .map(|i| format!("wrap-{}", i))
            .find(|k| key_position(k) > last)
            .expect("some key hashes past the last vnode");
        assert_eq!(ring.locate(&key).unwrap(), first_owner.as_ref());
    }

    #[test]
    fn test_locate_is_deterministic() {
        let ring = ring(&["A", "B", "C"]);
        let first = ring.locate("user_1").unwrap().to_string();

        for _ in 0..1000 {
            assert_eq!(ring.locate("user_1").unwrap(), first);
        }

        // Rebuilt from the same membership, in a different order.
        let rebuilt = HashRing::with_shards(DEFAULT_REPLICAS, ["C", "A", "B"]).unwrap();
        for key in sample_keys(2000) {
            assert_eq!(ring.locate(&key).unwrap(), rebuilt.locate(&key).unwrap());
        }
    }

    #[test]
    fn test_adding_d_moves_user_1_only_to_d() {
        let mut ring = ring(&["A", "B", "C"]);
        let before = ring.locate("user_1").unwrap().to_string();

        ring.add_shards(["D"]).unwrap();
        let after = ring.locate("user_1").unwrap();

        assert!(
            after == before || after == "D",
            "user_1 moved from {} to {}",
            before,
            after
        );
    }

    #[test]
    fn test_adding_shard_remaps_about_one_over_n_plus_one() {
        let keys = sample_keys(10_000);
        let old = ring(&["A", "B", "C"]);
        let mut new = old.clone();
        new.add_shards(["D"]).unwrap();

        let moved = HashRing::diff(&old, &new, keys.iter().map(String::as_str));

        // Every moved key goes to the new shard, nothing shuffles between old ones.
        assert!(moved.iter().all(|r| r.to == "D"), "keys moved between old shards");

        let fraction = moved.len() as f64 / keys.len() as f64;
        assert!(
            (fraction - 0.25).abs() < 0.15,
            "expected ~25% of keys to move, got {:.1}%",
            fraction * 100.0
        );
    }

    #[test]
    fn test_removing_shard_only_moves_its_keys() {
        let keys = sample_keys(10_000);
        let old = ring(&["A", "B", "C", "D"]);
        let mut new = old.clone();
        assert_eq!(new.remove_shards(["B"]), vec!["B".to_string()]);

        for key in &keys {
            let before = old.locate(key).unwrap();
            let after = new.locate(key).unwrap();
            if before == "B" {
                assert_ne!(after, "B");
            } else {
                assert_eq!(before, after, "key {} moved off a surviving shard", key);
            }
        }
        assert_eq!(new.vnode_count(), 3 * DEFAULT_REPLICAS);
    }

    #[test]
    fn test_readding_present_shard_is_noop() {
        let keys = sample_keys(5000);
        let mut ring = ring(&["A", "B", "C"]);
        let before: Vec<String> = keys
            .iter()
            .map(|k| ring.locate(k).unwrap().to_string())
            .collect();

        let added = ring.add_shards(["A", "B"]).unwrap();

        assert!(added.is_empty());
        assert_eq!(ring.vnode_count(), 3 * DEFAULT_REPLICAS);
        for (key, owner) in keys.iter().zip(&before) {
            assert_eq!(ring.locate(key).unwrap(), owner);
        }
    }

    #[test]
    fn test_duplicate_names_in_one_call_added_once() {
        let mut ring = HashRing::new(DEFAULT_REPLICAS);
        let added = ring.add_shards(["A", "A", "B"]).unwrap();

        assert_eq!(added, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(ring.vnode_count(), 2 * DEFAULT_REPLICAS);
    }

    #[test]
    fn test_invalid_name_rejects_whole_batch() {
        let mut ring = ring(&["A"]);

        for bad in ["", "has space", "a,b", "a=b", "tab\t"] {
            let result = ring.add_shards(["B", bad]);
            assert!(
                matches!(result, Err(Error::InvalidShardName(_))),
                "{:?} should be rejected",
                bad
            );
        }

        assert_eq!(ring.shards(), BTreeSet::from(["A".to_string()]));
        assert_eq!(ring.vnode_count(), DEFAULT_REPLICAS);
    }

    #[test]
    fn test_overlong_name_rejected() {
        let name = "a".repeat(MAX_SHARD_NAME_LEN + 1);
        assert!(validate_shard_name(&name).is_err());
        assert!(validate_shard_name(&name[1..]).is_ok());
    }

    #[test]
    fn test_remove_absent_shard_is_noop() {
        let mut ring = ring(&["A", "B"]);
        assert!(ring.remove_shards(["Z"]).is_empty());
        assert_eq!(ring.shard_count(), 2);
    }

    #[test]
    fn test_remove_then_readd_restores_placement() {
        let keys = sample_keys(2000);
        let original = ring(&["A", "B", "C"]);
        let mut ring = original.clone();

        ring.remove_shards(["B"]);
        ring.add_shards(["B"]).unwrap();

        assert!(HashRing::diff(&original, &ring, keys.iter().map(String::as_str)).is_empty());
    }

    #[test]
    fn test_shards_lists_members_sorted() {
        let mut ring = ring(&["postgres-shard-2", "postgres-shard-0"]);
        ring.add_shards(["postgres-shard-1"]).unwrap();

        let shards: Vec<String> = ring.shards().into_iter().collect();
        assert_eq!(
            shards,
            vec!["postgres-shard-0", "postgres-shard-1", "postgres-shard-2"]
        );
        assert!(ring.contains("postgres-shard-1"));
        assert!(!ring.contains("postgres-shard-3"));
    }

    #[test]
    fn test_removing_last_shard_empties_ring() {
        let mut ring = ring(&["A"]);
        ring.remove_shards(["A"]);

        assert!(ring.is_empty());
        assert!(ring.shards().is_empty());
        assert!(matches!(ring.locate("user_1"), Err(Error::EmptyRing)));
    }

    #[test]
    fn test_keys_spread_across_shards() {
        let ring = ring(&["A", "B", "C"]);
        let mut counts = std::collections::HashMap::new();
        for key in sample_keys(9000) {
            *counts.entry(ring.locate(&key).unwrap().to_string()).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 3);
        for (shard, count) in counts {
            assert!(
                (1000..=5500).contains(&count),
                "shard {} owns {} of 9000 keys",
                shard,
                count
            );
        }
    }
}
