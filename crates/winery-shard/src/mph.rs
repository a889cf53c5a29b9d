//! A minimal perfect hash over a fixed key set, built with the CHD
//! (compress, hash, displace) technique: keys are bucketed by a first-level
//! hash, buckets are processed largest-first, and each bucket is assigned a
//! displacement seed such that a second-level hash sends every key in the
//! bucket to a distinct, still-free final slot. No minimal-perfect-hash
//! crate appears anywhere in the retrieval corpus, so this is new code,
//! hashed with `xxhash-rust`'s `xxh3` the way the teacher workspace already
//! depends on it for non-cryptographic hashing.

const MAX_DISPLACEMENT_ATTEMPTS: u32 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("could not find a displacement for a bucket within {0} attempts")]
    DisplacementExhausted(u32),
}

/// `bucket_count` keys are grouped into this many buckets before
/// displacement search; a smaller ratio keeps buckets small (fast to place)
/// at the cost of a larger displacement table. Lambda=4 mirrors the
/// average bucket load `phf`-style CHD implementations commonly use.
fn bucket_count_for(n: usize) -> usize {
    ((n as f64 / 4.0).ceil() as usize).max(1)
}

fn bucket_hash(key: &[u8; 32]) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(key, 0x9E37_79B9_7F4A_7C15)
}

fn slot_hash(key: &[u8; 32], displacement: u32) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(key, displacement as u64 + 1)
}

/// Which bucket a key falls in. The on-disk reader calls this directly so
/// it only has to decode a single `u32` displacement, not the whole table.
pub fn bucket_of(key: &[u8; 32], bucket_count: u64) -> u64 {
    bucket_hash(key) % bucket_count
}

/// The final slot for a key, given its bucket's displacement. O(1): this is
/// the reader's hot path.
pub fn slot_of(key: &[u8; 32], displacement: u32, slot_count: u64) -> u64 {
    slot_hash(key, displacement) % slot_count
}

/// The built structure: a displacement per bucket, and the final slot
/// assigned to each input key (by input index).
pub struct MinimalPerfectHash {
    pub bucket_count: u64,
    pub slot_count: u64,
    pub displacements: Vec<u32>,
    /// `slot_of_key[i]` is the final slot for `keys[i]` at build time.
    pub slot_of_key: Vec<u64>,
}

impl MinimalPerfectHash {
    pub fn build(keys: &[[u8; 32]]) -> Result<Self, BuildError> {
        let n = keys.len();
        let bucket_count = bucket_count_for(n);

        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); bucket_count];
        for (i, key) in keys.iter().enumerate() {
            let b = (bucket_hash(key) % bucket_count as u64) as usize;
            buckets[b].push(i);
        }

        // Largest buckets first: they're hardest to place, so placing them
        // early leaves the most free slots to work with.
        let mut order: Vec<usize> = (0..bucket_count).collect();
        order.sort_by_key(|&b| std::cmp::Reverse(buckets[b].len()));

        let mut displacements = vec![0u32; bucket_count];
        let mut slot_of_key = vec![u64::MAX; n];
        let mut slot_taken = vec![false; n.max(1)];

        for bucket_idx in order {
            let members = &buckets[bucket_idx];
            if members.is_empty() {
                continue;
            }

            let mut found = None;
            for d in 0..MAX_DISPLACEMENT_ATTEMPTS {
                let mut candidate_slots = Vec::with_capacity(members.len());
                let mut ok = true;
                for &member in members {
                    let slot = (slot_hash(&keys[member], d) % n as u64) as usize;
                    if slot_taken[slot] || candidate_slots.contains(&slot) {
                        ok = false;
                        break;
                    }
                    candidate_slots.push(slot);
                }
                if ok {
                    found = Some((d, candidate_slots));
                    break;
                }
            }

            let (d, candidate_slots) =
                found.ok_or(BuildError::DisplacementExhausted(MAX_DISPLACEMENT_ATTEMPTS))?;

            displacements[bucket_idx] = d;
            for (&member, slot) in members.iter().zip(candidate_slots) {
                slot_taken[slot] = true;
                slot_of_key[member] = slot as u64;
            }
        }

        Ok(Self {
            bucket_count: bucket_count as u64,
            slot_count: n as u64,
            displacements,
            slot_of_key,
        })
    }

    /// Test/convenience wrapper over [`bucket_of`] + [`slot_of`] that takes
    /// the full displacement table; the reader uses the two functions
    /// directly so it only decodes the one displacement it needs.
    pub fn lookup_slot(key: &[u8; 32], bucket_count: u64, slot_count: u64, displacements: &[u32]) -> Option<u64> {
        if slot_count == 0 {
            return None;
        }
        let bucket = bucket_of(key, bucket_count) as usize;
        let d = *displacements.get(bucket)?;
        Some(slot_hash(key, d) % slot_count)
    }
}
