//! Identifier newtypes. Display/serde as lowercase hex, following the
//! `models::Id` convention of the teacher workspace: a fixed-width byte
//! array wrapped in a `Copy` type with hex `Display`/`FromStr`/serde, rather
//! than a bare `Vec<u8>` or `String` threaded everywhere.

use std::fmt;
use std::str::FromStr;

/// The content-addressed key of an object: by default a SHA-256 digest,
/// but treated as an uninterpreted fixed-width key by the core (spec.md §3).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature([u8; 32]);

impl Signature {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn of_content(content: &[u8]) -> Self {
        use sha2::Digest;
        let digest = sha2::Sha256::digest(content);
        Self(digest.into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex<T: AsRef<[u8]>>(hex: T) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        let exact: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(exact))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Signature {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let s = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Signature::from_hex(s.as_ref())
            .map_err(|err| D::Error::custom(format!("invalid signature: {err}")))
    }
}

/// The dense integer identifier of a shard row (`shards.id`).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct ShardId(pub i64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A shard's immutable, randomly-generated 32-character lowercase-hex name
/// (spec.md §3, invariant I2). Doubles as the RO-shard file name and, in
/// block-pool deployments, the image name.
#[derive(Copy, Clone, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct ShardName([u8; 32]);

impl ShardName {
    /// Generates a fresh random name. 16 random bytes hex-encoded gives the
    /// required 32 lowercase-hex characters.
    pub fn generate() -> Self {
        let mut raw = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
        let hex = hex::encode(raw);
        let mut out = [0u8; 32];
        out.copy_from_slice(hex.as_bytes());
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        // Safe: constructed only from hex::encode output or validated parse.
        std::str::from_utf8(&self.0).expect("shard name is always ascii hex")
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("shard name must be exactly 32 lowercase hex characters")]
pub struct InvalidShardName;

impl FromStr for ShardName {
    type Err = InvalidShardName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(InvalidShardName);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(s.as_bytes());
        Ok(Self(out))
    }
}

/// The opaque owner id + timestamp recorded on a shard row while a
/// worker/packer/cleaner holds a transition lock (spec.md §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Locker {
    pub id: uuid::Uuid,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl Locker {
    pub fn acquire() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            at: chrono::Utc::now(),
        }
    }
}
