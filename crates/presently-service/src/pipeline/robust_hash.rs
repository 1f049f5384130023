use std::fmt::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::future::Future;

/// The structural identity of a [`Future`].
///
/// Two keys compare equal if and only if their SHA-256 hashes are equal. The human-readable
/// metadata the hash was derived from is kept around for diagnostics.
#[derive(Debug, Clone, Eq)]
pub struct FutureKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for FutureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for FutureKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for FutureKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl FutureKey {
    /// Returns the human-readable metadata that forms the basis of this key.
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the full hex-formatted hash.
    pub fn hex(&self) -> String {
        self.hash.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// A short one-line description, used in log output.
    ///
    /// This is the first line of the metadata (the outermost type tag) followed by the short hash.
    pub fn debug_string(&self) -> String {
        let kind = self.metadata.lines().next().unwrap_or_default();
        format!("{kind}#{self}")
    }

    #[cfg(test)]
    pub fn for_testing(metadata: &str) -> Self {
        let mut hash = RobustHash::new();
        hash.write_str(metadata).unwrap();
        hash.build()
    }
}

/// A builder for [`FutureKey`]s.
///
/// Every [`Future`] accumulates its type tag, its parameters, and the keys of its nested futures
/// into this builder. The input must be **stable**: it may not depend on pointer identity,
/// randomness, or the current time, since the resulting key is used to deduplicate computations.
///
/// The builder implements [`Write`](std::fmt::Write), so additional free-form metadata can be
/// mixed in as well.
#[derive(Debug, Default)]
pub struct RobustHash {
    metadata: String,
}

impl RobustHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a new (possibly nested) future type.
    pub fn accumulate_tag(&mut self, tag: &str) {
        self.metadata.push_str(tag);
        self.metadata.push('\n');
    }

    pub fn accumulate_str(&mut self, name: &str, value: &str) {
        // `Debug` quotes and escapes, so values containing newlines can not forge other fields.
        writeln!(self.metadata, "{name}: {value:?}").unwrap();
    }

    pub fn accumulate_int(&mut self, name: &str, value: i64) {
        writeln!(self.metadata, "{name}: {value}").unwrap();
    }

    pub fn accumulate_bool(&mut self, name: &str, value: bool) {
        writeln!(self.metadata, "{name}: {value}").unwrap();
    }

    pub fn accumulate_path(&mut self, name: &str, value: &Path) {
        self.accumulate_str(name, &value.to_string_lossy());
    }

    /// Accumulates raw bytes by their SHA-256 digest.
    pub fn accumulate_bytes(&mut self, name: &str, value: &[u8]) {
        let digest = Sha256::digest(value);
        write!(self.metadata, "{name}: ").unwrap();
        for b in digest.iter() {
            write!(self.metadata, "{b:02x}").unwrap();
        }
        self.metadata.push('\n');
    }

    /// Accumulates the identity of a nested future.
    pub fn accumulate_future(&mut self, name: &str, future: &dyn Future) {
        let key = future.robust_hash();
        writeln!(self.metadata, "{name}: {}", key.hex()).unwrap();
    }

    /// Finalize the [`FutureKey`].
    pub fn build(self) -> FutureKey {
        let hash = Sha256::digest(&self.metadata).into();

        FutureKey {
            metadata: self.metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for RobustHash {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}

/// A value that can contribute to a [`RobustHash`].
pub trait RobustlyHashable {
    fn accumulate_robust_hash(&self, hash: &mut RobustHash);
}

macro_rules! impl_hashable_int {
    ($($ty:ty),*) => {
        $(
            impl RobustlyHashable for $ty {
                fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
                    hash.accumulate_int(stringify!($ty), i64::from(*self));
                }
            }
        )*
    };
}

impl_hashable_int!(i8, i16, i32, i64, u8, u16, u32);

impl RobustlyHashable for bool {
    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_bool("bool", *self);
    }
}

impl RobustlyHashable for String {
    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_str("string", self);
    }
}

impl RobustlyHashable for PathBuf {
    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_path("path", self);
    }
}

impl RobustlyHashable for Vec<u8> {
    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_bytes("bytes", self);
    }
}
