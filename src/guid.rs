//! Stable identities: resource GUIDs and 128-bit type hashes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace used to derive type hashes from registered type names
const TYPE_NAMESPACE: Uuid = Uuid::from_u128(0x6a4f_1c2e_8d3b_4f7a_9e21_5b0c_d7e3_a914);

/// A globally unique, persistent identifier for a resource.
///
/// The GUID is the resource's runtime identity and the name of its metadata
/// file. It never changes once the object holding it has been constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(Uuid);

impl Guid {
    /// Creates a new, random (version 4) GUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil GUID, never handed out by `new`
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for Guid {
    /// Creates a new, random (version 4) GUID.
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Guid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 128-bit hash of a type's registered name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeHash(u128);

impl TypeHash {
    /// Hash a type name
    pub fn of_name(name: &str) -> Self {
        Self(Uuid::new_v5(&TYPE_NAMESPACE, name.as_bytes()).as_u128())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Immutable type identity: hash plus display name
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    hash: TypeHash,
    name: &'static str,
}

impl TypeInfo {
    pub fn new(name: &'static str) -> Self {
        Self {
            hash: TypeHash::of_name(name),
            name,
        }
    }

    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

// Identity is the hash; the name is display only.
impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for TypeInfo {}

impl std::hash::Hash for TypeInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_guid_round_trip_text() {
        let guid = Guid::new();
        let parsed: Guid = guid.to_string().parse().unwrap();
        assert_eq!(guid, parsed);
        assert!(!guid.is_nil());
    }

    #[test]
    fn test_guid_bytes() {
        let guid = Guid::from_u128(0x1234);
        assert_eq!(Guid::from_bytes(guid.to_bytes()), guid);
    }

    #[test]
    fn test_type_hash_is_stable_per_name() {
        assert_eq!(TypeHash::of_name("Mesh"), TypeHash::of_name("Mesh"));
        assert_ne!(TypeHash::of_name("Mesh"), TypeHash::of_name("Texture"));
    }

    #[test]
    fn test_type_info_ordering_is_total() {
        let infos: BTreeSet<TypeInfo> = ["Mesh", "Texture", "Material", "Scene"]
            .into_iter()
            .map(TypeInfo::new)
            .collect();
        assert_eq!(infos.len(), 4);

        let hashes: Vec<_> = infos.iter().map(|i| i.hash()).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }
}
