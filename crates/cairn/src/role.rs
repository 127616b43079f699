//! Role identifiers and calling principals.

use std::{fmt, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::id::ParseIdError;

/// Opaque 32-byte role identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Role([u8; 32]);

impl Role {
    /// Super-role: holds every role and manages all of them.
    pub const DEFAULT_ADMIN: Self = Self([0; 32]);

    /// Role identified by the blake3 hash of a name.
    pub fn named(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    /// Implicit membership for every principal that is not blacklisted.
    pub fn public() -> Self {
        Self::named("PUBLIC_ROLE")
    }

    /// Explicit denial membership.
    pub fn blacklist() -> Self {
        Self::named("BLACKLIST_ROLE")
    }

    /// The SITE_ADMIN identifier a fresh site starts with.
    pub fn initial_site_admin() -> Self {
        Self::named("SITE_ADMIN_ROLE")
    }

    /// Per-resource admin role, derived from the path on every check.
    pub fn resource_admin(path: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ADMIN:");
        hasher.update(path.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for Role {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::DEFAULT_ADMIN {
            f.write_str("DEFAULT_ADMIN")
        } else if *self == Self::public() {
            f.write_str("PUBLIC")
        } else if *self == Self::blacklist() {
            f.write_str("BLACKLIST")
        } else {
            f.write_str(&self.as_hex())
        }
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Role({self})")
    }
}

impl FromStr for Role {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| ParseIdError::Length(len))
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        blob.try_into()
            .map(Self)
            .map_err(|_| FromSqlError::InvalidBlobSize {
                expected_size: 32,
                blob_size: blob.len(),
            })
    }
}

/// Identity of the caller of an invocation, as established by the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for Principal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.0.as_bytes())))
    }
}

impl FromSql for Principal {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_roles_are_distinct() {
        let roles = [
            Role::DEFAULT_ADMIN,
            Role::public(),
            Role::blacklist(),
            Role::initial_site_admin(),
        ];
        for (i, a) in roles.iter().enumerate() {
            for b in &roles[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn resource_admin_is_derived_from_path() {
        assert_eq!(Role::resource_admin("/a"), Role::resource_admin("/a"));
        assert_ne!(Role::resource_admin("/a"), Role::resource_admin("/b"));
        assert_eq!(Role::resource_admin("/a"), Role::named("ADMIN:/a"));
    }

    #[test]
    fn display_names_builtin_roles() {
        assert_eq!(Role::DEFAULT_ADMIN.to_string(), "DEFAULT_ADMIN");
        assert_eq!(Role::public().to_string(), "PUBLIC");
        let custom = Role::named("editors");
        assert_eq!(custom.to_string(), custom.as_hex());
        assert_eq!(custom.as_hex().parse::<Role>().unwrap(), custom);
    }
}
