//! Resource headers: cache, CORS and redirect policy.
//!
//! Headers are immutable once stored and are addressed by the blake3 hash of
//! their canonical encoding, so identical headers share one stored copy.
//!
//! Encoding (all integers little-endian):
//!
//! ```text
//! u8 version
//! u8 immutable, u8 cache preset, u32 len, custom cache directive
//! u16 methods, u8 origin count, 32 bytes per origin role, u8 cors preset, u32 len, custom cors
//! u16 redirect code, u32 len, redirect location
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::id::B3Id;
use crate::method::{METHOD_COUNT, Method, MethodSet};
use crate::role::Role;

const HEADER_VERSION: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("Invalid version: {0}")]
    InvalidVersion(u8),
    #[error("Invalid preset: {0}")]
    InvalidPreset(u8),
    #[error("Truncated data")]
    Truncated,
    #[error("Directive is not valid UTF-8")]
    InvalidUtf8,
    #[error("Expected {METHOD_COUNT} origin roles, got {0}")]
    OriginCount(usize),
    #[error("Method mask {0:#x} has bits beyond the nine methods")]
    MethodBits(u16),
    #[error("Invalid redirect code {0}")]
    RedirectCode(u16),
    #[error("Redirect {0} has no location")]
    RedirectLocation(u16),
    #[error("{0} preset and custom directive are both set")]
    PresetWithCustom(&'static str),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CachePreset {
    #[default]
    None = 0,
    NoCache = 1,
    Short = 2,
    Medium = 3,
    Long = 4,
    Permanent = 5,
}

impl TryFrom<u8> for CachePreset {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::NoCache,
            2 => Self::Short,
            3 => Self::Medium,
            4 => Self::Long,
            5 => Self::Permanent,
            other => return Err(HeaderError::InvalidPreset(other)),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CorsPreset {
    #[default]
    None = 0,
    Public = 1,
    Restricted = 2,
    Private = 3,
}

impl TryFrom<u8> for CorsPreset {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Public,
            2 => Self::Restricted,
            3 => Self::Private,
            other => return Err(HeaderError::InvalidPreset(other)),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheControl {
    /// Forbids any further mutation of a resource that has content.
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub preset: CachePreset,
    #[serde(default)]
    pub custom: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorsPolicy {
    pub methods: MethodSet,
    /// Role authorised for each method, indexed by [`Method::index`].
    pub origins: Vec<Role>,
    #[serde(default)]
    pub preset: CorsPreset,
    #[serde(default)]
    pub custom: String,
}

impl CorsPolicy {
    /// Every method allowed, with the same role authorised for all of them.
    pub fn uniform(methods: MethodSet, role: Role) -> Self {
        Self {
            methods,
            origins: vec![role; METHOD_COUNT],
            ..Self::default()
        }
    }

    /// Replace the role authorised for one method.
    pub fn with_origin(mut self, method: Method, role: Role) -> Self {
        if self.origins.len() < METHOD_COUNT {
            self.origins.resize(METHOD_COUNT, Role::DEFAULT_ADMIN);
        }
        self.origins[method.index()] = role;
        self
    }

    /// The role authorised for `method`; admins only when unset.
    pub fn role_for(&self, method: Method) -> Role {
        self.origins
            .get(method.index())
            .copied()
            .unwrap_or(Role::DEFAULT_ADMIN)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Redirect {
    /// 0 when there is no redirect.
    pub code: u16,
    pub location: String,
}

impl Redirect {
    pub fn is_set(&self) -> bool {
        self.code != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderInfo {
    #[serde(default)]
    pub cache: CacheControl,
    pub cors: CorsPolicy,
    #[serde(default)]
    pub redirect: Redirect,
}

impl HeaderInfo {
    /// Header installed on a fresh site: everything allowed, reads public,
    /// writes restricted to admins.
    pub fn site_default() -> Self {
        let cors = [Method::Options, Method::Head, Method::Get, Method::Locate]
            .into_iter()
            .fold(
                CorsPolicy::uniform(MethodSet::ALL, Role::DEFAULT_ADMIN),
                |cors, method| cors.with_origin(method, Role::public()),
            );

        Self {
            cors,
            ..Self::default()
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.cache.immutable
    }

    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.cache.preset != CachePreset::None && !self.cache.custom.is_empty() {
            return Err(HeaderError::PresetWithCustom("cache"));
        }
        if self.cors.preset != CorsPreset::None && !self.cors.custom.is_empty() {
            return Err(HeaderError::PresetWithCustom("cors"));
        }
        if !self.cors.methods.is_valid() {
            return Err(HeaderError::MethodBits(self.cors.methods.bits()));
        }
        if self.cors.origins.len() != METHOD_COUNT {
            return Err(HeaderError::OriginCount(self.cors.origins.len()));
        }

        let redirect = &self.redirect;
        if redirect.is_set() {
            if !(300..=399).contains(&redirect.code) || redirect.code == 304 {
                return Err(HeaderError::RedirectCode(redirect.code));
            }
            if redirect.location.is_empty() {
                return Err(HeaderError::RedirectLocation(redirect.code));
            }
        }

        Ok(())
    }

    /// Encode to the canonical binary format. Fails on a header that does
    /// not validate.
    pub fn encode(&self) -> Result<Bytes, HeaderError> {
        self.validate()?;
        let origin_count = u8::try_from(self.cors.origins.len())
            .map_err(|_| HeaderError::OriginCount(self.cors.origins.len()))?;

        let mut buf = BytesMut::with_capacity(
            64 + self.cors.origins.len() * 32
                + self.cache.custom.len()
                + self.cors.custom.len()
                + self.redirect.location.len(),
        );

        buf.put_u8(HEADER_VERSION);

        buf.put_u8(self.cache.immutable as u8);
        buf.put_u8(self.cache.preset as u8);
        put_str(&mut buf, &self.cache.custom);

        buf.put_u16_le(self.cors.methods.bits());
        buf.put_u8(origin_count);
        for role in &self.cors.origins {
            buf.put_slice(role.as_bytes());
        }
        buf.put_u8(self.cors.preset as u8);
        put_str(&mut buf, &self.cors.custom);

        buf.put_u16_le(self.redirect.code);
        put_str(&mut buf, &self.redirect.location);

        Ok(buf.freeze())
    }

    /// Decode from the canonical binary format.
    pub fn decode(mut data: &[u8]) -> Result<Self, HeaderError> {
        let version = get_u8(&mut data)?;
        if version != HEADER_VERSION {
            return Err(HeaderError::InvalidVersion(version));
        }

        let immutable = get_u8(&mut data)? != 0;
        let cache_preset = CachePreset::try_from(get_u8(&mut data)?)?;
        let cache_custom = get_str(&mut data)?;

        if data.remaining() < 3 {
            return Err(HeaderError::Truncated);
        }
        let methods = data.get_u16_le();
        let methods = MethodSet::from_bits(methods).ok_or(HeaderError::MethodBits(methods))?;
        let origin_count = data.get_u8() as usize;
        if data.remaining() < origin_count * 32 {
            return Err(HeaderError::Truncated);
        }
        let mut origins = Vec::with_capacity(origin_count);
        for _ in 0..origin_count {
            let mut role = [0u8; 32];
            data.copy_to_slice(&mut role);
            origins.push(Role::from(role));
        }
        let cors_preset = CorsPreset::try_from(get_u8(&mut data)?)?;
        let cors_custom = get_str(&mut data)?;

        if data.remaining() < 2 {
            return Err(HeaderError::Truncated);
        }
        let code = data.get_u16_le();
        let location = get_str(&mut data)?;

        Ok(Self {
            cache: CacheControl {
                immutable,
                preset: cache_preset,
                custom: cache_custom,
            },
            cors: CorsPolicy {
                methods,
                origins,
                preset: cors_preset,
                custom: cors_custom,
            },
            redirect: Redirect { code, location },
        })
    }

    /// Content address of this header.
    pub fn address(&self) -> Result<B3Id, HeaderError> {
        Ok(B3Id::hash(&self.encode()?))
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_u8(data: &mut &[u8]) -> Result<u8, HeaderError> {
    if data.remaining() < 1 {
        return Err(HeaderError::Truncated);
    }
    Ok(data.get_u8())
}

fn get_str(data: &mut &[u8]) -> Result<String, HeaderError> {
    if data.remaining() < 4 {
        return Err(HeaderError::Truncated);
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return Err(HeaderError::Truncated);
    }
    let s = std::str::from_utf8(&data[..len]).map_err(|_| HeaderError::InvalidUtf8)?;
    let s = s.to_string();
    data.advance(len);
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeaderInfo {
        HeaderInfo {
            cache: CacheControl {
                immutable: true,
                preset: CachePreset::Long,
                custom: String::new(),
            },
            cors: CorsPolicy::uniform(
                [Method::Get, Method::Head].into_iter().collect(),
                Role::public(),
            ),
            redirect: Redirect {
                code: 301,
                location: "/elsewhere".into(),
            },
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let header = sample();
        let decoded = HeaderInfo::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn address_is_content_derived() {
        assert_eq!(sample().address().unwrap(), sample().address().unwrap());

        let mut other = sample();
        other.cache.immutable = false;
        assert_ne!(other.address().unwrap(), sample().address().unwrap());
    }

    #[test]
    fn site_default_is_valid_and_public_for_reads() {
        let header = HeaderInfo::site_default();
        header.validate().unwrap();
        assert_eq!(header.cors.methods, MethodSet::ALL);
        assert_eq!(header.cors.role_for(Method::Get), Role::public());
        assert_eq!(header.cors.role_for(Method::Options), Role::public());
        assert_eq!(header.cors.role_for(Method::Put), Role::DEFAULT_ADMIN);
        assert!(!header.is_immutable());
    }

    #[test]
    fn rejects_preset_with_custom_directive() {
        let mut header = sample();
        header.cache.custom = "max-age=60".into();
        assert_eq!(
            header.validate(),
            Err(HeaderError::PresetWithCustom("cache"))
        );

        header.cache.preset = CachePreset::None;
        assert_eq!(header.validate(), Ok(()));
    }

    #[test]
    fn rejects_wrong_origin_count() {
        let mut header = sample();
        header.cors.origins.pop();
        assert_eq!(header.validate(), Err(HeaderError::OriginCount(8)));
    }

    #[test]
    fn encode_refuses_invalid_headers() {
        let mut header = sample();
        header.cors.origins = vec![Role::public(); 300];
        assert_eq!(header.encode(), Err(HeaderError::OriginCount(300)));
        assert_eq!(header.address(), Err(HeaderError::OriginCount(300)));

        header.cors.origins = sample().cors.origins;
        header.cache.custom = "max-age=60".into();
        assert!(header.encode().is_err());
    }

    #[test]
    fn rejects_bad_redirects() {
        let mut header = sample();
        header.redirect.code = 304;
        assert_eq!(header.validate(), Err(HeaderError::RedirectCode(304)));

        header.redirect.code = 302;
        header.redirect.location.clear();
        assert_eq!(header.validate(), Err(HeaderError::RedirectLocation(302)));
    }

    #[test]
    fn decode_rejects_truncated_data() {
        let encoded = sample().encode().unwrap();
        assert_eq!(
            HeaderInfo::decode(&encoded[..encoded.len() - 3]),
            Err(HeaderError::Truncated)
        );
        assert_eq!(HeaderInfo::decode(&[]), Err(HeaderError::Truncated));
        assert_eq!(
            HeaderInfo::decode(&[0x07]),
            Err(HeaderError::InvalidVersion(7))
        );
    }

    #[test]
    fn missing_origin_defaults_to_admins() {
        let cors = CorsPolicy::default();
        assert_eq!(cors.role_for(Method::Get), Role::DEFAULT_ADMIN);
        let cors = cors.with_origin(Method::Get, Role::public());
        assert_eq!(cors.origins.len(), METHOD_COUNT);
        assert_eq!(cors.role_for(Method::Get), Role::public());
    }
}
