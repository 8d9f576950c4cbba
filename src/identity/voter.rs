use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Opaque voter identity.
///
/// Every vote, submission and comment row stores one of these in its
/// `submitter_ip` column. Equality is plain string equality; nothing is
/// normalized (IPv6 spellings, proxy chains) on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VoterKey(String);

impl VoterKey {
    pub fn from_ip(ip: &str) -> Self {
        VoterKey(ip.to_owned())
    }

    /// Salted SHA-256 of the address, hex encoded.
    pub fn fingerprint(ip: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b":");
        hasher.update(ip.as_bytes());
        VoterKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for VoterKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        self.0.to_sql()
    }
}

/// How a request's source address becomes a [`VoterKey`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityScheme {
    #[default]
    RawIp,
    Salted(String),
}

impl IdentityScheme {
    pub fn resolve(&self, ip: &str) -> VoterKey {
        match self {
            IdentityScheme::RawIp => VoterKey::from_ip(ip),
            IdentityScheme::Salted(salt) => VoterKey::fingerprint(ip, salt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_ip_is_not_normalized() {
        let a = VoterKey::from_ip("::1");
        let b = VoterKey::from_ip("0:0:0:0:0:0:0:1");
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "::1");
    }

    #[test]
    fn test_fingerprint_is_stable_and_salted() {
        let a = VoterKey::fingerprint("10.0.0.1", "pepper");
        let b = VoterKey::fingerprint("10.0.0.1", "pepper");
        let c = VoterKey::fingerprint("10.0.0.1", "salt");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("10.0.0.1"));
    }

    #[test]
    fn test_scheme_resolution() {
        assert_eq!(IdentityScheme::RawIp.resolve("1.2.3.4").as_str(), "1.2.3.4");
        let salted = IdentityScheme::Salted("s".into()).resolve("1.2.3.4");
        assert_eq!(salted, VoterKey::fingerprint("1.2.3.4", "s"));
    }
}
