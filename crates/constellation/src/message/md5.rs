// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MD5-derived identity hashes for groups and hosts.
//!
//! CHIRP identifies a group and a host by the MD5 digest of their UTF-8
//! names, so that the fixed 42-byte datagram never carries variable-length
//! strings. The digest is used purely as an identifier; it has no security
//! function here.

use md5::{Digest, Md5};

/// A 16-byte MD5 digest identifying a group or host.
///
/// Equality and ordering are byte-lexicographic, which makes the hash
/// usable as a map key with a stable sort order across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    /// Hash the UTF-8 bytes of a name.
    pub fn new(name: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(name.as_bytes());
        Md5Hash(hasher.finalize().into())
    }

    /// Rebuild a hash from raw digest bytes received on the wire.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Md5Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for Md5Hash {
    fn from(bytes: [u8; 16]) -> Self {
        Md5Hash(bytes)
    }
}

impl std::fmt::Display for Md5Hash {
    /// 32 lower-case hex digits.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 1321 appendix A.5 test suite.
    #[test]
    fn rfc1321_vectors() {
        let vectors = [
            ("", "d41d8cd98f00b204e9800998ecf8427e"),
            ("a", "0cc175b9c0f1b6a831c399e269772661"),
            ("abc", "900150983cd24fb0d6963f7d28e17f72"),
            ("message digest", "f96b697d7cb7938d525a2f31aaf161d0"),
            ("abcdefghijklmnopqrstuvwxyz", "c3fcd3d76192e4007dfb496cca67e13b"),
            (
                "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789",
                "d174ab98d277d9f5a5611c2c9f419d9f",
            ),
            (
                "12345678901234567890123456789012345678901234567890123456789012345678901234567890",
                "57edf4a22be3c955ac49da2e2107b67a",
            ),
        ];
        for (input, expected) in vectors {
            assert_eq!(Md5Hash::new(input).to_string(), expected, "md5({input:?})");
        }
    }

    #[test]
    fn ordering_is_byte_lexicographic() {
        let a = Md5Hash::from_bytes([0x00; 16]);
        let mut high = [0x00; 16];
        high[0] = 0x01;
        let b = Md5Hash::from_bytes(high);
        assert!(a < b);

        let mut tail = [0x00; 16];
        tail[15] = 0x01;
        let c = Md5Hash::from_bytes(tail);
        assert!(a < c && c < b);
    }

    #[test]
    fn digest_roundtrips_through_bytes() {
        let hash = Md5Hash::new("sat1");
        assert_eq!(Md5Hash::from_bytes(*hash.as_bytes()), hash);
    }
}
