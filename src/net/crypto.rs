//! Cipher and digest catalog, and the local node's inbound crypto policy.
//!
//! Only the parameters needed to size session keys and MACs live here; the
//! packet path that actually encrypts is elsewhere.

use sha2::digest::OutputSizeUser;
use sha2::digest::typenum::Unsigned;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::config::ConfigTree;
use crate::error::AppError;

#[derive(Debug, PartialEq, Eq)]
pub struct CipherSpec {
    pub name: &'static str,
    pub key_len: usize,
    pub iv_len: usize,
    pub block_size: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DigestSpec {
    pub name: &'static str,
    /// Output size in bytes.
    pub size: usize,
}

const fn cipher(name: &'static str, key_len: usize, iv_len: usize, block_size: usize) -> CipherSpec {
    CipherSpec { name, key_len, iv_len, block_size }
}

pub static CIPHERS: &[CipherSpec] = &[
    cipher("bf-cbc", 16, 8, 8),
    cipher("bf-cfb", 16, 8, 1),
    cipher("bf-ofb", 16, 8, 1),
    cipher("bf-ecb", 16, 0, 8),
    cipher("aes-128-cbc", 16, 16, 16),
    cipher("aes-128-cfb", 16, 16, 1),
    cipher("aes-128-ofb", 16, 16, 1),
    cipher("aes-128-ctr", 16, 16, 1),
    cipher("aes-128-ecb", 16, 0, 16),
    cipher("aes-192-cbc", 24, 16, 16),
    cipher("aes-192-cfb", 24, 16, 1),
    cipher("aes-192-ofb", 24, 16, 1),
    cipher("aes-192-ctr", 24, 16, 1),
    cipher("aes-192-ecb", 24, 0, 16),
    cipher("aes-256-cbc", 32, 16, 16),
    cipher("aes-256-cfb", 32, 16, 1),
    cipher("aes-256-ofb", 32, 16, 1),
    cipher("aes-256-ctr", 32, 16, 1),
    cipher("aes-256-ecb", 32, 0, 16),
    cipher("camellia-128-cbc", 16, 16, 16),
    cipher("camellia-256-cbc", 32, 16, 16),
    cipher("cast5-cbc", 16, 8, 8),
    cipher("des-cbc", 8, 8, 8),
    cipher("des-ede3-cbc", 24, 8, 8),
    cipher("idea-cbc", 16, 8, 8),
];

const CIPHER_ALIASES: &[(&str, &str)] = &[
    ("blowfish", "bf-cbc"),
    ("bf", "bf-cbc"),
    ("aes128", "aes-128-cbc"),
    ("aes192", "aes-192-cbc"),
    ("aes256", "aes-256-cbc"),
    ("cast5", "cast5-cbc"),
    ("des", "des-cbc"),
    ("des3", "des-ede3-cbc"),
    ("idea", "idea-cbc"),
];

const fn output_size<D: OutputSizeUser>() -> usize {
    D::OutputSize::USIZE
}

pub static DIGESTS: &[DigestSpec] = &[
    DigestSpec { name: "md5", size: 16 },
    DigestSpec { name: "sha1", size: 20 },
    DigestSpec { name: "sha224", size: output_size::<Sha224>() },
    DigestSpec { name: "sha256", size: output_size::<Sha256>() },
    DigestSpec { name: "sha384", size: output_size::<Sha384>() },
    DigestSpec { name: "sha512", size: output_size::<Sha512>() },
    DigestSpec { name: "ripemd160", size: 20 },
];

pub const DEFAULT_CIPHER: &str = "bf-cbc";
pub const DEFAULT_DIGEST: &str = "sha1";
/// Fixed cipher and digest for the local node's outbound direction.
pub const OUTBOUND_CIPHER: &str = "bf-ofb";
pub const OUTBOUND_DIGEST: &str = "sha1";

pub const DEFAULT_MAC_LENGTH: usize = 4;
pub const MAX_COMPRESSION: i64 = 11;

pub fn cipher_by_name(name: &str) -> Option<&'static CipherSpec> {
    let name = CIPHER_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map_or(name, |&(_, canonical)| canonical);
    CIPHERS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn digest_by_name(name: &str) -> Option<&'static DigestSpec> {
    let name = match name.to_ascii_lowercase().as_str() {
        "sha-1" => "sha1",
        "sha-256" => "sha256",
        "sha-512" => "sha512",
        _ => return DIGESTS.iter().find(|d| d.name.eq_ignore_ascii_case(name)),
    };
    DIGESTS.iter().find(|d| d.name == name)
}

/// What the local node accepts on the inbound direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCrypto {
    pub cipher: Option<&'static CipherSpec>,
    pub digest: Option<&'static DigestSpec>,
    /// Session key material: cipher key plus IV, or 1 without a cipher.
    pub key_length: usize,
    pub mac_length: usize,
    pub compression: u8,
}

impl InboundCrypto {
    pub fn from_config(config: &ConfigTree) -> Result<Self, AppError> {
        let cipher = match config.get_string("Cipher") {
            Some(name) if name.eq_ignore_ascii_case("none") => None,
            Some(name) => Some(
                cipher_by_name(name)
                    .ok_or_else(|| AppError::Config(format!("Unrecognized cipher type {name}")))?,
            ),
            None => cipher_by_name(DEFAULT_CIPHER),
        };
        let key_length = cipher.map_or(1, |c| c.key_len + c.iv_len);

        let digest = match config.get_string("Digest") {
            Some(name) if name.eq_ignore_ascii_case("none") => None,
            Some(name) => Some(
                digest_by_name(name)
                    .ok_or_else(|| AppError::Config(format!("Unrecognized digest type {name}")))?,
            ),
            None => digest_by_name(DEFAULT_DIGEST),
        };

        let mac_length = match config.get_int("MACLength")? {
            None => DEFAULT_MAC_LENGTH,
            Some(len) => match digest {
                Some(d) if len > d.size as i64 => {
                    return Err(AppError::Config(format!(
                        "MAC length {len} exceeds size of digest {} ({} bytes)",
                        d.name, d.size
                    )));
                }
                Some(_) if len < 0 => {
                    return Err(AppError::Config(format!("Bogus MAC length {len}")));
                }
                _ => usize::try_from(len).unwrap_or(0),
            },
        };

        let compression = match config.get_int("Compression")? {
            None => 0,
            Some(level) if (0..=MAX_COMPRESSION).contains(&level) => level as u8,
            Some(level) => {
                return Err(AppError::Config(format!("Bogus compression level {level}")));
            }
        };

        Ok(Self { cipher, digest, key_length, mac_length, compression })
    }
}
