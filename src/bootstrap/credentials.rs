//! RSA credentials for the local node and its peers.
//!
//! Layout under the confbase:
//! ```text
//! <confbase>/
//! ├── rsa_key.priv     (PEM private key, mode 0600)
//! └── hosts/
//!     └── <peer>       (host fragment; its PEM block is the peer's public key)
//! ```
//!
//! Every source is an entry in an ordered list of attempts. An attempt either
//! yields a key, passes to the next source because it is not configured, or
//! fails the whole lookup.

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConfigTree;

/// Public exponent implied by an inline hex modulus.
pub const PUBLIC_EXPONENT: u32 = 0xFFFF;

/// Default private key file name inside the confbase.
pub const PRIVATE_KEY_FILE: &str = "rsa_key.priv";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("PrivateKey used but no PublicKey found!")]
    MissingPublicKey,

    #[error("invalid hexadecimal value for {option}")]
    InvalidHex { option: &'static str },

    #[error("error reading RSA key file `{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable RSA key in `{}' (tried {})", .path.display(), .tried.join(", "))]
    UnrecognizedPem { path: PathBuf, tried: Vec<&'static str> },

    #[error("no public key for {peer}")]
    NoPublicKey {
        peer: String,
        #[source]
        source: Box<CredentialError>,
    },
}

/// An RSA key: public modulus and exponent, plus the private exponent for
/// the local node.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    modulus: BigUint,
    exponent: BigUint,
    private_exponent: Option<BigUint>,
}

impl Credential {
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn exponent(&self) -> &BigUint {
        &self.exponent
    }

    pub fn has_private(&self) -> bool {
        self.private_exponent.is_some()
    }

    pub fn bits(&self) -> usize {
        self.modulus.bits()
    }

    /// Upper-case hex of the modulus, the form used by an inline `PublicKey`.
    pub fn modulus_hex(&self) -> String {
        hex::encode_upper(self.modulus.to_bytes_be())
    }

    /// First 8 hex characters of `SHA256(modulus)`.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.modulus.to_bytes_be());
        hex::encode(digest)[..8].to_string()
    }

    fn from_public(key: &RsaPublicKey) -> Self {
        Self {
            modulus: key.n().clone(),
            exponent: key.e().clone(),
            private_exponent: None,
        }
    }

    fn from_private(key: &RsaPrivateKey) -> Self {
        Self {
            modulus: key.n().clone(),
            exponent: key.e().clone(),
            private_exponent: Some(key.d().clone()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("bits", &self.bits())
            .field("fingerprint", &self.fingerprint())
            .field("private", &self.has_private())
            .finish()
    }
}

/// Resolve the public key of `peer`.
///
/// Order: inline `PublicKey`, then `PublicKeyFile`, then `<confbase>/hosts/<peer>`.
pub fn load_public_credential(
    peer: &str,
    config: &ConfigTree,
    confbase: &Path,
) -> Result<Credential, CredentialError> {
    let sources = KeySources { peer, config, confbase };
    resolve(&sources, &PUBLIC_CHAIN).map_err(|e| {
        CredentialError::NoPublicKey {
            peer: peer.to_string(),
            source: Box::new(e),
        }
    })
}

/// Resolve the local node's private key.
///
/// Order: inline `PrivateKey` + `PublicKey`, then `PrivateKeyFile`
/// (default `<confbase>/rsa_key.priv`).
pub fn load_private_credential(
    config: &ConfigTree,
    confbase: &Path,
) -> Result<Credential, CredentialError> {
    let sources = KeySources { peer: "", config, confbase };
    resolve(&sources, &PRIVATE_CHAIN)
}

// ── internals ────────────────────────────────────────────────────────────────

struct KeySources<'a> {
    peer: &'a str,
    config: &'a ConfigTree,
    confbase: &'a Path,
}

impl KeySources<'_> {
    fn path_option(&self, variable: &str) -> Option<PathBuf> {
        self.config.get_string(variable).map(|p| self.confbase.join(p))
    }
}

enum Attempt<T> {
    Loaded(T),
    /// Source not configured; try the next one.
    Next,
    Fail(CredentialError),
}

/// A source that may be absent from the configuration.
type Source = fn(&KeySources<'_>) -> Attempt<Credential>;
/// The conventional location every chain ends with; it always answers.
type Fallback = fn(&KeySources<'_>) -> Result<Credential, CredentialError>;

struct Chain {
    sources: &'static [Source],
    fallback: Fallback,
}

const PUBLIC_CHAIN: Chain = Chain {
    sources: &[inline_public, public_key_file],
    fallback: host_file,
};
const PRIVATE_CHAIN: Chain = Chain {
    sources: &[inline_private],
    fallback: private_key_file,
};

fn resolve(sources: &KeySources<'_>, chain: &Chain) -> Result<Credential, CredentialError> {
    for attempt in chain.sources {
        match attempt(sources) {
            Attempt::Loaded(credential) => return Ok(credential),
            Attempt::Next => continue,
            Attempt::Fail(e) => return Err(e),
        }
    }
    (chain.fallback)(sources)
}

fn inline_public(src: &KeySources<'_>) -> Attempt<Credential> {
    let Some(hex) = src.config.get_string("PublicKey") else {
        return Attempt::Next;
    };
    match parse_hex(hex, "PublicKey") {
        Ok(modulus) => Attempt::Loaded(Credential {
            modulus,
            exponent: BigUint::from(PUBLIC_EXPONENT),
            private_exponent: None,
        }),
        Err(e) => Attempt::Fail(e),
    }
}

fn public_key_file(src: &KeySources<'_>) -> Attempt<Credential> {
    match src.path_option("PublicKeyFile") {
        Some(path) => finish(read_pem(&path, PUBLIC_FORMATS)),
        None => Attempt::Next,
    }
}

fn host_file(src: &KeySources<'_>) -> Result<Credential, CredentialError> {
    let path = src.confbase.join("hosts").join(src.peer);
    read_pem(&path, PUBLIC_FORMATS)
}

fn inline_private(src: &KeySources<'_>) -> Attempt<Credential> {
    let Some(private_hex) = src.config.get_string("PrivateKey") else {
        return Attempt::Next;
    };
    let Some(public_hex) = src.config.get_string("PublicKey") else {
        return Attempt::Fail(CredentialError::MissingPublicKey);
    };
    let parsed = parse_hex(public_hex, "PublicKey")
        .and_then(|n| Ok((n, parse_hex(private_hex, "PrivateKey")?)));
    match parsed {
        Ok((modulus, d)) => Attempt::Loaded(Credential {
            modulus,
            exponent: BigUint::from(PUBLIC_EXPONENT),
            private_exponent: Some(d),
        }),
        Err(e) => Attempt::Fail(e),
    }
}

fn private_key_file(src: &KeySources<'_>) -> Result<Credential, CredentialError> {
    let path = src
        .path_option("PrivateKeyFile")
        .unwrap_or_else(|| src.confbase.join(PRIVATE_KEY_FILE));

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(source) => return Err(CredentialError::Io { path, source }),
    };
    check_permissions(&file, &path);
    drop(file);

    read_pem(&path, PRIVATE_FORMATS)
}

fn finish(result: Result<Credential, CredentialError>) -> Attempt<Credential> {
    match result {
        Ok(credential) => Attempt::Loaded(credential),
        Err(e) => Attempt::Fail(e),
    }
}

/// Warn when the key file is accessible by group or others. Returns whether
/// the warning was emitted.
#[cfg(unix)]
fn check_permissions(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let insecure = file
        .metadata()
        .is_ok_and(|meta| meta.mode() & !0o100700 != 0);
    if insecure {
        warn!(path = %path.display(), "insecure file permissions for RSA private key file");
    }
    insecure
}

#[cfg(not(unix))]
fn check_permissions(_file: &File, _path: &Path) -> bool {
    false
}

struct PemFormat {
    label: &'static str,
    decode: fn(&str) -> Option<Credential>,
}

const PUBLIC_FORMATS: &[PemFormat] = &[
    PemFormat { label: "RSA PUBLIC KEY", decode: decode_pkcs1_public },
    PemFormat { label: "PUBLIC KEY", decode: decode_spki_public },
];

const PRIVATE_FORMATS: &[PemFormat] = &[
    PemFormat { label: "RSA PRIVATE KEY", decode: decode_pkcs1_private },
    PemFormat { label: "PRIVATE KEY", decode: decode_pkcs8_private },
];

fn decode_pkcs1_public(pem: &str) -> Option<Credential> {
    RsaPublicKey::from_pkcs1_pem(pem).ok().map(|k| Credential::from_public(&k))
}

fn decode_spki_public(pem: &str) -> Option<Credential> {
    RsaPublicKey::from_public_key_pem(pem).ok().map(|k| Credential::from_public(&k))
}

fn decode_pkcs1_private(pem: &str) -> Option<Credential> {
    RsaPrivateKey::from_pkcs1_pem(pem).ok().map(|k| Credential::from_private(&k))
}

fn decode_pkcs8_private(pem: &str) -> Option<Credential> {
    RsaPrivateKey::from_pkcs8_pem(pem).ok().map(|k| Credential::from_private(&k))
}

/// Try each PEM format in turn, reading the file afresh for every attempt.
fn read_pem(path: &Path, formats: &[PemFormat]) -> Result<Credential, CredentialError> {
    let mut tried = Vec::with_capacity(formats.len());
    for format in formats {
        let text = fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tried.push(format.label);
        if let Some(credential) = extract_pem_block(&text).and_then(format.decode) {
            debug!(path = %path.display(), format = format.label, "loaded RSA key");
            return Ok(credential);
        }
    }
    Err(CredentialError::UnrecognizedPem {
        path: path.to_path_buf(),
        tried,
    })
}

/// First `-----BEGIN` … `-----END …-----` block in `text`, if any.
fn extract_pem_block(text: &str) -> Option<&str> {
    let start = text.find("-----BEGIN")?;
    let end_marker = start + text[start..].find("-----END")?;
    let close = end_marker + "-----END".len();
    let end = close + text[close..].find("-----")? + "-----".len();
    Some(&text[start..end])
}

fn parse_hex(value: &str, option: &'static str) -> Result<BigUint, CredentialError> {
    let value = value.trim();
    let padded;
    let digits = if value.len() % 2 == 1 {
        padded = format!("0{value}");
        padded.as_str()
    } else {
        value
    };
    let bytes = hex::decode(digits).map_err(|_| CredentialError::InvalidHex { option })?;
    if bytes.is_empty() {
        return Err(CredentialError::InvalidHex { option });
    }
    Ok(BigUint::from_bytes_be(&bytes))
}
