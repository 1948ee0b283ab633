//! # fitimage
//!
//! An in-memory object model for Flattened Device Tree (FDT) blobs and a
//! verifier/extractor for Flattened Image Tree (FIT) packages layered on
//! top of it.
//!
//! - [`fdt`] — parse, navigate and mutate a tree of nodes and typed
//!   properties; look pieces up by slash-delimited path.
//! - [`blob`] — the binary codec: decode `.dtb` bytes into a tree and
//!   encode a tree back to the canonical blob layout.
//! - [`value`] — big-endian decoding of property values as fixed-width
//!   integers, tuples and arrays.
//! - [`fit`] — treat an FDT as a package of images and configurations:
//!   retrieve image payloads (inline, offset-relative or absolute,
//!   optionally AES-CBC encrypted) and verify embedded hashes and RSA
//!   signatures. All crypto is pure Rust.
//!
//! ## Example
//!
//! ```
//! use fitimage::fdt::Fdt;
//!
//! let mut f = Fdt::new();
//! f.root_mut().add_property("test").unwrap().set_u32(0xdead_beef);
//!
//! let dtb = fitimage::blob::serialize(&f);
//! let f2 = fitimage::blob::parse(&dtb).unwrap();
//! assert_eq!(f2.get_property("/test").unwrap().as_u32().unwrap(), 0xdead_beef);
//! assert_eq!(f, f2);
//! ```

pub mod blob;
pub mod fdt;
pub mod fit;
pub mod value;

use std::io;

use thiserror::Error;

/// Errors reported by this library.
///
/// The verification APIs in [`fit`] reserve `Ok(false)` for a
/// cryptographic mismatch; every other failure surfaces as one of these
/// variants so callers can tell "signature invalid" from "the blob was
/// malformed".
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad FDT magic")]
    BadMagic,

    #[error("unsupported FDT version {version} (last compatible {last_comp})")]
    UnsupportedVersion { version: u32, last_comp: u32 },

    #[error("truncated blob ({size} bytes, need at least {min})")]
    Truncated { size: usize, min: usize },

    #[error("malformed structure block: {0}")]
    Malformed(String),

    #[error("bad path")]
    BadPath,

    #[error("{0}")]
    InvalidName(&'static str),

    #[error("name exists: {0}")]
    NameExists(String),

    #[error("incompatible type")]
    IncompatibleType,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a node: {0}")]
    NotANode(String),

    #[error("not a property: {0}")]
    NotAProperty(String),

    #[error("missing data property")]
    MissingData,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgo(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("bad iv size")]
    BadIvSize,

    #[error("no hashes")]
    NoHashes,

    #[error("no signatures")]
    NoSignatures,

    #[error("missing symmetric key")]
    MissingSymmetricKey,

    #[error("no external data source")]
    NoExternalSource,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Compute CRC-32 of a byte slice (standard polynomial, matching
/// U-Boot's `crc32()`).
pub fn crc32(data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(data);
    h.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        // Standard CRC-32 check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
        assert_eq!(crc32(b""), 0);
    }
}
