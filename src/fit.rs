//! FIT (Flattened Image Tree) verification and image extraction.
//!
//! A FIT package is an FDT whose `/images` children carry payloads —
//! inline in a `data` property, offset-relative after the blob
//! (`data-offset`), or at an absolute file position (`data-position`) —
//! plus `hash*` and `signature*` subnodes and an optional `cipher`
//! subnode marking the payload as AES-CBC ciphertext. `/configurations`
//! children carry RSA signatures over a selected subset of the raw blob.
//!
//! Callers hold both the parsed tree (for navigation) and the raw blob
//! (for configuration signature coverage); external payloads are
//! delivered through a caller-supplied [`Reader`] and key material
//! through a [`KeySource`]. All crypto is pure Rust.

use log::{debug, trace};
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::fdt::{Fdt, Node, Piece, Property};
use crate::{blob, Error, Result};

pub const FIT_IMAGES_PATH: &str = "/images";
pub const FIT_CONFS_PATH: &str = "/configurations";

pub const FIT_HASH_NODENAME: &str = "hash";
pub const FIT_SIG_NODENAME: &str = "signature";
pub const FIT_CIPHER_NODENAME: &str = "cipher";

pub const FIT_ALGO_PROP: &str = "algo";
pub const FIT_VALUE_PROP: &str = "value";
pub const FIT_KEY_HINT: &str = "key-name-hint";
pub const FIT_IV_HINT: &str = "iv-name-hint";
pub const FIT_DATA_PROP: &str = "data";

/// Properties excluded from configuration signature coverage.
const EXC_PROPS: &[&str] = &["data", "data-size", "data-position", "data-offset"];

/// What a [`KeySource`] lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// DER-encoded RSA public key: PKCS#1 or SubjectPublicKeyInfo.
    PublicKey,
    /// Raw symmetric cipher key bytes.
    SymmetricKey,
    /// Raw IV bytes; must match the cipher block size.
    SymmetricIv,
}

/// Delivers key material selected by a `key-name-hint`.
///
/// The hint is opaque to the library and interpreted entirely by the
/// caller. Returning `Ok(None)` for a public key marks the signature as
/// not required and it is skipped; returning `Ok(None)` for a symmetric
/// key or IV is a hard error at the point of need.
pub trait KeySource {
    fn key(&mut self, purpose: KeyPurpose, hint: &str) -> Result<Option<Vec<u8>>>;
}

impl<F> KeySource for F
where
    F: FnMut(KeyPurpose, &str) -> Result<Option<Vec<u8>>>,
{
    fn key(&mut self, purpose: KeyPurpose, hint: &str) -> Result<Option<Vec<u8>>> {
        self(purpose, hint)
    }
}

/// Reads external image data on behalf of the library.
///
/// Implementations must deliver exactly `len` bytes starting at `off` by
/// calling `sink` one or more times with contiguous chunks.
pub trait Reader {
    fn read(&mut self, off: u64, len: usize, sink: &mut dyn FnMut(&[u8])) -> Result<()>;
}

impl<F> Reader for F
where
    F: FnMut(u64, usize, &mut dyn FnMut(&[u8])) -> Result<()>,
{
    fn read(&mut self, off: u64, len: usize, sink: &mut dyn FnMut(&[u8])) -> Result<()> {
        self(off, len, sink)
    }
}

/// Raw FIT bytes plus a [`Reader`], required for images whose payload is
/// stored outside the structure block (`data-offset` / `data-position`).
pub struct External<'a> {
    pub fdt: &'a [u8],
    pub reader: &'a mut dyn Reader,
}

fn prop<'n>(node: &'n Node, name: &str) -> Option<&'n Property> {
    node.child(name).and_then(Piece::as_property)
}

fn get_prop<'n>(node: &'n Node, name: &str) -> Result<&'n Property> {
    prop(node, name).ok_or_else(|| Error::NotFound(name.to_string()))
}

// ---------------------------------------------------------------------------
// Image data retrieval
// ---------------------------------------------------------------------------

/// Logical payload size of an image node: `data-size-unciphered` for
/// encrypted images, else the inline `data` length, else `data-size`.
pub fn image_data_size(image: &Node) -> Result<usize> {
    if let Some(p) = prop(image, "data-size-unciphered") {
        return Ok(p.as_u32()? as usize);
    }
    if let Some(p) = prop(image, FIT_DATA_PROP) {
        return Ok(p.as_bytes().len());
    }
    Ok(get_prop(image, "data-size")?.as_u32()? as usize)
}

/// Retrieve the stored (possibly ciphered) payload bytes of an image.
fn image_data_raw(
    image: &Node,
    sink: &mut dyn FnMut(&[u8]),
    external: Option<&mut External<'_>>,
) -> Result<()> {
    if let Some(p) = prop(image, FIT_DATA_PROP) {
        sink(p.as_bytes());
        return Ok(());
    }

    let data_size = get_prop(image, "data-size")?.as_u32()? as usize;

    if let Some(p) = prop(image, "data-offset") {
        let Some(ext) = external else {
            return Err(Error::NoExternalSource);
        };
        blob::check_header(ext.fdt)?;
        // external data begins at the 4-byte aligned offset after the FDT
        let data_begin = (blob::totalsize(ext.fdt) as u64 + 3) & !3;
        let off = p.as_u32()? as u64;
        return ext.reader.read(data_begin + off, data_size, sink);
    }

    if let Some(p) = prop(image, "data-position") {
        let Some(ext) = external else {
            return Err(Error::NoExternalSource);
        };
        return ext.reader.read(p.as_u32()? as u64, data_size, sink);
    }

    Err(Error::MissingData)
}

/// Retrieve the payload of an image node, delivering it to `sink` in one
/// or more contiguous chunks whose concatenation is the full payload.
///
/// When the image carries a `cipher` subnode the stored bytes are
/// AES-CBC decrypted with key and IV obtained from `keys`, and the
/// plaintext is truncated at `data-size-unciphered`. `external` is
/// required when the payload is stored via `data-offset` or
/// `data-position`.
pub fn image_data(
    image: &Node,
    sink: &mut dyn FnMut(&[u8]),
    keys: Option<&mut dyn KeySource>,
    external: Option<&mut External<'_>>,
) -> Result<()> {
    let Some(cipher) = image.child(FIT_CIPHER_NODENAME).and_then(Piece::as_node) else {
        return image_data_raw(image, sink, external);
    };

    let algo = get_prop(cipher, FIT_ALGO_PROP)?.as_str()?;
    let key_hint = get_prop(cipher, FIT_KEY_HINT)?.as_str()?;
    let iv_hint = get_prop(cipher, FIT_IV_HINT)?.as_str()?;

    let Some(keys) = keys else {
        return Err(Error::MissingSymmetricKey);
    };
    let key = keys
        .key(KeyPurpose::SymmetricKey, key_hint)?
        .ok_or(Error::MissingSymmetricKey)?;
    let iv = keys
        .key(KeyPurpose::SymmetricIv, iv_hint)?
        .ok_or(Error::MissingSymmetricKey)?;

    let mut cbc = CbcDecryptor::new(algo, &key, &iv)?;
    let mut remain = get_prop(image, "data-size-unciphered")?.as_u32()? as usize;
    debug!(
        "decrypting image '{}' with {algo} ({remain} plaintext bytes)",
        image.name()
    );

    image_data_raw(
        image,
        &mut |ct| {
            cbc.decrypt(ct, &mut |pt| {
                let take = pt.len().min(remain);
                if take > 0 {
                    sink(&pt[..take]);
                    remain -= take;
                }
            });
        },
        external,
    )
}

/// Convenience wrapper collecting an image payload into a `Vec`.
pub fn image_data_vec(
    image: &Node,
    keys: Option<&mut dyn KeySource>,
    external: Option<&mut External<'_>>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image_data(image, &mut |d| out.extend_from_slice(d), keys, external)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Streaming AES-CBC decryption
// ---------------------------------------------------------------------------

const AES_BLOCK_SIZE: usize = 16;

enum CbcState {
    Aes128(cbc::Decryptor<aes::Aes128>),
    Aes192(cbc::Decryptor<aes::Aes192>),
    Aes256(cbc::Decryptor<aes::Aes256>),
}

/// Streaming AES-CBC decryptor reassembling caller-supplied chunks of
/// arbitrary size into block-aligned plaintext.
///
/// There is no padding removal; the caller truncates the plaintext to
/// `data-size-unciphered`. Trailing bytes that never complete a block
/// are silently discarded when the stream ends.
struct CbcDecryptor {
    state: CbcState,
    /// Partial-block reassembly buffer; always shorter than a block.
    pending: Vec<u8>,
}

impl CbcDecryptor {
    /// `algo` names the cipher and key length, e.g. `"aes128-cbc"`:
    /// the cipher is the prefix before the first digit, the key length
    /// the digits that follow.
    fn new(algo: &str, key: &[u8], iv: &[u8]) -> Result<Self> {
        use aes::cipher::KeyIvInit;

        let digits = algo
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(algo.len());
        let cipher = &algo[..digits];
        if cipher != "aes" {
            return Err(Error::UnsupportedAlgo(algo.to_string()));
        }
        if iv.len() != AES_BLOCK_SIZE {
            return Err(Error::BadIvSize);
        }
        let key_bits: u32 = algo[digits..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .map_err(|_| Error::UnsupportedAlgo(algo.to_string()))?;

        let bad_key = |_| Error::Crypto(format!("bad key size for {algo}"));
        let state = match key_bits {
            128 => CbcState::Aes128(cbc::Decryptor::new_from_slices(key, iv).map_err(bad_key)?),
            192 => CbcState::Aes192(cbc::Decryptor::new_from_slices(key, iv).map_err(bad_key)?),
            256 => CbcState::Aes256(cbc::Decryptor::new_from_slices(key, iv).map_err(bad_key)?),
            _ => return Err(Error::UnsupportedAlgo(algo.to_string())),
        };
        Ok(Self {
            state,
            pending: Vec::new(),
        })
    }

    fn decrypt_blocks(&mut self, buf: &mut [u8]) {
        use aes::cipher::{generic_array::GenericArray, BlockDecryptMut};

        macro_rules! dec {
            ($c:expr) => {
                for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
                    $c.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            };
        }
        match &mut self.state {
            CbcState::Aes128(c) => dec!(c),
            CbcState::Aes192(c) => dec!(c),
            CbcState::Aes256(c) => dec!(c),
        }
    }

    /// Feed a ciphertext chunk of arbitrary size; block-aligned
    /// plaintext is delivered to `sink` as it becomes available.
    fn decrypt(&mut self, mut ct: &[u8], sink: &mut dyn FnMut(&[u8])) {
        while !ct.is_empty() {
            if !self.pending.is_empty() || ct.len() < AES_BLOCK_SIZE {
                // reassemble a block from partial chunks
                let take = (AES_BLOCK_SIZE - self.pending.len()).min(ct.len());
                self.pending.extend_from_slice(&ct[..take]);
                ct = &ct[take..];
                if self.pending.len() < AES_BLOCK_SIZE {
                    return;
                }
                let mut block = std::mem::take(&mut self.pending);
                self.decrypt_blocks(&mut block);
                sink(&block);
                block.clear();
                self.pending = block;
            } else {
                // decrypt whole blocks in one go
                let whole = ct.len() - ct.len() % AES_BLOCK_SIZE;
                let mut buf = ct[..whole].to_vec();
                self.decrypt_blocks(&mut buf);
                sink(&buf);
                ct = &ct[whole..];
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Streaming hash selected by FIT `algo` name.
enum ImageHasher {
    Crc32(crc32fast::Hasher),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl ImageHasher {
    fn new(algo: &str) -> Result<Self> {
        match algo {
            "crc32" => Ok(Self::Crc32(crc32fast::Hasher::new())),
            "sha1" => Ok(Self::Sha1(Sha1::new())),
            "sha256" => Ok(Self::Sha256(Sha256::new())),
            "sha384" => Ok(Self::Sha384(Sha384::new())),
            "sha512" => Ok(Self::Sha512(Sha512::new())),
            _ => Err(Error::UnsupportedAlgo(algo.to_string())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// RSA PKCS#1 v1.5 verification
// ---------------------------------------------------------------------------

/// Import a DER public key, trying PKCS#1 then SubjectPublicKeyInfo.
fn load_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    use pkcs1::DecodeRsaPublicKey;
    use pkcs8::DecodePublicKey;

    RsaPublicKey::from_pkcs1_der(der)
        .or_else(|_| RsaPublicKey::from_public_key_der(der))
        .map_err(|e| Error::Crypto(format!("rsa key import failed: {e}")))
}

/// Verify an RSA PKCS#1 v1.5 signature over a precomputed digest.
/// Returns `Ok(false)` on mismatch.
fn rsa_verify(key: &RsaPublicKey, hash_algo: &str, digest: &[u8], sig: &[u8]) -> Result<bool> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use signature::hazmat::PrehashVerifier;

    let Ok(sig) = Signature::try_from(sig) else {
        return Ok(false);
    };
    let ok = match hash_algo {
        "sha1" => VerifyingKey::<Sha1>::new(key.clone())
            .verify_prehash(digest, &sig)
            .is_ok(),
        "sha256" => VerifyingKey::<Sha256>::new(key.clone())
            .verify_prehash(digest, &sig)
            .is_ok(),
        "sha384" => VerifyingKey::<Sha384>::new(key.clone())
            .verify_prehash(digest, &sig)
            .is_ok(),
        "sha512" => VerifyingKey::<Sha512>::new(key.clone())
            .verify_prehash(digest, &sig)
            .is_ok(),
        _ => return Err(Error::UnsupportedAlgo(hash_algo.to_string())),
    };
    Ok(ok)
}

/// Find the stored hash value for `algo` among an image's `hash*` nodes.
fn hash_value<'n>(image: &'n Node, algo: &str) -> Result<&'n [u8]> {
    for h in image.subnodes() {
        if !h.name().starts_with(FIT_HASH_NODENAME) {
            continue;
        }
        if get_prop(h, FIT_ALGO_PROP)?.as_str()? != algo {
            continue;
        }
        return Ok(get_prop(h, FIT_VALUE_PROP)?.as_bytes());
    }
    Err(Error::NotFound(format!("{algo} hash")))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify every `hash*` subnode of an image against its stored payload.
///
/// Hashes cover the stored bytes, so encrypted images are hashed as
/// ciphertext without decryption. Returns `Ok(false)` on the first
/// mismatch and fails with [`Error::NoHashes`] when the image has no
/// hash nodes at all.
pub fn verify_image_hashes(
    image: &Node,
    mut external: Option<&mut External<'_>>,
) -> Result<bool> {
    let mut have_hash = false;
    for h in image.subnodes() {
        if !h.name().starts_with(FIT_HASH_NODENAME) {
            continue;
        }

        let algo = get_prop(h, FIT_ALGO_PROP)?.as_str()?;
        let value = get_prop(h, FIT_VALUE_PROP)?.as_bytes();

        let mut hasher = ImageHasher::new(algo)?;
        image_data_raw(image, &mut |d| hasher.update(d), external.as_deref_mut())?;
        let digest = hasher.finalize();
        trace!(
            "image '{}' {}: {} byte digest computed",
            image.name(),
            h.name(),
            digest.len()
        );
        if digest != value {
            debug!("image '{}' {algo} hash mismatch", image.name());
            return Ok(false);
        }
        have_hash = true;
    }

    if !have_hash {
        return Err(Error::NoHashes);
    }
    Ok(true)
}

/// Verify every required `signature*` subnode of an image.
///
/// The image's hashes are verified first. Each signature's `algo` is
/// `"<hash-algo>,<sig-algo>"` with an `rsa*` signature algorithm; the
/// verified digest is the stored hash value for the named hash
/// algorithm. Signatures whose key the [`KeySource`] reports as not
/// required are skipped; fails with [`Error::NoSignatures`] if none were
/// processed.
pub fn verify_image_signatures(
    image: &Node,
    keys: &mut dyn KeySource,
    mut external: Option<&mut External<'_>>,
) -> Result<bool> {
    // make sure the image hasn't been corrupted
    if !verify_image_hashes(image, external.as_deref_mut())? {
        return Ok(false);
    }

    let mut have_signature = false;
    for s in image.subnodes() {
        if !s.name().starts_with(FIT_SIG_NODENAME) {
            continue;
        }

        let key_hint = get_prop(s, FIT_KEY_HINT)?.as_str()?;
        let algo = get_prop(s, FIT_ALGO_PROP)?.as_str()?;
        let sig = get_prop(s, FIT_VALUE_PROP)?.as_bytes();
        let Some((hash_algo, sig_algo)) = algo.split_once(',') else {
            return Err(Error::UnsupportedAlgo(algo.to_string()));
        };
        if !sig_algo.starts_with("rsa") {
            return Err(Error::UnsupportedAlgo(sig_algo.to_string()));
        }
        let digest = hash_value(image, hash_algo)?;

        let Some(der) = keys.key(KeyPurpose::PublicKey, key_hint)? else {
            debug!(
                "image '{}' {}: key '{key_hint}' not required, skipping",
                image.name(),
                s.name()
            );
            continue;
        };
        let key = load_public_key(&der)?;
        if !rsa_verify(&key, hash_algo, digest, sig)? {
            debug!("image '{}' {} failed to verify", image.name(), s.name());
            return Ok(false);
        }
        have_signature = true;
    }

    if !have_signature {
        return Err(Error::NoSignatures);
    }
    Ok(true)
}

/// Verify every required `signature*` subnode of the configuration node
/// at `config_path`.
///
/// `config_path` must be the canonical absolute path of the
/// configuration (e.g. `/configurations/conf-1`); a signature whose
/// `hashed-nodes` list does not contain it fails verification. `fit` is
/// the raw blob the tree was parsed from; `reader` is only needed when
/// covered images store external data.
///
/// For each required signature: the hashes of every top-level
/// `/images/...` node listed in `hashed-nodes` are verified (each image
/// once), then the digest is computed over the covered structure-block
/// regions followed by the strings-block slice named by
/// `hashed-strings`, and checked against the RSA signature.
pub fn verify_config_signatures(
    tree: &Fdt,
    config_path: &str,
    keys: &mut dyn KeySource,
    fit: &[u8],
    mut reader: Option<&mut dyn Reader>,
) -> Result<bool> {
    blob::check_header(fit)?;
    let config = tree.get_node(config_path)?;

    let strings_off = blob::off_dt_strings(fit);
    let mut have_signature = false;
    let mut verified_images: Vec<&str> = Vec::new();

    for s in config.subnodes() {
        if !s.name().starts_with(FIT_SIG_NODENAME) {
            continue;
        }

        let (_, strings_size) = get_prop(s, "hashed-strings")?.as_value::<(u32, u32)>()?;
        let strings_size = strings_size as usize;
        let hashed_nodes = get_prop(s, "hashed-nodes")?.as_stringlist()?;
        let sig = get_prop(s, FIT_VALUE_PROP)?.as_bytes();
        let algo = get_prop(s, FIT_ALGO_PROP)?.as_str()?;
        let hash_algo = algo.split_once(',').map_or(algo, |(h, _)| h);
        let key_hint = get_prop(s, FIT_KEY_HINT)?.as_str()?;

        let Some(der) = keys.key(KeyPurpose::PublicKey, key_hint)? else {
            debug!(
                "config '{}' {}: key '{key_hint}' not required, skipping",
                config.name(),
                s.name()
            );
            continue;
        };
        let key = load_public_key(&der)?;

        // a configuration signature must cover the configuration itself
        if !hashed_nodes.contains(&config_path) {
            debug!(
                "config '{}' {}: signature does not cover the configuration",
                config.name(),
                s.name()
            );
            return Ok(false);
        }

        // verify the hashes of every covered top-level image, once each
        for &h in &hashed_nodes {
            let Some(rest) = h.strip_prefix("/images/") else {
                continue;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            if verified_images.contains(&h) {
                continue;
            }
            let image = tree.get_node(h)?;
            let mut ext;
            let external = match reader.as_deref_mut() {
                Some(r) => {
                    ext = External { fdt: fit, reader: r };
                    Some(&mut ext)
                }
                None => None,
            };
            if !verify_image_hashes(image, external)? {
                return Ok(false);
            }
            verified_images.push(h);
        }

        if strings_off + strings_size > fit.len() {
            return Err(Error::Truncated {
                size: fit.len(),
                min: strings_off + strings_size,
            });
        }

        // digest the covered structure regions plus the strings slice
        let regions = blob::find_hash_regions(fit, &hashed_nodes, EXC_PROPS)?;
        let mut hasher = ImageHasher::new(hash_algo)?;
        for r in &regions {
            hasher.update(&fit[r.offset..r.offset + r.size]);
        }
        hasher.update(&fit[strings_off..strings_off + strings_size]);
        let digest = hasher.finalize();
        debug!(
            "config '{}' {}: {} regions hashed, {} byte digest",
            config.name(),
            s.name(),
            regions.len(),
            digest.len()
        );

        if !rsa_verify(&key, hash_algo, &digest, sig)? {
            debug!("config '{}' {} failed to verify", config.name(), s.name());
            return Ok(false);
        }
        have_signature = true;
    }

    if !have_signature {
        return Err(Error::NoSignatures);
    }
    Ok(true)
}
