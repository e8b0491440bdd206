//! Standard security handler material: key derivation and per-object
//! encryption for revisions 2 to 4

use log::debug;
use md5::{Digest, Md5};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::context::Context;
use crate::crypto::{AESProvider, CryptoProvider, RC4Provider};
use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{Dict, Object};

// Standard padding string from the PDF spec, Algorithm 2 step a.
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

/// Active encryption material of a context
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Encryption {
    /// Algorithm version (1, 2 or 4)
    #[zeroize(skip)]
    pub v: u8,
    /// Standard handler revision (2, 3 or 4)
    #[zeroize(skip)]
    pub r: u8,
    /// File key length in bytes
    #[zeroize(skip)]
    pub key_length: usize,
    /// Permission bits, sign-extended as the spec stores them
    #[zeroize(skip)]
    pub p: i32,
    /// Owner password validation value
    pub o: Vec<u8>,
    /// User password validation value
    pub u: Vec<u8>,
    /// First element of the file ID
    pub id: Vec<u8>,
}

impl Encryption {
    /// True if string and stream data uses AES rather than RC4
    pub fn uses_aes(&self) -> bool {
        self.v == 4
    }
}

/// V, R and key length for the configured cipher flags.
///
/// AES implies the 128-bit V4/R4 crypt-filter layout; plain RC4 splits
/// into V2/R3 (128 bit) and V1/R2 (40 bit).
pub fn version_and_revision(encrypt_using_aes: bool, encrypt_using_128bit_key: bool) -> (u8, u8, usize) {
    if encrypt_using_aes {
        (4, 4, 16)
    } else if encrypt_using_128bit_key {
        (2, 3, 16)
    } else {
        (1, 2, 5)
    }
}

/// The `/P` entry value for configured permission bits.
///
/// Bits 3-6 and 9-12 are configurable, bits 7, 8 and 13-32 must be one,
/// the rest zero; the result is stored sign-extended.
pub fn permissions_value(bits: u32) -> i32 {
    ((bits & 0x0F3C) | 0xFFFF_F0C0) as i32
}

/// Build a fresh encryption dictionary without O and U values.
pub fn new_encrypt_dict(
    encrypt_using_aes: bool,
    encrypt_using_128bit_key: bool,
    permissions: i32,
) -> Dict {
    let (v, r, key_length) = version_and_revision(encrypt_using_aes, encrypt_using_128bit_key);

    let mut dict = Dict::new();
    dict.insert("Filter", Object::name("Standard"));
    dict.insert("V", Object::Integer(v as i64));
    dict.insert("R", Object::Integer(r as i64));
    dict.insert("Length", Object::Integer((key_length * 8) as i64));
    dict.insert("P", Object::Integer(permissions as i64));

    if v == 4 {
        let mut std_cf = Dict::new();
        std_cf.insert("AuthEvent", Object::name("DocOpen"));
        std_cf.insert("CFM", Object::name("AESV2"));
        std_cf.insert("Length", Object::Integer(key_length as i64));

        let mut cf = Dict::new();
        cf.insert("StdCF", Object::Dict(std_cf));

        dict.insert("CF", Object::Dict(cf));
        dict.insert("StmF", Object::name("StdCF"));
        dict.insert("StrF", Object::name("StdCF"));
    }

    dict
}

/// Validate an encryption dictionary and extract V, R and key length.
pub fn supported_encryption(dict: &Dict) -> PDFOptResult<(u8, u8, usize)> {
    match dict.get_name("Filter") {
        Some("Standard") => {}
        Some(other) => {
            return Err(PDFOptError::encryption(format!(
                "unsupported security handler: {}",
                other
            )))
        }
        None => return Err(PDFOptError::missing("Filter")),
    }

    let v = dict
        .get_integer("V")
        .ok_or_else(|| PDFOptError::missing("V"))?;
    let r = dict
        .get_integer("R")
        .ok_or_else(|| PDFOptError::missing("R"))?;

    if !matches!((v, r), (1, 2) | (2, 3) | (4, 4)) {
        return Err(PDFOptError::encryption(format!(
            "unsupported encryption V={} R={}",
            v, r
        )));
    }

    let length_bits = dict.get_integer("Length").unwrap_or(40);
    if length_bits % 8 != 0 || !(40..=128).contains(&length_bits) {
        return Err(PDFOptError::encryption(format!(
            "invalid key length: {} bits",
            length_bits
        )));
    }

    Ok((v as u8, r as u8, length_bits as usize / 8))
}

/// Recover encryption material from an existing encryption dictionary.
pub fn encryption_from_dict(dict: &Dict, id: Vec<u8>) -> PDFOptResult<Encryption> {
    let (v, r, key_length) = supported_encryption(dict)?;

    let p = dict
        .get_integer("P")
        .ok_or_else(|| PDFOptError::missing("P"))? as i32;
    let o = string_bytes(dict.get("O"), "O")?;
    let u = string_bytes(dict.get("U"), "U")?;

    Ok(Encryption {
        v,
        r,
        key_length,
        p,
        o,
        u,
        id,
    })
}

fn string_bytes(obj: Option<&Object>, key: &str) -> PDFOptResult<Vec<u8>> {
    match obj {
        Some(Object::HexLiteral(b)) | Some(Object::StringLiteral(b)) => Ok(b.clone()),
        Some(_) => Err(PDFOptError::encryption(format!("{} is not a string", key))),
        None => Err(PDFOptError::missing(key)),
    }
}

fn pad_password(password: &str) -> [u8; 32] {
    let bytes = password.as_bytes();
    let len = bytes.len().min(32);
    let mut padded = [0u8; 32];
    padded[..len].copy_from_slice(&bytes[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

fn md5_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

// Algorithm 2: file encryption key from the user password.
fn encryption_key(
    user_pw: &str,
    o: &[u8],
    p: i32,
    id: &[u8],
    r: u8,
    key_length: usize,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(user_pw));
    hasher.update(o);
    hasher.update(p.to_le_bytes());
    hasher.update(id);
    let mut key = hasher.finalize().to_vec();

    if r >= 3 {
        for _ in 0..50 {
            key = md5_hash(&key[..key_length]);
        }
    }

    key.truncate(key_length);
    key
}

/// Algorithm 3: the owner password validation value.
pub fn compute_o_value(ctx: &Context) -> PDFOptResult<Vec<u8>> {
    let enc = ctx
        .encryption
        .as_ref()
        .ok_or_else(|| PDFOptError::encryption("no encryption material"))?;

    let owner_pw = if ctx.conf.owner_pw.is_empty() {
        &ctx.conf.user_pw
    } else {
        &ctx.conf.owner_pw
    };

    let mut key = md5_hash(&pad_password(owner_pw));
    if enc.r >= 3 {
        for _ in 0..50 {
            key = md5_hash(&key[..enc.key_length]);
        }
    }
    key.truncate(enc.key_length);

    let mut o = pad_password(&ctx.conf.user_pw).to_vec();
    crate::crypto::rc4_apply(&key, &mut o)?;

    if enc.r >= 3 {
        for i in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            crate::crypto::rc4_apply(&round_key, &mut o)?;
        }
    }

    debug!("computed O value, {} bytes", o.len());
    Ok(o)
}

/// Algorithms 4 and 5: the user password validation value plus the file
/// encryption key it is derived from.
pub fn compute_u_value(ctx: &Context) -> PDFOptResult<(Vec<u8>, Vec<u8>)> {
    let enc = ctx
        .encryption
        .as_ref()
        .ok_or_else(|| PDFOptError::encryption("no encryption material"))?;

    let key = encryption_key(
        &ctx.conf.user_pw,
        &enc.o,
        enc.p,
        &enc.id,
        enc.r,
        enc.key_length,
    );

    let u = if enc.r == 2 {
        let mut u = PADDING.to_vec();
        crate::crypto::rc4_apply(&key, &mut u)?;
        u
    } else {
        let mut hasher = Md5::new();
        hasher.update(PADDING);
        hasher.update(&enc.id);
        let mut digest = hasher.finalize().to_vec();

        crate::crypto::rc4_apply(&key, &mut digest)?;
        for i in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            crate::crypto::rc4_apply(&round_key, &mut digest)?;
        }

        // 16 significant bytes; the tail is arbitrary, zeros here
        digest.resize(32, 0);
        digest
    };

    debug!("computed U value, {} bytes", u.len());
    Ok((u, key))
}

/// Per-object encryption key: MD5 over the file key, the low 3 bytes of
/// the object number, the 2 generation bytes and the AES salt, truncated
/// to min(fileKeyLen + 5, 16).
pub fn object_key(enc_key: &[u8], obj_nr: u32, gen_nr: u16, aes: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(enc_key);
    hasher.update(&obj_nr.to_le_bytes()[..3]);
    hasher.update(gen_nr.to_le_bytes());
    if aes {
        hasher.update(b"sAlT");
    }
    let mut key = hasher.finalize().to_vec();
    key.truncate((enc_key.len() + 5).min(16));
    key
}

pub(crate) fn encrypt_bytes(data: &[u8], key: &[u8], aes: bool) -> PDFOptResult<Vec<u8>> {
    if aes {
        AESProvider::new(key.len()).encrypt(data, key)
    } else {
        RC4Provider.encrypt(data, key)
    }
}

#[cfg(test)]
pub(crate) fn decrypt_bytes(data: &[u8], key: &[u8], aes: bool) -> PDFOptResult<Vec<u8>> {
    if aes {
        AESProvider::new(key.len()).decrypt(data, key)
    } else {
        RC4Provider.decrypt(data, key)
    }
}

/// Encrypt all strings and stream payloads of an object in place.
///
/// Indirect references are left alone; the referenced objects are
/// encrypted when they are written themselves.
pub fn encrypt_deep_object(obj: &mut Object, key: &[u8], aes: bool) -> PDFOptResult<()> {
    match obj {
        Object::StringLiteral(bytes) | Object::HexLiteral(bytes) => {
            *bytes = encrypt_bytes(bytes, key, aes)?;
        }
        Object::Array(elems) => {
            for e in elems.iter_mut() {
                encrypt_deep_object(e, key, aes)?;
            }
        }
        Object::Dict(dict) => encrypt_dict_values(dict, key, aes)?,
        Object::Stream(sd) => {
            encrypt_dict_values(&mut sd.dict, key, aes)?;
            if let Some(raw) = sd.raw.take() {
                let encrypted = encrypt_bytes(&raw, key, aes)?;
                sd.stream_length = Some(encrypted.len() as u64);
                sd.dict
                    .insert("Length", Object::Integer(encrypted.len() as i64));
                sd.raw = Some(encrypted);
            }
        }
        _ => {}
    }
    Ok(())
}

fn encrypt_dict_values(dict: &mut Dict, key: &[u8], aes: bool) -> PDFOptResult<()> {
    let keys: Vec<String> = dict.iter().map(|(k, _)| k.clone()).collect();
    for k in keys {
        if let Some(value) = dict.get_mut(&k) {
            encrypt_deep_object(value, key, aes)?;
        }
    }
    Ok(())
}
