use md5::{Digest, Md5};
use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, OctetStringAsn1, Optional};
use picky_krb::crypto::ChecksumSuite;
use picky_krb::data_types::{Checksum, EncryptedData};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::constants::checksum_types::{HMAC_SHA1_96_AES128, HMAC_SHA1_96_AES256, HMAC_SHA1_DES3_KD, RSA_MD5};
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::principal::KeyEntry;
use crate::secret::Secret;
use crate::utils::{integer_from_i64, integer_to_i64};

/// Borrowed encryption key together with its type and version.
#[derive(Clone, Copy)]
pub struct KeyRef<'a> {
    pub etype: EncryptionType,
    /// `None` for session keys.
    pub kvno: Option<u32>,
    pub key: &'a [u8],
}

impl<'a> KeyRef<'a> {
    pub fn session(etype: EncryptionType, key: &'a Secret<Vec<u8>>) -> Self {
        Self {
            etype,
            kvno: None,
            key: key.as_ref(),
        }
    }
}

impl<'a> From<&'a KeyEntry> for KeyRef<'a> {
    fn from(key: &'a KeyEntry) -> Self {
        Self {
            etype: key.etype,
            kvno: Some(key.kvno),
            key: key.key.as_ref(),
        }
    }
}

pub fn encrypt_data(key: KeyRef<'_>, key_usage: i32, plaintext: &[u8]) -> Result<EncryptedData, KdcError> {
    let cipher = key.etype.cipher_suite().ok_or(KdcError::NoSuitableEtype)?.cipher();
    let cipher_text = cipher.encrypt(key.key, key_usage, plaintext)?;

    Ok(EncryptedData {
        etype: ExplicitContextTag0::from(key.etype.to_asn1()),
        kvno: Optional::from(key.kvno.map(|kvno| ExplicitContextTag1::from(integer_from_i64(i64::from(kvno))))),
        cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher_text)),
    })
}

/// Decrypts `data` with `key`.
///
/// Returns `None` when the data is not encrypted with a key of this type or fails the integrity check.
pub fn decrypt_data(key: KeyRef<'_>, key_usage: i32, data: &EncryptedData) -> Option<Zeroizing<Vec<u8>>> {
    if EncryptionType::from_asn1(&data.etype.0) != Some(key.etype) {
        return None;
    }

    let cipher = key.etype.cipher_suite()?.cipher();

    cipher.decrypt(key.key, key_usage, &data.cipher.0.0).ok().map(Zeroizing::new)
}

/// Key version number an `EncryptedData` claims to be encrypted with.
pub fn encrypted_data_kvno(data: &EncryptedData) -> Option<u32> {
    data.kvno
        .0
        .as_ref()
        .and_then(|kvno| integer_to_i64(&kvno.0))
        .and_then(|kvno| u32::try_from(kvno).ok())
}

/// Keyed checksum type that goes with the encryption type.
///
/// [Checksum Types](https://www.rfc-editor.org/rfc/rfc3962#section-7)
pub fn keyed_checksum_type(etype: EncryptionType) -> Option<i64> {
    match etype {
        EncryptionType::AES256_CTS_HMAC_SHA1_96 => Some(HMAC_SHA1_96_AES256),
        EncryptionType::AES128_CTS_HMAC_SHA1_96 => Some(HMAC_SHA1_96_AES128),
        EncryptionType::DES3_CBC_SHA1_KD => Some(HMAC_SHA1_DES3_KD),
        _ => None,
    }
}

/// Verifies a checksum over `data`.
///
/// Only keyed checksums matching the key type are accepted. The unkeyed RSA-MD5 checksum is accepted
/// only when `allow_unkeyed` is set.
pub fn verify_checksum(
    checksum: &Checksum,
    key: KeyRef<'_>,
    key_usage: i32,
    data: &[u8],
    allow_unkeyed: bool,
) -> Result<(), KdcError> {
    let checksum_type = integer_to_i64(&checksum.cksumtype.0).unwrap_or(-1);
    let expected = checksum.checksum.0.0.as_slice();

    if checksum_type == RSA_MD5 {
        if !allow_unkeyed {
            return Err(KdcError::InappropriateChecksum("unkeyed checksums are not allowed"));
        }

        let mut md5 = Md5::new();
        md5.update(data);

        return checksums_match(md5.finalize().as_slice(), expected);
    }

    if keyed_checksum_type(key.etype) != Some(checksum_type) {
        return Err(KdcError::InappropriateChecksum(
            "checksum type does not match the key type",
        ));
    }

    let suite = usize::try_from(checksum_type)
        .ok()
        .and_then(|checksum_type| ChecksumSuite::try_from(checksum_type).ok())
        .ok_or(KdcError::ChecksumTypeNotSupported(checksum_type))?;
    let computed = suite.hasher().checksum(key.key, key_usage, data)?;

    checksums_match(&computed, expected)
}

fn checksums_match(computed: &[u8], expected: &[u8]) -> Result<(), KdcError> {
    if bool::from(computed.ct_eq(expected)) {
        Ok(())
    } else {
        Err(KdcError::Modified("checksum mismatch"))
    }
}
