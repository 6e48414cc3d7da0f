use std::fmt;

use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::crypto::CipherSuite;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::KdcError;
use crate::principal::{KeyEntry, PrincipalEntry};
use crate::secret::Secret;
use crate::utils::{integer_from_i64, integer_to_i64};

/// Kerberos encryption type number.
///
/// [Encryption Type Assignment Numbers](https://www.rfc-editor.org/rfc/rfc3961#section-8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EncryptionType(pub i32);

impl EncryptionType {
    pub const DES_CBC_CRC: EncryptionType = EncryptionType(1);
    pub const DES_CBC_MD5: EncryptionType = EncryptionType(3);
    pub const DES3_CBC_SHA1_KD: EncryptionType = EncryptionType(16);
    pub const AES128_CTS_HMAC_SHA1_96: EncryptionType = EncryptionType(17);
    pub const AES256_CTS_HMAC_SHA1_96: EncryptionType = EncryptionType(18);
    pub const RC4_HMAC: EncryptionType = EncryptionType(23);

    /// Encryption types usable for long-term keys, strongest first.
    pub const SUPPORTED: [EncryptionType; 3] = [
        EncryptionType::AES256_CTS_HMAC_SHA1_96,
        EncryptionType::AES128_CTS_HMAC_SHA1_96,
        EncryptionType::DES3_CBC_SHA1_KD,
    ];

    /// Encryption types the KDC issues session keys for, strongest first.
    ///
    /// RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
    /// > The KDC will not issue tickets with a weak session key encryption type.
    pub const SESSION: [EncryptionType; 2] = [
        EncryptionType::AES256_CTS_HMAC_SHA1_96,
        EncryptionType::AES128_CTS_HMAC_SHA1_96,
    ];

    pub fn cipher_suite(self) -> Option<CipherSuite> {
        match self {
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => Some(CipherSuite::Aes256CtsHmacSha196),
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => Some(CipherSuite::Aes128CtsHmacSha196),
            EncryptionType::DES3_CBC_SHA1_KD => Some(CipherSuite::Des3CbcSha1Kd),
            _ => None,
        }
    }

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }

    pub fn is_session_capable(self) -> bool {
        Self::SESSION.contains(&self)
    }

    pub fn from_asn1(value: &IntegerAsn1) -> Option<Self> {
        integer_to_i64(value)
            .and_then(|etype| i32::try_from(etype).ok())
            .map(EncryptionType)
    }

    pub fn to_asn1(self) -> IntegerAsn1 {
        integer_from_i64(i64::from(self.0))
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EncryptionType::DES_CBC_CRC => write!(f, "des-cbc-crc"),
            EncryptionType::DES_CBC_MD5 => write!(f, "des-cbc-md5"),
            EncryptionType::DES3_CBC_SHA1_KD => write!(f, "des3-cbc-sha1-kd"),
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => write!(f, "aes128-cts-hmac-sha1-96"),
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => write!(f, "aes256-cts-hmac-sha1-96"),
            EncryptionType::RC4_HMAC => write!(f, "arcfour-hmac"),
            EncryptionType(other) => write!(f, "etype-{other}"),
        }
    }
}

/// Keys chosen for one exchange.
#[derive(Debug)]
pub struct NegotiatedKeys<'a> {
    /// Client long-term key: decrypts the preauthentication data and encrypts the AS reply.
    pub client_key: &'a KeyEntry,
    pub client_etype: EncryptionType,
    /// Server long-term key: encrypts the ticket.
    pub server_key: &'a KeyEntry,
    pub server_etype: EncryptionType,
}

/// Picks the client and server keys for the offered encryption types.
pub fn select_keys<'a>(
    client: &'a PrincipalEntry,
    server: &'a PrincipalEntry,
    offered: &[EncryptionType],
) -> Result<NegotiatedKeys<'a>, KdcError> {
    let client_key = select_client_key(client, offered)?;
    let server_key = select_server_key(server, offered)?;

    Ok(NegotiatedKeys {
        client_etype: client_key.etype,
        client_key,
        server_etype: server_key.etype,
        server_key,
    })
}

/// Returns the client key of the first offered encryption type the client holds.
pub fn select_client_key<'a>(client: &'a PrincipalEntry, offered: &[EncryptionType]) -> Result<&'a KeyEntry, KdcError> {
    let candidates = offered
        .iter()
        .filter(|etype| etype.is_supported())
        .filter_map(|etype| client.find_key(*etype, None));

    first_usable(candidates, &client.principal.to_string())
}

/// Returns the key the ticket is encrypted with.
///
/// The client cannot read the ticket, so when none of the offered types matches a server key
/// the server's strongest key is used instead.
///
/// RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
/// > ...using the encryption type associated with the server principal's key.
/// > (This choice is NOT affected by the etype field in the request.)
pub fn select_server_key<'a>(server: &'a PrincipalEntry, offered: &[EncryptionType]) -> Result<&'a KeyEntry, KdcError> {
    let offered_keys = offered
        .iter()
        .filter(|etype| etype.is_supported())
        .filter_map(|etype| server.find_key(*etype, None));
    let strongest_keys = EncryptionType::SUPPORTED
        .iter()
        .filter_map(|etype| server.find_key(*etype, None));

    first_usable(offered_keys.chain(strongest_keys), &server.principal.to_string())
}

fn first_usable<'a>(candidates: impl Iterator<Item = &'a KeyEntry>, owner: &str) -> Result<&'a KeyEntry, KdcError> {
    let mut saw_null_key = false;

    for key in candidates {
        if key.key.is_empty() {
            saw_null_key = true;
            continue;
        }

        return Ok(key);
    }

    if saw_null_key {
        Err(KdcError::NullKey(owner.to_owned()))
    } else {
        Err(KdcError::NoSuitableEtype)
    }
}

/// Picks the session key encryption type.
///
/// Candidates are the offered types in client preference order, restricted to [EncryptionType::SESSION].
/// When `krbtgt` is given (TGS exchange), a type the ticket-granting principal also holds a key for is
/// preferred, so that a peer KDC is not handed a session key it cannot use. The AS exchange passes `None`.
pub fn select_session_etype(
    offered: &[EncryptionType],
    krbtgt: Option<&PrincipalEntry>,
) -> Result<EncryptionType, KdcError> {
    let mut candidates = offered.iter().copied().filter(|etype| etype.is_session_capable());

    let first = candidates.clone().next().ok_or(KdcError::NoSuitableEtype)?;

    let shared = krbtgt.and_then(|krbtgt| {
        candidates.find(|etype| krbtgt.current_keys().any(|key| key.etype == *etype))
    });

    Ok(shared.unwrap_or(first))
}

/// Generates a fresh session key.
pub fn random_session_key(etype: EncryptionType) -> Result<Secret<Vec<u8>>, KdcError> {
    let cipher = etype.cipher_suite().ok_or(KdcError::NoSuitableEtype)?.cipher();

    let mut key = vec![0; cipher.key_size()];
    OsRng.fill_bytes(&mut key);

    Ok(Secret::new(key))
}
