use std::fmt;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use picky_asn1::wrapper::{Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1};
use picky_krb::data_types::{PrincipalName, Realm};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::TGT_SERVICE_NAME;
use crate::constants::name_types::{NT_ENTERPRISE, NT_PRINCIPAL, NT_SRV_INST};
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::secret::Secret;
use crate::utils::{integer_from_i64, integer_to_i64, kerberos_string};

/// A Kerberos principal name: realm plus name components.
///
/// The name type is carried along for encoding but does not take part in comparisons,
/// so `user@REALM` sent as NT-PRINCIPAL and as NT-UNKNOWN resolve to the same database entry.
#[derive(Debug, Clone)]
pub struct Principal {
    pub realm: String,
    pub components: Vec<String>,
    pub name_type: i64,
}

impl Principal {
    pub fn new<R, I, S>(realm: R, components: I) -> Self
    where
        R: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        let name_type = if components.len() > 1 { NT_SRV_INST } else { NT_PRINCIPAL };

        Self {
            realm: realm.into(),
            components,
            name_type,
        }
    }

    /// `krbtgt/{service_realm}@{issuing_realm}`.
    ///
    /// [Name of the TGS](https://www.rfc-editor.org/rfc/rfc4120#section-7.3)
    pub fn krbtgt(issuing_realm: &str, service_realm: &str) -> Self {
        Self::new(issuing_realm, [TGT_SERVICE_NAME, service_realm])
    }

    /// Returns the realm served by this ticket-granting service name, if it is one.
    pub fn tgs_realm(&self) -> Option<&str> {
        match self.components.as_slice() {
            [service, realm] if service == TGT_SERVICE_NAME => Some(realm.as_str()),
            _ => None,
        }
    }

    pub fn is_krbtgt(&self) -> bool {
        self.tgs_realm().is_some()
    }

    /// `krbtgt/REALM@OTHER` with `REALM != OTHER`.
    pub fn is_cross_realm_krbtgt(&self) -> bool {
        self.tgs_realm().is_some_and(|realm| realm != self.realm)
    }

    /// Default salt: the realm followed by every name component.
    ///
    /// [RFC 4120 Section 4](https://www.rfc-editor.org/rfc/rfc4120#section-4)
    pub fn default_salt(&self) -> String {
        let mut salt = self.realm.clone();
        for component in &self.components {
            salt.push_str(component);
        }

        salt
    }

    /// Builds the principal from its wire representation.
    ///
    /// Enterprise names (`NT-ENTERPRISE`) carry the realm inside their single component and
    /// are split accordingly.
    pub fn from_asn1(name: &PrincipalName, realm: &str) -> Result<Self, KdcError> {
        let name_type = integer_to_i64(&name.name_type.0).unwrap_or(NT_PRINCIPAL);
        let components: Vec<String> = name.name_string.0.0.iter().map(|component| component.to_string()).collect();

        if components.is_empty() {
            return Err(KdcError::MalformedRequest("principal name without components"));
        }

        if name_type == NT_ENTERPRISE {
            let enterprise_name = &components[0];
            let (user, enterprise_realm) = enterprise_name
                .rsplit_once('@')
                .ok_or(KdcError::MalformedRequest("enterprise principal name without realm"))?;

            return Ok(Self {
                realm: enterprise_realm.to_owned(),
                components: vec![user.to_owned()],
                name_type: NT_PRINCIPAL,
            });
        }

        Ok(Self {
            realm: realm.to_owned(),
            components,
            name_type,
        })
    }

    pub fn to_asn1_name(&self) -> Result<PrincipalName, KdcError> {
        let name_string = self
            .components
            .iter()
            .map(|component| kerberos_string(component))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PrincipalName {
            name_type: ExplicitContextTag0::from(integer_from_i64(self.name_type)),
            name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(name_string)),
        })
    }

    pub fn to_asn1_realm(&self) -> Result<Realm, KdcError> {
        kerberos_string(&self.realm)
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.realm == other.realm && self.components == other.components
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.realm.hash(state);
        self.components.hash(state);
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

bitflags! {
    /// Capability and status flags of a database entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PrincipalFlags: u32 {
        /// The principal may obtain tickets for itself.
        const CLIENT = 1 << 0;
        /// Tickets may be issued for this principal.
        const SERVER = 1 << 1;
        const INVALID = 1 << 2;
        const FORWARDABLE = 1 << 3;
        const PROXIABLE = 1 << 4;
        const POSTDATE = 1 << 5;
        const RENEWABLE = 1 << 6;
        const REQUIRE_PREAUTH = 1 << 7;
        const REQUIRE_HWAUTH = 1 << 8;
        /// Password-changing service: accepts clients with expired keys.
        const CHANGE_PW = 1 << 9;
        /// Tickets for this server must come from an AS exchange.
        const INITIAL = 1 << 10;
        const LOCKED_OUT = 1 << 11;
        const OK_AS_DELEGATE = 1 << 12;
        /// Cross-realm tickets reaching this server must have had their transited path checked.
        const REQUIRE_TRANSITED_CHECK = 1 << 13;
    }
}

impl PrincipalFlags {
    /// Usual flags of a user account.
    pub const USER: PrincipalFlags = PrincipalFlags::CLIENT
        .union(PrincipalFlags::FORWARDABLE)
        .union(PrincipalFlags::PROXIABLE)
        .union(PrincipalFlags::POSTDATE)
        .union(PrincipalFlags::RENEWABLE)
        .union(PrincipalFlags::REQUIRE_PREAUTH);

    /// Usual flags of a service account.
    pub const SERVICE: PrincipalFlags = PrincipalFlags::SERVER
        .union(PrincipalFlags::FORWARDABLE)
        .union(PrincipalFlags::PROXIABLE)
        .union(PrincipalFlags::POSTDATE)
        .union(PrincipalFlags::RENEWABLE);
}

/// Salt attached to a long-term key when it differs from the default one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(pub String);

/// One generation of a principal's long-term key.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub etype: EncryptionType,
    pub kvno: u32,
    pub key: Secret<Vec<u8>>,
    pub salt: Option<Salt>,
}

impl KeyEntry {
    pub fn new(etype: EncryptionType, kvno: u32, key: Vec<u8>) -> Self {
        Self {
            etype,
            kvno,
            key: Secret::new(key),
            salt: None,
        }
    }

    /// Derives the key from a password with the cryptosystem's string-to-key function.
    pub fn from_password(etype: EncryptionType, kvno: u32, password: &str, salt: &str) -> Result<Self, KdcError> {
        let cipher = etype.cipher_suite().ok_or(KdcError::NoSuitableEtype)?.cipher();
        let key = cipher.generate_key_from_password(password.as_bytes(), salt.as_bytes())?;

        Ok(Self {
            etype,
            kvno,
            key: Secret::new(key),
            salt: Some(Salt(salt.to_owned())),
        })
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(Salt(salt.into()));
        self
    }
}

/// Read-only snapshot of a database entry.
#[derive(Debug, Clone)]
pub struct PrincipalEntry {
    pub principal: Principal,
    pub flags: PrincipalFlags,
    /// The entry may not be used before this time.
    pub valid_start: Option<OffsetDateTime>,
    /// The entry may not be used after this time.
    pub valid_end: Option<OffsetDateTime>,
    pub pw_end: Option<OffsetDateTime>,
    /// `None` means the realm-wide limit applies.
    pub max_life: Option<Duration>,
    /// `None` means the realm-wide limit applies.
    pub max_renew: Option<Duration>,
    /// Current key version number.
    pub kvno: u32,
    /// Long-term keys in database order.
    pub keys: Vec<KeyEntry>,
}

impl PrincipalEntry {
    pub fn new(principal: Principal, flags: PrincipalFlags) -> Self {
        Self {
            principal,
            flags,
            valid_start: None,
            valid_end: None,
            pw_end: None,
            max_life: None,
            max_renew: None,
            kvno: 1,
            keys: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: KeyEntry) -> Self {
        self.kvno = self.kvno.max(key.kvno);
        self.keys.push(key);
        self
    }

    /// Derives keys for every listed etype from the password, salted with the principal's default salt.
    pub fn with_password(mut self, password: &str, etypes: &[EncryptionType]) -> Result<Self, KdcError> {
        let salt = self.principal.default_salt();
        for etype in etypes {
            let key = KeyEntry::from_password(*etype, self.kvno, password, &salt)?;
            self.keys.push(key);
        }

        Ok(self)
    }

    /// Finds the key used to encrypt something with the given etype and, optionally, key version.
    pub fn find_key(&self, etype: EncryptionType, kvno: Option<u32>) -> Option<&KeyEntry> {
        let kvno = kvno.unwrap_or(self.kvno);

        self.keys.iter().find(|key| key.etype == etype && key.kvno == kvno)
    }

    /// Keys of the current generation, in database order.
    pub fn current_keys(&self) -> impl Iterator<Item = &KeyEntry> {
        self.keys.iter().filter(move |key| key.kvno == self.kvno)
    }

    /// Salt to advertise for the given key.
    pub fn salt_for(&self, key: &KeyEntry) -> String {
        key.salt
            .as_ref()
            .map(|salt| salt.0.clone())
            .unwrap_or_else(|| self.principal.default_salt())
    }
}

bitflags! {
    /// Why the KDC looks a principal up.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LookupFlags: u32 {
        const CLIENT = 1 << 0;
        const SERVER = 1 << 1;
        /// The principal is a ticket-granting service whose key decrypts a presented TGT.
        const KRBTGT = 1 << 2;
        const CANONICALIZE = 1 << 3;
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("principal database is unavailable: {0}")]
    Unavailable(String),

    #[error("principal entry is corrupted: {0}")]
    Corrupted(String),
}

/// The principal and key storage backend.
///
/// Implementations return fully materialised snapshots with decrypted keys. The KDC never
/// modifies an entry and never queries the same principal twice while computing a reply.
pub trait PrincipalProvider {
    fn lookup(&self, principal: &Principal, flags: LookupFlags) -> Result<Option<PrincipalEntry>, ProviderError>;
}

impl<P: PrincipalProvider + ?Sized> PrincipalProvider for &P {
    fn lookup(&self, principal: &Principal, flags: LookupFlags) -> Result<Option<PrincipalEntry>, ProviderError> {
        (**self).lookup(principal, flags)
    }
}

impl<P: PrincipalProvider + ?Sized> PrincipalProvider for std::sync::Arc<P> {
    fn lookup(&self, principal: &Principal, flags: LookupFlags) -> Result<Option<PrincipalEntry>, ProviderError> {
        (**self).lookup(principal, flags)
    }
}
