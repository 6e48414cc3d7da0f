use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag4, ExplicitContextTag5,
    ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8, ExplicitContextTag9, ExplicitContextTag10,
    ExplicitContextTag11, ExplicitContextTag12, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_asn1::restricted_string::IA5String;
use picky_asn1_der::Asn1DerError;
use picky_krb::constants::types::KRB_ERROR_MSG_TYPE;
use picky_krb::crypto::KerberosCryptoError;
use picky_krb::data_types::{KerberosStringAsn1, PaData, PrincipalName, Realm};
use picky_krb::messages::{KdcReqBody, KrbError, KrbErrorInner};
use thiserror::Error;
use time::OffsetDateTime;

use crate::KERBEROS_VERSION;
use crate::constants::error_codes::*;
use crate::principal::ProviderError;
use crate::utils::{integer_from_i64, kerberos_time};

/// Text sent to the client instead of the details of an internal failure.
const GENERIC_ERROR_TEXT: &str = "internal KDC error";

#[derive(Error, Debug)]
pub enum KdcError {
    #[error("KRB_AP_ERR_BADVERSION: got invalid Kerberos version ({version:?}): expected [{expected}]")]
    BadKrbVersion { version: Vec<u8>, expected: u8 },

    #[error("KRB_AP_ERR_MSG_TYPE: got invalid Kerberos message type ({msg_type:?}): expected [{expected}]")]
    BadMsgType { msg_type: Vec<u8>, expected: u8 },

    #[error("KDC_ERR_WRONG_REALM: wrong realm: {0}")]
    WrongRealm(String),

    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("invalid Kerberos string: {0}")]
    InvalidKerberosString(String),

    #[error("KDC_ERR_C_PRINCIPAL_UNKNOWN: {0}")]
    ClientPrincipalUnknown(String),

    #[error("KDC_ERR_S_PRINCIPAL_UNKNOWN: {0}")]
    ServerPrincipalUnknown(String),

    #[error("KDC_ERR_ETYPE_NOSUPP: no common encryption type")]
    NoSuitableEtype,

    #[error("KDC_ERR_NULL_KEY: {0} has an empty key")]
    NullKey(String),

    #[error("KDC_ERR_SUMTYPE_NOSUPP: checksum type {0} is not supported")]
    ChecksumTypeNotSupported(i64),

    /// Both preauthentication errors carry the METHOD-DATA (ETYPE-INFO2 hints) returned to the client
    /// in the KRB-ERROR e-data.
    #[error("KDC_ERR_PREAUTH_FAILED: {reason}")]
    PreAuthFailed { reason: &'static str, hints: Vec<PaData> },

    #[error("KDC_ERR_PREAUTH_REQUIRED: {reason}")]
    PreAuthRequired { reason: &'static str, hints: Vec<PaData> },

    #[error("KRB_AP_ERR_SKEW: {0}")]
    ClockSkew(&'static str),

    #[error("KRB_AP_ERR_BAD_INTEGRITY: {0} decryption failed")]
    BadIntegrity(&'static str),

    #[error("KRB_AP_ERR_MODIFIED: {0}")]
    Modified(&'static str),

    #[error("KRB_AP_ERR_INAPP_CKSUM: {0}")]
    InappropriateChecksum(&'static str),

    #[error("KDC_ERR_BADOPTION: {0}")]
    BadOption(&'static str),

    #[error("KDC_ERR_CANNOT_POSTDATE: {0}")]
    CannotPostdate(&'static str),

    #[error("KDC_ERR_NEVER_VALID: {0}")]
    NeverValid(String),

    #[error("KRB_AP_ERR_TKT_EXPIRED: {0}")]
    TicketExpired(&'static str),

    #[error("KRB_AP_ERR_TKT_NYV: {0}")]
    TicketNotYetValid(&'static str),

    #[error("KDC_ERR_POLICY: {0}")]
    Policy(String),

    #[error("KDC_ERR_CLIENT_REVOKED: {0}")]
    ClientRevoked(String),

    #[error("KDC_ERR_CLIENT_NOTYET: {0}")]
    ClientNotYetValid(String),

    #[error("KDC_ERR_NAME_EXP: {0}")]
    ClientExpired(String),

    #[error("KDC_ERR_SERVICE_NOTYET: {0}")]
    ServiceNotYetValid(String),

    #[error("KDC_ERR_SERVICE_EXP: {0}")]
    ServiceExpired(String),

    #[error("KDC_ERR_KEY_EXPIRED: password of {0} has expired")]
    KeyExpired(String),

    #[error("KDC_ERR_SERVER_NOMATCH: {0}")]
    ServerNoMatch(&'static str),

    #[error("KDC_ERR_TRTYPE_NOSUPP: transited encoding type {0} is not supported")]
    TransitedTypeNotSupported(i64),

    #[error("KDC_ERR_PATH_NOT_ACCEPTED: {0}")]
    PathNotAccepted(String),

    #[error("KRB_AP_ERR_NOT_US: {0}")]
    NotUs(String),

    #[error("KRB_AP_ERR_BADMATCH: {0}")]
    BadMatch(&'static str),

    #[error("KRB_AP_ERR_BADADDR: {0}")]
    BadAddress(&'static str),

    #[error("KRB_AP_ERR_BADKEYVER: ticket kvno {got} does not match key version {expected}")]
    BadKeyVersion { expected: u32, got: u32 },

    #[error("principal database failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("ASN1 DER encoding failed: {0:?}")]
    Asn1Encode(#[from] Asn1DerError),

    #[error("encryption failed: {0:?}")]
    EncryptionFailed(#[from] KerberosCryptoError),

    #[error("KRB_ERR_GENERIC: internal error: {0}")]
    InternalError(&'static str),
}

impl KdcError {
    pub(crate) fn preauth_failed(reason: &'static str) -> Self {
        KdcError::PreAuthFailed {
            reason,
            hints: Vec::new(),
        }
    }

    /// Kerberos error code reported to the client.
    pub fn error_code(&self) -> u32 {
        match self {
            KdcError::BadKrbVersion { .. } => KRB_AP_ERR_BADVERSION,
            KdcError::BadMsgType { .. } => KRB_AP_ERR_MSG_TYPE,
            KdcError::WrongRealm(_) => KDC_ERR_WRONG_REALM,
            KdcError::MalformedRequest(_) => KRB_ERR_GENERIC,
            KdcError::InvalidKerberosString(_) => KRB_ERR_GENERIC,
            KdcError::ClientPrincipalUnknown(_) => KDC_ERR_C_PRINCIPAL_UNKNOWN,
            KdcError::ServerPrincipalUnknown(_) => KDC_ERR_S_PRINCIPAL_UNKNOWN,
            KdcError::NoSuitableEtype => KDC_ERR_ETYPE_NOSUPP,
            KdcError::NullKey(_) => KDC_ERR_NULL_KEY,
            KdcError::ChecksumTypeNotSupported(_) => KDC_ERR_SUMTYPE_NOSUPP,
            KdcError::PreAuthFailed { .. } => KDC_ERR_PREAUTH_FAILED,
            KdcError::PreAuthRequired { .. } => KDC_ERR_PREAUTH_REQUIRED,
            KdcError::ClockSkew(_) => KRB_AP_ERR_SKEW,
            KdcError::BadIntegrity(_) => KRB_AP_ERR_BAD_INTEGRITY,
            KdcError::Modified(_) => KRB_AP_ERR_MODIFIED,
            KdcError::InappropriateChecksum(_) => KRB_AP_ERR_INAPP_CKSUM,
            KdcError::BadOption(_) => KDC_ERR_BADOPTION,
            KdcError::CannotPostdate(_) => KDC_ERR_CANNOT_POSTDATE,
            KdcError::NeverValid(_) => KDC_ERR_NEVER_VALID,
            KdcError::TicketExpired(_) => KRB_AP_ERR_TKT_EXPIRED,
            KdcError::TicketNotYetValid(_) => KRB_AP_ERR_TKT_NYV,
            KdcError::Policy(_) => KDC_ERR_POLICY,
            KdcError::ClientRevoked(_) => KDC_ERR_CLIENT_REVOKED,
            KdcError::ClientNotYetValid(_) => KDC_ERR_CLIENT_NOTYET,
            KdcError::ClientExpired(_) => KDC_ERR_NAME_EXP,
            KdcError::ServiceNotYetValid(_) => KDC_ERR_SERVICE_NOTYET,
            KdcError::ServiceExpired(_) => KDC_ERR_SERVICE_EXP,
            KdcError::KeyExpired(_) => KDC_ERR_KEY_EXPIRED,
            KdcError::ServerNoMatch(_) => KDC_ERR_SERVER_NOMATCH,
            KdcError::TransitedTypeNotSupported(_) => KDC_ERR_TRTYPE_NOSUPP,
            KdcError::PathNotAccepted(_) => KDC_ERR_PATH_NOT_ACCEPTED,
            KdcError::NotUs(_) => KRB_AP_ERR_NOT_US,
            KdcError::BadMatch(_) => KRB_AP_ERR_BADMATCH,
            KdcError::BadAddress(_) => KRB_AP_ERR_BADADDR,
            KdcError::BadKeyVersion { .. } => KRB_AP_ERR_BADKEYVER,
            KdcError::Provider(_) => KRB_ERR_GENERIC,
            KdcError::Asn1Encode(_) => KRB_ERR_GENERIC,
            KdcError::EncryptionFailed(_) => KRB_ERR_GENERIC,
            KdcError::InternalError(_) => KRB_ERR_GENERIC,
        }
    }

    /// Internal failures whose details must stay on the server side.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            KdcError::Provider(_)
                | KdcError::Asn1Encode(_)
                | KdcError::EncryptionFailed(_)
                | KdcError::InternalError(_)
                | KdcError::InvalidKerberosString(_)
        )
    }

    /// Converts the error into a [KrbError] message.
    ///
    /// RFC: [KRB_ERROR Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.9.1).
    pub fn into_krb_error(self, ctx: &ErrorContext<'_>) -> KrbError {
        let error_code = self.error_code();

        let e_text = if self.is_internal() {
            error!(error = %self, "KDC internal error");
            GENERIC_ERROR_TEXT.to_owned()
        } else {
            self.to_string()
        };

        let e_data = match self {
            KdcError::PreAuthFailed { hints, .. } | KdcError::PreAuthRequired { hints, .. } if !hints.is_empty() => {
                match picky_asn1_der::to_vec(&Asn1SequenceOf::from(hints)) {
                    Ok(method_data) => Some(method_data),
                    Err(err) => {
                        error!(?err, "failed to encode METHOD-DATA");
                        None
                    }
                }
            }
            _ => None,
        };

        let (crealm, cname) = ctx
            .request
            .and_then(|body| {
                body.cname
                    .0
                    .as_ref()
                    .map(|cname| (body.realm.0.clone(), cname.0.clone()))
            })
            .unzip();
        let sname = ctx
            .request
            .and_then(|body| body.sname.0.as_ref().map(|sname| sname.0.clone()))
            .unwrap_or_else(|| ctx.sname.clone());

        // Microseconds    ::= INTEGER (0..999999)
        let susec = ctx.now.microsecond().min(999_999);

        KrbError::from(KrbErrorInner {
            pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![KRB_ERROR_MSG_TYPE])),
            ctime: Optional::from(None),
            cusec: Optional::from(None),
            stime: ExplicitContextTag4::from(kerberos_time(ctx.now)),
            susec: ExplicitContextTag5::from(integer_from_i64(i64::from(susec))),
            error_code: ExplicitContextTag6::from(error_code),
            crealm: Optional::from(crealm.map(ExplicitContextTag7::from)),
            cname: Optional::from(cname.map(ExplicitContextTag8::from)),
            realm: ExplicitContextTag9::from(ctx.realm.clone()),
            sname: ExplicitContextTag10::from(sname),
            e_text: Optional::from(
                IA5String::from_string(e_text)
                    .ok()
                    .map(|text| ExplicitContextTag11::from(KerberosStringAsn1::from(text))),
            ),
            e_data: Optional::from(e_data.map(|data| ExplicitContextTag12::from(OctetStringAsn1::from(data)))),
        })
    }
}

/// What the KDC knows about the failed request when building a [KrbError].
pub struct ErrorContext<'a> {
    /// Realm of this KDC.
    pub realm: &'a Realm,
    /// Used when the request does not name a server, e.g. when it could not be decoded at all.
    pub sname: &'a PrincipalName,
    pub request: Option<&'a KdcReqBody>,
    pub now: OffsetDateTime,
}
