use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    ExplicitContextTag9, ExplicitContextTag10, ExplicitContextTag11, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::types::{AS_REP_MSG_TYPE, TGS_REP_MSG_TYPE};
use picky_krb::data_types::{EncryptionKey, HostAddress, KerberosFlags, LastReq, LastReqInner, PaData};
use picky_krb::messages::{EncAsRepPart, EncKdcRepPart, EncTgsRepPart, KdcRep};
use time::OffsetDateTime;
use zeroize::Zeroizing;

use crate::KERBEROS_VERSION;
use crate::constants::key_usages::{AS_REP_ENC_PART, TGS_REP_ENC_PART_SESSION_KEY, TGS_REP_ENC_PART_SUB_KEY};
use crate::constants::last_req_types;
use crate::crypto::{KeyRef, encrypt_data};
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::flags::TicketFlags;
use crate::principal::{Principal, PrincipalEntry};
use crate::secret::Secret;
use crate::ticket::EncTicketBody;
use crate::utils::{integer_from_i64, kerberos_time};

/// Client-readable part of a KDC reply.
///
/// [EncKDCRepPart](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2)
#[derive(Debug, Clone)]
pub struct RepBody {
    pub session_key: Secret<Vec<u8>>,
    pub session_etype: EncryptionType,
    pub last_req: Vec<(i64, OffsetDateTime)>,
    pub nonce: IntegerAsn1,
    pub key_expiration: Option<OffsetDateTime>,
    pub flags: TicketFlags,
    pub auth_time: OffsetDateTime,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: OffsetDateTime,
    pub renew_till: Option<OffsetDateTime>,
    pub server: Principal,
    pub addresses: Vec<HostAddress>,
}

impl RepBody {
    /// Mirrors the ticket fields the client is allowed to see.
    pub fn new(ticket: &EncTicketBody, server: &Principal, nonce: IntegerAsn1) -> Self {
        Self {
            session_key: ticket.session_key.clone(),
            session_etype: ticket.session_etype,
            last_req: Vec::new(),
            nonce,
            key_expiration: None,
            flags: ticket.flags,
            auth_time: ticket.auth_time,
            start_time: ticket.start_time,
            end_time: ticket.end_time,
            renew_till: ticket.renew_till,
            server: server.clone(),
            addresses: ticket.addresses.clone(),
        }
    }

    /// Tells the client when its password and account expire.
    pub fn with_client_expirations(mut self, client: &PrincipalEntry) -> Self {
        if let Some(pw_end) = client.pw_end {
            self.last_req.push((-last_req_types::PASSWORD_EXPIRATION, pw_end));
            self.key_expiration = Some(pw_end);
        }
        if let Some(valid_end) = client.valid_end {
            self.last_req.push((-last_req_types::ACCOUNT_EXPIRATION, valid_end));
        }

        self
    }

    fn to_asn1(&self) -> Result<EncKdcRepPart, KdcError> {
        // LastReq must not be empty: without information, report "none" at the epoch.
        let last_req = if self.last_req.is_empty() {
            vec![(last_req_types::NONE, OffsetDateTime::UNIX_EPOCH)]
        } else {
            self.last_req.clone()
        };

        Ok(EncKdcRepPart {
            key: ExplicitContextTag0::from(EncryptionKey {
                key_type: ExplicitContextTag0::from(self.session_etype.to_asn1()),
                key_value: ExplicitContextTag1::from(OctetStringAsn1::from(self.session_key.as_ref().clone())),
            }),
            last_req: ExplicitContextTag1::from(LastReq::from(
                last_req
                    .into_iter()
                    .map(|(lr_type, lr_value)| LastReqInner {
                        lr_type: ExplicitContextTag0::from(integer_from_i64(lr_type)),
                        lr_value: ExplicitContextTag1::from(kerberos_time(lr_value)),
                    })
                    .collect::<Vec<_>>(),
            )),
            // RFC (https://datatracker.ietf.org/doc/html/rfc4120#section-3.1):
            // > The encrypted part of the KRB_AS_REP message also contains the nonce
            // > that MUST be matched with the nonce from the KRB_AS_REQ message.
            nonce: ExplicitContextTag2::from(self.nonce.clone()),
            key_expiration: Optional::from(self.key_expiration.map(|time| ExplicitContextTag3::from(kerberos_time(time)))),
            flags: ExplicitContextTag4::from(KerberosFlags::from(self.flags)),
            auth_time: ExplicitContextTag5::from(kerberos_time(self.auth_time)),
            start_time: Optional::from(self.start_time.map(|time| ExplicitContextTag6::from(kerberos_time(time)))),
            end_time: ExplicitContextTag7::from(kerberos_time(self.end_time)),
            renew_till: Optional::from(self.renew_till.map(|time| ExplicitContextTag8::from(kerberos_time(time)))),
            srealm: ExplicitContextTag9::from(self.server.to_asn1_realm()?),
            sname: ExplicitContextTag10::from(self.server.to_asn1_name()?),
            caadr: Optional::from(
                (!self.addresses.is_empty())
                    .then(|| ExplicitContextTag11::from(Asn1SequenceOf::from(self.addresses.clone()))),
            ),
            encrypted_pa_data: Optional::from(None),
        })
    }
}

/// Which exchange a reply answers, and so which key usage protects its encrypted part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    As,
    /// TGS reply encrypted with the TGT session key.
    TgsSessionKey,
    /// TGS reply encrypted with the authenticator subkey.
    TgsSubkey,
}

impl ReplyKind {
    pub fn key_usage(self) -> i32 {
        match self {
            ReplyKind::As => AS_REP_ENC_PART,
            ReplyKind::TgsSessionKey => TGS_REP_ENC_PART_SESSION_KEY,
            ReplyKind::TgsSubkey => TGS_REP_ENC_PART_SUB_KEY,
        }
    }

    fn msg_type(self) -> u8 {
        match self {
            ReplyKind::As => AS_REP_MSG_TYPE,
            ReplyKind::TgsSessionKey | ReplyKind::TgsSubkey => TGS_REP_MSG_TYPE,
        }
    }
}

/// Everything needed to assemble a KDC reply.
pub struct ReplyParts<'a> {
    pub ticket: &'a EncTicketBody,
    /// Server the ticket is issued for.
    pub server: &'a Principal,
    /// Key the ticket is encrypted with: the server long-term key, or a session key in user-to-user mode.
    pub server_key: KeyRef<'a>,
    pub body: RepBody,
    /// Key the client-readable part is encrypted with.
    pub reply_key: KeyRef<'a>,
    pub padata: Vec<PaData>,
}

/// Assembles a KDC reply.
///
/// The ticket is encrypted for the server (usage 2), the reply body for the client with the key usage
/// of `kind`.
///
/// RFC: [KRB_KDC_REP Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2).
pub fn encode_reply(kind: ReplyKind, parts: ReplyParts<'_>) -> Result<KdcRep, KdcError> {
    let ReplyParts {
        ticket,
        server,
        server_key,
        body,
        reply_key,
        padata,
    } = parts;

    let enc_part = body.to_asn1()?;
    // Some implementations use the EncTGSRepPart tag for AS replies too. We always use the exchange's own tag.
    let encoded = Zeroizing::new(match kind {
        ReplyKind::As => picky_asn1_der::to_vec(&EncAsRepPart::from(enc_part))?,
        ReplyKind::TgsSessionKey | ReplyKind::TgsSubkey => picky_asn1_der::to_vec(&EncTgsRepPart::from(enc_part))?,
    });

    Ok(KdcRep {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![kind.msg_type()])),
        padata: Optional::from((!padata.is_empty()).then(|| ExplicitContextTag2::from(Asn1SequenceOf::from(padata)))),
        crealm: ExplicitContextTag3::from(ticket.client.to_asn1_realm()?),
        cname: ExplicitContextTag4::from(ticket.client.to_asn1_name()?),
        ticket: ExplicitContextTag5::from(ticket.encrypt(server, server_key)?),
        enc_part: ExplicitContextTag6::from(encrypt_data(reply_key, kind.key_usage(), &encoded)?),
    })
}
