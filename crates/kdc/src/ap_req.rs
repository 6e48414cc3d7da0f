//! Verification of the AP-REQ carried in the PA-TGS-REQ padata of a TGS request.
//!
//! RFC: [Receipt of KRB_TGS_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.3.2).

use picky_krb::constants::types::AP_REQ_MSG_TYPE;
use picky_krb::data_types::{Authenticator, AuthenticatorInner, AuthorizationData};
use picky_krb::messages::{ApReq, ApReqInner};

use crate::constants::key_usages::{
    TGS_REQ_AUTH_DATA_SESSION_KEY, TGS_REQ_AUTH_DATA_SUB_KEY, TGS_REQ_AUTHENTICATOR, TGS_REQ_AUTHENTICATOR_CKSUM,
};
use crate::constants::pa_types::PA_TGS_REQ;
use crate::crypto::{KeyRef, decrypt_data, encrypted_data_kvno, verify_checksum};
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::flags::{KdcOptions, TicketFlags};
use crate::principal::{LookupFlags, Principal, PrincipalProvider};
use crate::reply::ReplyKind;
use crate::request::{KdcRequest, address_matches};
use crate::secret::Secret;
use crate::ticket::{EncTicketBody, decrypt_ticket};
use crate::utils::{parse_kerberos_time, saturating_add};
use crate::{KERBEROS_VERSION, RequestContext};

/// A session key together with its encryption type.
#[derive(Debug, Clone)]
pub struct SessionKey {
    pub etype: EncryptionType,
    pub key: Secret<Vec<u8>>,
}

impl SessionKey {
    pub fn key_ref(&self) -> KeyRef<'_> {
        KeyRef::session(self.etype, &self.key)
    }
}

/// Outcome of a successful TGS request authentication.
#[derive(Debug)]
pub struct TgsAuthentication {
    /// The decrypted TGT.
    pub tgt: EncTicketBody,
    /// The ticket-granting service the TGT was issued for: `krbtgt/{our realm}@{issuing realm}`.
    pub tgt_server: Principal,
    /// Subkey from the authenticator. When present, the reply is encrypted with it.
    pub subkey: Option<SessionKey>,
    /// Decrypted `enc-authorization-data` of the request.
    pub authorization_data: Option<AuthorizationData>,
}

impl TgsAuthentication {
    /// Realm of the KDC that issued the TGT.
    pub fn issuing_realm(&self) -> &str {
        &self.tgt_server.realm
    }

    /// Key and key usage for the reply encrypted part.
    pub fn reply_key(&self) -> (ReplyKind, KeyRef<'_>) {
        match &self.subkey {
            Some(subkey) => (ReplyKind::TgsSubkey, subkey.key_ref()),
            None => (
                ReplyKind::TgsSessionKey,
                KeyRef::session(self.tgt.session_etype, &self.tgt.session_key),
            ),
        }
    }
}

/// Authenticates a TGS request: decrypts the TGT and the authenticator and checks that the request
/// body was not modified.
#[instrument(level = "debug", skip_all)]
pub fn verify_tgs_request<P: PrincipalProvider>(
    request: &KdcRequest,
    ctx: &RequestContext<'_, P>,
) -> Result<TgsAuthentication, KdcError> {
    let config = ctx.config;
    let now = ctx.now;

    let pa_tgs_req = request.pa_data(PA_TGS_REQ).next().ok_or(KdcError::PreAuthRequired {
        reason: "missing PA-TGS-REQ pa-data",
        hints: Vec::new(),
    })?;
    let ap_req: ApReq = picky_asn1_der::from_bytes(&pa_tgs_req.padata_data.0.0)
        .map_err(|_| KdcError::preauth_failed("unable to decode PA-TGS-REQ AP-REQ"))?;

    let ApReqInner {
        pvno,
        msg_type,
        ap_options: _,
        ticket,
        authenticator,
    } = &ap_req.0;

    if pvno.0.0 != [KERBEROS_VERSION] {
        return Err(KdcError::BadKrbVersion {
            version: pvno.0.0.clone(),
            expected: KERBEROS_VERSION,
        });
    }

    if msg_type.0.0 != [AP_REQ_MSG_TYPE] {
        return Err(KdcError::BadMsgType {
            msg_type: msg_type.0.0.clone(),
            expected: AP_REQ_MSG_TYPE,
        });
    }

    let ticket = &ticket.0;
    let tgt_server = Principal::from_asn1(&ticket.0.sname.0, ticket.0.realm.0.0.as_utf8())?;

    // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.3.2):
    // > ...the KDC must determine which key to use to decrypt the ticket. If the request is for a TGT
    // > issued by another realm, the KDC uses the inter-realm key.
    if tgt_server.tgs_realm() != Some(config.realm.as_str()) {
        return Err(KdcError::NotUs(format!("ticket is issued for {tgt_server}")));
    }

    let krbtgt = ctx
        .lookup(&tgt_server, LookupFlags::SERVER | LookupFlags::KRBTGT)?
        .ok_or_else(|| KdcError::ServerPrincipalUnknown(tgt_server.to_string()))?;

    let tgt_enc_part = &ticket.0.enc_part.0;
    let tgt_etype = EncryptionType::from_asn1(&tgt_enc_part.etype.0).ok_or(KdcError::NoSuitableEtype)?;
    let tgt_kvno = encrypted_data_kvno(tgt_enc_part);
    let tgt_key = krbtgt.find_key(tgt_etype, tgt_kvno).ok_or_else(|| match tgt_kvno {
        Some(got) if !krbtgt.keys.iter().any(|key| key.kvno == got) => KdcError::BadKeyVersion {
            expected: krbtgt.kvno,
            got,
        },
        _ => KdcError::NoSuitableEtype,
    })?;

    let tgt = decrypt_ticket(ticket, tgt_key.into())?;

    // The KDC itself is the authority on its own clock, so ticket expiry is checked without skew.
    if tgt.end_time <= now {
        return Err(KdcError::TicketExpired("TGT has expired"));
    }

    if !request.options.contains(KdcOptions::VALIDATE) {
        if tgt.flags.contains(TicketFlags::INVALID) {
            return Err(KdcError::TicketNotYetValid("TGT is invalid and must be validated first"));
        }
        if tgt.effective_start_time() > saturating_add(now, config.max_time_skew()) {
            return Err(KdcError::TicketNotYetValid("TGT is not yet valid"));
        }
    }

    let session_key = KeyRef::session(tgt.session_etype, &tgt.session_key);

    let authenticator_plaintext = decrypt_data(session_key, TGS_REQ_AUTHENTICATOR, &authenticator.0)
        .ok_or(KdcError::BadIntegrity("authenticator decryption failed"))?;
    let authenticator: Authenticator = picky_asn1_der::from_bytes(&authenticator_plaintext)
        .map_err(|_| KdcError::BadIntegrity("unable to decode authenticator"))?;

    let AuthenticatorInner {
        crealm,
        cname,
        cksum,
        ctime,
        subkey,
        ..
    } = &authenticator.0;

    let author = Principal::from_asn1(&cname.0, crealm.0.0.as_utf8())?;
    if author != tgt.client {
        debug!(%author, client = %tgt.client, "authenticator does not match the ticket");

        return Err(KdcError::BadMatch("authenticator client does not match the ticket client"));
    }

    let ctime = parse_kerberos_time(&ctime.0).ok_or(KdcError::MalformedRequest("invalid authenticator time"))?;
    if (now - ctime).abs() > config.max_time_skew() {
        return Err(KdcError::ClockSkew("authenticator time is outside of the allowed clock skew"));
    }

    if config.check_ticket_addresses && !address_matches(&tgt.addresses, ctx.peer) {
        return Err(KdcError::BadAddress("request does not come from a ticket address"));
    }

    let checksum = cksum
        .0
        .as_ref()
        .ok_or(KdcError::InappropriateChecksum("authenticator has no request checksum"))?;
    verify_checksum(
        &checksum.0,
        session_key,
        TGS_REQ_AUTHENTICATOR_CKSUM,
        &request.encoded_body,
        config.allow_unkeyed_checksum,
    )?;

    let subkey = subkey
        .0
        .as_ref()
        .map(|subkey| {
            Ok::<_, KdcError>(SessionKey {
                etype: EncryptionType::from_asn1(&subkey.0.key_type.0).ok_or(KdcError::NoSuitableEtype)?,
                key: Secret::new(subkey.0.key_value.0.0.clone()),
            })
        })
        .transpose()?;

    let authorization_data = match &request.enc_authorization_data {
        Some(enc_authorization_data) => {
            let (key, key_usage) = match &subkey {
                Some(subkey) => (subkey.key_ref(), TGS_REQ_AUTH_DATA_SUB_KEY),
                None => (session_key, TGS_REQ_AUTH_DATA_SESSION_KEY),
            };
            let plaintext = decrypt_data(key, key_usage, enc_authorization_data)
                .ok_or(KdcError::BadIntegrity("enc-authorization-data decryption failed"))?;

            Some(
                picky_asn1_der::from_bytes::<AuthorizationData>(&plaintext)
                    .map_err(|_| KdcError::BadIntegrity("unable to decode enc-authorization-data"))?,
            )
        }
        None => None,
    };

    debug!(client = %tgt.client, %tgt_server, subkey = subkey.is_some(), "TGS request authenticated");

    Ok(TgsAuthentication {
        tgt,
        tgt_server,
        subkey,
        authorization_data,
    })
}
