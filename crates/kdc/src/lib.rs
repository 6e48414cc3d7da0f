//! Ticket-granting core of a Kerberos V5 Key Distribution Center.
//!
//! The crate implements the AS and TGS exchanges of [RFC 4120](https://www.rfc-editor.org/rfc/rfc4120):
//! request validation, policy checks, preauthentication, enctype negotiation, ticket issuance,
//! cross-realm referrals and transited path checks, and the encoding of replies and KRB-ERROR messages.
//! Principals and their keys come from a [PrincipalProvider], the current time from a [Clock].
//! Network transport is left to the caller: [Kdc::process] takes one encoded request and returns
//! one encoded reply, [Kdc::handle_kdc_proxy_message] does the same for MS-KKDCP messages.

#[macro_use]
extern crate tracing;

mod ap_req;
mod as_exchange;
pub mod clock;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod database;
mod error;
pub mod etype;
pub mod flags;
mod policy;
pub mod preauth;
pub mod principal;
mod reply;
mod request;
mod secret;
mod tgs_exchange;
pub mod ticket;
pub mod transited;
mod utils;

use std::net::IpAddr;

use picky_asn1::wrapper::{ExplicitContextTag0, OctetStringAsn1};
use picky_asn1_der::Asn1DerError;
use picky_krb::data_types::{PrincipalName, Realm};
use picky_krb::messages::{AsReq, KdcProxyMessage, KdcReqBody, TgsReq};
use time::OffsetDateTime;

pub use crate::as_exchange::{handle_as_req, handle_as_req_with_preauth};
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::config::KdcConfig;
pub use crate::crypto::KeyRef;
pub use crate::database::InMemoryDatabase;
pub use crate::error::{ErrorContext, KdcError};
pub use crate::etype::EncryptionType;
pub use crate::flags::{KdcOptions, TicketFlags};
pub use crate::preauth::PreauthOutcome;
pub use crate::principal::{
    KeyEntry, LookupFlags, Principal, PrincipalEntry, PrincipalFlags, PrincipalProvider, ProviderError,
};
pub use crate::request::host_address;
pub use crate::secret::Secret;
pub use crate::tgs_exchange::handle_tgs_req;
pub use crate::ticket::{EncTicketBody, decrypt_ticket};
pub use crate::transited::TransitedRealms;

/// Kerberos versions.
///
/// [5.4.1. KRB_KDC_REQ Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1):
/// ```not_rust
/// pvno            [1] INTEGER (5) ,
/// ```
pub const KERBEROS_VERSION: u8 = 0x05;
/// Name of the ticket-granting service.
///
/// [Name of the TGS](https://www.rfc-editor.org/rfc/rfc4120#section-7.3):
/// > The principal identifier of the ticket-granting service shall be composed of three parts:
/// > the realm of the KDC issuing the TGS ticket, and a two-part name of type NT-SRV-INST,
/// > with the first part "krbtgt" and the second part the name of the realm that will accept the TGT.
pub const TGT_SERVICE_NAME: &str = "krbtgt";

/// Which exchange a ticket is being issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    As,
    Tgs,
    /// TGS exchange with the ENC-TKT-IN-SKEY option.
    UserToUser,
}

/// Everything a request handler needs besides the request itself.
///
/// `now` is sampled once when the request arrives.
pub struct RequestContext<'a, P> {
    pub config: &'a KdcConfig,
    pub provider: &'a P,
    pub now: OffsetDateTime,
    /// Address the request came from, if the transport knows it.
    pub peer: Option<IpAddr>,
}

impl<P: PrincipalProvider> RequestContext<'_, P> {
    pub fn lookup(&self, principal: &Principal, flags: LookupFlags) -> Result<Option<PrincipalEntry>, KdcError> {
        Ok(self.provider.lookup(principal, flags)?)
    }
}

/// A decoded KDC request.
#[derive(Debug, Clone)]
pub enum KdcMessage {
    As(AsReq),
    Tgs(TgsReq),
}

impl KdcMessage {
    /// Decodes an AS-REQ or a TGS-REQ.
    pub fn decode(data: &[u8]) -> Result<Self, Asn1DerError> {
        if let Ok(as_req) = picky_asn1_der::from_bytes::<AsReq>(data) {
            return Ok(KdcMessage::As(as_req));
        }

        picky_asn1_der::from_bytes::<TgsReq>(data).map(KdcMessage::Tgs)
    }

    pub fn body(&self) -> &KdcReqBody {
        match self {
            KdcMessage::As(as_req) => &as_req.0.req_body.0,
            KdcMessage::Tgs(tgs_req) => &tgs_req.0.req_body.0,
        }
    }
}

/// Kerberos Key Distribution Center of one realm.
///
/// The KDC keeps no per-request state. It can be shared between threads when the provider and the
/// clock can.
#[derive(Debug)]
pub struct Kdc<P, C = SystemClock> {
    config: KdcConfig,
    provider: P,
    clock: C,
    realm: Realm,
    krbtgt_name: PrincipalName,
}

impl<P: PrincipalProvider> Kdc<P, SystemClock> {
    pub fn new(config: KdcConfig, provider: P) -> Result<Self, KdcError> {
        Self::with_clock(config, provider, SystemClock)
    }
}

impl<P: PrincipalProvider, C: Clock> Kdc<P, C> {
    pub fn with_clock(config: KdcConfig, provider: P, clock: C) -> Result<Self, KdcError> {
        let krbtgt = Principal::krbtgt(&config.realm, &config.realm);
        let realm = krbtgt.to_asn1_realm()?;
        let krbtgt_name = krbtgt.to_asn1_name()?;

        Ok(Self {
            config,
            provider,
            clock,
            realm,
            krbtgt_name,
        })
    }

    pub fn config(&self) -> &KdcConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn context(&self, peer: Option<IpAddr>) -> RequestContext<'_, P> {
        RequestContext {
            config: &self.config,
            provider: &self.provider,
            now: self.clock.now(),
            peer,
        }
    }

    /// Handles one decoded request and returns the encoded AS-REP or TGS-REP.
    fn handle(&self, message: &KdcMessage, ctx: &RequestContext<'_, P>) -> Result<Vec<u8>, KdcError> {
        let reply = match message {
            KdcMessage::As(as_req) => picky_asn1_der::to_vec(&handle_as_req(as_req, ctx)?)?,
            KdcMessage::Tgs(tgs_req) => picky_asn1_der::to_vec(&handle_tgs_req(tgs_req, ctx)?)?,
        };

        Ok(reply)
    }

    fn encode_error(
        &self,
        error: KdcError,
        request: Option<&KdcReqBody>,
        now: OffsetDateTime,
    ) -> Result<Vec<u8>, Asn1DerError> {
        info!(
            target: "kdc_core::audit",
            error_code = error.error_code(),
            %error,
            "request refused"
        );

        let krb_error = error.into_krb_error(&ErrorContext {
            realm: &self.realm,
            sname: &self.krbtgt_name,
            request,
            now,
        });

        picky_asn1_der::to_vec(&krb_error)
    }

    /// Processes one encoded KDC request.
    ///
    /// Every failure is converted into a KRB-ERROR message sent back to the client, so this function
    /// only fails when the reply itself cannot be encoded.
    #[instrument(level = "debug", skip_all, fields(peer = ?peer))]
    pub fn process(&self, data: &[u8], peer: Option<IpAddr>) -> Result<Vec<u8>, Asn1DerError> {
        let ctx = self.context(peer);

        let message = match KdcMessage::decode(data) {
            Ok(message) => message,
            Err(err) => {
                debug!(?err, "unable to decode KDC request");

                return self.encode_error(
                    KdcError::MalformedRequest("neither AS-REQ nor TGS-REQ"),
                    None,
                    ctx.now,
                );
            }
        };

        match self.handle(&message, &ctx) {
            Ok(reply) => Ok(reply),
            Err(error) => self.encode_error(error, Some(message.body()), ctx.now),
        }
    }

    /// Handles [KdcProxyMessage] carrying an [AsReq] or a [TgsReq].
    ///
    /// The Kerberos message inside is prefixed with its length as a 4-byte big-endian integer.
    /// The reply is framed the same way and keeps the target domain and the DC locator hint.
    ///
    /// Spec: [MS-KKDCP](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kkdcp/5778aff5-b182-4b97-a970-29c7f911eef2).
    pub fn handle_kdc_proxy_message(
        &self,
        msg: KdcProxyMessage,
        peer: Option<IpAddr>,
    ) -> Result<KdcProxyMessage, Asn1DerError> {
        let KdcProxyMessage {
            kerb_message,
            target_domain,
            dclocator_hint,
        } = msg;
        let raw_krb_message = kerb_message
            .0
            .0
            .as_slice()
            .get(4..)
            .ok_or(Asn1DerError::TruncatedData)?;

        let reply_message = self.process(raw_krb_message, peer)?;

        let len = u32::try_from(reply_message.len()).map_err(|_| Asn1DerError::TruncatedData)?;
        let mut kerb_message = Vec::with_capacity(reply_message.len() + 4);
        kerb_message.extend_from_slice(&len.to_be_bytes());
        kerb_message.extend_from_slice(&reply_message);

        Ok(KdcProxyMessage {
            kerb_message: ExplicitContextTag0::from(OctetStringAsn1::from(kerb_message)),
            target_domain,
            dclocator_hint,
        })
    }
}
