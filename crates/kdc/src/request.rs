use std::net::IpAddr;

use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, IntegerAsn1, OctetStringAsn1};
use picky_krb::data_types::{EncryptedData, HostAddress, PaData, Ticket};
use picky_krb::messages::{KdcReq, KdcReqBody};
use time::OffsetDateTime;

use crate::KERBEROS_VERSION;
use crate::constants::address_types::{IP_V4, IP_V6};
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::flags::KdcOptions;
use crate::principal::Principal;
use crate::utils::{integer_from_i64, integer_to_i64, parse_kerberos_time};

/// Read-only view of an incoming AS-REQ or TGS-REQ.
///
/// [KRB_KDC_REQ Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1)
#[derive(Debug, Clone)]
pub struct KdcRequest {
    pub options: KdcOptions,
    /// Client name. Only present in AS requests (and in TGS requests with `CNAME_IN_ADDL_TKT`).
    pub client: Option<Principal>,
    /// Realm the request is addressed to: the client realm in AS requests, the server realm in TGS requests.
    pub realm: String,
    pub server: Option<Principal>,
    pub from: Option<OffsetDateTime>,
    /// `1970-01-01T00:00:00Z` asks for a ticket with the longest lifetime policy permits.
    pub till: OffsetDateTime,
    pub rtime: Option<OffsetDateTime>,
    /// Nonce as sent by the client. It is echoed back byte for byte.
    pub nonce: IntegerAsn1,
    /// Offered encryption types in client preference order, unknown ones included.
    pub etypes: Vec<EncryptionType>,
    pub addresses: Vec<HostAddress>,
    pub enc_authorization_data: Option<EncryptedData>,
    pub additional_tickets: Vec<Ticket>,
    pub padata: Vec<PaData>,
    /// DER encoding of the request body. The TGS authenticator checksum covers these bytes.
    pub encoded_body: Vec<u8>,
}

impl KdcRequest {
    /// Validates the message header and extracts the request fields.
    pub fn parse(kdc_req: &KdcReq, expected_msg_type: u8) -> Result<Self, KdcError> {
        let KdcReq {
            pvno,
            msg_type,
            padata,
            req_body,
        } = kdc_req;

        if pvno.0.0 != [KERBEROS_VERSION] {
            return Err(KdcError::BadKrbVersion {
                version: pvno.0.0.clone(),
                expected: KERBEROS_VERSION,
            });
        }

        if msg_type.0.0 != [expected_msg_type] {
            return Err(KdcError::BadMsgType {
                msg_type: msg_type.0.0.clone(),
                expected: expected_msg_type,
            });
        }

        let padata = padata
            .0
            .as_ref()
            .map(|padata| padata.0.0.clone())
            .unwrap_or_default();

        Self::from_body(&req_body.0, padata)
    }

    fn from_body(body: &KdcReqBody, padata: Vec<PaData>) -> Result<Self, KdcError> {
        let KdcReqBody {
            kdc_options,
            cname,
            realm,
            sname,
            from,
            till,
            rtime,
            nonce,
            etype,
            addresses,
            enc_authorization_data,
            additional_tickets,
        } = body;

        let realm = realm.0.0.as_utf8().to_owned();
        let client = cname
            .0
            .as_ref()
            .map(|cname| Principal::from_asn1(&cname.0, &realm))
            .transpose()?;
        let server = sname
            .0
            .as_ref()
            .map(|sname| Principal::from_asn1(&sname.0, &realm))
            .transpose()?;

        let from = from
            .0
            .as_ref()
            .map(|from| parse_kerberos_time(&from.0).ok_or(KdcError::MalformedRequest("invalid from time")))
            .transpose()?;
        let till = parse_kerberos_time(&till.0).ok_or(KdcError::MalformedRequest("invalid till time"))?;
        let rtime = rtime
            .0
            .as_ref()
            .map(|rtime| parse_kerberos_time(&rtime.0).ok_or(KdcError::MalformedRequest("invalid rtime")))
            .transpose()?;

        let etypes = etype.0.0.iter().filter_map(EncryptionType::from_asn1).collect();

        Ok(Self {
            options: KdcOptions::from(&kdc_options.0),
            client,
            realm,
            server,
            from,
            till,
            rtime,
            nonce: nonce.0.clone(),
            etypes,
            addresses: addresses
                .0
                .as_ref()
                .map(|addresses| addresses.0.0.clone())
                .unwrap_or_default(),
            enc_authorization_data: enc_authorization_data.0.as_ref().map(|data| data.0.clone()),
            additional_tickets: additional_tickets
                .0
                .as_ref()
                .map(|tickets| tickets.0.0.clone())
                .unwrap_or_default(),
            padata,
            encoded_body: picky_asn1_der::to_vec(body)?,
        })
    }

    /// PA-DATA elements of the given type, in request order.
    pub fn pa_data(&self, pa_type: i64) -> impl Iterator<Item = &PaData> {
        self.padata
            .iter()
            .filter(move |pa_data| integer_to_i64(&pa_data.padata_type.0) == Some(pa_type))
    }
}

/// Encodes a network address as a Kerberos `HostAddress`.
pub fn host_address(ip: IpAddr) -> HostAddress {
    let (addr_type, address) = match ip {
        IpAddr::V4(ip) => (IP_V4, ip.octets().to_vec()),
        IpAddr::V6(ip) => (IP_V6, ip.octets().to_vec()),
    };

    HostAddress {
        addr_type: ExplicitContextTag0::from(integer_from_i64(addr_type)),
        address: ExplicitContextTag1::from(OctetStringAsn1::from(address)),
    }
}

/// Checks whether the peer is one of the addresses a ticket is bound to.
///
/// An empty list means the ticket is usable from any address. A bound ticket cannot be matched
/// when the transport does not know the peer address.
pub fn address_matches(addresses: &[HostAddress], peer: Option<IpAddr>) -> bool {
    if addresses.is_empty() {
        return true;
    }

    let Some(peer) = peer else {
        return false;
    };
    let peer = host_address(peer);

    addresses.iter().any(|address| {
        integer_to_i64(&address.addr_type.0) == integer_to_i64(&peer.addr_type.0)
            && address.address.0.0 == peer.address.0.0
    })
}
