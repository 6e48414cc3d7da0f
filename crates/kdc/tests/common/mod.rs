//! Client side of the exchanges: builds AS-REQ and TGS-REQ messages the way a Kerberos client does
//! and opens the replies.

#![allow(dead_code)]

use kdc_core::constants::checksum_types::{HMAC_SHA1_96_AES128, HMAC_SHA1_96_AES256, RSA_MD5};
use kdc_core::constants::key_usages;
use kdc_core::constants::pa_types::{PA_ENC_TIMESTAMP, PA_TGS_REQ};
use kdc_core::{
    EncryptionType, FixedClock, InMemoryDatabase, Kdc, KdcConfig, KdcOptions, KeyEntry, Principal, PrincipalEntry,
    PrincipalFlags,
};
use md5::{Digest, Md5};
use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    ExplicitContextTag9, ExplicitContextTag11, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::crypto::ChecksumSuite;
use picky_krb::data_types::{
    ApOptions, Authenticator, AuthenticatorInner, Checksum, EncryptedData, EncryptionKey, HostAddress, KerberosFlags,
    KerberosTime, PaData, PaEncTsEnc, Ticket,
};
use picky_krb::messages::{
    ApReq, ApReqInner, AsRep, AsReq, EncAsRepPart, EncKdcRepPart, EncTgsRepPart, KdcRep, KdcReq, KdcReqBody,
    KrbError, TgsRep, TgsReq,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use tracing_subscriber::EnvFilter;

pub const REALM: &str = "EXAMPLE.COM";
pub const NOW: OffsetDateTime = datetime!(2023-11-14 22:13:20 UTC);

pub const AES256: EncryptionType = EncryptionType::AES256_CTS_HMAC_SHA1_96;
pub const AES128: EncryptionType = EncryptionType::AES128_CTS_HMAC_SHA1_96;

pub const ALICE_PASSWORD: &str = "alice-password";
pub const BOB_PASSWORD: &str = "bob-password";

pub const KRBTGT_KEY: [u8; 32] = [0x11; 32];
pub const HTTP_KEY: [u8; 32] = [0x22; 32];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn alice() -> Principal {
    Principal::new(REALM, ["alice"])
}

pub fn bob() -> Principal {
    Principal::new(REALM, ["bob"])
}

pub fn krbtgt() -> Principal {
    Principal::krbtgt(REALM, REALM)
}

pub fn http() -> Principal {
    Principal::new(REALM, ["HTTP", "www.example.com"])
}

pub fn krbtgt_key() -> KeyEntry {
    KeyEntry::new(AES256, 1, KRBTGT_KEY.to_vec())
}

pub fn http_key() -> KeyEntry {
    KeyEntry::new(AES256, 1, HTTP_KEY.to_vec())
}

/// A realm with two users, the ticket-granting service and one web service.
pub fn database() -> InMemoryDatabase {
    InMemoryDatabase::new()
        .with_entry(
            PrincipalEntry::new(alice(), PrincipalFlags::USER)
                .with_password(ALICE_PASSWORD, &[AES256, AES128])
                .unwrap(),
        )
        .with_entry(
            PrincipalEntry::new(bob(), PrincipalFlags::USER)
                .with_password(BOB_PASSWORD, &[AES256])
                .unwrap(),
        )
        .with_entry(PrincipalEntry::new(krbtgt(), PrincipalFlags::SERVICE).with_key(krbtgt_key()))
        .with_entry(PrincipalEntry::new(http(), PrincipalFlags::SERVICE).with_key(http_key()))
}

pub fn config() -> KdcConfig {
    KdcConfig::new(REALM)
}

pub fn kdc_at(config: KdcConfig, database: InMemoryDatabase, now: OffsetDateTime) -> Kdc<InMemoryDatabase, FixedClock> {
    init_tracing();

    Kdc::with_clock(config, database, FixedClock(now)).unwrap()
}

pub fn kdc() -> Kdc<InMemoryDatabase, FixedClock> {
    kdc_at(config(), database(), NOW)
}

pub fn kerberos_time(time: OffsetDateTime) -> KerberosTime {
    KerberosTime::from(GeneralizedTime::from(time))
}

/// Long-term key of a user, derived from the password and the default salt.
pub fn user_key(principal: &Principal, password: &str, etype: EncryptionType) -> Vec<u8> {
    etype
        .cipher_suite()
        .unwrap()
        .cipher()
        .generate_key_from_password(password.as_bytes(), principal.default_salt().as_bytes())
        .unwrap()
}

fn encrypt(key: &[u8], etype: EncryptionType, key_usage: i32, plaintext: &[u8]) -> EncryptedData {
    let cipher = etype.cipher_suite().unwrap().cipher();

    EncryptedData {
        etype: ExplicitContextTag0::from(etype.to_asn1()),
        kvno: Optional::from(None),
        cipher: ExplicitContextTag2::from(OctetStringAsn1::from(cipher.encrypt(key, key_usage, plaintext).unwrap())),
    }
}

pub fn decrypt(key: &[u8], key_usage: i32, data: &EncryptedData) -> Vec<u8> {
    let etype = EncryptionType::from_asn1(&data.etype.0).unwrap();

    etype
        .cipher_suite()
        .unwrap()
        .cipher()
        .decrypt(key, key_usage, &data.cipher.0.0)
        .unwrap()
}

/// PA-ENC-TIMESTAMP carrying `timestamp`.
pub fn enc_timestamp(key: &[u8], etype: EncryptionType, timestamp: OffsetDateTime) -> PaData {
    let timestamp = PaEncTsEnc {
        patimestamp: ExplicitContextTag0::from(kerberos_time(timestamp)),
        pausec: Optional::from(None),
    };
    let encrypted = encrypt(
        key,
        etype,
        key_usages::PA_ENC_TIMESTAMP,
        &picky_asn1_der::to_vec(&timestamp).unwrap(),
    );

    PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![PA_ENC_TIMESTAMP as u8])),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(&encrypted).unwrap())),
    }
}

/// Request body fields of an AS-REQ or a TGS-REQ.
#[derive(Debug, Clone)]
pub struct RequestBody {
    pub options: KdcOptions,
    pub client: Option<Principal>,
    pub server: Principal,
    pub from: Option<OffsetDateTime>,
    pub till: OffsetDateTime,
    pub rtime: Option<OffsetDateTime>,
    pub etypes: Vec<EncryptionType>,
    pub addresses: Vec<HostAddress>,
    pub additional_tickets: Vec<Ticket>,
}

impl RequestBody {
    pub fn as_req(client: Principal, server: Principal) -> Self {
        Self {
            options: KdcOptions::empty(),
            client: Some(client),
            server,
            from: None,
            till: NOW + Duration::days(1),
            rtime: None,
            etypes: vec![AES256, AES128],
            addresses: Vec::new(),
            additional_tickets: Vec::new(),
        }
    }

    pub fn tgs_req(server: Principal) -> Self {
        Self {
            client: None,
            ..Self::as_req(alice(), server)
        }
    }

    pub fn options(mut self, options: KdcOptions) -> Self {
        self.options = options;
        self
    }

    pub fn to_asn1(&self) -> KdcReqBody {
        KdcReqBody {
            kdc_options: ExplicitContextTag0::from(KerberosFlags::from(self.options)),
            cname: Optional::from(
                self.client
                    .as_ref()
                    .map(|client| ExplicitContextTag1::from(client.to_asn1_name().unwrap())),
            ),
            realm: ExplicitContextTag2::from(self.server.to_asn1_realm().unwrap()),
            sname: Optional::from(Some(ExplicitContextTag3::from(self.server.to_asn1_name().unwrap()))),
            from: Optional::from(self.from.map(|from| ExplicitContextTag4::from(kerberos_time(from)))),
            till: ExplicitContextTag5::from(kerberos_time(self.till)),
            rtime: Optional::from(self.rtime.map(|rtime| ExplicitContextTag6::from(kerberos_time(rtime)))),
            nonce: ExplicitContextTag7::from(IntegerAsn1::from(vec![0x12, 0x34, 0x56, 0x78])),
            etype: ExplicitContextTag8::from(Asn1SequenceOf::from(
                self.etypes.iter().map(|etype| etype.to_asn1()).collect::<Vec<_>>(),
            )),
            addresses: Optional::from(
                (!self.addresses.is_empty())
                    .then(|| ExplicitContextTag9::from(Asn1SequenceOf::from(self.addresses.clone()))),
            ),
            enc_authorization_data: Optional::from(None),
            additional_tickets: Optional::from(
                (!self.additional_tickets.is_empty())
                    .then(|| ExplicitContextTag11::from(Asn1SequenceOf::from(self.additional_tickets.clone()))),
            ),
        }
    }
}

fn kdc_req(msg_type: u8, padata: Vec<PaData>, body: KdcReqBody) -> KdcReq {
    KdcReq {
        pvno: ExplicitContextTag1::from(IntegerAsn1::from(vec![5])),
        msg_type: ExplicitContextTag2::from(IntegerAsn1::from(vec![msg_type])),
        padata: Optional::from((!padata.is_empty()).then(|| ExplicitContextTag3::from(Asn1SequenceOf::from(padata)))),
        req_body: ExplicitContextTag4::from(body),
    }
}

pub fn as_req(padata: Vec<PaData>, body: &RequestBody) -> AsReq {
    AsReq::from(kdc_req(10, padata, body.to_asn1()))
}

/// AS-REQ of `client` preauthenticated with an encrypted timestamp taken at [NOW].
pub fn preauthenticated_as_req(client: Principal, password: &str, body: RequestBody) -> AsReq {
    let key = user_key(&client, password, AES256);

    as_req(vec![enc_timestamp(&key, AES256, NOW)], &body)
}

pub fn encode<T: serde::Serialize>(message: &T) -> Vec<u8> {
    picky_asn1_der::to_vec(message).unwrap()
}

/// Error code of a KRB-ERROR reply. Panics when the reply is not an error.
pub fn error_code(reply: &[u8]) -> u32 {
    krb_error(reply).0.error_code.0
}

pub fn krb_error(reply: &[u8]) -> KrbError {
    picky_asn1_der::from_bytes::<KrbError>(reply).expect("expected KRB-ERROR")
}

pub fn as_rep(reply: &[u8]) -> AsRep {
    picky_asn1_der::from_bytes::<AsRep>(reply)
        .unwrap_or_else(|_| panic!("expected AS-REP, got error {}", error_code(reply)))
}

pub fn tgs_rep(reply: &[u8]) -> TgsRep {
    picky_asn1_der::from_bytes::<TgsRep>(reply)
        .unwrap_or_else(|_| panic!("expected TGS-REP, got error {}", error_code(reply)))
}

pub fn open_as_rep(as_rep: &KdcRep, key: &[u8]) -> EncKdcRepPart {
    let plaintext = decrypt(key, key_usages::AS_REP_ENC_PART, &as_rep.enc_part.0);

    picky_asn1_der::from_bytes::<EncAsRepPart>(&plaintext).unwrap().0
}

pub fn open_tgs_rep(tgs_rep: &KdcRep, key: &[u8], key_usage: i32) -> EncKdcRepPart {
    let plaintext = decrypt(key, key_usage, &tgs_rep.enc_part.0);

    picky_asn1_der::from_bytes::<EncTgsRepPart>(&plaintext).unwrap().0
}

/// A ticket together with the session key the client got for it.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client: Principal,
    pub ticket: Ticket,
    pub session_key: Vec<u8>,
    pub session_etype: EncryptionType,
}

impl Credentials {
    pub fn new(client: Principal, ticket: Ticket, enc_part: &EncKdcRepPart) -> Self {
        Self {
            client,
            ticket,
            session_key: enc_part.key.0.key_value.0.0.clone(),
            session_etype: EncryptionType::from_asn1(&enc_part.key.0.key_type.0).unwrap(),
        }
    }
}

/// Runs the AS exchange for `client` and returns its TGT.
pub fn obtain_tgt(kdc: &Kdc<InMemoryDatabase, FixedClock>, client: Principal, password: &str) -> Credentials {
    obtain_tgt_with(kdc, client, password, |body| body)
}

pub fn obtain_tgt_with(
    kdc: &Kdc<InMemoryDatabase, FixedClock>,
    client: Principal,
    password: &str,
    customize: impl FnOnce(RequestBody) -> RequestBody,
) -> Credentials {
    let body = customize(RequestBody::as_req(client.clone(), krbtgt()));
    let reply = kdc
        .process(&encode(&preauthenticated_as_req(client.clone(), password, body)), None)
        .unwrap();

    let as_rep = as_rep(&reply);
    let enc_part = open_as_rep(&as_rep.0, &user_key(&client, password, AES256));

    Credentials::new(client, as_rep.0.ticket.0.clone(), &enc_part)
}

/// How the authenticator protects the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyChecksum {
    Keyed,
    Unkeyed,
    Missing,
}

/// Parameters of the PA-TGS-REQ authenticator.
#[derive(Debug, Clone)]
pub struct TgsAuthenticator {
    pub checksum: BodyChecksum,
    pub subkey: Option<Vec<u8>>,
    pub ctime: OffsetDateTime,
}

impl Default for TgsAuthenticator {
    fn default() -> Self {
        Self {
            checksum: BodyChecksum::Keyed,
            subkey: None,
            ctime: NOW,
        }
    }
}

fn body_checksum(kind: BodyChecksum, credentials: &Credentials, body: &[u8]) -> Option<Checksum> {
    let (checksum_type, checksum) = match kind {
        BodyChecksum::Missing => return None,
        BodyChecksum::Unkeyed => {
            let mut md5 = Md5::new();
            md5.update(body);

            (RSA_MD5, md5.finalize().to_vec())
        }
        BodyChecksum::Keyed => {
            let (checksum_type, suite) = if credentials.session_etype == AES256 {
                (HMAC_SHA1_96_AES256, ChecksumSuite::HmacSha196Aes256)
            } else {
                (HMAC_SHA1_96_AES128, ChecksumSuite::HmacSha196Aes128)
            };
            let checksum = suite
                .hasher()
                .checksum(&credentials.session_key, key_usages::TGS_REQ_AUTHENTICATOR_CKSUM, body)
                .unwrap();

            (checksum_type, checksum)
        }
    };

    Some(Checksum {
        cksumtype: ExplicitContextTag0::from(IntegerAsn1::from(vec![checksum_type as u8])),
        checksum: ExplicitContextTag1::from(OctetStringAsn1::from(checksum)),
    })
}

/// TGS-REQ authenticated with `credentials`.
pub fn tgs_req(credentials: &Credentials, body: &RequestBody, authenticator: &TgsAuthenticator) -> TgsReq {
    let req_body = body.to_asn1();
    let encoded_body = encode(&req_body);

    let authenticator_message = Authenticator::from(AuthenticatorInner {
        authenticator_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![5])),
        crealm: ExplicitContextTag1::from(credentials.client.to_asn1_realm().unwrap()),
        cname: ExplicitContextTag2::from(credentials.client.to_asn1_name().unwrap()),
        cksum: Optional::from(
            body_checksum(authenticator.checksum, credentials, &encoded_body).map(ExplicitContextTag3::from),
        ),
        cusec: ExplicitContextTag4::from(IntegerAsn1::from(vec![0])),
        ctime: ExplicitContextTag5::from(kerberos_time(authenticator.ctime)),
        subkey: Optional::from(authenticator.subkey.as_ref().map(|subkey| {
            ExplicitContextTag6::from(EncryptionKey {
                key_type: ExplicitContextTag0::from(credentials.session_etype.to_asn1()),
                key_value: ExplicitContextTag1::from(OctetStringAsn1::from(subkey.clone())),
            })
        })),
        seq_number: Optional::from(None),
        authorization_data: Optional::from(None),
    });

    let ap_req = ApReq::from(ApReqInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![5])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![14])),
        ap_options: ExplicitContextTag2::from(ApOptions::from(BitString::with_bytes(vec![0x00, 0x00, 0x00, 0x00]))),
        ticket: ExplicitContextTag3::from(credentials.ticket.clone()),
        authenticator: ExplicitContextTag4::from(encrypt(
            &credentials.session_key,
            credentials.session_etype,
            key_usages::TGS_REQ_AUTHENTICATOR,
            &encode(&authenticator_message),
        )),
    });

    let pa_tgs_req = PaData {
        padata_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![PA_TGS_REQ as u8])),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(encode(&ap_req))),
    };

    TgsReq::from(kdc_req(12, vec![pa_tgs_req], req_body))
}
