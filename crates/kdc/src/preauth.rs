use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, OctetStringAsn1, Optional,
};
use picky_krb::data_types::{EncryptedData, EtypeInfo2Entry, PaData, PaEncTsEnc};
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

use crate::config::KdcConfig;
use crate::constants::key_usages::PA_ENC_TIMESTAMP;
use crate::constants::pa_types;
use crate::error::KdcError;
use crate::etype::EncryptionType;
use crate::principal::{KeyEntry, PrincipalEntry, PrincipalFlags};
use crate::secret::Secret;
use crate::utils::{integer_from_i64, kerberos_string, parse_kerberos_time};

/// Proof of key possession established for an AS request.
///
/// Produced by the encrypted timestamp verifier, or handed in by an external preauthentication
/// front-end (for example PKINIT) that has already verified the client on its own.
#[derive(Debug, Clone)]
pub struct PreauthOutcome {
    /// Key the AS reply is encrypted with.
    pub reply_key: Secret<Vec<u8>>,
    pub reply_etype: EncryptionType,
    /// Version of the long-term key the reply key is, if it is one.
    pub reply_kvno: Option<u32>,
    /// Salt to advertise in the reply ETYPE-INFO2, if the reply key was derived from a password.
    pub salt: Option<String>,
    pub hw_authenticated: bool,
}

impl PreauthOutcome {
    pub fn from_key(client: &PrincipalEntry, key: &KeyEntry) -> Self {
        Self {
            reply_key: key.key.clone(),
            reply_etype: key.etype,
            reply_kvno: Some(key.kvno),
            salt: Some(client.salt_for(key)),
            hw_authenticated: false,
        }
    }
}

/// Whether the AS exchange must carry preauthentication data.
pub fn preauth_required(config: &KdcConfig, client: &PrincipalEntry, server: &PrincipalEntry) -> bool {
    config.require_preauth
        || client.flags.contains(PrincipalFlags::REQUIRE_PREAUTH)
        || server.flags.contains(PrincipalFlags::REQUIRE_PREAUTH)
}

/// Verifies PA-ENC-TIMESTAMP elements.
///
/// Elements are tried in request order, and for each element every client key of the matching encryption
/// type is tried in database order. The first key that decrypts a timestamp within `max_skew` of `now`
/// wins. Returns `Ok(None)` when the request has no encrypted timestamp at all.
///
/// [Pre-authentication](https://www.rfc-editor.org/rfc/rfc4120#section-5.2.7.2)
#[instrument(level = "debug", skip_all, fields(client = %client.principal))]
pub fn verify_enc_timestamp<'a>(
    client: &PrincipalEntry,
    pa_datas: impl IntoIterator<Item = &'a PaData>,
    now: OffsetDateTime,
    max_skew: Duration,
) -> Result<Option<PreauthOutcome>, KdcError> {
    let mut failure = None;

    for pa_data in pa_datas {
        let Ok(encrypted_timestamp) = picky_asn1_der::from_bytes::<EncryptedData>(&pa_data.padata_data.0.0) else {
            failure.get_or_insert(KdcError::preauth_failed("unable to decode PA-ENC-TIMESTAMP"));
            continue;
        };

        let Some(etype) = EncryptionType::from_asn1(&encrypted_timestamp.etype.0) else {
            failure.get_or_insert(KdcError::preauth_failed("invalid etype in PA-ENC-TIMESTAMP"));
            continue;
        };
        let Some(cipher_suite) = etype.cipher_suite() else {
            failure.get_or_insert(KdcError::preauth_failed("unsupported etype in PA-ENC-TIMESTAMP"));
            continue;
        };
        let cipher = cipher_suite.cipher();

        for key in client.keys.iter().filter(|key| key.etype == etype && !key.key.is_empty()) {
            let Ok(plaintext) = cipher
                .decrypt(key.key.as_ref(), PA_ENC_TIMESTAMP, &encrypted_timestamp.cipher.0.0)
                .map(Zeroizing::new)
            else {
                continue;
            };

            let timestamp = picky_asn1_der::from_bytes::<PaEncTsEnc>(&plaintext)
                .ok()
                .and_then(|timestamp| parse_kerberos_time(&timestamp.patimestamp.0));
            let Some(timestamp) = timestamp else {
                failure.get_or_insert(KdcError::preauth_failed("unable to decode PA-ENC-TS-ENC value"));
                continue;
            };

            if (now - timestamp).abs() > max_skew {
                debug!(%timestamp, %now, "PA-ENC-TIMESTAMP is outside of the allowed clock skew");
                // A clock skew failure outranks every other failure.
                failure = Some(KdcError::ClockSkew("invalid pa-data: clock skew too great"));
                continue;
            }

            debug!(%etype, kvno = key.kvno, "PA-ENC-TIMESTAMP verified");

            return Ok(Some(PreauthOutcome::from_key(client, key)));
        }

        failure.get_or_insert(KdcError::preauth_failed("PA-ENC-TIMESTAMP decryption failed"));
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

/// ETYPE-INFO2 entries for the client keys a client can use.
///
/// Entries for the offered encryption types come first, in client preference order, followed by
/// the remaining usable keys in database order.
pub fn etype_info2_entries(
    client: &PrincipalEntry,
    offered: &[EncryptionType],
) -> Result<Vec<EtypeInfo2Entry>, KdcError> {
    let usable = |key: &&KeyEntry| key.etype.is_supported() && !key.key.is_empty();

    let mut keys: Vec<&KeyEntry> = Vec::new();
    for etype in offered {
        if let Some(key) = client.current_keys().filter(usable).find(|key| key.etype == *etype)
            && !keys.iter().any(|known| known.etype == key.etype)
        {
            keys.push(key);
        }
    }
    for key in client.current_keys().filter(usable) {
        if !keys.iter().any(|known| known.etype == key.etype) {
            keys.push(key);
        }
    }

    keys.into_iter()
        .map(|key| etype_info2_entry(key.etype, Some(client.salt_for(key).as_str())))
        .collect()
}

pub fn etype_info2_entry(etype: EncryptionType, salt: Option<&str>) -> Result<EtypeInfo2Entry, KdcError> {
    Ok(EtypeInfo2Entry {
        etype: ExplicitContextTag0::from(etype.to_asn1()),
        salt: Optional::from(salt.map(kerberos_string).transpose()?.map(ExplicitContextTag1::from)),
        s2kparams: Optional::from(None),
    })
}

/// Wraps ETYPE-INFO2 entries into a PA-ETYPE-INFO2 element.
pub fn etype_info2_pa_data(entries: Vec<EtypeInfo2Entry>) -> Result<PaData, KdcError> {
    Ok(PaData {
        padata_type: ExplicitContextTag1::from(integer_from_i64(pa_types::PA_ETYPE_INFO2)),
        padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(picky_asn1_der::to_vec(
            &Asn1SequenceOf::from(entries),
        )?)),
    })
}

/// METHOD-DATA sent with `KDC_ERR_PREAUTH_REQUIRED`: the key hints and the supported method.
pub fn method_data(client: &PrincipalEntry, offered: &[EncryptionType]) -> Result<Vec<PaData>, KdcError> {
    Ok(vec![
        etype_info2_pa_data(etype_info2_entries(client, offered)?)?,
        PaData {
            padata_type: ExplicitContextTag1::from(integer_from_i64(pa_types::PA_ENC_TIMESTAMP)),
            padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(Vec::new())),
        },
    ])
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::principal::Principal;
    use crate::utils::{integer_to_i64, kerberos_time};

    const NOW: OffsetDateTime = datetime!(2023-11-14 22:13:20 UTC);
    const PASSWORD: &str = "correct horse battery staple";

    fn client() -> PrincipalEntry {
        PrincipalEntry::new(Principal::new("EXAMPLE.COM", ["alice"]), PrincipalFlags::USER)
            .with_password(
                PASSWORD,
                &[EncryptionType::AES256_CTS_HMAC_SHA1_96, EncryptionType::AES128_CTS_HMAC_SHA1_96],
            )
            .unwrap()
    }

    fn enc_timestamp(key: &KeyEntry, timestamp: OffsetDateTime) -> PaData {
        let timestamp = PaEncTsEnc {
            patimestamp: ExplicitContextTag0::from(kerberos_time(timestamp)),
            pausec: Optional::from(None),
        };
        let cipher = key.etype.cipher_suite().unwrap().cipher();
        let encrypted = cipher
            .encrypt(
                key.key.as_ref(),
                PA_ENC_TIMESTAMP,
                &picky_asn1_der::to_vec(&timestamp).unwrap(),
            )
            .unwrap();

        PaData {
            padata_type: ExplicitContextTag1::from(integer_from_i64(pa_types::PA_ENC_TIMESTAMP)),
            padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
                picky_asn1_der::to_vec(&EncryptedData {
                    etype: ExplicitContextTag0::from(key.etype.to_asn1()),
                    kvno: Optional::from(None),
                    cipher: ExplicitContextTag2::from(OctetStringAsn1::from(encrypted)),
                })
                .unwrap(),
            )),
        }
    }

    #[test]
    fn valid_timestamp_fixes_the_reply_key() {
        let client = client();
        let key = &client.keys[1];

        let outcome = verify_enc_timestamp(&client, [&enc_timestamp(key, NOW)], NOW, Duration::minutes(5))
            .unwrap()
            .unwrap();

        assert_eq!(outcome.reply_etype, EncryptionType::AES128_CTS_HMAC_SHA1_96);
        assert_eq!(outcome.reply_key, key.key);
        assert_eq!(outcome.salt.as_deref(), Some("EXAMPLE.COMalice"));
    }

    #[test]
    fn timestamp_outside_skew_is_a_skew_error() {
        let client = client();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let timestamp = OffsetDateTime::from_unix_timestamp(1_700_000_700).unwrap();
        let pa_data = enc_timestamp(&client.keys[0], timestamp);

        let result = verify_enc_timestamp(&client, [&pa_data], now, Duration::seconds(300));

        assert!(matches!(result, Err(KdcError::ClockSkew(_))));
    }

    #[test]
    fn wrong_key_is_a_preauth_failure() {
        let client = client();
        let other = KeyEntry::from_password(EncryptionType::AES256_CTS_HMAC_SHA1_96, 1, "guess", "EXAMPLE.COMalice").unwrap();

        let result = verify_enc_timestamp(&client, [&enc_timestamp(&other, NOW)], NOW, Duration::minutes(5));

        assert!(matches!(result, Err(KdcError::PreAuthFailed { .. })));
    }

    #[test]
    fn later_elements_are_tried_after_a_failure() {
        let client = client();
        let other = KeyEntry::from_password(EncryptionType::AES256_CTS_HMAC_SHA1_96, 1, "guess", "EXAMPLE.COMalice").unwrap();
        let pa_datas = [enc_timestamp(&other, NOW), enc_timestamp(&client.keys[0], NOW)];

        let outcome = verify_enc_timestamp(&client, &pa_datas, NOW, Duration::minutes(5)).unwrap();

        assert!(outcome.is_some());
    }

    #[test]
    fn clock_skew_outranks_later_failures() {
        let client = client();
        let key = &client.keys[0];
        let garbage = key
            .etype
            .cipher_suite()
            .unwrap()
            .cipher()
            .encrypt(key.key.as_ref(), PA_ENC_TIMESTAMP, b"not a timestamp")
            .unwrap();
        let undecodable = PaData {
            padata_type: ExplicitContextTag1::from(integer_from_i64(pa_types::PA_ENC_TIMESTAMP)),
            padata_data: ExplicitContextTag2::from(OctetStringAsn1::from(
                picky_asn1_der::to_vec(&EncryptedData {
                    etype: ExplicitContextTag0::from(key.etype.to_asn1()),
                    kvno: Optional::from(None),
                    cipher: ExplicitContextTag2::from(OctetStringAsn1::from(garbage)),
                })
                .unwrap(),
            )),
        };
        let pa_datas = [enc_timestamp(key, NOW - Duration::hours(1)), undecodable];

        let result = verify_enc_timestamp(&client, &pa_datas, NOW, Duration::minutes(5));

        assert!(matches!(result, Err(KdcError::ClockSkew(_))));
    }

    #[test]
    fn no_timestamp_means_no_outcome() {
        assert!(
            verify_enc_timestamp(&client(), std::iter::empty(), NOW, Duration::minutes(5))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn hints_follow_client_order_then_database_order() {
        let client = client().with_key(
            KeyEntry::new(EncryptionType::DES3_CBC_SHA1_KD, 1, vec![7; 24]).with_salt("custom-salt"),
        );

        let entries = etype_info2_entries(&client, &[EncryptionType::AES128_CTS_HMAC_SHA1_96]).unwrap();
        let etypes: Vec<i64> = entries
            .iter()
            .map(|entry| integer_to_i64(&entry.etype.0).unwrap())
            .collect();

        assert_eq!(etypes, [17, 18, 16]);
        assert_eq!(
            entries[2].salt.0.as_ref().unwrap().0.to_string(),
            "custom-salt"
        );
    }

    #[test]
    fn method_data_advertises_encrypted_timestamp() {
        let method_data = method_data(&client(), &[EncryptionType::AES256_CTS_HMAC_SHA1_96]).unwrap();

        let types: Vec<i64> = method_data
            .iter()
            .map(|pa_data| integer_to_i64(&pa_data.padata_type.0).unwrap())
            .collect();
        assert_eq!(types, [pa_types::PA_ETYPE_INFO2, pa_types::PA_ENC_TIMESTAMP]);
    }

    #[test]
    fn preauth_requirement_sources() {
        let mut config = KdcConfig::new("EXAMPLE.COM");
        config.require_preauth = false;
        let mut client = client();
        client.flags.remove(PrincipalFlags::REQUIRE_PREAUTH);
        let server = PrincipalEntry::new(Principal::krbtgt("EXAMPLE.COM", "EXAMPLE.COM"), PrincipalFlags::SERVICE);

        assert!(!preauth_required(&config, &client, &server));

        client.flags.insert(PrincipalFlags::REQUIRE_PREAUTH);
        assert!(preauth_required(&config, &client, &server));
    }
}
