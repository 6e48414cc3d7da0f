use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::IntegerAsn1;
use picky_krb::data_types::{KerberosStringAsn1, KerberosTime};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

use crate::error::KdcError;

/// Reads a Kerberos INTEGER field.
///
/// Returns `None` for values wider than 64 bits.
pub(crate) fn integer_to_i64(value: &IntegerAsn1) -> Option<i64> {
    let bytes = value.as_signed_bytes_be();
    if bytes.len() > 8 {
        return None;
    }

    let negative = bytes.first().is_some_and(|byte| byte & 0x80 != 0);
    let mut buf = if negative { [0xff; 8] } else { [0x00; 8] };
    buf[8 - bytes.len()..].copy_from_slice(bytes);

    Some(i64::from_be_bytes(buf))
}

pub(crate) fn integer_from_i64(value: i64) -> IntegerAsn1 {
    IntegerAsn1::from_bytes_be_signed(value.to_be_bytes().to_vec())
}

/// `time + duration`, saturating at the largest representable time.
pub(crate) fn saturating_add(time: OffsetDateTime, duration: Duration) -> OffsetDateTime {
    time.checked_add(duration)
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Kerberos timestamps have a one-second resolution.
pub(crate) fn truncate_to_seconds(time: OffsetDateTime) -> OffsetDateTime {
    time - Duration::nanoseconds(i64::from(time.nanosecond()))
}

pub(crate) fn kerberos_time(time: OffsetDateTime) -> KerberosTime {
    KerberosTime::from(GeneralizedTime::from(truncate_to_seconds(time)))
}

pub(crate) fn parse_kerberos_time(time: &KerberosTime) -> Option<OffsetDateTime> {
    OffsetDateTime::try_from(time.0.clone()).ok()
}

pub(crate) fn kerberos_string(value: &str) -> Result<KerberosStringAsn1, KdcError> {
    IA5String::from_string(value.to_owned())
        .map(KerberosStringAsn1::from)
        .map_err(|_| KdcError::InvalidKerberosString(value.to_owned()))
}
