use bitflags::bitflags;
use picky_asn1::bit_string::BitString;
use picky_krb::data_types::KerberosFlags;

bitflags! {
    /// This flags appears in the KRB_AS_REQ and KRB_TGS_REQ requests to
    /// the KDC and indicates the flags that the client wants set on the tickets.
    ///
    /// [KDCOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct KdcOptions: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const ALLOW_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const RENEWABLE = 0x00800000;
        const OPT_HARDWARE_AUTH = 0x00100000;
        const CANONICALIZE = 0x00010000;
        /// [RFC 6112](https://www.rfc-editor.org/rfc/rfc6112#section-4.1)
        const REQUEST_ANONYMOUS = 0x00008000;
        const CNAME_IN_ADDL_TKT = 0x00004000;
        const DISABLE_TRANSITED_CHECK = 0x00000020;
        const RENEWABLE_OK = 0x00000010;
        const ENC_TKT_IN_SKEY = 0x00000008;
        const RENEW = 0x00000002;
        const VALIDATE = 0x00000001;
    }
}

bitflags! {
    /// [TicketFlags](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TicketFlags: u32 {
        const FORWARDABLE = 0x40000000;
        const FORWARDED = 0x20000000;
        const PROXIABLE = 0x10000000;
        const PROXY = 0x08000000;
        const MAY_POSTDATE = 0x04000000;
        const POSTDATED = 0x02000000;
        const INVALID = 0x01000000;
        const RENEWABLE = 0x00800000;
        const INITIAL = 0x00400000;
        const PRE_AUTHENT = 0x00200000;
        const HW_AUTHENT = 0x00100000;
        const TRANSITED_POLICY_CHECKED = 0x00080000;
        const OK_AS_DELEGATE = 0x00040000;
        /// [RFC 6112](https://www.rfc-editor.org/rfc/rfc6112#section-3)
        const ANONYMOUS = 0x00020000;
    }
}

impl TicketFlags {
    /// Ticket flags that a client may ask for through [KdcOptions].
    pub const REQUESTABLE: TicketFlags = TicketFlags::FORWARDABLE
        .union(TicketFlags::FORWARDED)
        .union(TicketFlags::PROXIABLE)
        .union(TicketFlags::PROXY)
        .union(TicketFlags::MAY_POSTDATE)
        .union(TicketFlags::POSTDATED)
        .union(TicketFlags::RENEWABLE);

    /// Maps the requested options onto the ticket flags they ask for.
    pub fn requested_by(options: KdcOptions) -> TicketFlags {
        let mut flags = TicketFlags::empty();

        if options.contains(KdcOptions::FORWARDABLE) {
            flags |= TicketFlags::FORWARDABLE;
        }
        if options.contains(KdcOptions::FORWARDED) {
            flags |= TicketFlags::FORWARDED;
        }
        if options.contains(KdcOptions::PROXIABLE) {
            flags |= TicketFlags::PROXIABLE;
        }
        if options.contains(KdcOptions::PROXY) {
            flags |= TicketFlags::PROXY;
        }
        if options.contains(KdcOptions::ALLOW_POSTDATE) {
            flags |= TicketFlags::MAY_POSTDATE;
        }
        if options.contains(KdcOptions::POSTDATED) {
            flags |= TicketFlags::POSTDATED;
        }
        if options.contains(KdcOptions::RENEWABLE) {
            flags |= TicketFlags::RENEWABLE;
        }

        flags
    }
}

fn bits_from_kerberos_flags(flags: &KerberosFlags) -> u32 {
    let payload = flags.0.payload_view();

    let mut bytes = [0_u8; 4];
    for (dst, src) in bytes.iter_mut().zip(payload.iter()) {
        *dst = *src;
    }

    u32::from_be_bytes(bytes)
}

fn bits_to_kerberos_flags(bits: u32) -> KerberosFlags {
    KerberosFlags::from(BitString::with_bytes(bits.to_be_bytes().to_vec()))
}

impl From<&KerberosFlags> for KdcOptions {
    fn from(flags: &KerberosFlags) -> Self {
        KdcOptions::from_bits_retain(bits_from_kerberos_flags(flags))
    }
}

impl From<&KerberosFlags> for TicketFlags {
    fn from(flags: &KerberosFlags) -> Self {
        TicketFlags::from_bits_truncate(bits_from_kerberos_flags(flags))
    }
}

impl From<TicketFlags> for KerberosFlags {
    fn from(flags: TicketFlags) -> Self {
        bits_to_kerberos_flags(flags.bits())
    }
}

impl From<KdcOptions> for KerberosFlags {
    fn from(options: KdcOptions) -> Self {
        bits_to_kerberos_flags(options.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdc_options_bits_follow_rfc_numbering() {
        // bit 28 counted from the most significant bit
        let flags = KerberosFlags::from(KdcOptions::ENC_TKT_IN_SKEY);
        assert!(flags.0.is_set(28));

        let flags = KerberosFlags::from(KdcOptions::PROXIABLE);
        assert!(flags.0.is_set(3));
    }

    #[test]
    fn ticket_flags_survive_asn1_conversion() {
        let flags = TicketFlags::FORWARDABLE | TicketFlags::INITIAL | TicketFlags::PRE_AUTHENT;

        let encoded = KerberosFlags::from(flags);

        assert_eq!(TicketFlags::from(&encoded), flags);
    }

    #[test]
    fn short_bit_strings_are_padded() {
        let flags = KerberosFlags::from(BitString::with_bytes(vec![0x40]));

        assert_eq!(KdcOptions::from(&flags), KdcOptions::FORWARDABLE);
    }

    #[test]
    fn requested_flags_ignore_non_ticket_options() {
        let options = KdcOptions::RENEWABLE | KdcOptions::CANONICALIZE | KdcOptions::RENEWABLE_OK;

        assert_eq!(TicketFlags::requested_by(options), TicketFlags::RENEWABLE);
    }
}
