//! Ticket construction.
//!
//! A ticket body is produced by [TicketBuilder], whose type parameter tracks the construction stage:
//! flags, then times, then the transited path, then the session key. Each stage can fail with the
//! error specific to it, and there is no way back to an earlier stage.

use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, ExplicitContextTag8,
    ExplicitContextTag9, ExplicitContextTag10, IntegerAsn1, OctetStringAsn1, Optional,
};
use picky_krb::data_types::{
    AuthorizationData, EncTicketPart, EncTicketPartInner, EncryptionKey, HostAddress, KerberosTime, Ticket,
    TicketInner,
};
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

use crate::KERBEROS_VERSION;
use crate::config::KdcConfig;
use crate::constants::key_usages::TICKET;
use crate::crypto::{KeyRef, decrypt_data, encrypt_data};
use crate::error::KdcError;
use crate::etype::{EncryptionType, random_session_key};
use crate::flags::{KdcOptions, TicketFlags};
use picky_krb::data_types::KerberosFlags;
use crate::principal::{Principal, PrincipalEntry, PrincipalFlags};
use crate::secret::Secret;
use crate::transited::{TransitedRealms, check_transited_path};
use crate::utils::{kerberos_time, parse_kerberos_time, saturating_add};

/// Decrypted content of a ticket.
///
/// [EncTicketPart](https://www.rfc-editor.org/rfc/rfc4120#section-5.3)
#[derive(Debug, Clone)]
pub struct EncTicketBody {
    pub flags: TicketFlags,
    pub session_key: Secret<Vec<u8>>,
    pub session_etype: EncryptionType,
    /// Client principal, its realm being the ticket's `crealm`.
    pub client: Principal,
    pub transited: TransitedRealms,
    pub auth_time: OffsetDateTime,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: OffsetDateTime,
    pub renew_till: Option<OffsetDateTime>,
    pub addresses: Vec<HostAddress>,
    pub authorization_data: Option<AuthorizationData>,
}

impl EncTicketBody {
    /// The start time, which defaults to the authentication time.
    pub fn effective_start_time(&self) -> OffsetDateTime {
        self.start_time.unwrap_or(self.auth_time)
    }

    pub fn to_asn1(&self) -> Result<EncTicketPart, KdcError> {
        Ok(EncTicketPart::from(EncTicketPartInner {
            flags: ExplicitContextTag0::from(KerberosFlags::from(self.flags)),
            key: ExplicitContextTag1::from(EncryptionKey {
                key_type: ExplicitContextTag0::from(self.session_etype.to_asn1()),
                key_value: ExplicitContextTag1::from(OctetStringAsn1::from(self.session_key.as_ref().clone())),
            }),
            crealm: ExplicitContextTag2::from(self.client.to_asn1_realm()?),
            cname: ExplicitContextTag3::from(self.client.to_asn1_name()?),
            transited: ExplicitContextTag4::from(self.transited.to_asn1()),
            auth_time: ExplicitContextTag5::from(kerberos_time(self.auth_time)),
            starttime: Optional::from(self.start_time.map(|time| ExplicitContextTag6::from(kerberos_time(time)))),
            endtime: ExplicitContextTag7::from(kerberos_time(self.end_time)),
            renew_till: Optional::from(self.renew_till.map(|time| ExplicitContextTag8::from(kerberos_time(time)))),
            caddr: Optional::from(
                (!self.addresses.is_empty())
                    .then(|| ExplicitContextTag9::from(Asn1SequenceOf::from(self.addresses.clone()))),
            ),
            authorization_data: Optional::from(self.authorization_data.clone().map(ExplicitContextTag10::from)),
        }))
    }

    pub fn from_asn1(part: &EncTicketPart) -> Result<Self, KdcError> {
        let EncTicketPartInner {
            flags,
            key,
            crealm,
            cname,
            transited,
            auth_time,
            starttime,
            endtime,
            renew_till,
            caddr,
            authorization_data,
        } = &part.0;

        let parse_time =
            |time: &KerberosTime| parse_kerberos_time(time).ok_or(KdcError::MalformedRequest("invalid ticket time"));

        Ok(Self {
            flags: TicketFlags::from(&flags.0),
            session_key: Secret::new(key.0.key_value.0.0.clone()),
            session_etype: EncryptionType::from_asn1(&key.0.key_type.0)
                .ok_or(KdcError::MalformedRequest("invalid ticket session key type"))?,
            client: Principal::from_asn1(&cname.0, crealm.0.0.as_utf8())?,
            transited: TransitedRealms::from_asn1(&transited.0)?,
            auth_time: parse_time(&auth_time.0)?,
            start_time: starttime.0.as_ref().map(|time| parse_time(&time.0)).transpose()?,
            end_time: parse_time(&endtime.0)?,
            renew_till: renew_till.0.as_ref().map(|time| parse_time(&time.0)).transpose()?,
            addresses: caddr.0.as_ref().map(|caddr| caddr.0.0.clone()).unwrap_or_default(),
            authorization_data: authorization_data.0.as_ref().map(|data| data.0.clone()),
        })
    }

    /// Encrypts the body for `server`, producing the ticket sent to the client.
    pub fn encrypt(&self, server: &Principal, key: KeyRef<'_>) -> Result<Ticket, KdcError> {
        let encoded = Zeroizing::new(picky_asn1_der::to_vec(&self.to_asn1()?)?);

        Ok(Ticket::from(TicketInner {
            tkt_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            realm: ExplicitContextTag1::from(server.to_asn1_realm()?),
            sname: ExplicitContextTag2::from(server.to_asn1_name()?),
            enc_part: ExplicitContextTag3::from(encrypt_data(key, TICKET, &encoded)?),
        }))
    }
}

/// Decrypts a ticket with the server key.
pub fn decrypt_ticket(ticket: &Ticket, key: KeyRef<'_>) -> Result<EncTicketBody, KdcError> {
    let plaintext = decrypt_data(key, TICKET, &ticket.0.enc_part.0).ok_or(KdcError::BadIntegrity("ticket"))?;
    let part: EncTicketPart = picky_asn1_der::from_bytes(&plaintext).map_err(|_| KdcError::BadIntegrity("ticket"))?;

    EncTicketBody::from_asn1(&part)
}

/// Flags requested by the client together with what may be granted.
#[derive(Debug, Clone, Copy)]
pub struct FlagRequest {
    /// Requestable flags asked for through the KDC options.
    pub requested: TicketFlags,
    /// Requestable flags the principals (and, for TGS requests, the TGT) allow.
    pub permitted: TicketFlags,
    /// Flags set by the KDC regardless of the request.
    pub kdc_flags: TicketFlags,
}

fn capabilities(flags: PrincipalFlags) -> TicketFlags {
    let mut capabilities = TicketFlags::empty();

    if flags.contains(PrincipalFlags::FORWARDABLE) {
        capabilities |= TicketFlags::FORWARDABLE | TicketFlags::FORWARDED;
    }
    if flags.contains(PrincipalFlags::PROXIABLE) {
        capabilities |= TicketFlags::PROXIABLE | TicketFlags::PROXY;
    }
    if flags.contains(PrincipalFlags::POSTDATE) {
        capabilities |= TicketFlags::MAY_POSTDATE | TicketFlags::POSTDATED;
    }
    if flags.contains(PrincipalFlags::RENEWABLE) {
        capabilities |= TicketFlags::RENEWABLE;
    }

    capabilities
}

impl FlagRequest {
    /// Initial tickets: requested options limited by the capabilities of both principals.
    pub fn for_as(
        options: KdcOptions,
        client: &PrincipalEntry,
        server: &PrincipalEntry,
        pre_authenticated: bool,
        hw_authenticated: bool,
    ) -> Self {
        let mut kdc_flags = TicketFlags::INITIAL;
        if pre_authenticated {
            kdc_flags |= TicketFlags::PRE_AUTHENT;
        }
        if hw_authenticated {
            kdc_flags |= TicketFlags::HW_AUTHENT;
        }
        if server.flags.contains(PrincipalFlags::OK_AS_DELEGATE) {
            kdc_flags |= TicketFlags::OK_AS_DELEGATE;
        }

        Self {
            requested: TicketFlags::requested_by(options),
            permitted: capabilities(client.flags) & capabilities(server.flags),
            kdc_flags,
        }
    }

    /// Service tickets: requested options limited by the TGT flags and the capabilities of both principals.
    ///
    /// `client` is `None` for clients without a local entry, whose capabilities were checked by their own KDC.
    ///
    /// [Generation of KRB_TGS_REP Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.3.3)
    pub fn for_tgs(
        options: KdcOptions,
        tgt_flags: TicketFlags,
        client: Option<&PrincipalEntry>,
        server: &PrincipalEntry,
    ) -> Self {
        let mut from_tgt = TicketFlags::empty();
        if tgt_flags.contains(TicketFlags::FORWARDABLE) {
            from_tgt |= TicketFlags::FORWARDABLE | TicketFlags::FORWARDED;
        }
        if tgt_flags.contains(TicketFlags::PROXIABLE) {
            from_tgt |= TicketFlags::PROXIABLE | TicketFlags::PROXY;
        }
        if tgt_flags.contains(TicketFlags::MAY_POSTDATE) {
            from_tgt |= TicketFlags::MAY_POSTDATE | TicketFlags::POSTDATED;
        }
        if tgt_flags.contains(TicketFlags::RENEWABLE) {
            from_tgt |= TicketFlags::RENEWABLE;
        }

        // Forwarded and authentication-derived flags carry over from the TGT.
        let mut kdc_flags = tgt_flags
            & (TicketFlags::FORWARDED | TicketFlags::PRE_AUTHENT | TicketFlags::HW_AUTHENT | TicketFlags::ANONYMOUS);
        if server.flags.contains(PrincipalFlags::OK_AS_DELEGATE) {
            kdc_flags |= TicketFlags::OK_AS_DELEGATE;
        }

        let mut permitted = from_tgt & capabilities(server.flags);
        if let Some(client) = client {
            permitted &= capabilities(client.flags);
        }

        Self {
            requested: TicketFlags::requested_by(options),
            permitted,
            kdc_flags,
        }
    }

    /// Renewed and validated tickets keep the flags of the presented ticket.
    pub fn for_reissue(tgt_flags: TicketFlags) -> Self {
        let carried = tgt_flags - TicketFlags::INVALID - TicketFlags::TRANSITED_POLICY_CHECKED;

        Self {
            requested: carried & TicketFlags::REQUESTABLE,
            permitted: carried & TicketFlags::REQUESTABLE,
            kdc_flags: carried - TicketFlags::REQUESTABLE,
        }
    }

    pub fn with_anonymous(mut self) -> Self {
        self.kdc_flags |= TicketFlags::ANONYMOUS;
        self
    }
}

/// Requested validity window.
#[derive(Debug, Clone, Copy)]
pub struct TimeRequest {
    pub from: Option<OffsetDateTime>,
    /// The Unix epoch stands for "as long as possible".
    pub till: OffsetDateTime,
    pub rtime: Option<OffsetDateTime>,
    pub renewable_ok: bool,
}

/// Upper bounds on the validity window.
#[derive(Debug, Clone, Copy)]
pub struct TimeLimits {
    pub now: OffsetDateTime,
    pub auth_time: OffsetDateTime,
    pub max_time_skew: Duration,
    /// Smallest of the client, server and realm maximum lifetimes.
    pub max_life: Duration,
    /// Smallest of the client, server and realm maximum renewable lifetimes.
    pub max_renew: Duration,
    /// End time of the TGT a service ticket is derived from.
    pub end_limit: Option<OffsetDateTime>,
    /// Renew-till time of the TGT a service ticket is derived from.
    pub renew_limit: Option<OffsetDateTime>,
}

impl TimeLimits {
    /// Limits for a ticket issued at `now` to `client` for `server`.
    ///
    /// `client` is `None` for clients of other realms, whose entries are not in the local database.
    pub fn new(
        config: &KdcConfig,
        client: Option<&PrincipalEntry>,
        server: &PrincipalEntry,
        now: OffsetDateTime,
        auth_time: OffsetDateTime,
    ) -> Self {
        let entry_limit = |entry: Option<&PrincipalEntry>, pick: fn(&PrincipalEntry) -> Option<Duration>, realm: Duration| {
            entry.and_then(pick).map_or(realm, |limit| limit.min(realm))
        };

        let realm_life = config.max_ticket_life();
        let realm_renew = config.max_renewable_life();

        Self {
            now,
            auth_time,
            max_time_skew: config.max_time_skew(),
            max_life: entry_limit(client, |entry| entry.max_life, realm_life)
                .min(entry_limit(Some(server), |entry| entry.max_life, realm_life)),
            max_renew: entry_limit(client, |entry| entry.max_renew, realm_renew)
                .min(entry_limit(Some(server), |entry| entry.max_renew, realm_renew)),
            end_limit: None,
            renew_limit: None,
        }
    }

    /// Service tickets never outlive the TGT they come from.
    pub fn bounded_by(mut self, tgt: &EncTicketBody) -> Self {
        self.end_limit = Some(tgt.end_time);
        self.renew_limit = tgt.renew_till;
        self
    }
}

fn is_infinite(time: OffsetDateTime) -> bool {
    time == OffsetDateTime::UNIX_EPOCH
}

fn earliest(times: impl IntoIterator<Item = Option<OffsetDateTime>>) -> Option<OffsetDateTime> {
    times.into_iter().flatten().min()
}

/// Validity window of an issued ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketTimes {
    pub auth_time: OffsetDateTime,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub renew_till: Option<OffsetDateTime>,
}

pub struct New;

pub struct FlagsSet {
    flags: TicketFlags,
    permitted: TicketFlags,
}

pub struct TimesSet {
    flags: TicketFlags,
    times: TicketTimes,
}

pub struct TransitedSet {
    flags: TicketFlags,
    times: TicketTimes,
    transited: TransitedRealms,
}

pub struct Keyed {
    flags: TicketFlags,
    times: TicketTimes,
    transited: TransitedRealms,
    session_key: Secret<Vec<u8>>,
    session_etype: EncryptionType,
}

pub struct TicketBuilder<S> {
    client: Principal,
    addresses: Vec<HostAddress>,
    authorization_data: Option<AuthorizationData>,
    state: S,
}

impl TicketBuilder<New> {
    pub fn new(client: Principal) -> Self {
        Self {
            client,
            addresses: Vec::new(),
            authorization_data: None,
            state: New,
        }
    }

    pub fn with_addresses(mut self, addresses: Vec<HostAddress>) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn with_authorization_data(mut self, authorization_data: Option<AuthorizationData>) -> Self {
        self.authorization_data = authorization_data;
        self
    }

    /// Derives the ticket flags.
    ///
    /// Asking for a flag that may not be granted is an error: the flag is never silently dropped.
    pub fn flags(self, request: FlagRequest) -> Result<TicketBuilder<FlagsSet>, KdcError> {
        let denied = request.requested - request.permitted;
        if !denied.is_empty() {
            debug!(?denied, "requested ticket flags are not permitted");
            return Err(KdcError::BadOption("requested ticket flags are not permitted"));
        }

        Ok(TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: FlagsSet {
                flags: request.requested | request.kdc_flags,
                permitted: request.permitted,
            },
        })
    }
}

impl TicketBuilder<FlagsSet> {
    /// Computes the validity window of a new ticket.
    ///
    /// RFC: [Generation of KRB_AS_REP Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3).
    pub fn times(self, request: TimeRequest, limits: TimeLimits) -> Result<TicketBuilder<TimesSet>, KdcError> {
        let FlagsSet { mut flags, permitted } = self.state;
        let now = limits.now;

        // RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.3):
        // > If the requested starttime is absent, indicates a time in the past,
        // > or is within the window of acceptable clock skew for the KDC ...,
        // > then the starttime of the ticket is set to the authentication server's current time.
        let start_time = match request.from {
            Some(from) if from > saturating_add(now, limits.max_time_skew) => {
                if !flags.contains(TicketFlags::POSTDATED) {
                    return Err(KdcError::CannotPostdate("requested start time is in the future"));
                }
                if limits.end_limit.is_some_and(|end| from >= end) {
                    return Err(KdcError::CannotPostdate("requested start time is after the TGT end time"));
                }
                flags |= TicketFlags::INVALID;

                from
            }
            _ => {
                flags -= TicketFlags::POSTDATED;
                now
            }
        };

        let requested_end = (!is_infinite(request.till)).then_some(request.till);
        let max_end = saturating_add(now, limits.max_life);
        let mut end_time = earliest([requested_end, Some(max_end), limits.end_limit]).unwrap_or(max_end);

        // RENEWABLE-OK: a ticket that cannot last as long as requested becomes renewable up to `till`.
        let clamped = requested_end.is_none_or(|till| till > end_time);
        let mut rtime = request.rtime;
        if request.renewable_ok
            && clamped
            && !flags.contains(TicketFlags::RENEWABLE)
            && permitted.contains(TicketFlags::RENEWABLE)
        {
            flags |= TicketFlags::RENEWABLE;
            rtime = Some(request.till);
        }

        let renew_till = if flags.contains(TicketFlags::RENEWABLE) {
            let requested_renew = rtime.unwrap_or(request.till);
            let requested_renew = (!is_infinite(requested_renew)).then_some(requested_renew);
            let max_renew_till = saturating_add(now, limits.max_renew);
            let renew_till =
                earliest([requested_renew, Some(max_renew_till), limits.renew_limit]).unwrap_or(max_renew_till);
            end_time = end_time.min(renew_till);

            Some(renew_till)
        } else {
            None
        };

        if start_time >= end_time {
            return Err(KdcError::NeverValid(format!(
                "ticket would end ({end_time}) before it starts ({start_time})"
            )));
        }

        Ok(TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: TimesSet {
                flags,
                times: TicketTimes {
                    auth_time: limits.auth_time,
                    start_time,
                    end_time,
                    renew_till,
                },
            },
        })
    }

    /// Extends a renewable ticket: same lifetime as before, starting now, never past its renew-till time.
    ///
    /// [Renewable Tickets](https://www.rfc-editor.org/rfc/rfc4120#section-2.3)
    pub fn renewed_times(self, tgt: &EncTicketBody, now: OffsetDateTime) -> Result<TicketBuilder<TimesSet>, KdcError> {
        let renew_till = tgt
            .renew_till
            .ok_or(KdcError::BadOption("ticket is not renewable"))?;
        if renew_till <= now {
            return Err(KdcError::TicketExpired("renewable lifetime has ended"));
        }

        let lifetime = tgt.end_time - tgt.effective_start_time();
        let times = TicketTimes {
            auth_time: tgt.auth_time,
            start_time: now,
            end_time: saturating_add(now, lifetime).min(renew_till),
            renew_till: Some(renew_till),
        };

        self.with_times(times)
    }

    /// Keeps the validity window of a postdated ticket being validated.
    pub fn validated_times(self, tgt: &EncTicketBody, now: OffsetDateTime) -> Result<TicketBuilder<TimesSet>, KdcError> {
        if tgt.effective_start_time() > now {
            return Err(KdcError::TicketNotYetValid("postdated ticket is not yet valid"));
        }

        self.with_times(TicketTimes {
            auth_time: tgt.auth_time,
            start_time: tgt.effective_start_time(),
            end_time: tgt.end_time,
            renew_till: tgt.renew_till,
        })
    }

    fn with_times(self, times: TicketTimes) -> Result<TicketBuilder<TimesSet>, KdcError> {
        if times.start_time >= times.end_time {
            return Err(KdcError::NeverValid("ticket has already ended".to_owned()));
        }

        Ok(TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: TimesSet {
                flags: self.state.flags,
                times,
            },
        })
    }
}

/// Transited path of a ticket derived from a (possibly cross-realm) TGT.
pub struct TransitedInput<'a> {
    pub config: &'a KdcConfig,
    /// Path recorded in the TGT.
    pub previous: TransitedRealms,
    /// Realm of the KDC that issued the TGT.
    pub issuing_realm: &'a str,
    /// Realm of the server the new ticket is for.
    pub server_realm: &'a str,
    /// The path check was waived by configuration or by an allowed `DISABLE_TRANSITED_CHECK` request.
    pub exempt: bool,
    /// The server accepts only tickets whose path has been checked.
    pub check_required: bool,
    /// For renewed and validated tickets: whether the presented ticket had its path checked.
    /// A reissued ticket never gains flags its source ticket did not have.
    pub reissued_checked: Option<bool>,
}

impl TicketBuilder<TimesSet> {
    /// Initial tickets have not crossed any realm.
    pub fn initial_transited(self) -> TicketBuilder<TransitedSet> {
        TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: TransitedSet {
                flags: self.state.flags | TicketFlags::TRANSITED_POLICY_CHECKED,
                times: self.state.times,
                transited: TransitedRealms::new(),
            },
        }
    }

    /// Extends the TGT path with the issuing realm and checks it against the configured trust paths.
    ///
    /// RFC: [Encoding the Transited Field](https://www.rfc-editor.org/rfc/rfc4120#section-3.3.3.2).
    pub fn transited(self, input: TransitedInput<'_>) -> Result<TicketBuilder<TransitedSet>, KdcError> {
        let TransitedInput {
            config,
            previous: mut transited,
            issuing_realm,
            server_realm,
            exempt,
            check_required,
            reissued_checked,
        } = input;
        let mut flags = self.state.flags - TicketFlags::TRANSITED_POLICY_CHECKED;

        if issuing_realm != self.client.realm && issuing_realm != config.realm {
            transited.push(issuing_realm);
        }

        if exempt {
            debug!(path = %transited, "transited path check waived");
        } else {
            check_transited_path(config, &self.client.realm, server_realm, &transited)?;
            if reissued_checked != Some(false) {
                flags |= TicketFlags::TRANSITED_POLICY_CHECKED;
            }
        }

        if check_required && !flags.contains(TicketFlags::TRANSITED_POLICY_CHECKED) {
            return Err(KdcError::PathNotAccepted(
                "server requires a checked transited path".to_owned(),
            ));
        }

        Ok(TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: TransitedSet {
                flags,
                times: self.state.times,
                transited,
            },
        })
    }
}

impl TicketBuilder<TransitedSet> {
    /// Generates a fresh session key.
    pub fn session_key(self, etype: EncryptionType) -> Result<TicketBuilder<Keyed>, KdcError> {
        let session_key = random_session_key(etype)?;

        Ok(TicketBuilder {
            client: self.client,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
            state: Keyed {
                flags: self.state.flags,
                times: self.state.times,
                transited: self.state.transited,
                session_key,
                session_etype: etype,
            },
        })
    }
}

impl TicketBuilder<Keyed> {
    pub fn build(self) -> EncTicketBody {
        let Keyed {
            flags,
            times,
            transited,
            session_key,
            session_etype,
        } = self.state;

        EncTicketBody {
            flags,
            session_key,
            session_etype,
            client: self.client,
            transited,
            auth_time: times.auth_time,
            start_time: Some(times.start_time),
            end_time: times.end_time,
            renew_till: times.renew_till,
            addresses: self.addresses,
            authorization_data: self.authorization_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::datetime;

    use super::*;
    use crate::principal::KeyEntry;

    const NOW: OffsetDateTime = datetime!(2023-11-14 22:13:20 UTC);

    fn client() -> PrincipalEntry {
        PrincipalEntry::new(Principal::new("EXAMPLE.COM", ["alice"]), PrincipalFlags::USER)
    }

    fn server() -> PrincipalEntry {
        PrincipalEntry::new(Principal::krbtgt("EXAMPLE.COM", "EXAMPLE.COM"), PrincipalFlags::SERVICE)
    }

    fn limits() -> TimeLimits {
        TimeLimits::new(&KdcConfig::new("EXAMPLE.COM"), Some(&client()), &server(), NOW, NOW)
    }

    fn request(till: OffsetDateTime) -> TimeRequest {
        TimeRequest {
            from: None,
            till,
            rtime: None,
            renewable_ok: false,
        }
    }

    fn flagged(options: KdcOptions) -> Result<TicketBuilder<FlagsSet>, KdcError> {
        TicketBuilder::new(client().principal).flags(FlagRequest::for_as(options, &client(), &server(), true, false))
    }

    fn build(builder: TicketBuilder<TimesSet>) -> EncTicketBody {
        builder
            .initial_transited()
            .session_key(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            .unwrap()
            .build()
    }

    #[test]
    fn flags_outside_the_permitted_set_are_rejected() {
        let mut server = server();
        server.flags.remove(PrincipalFlags::FORWARDABLE);

        let result = TicketBuilder::new(client().principal).flags(FlagRequest::for_as(
            KdcOptions::FORWARDABLE,
            &client(),
            &server,
            true,
            false,
        ));

        assert!(matches!(result, Err(KdcError::BadOption(_))));
    }

    #[test]
    fn as_tickets_carry_kdc_flags() {
        let ticket = build(flagged(KdcOptions::FORWARDABLE).unwrap().times(request(NOW + Duration::hours(1)), limits()).unwrap());

        assert_eq!(
            ticket.flags,
            TicketFlags::FORWARDABLE
                | TicketFlags::INITIAL
                | TicketFlags::PRE_AUTHENT
                | TicketFlags::TRANSITED_POLICY_CHECKED
        );
    }

    #[test]
    fn lifetime_is_clamped_by_policy() {
        let mut limits = limits();
        limits.max_life = Duration::hours(2);

        let ticket = build(flagged(KdcOptions::empty()).unwrap().times(request(NOW + Duration::days(3)), limits).unwrap());

        assert_eq!(ticket.end_time, NOW + Duration::hours(2));
        assert_eq!(ticket.start_time, Some(NOW));
        assert_eq!(ticket.renew_till, None);
    }

    #[test]
    fn epoch_till_means_maximum_lifetime() {
        let ticket = build(
            flagged(KdcOptions::empty())
                .unwrap()
                .times(request(OffsetDateTime::UNIX_EPOCH), limits())
                .unwrap(),
        );

        assert_eq!(ticket.end_time, NOW + limits().max_life);
    }

    #[test]
    fn renewable_ok_upgrades_clamped_tickets() {
        let mut request = request(NOW + Duration::days(3));
        request.renewable_ok = true;

        let ticket = build(flagged(KdcOptions::RENEWABLE_OK).unwrap().times(request, limits()).unwrap());

        assert!(ticket.flags.contains(TicketFlags::RENEWABLE));
        assert_eq!(ticket.renew_till, Some(NOW + Duration::days(3)));
        assert!(ticket.end_time <= ticket.renew_till.unwrap());
    }

    #[test]
    fn future_start_requires_postdated_option() {
        let mut request = request(NOW + Duration::hours(5));
        request.from = Some(NOW + Duration::hours(1));

        let result = flagged(KdcOptions::empty()).unwrap().times(request, limits());
        assert!(matches!(result, Err(KdcError::CannotPostdate(_))));

        let ticket = build(
            flagged(KdcOptions::ALLOW_POSTDATE | KdcOptions::POSTDATED)
                .unwrap()
                .times(request, limits())
                .unwrap(),
        );
        assert!(ticket.flags.contains(TicketFlags::INVALID | TicketFlags::POSTDATED));
        assert_eq!(ticket.start_time, Some(NOW + Duration::hours(1)));
    }

    #[test]
    fn start_within_skew_is_now() {
        let mut request = request(NOW + Duration::hours(5));
        request.from = Some(NOW + Duration::minutes(1));

        let ticket = build(flagged(KdcOptions::empty()).unwrap().times(request, limits()).unwrap());

        assert_eq!(ticket.start_time, Some(NOW));
    }

    #[test]
    fn ticket_in_the_past_is_never_valid() {
        let result = flagged(KdcOptions::empty())
            .unwrap()
            .times(request(NOW - Duration::hours(1)), limits());

        assert!(matches!(result, Err(KdcError::NeverValid(_))));
    }

    #[test]
    fn renewal_never_passes_renew_till() {
        let tgt = EncTicketBody {
            flags: TicketFlags::RENEWABLE | TicketFlags::INITIAL,
            session_key: Secret::new(vec![1; 32]),
            session_etype: EncryptionType::AES256_CTS_HMAC_SHA1_96,
            client: client().principal,
            transited: TransitedRealms::new(),
            auth_time: NOW - Duration::hours(9),
            start_time: Some(NOW - Duration::hours(9)),
            end_time: NOW + Duration::hours(1),
            renew_till: Some(NOW + Duration::hours(3)),
            addresses: Vec::new(),
            authorization_data: None,
        };

        let config = KdcConfig::new("EXAMPLE.COM");
        let renewed = TicketBuilder::new(tgt.client.clone())
            .flags(FlagRequest::for_reissue(tgt.flags))
            .unwrap()
            .renewed_times(&tgt, NOW)
            .unwrap()
            .transited(TransitedInput {
                config: &config,
                previous: tgt.transited.clone(),
                issuing_realm: "EXAMPLE.COM",
                server_realm: "EXAMPLE.COM",
                exempt: false,
                check_required: false,
                reissued_checked: Some(tgt.flags.contains(TicketFlags::TRANSITED_POLICY_CHECKED)),
            })
            .unwrap()
            .session_key(EncryptionType::AES256_CTS_HMAC_SHA1_96)
            .unwrap()
            .build();

        assert_eq!(renewed.end_time, NOW + Duration::hours(3));
        assert_eq!(renewed.auth_time, tgt.auth_time);
        assert!(renewed.flags.difference(tgt.flags).is_empty());
    }

    #[test]
    fn tgs_flags_are_limited_by_the_client() {
        let mut client = client();
        client.flags.remove(PrincipalFlags::FORWARDABLE);
        let tgt_flags = TicketFlags::FORWARDABLE | TicketFlags::PRE_AUTHENT;

        let result = TicketBuilder::new(client.principal.clone()).flags(FlagRequest::for_tgs(
            KdcOptions::FORWARDABLE,
            tgt_flags,
            Some(&client),
            &server(),
        ));
        assert!(matches!(result, Err(KdcError::BadOption(_))));

        let builder = TicketBuilder::new(client.principal.clone())
            .flags(FlagRequest::for_tgs(KdcOptions::FORWARDABLE, tgt_flags, None, &server()));
        assert!(builder.is_ok());
    }

    #[test]
    fn huge_lifetimes_saturate() {
        let mut config = KdcConfig::new("EXAMPLE.COM");
        config.max_ticket_life = u64::MAX;
        config.max_renewable_life = u64::MAX;
        let limits = TimeLimits::new(&config, Some(&client()), &server(), NOW, NOW);

        let ticket = build(
            flagged(KdcOptions::RENEWABLE)
                .unwrap()
                .times(request(OffsetDateTime::UNIX_EPOCH), limits)
                .unwrap(),
        );

        assert!(ticket.end_time > NOW + Duration::days(365 * 1000));
        assert_eq!(ticket.renew_till, Some(ticket.end_time));
    }

    #[test]
    fn exempt_path_cannot_reach_servers_requiring_the_check() {
        let config = KdcConfig::new("EXAMPLE.COM");
        let builder = flagged(KdcOptions::empty())
            .unwrap()
            .times(request(NOW + Duration::hours(1)), limits())
            .unwrap();

        let result = builder.transited(TransitedInput {
            config: &config,
            previous: TransitedRealms::new(),
            issuing_realm: "EXAMPLE.COM",
            server_realm: "EXAMPLE.COM",
            exempt: true,
            check_required: true,
            reissued_checked: None,
        });

        assert!(matches!(result, Err(KdcError::PathNotAccepted(_))));
    }

    #[test]
    fn ticket_survives_encryption() {
        let server_key = KeyEntry::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, 4, vec![0x24; 32]);
        let mut ticket = build(
            flagged(KdcOptions::FORWARDABLE | KdcOptions::RENEWABLE)
                .unwrap()
                .times(request(NOW + Duration::hours(4)), limits())
                .unwrap(),
        );
        ticket.transited = TransitedRealms::from_realms(["HUB.NET", "PARTNER.ORG"]);

        let encrypted = ticket.encrypt(&server().principal, KeyRef::from(&server_key)).unwrap();
        let decrypted = decrypt_ticket(&encrypted, KeyRef::from(&server_key)).unwrap();

        assert_eq!(decrypted.flags, ticket.flags);
        assert_eq!(decrypted.session_key, ticket.session_key);
        assert_eq!(decrypted.client, ticket.client);
        assert_eq!(decrypted.transited, ticket.transited);
        assert_eq!(decrypted.auth_time, ticket.auth_time);
        assert_eq!(decrypted.start_time, ticket.start_time);
        assert_eq!(decrypted.end_time, ticket.end_time);
        assert_eq!(decrypted.renew_till, ticket.renew_till);
    }

    #[test]
    fn ticket_with_wrong_key_fails_integrity_check() {
        let server_key = KeyEntry::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, 1, vec![0x24; 32]);
        let wrong_key = KeyEntry::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, 1, vec![0x25; 32]);
        let ticket = build(
            flagged(KdcOptions::empty())
                .unwrap()
                .times(request(NOW + Duration::hours(1)), limits())
                .unwrap(),
        );

        let encrypted = ticket.encrypt(&server().principal, KeyRef::from(&server_key)).unwrap();

        assert!(matches!(
            decrypt_ticket(&encrypted, KeyRef::from(&wrong_key)),
            Err(KdcError::BadIntegrity(_))
        ));
    }

    proptest! {
        #[test]
        fn end_time_respects_every_limit(
            till_offset in -3_600_i64..30 * 86_400,
            rtime_offset in proptest::option::of(1_i64..30 * 86_400),
            client_life in proptest::option::of(60_i64..86_400),
            server_life in proptest::option::of(60_i64..86_400),
            renewable in any::<bool>(),
            renewable_ok in any::<bool>(),
        ) {
            let mut client = client();
            client.max_life = client_life.map(Duration::seconds);
            let mut server = server();
            server.max_life = server_life.map(Duration::seconds);
            let config = KdcConfig::new("EXAMPLE.COM");
            let limits = TimeLimits::new(&config, Some(&client), &server, NOW, NOW);

            let mut options = KdcOptions::empty();
            if renewable {
                options |= KdcOptions::RENEWABLE;
            }
            let request = TimeRequest {
                from: None,
                till: NOW + Duration::seconds(till_offset),
                rtime: rtime_offset.map(|offset| NOW + Duration::seconds(offset)),
                renewable_ok,
            };

            let result = TicketBuilder::new(client.principal.clone())
                .flags(FlagRequest::for_as(options, &client, &server, true, false))
                .unwrap()
                .times(request, limits);

            if let Ok(builder) = result {
                let ticket = build(builder);
                prop_assert!(ticket.end_time <= request.till);
                prop_assert!(ticket.end_time <= NOW + config.max_ticket_life());
                if let Some(life) = client.max_life {
                    prop_assert!(ticket.end_time <= NOW + life);
                }
                if let Some(life) = server.max_life {
                    prop_assert!(ticket.end_time <= NOW + life);
                }
                if let Some(renew_till) = ticket.renew_till {
                    prop_assert!(ticket.end_time <= renew_till);
                    prop_assert!(renew_till <= NOW + config.max_renewable_life());
                }
            } else {
                prop_assert!(till_offset <= 0);
            }
        }
    }
}
