use std::collections::BTreeMap;

use serde::Deserialize;
use time::Duration;

/// Default maximum allowed clock difference between the KDC and its clients: five minutes.
pub const DEFAULT_MAX_TIME_SKEW: u64 = 5 * 60;
/// Default maximum ticket lifetime: ten hours.
pub const DEFAULT_MAX_TICKET_LIFE: u64 = 10 * 60 * 60;
/// Default maximum renewable lifetime: seven days.
pub const DEFAULT_MAX_RENEWABLE_LIFE: u64 = 7 * 24 * 60 * 60;
/// Default limit on the number of cross-realm referral hops chased for one TGS request.
pub const DEFAULT_MAX_REFERRAL_HOPS: usize = 2;

/// KDC configuration.
///
/// The configuration is immutable for the lifetime of a [Kdc](crate::Kdc) and is passed explicitly
/// to every request handler. All durations are in seconds.
#[derive(Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct KdcConfig {
    /// The realm served by this KDC.
    ///
    /// For example, `EXAMPLE.COM`.
    pub realm: String,
    /// The maximum allowed time difference between client and KDC clocks.
    ///
    /// The value must be in seconds.
    pub max_time_skew: u64,
    /// Require preauthentication for every AS request regardless of principal flags.
    pub require_preauth: bool,
    /// Verify that the request comes from one of the addresses bound to the ticket.
    pub check_ticket_addresses: bool,
    /// Allow anonymous tickets ([RFC 6112](https://www.rfc-editor.org/rfc/rfc6112)).
    pub allow_anonymous: bool,
    /// Accept unkeyed authenticator checksums (RSA-MD5) in TGS requests.
    ///
    /// Unkeyed checksums can be recomputed by an attacker who modifies the request body,
    /// so they are rejected with `KRB_AP_ERR_INAPP_CKSUM` unless this flag is set.
    pub allow_unkeyed_checksum: bool,
    /// Validate the transited path of cross-realm tickets against [Self::capaths].
    pub enforce_transited_policy: bool,
    /// Honour the `DISABLE_TRANSITED_CHECK` KDC option.
    pub allow_disable_transited_check: bool,
    /// Realm-wide maximum ticket lifetime.
    pub max_ticket_life: u64,
    /// Realm-wide maximum renewable lifetime.
    pub max_renewable_life: u64,
    /// Maximum number of cross-realm hops the KDC chases when a requested `krbtgt/REALM` is unknown.
    pub max_referral_hops: usize,
    /// Permitted authentication paths: `capaths[client_realm][server_realm]` lists the intermediate
    /// realms a ticket may have transited, in order. An empty list means a direct trust.
    ///
    /// Mirrors the `[capaths]` section of `krb5.conf`.
    pub capaths: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl KdcConfig {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            ..Default::default()
        }
    }

    pub fn max_time_skew(&self) -> Duration {
        seconds(self.max_time_skew)
    }

    pub fn max_ticket_life(&self) -> Duration {
        seconds(self.max_ticket_life)
    }

    pub fn max_renewable_life(&self) -> Duration {
        seconds(self.max_renewable_life)
    }

    /// Returns the configured intermediate realms between `client_realm` and `server_realm`.
    pub fn capath(&self, client_realm: &str, server_realm: &str) -> Option<&[String]> {
        self.capaths
            .get(client_realm)
            .and_then(|paths| paths.get(server_realm))
            .map(Vec::as_slice)
    }
}

impl Default for KdcConfig {
    fn default() -> Self {
        Self {
            realm: String::new(),
            max_time_skew: DEFAULT_MAX_TIME_SKEW,
            require_preauth: true,
            check_ticket_addresses: false,
            allow_anonymous: false,
            allow_unkeyed_checksum: false,
            enforce_transited_policy: true,
            allow_disable_transited_check: false,
            max_ticket_life: DEFAULT_MAX_TICKET_LIFE,
            max_renewable_life: DEFAULT_MAX_RENEWABLE_LIFE,
            max_referral_hops: DEFAULT_MAX_REFERRAL_HOPS,
            capaths: BTreeMap::new(),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}
