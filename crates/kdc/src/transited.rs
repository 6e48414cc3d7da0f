//! Cross-realm transited path handling.
//!
//! [Transited Realm Encoding](https://www.rfc-editor.org/rfc/rfc4120#section-3.3.3.2)

use std::fmt;

use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, OctetStringAsn1};
use picky_krb::data_types::TransitedEncoding;

use crate::config::KdcConfig;
use crate::constants::DOMAIN_X500_COMPRESS;
use crate::error::KdcError;
use crate::utils::{integer_from_i64, integer_to_i64};

/// Ordered list of realms a cross-realm ticket has passed through.
///
/// The client and server realms themselves are never part of the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitedRealms(Vec<String>);

impl TransitedRealms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_realms<I, S>(realms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(realms.into_iter().map(Into::into).collect())
    }

    pub fn realms(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, realm: &str) -> bool {
        self.0.iter().any(|transited| transited == realm)
    }

    /// Records a realm crossing. Realms already on the path are not added twice.
    pub fn push(&mut self, realm: impl Into<String>) {
        let realm = realm.into();
        if !self.contains(&realm) {
            self.0.push(realm);
        }
    }

    /// Encodes the path with DOMAIN-X500-COMPRESS.
    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        let mut previous: Option<&str> = None;

        for (index, realm) in self.0.iter().enumerate() {
            if index > 0 {
                encoded.push(',');
            }

            let field = match previous {
                // EDU,MIT.  ->  EDU, MIT.EDU
                Some(previous) if !realm.starts_with([' ', '/']) && is_domain_suffix(realm, previous) => {
                    escape(&realm[..realm.len() - previous.len()])
                }
                // /COM,/HP  ->  /COM, /COM/HP
                Some(previous)
                    if previous.starts_with('/')
                        && !realm.ends_with('.')
                        && realm.len() > previous.len()
                        && realm.starts_with(previous)
                        && realm[previous.len()..].starts_with('/') =>
                {
                    escape(&realm[previous.len()..])
                }
                // a leading space marks a name that would otherwise be read as compressed
                _ if needs_literal_marker(realm, index) => format!(" {}", escape(realm)),
                _ => escape(realm),
            };

            encoded.push_str(&field);
            previous = Some(realm);
        }

        encoded
    }

    /// Decodes a DOMAIN-X500-COMPRESS path.
    ///
    /// Empty fields, which ask the reader to fill in the realm hierarchy, are rejected:
    /// such a path cannot be checked against explicitly configured trust paths.
    pub fn decode(contents: &str) -> Result<Self, KdcError> {
        if contents.is_empty() {
            return Ok(Self::new());
        }

        let mut realms: Vec<String> = Vec::new();

        for field in split_fields(contents) {
            if field.is_empty() {
                return Err(KdcError::PathNotAccepted(format!(
                    "implicit hierarchical path in transited encoding: {contents}"
                )));
            }

            let previous = realms.last().map(String::as_str);
            let realm = if let Some(literal) = field.strip_prefix(' ') {
                literal.to_owned()
            } else if let (Some(previous), true) = (previous, field.ends_with('.')) {
                format!("{field}{previous}")
            } else if let (Some(previous), true) = (previous, field.starts_with('/')) {
                if previous.starts_with('/') {
                    format!("{previous}{field}")
                } else {
                    field
                }
            } else {
                field
            };

            realms.push(realm);
        }

        Ok(Self(realms))
    }

    pub fn to_asn1(&self) -> TransitedEncoding {
        TransitedEncoding {
            tr_type: ExplicitContextTag0::from(integer_from_i64(DOMAIN_X500_COMPRESS)),
            contents: ExplicitContextTag1::from(OctetStringAsn1::from(self.encode().into_bytes())),
        }
    }

    pub fn from_asn1(transited: &TransitedEncoding) -> Result<Self, KdcError> {
        let contents = &transited.contents.0.0;
        if contents.is_empty() {
            return Ok(Self::new());
        }

        let tr_type = integer_to_i64(&transited.tr_type.0).unwrap_or(-1);
        if tr_type != DOMAIN_X500_COMPRESS {
            return Err(KdcError::TransitedTypeNotSupported(tr_type));
        }

        let contents = std::str::from_utf8(contents)
            .map_err(|_| KdcError::PathNotAccepted("transited encoding is not valid UTF-8".to_owned()))?;

        Self::decode(contents)
    }
}

impl fmt::Display for TransitedRealms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

fn is_domain_suffix(realm: &str, previous: &str) -> bool {
    realm.len() > previous.len() + 1 && realm.ends_with(previous) && realm[..realm.len() - previous.len()].ends_with('.')
}

fn needs_literal_marker(realm: &str, index: usize) -> bool {
    realm.starts_with(' ') || (index > 0 && (realm.starts_with('/') || realm.ends_with('.')))
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

fn split_fields(contents: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = contents.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}

/// Validates the path of a cross-realm ticket against the configured `capaths`.
///
/// A ticket of a client from another realm is accepted only when a trust path from the client realm to
/// `server_realm` is configured, and every transited realm is one of the permitted intermediate realms.
/// Tickets of local clients that never left the realm pass trivially.
pub fn check_transited_path(
    config: &KdcConfig,
    client_realm: &str,
    server_realm: &str,
    transited: &TransitedRealms,
) -> Result<(), KdcError> {
    if client_realm == config.realm && transited.is_empty() {
        return Ok(());
    }

    if client_realm == server_realm && transited.is_empty() {
        return Ok(());
    }

    let capath = config.capath(client_realm, server_realm).ok_or_else(|| {
        KdcError::PathNotAccepted(format!("no trust path from {client_realm} to {server_realm}"))
    })?;

    if let Some(unexpected) = transited
        .realms()
        .iter()
        .find(|realm| !capath.iter().any(|permitted| permitted == *realm))
    {
        return Err(KdcError::PathNotAccepted(format!(
            "realm {unexpected} is not on the trust path from {client_realm} to {server_realm}"
        )));
    }

    Ok(())
}
