use picky_krb::constants::types::AS_REQ_MSG_TYPE;
use picky_krb::messages::{AsRep, AsReq};

use crate::constants::name_types::NT_WELLKNOWN;
use crate::constants::pa_types::PA_ENC_TIMESTAMP;
use crate::constants::{ANONYMOUS_NAME, WELLKNOWN_NAME};
use crate::crypto::KeyRef;
use crate::error::KdcError;
use crate::etype::{select_client_key, select_server_key, select_session_etype};
use crate::flags::KdcOptions;
use crate::policy::{check, check_hardware_auth};
use crate::preauth::{
    PreauthOutcome, etype_info2_entry, etype_info2_pa_data, method_data, preauth_required, verify_enc_timestamp,
};
use crate::principal::{LookupFlags, Principal, PrincipalProvider};
use crate::reply::{RepBody, ReplyKind, ReplyParts, encode_reply};
use crate::request::{KdcRequest, address_matches};
use crate::ticket::{FlagRequest, TicketBuilder, TimeLimits, TimeRequest};
use crate::{ExchangeKind, RequestContext};

/// Options that make no sense in an initial ticket request.
const TGS_ONLY_OPTIONS: KdcOptions = KdcOptions::RENEW
    .union(KdcOptions::VALIDATE)
    .union(KdcOptions::PROXY)
    .union(KdcOptions::FORWARDED)
    .union(KdcOptions::ENC_TKT_IN_SKEY)
    .union(KdcOptions::CNAME_IN_ADDL_TKT);

/// Performs AS exchange according to the RFC 4120.
///
/// RFC: [The Authentication Service Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.1).
pub fn handle_as_req<P: PrincipalProvider>(as_req: &AsReq, ctx: &RequestContext<'_, P>) -> Result<AsRep, KdcError> {
    handle_as_req_with_preauth(as_req, ctx, None)
}

/// Performs AS exchange for a client already authenticated by an external preauthentication mechanism.
///
/// When `external` is `None`, the client proves itself with an encrypted timestamp (or not at all, when
/// neither the configuration nor the principals require preauthentication).
#[instrument(level = "debug", skip_all, fields(realm = %ctx.config.realm))]
pub fn handle_as_req_with_preauth<P: PrincipalProvider>(
    as_req: &AsReq,
    ctx: &RequestContext<'_, P>,
    external: Option<PreauthOutcome>,
) -> Result<AsRep, KdcError> {
    let config = ctx.config;
    let now = ctx.now;

    let request = KdcRequest::parse(&as_req.0, AS_REQ_MSG_TYPE)?;

    if request.realm != config.realm {
        return Err(KdcError::WrongRealm(request.realm));
    }

    if request.options.intersects(TGS_ONLY_OPTIONS) {
        return Err(KdcError::BadOption("option is not allowed in AS requests"));
    }

    let anonymous = request.options.contains(KdcOptions::REQUEST_ANONYMOUS);
    if anonymous && !config.allow_anonymous {
        return Err(KdcError::BadOption("anonymous tickets are not allowed"));
    }

    let client_name = request
        .client
        .as_ref()
        .ok_or(KdcError::MalformedRequest("AS request without client name"))?;
    let server_name = request
        .server
        .as_ref()
        .ok_or(KdcError::MalformedRequest("AS request without server name"))?;

    let mut lookup_flags = LookupFlags::empty();
    if request.options.contains(KdcOptions::CANONICALIZE) {
        lookup_flags |= LookupFlags::CANONICALIZE;
    }

    let client = ctx
        .lookup(client_name, lookup_flags | LookupFlags::CLIENT)?
        .ok_or_else(|| KdcError::ClientPrincipalUnknown(client_name.to_string()))?;
    let server = ctx
        .lookup(server_name, lookup_flags | LookupFlags::SERVER)?
        .ok_or_else(|| KdcError::ServerPrincipalUnknown(server_name.to_string()))?;

    check(&client, &server, ExchangeKind::As, now)?;

    let server_key = select_server_key(&server, &request.etypes)?;
    let session_etype = select_session_etype(&request.etypes, None)?;

    let (preauth, pre_authenticated) = match external {
        Some(outcome) => (outcome, true),
        None => {
            // The key negotiation runs first: a client without any usable key gets ETYPE_NOSUPP
            // rather than a request for preauthentication it cannot produce.
            let client_key = select_client_key(&client, &request.etypes)?;

            let verified = match verify_enc_timestamp(
                &client,
                request.pa_data(PA_ENC_TIMESTAMP),
                now,
                config.max_time_skew(),
            ) {
                Err(KdcError::PreAuthFailed { reason, .. }) => {
                    info!(
                        target: "kdc_core::audit",
                        client = %client.principal,
                        reason,
                        "AS request refused: preauthentication failed"
                    );

                    return Err(KdcError::PreAuthFailed {
                        reason,
                        hints: method_data(&client, &request.etypes)?,
                    });
                }
                verified => verified?,
            };

            match verified {
                Some(outcome) => (outcome, true),
                None if preauth_required(config, &client, &server) => {
                    info!(
                        target: "kdc_core::audit",
                        client = %client.principal,
                        "AS request refused: preauthentication required"
                    );

                    return Err(KdcError::PreAuthRequired {
                        reason: "preauthentication is required",
                        hints: method_data(&client, &request.etypes)?,
                    });
                }
                None => (PreauthOutcome::from_key(&client, client_key), false),
            }
        }
    };

    check_hardware_auth(&client, &server, preauth.hw_authenticated)?;

    if config.check_ticket_addresses && !request.addresses.is_empty() && !address_matches(&request.addresses, ctx.peer)
    {
        return Err(KdcError::BadAddress("request does not come from a requested ticket address"));
    }

    let mut flag_request = FlagRequest::for_as(
        request.options,
        &client,
        &server,
        pre_authenticated,
        preauth.hw_authenticated,
    );
    // RFC 6112: the ticket names the well-known anonymous principal instead of the client.
    let ticket_client = if anonymous {
        flag_request = flag_request.with_anonymous();

        Principal {
            realm: config.realm.clone(),
            components: vec![WELLKNOWN_NAME.to_owned(), ANONYMOUS_NAME.to_owned()],
            name_type: NT_WELLKNOWN,
        }
    } else {
        client.principal.clone()
    };

    let ticket = TicketBuilder::new(ticket_client)
        .with_addresses(request.addresses.clone())
        .flags(flag_request)?
        .times(
            TimeRequest {
                from: request.from,
                till: request.till,
                rtime: request.rtime,
                renewable_ok: request.options.contains(KdcOptions::RENEWABLE_OK),
            },
            TimeLimits::new(config, Some(&client), &server, now, now),
        )?
        .initial_transited()
        .session_key(session_etype)?
        .build();

    let padata = vec![etype_info2_pa_data(vec![etype_info2_entry(
        preauth.reply_etype,
        preauth.salt.as_deref(),
    )?])?];

    let kdc_rep = encode_reply(
        ReplyKind::As,
        ReplyParts {
            ticket: &ticket,
            server: &server.principal,
            server_key: server_key.into(),
            body: RepBody::new(&ticket, &server.principal, request.nonce.clone()).with_client_expirations(&client),
            reply_key: KeyRef {
                etype: preauth.reply_etype,
                kvno: preauth.reply_kvno,
                key: preauth.reply_key.as_ref(),
            },
            padata,
        },
    )?;

    info!(
        target: "kdc_core::audit",
        client = %client.principal,
        server = %server.principal,
        flags = ?ticket.flags,
        end_time = %ticket.end_time,
        session_etype = %ticket.session_etype,
        "AS request granted"
    );

    Ok(AsRep::from(kdc_rep))
}
