use picky_asn1::wrapper::Asn1SequenceOf;
use picky_krb::constants::types::TGS_REQ_MSG_TYPE;
use picky_krb::data_types::AuthorizationData;
use picky_krb::messages::{TgsRep, TgsReq};

use crate::ap_req::{TgsAuthentication, verify_tgs_request};
use crate::crypto::{KeyRef, encrypted_data_kvno};
use crate::error::KdcError;
use crate::etype::{EncryptionType, select_server_key, select_session_etype};
use crate::flags::{KdcOptions, TicketFlags};
use crate::policy::{check_client, check_hardware_auth, check_server};
use crate::principal::{LookupFlags, Principal, PrincipalEntry, PrincipalFlags, PrincipalProvider};
use crate::reply::{RepBody, ReplyParts, encode_reply};
use crate::request::KdcRequest;
use crate::ticket::{
    EncTicketBody, FlagRequest, TicketBuilder, TimeLimits, TimeRequest, TransitedInput, decrypt_ticket,
};
use crate::{ExchangeKind, RequestContext};

/// Looks the requested server up, following a referral when it is an unknown `krbtgt/OTHER`.
///
/// RFC: [Cross-Realm Operation](https://www.rfc-editor.org/rfc/rfc4120#section-1.2).
fn resolve_server<P: PrincipalProvider>(
    ctx: &RequestContext<'_, P>,
    server: &Principal,
    lookup_flags: LookupFlags,
) -> Result<PrincipalEntry, KdcError> {
    if let Some(entry) = ctx.lookup(server, lookup_flags | LookupFlags::SERVER)? {
        return Ok(entry);
    }

    let config = ctx.config;
    let unknown = || KdcError::ServerPrincipalUnknown(server.to_string());

    let Some(target_realm) = server.tgs_realm() else {
        return Err(unknown());
    };
    if target_realm == config.realm || server.realm != config.realm {
        return Err(unknown());
    }

    // The next hop is the first configured intermediate realm we share a key with.
    let hops = config.capath(&config.realm, target_realm).unwrap_or_default();
    for hop in hops.iter().take(config.max_referral_hops) {
        let referral = Principal::krbtgt(&config.realm, hop);

        if let Some(entry) = ctx.lookup(&referral, LookupFlags::SERVER | LookupFlags::KRBTGT)? {
            info!(
                target: "kdc_core::audit",
                requested = %server,
                referral = %entry.principal,
                "cross-realm referral"
            );

            return Ok(entry);
        }
    }

    Err(unknown())
}

/// Decrypts the second ticket of a user-to-user request.
///
/// RFC: [ENC-TKT-IN-SKEY](https://www.rfc-editor.org/rfc/rfc4120#section-2.9.2).
fn decrypt_second_ticket<P: PrincipalProvider>(
    ctx: &RequestContext<'_, P>,
    request: &KdcRequest,
    server: &PrincipalEntry,
) -> Result<EncTicketBody, KdcError> {
    let ticket = request
        .additional_tickets
        .first()
        .ok_or(KdcError::BadOption("ENC-TKT-IN-SKEY requires an additional ticket"))?;

    let krbtgt = Principal::from_asn1(&ticket.0.sname.0, ticket.0.realm.0.0.as_utf8())?;
    if krbtgt.tgs_realm() != Some(ctx.config.realm.as_str()) {
        return Err(KdcError::NotUs(format!("additional ticket is issued for {krbtgt}")));
    }

    let krbtgt_entry = ctx
        .lookup(&krbtgt, LookupFlags::SERVER | LookupFlags::KRBTGT)?
        .ok_or_else(|| KdcError::ServerPrincipalUnknown(krbtgt.to_string()))?;

    let enc_part = &ticket.0.enc_part.0;
    let etype = EncryptionType::from_asn1(&enc_part.etype.0).ok_or(KdcError::NoSuitableEtype)?;
    let key = krbtgt_entry
        .find_key(etype, encrypted_data_kvno(enc_part))
        .ok_or(KdcError::BadIntegrity("no key to decrypt the additional ticket"))?;

    let second_ticket = decrypt_ticket(ticket, key.into())?;

    if second_ticket.end_time <= ctx.now {
        return Err(KdcError::TicketExpired("additional ticket has expired"));
    }

    if second_ticket.client != server.principal {
        return Err(KdcError::ServerNoMatch("additional ticket does not belong to the requested server"));
    }

    Ok(second_ticket)
}

/// Authorization data of the new ticket: the TGT's followed by the request's.
fn merge_authorization_data(
    tgt: Option<&AuthorizationData>,
    requested: Option<&AuthorizationData>,
) -> Option<AuthorizationData> {
    let elements: Vec<_> = tgt
        .into_iter()
        .chain(requested)
        .flat_map(|data| data.0.iter().cloned())
        .collect();

    (!elements.is_empty()).then(|| Asn1SequenceOf::from(elements))
}

/// Performs TGS exchange according to the RFC 4120.
///
/// RFC: [The Ticket-Granting Service (TGS) Exchange](https://www.rfc-editor.org/rfc/rfc4120#section-3.3).
#[instrument(level = "debug", skip_all, fields(realm = %ctx.config.realm))]
pub fn handle_tgs_req<P: PrincipalProvider>(tgs_req: &TgsReq, ctx: &RequestContext<'_, P>) -> Result<TgsRep, KdcError> {
    let config = ctx.config;
    let now = ctx.now;

    let request = KdcRequest::parse(&tgs_req.0, TGS_REQ_MSG_TYPE)?;

    if request.realm != config.realm {
        return Err(KdcError::WrongRealm(request.realm));
    }

    let options = request.options;
    let renew = options.contains(KdcOptions::RENEW);
    let validate = options.contains(KdcOptions::VALIDATE);
    let user_to_user = options.contains(KdcOptions::ENC_TKT_IN_SKEY);

    if renew && validate {
        return Err(KdcError::BadOption("RENEW and VALIDATE are mutually exclusive"));
    }

    let server_name = request
        .server
        .as_ref()
        .ok_or(KdcError::MalformedRequest("TGS request without server name"))?;

    let authentication = verify_tgs_request(&request, ctx)?;
    let TgsAuthentication {
        tgt, tgt_server, ..
    } = &authentication;

    if (renew || validate) && *server_name != *tgt_server {
        return Err(KdcError::ServerNoMatch("only the ticket's own server may renew or validate it"));
    }

    if validate && !tgt.flags.contains(TicketFlags::INVALID) {
        return Err(KdcError::BadOption("ticket is not invalid"));
    }

    let mut lookup_flags = LookupFlags::empty();
    if options.contains(KdcOptions::CANONICALIZE) {
        lookup_flags |= LookupFlags::CANONICALIZE;
    }

    // Only our own KDC speaks for our clients: a partner realm may only vouch for its own principals.
    if authentication.issuing_realm() != config.realm && tgt.client.realm == config.realm {
        return Err(KdcError::Policy(format!(
            "{} issued a TGT for local client {}",
            authentication.issuing_realm(),
            tgt.client
        )));
    }

    let server = resolve_server(ctx, server_name, lookup_flags)?;

    // Clients of other realms and anonymous clients have no local entry.
    let client = if tgt.client.realm == config.realm && !tgt.flags.contains(TicketFlags::ANONYMOUS) {
        Some(
            ctx.lookup(&tgt.client, LookupFlags::CLIENT)?
                .ok_or_else(|| KdcError::ClientPrincipalUnknown(tgt.client.to_string()))?,
        )
    } else {
        None
    };

    let exchange = if user_to_user {
        ExchangeKind::UserToUser
    } else {
        ExchangeKind::Tgs
    };
    if let Some(client) = &client {
        check_client(client, &server, now)?;
        check_hardware_auth(client, &server, tgt.flags.contains(TicketFlags::HW_AUTHENT))?;
    }
    check_server(&server, exchange, now)?;

    let second_ticket = if user_to_user {
        Some(decrypt_second_ticket(ctx, &request, &server)?)
    } else {
        None
    };

    let session_etype = select_session_etype(
        &request.etypes,
        server.principal.is_krbtgt().then_some(&server),
    )?;
    let server_key = match &second_ticket {
        Some(second_ticket) => KeyRef::session(second_ticket.session_etype, &second_ticket.session_key),
        None => select_server_key(&server, &request.etypes)?.into(),
    };

    // Forwarded and proxy tickets carry the addresses of the request, others those of the TGT.
    let addresses = if options.intersects(KdcOptions::FORWARDED | KdcOptions::PROXY) {
        request.addresses.clone()
    } else {
        tgt.addresses.clone()
    };

    let builder = TicketBuilder::new(tgt.client.clone())
        .with_addresses(addresses)
        .with_authorization_data(merge_authorization_data(
            tgt.authorization_data.as_ref(),
            authentication.authorization_data.as_ref(),
        ));

    let builder = if renew {
        builder
            .flags(FlagRequest::for_reissue(tgt.flags))?
            .renewed_times(tgt, now)?
    } else if validate {
        builder
            .flags(FlagRequest::for_reissue(tgt.flags))?
            .validated_times(tgt, now)?
    } else {
        builder
            .flags(FlagRequest::for_tgs(options, tgt.flags, client.as_ref(), &server))?
            .times(
                TimeRequest {
                    from: request.from,
                    till: request.till,
                    rtime: request.rtime,
                    renewable_ok: options.contains(KdcOptions::RENEWABLE_OK),
                },
                TimeLimits::new(config, client.as_ref(), &server, now, tgt.auth_time).bounded_by(tgt),
            )?
    };

    let exempt = !config.enforce_transited_policy
        || (options.contains(KdcOptions::DISABLE_TRANSITED_CHECK) && config.allow_disable_transited_check);

    let ticket = builder
        .transited(TransitedInput {
            config,
            previous: tgt.transited.clone(),
            issuing_realm: authentication.issuing_realm(),
            server_realm: &server.principal.realm,
            exempt,
            check_required: server.flags.contains(PrincipalFlags::REQUIRE_TRANSITED_CHECK),
            reissued_checked: (renew || validate).then(|| tgt.flags.contains(TicketFlags::TRANSITED_POLICY_CHECKED)),
        })?
        .session_key(session_etype)?
        .build();

    let (reply_kind, reply_key) = authentication.reply_key();

    let kdc_rep = encode_reply(
        reply_kind,
        ReplyParts {
            ticket: &ticket,
            server: &server.principal,
            server_key,
            body: RepBody::new(&ticket, &server.principal, request.nonce.clone()),
            reply_key,
            padata: Vec::new(),
        },
    )?;

    info!(
        target: "kdc_core::audit",
        client = %ticket.client,
        server = %server.principal,
        renew,
        validate,
        user_to_user,
        transited = %ticket.transited,
        flags = ?ticket.flags,
        end_time = %ticket.end_time,
        "TGS request granted"
    );

    Ok(TgsRep::from(kdc_rep))
}
