//! Principal-level admission checks.
//!
//! Everything here is a pure function of the database snapshots and the request time, and runs
//! before any cryptographic work is done for the request.

use time::OffsetDateTime;

use crate::ExchangeKind;
use crate::error::KdcError;
use crate::principal::{PrincipalEntry, PrincipalFlags};

/// Checks that `client` may obtain a ticket for `server` at `now`.
pub fn check_client(client: &PrincipalEntry, server: &PrincipalEntry, now: OffsetDateTime) -> Result<(), KdcError> {
    let name = || client.principal.to_string();

    if client.flags.contains(PrincipalFlags::LOCKED_OUT) {
        return Err(KdcError::ClientRevoked(name()));
    }

    if client.flags.contains(PrincipalFlags::INVALID) {
        return Err(KdcError::Policy(format!("client {} has the invalid flag set", name())));
    }

    if !client.flags.contains(PrincipalFlags::CLIENT) {
        return Err(KdcError::Policy(format!("{} is not allowed to be a client", name())));
    }

    if client.valid_start.is_some_and(|start| start > now) {
        return Err(KdcError::ClientNotYetValid(name()));
    }

    if client.valid_end.is_some_and(|end| end <= now) {
        return Err(KdcError::ClientExpired(name()));
    }

    // A client with an expired password may still reach the password-changing service.
    if client.pw_end.is_some_and(|pw_end| pw_end <= now) && !server.flags.contains(PrincipalFlags::CHANGE_PW) {
        return Err(KdcError::KeyExpired(name()));
    }

    Ok(())
}

/// Checks that tickets may be issued for `server` at `now`.
pub fn check_server(server: &PrincipalEntry, exchange: ExchangeKind, now: OffsetDateTime) -> Result<(), KdcError> {
    let name = || server.principal.to_string();

    if server.flags.contains(PrincipalFlags::LOCKED_OUT) {
        return Err(KdcError::Policy(format!("server {} is locked out", name())));
    }

    if server.flags.contains(PrincipalFlags::INVALID) {
        return Err(KdcError::Policy(format!("server {} has the invalid flag set", name())));
    }

    // User-to-user targets are ordinary users holding a TGT.
    if !server.flags.contains(PrincipalFlags::SERVER) && exchange != ExchangeKind::UserToUser {
        return Err(KdcError::Policy(format!("{} is not allowed to be a server", name())));
    }

    if server.flags.contains(PrincipalFlags::INITIAL) && exchange != ExchangeKind::As {
        return Err(KdcError::Policy(format!("{} accepts only initial tickets", name())));
    }

    if server.valid_start.is_some_and(|start| start > now) {
        return Err(KdcError::ServiceNotYetValid(name()));
    }

    if server.valid_end.is_some_and(|end| end <= now) {
        return Err(KdcError::ServiceExpired(name()));
    }

    if server.pw_end.is_some_and(|pw_end| pw_end <= now) {
        return Err(KdcError::KeyExpired(name()));
    }

    Ok(())
}

/// Runs both checks: client first, then server.
pub fn check(
    client: &PrincipalEntry,
    server: &PrincipalEntry,
    exchange: ExchangeKind,
    now: OffsetDateTime,
) -> Result<(), KdcError> {
    check_client(client, server, now)?;
    check_server(server, exchange, now)
}

/// Principals flagged with `REQUIRE_HWAUTH` accept only hardware-backed preauthentication.
pub fn check_hardware_auth(
    client: &PrincipalEntry,
    server: &PrincipalEntry,
    hw_authenticated: bool,
) -> Result<(), KdcError> {
    if hw_authenticated {
        return Ok(());
    }

    if client.flags.contains(PrincipalFlags::REQUIRE_HWAUTH) {
        return Err(KdcError::Policy(format!(
            "{} requires hardware preauthentication",
            client.principal
        )));
    }

    if server.flags.contains(PrincipalFlags::REQUIRE_HWAUTH) {
        return Err(KdcError::Policy(format!(
            "tickets for {} require hardware preauthentication",
            server.principal
        )));
    }

    Ok(())
}
