//! Protocol numbers used by the KDC that are not exported by `picky-krb`.

/// [Error Codes](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.9)
pub mod error_codes {
    pub const KDC_ERR_NAME_EXP: u32 = 1;
    pub const KDC_ERR_SERVICE_EXP: u32 = 2;
    pub const KDC_ERR_C_PRINCIPAL_UNKNOWN: u32 = 6;
    pub const KDC_ERR_S_PRINCIPAL_UNKNOWN: u32 = 7;
    pub const KDC_ERR_NULL_KEY: u32 = 9;
    pub const KDC_ERR_CANNOT_POSTDATE: u32 = 10;
    pub const KDC_ERR_NEVER_VALID: u32 = 11;
    pub const KDC_ERR_POLICY: u32 = 12;
    pub const KDC_ERR_BADOPTION: u32 = 13;
    pub const KDC_ERR_ETYPE_NOSUPP: u32 = 14;
    pub const KDC_ERR_SUMTYPE_NOSUPP: u32 = 15;
    pub const KDC_ERR_TRTYPE_NOSUPP: u32 = 17;
    pub const KDC_ERR_CLIENT_REVOKED: u32 = 18;
    pub const KDC_ERR_CLIENT_NOTYET: u32 = 21;
    pub const KDC_ERR_SERVICE_NOTYET: u32 = 22;
    pub const KDC_ERR_KEY_EXPIRED: u32 = 23;
    pub const KDC_ERR_PREAUTH_FAILED: u32 = 24;
    pub const KDC_ERR_PREAUTH_REQUIRED: u32 = 25;
    pub const KDC_ERR_SERVER_NOMATCH: u32 = 26;
    pub const KDC_ERR_PATH_NOT_ACCEPTED: u32 = 28;
    pub const KRB_AP_ERR_BAD_INTEGRITY: u32 = 31;
    pub const KRB_AP_ERR_TKT_EXPIRED: u32 = 32;
    pub const KRB_AP_ERR_TKT_NYV: u32 = 33;
    pub const KRB_AP_ERR_NOT_US: u32 = 35;
    pub const KRB_AP_ERR_BADMATCH: u32 = 36;
    pub const KRB_AP_ERR_SKEW: u32 = 37;
    pub const KRB_AP_ERR_BADADDR: u32 = 38;
    pub const KRB_AP_ERR_BADVERSION: u32 = 39;
    pub const KRB_AP_ERR_MSG_TYPE: u32 = 40;
    pub const KRB_AP_ERR_MODIFIED: u32 = 41;
    pub const KRB_AP_ERR_BADKEYVER: u32 = 44;
    pub const KRB_AP_ERR_INAPP_CKSUM: u32 = 50;
    pub const KRB_ERR_GENERIC: u32 = 60;
    pub const KDC_ERR_WRONG_REALM: u32 = 68;
}

/// [Key Usage Numbers](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.1)
pub mod key_usages {
    pub const PA_ENC_TIMESTAMP: i32 = 1;
    pub const TICKET: i32 = 2;
    pub const AS_REP_ENC_PART: i32 = 3;
    pub const TGS_REQ_AUTH_DATA_SESSION_KEY: i32 = 4;
    pub const TGS_REQ_AUTH_DATA_SUB_KEY: i32 = 5;
    pub const TGS_REQ_AUTHENTICATOR_CKSUM: i32 = 6;
    pub const TGS_REQ_AUTHENTICATOR: i32 = 7;
    pub const TGS_REP_ENC_PART_SESSION_KEY: i32 = 8;
    pub const TGS_REP_ENC_PART_SUB_KEY: i32 = 9;
}

/// [PreAuthentication Data Types](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.2)
pub mod pa_types {
    pub const PA_TGS_REQ: i64 = 1;
    pub const PA_ENC_TIMESTAMP: i64 = 2;
    pub const PA_ETYPE_INFO2: i64 = 19;
}

/// [Principal Names](https://www.rfc-editor.org/rfc/rfc4120#section-6.2)
pub mod name_types {
    pub const NT_PRINCIPAL: i64 = 1;
    pub const NT_SRV_INST: i64 = 2;
    pub const NT_SRV_HST: i64 = 3;
    pub const NT_ENTERPRISE: i64 = 10;
    /// [RFC 6111: Well-Known Kerberos Principal Names](https://www.rfc-editor.org/rfc/rfc6111)
    pub const NT_WELLKNOWN: i64 = 11;
}

/// [Address Types](https://www.rfc-editor.org/rfc/rfc4120#section-7.5.3)
pub mod address_types {
    pub const IP_V4: i64 = 2;
    pub const IP_V6: i64 = 24;
}

/// [Checksum Types](https://www.rfc-editor.org/rfc/rfc3961#section-8)
pub mod checksum_types {
    pub const RSA_MD5: i64 = 7;
    pub const HMAC_SHA1_DES3_KD: i64 = 12;
    pub const HMAC_SHA1_96_AES128: i64 = 15;
    pub const HMAC_SHA1_96_AES256: i64 = 16;
}

/// [LastReq](https://www.rfc-editor.org/rfc/rfc4120#section-5.4.2) `lr-type` values.
pub mod last_req_types {
    pub const NONE: i64 = 0;
    pub const PASSWORD_EXPIRATION: i64 = 6;
    pub const ACCOUNT_EXPIRATION: i64 = 7;
}

/// [Transited Realm Encoding](https://www.rfc-editor.org/rfc/rfc4120#section-3.3.3.2)
pub const DOMAIN_X500_COMPRESS: i64 = 1;

/// [RFC 6112: Anonymity Support](https://www.rfc-editor.org/rfc/rfc6112#section-3)
pub const WELLKNOWN_NAME: &str = "WELLKNOWN";
pub const ANONYMOUS_NAME: &str = "ANONYMOUS";
