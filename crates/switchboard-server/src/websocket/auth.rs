//! Session claims carried on the upgrade request.
//!
//! The relay does not validate tokens. A fronting proxy authenticates the
//! client and injects claim headers; [`ClaimHeaderResolver`] turns them into
//! a [`SessionInfo`].

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::errors::SessionError;

/// Header carrying the session token.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";
/// Header carrying the meeting id.
pub const MEETING_ID_HEADER: &str = "x-hasura-meetingid";
/// Header carrying the user id.
pub const USER_ID_HEADER: &str = "x-hasura-userid";
/// Header carrying the client-generated session UUID.
pub const CLIENT_SESSION_UUID_HEADER: &str = "x-client-session-uuid";
/// Header carrying the client flavour.
pub const CLIENT_TYPE_HEADER: &str = "x-client-type";
/// Header carrying the mobile flag.
pub const CLIENT_IS_MOBILE_HEADER: &str = "x-client-is-mobile";
/// Session variable naming the user who holds the cursor lock.
pub const CURSOR_LOCKED_USER_VARIABLE: &str = "x-hasura-cursorlockeduserid";

const SESSION_VARIABLE_PREFIX: &str = "x-hasura-";

/// Identity of one browser session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session token; the unit force-reconnect/disconnect act on.
    pub session_token: String,
    /// Meeting the user is in.
    pub meeting_id: String,
    /// User id.
    pub user_id: String,
    /// Client-generated session UUID.
    pub client_session_uuid: String,
    /// Client flavour.
    pub client_type: String,
    /// Mobile device flag.
    pub client_is_mobile: bool,
    /// Every `x-hasura-*` claim, lowercased names.
    pub session_variables: HashMap<String, String>,
}

impl SessionInfo {
    /// Look up a session variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.session_variables.get(name).map(String::as_str)
    }
}

/// Maps an upgrade request to a session.
pub trait SessionResolver: Send + Sync {
    /// Resolve the session or reject the upgrade.
    fn resolve(&self, headers: &HeaderMap) -> Result<SessionInfo, SessionError>;
}

/// Reads claims injected by the fronting proxy.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClaimHeaderResolver;

impl ClaimHeaderResolver {
    fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn required(headers: &HeaderMap, name: &'static str) -> Result<String, SessionError> {
        Self::header(headers, name)
            .map(str::to_owned)
            .ok_or(SessionError::MissingClaim(name))
    }
}

impl SessionResolver for ClaimHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> Result<SessionInfo, SessionError> {
        let session_token = Self::required(headers, SESSION_TOKEN_HEADER)?;
        let meeting_id = Self::required(headers, MEETING_ID_HEADER)?;
        let user_id = Self::required(headers, USER_ID_HEADER)?;

        let session_variables = headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(SESSION_VARIABLE_PREFIX))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_owned(), v.to_owned()))
            })
            .collect();

        Ok(SessionInfo {
            session_token,
            meeting_id,
            user_id,
            client_session_uuid: Self::header(headers, CLIENT_SESSION_UUID_HEADER)
                .unwrap_or_default()
                .to_owned(),
            client_type: Self::header(headers, CLIENT_TYPE_HEADER)
                .unwrap_or_default()
                .to_owned(),
            client_is_mobile: Self::header(headers, CLIENT_IS_MOBILE_HEADER)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            session_variables,
        })
    }
}
