//! API sessions and the service sessions opened through them.

use crate::{denorm, eventual, fields, kind::EntityType, Index};
use overlay_policy_core::{Error, PolicyType, Result};
use overlay_policy_store::{Record, State, Tx};
use serde::Deserialize;
use tracing::{debug, info};

pub const API_SESSIONS: &str = "apiSessions";
pub const SESSIONS: &str = "sessions";

/// The eventual event written when an API session is deleted. Its payload is the session id.
pub const API_SESSION_DELETED: &str = "apiSession.deleted";

const IDENTITY_API_SESSIONS: &str = "identities/apiSessions";
const API_SESSION_SESSIONS: &str = "apiSessions/sessions";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSession {
    pub id: String,
    pub identity_id: String,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub api_session_id: String,
    pub service_id: String,
    #[serde(rename = "type")]
    pub session_type: PolicyType,
}

// === impl ApiSession ===

impl ApiSession {
    pub fn load(state: &State, id: &str) -> Result<Self> {
        let record = state
            .get(API_SESSIONS, id)
            .ok_or_else(|| Error::not_found("apiSession", id))?;
        Ok(Self {
            id: id.to_string(),
            identity_id: record.str(fields::IDENTITY_ID).unwrap_or_default().to_string(),
            token: record.str(fields::TOKEN).unwrap_or_default().to_string(),
        })
    }
}

// === impl Session ===

impl Session {
    pub fn load(state: &State, id: &str) -> Result<Self> {
        let record = state
            .get(SESSIONS, id)
            .ok_or_else(|| Error::not_found("session", id))?;
        let session_type = record
            .int(fields::POLICY_TYPE)
            .and_then(PolicyType::from_id)
            .ok_or_else(|| Error::Invariant(format!("session {id} has an invalid stored type")))?;
        Ok(Self {
            id: id.to_string(),
            api_session_id: record
                .str(fields::API_SESSION_ID)
                .unwrap_or_default()
                .to_string(),
            service_id: record.str(fields::SERVICE_ID).unwrap_or_default().to_string(),
            session_type,
        })
    }
}

// === impl Index ===

impl Index {
    pub fn create_api_session(&self, tx: &mut Tx<'_>, session: ApiSession) -> Result<()> {
        if !tx.contains(EntityType::Identity.bucket(), &session.identity_id) {
            return Err(Error::validation(
                fields::IDENTITY_ID,
                "no identities found with the given ids",
                [&session.identity_id],
            ));
        }
        if session.token.is_empty() {
            return Err(Error::validation(fields::TOKEN, "token is required", [""]));
        }

        let record = Record::default()
            .with(fields::IDENTITY_ID, session.identity_id.as_str())
            .with(fields::TOKEN, session.token.as_str());
        tx.create(API_SESSIONS, &session.id, record)?;
        tx.add_link(IDENTITY_API_SESSIONS, &session.identity_id, &session.id);
        debug!(id = %session.id, identity = %session.identity_id, "Created API session");
        Ok(())
    }

    /// Deletes an API session. Its sessions are removed later by the eventual event worker.
    pub fn delete_api_session(&self, tx: &mut Tx<'_>, id: &str) -> Result<()> {
        delete_api_session(tx, id)
    }

    /// Opens a session on a service, which requires access of the session's type.
    pub fn create_session(&self, tx: &mut Tx<'_>, session: Session) -> Result<()> {
        let api_session = match ApiSession::load(tx, &session.api_session_id) {
            Ok(api_session) => api_session,
            Err(e) if e.is_not_found() => {
                return Err(Error::validation(
                    fields::API_SESSION_ID,
                    "no apiSessions found with the given ids",
                    [&session.api_session_id],
                ))
            }
            Err(e) => return Err(e),
        };
        if !tx.contains(EntityType::Service.bucket(), &session.service_id) {
            return Err(Error::validation(
                fields::SERVICE_ID,
                "no services found with the given ids",
                [&session.service_id],
            ));
        }

        let access = match session.session_type {
            PolicyType::Dial => denorm::IDENTITY_DIAL_SERVICES,
            PolicyType::Bind => denorm::IDENTITY_BIND_SERVICES,
        };
        if access.link_count(tx, &api_session.identity_id, &session.service_id) <= 0 {
            return Err(Error::validation(
                fields::SERVICE_ID,
                format!(
                    "identity {} does not have {} access to the service",
                    api_session.identity_id, session.session_type
                ),
                [&session.service_id],
            ));
        }

        let record = Record::default()
            .with(fields::API_SESSION_ID, session.api_session_id.as_str())
            .with(fields::SERVICE_ID, session.service_id.as_str())
            .with(fields::POLICY_TYPE, session.session_type.id());
        tx.create(SESSIONS, &session.id, record)?;
        tx.add_link(API_SESSION_SESSIONS, &session.api_session_id, &session.id);
        debug!(
            id = %session.id,
            api_session = %session.api_session_id,
            service = %session.service_id,
            "Created session"
        );
        Ok(())
    }

    pub fn delete_session(&self, tx: &mut Tx<'_>, id: &str) -> Result<()> {
        let session = Session::load(tx, id)?;
        tx.remove_link(API_SESSION_SESSIONS, &session.api_session_id, id);
        tx.delete(SESSIONS, id)?;
        Ok(())
    }

    /// Deletes every session opened through an API session. Running it again is a no-op.
    pub fn delete_sessions_for_api_session(
        &self,
        tx: &mut Tx<'_>,
        api_session_id: &str,
    ) -> Result<usize> {
        let ids = tx.clear_links(API_SESSION_SESSIONS, api_session_id);
        let mut deleted = 0;
        for id in ids.iter() {
            if tx.contains(SESSIONS, id) {
                tx.delete(SESSIONS, id)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(api_session = %api_session_id, deleted, "Deleted sessions");
        }
        Ok(deleted)
    }
}

pub(crate) fn delete_api_session(tx: &mut Tx<'_>, id: &str) -> Result<()> {
    let session = ApiSession::load(tx, id)?;
    tx.remove_link(IDENTITY_API_SESSIONS, &session.identity_id, id);
    tx.delete(API_SESSIONS, id)?;
    eventual::add_event(tx, API_SESSION_DELETED, id)?;
    debug!(%id, "Deleted API session");
    Ok(())
}

pub(crate) fn delete_identity_api_sessions(tx: &mut Tx<'_>, identity_id: &str) -> Result<()> {
    for id in tx.clear_links(IDENTITY_API_SESSIONS, identity_id) {
        if tx.contains(API_SESSIONS, &id) {
            delete_api_session(tx, &id)?;
        }
    }
    Ok(())
}
