//! Join heuristics for self-paced sessions.
//!
//! These checks deter casual repeat entries; every signal they use can be
//! spoofed by a determined client, so they are not a security boundary.

use std::{sync::Arc, time::SystemTime};

use tracing::warn;

use crate::{
    config::AppConfig,
    dao::{
        models::{JoinRecordEntity, SessionEntity},
        session_store::SessionStore,
    },
    error::{JoinRejection, ServiceError},
    services::retry::with_retry,
    state::context::JoinContext,
};

/// Evaluate the heuristics against prior joins.
///
/// `session_records` are the joins of the session being entered;
/// `address_records` are every join made from the caller's address. Checks
/// run in order: disposable email domain, same address in this session,
/// same device in this session, same address on this quiz within the window.
pub fn evaluate(
    config: &AppConfig,
    session: &SessionEntity,
    ctx: &JoinContext,
    email_domain: Option<&str>,
    session_records: &[JoinRecordEntity],
    address_records: &[JoinRecordEntity],
    now: SystemTime,
) -> Result<(), JoinRejection> {
    if email_domain.is_some_and(|domain| config.joins.is_disposable(domain)) {
        return Err(JoinRejection::DisposableEmail);
    }

    if let Some(address) = ctx.address.as_deref() {
        if session_records
            .iter()
            .any(|record| record.address.as_deref() == Some(address))
        {
            return Err(JoinRejection::DuplicateNetwork);
        }
    }

    if let Some(fingerprint) = ctx.fingerprint.as_deref().filter(|f| !f.is_empty()) {
        if session_records
            .iter()
            .any(|record| record.fingerprint.as_deref() == Some(fingerprint))
        {
            return Err(JoinRejection::DuplicateDevice);
        }
    }

    let window = config.joins.network_rejoin_window();
    if ctx.address.is_some()
        && address_records.iter().any(|record| {
            record.quiz_id == session.quiz_id
                && record.session_id != session.id
                && now
                    .duration_since(record.joined_at)
                    .map(|elapsed| elapsed < window)
                    .unwrap_or(true)
        })
    {
        return Err(JoinRejection::RecentNetworkJoin);
    }

    Ok(())
}

/// Load prior joins and run [`evaluate`], logging any rejection.
pub async fn check(
    store: &Arc<dyn SessionStore>,
    config: &AppConfig,
    session: &SessionEntity,
    ctx: &JoinContext,
    email_domain: Option<&str>,
) -> Result<(), ServiceError> {
    let session_id = session.id;
    let session_records = with_retry(&config.retry, "list_join_records", || {
        store.list_join_records(session_id)
    })
    .await?;

    let address_records = match ctx.address.clone() {
        Some(address) => {
            with_retry(&config.retry, "list_join_records_by_address", || {
                store.list_join_records_by_address(address.clone())
            })
            .await?
        }
        None => Vec::new(),
    };

    evaluate(
        config,
        session,
        ctx,
        email_domain,
        &session_records,
        &address_records,
        SystemTime::now(),
    )
    .map_err(|reason| {
        warn!(
            session_id = %session.id,
            address = ctx.address.as_deref().unwrap_or("-"),
            reason = ?reason,
            "join rejected by abuse guard"
        );
        ServiceError::JoinRejected(reason)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::dao::models::{QuestionCursor, SessionMode, SessionStatus};

    fn session() -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            join_code: "654321".into(),
            mode: SessionMode::SelfPaced,
            status: SessionStatus::Active,
            cursor: QuestionCursor::NotStarted,
            question_deadline: None,
            accepting_joins: true,
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
            started_at: None,
            ended_at: None,
        }
    }

    fn record(
        session_id: Uuid,
        quiz_id: Uuid,
        address: &str,
        fingerprint: Option<&str>,
        joined_at: SystemTime,
    ) -> JoinRecordEntity {
        JoinRecordEntity {
            id: Uuid::new_v4(),
            session_id,
            quiz_id,
            player_id: Uuid::new_v4(),
            address: Some(address.into()),
            fingerprint: fingerprint.map(str::to_owned),
            email_domain: None,
            joined_at,
        }
    }

    fn ctx(address: &str, fingerprint: Option<&str>) -> JoinContext {
        JoinContext {
            address: Some(address.into()),
            fingerprint: fingerprint.map(str::to_owned),
        }
    }

    #[test]
    fn first_join_is_admitted() {
        let config = AppConfig::default();
        let session = session();
        let now = SystemTime::now();
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", Some("fp")), Some("example.com"), &[], &[], now),
            Ok(())
        );
    }

    #[test]
    fn disposable_domain_is_checked_first() {
        let config = AppConfig::default();
        let session = session();
        let now = SystemTime::now();
        let prior = [record(session.id, session.quiz_id, "10.0.0.1", None, now)];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", None), Some("Mailinator.com"), &prior, &prior, now),
            Err(JoinRejection::DisposableEmail)
        );
    }

    #[test]
    fn same_address_in_session_is_rejected() {
        let config = AppConfig::default();
        let session = session();
        let now = SystemTime::now();
        let prior = [record(session.id, session.quiz_id, "10.0.0.1", None, now)];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", None), None, &prior, &prior, now),
            Err(JoinRejection::DuplicateNetwork)
        );
    }

    #[test]
    fn same_fingerprint_in_session_is_rejected() {
        let config = AppConfig::default();
        let session = session();
        let now = SystemTime::now();
        let prior = [record(session.id, session.quiz_id, "10.0.0.2", Some("device-1"), now)];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", Some("device-1")), None, &prior, &[], now),
            Err(JoinRejection::DuplicateDevice)
        );
    }

    #[test]
    fn recent_join_to_same_quiz_elsewhere_is_rejected_within_window() {
        let config = AppConfig::default();
        let session = session();
        let now = SystemTime::now();
        let recent = [record(
            Uuid::new_v4(),
            session.quiz_id,
            "10.0.0.1",
            None,
            now - Duration::from_secs(600),
        )];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", None), None, &[], &recent, now),
            Err(JoinRejection::RecentNetworkJoin)
        );

        let stale = [record(
            Uuid::new_v4(),
            session.quiz_id,
            "10.0.0.1",
            None,
            now - Duration::from_secs(7_200),
        )];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", None), None, &[], &stale, now),
            Ok(())
        );

        let other_quiz = [record(Uuid::new_v4(), Uuid::new_v4(), "10.0.0.1", None, now)];
        assert_eq!(
            evaluate(&config, &session, &ctx("10.0.0.1", None), None, &[], &other_quiz, now),
            Ok(())
        );
    }
}
