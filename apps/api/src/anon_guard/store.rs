use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::anon_guard::{
    sign_token, verify_cookie_value, ClientInfo, GuardOutcome, GuardPolicy, SessionWindow,
    WindowUpdate, COOKIE_MAX_AGE_DAYS, COOKIE_NAME,
};
use crate::errors::AppError;
use crate::models::anonymous_session::AnonymousSessionRow;

/// Result of running the guard for one request.
pub struct AnonymousCheck {
    pub session: AnonymousSessionRow,
    pub outcome: GuardOutcome,
    /// Jar carrying the (re)issued session cookie; must be returned with the response.
    pub jar: CookieJar,
}

/// Locates (or lazily creates) the caller's session and evaluates the quota.
///
/// The session row is locked while it is checked and saved, so a concurrent
/// `reserve_generation` either lands before the read or waits for the commit.
pub async fn check_anonymous(
    pool: &PgPool,
    jar: CookieJar,
    headers: &HeaderMap,
    secret: &str,
    policy: &GuardPolicy,
    now: DateTime<Utc>,
) -> Result<AnonymousCheck, AppError> {
    let client = ClientInfo::from_headers(headers);
    let session_id = match locate_session(pool, &jar, &client, secret, policy, now).await? {
        Some(session) => session.id,
        None => create_session(pool, &client, now).await?.id,
    };

    let mut tx = pool.begin().await?;
    let locked = sqlx::query_as::<_, AnonymousSessionRow>(
        "SELECT * FROM anonymous_sessions WHERE id = $1 FOR UPDATE",
    )
    .bind(session_id)
    .fetch_one(&mut *tx)
    .await?;

    let read = SessionWindow::from_row(&locked);
    let mut window = read.clone();
    let outcome = window.check(now, policy);
    let session = save_window(&mut *tx, session_id, window.update_since(&read)).await?;
    tx.commit().await?;

    if let Some(until) = outcome.blocked_until {
        warn!(session_id = %session.id, ip = %client.ip, %until, "anonymous session blocked");
    }

    let jar = jar.add(session_cookie(&session.token, secret));
    Ok(AnonymousCheck {
        session,
        outcome,
        jar,
    })
}

/// Reports the remaining anonymous quota without creating a session or counting an attempt.
pub async fn peek_anonymous(
    pool: &PgPool,
    jar: &CookieJar,
    headers: &HeaderMap,
    secret: &str,
    policy: &GuardPolicy,
    now: DateTime<Utc>,
) -> Result<GuardOutcome, AppError> {
    let client = ClientInfo::from_headers(headers);
    let window = match locate_session(pool, jar, &client, secret, policy, now).await? {
        Some(session) => SessionWindow::from_row(&session),
        None => SessionWindow::fresh(now),
    };
    Ok(window.peek(now, policy))
}

/// Atomically claims one generation slot. Returns false if the quota was used up concurrently.
pub async fn reserve_generation(
    pool: &PgPool,
    session_id: Uuid,
    policy: &GuardPolicy,
) -> Result<bool, AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE anonymous_sessions
        SET generation_count = generation_count + 1, updated_at = now()
        WHERE id = $1 AND generation_count < $2
        "#,
    )
    .bind(session_id)
    .bind(policy.max_generations)
    .execute(pool)
    .await?;
    Ok(updated.rows_affected() == 1)
}

/// Gives back a slot claimed by `reserve_generation` when generation fails.
pub async fn release_generation(pool: &PgPool, session_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE anonymous_sessions
        SET generation_count = GREATEST(generation_count - 1, 0), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn locate_session(
    pool: &PgPool,
    jar: &CookieJar,
    client: &ClientInfo,
    secret: &str,
    policy: &GuardPolicy,
    now: DateTime<Utc>,
) -> Result<Option<AnonymousSessionRow>, AppError> {
    let token = jar
        .get(COOKIE_NAME)
        .and_then(|c| verify_cookie_value(c.value(), secret));

    if let Some(token) = token {
        let by_token = sqlx::query_as::<_, AnonymousSessionRow>(
            "SELECT * FROM anonymous_sessions WHERE token = $1",
        )
        .bind(&token)
        .fetch_optional(pool)
        .await?;
        if by_token.is_some() {
            return Ok(by_token);
        }
    }

    // Secondary signal: same network identity inside the current window (or still blocked).
    let by_fingerprint = sqlx::query_as::<_, AnonymousSessionRow>(
        r#"
        SELECT * FROM anonymous_sessions
        WHERE fingerprint = $1
          AND (window_started_at > $2 OR blocked_until > $3)
        ORDER BY window_started_at DESC
        LIMIT 1
        "#,
    )
    .bind(client.fingerprint())
    .bind(now - policy.window)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    if let Some(session) = &by_fingerprint {
        info!(session_id = %session.id, "anonymous session re-bound by fingerprint");
    }
    Ok(by_fingerprint)
}

async fn create_session(
    pool: &PgPool,
    client: &ClientInfo,
    now: DateTime<Utc>,
) -> Result<AnonymousSessionRow, AppError> {
    let token = Uuid::new_v4().simple().to_string();
    let session = sqlx::query_as::<_, AnonymousSessionRow>(
        r#"
        INSERT INTO anonymous_sessions
            (token, fingerprint, ip_address, user_agent, window_started_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(&token)
    .bind(client.fingerprint())
    .bind(&client.ip)
    .bind(&client.user_agent)
    .bind(now)
    .fetch_one(pool)
    .await?;

    info!(session_id = %session.id, "created anonymous session");
    Ok(session)
}

async fn save_window(
    conn: &mut PgConnection,
    session_id: Uuid,
    update: WindowUpdate,
) -> Result<AnonymousSessionRow, AppError> {
    Ok(sqlx::query_as::<_, AnonymousSessionRow>(
        r#"
        UPDATE anonymous_sessions
        SET generation_count = CASE WHEN $2 THEN 0 ELSE generation_count END,
            attempt_count = $3, window_started_at = $4,
            blocked_until = $5, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(session_id)
    .bind(update.reset_generations)
    .bind(update.attempt_count)
    .bind(update.window_started_at)
    .bind(update.blocked_until)
    .fetch_one(conn)
    .await?)
}

fn session_cookie(token: &str, secret: &str) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, sign_token(token, secret)))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(cookie::time::Duration::days(COOKIE_MAX_AGE_DAYS))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok", "secret");
        assert_eq!(cookie.name(), COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            verify_cookie_value(cookie.value(), "secret").as_deref(),
            Some("tok")
        );
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    async fn test_interleaved_checks_never_exceed_the_quota() {
        use axum::http::HeaderValue;

        let pool = crate::db::test_pool().await;
        let policy = GuardPolicy::default();
        let mut headers = HeaderMap::new();
        let agent = format!("guard-test/{}", Uuid::new_v4());
        headers.insert("user-agent", HeaderValue::from_str(&agent).unwrap());
        let now = Utc::now();

        let a = check_anonymous(&pool, CookieJar::new(), &headers, "secret", &policy, now)
            .await
            .unwrap();
        let b = check_anonymous(&pool, CookieJar::new(), &headers, "secret", &policy, now)
            .await
            .unwrap();
        assert!(a.outcome.allowed && b.outcome.allowed);
        assert_eq!(a.session.id, b.session.id);

        assert!(reserve_generation(&pool, a.session.id, &policy).await.unwrap());
        let c = check_anonymous(&pool, CookieJar::new(), &headers, "secret", &policy, now)
            .await
            .unwrap();
        assert_eq!(c.outcome.remaining, 1);
        assert!(reserve_generation(&pool, b.session.id, &policy).await.unwrap());

        let mut granted = 2;
        for _ in 0..3 {
            let next = check_anonymous(&pool, CookieJar::new(), &headers, "secret", &policy, now)
                .await
                .unwrap();
            if next.outcome.allowed && reserve_generation(&pool, next.session.id, &policy).await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, policy.max_generations);
    }
}
