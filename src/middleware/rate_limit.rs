use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::AppError;

/// Check rate limit for a given key
/// Returns (allowed, remaining, reset_time_seconds)
pub async fn check_rate_limit(
    redis_conn: &mut ConnectionManager,
    key: &str,
    max_requests: u64,
    window_seconds: u64,
) -> Result<(bool, u64, u64), redis::RedisError> {
    let cache_key = format!("ratelimit:{}", key);

    let current: Option<u64> = redis_conn.get(&cache_key).await?;

    if current.unwrap_or(0) >= max_requests {
        let ttl: i64 = redis_conn.ttl(&cache_key).await?;
        return Ok((false, 0, ttl.max(0) as u64));
    }

    let new_count: u64 = redis_conn.incr(&cache_key, 1).await?;

    // Set expiry on first request of the window
    if new_count == 1 {
        let _: () = redis_conn.expire(&cache_key, window_seconds as i64).await?;
    }

    let ttl: i64 = redis_conn.ttl(&cache_key).await?;
    let remaining = max_requests.saturating_sub(new_count);

    Ok((true, remaining, ttl.max(0) as u64))
}

/// Counter key for one action by one user.
pub fn rate_limit_key(action: &str, user_id: &str) -> String {
    format!("{}:user:{}", action, user_id)
}

/// Refuses the request once the window's budget is spent. Without Redis,
/// or when Redis is unreachable, requests pass.
pub async fn enforce_rate_limit(
    redis: Option<&ConnectionManager>,
    key: &str,
    max_requests: u64,
    window_seconds: u64,
) -> Result<(), AppError> {
    let Some(redis) = redis else {
        return Ok(());
    };
    let mut conn = redis.clone();

    match check_rate_limit(&mut conn, key, max_requests, window_seconds).await {
        Ok((true, remaining, _)) => {
            tracing::debug!("Rate limit {}: {} remaining", key, remaining);
            Ok(())
        }
        Ok((false, _, retry_after)) => {
            tracing::warn!("Rate limit exceeded for {}", key);
            Err(AppError::RateLimited { retry_after })
        }
        Err(e) => {
            tracing::warn!("Rate limit check failed for {}: {}", key, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_action_and_user() {
        assert_eq!(rate_limit_key("invite", "u1"), "invite:user:u1");
        assert_ne!(rate_limit_key("invite", "u1"), rate_limit_key("accept", "u1"));
    }

    #[tokio::test]
    async fn no_redis_means_no_limit() {
        for _ in 0..5 {
            assert!(enforce_rate_limit(None, "invite:user:u1", 1, 60).await.is_ok());
        }
    }
}
