//! TTL helpers

use chrono::{DateTime, Utc};

/// True when `created_at + ttl` lies at or before `at`
pub fn is_expired(created_at: DateTime<Utc>, ttl: std::time::Duration, at: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => created_at
            .checked_add_signed(ttl)
            .map_or(false, |expires_at| expires_at <= at),
        // A TTL too large for chrono never expires
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_expired_boundaries() {
        let created = Utc::now();
        let ttl = Duration::from_secs(60);

        assert!(!is_expired(created, ttl, created));
        assert!(!is_expired(created, ttl, created + chrono::Duration::seconds(59)));
        assert!(is_expired(created, ttl, created + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_is_expired_huge_ttl_never_expires() {
        let created = Utc::now();
        assert!(!is_expired(created, Duration::from_secs(u64::MAX), created));
    }
}
