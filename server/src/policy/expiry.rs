use chrono::Utc;

use crate::locator::FileLocator;

#[derive(Debug, thiserror::Error)]
#[error("reference expired")]
pub struct ReferenceExpired;

/// Link-expiry check: disabled when `link_expiry_seconds == 0`. Otherwise
/// the locator's message timestamp plus the configured duration must still
/// be in the future.
pub fn check_expiry(locator: &FileLocator, link_expiry_seconds: u64) -> Result<(), ReferenceExpired> {
    if link_expiry_seconds == 0 {
        return Ok(());
    }

    let expires_at = locator.message_timestamp + link_expiry_seconds as i64;
    if expires_at > Utc::now().timestamp() {
        Ok(())
    } else {
        Err(ReferenceExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator_at(message_timestamp: i64) -> FileLocator {
        FileLocator {
            data_center_id: 1,
            volume_id: 1,
            local_id: 1,
            access_hash: 1,
            size: 10,
            mime: "application/octet-stream".to_string(),
            filename: "f.bin".to_string(),
            message_timestamp,
        }
    }

    #[test]
    fn disabled_when_zero() {
        assert!(check_expiry(&locator_at(0), 0).is_ok());
    }

    #[test]
    fn fresh_locator_passes() {
        let now = Utc::now().timestamp();
        assert!(check_expiry(&locator_at(now), 3600).is_ok());
    }

    #[test]
    fn old_locator_fails() {
        let now = Utc::now().timestamp();
        assert!(check_expiry(&locator_at(now - 7200), 3600).is_err());
    }
}
