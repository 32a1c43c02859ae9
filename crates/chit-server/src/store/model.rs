use std::fmt;

use chrono::{DateTime, Duration, Utc};
use zeroize::ZeroizeOnDrop;

/// One issued, not-yet-redeemed secret.
///
/// Fields are private so a record cannot change after `new`. The plaintext is
/// wiped when the record is dropped, whether it was redeemed or swept.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecretRecord {
    request_id: i32,
    plaintext: String,
    /// bcrypt hash of `plaintext`, computed at issue time.
    hash: String,
    #[zeroize(skip)]
    issued_at: DateTime<Utc>,
}

impl SecretRecord {
    pub fn new(request_id: i32, plaintext: String, hash: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            plaintext,
            hash,
            issued_at,
        }
    }

    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// True once the record is strictly older than `retention` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        now.checked_sub_signed(retention)
            .is_some_and(|cutoff| self.issued_at < cutoff)
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("request_id", &self.request_id)
            .field("plaintext", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Outcome of a redeem that found a record for the requested id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The submitted hash matches the issued secret.
    Verified,
    /// A record existed but the submitted hash does not match it.
    Mismatch,
}

impl Verification {
    pub fn is_verified(self) -> bool {
        matches!(self, Verification::Verified)
    }
}

/// Which side of the exchange a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Client,
    Server,
}

/// Redeem failures that occur before or instead of a verification result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    /// No outstanding secrets at all.
    #[error("no outstanding secrets")]
    EmptyStore,
    /// Secrets exist, but none for the requested id.
    #[error("no outstanding secret for request id")]
    NotFound,
    /// The submitted value is not a well-formed hash.
    #[error("malformed hash: {0}")]
    MalformedInput(String),
}

impl RedeemError {
    pub fn severity(&self) -> Severity {
        match self {
            RedeemError::NotFound => Severity::Client,
            RedeemError::EmptyStore | RedeemError::MalformedInput(_) => Severity::Server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(issued_at: DateTime<Utc>) -> SecretRecord {
        SecretRecord::new(7, "abcdefgh".into(), "$2b$10$x".into(), issued_at)
    }

    #[test]
    fn expiry_is_strictly_after_window() {
        let t0 = Utc::now();
        let record = record_at(t0);
        let window = Duration::seconds(900);
        assert!(!record.is_expired(t0, window));
        assert!(!record.is_expired(t0 + window, window));
        assert!(record.is_expired(t0 + window + Duration::milliseconds(1), window));
    }

    #[test]
    fn debug_redacts_plaintext() {
        let record = record_at(Utc::now());
        let shown = format!("{record:?}");
        assert!(!shown.contains("abcdefgh"));
        assert!(shown.contains("request_id: 7"));
    }

    #[test]
    fn severities() {
        assert_eq!(RedeemError::NotFound.severity(), Severity::Client);
        assert_eq!(RedeemError::EmptyStore.severity(), Severity::Server);
        assert_eq!(
            RedeemError::MalformedInput("bad".into()).severity(),
            Severity::Server
        );
    }
}
