//! Conditional-GET support for cached artifacts.
//!
//! Validators are derived from what is on disk: the ETag is a SHA-256 digest
//! of the entry bytes (recomputed on every read, never stored) and
//! Last-Modified is the file's modification time as an HTTP date.

use sha2::{Digest, Sha256};
use std::time::SystemTime;
use time::macros::format_description;
use time::OffsetDateTime;

/// Outcome of comparing a request's conditional headers with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The client copy matches; answer 304 with no body.
    Fresh,
    Stale,
}

/// Response validators for one cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    /// Quoted hex digest, e.g. `"9f86d0..."`
    pub etag: String,
    /// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
    pub last_modified: String,
}

impl Validators {
    pub fn compute(entry: &[u8], modified: SystemTime) -> Self {
        Self {
            etag: etag_for(entry),
            last_modified: http_date(modified),
        }
    }

    /// Fresh when `If-None-Match` equals the ETag or `If-Modified-Since`
    /// equals the Last-Modified string. Both are exact string comparisons;
    /// a different but later date still counts as stale.
    pub fn evaluate(&self, if_none_match: Option<&str>, if_modified_since: Option<&str>) -> Freshness {
        let etag_matches = if_none_match.is_some_and(|v| v.trim() == self.etag);
        let date_matches = if_modified_since.is_some_and(|v| v.trim() == self.last_modified);

        if etag_matches || date_matches {
            Freshness::Fresh
        } else {
            Freshness::Stale
        }
    }
}

/// Computes validators for `entry` and checks them against the request.
pub fn evaluate(
    entry: &[u8],
    modified: SystemTime,
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
) -> (Freshness, Validators) {
    let validators = Validators::compute(entry, modified);
    (validators.evaluate(if_none_match, if_modified_since), validators)
}

/// Strong ETag over the entry content.
pub fn etag_for(entry: &[u8]) -> String {
    let digest = Sha256::digest(entry);
    format!("\"{}\"", hex::encode(digest))
}

/// Formats a timestamp as an HTTP date (always GMT, second precision).
pub fn http_date(t: SystemTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    // formatting a UTC OffsetDateTime with this description cannot fail
    OffsetDateTime::from(t).format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn rfc_example() -> SystemTime {
        // Sun, 06 Nov 1994 08:49:37 GMT
        UNIX_EPOCH + Duration::from_secs(784_111_777)
    }

    #[test]
    fn formats_imf_fixdate() {
        assert_eq!(http_date(rfc_example()), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn drops_sub_second_precision() {
        let t = rfc_example() + Duration::from_millis(999);
        assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn etag_is_stable_and_content_addressed() {
        let a = etag_for(b"hello");
        assert_eq!(a, etag_for(b"hello"));
        assert_ne!(a, etag_for(b"hellp"));
        assert_eq!(
            a,
            "\"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824\""
        );
    }

    #[test]
    fn matching_etag_is_fresh() {
        let v = Validators::compute(b"img", rfc_example());
        assert_eq!(v.evaluate(Some(&v.etag), None), Freshness::Fresh);
        assert_eq!(v.evaluate(Some("\"other\""), None), Freshness::Stale);
        assert_eq!(v.evaluate(None, None), Freshness::Stale);
    }

    #[test]
    fn if_modified_since_needs_exact_string() {
        let v = Validators::compute(b"img", rfc_example());
        assert_eq!(
            v.evaluate(None, Some("Sun, 06 Nov 1994 08:49:37 GMT")),
            Freshness::Fresh
        );
        // later date, but not the stored string
        assert_eq!(
            v.evaluate(None, Some("Mon, 07 Nov 1994 08:49:37 GMT")),
            Freshness::Stale
        );
    }

    #[test]
    fn either_validator_suffices() {
        let (freshness, v) = evaluate(
            b"img",
            rfc_example(),
            Some("\"nope\""),
            Some("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert_eq!(freshness, Freshness::Fresh);
        assert_eq!(v.last_modified, "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
