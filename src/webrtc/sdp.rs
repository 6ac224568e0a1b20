//! Session descriptor bandwidth rewriting
//!
//! Inserts or replaces the `b=AS:<kbps>` line of one media section:
//!
//! ```text
//! m=application 9 UDP/DTLS/SCTP webrtc-datachannel   <- media header
//! c=IN IP4 0.0.0.0                                   <- i=/c= lines skipped
//! b=AS:30                                            <- replaced or inserted here
//! a=setup:actpass
//! ```

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Media type carrying the data channel
pub const APPLICATION_MEDIA: &str = "application";

/// Persisted value meaning "no cap"
pub const UNLIMITED: &str = "unlimited";

/// Operator-configured bandwidth cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BandwidthLimit {
    #[default]
    Unlimited,
    /// Application-specific maximum in kbit/s
    Kbps(NonZeroU32),
}

impl std::str::FromStr for BandwidthLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case(UNLIMITED) {
            return Ok(BandwidthLimit::Unlimited);
        }

        s.parse::<NonZeroU32>()
            .map(BandwidthLimit::Kbps)
            .map_err(|_| format!("invalid bandwidth limit '{}'", s))
    }
}

impl std::fmt::Display for BandwidthLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandwidthLimit::Unlimited => write!(f, "{}", UNLIMITED),
            BandwidthLimit::Kbps(kbps) => write!(f, "{}", kbps),
        }
    }
}

impl TryFrom<String> for BandwidthLimit {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BandwidthLimit> for String {
    fn from(value: BandwidthLimit) -> Self {
        value.to_string()
    }
}

/// Apply `limit` to the first `m=<media>` section of `sdp`
///
/// Unlimited, or a descriptor without that media section, returns the
/// input unchanged.
pub fn limit_bandwidth(sdp: &str, media: &str, limit: BandwidthLimit) -> String {
    let BandwidthLimit::Kbps(kbps) = limit else {
        return sdp.to_string();
    };

    let lines: Vec<&str> = sdp.split('\n').collect();
    let header = format!("m={}", media);

    let Some(m_line) = lines.iter().position(|l| l.starts_with(&header)) else {
        debug!("Could not find the m line for {}", media);
        return sdp.to_string();
    };
    debug!("Found the m line for {} at line {}", media, m_line);

    // Keep CRLF descriptors consistently CRLF
    let eol = if lines[m_line].ends_with('\r') { "\r" } else { "" };
    let b_line = format!("b=AS:{}{}", kbps, eol);

    let mut line = m_line + 1;
    while line < lines.len() && (lines[line].starts_with("i=") || lines[line].starts_with("c=")) {
        line += 1;
    }

    let replace = line < lines.len() && lines[line].starts_with("b=");
    if replace {
        debug!("Replaced b line at line {}", line);
    } else {
        debug!("Adding new b line before line {}", line);
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..line]);
    out.push(&b_line);
    out.extend_from_slice(&lines[line + usize::from(replace)..]);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 123 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=setup:actpass\r\n\
        a=mid:0\r\n\
        a=sctp-port:5000\r\n";

    fn kbps(v: u32) -> BandwidthLimit {
        BandwidthLimit::Kbps(NonZeroU32::new(v).unwrap())
    }

    fn line_count(s: &str) -> usize {
        s.split('\n').count()
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!("unlimited".parse::<BandwidthLimit>(), Ok(BandwidthLimit::Unlimited));
        assert_eq!(" 250 ".parse::<BandwidthLimit>(), Ok(kbps(250)));
        assert!("0".parse::<BandwidthLimit>().is_err());
        assert!("-5".parse::<BandwidthLimit>().is_err());
        assert!("fast".parse::<BandwidthLimit>().is_err());
    }

    #[test]
    fn test_limit_serde_as_string() {
        let json = serde_json::to_string(&kbps(64)).unwrap();
        assert_eq!(json, "\"64\"");
        let limit: BandwidthLimit = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(limit, BandwidthLimit::Unlimited);
    }

    #[test]
    fn test_unlimited_is_identity() {
        assert_eq!(limit_bandwidth(OFFER, APPLICATION_MEDIA, BandwidthLimit::Unlimited), OFFER);
        assert_eq!(limit_bandwidth("garbage", "video", BandwidthLimit::Unlimited), "garbage");
    }

    #[test]
    fn test_insert_after_connection_line() {
        let limited = limit_bandwidth(OFFER, APPLICATION_MEDIA, kbps(30));
        let lines: Vec<&str> = limited.split('\n').collect();

        assert_eq!(line_count(&limited), line_count(OFFER) + 1);
        assert!(lines[5].starts_with("m=application"));
        assert_eq!(lines[6], "c=IN IP4 0.0.0.0\r");
        assert_eq!(lines[7], "b=AS:30\r");
        assert_eq!(lines[8], "a=setup:actpass\r");

        // Removing the inserted line restores the original order
        let mut without: Vec<&str> = lines.clone();
        without.remove(7);
        assert_eq!(without.join("\n"), OFFER);
    }

    #[test]
    fn test_replace_existing_line() {
        let existing = OFFER.replace("c=IN IP4 0.0.0.0\r\n", "c=IN IP4 0.0.0.0\r\nb=AS:500\r\n");
        let limited = limit_bandwidth(&existing, APPLICATION_MEDIA, kbps(30));

        assert_eq!(line_count(&limited), line_count(&existing));
        assert!(limited.contains("b=AS:30\r\n"));
        assert!(!limited.contains("b=AS:500"));
    }

    #[test]
    fn test_idempotent() {
        let once = limit_bandwidth(OFFER, APPLICATION_MEDIA, kbps(30));
        let twice = limit_bandwidth(&once, APPLICATION_MEDIA, kbps(30));
        assert_eq!(once, twice);
        assert_eq!(twice.matches("b=AS:").count(), 1);
    }

    #[test]
    fn test_absent_media_section_is_noop() {
        assert_eq!(limit_bandwidth(OFFER, "video", kbps(30)), OFFER);
    }

    #[test]
    fn test_skips_information_lines_with_lf() {
        let sdp = "v=0\nm=application 9 DTLS/SCTP 5000\ni=poses\nc=IN IP4 0.0.0.0\na=mid:0";
        let limited = limit_bandwidth(sdp, APPLICATION_MEDIA, kbps(8));
        assert_eq!(
            limited,
            "v=0\nm=application 9 DTLS/SCTP 5000\ni=poses\nc=IN IP4 0.0.0.0\nb=AS:8\na=mid:0"
        );
    }

    #[test]
    fn test_header_on_last_line() {
        let sdp = "v=0\nm=application 9 DTLS/SCTP 5000";
        assert_eq!(
            limit_bandwidth(sdp, APPLICATION_MEDIA, kbps(8)),
            "v=0\nm=application 9 DTLS/SCTP 5000\nb=AS:8"
        );
    }

    #[test]
    fn test_only_first_matching_section() {
        let sdp = "m=application 1\na=x\nm=application 2\na=y";
        let limited = limit_bandwidth(sdp, APPLICATION_MEDIA, kbps(8));
        assert_eq!(limited, "m=application 1\nb=AS:8\na=x\nm=application 2\na=y");
    }
}
