// Entity-tag preconditions (RFC 7232) for If-Match / If-None-Match.
//
// Header values are parsed leniently: malformed entries are dropped and a
// single `*` anywhere turns the whole set into a wildcard.

use std::collections::BTreeSet;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("The {0} precondition is not fulfilled")]
    Failed(String),

    #[error("A conditional request with If-Match or If-None-Match is required")]
    Required,
}

/// Parsed content of an `If-Match` or `If-None-Match` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtagInformation {
    all: bool,
    etags: BTreeSet<String>,
}

impl EtagInformation {
    /// Wildcard (`*`) information.
    pub fn wildcard() -> Self {
        Self {
            all: true,
            etags: BTreeSet::new(),
        }
    }

    /// Parse every value of a (possibly repeated) header.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Self {
        let mut etags = BTreeSet::new();
        for value in values {
            let value = value.as_ref();
            match parse_list(value, &mut etags) {
                ListOutcome::Wildcard => {
                    trace!(header = value, "wildcard entity tag");
                    return Self::wildcard();
                }
                ListOutcome::Tags => {}
            }
        }
        Self { all: false, etags }
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn etags(&self) -> &BTreeSet<String> {
        &self.etags
    }

    /// The header was sent with a usable value.
    pub fn is_present(&self) -> bool {
        self.all || !self.etags.is_empty()
    }

    /// Weak comparison: the `W/` marker is ignored on both sides.
    pub fn is_matched_by(&self, etag: Option<&str>) -> bool {
        let Some(etag) = etag else {
            return false;
        };
        if self.all {
            return true;
        }
        let wanted = strip_weak(etag);
        self.etags.iter().any(|candidate| strip_weak(candidate) == wanted)
    }
}

enum ListOutcome {
    Wildcard,
    Tags,
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

/// Scan a comma-separated entity-tag list. Opaque tags may themselves
/// contain commas, so the scan follows the quotes rather than splitting.
fn parse_list(value: &str, out: &mut BTreeSet<String>) -> ListOutcome {
    let bytes = value.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let start = pos;
        let quote_start = if value[pos..].starts_with("W/\"") {
            pos + 2
        } else if bytes[pos] == b'"' {
            pos
        } else {
            // Not a tag: either `*` or garbage up to the next comma.
            let end = value[pos..].find(',').map_or(bytes.len(), |i| pos + i);
            if value[start..end].trim() == "*" {
                return ListOutcome::Wildcard;
            }
            debug!(entry = &value[start..end], "dropping malformed entity tag");
            pos = end;
            continue;
        };

        match value[quote_start + 1..].find('"') {
            Some(offset) => {
                let end = quote_start + 1 + offset + 1;
                let opaque = &value[quote_start + 1..end - 1];
                if opaque.bytes().all(is_etagc) {
                    out.insert(value[start..end].to_string());
                } else {
                    debug!(entry = &value[start..end], "dropping entity tag with invalid characters");
                }
                pos = end;
                if let Some(i) = value[pos..].find(',') {
                    let trailing = value[pos..pos + i].trim();
                    if !trailing.is_empty() {
                        debug!(trailing, "ignoring trailing characters after entity tag");
                    }
                    pos += i;
                } else {
                    pos = bytes.len();
                }
            }
            None => {
                debug!(entry = &value[start..], "dropping unterminated entity tag");
                break;
            }
        }
    }

    ListOutcome::Tags
}

/// `etagc = %x21 / %x23-7E / obs-text`
fn is_etagc(b: u8) -> bool {
    b == 0x21 || (0x23..=0x7E).contains(&b) || b >= 0x80
}

/// Validate a read (GET/HEAD) against the current ETag.
///
/// Returns `true` when `If-None-Match` matches, i.e. the caller may answer
/// with 304 Not Modified. Resources without an ETag are never checked.
pub fn check_read_preconditions(
    etag: Option<&str>,
    if_match: &EtagInformation,
    if_none_match: &EtagInformation,
) -> Result<bool, PreconditionError> {
    if etag.is_none() {
        return Ok(false);
    }
    if if_match.is_present() && !if_match.is_matched_by(etag) {
        return Err(PreconditionError::Failed("If-Match".to_string()));
    }
    Ok(if_none_match.is_matched_by(etag))
}

/// Validate a modifying request against the current ETag.
pub fn check_change_preconditions(
    etag: Option<&str>,
    if_match: &EtagInformation,
    if_none_match: &EtagInformation,
) -> Result<(), PreconditionError> {
    if etag.is_none() {
        return Ok(());
    }
    if if_match.is_present() && !if_match.is_matched_by(etag) {
        return Err(PreconditionError::Failed("If-Match".to_string()));
    }
    if if_none_match.is_matched_by(etag) {
        return Err(PreconditionError::Failed("If-None-Match".to_string()));
    }
    Ok(())
}

/// Services that require optimistic concurrency reject unconditional
/// changes to versioned resources.
pub fn check_precondition_required(
    etag: Option<&str>,
    if_match: &EtagInformation,
    if_none_match: &EtagInformation,
) -> Result<(), PreconditionError> {
    if etag.is_some() && !if_match.is_present() && !if_none_match.is_present() {
        return Err(PreconditionError::Required);
    }
    Ok(())
}
