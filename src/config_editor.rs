//! Text-level editing of the main nameserver config's `zone { ... }`
//! blocks. Operates purely on strings; callers own reading/writing the
//! file and making the edit atomic as part of a larger transaction.

use crate::error::SteadyDnsError;
use crate::zones::Zone;
use log::{debug, warn};
use steadydns_validators::ZONE_BLOCK_OPEN;

/// Finds the byte range `[start, end)` of the zone block for `domain`,
/// including the leading `//`/`#` comment lines immediately above it.
fn find_block(content: &str, domain: &str) -> Option<(usize, usize)> {
    let open_match = ZONE_BLOCK_OPEN
        .captures_iter(content)
        .find(|c| c["domain"] == *domain)?;
    let open_idx = open_match.get(0)?.start();

    let brace_open = content[open_idx..].find('{')? + open_idx;
    let mut depth = 0i32;
    let mut close_idx = None;
    for (offset, ch) in content[brace_open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close_idx = Some(brace_open + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let mut end = close_idx?;
    // absorb a trailing `;`
    let rest = &content[end..];
    if let Some(stripped) = rest.trim_start().strip_prefix(';') {
        let skipped = rest.len() - stripped.len();
        end += skipped;
    }

    // walk backward from `open_idx`, absorbing contiguous leading comment
    // lines; a blank line or non-comment text immediately before a block
    // is NOT collected, matching the comment-extraction rule used when
    // reading a zone's comment back out.
    let mut start = open_idx;
    for line in content[..open_idx].lines().rev() {
        if line.trim().is_empty() {
            break;
        }
        if line.trim_start().starts_with("//") || line.trim_start().starts_with('#') {
            start -= line.len() + 1; // +1 for the newline
        } else {
            break;
        }
    }

    Some((start, end))
}

/// Extracts the comment lines directly above a zone's block, if any.
/// Non-comment text - or a blank line then a comment - immediately
/// preceding the block is not collected.
pub fn extract_zone_comment(content: &str, domain: &str) -> Option<String> {
    let caps = ZONE_BLOCK_OPEN
        .captures_iter(content)
        .find(|c| c["domain"] == *domain)?;
    let open_idx = caps.get(0)?.start();

    let mut lines = Vec::new();
    for line in content[..open_idx].lines().rev() {
        let trimmed = line.trim_start();
        if let Some(comment) = trimmed.strip_prefix("//") {
            lines.push(comment.trim().to_string());
        } else if let Some(comment) = trimmed.strip_prefix('#') {
            lines.push(comment.trim().to_string());
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn collapse_blank_runs(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut blank_run = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn format_block(zone: &Zone) -> String {
    let mut out = String::new();
    if let Some(comment) = &zone.comment {
        for line in comment.lines() {
            out.push_str(&format!("// {line}\n"));
        }
    }
    out.push_str(&format!(
        "zone \"{}\" IN {{\n\ttype master;\n\tfile \"{}\";\n\tallow-query {{ {}; }};\n}};\n",
        zone.domain,
        zone.file_path.display(),
        zone.allow_query
    ));
    out
}

/// Inserts a new zone block at the end of the config. Fails if a block
/// for the domain already exists.
pub fn insert_zone(content: &str, zone: &Zone) -> Result<String, SteadyDnsError> {
    if ZONE_BLOCK_OPEN
        .captures_iter(content)
        .any(|c| c["domain"] == *zone.domain)
    {
        return Err(SteadyDnsError::Validation(format!(
            "zone already exists: {}",
            zone.domain
        )));
    }

    debug!("inserted zone block for {}", zone.domain);
    insert_zone_allow_existing(content, zone)
}

/// Removes the zone block (and its leading comment lines) for `domain`.
pub fn remove_zone(content: &str, domain: &str) -> Result<String, SteadyDnsError> {
    let (start, end) = find_block(content, domain).ok_or_else(|| {
        SteadyDnsError::NotFound(format!("no zone block found for {domain}"))
    })?;
    let mut out = String::new();
    out.push_str(&content[..start]);
    out.push_str(&content[end..]);
    debug!("removed zone block for {domain}");
    Ok(collapse_blank_runs(&out))
}

/// Replaces the zone block for `zone.domain`: remove then insert. Not
/// byte-level atomic on its own - the coordinator's backup-then-commit
/// transaction is what gives the operation atomicity from the caller's
/// point of view.
pub fn update_zone(content: &str, zone: &Zone) -> Result<String, SteadyDnsError> {
    let removed = match remove_zone(content, &zone.domain) {
        Ok(c) => c,
        Err(_) => {
            warn!("update_zone: no existing block for {}, inserting fresh", zone.domain);
            content.to_string()
        }
    };
    insert_zone_allow_existing(&removed, zone)
}

fn insert_zone_allow_existing(content: &str, zone: &Zone) -> Result<String, SteadyDnsError> {
    let mut out = content.trim_end().to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&format_block(zone));
    Ok(collapse_blank_runs(&out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_zone(domain: &str) -> Zone {
        Zone {
            domain: domain.to_string(),
            file_path: PathBuf::from(format!("/etc/zones/{domain}.zone")),
            allow_query: "any".to_string(),
            comment: Some("managed zone".to_string()),
            soa: crate::zones::Soa::malformed_default("2026073101".to_string()),
            records: vec![],
        }
    }

    #[test]
    fn test_insert_then_remove() {
        let zone = test_zone("example.com");
        let inserted = insert_zone("", &zone).unwrap();
        assert!(inserted.contains("zone \"example.com\" IN"));
        assert!(inserted.contains("// managed zone"));

        let removed = remove_zone(&inserted, "example.com").unwrap();
        assert!(!removed.contains("zone \"example.com\""));
        assert!(!removed.contains("managed zone"));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let zone = test_zone("example.com");
        let inserted = insert_zone("", &zone).unwrap();
        let err = insert_zone(&inserted, &zone).unwrap_err();
        assert!(matches!(err, SteadyDnsError::Validation(_)));
    }

    #[test]
    fn test_extract_comment_requires_contiguity() {
        let content = "// first\n// second\n\nzone \"example.com\" IN {\n\ttype master;\n};\n";
        // blank line breaks contiguity with the block, so nothing is collected
        assert_eq!(extract_zone_comment(content, "example.com"), None);

        let content = "// first\n// second\nzone \"example.com\" IN {\n\ttype master;\n};\n";
        assert_eq!(
            extract_zone_comment(content, "example.com"),
            Some("first\nsecond".to_string())
        );
    }

    #[test]
    fn test_update_replaces_block() {
        let zone = test_zone("example.com");
        let inserted = insert_zone("", &zone).unwrap();
        let mut updated_zone = zone.clone();
        updated_zone.allow_query = "10.0.0.0/8".to_string();
        let updated = update_zone(&inserted, &updated_zone).unwrap();
        assert!(updated.contains("10.0.0.0/8"));
        assert_eq!(
            updated.matches("zone \"example.com\" IN").count(),
            1,
            "should not duplicate the block"
        );
    }
}
