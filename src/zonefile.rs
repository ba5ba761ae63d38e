//! Zone file rendering and parsing, based on
//! [RFC1035 Master Files](https://datatracker.ietf.org/doc/html/rfc1035#autoid-48).
//!
//! Parsing is best-effort: a line steadydns can't make sense of is dropped
//! with a warning rather than aborting the whole file, and a malformed SOA
//! falls back to documented defaults. This mirrors what real nameservers
//! tolerate in zone files that have been hand-edited for years.

use crate::zones::{Record, RecordType, Soa, Zone};
use log::{debug, warn};
use regex::Regex;
use std::path::PathBuf;

/// The result of parsing a zone file: the SOA (or a documented fallback),
/// the `$TTL` directive if present, and whatever records were recognised.
#[derive(Debug, Default)]
pub struct ParsedZoneFile {
    pub ttl: Option<u32>,
    pub soa: Option<Soa>,
    pub records: Vec<Record>,
}

fn strip_comment(line: &str) -> (&str, Option<String>) {
    match line.find(';') {
        Some(idx) => {
            let comment = line[idx + 1..].trim();
            (
                &line[..idx],
                if comment.is_empty() {
                    None
                } else {
                    Some(comment.to_string())
                },
            )
        }
        None => (line, None),
    }
}

/// Joins a multi-line, parenthesized SOA record into a single logical
/// line so the rest of the parser can treat it uniformly, e.g.:
///
/// ```text
/// @   IN SOA ns1.example.com. admin.example.com. (
///         2026010101 ; serial
///         3600       ; refresh
///         1800       ; retry
///         604800     ; expire
///         86400 )    ; minimum
/// ```
fn join_logical_lines(contents: &str) -> Vec<String> {
    let mut logical = Vec::new();
    let mut pending: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.replace('\t', " ");
        let (without_comment, _) = strip_comment(&line);
        match &mut pending {
            Some(buf) => {
                buf.push(' ');
                buf.push_str(without_comment.trim());
                if without_comment.contains(')') {
                    logical.push(pending.take().unwrap());
                }
            }
            None => {
                if without_comment.contains('(') && !without_comment.contains(')') {
                    pending = Some(without_comment.trim().to_string());
                } else {
                    logical.push(without_comment.to_string());
                }
            }
        }
    }
    if let Some(buf) = pending {
        logical.push(buf);
    }
    logical
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Best-effort parse of an RFC1035 master file.
pub fn parse(contents: &str) -> ParsedZoneFile {
    let regex_ttl = Regex::new(r"^\$TTL\s+(?P<ttl>\d+)").expect("static regex");
    let soa_matcher = Regex::new(
        r#"(?x)
        ^(?P<name>\S+)\s+
        (?:(?P<ttl>\d+)\s+)?
        (?:IN\s+)?
        SOA\s+
        (?P<primary>\S+)\s+
        (?P<admin>\S+)\s*
        \(\s*
        (?P<serial>\d+)\s*(?:;[^0-9]*)?\s*
        (?P<refresh>\d+)\s*(?:;[^0-9]*)?\s*
        (?P<retry>\d+)\s*(?:;[^0-9]*)?\s*
        (?P<expire>\d+)\s*(?:;[^0-9]*)?\s*
        (?P<minimum>\d+)\s*(?:;[^0-9]*)?\s*
        \)
        "#,
    )
    .expect("static regex");

    let mut parsed = ParsedZoneFile::default();
    let mut last_name: Option<String> = None;

    for raw in join_logical_lines(contents) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('$') {
            if let Some(caps) = regex_ttl.captures(trimmed) {
                parsed.ttl = caps.name("ttl").and_then(|m| m.as_str().parse().ok());
            } else {
                debug!("ignoring unsupported directive line: {trimmed}");
            }
            continue;
        }
        if trimmed.starts_with(';') {
            continue;
        }

        if let Some(caps) = soa_matcher.captures(trimmed) {
            parsed.soa = Some(Soa {
                primary_ns: caps["primary"].to_string(),
                admin_email: caps["admin"].to_string(),
                serial: caps["serial"].to_string(),
                refresh: caps["refresh"].parse().unwrap_or(3600),
                retry: caps["retry"].parse().unwrap_or(1800),
                expire: caps["expire"].parse().unwrap_or(604800),
                minimum: caps["minimum"].parse().unwrap_or(86400),
            });
            last_name = Some(caps["name"].to_string());
            continue;
        }

        let (without_comment, comment) = strip_comment(trimmed);
        let without_comment = without_comment.trim();
        if without_comment.is_empty() {
            continue;
        }

        let mut tokens: Vec<&str> = without_comment.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        // name is omitted on a continuation line: reuse the last one seen.
        let name = if is_numeric(tokens[0]) || tokens[0].eq_ignore_ascii_case("IN") {
            match &last_name {
                Some(n) => n.clone(),
                None => {
                    warn!("dropping line with no preceding owner name: {trimmed}");
                    continue;
                }
            }
        } else {
            let n = tokens.remove(0).to_string();
            last_name = Some(n.clone());
            n
        };

        let mut ttl: Option<u32> = None;
        if let Some(first) = tokens.first() {
            if is_numeric(first) {
                ttl = first.parse().ok();
                tokens.remove(0);
            }
        }
        if let Some(first) = tokens.first() {
            if first.eq_ignore_ascii_case("IN") {
                tokens.remove(0);
            }
        }
        if tokens.is_empty() {
            warn!("dropping line with no record type: {trimmed}");
            continue;
        }
        let rrtype = RecordType::from(tokens.remove(0));

        let (priority, value) = if rrtype == RecordType::MX {
            if tokens.is_empty() {
                warn!("dropping MX record with no priority/value: {trimmed}");
                continue;
            }
            let priority = tokens.remove(0).parse::<u16>().ok();
            (priority, tokens.join(" "))
        } else {
            (None, tokens.join(" "))
        };

        if value.is_empty() {
            warn!("dropping record with empty value: {trimmed}");
            continue;
        }

        parsed.records.push(Record {
            id: uuid::Uuid::new_v4(),
            name,
            rrtype,
            value,
            ttl: ttl.unwrap_or(0),
            priority,
            comment,
        });
    }

    parsed
}

fn dotted(value: &str) -> String {
    if value.ends_with('.') {
        value.to_string()
    } else {
        format!("{value}.")
    }
}

/// Renders a [`Zone`] back to RFC1035 master-file text: `$TTL`, a
/// multi-line SOA with inline comments, then records grouped by type
/// (NS, A, AAAA, CNAME, MX, TXT, PTR, other), apex first then
/// lexicographic within each group.
pub fn render(zone: &Zone) -> String {
    let mut out = String::new();
    let default_ttl = zone
        .records
        .first()
        .map(|r| r.effective_ttl())
        .unwrap_or(3600);
    out.push_str(&format!("$TTL {default_ttl}\n"));

    out.push_str(&format!(
        "@\tIN\tSOA\t{}\t{} (\n",
        dotted(&zone.soa.primary_ns),
        dotted(&zone.soa.admin_email)
    ));
    out.push_str(&format!("\t\t\t{}\t; serial\n", zone.soa.serial));
    out.push_str(&format!("\t\t\t{}\t; refresh\n", zone.soa.refresh));
    out.push_str(&format!("\t\t\t{}\t; retry\n", zone.soa.retry));
    out.push_str(&format!("\t\t\t{}\t; expire\n", zone.soa.expire));
    out.push_str(&format!("\t\t\t{} )\t; minimum\n", zone.soa.minimum));

    let mut records: Vec<&Record> = zone.records.iter().collect();
    records.sort_by(|a, b| {
        a.rrtype
            .render_rank()
            .cmp(&b.rrtype.render_rank())
            .then_with(|| match (a.name == "@", b.name == "@") {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => a.name.cmp(&b.name),
            })
    });

    for record in records {
        let value = if record.rrtype.value_is_fqdn() {
            dotted(&record.value)
        } else {
            record.value.clone()
        };
        let mut line = if record.rrtype == RecordType::MX {
            format!(
                "{}\t{}\tIN\t{}\t{}\t{}",
                record.name,
                record.effective_ttl(),
                record.rrtype.as_str(),
                record.priority.unwrap_or(10),
                value
            )
        } else {
            format!(
                "{}\t{}\tIN\t{}\t{}",
                record.name,
                record.effective_ttl(),
                record.rrtype.as_str(),
                value
            )
        };
        if let Some(comment) = &record.comment {
            line.push_str(&format!("\t; {comment}"));
        }
        out.push_str(&line);
        out.push('\n');
    }

    out
}

/// Round-trips a zone through [`render`] and [`parse`], as a convenience
/// for building a [`ParsedZoneFile`] from raw text with a given file path.
pub fn parse_to_zone(contents: &str, domain: &str, file_path: PathBuf, allow_query: &str) -> Zone {
    let parsed = parse(contents);
    let soa = parsed.soa.unwrap_or_else(|| {
        warn!("zone file for {domain} has no parseable SOA, using documented defaults");
        Soa::malformed_default("2026010101".to_string())
    });
    Zone {
        domain: domain.to_string(),
        file_path,
        allow_query: allow_query.to_string(),
        comment: None,
        soa,
        records: parsed.records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_test_logging() {
        let _ = flexi_logger::Logger::try_with_str("debug").and_then(|l| l.start());
    }

    #[test]
    fn test_parse_example_file() {
        start_test_logging();
        let example_file = r#"$ORIGIN example.com.
$TTL 86400
@	IN	SOA	dns1.example.com.	hostmaster.example.com. (
            2001062501 ; serial
            21600      ; refresh after 6 hours
            3600       ; retry after 1 hour
            604800     ; expire after 1 week
            86400 )    ; minimum TTL of 1 day

    IN	NS	dns1.example.com.
    IN	NS	dns2.example.com.

    IN	MX	10	mail.example.com.
    IN	MX	20	mail2.example.com.

dns1	IN	A	10.0.1.1
dns2	IN	A	10.0.1.2

mail	IN	CNAME	server1
www	IN	CNAME	server1
"#;
        let res = parse(example_file);
        let soa = res.soa.expect("should have parsed an SOA");
        assert_eq!(soa.serial, "2001062501");
        assert_eq!(soa.minimum, 86400);
        assert_eq!(res.ttl, Some(86400));

        let ns_count = res
            .records
            .iter()
            .filter(|r| r.rrtype == RecordType::NS)
            .count();
        assert_eq!(ns_count, 2);
        let mx = res
            .records
            .iter()
            .find(|r| r.rrtype == RecordType::MX && r.priority == Some(10))
            .expect("should have an MX 10 record");
        assert_eq!(mx.value, "mail.example.com.");
    }

    #[test]
    fn test_malformed_soa_falls_back_to_documented_defaults() {
        start_test_logging();
        let example_file = "not a valid line at all\n";
        let zone = parse_to_zone(
            example_file,
            "example.com",
            PathBuf::from("/tmp/example.com.zone"),
            "any",
        );
        assert_eq!(zone.soa.refresh, 3600);
        assert_eq!(zone.soa.retry, 1800);
        assert_eq!(zone.soa.expire, 604800);
        assert_eq!(zone.soa.minimum, 86400);
    }

    #[test]
    fn test_render_then_parse_round_trips() {
        start_test_logging();
        let zone = Zone {
            domain: "example.com".to_string(),
            file_path: PathBuf::from("/tmp/example.com.zone"),
            allow_query: "any".to_string(),
            comment: None,
            soa: Soa {
                primary_ns: "ns1.example.com.".to_string(),
                admin_email: "admin.example.com.".to_string(),
                serial: "2026073101".to_string(),
                refresh: 3600,
                retry: 1800,
                expire: 604800,
                minimum: 86400,
            },
            records: vec![
                Record {
                    id: uuid::Uuid::new_v4(),
                    name: "@".to_string(),
                    rrtype: RecordType::A,
                    value: "192.0.2.1".to_string(),
                    ttl: 0,
                    priority: None,
                    comment: None,
                },
                Record {
                    id: uuid::Uuid::new_v4(),
                    name: "www".to_string(),
                    rrtype: RecordType::CNAME,
                    value: "example.com".to_string(),
                    ttl: 0,
                    priority: None,
                    comment: None,
                },
            ],
        };

        let rendered = render(&zone);
        let reparsed = parse(&rendered);
        assert_eq!(reparsed.soa.unwrap().serial, zone.soa.serial);
        assert_eq!(reparsed.records.len(), zone.records.len());
        let cname = reparsed
            .records
            .iter()
            .find(|r| r.rrtype == RecordType::CNAME)
            .unwrap();
        assert_eq!(cname.value, "example.com.");
    }
}
