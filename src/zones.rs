//! The zone/record/SOA data model shared by the zone file codec, the
//! config file editor and the archive metadata.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// The record types this system understands. Anything else encountered
/// while parsing a zone file is kept verbatim so round-tripping never
/// silently drops a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum RecordType {
    A,
    AAAA,
    NS,
    CNAME,
    MX,
    TXT,
    PTR,
    SRV,
    CAA,
    Other(String),
}

impl RecordType {
    /// The default TTL applied when a record's TTL field is zero or
    /// absent, per-type.
    pub fn default_ttl(&self) -> u32 {
        match self {
            RecordType::NS | RecordType::MX | RecordType::PTR => 86400,
            _ => 3600,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::PTR => "PTR",
            RecordType::SRV => "SRV",
            RecordType::CAA => "CAA",
            RecordType::Other(s) => s.as_str(),
        }
    }

    /// The render-order rank used when grouping records within a zone:
    /// NS, A, AAAA, CNAME, MX, TXT, PTR, then everything else.
    pub fn render_rank(&self) -> u8 {
        match self {
            RecordType::NS => 0,
            RecordType::A => 1,
            RecordType::AAAA => 2,
            RecordType::CNAME => 3,
            RecordType::MX => 4,
            RecordType::TXT => 5,
            RecordType::PTR => 6,
            RecordType::SRV => 7,
            RecordType::CAA => 8,
            RecordType::Other(_) => 9,
        }
    }

    /// Values of these types are FQDNs and get dotted (trailing `.`)
    /// when rendered.
    pub fn value_is_fqdn(&self) -> bool {
        matches!(
            self,
            RecordType::CNAME | RecordType::NS | RecordType::MX | RecordType::PTR
        )
    }
}

impl From<&str> for RecordType {
    fn from(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::AAAA,
            "NS" => RecordType::NS,
            "CNAME" => RecordType::CNAME,
            "MX" => RecordType::MX,
            "TXT" => RecordType::TXT,
            "PTR" => RecordType::PTR,
            "SRV" => RecordType::SRV,
            "CAA" => RecordType::CAA,
            other => RecordType::Other(other.to_string()),
        }
    }
}

/// A single resource record in a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier, assigned the first time the record is persisted.
    pub id: Uuid,
    pub name: String,
    pub rrtype: RecordType,
    pub value: String,
    /// 0 means "use the type's default TTL".
    pub ttl: u32,
    /// Only meaningful for MX records.
    pub priority: Option<u16>,
    /// Trailing `;` comment on the record's line, if any.
    pub comment: Option<String>,
}

impl Record {
    pub fn effective_ttl(&self) -> u32 {
        match self.ttl {
            0 => self.rrtype.default_ttl(),
            ttl => ttl,
        }
    }
}

/// The zone's Start-of-Authority record.
///
/// `serial` is owned by this system: it is always generated by the serial
/// generator, never taken verbatim from caller input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soa {
    pub primary_ns: String,
    pub admin_email: String,
    pub serial: String,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// The documented fallback values used when an existing zone file's
    /// SOA couldn't be parsed.
    pub fn malformed_default(serial: String) -> Self {
        Soa {
            primary_ns: String::new(),
            admin_email: String::new(),
            serial,
            refresh: 3600,
            retry: 1800,
            expire: 604800,
            minimum: 86400,
        }
    }
}

/// A DNS zone: the unit of mutation the coordinator operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// The domain name; unique identifier for this zone.
    pub domain: String,
    pub file_path: PathBuf,
    /// The nameserver's allow-query expression for this zone (opaque to
    /// us - we only preserve it through edits).
    pub allow_query: String,
    /// Leading `//`/`#` comment lines attached to this zone's config block.
    pub comment: Option<String>,
    pub soa: Soa,
    pub records: Vec<Record>,
}

const SYSTEM_ZONES: &[&str] = &[
    ".",
    "localhost",
    "127.in-addr.arpa",
    "0.in-addr.arpa",
    "255.in-addr.arpa",
    "rpz.local",
];

impl Zone {
    /// Reserved zones the coordinator refuses to mutate.
    pub fn is_system_zone(domain: &str) -> bool {
        if domain == "." {
            return true;
        }
        let normalized = domain.trim_end_matches('.').to_ascii_lowercase();
        SYSTEM_ZONES.iter().any(|z| *z == normalized)
    }

    /// True if any record at `name` is a CNAME alongside another record
    /// of the same name - the one invariant every mutation must hold.
    pub fn has_cname_conflict(&self) -> Option<String> {
        for record in &self.records {
            if record.rrtype != RecordType::CNAME {
                continue;
            }
            let conflicting = self
                .records
                .iter()
                .any(|other| other.name == record.name && other.id != record.id);
            if conflicting {
                return Some(record.name.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttl_by_type() {
        assert_eq!(RecordType::NS.default_ttl(), 86400);
        assert_eq!(RecordType::MX.default_ttl(), 86400);
        assert_eq!(RecordType::PTR.default_ttl(), 86400);
        assert_eq!(RecordType::A.default_ttl(), 3600);
        assert_eq!(RecordType::TXT.default_ttl(), 3600);
    }

    #[test]
    fn test_system_zone_detection() {
        assert!(Zone::is_system_zone("."));
        assert!(Zone::is_system_zone("localhost"));
        assert!(Zone::is_system_zone("127.in-addr.arpa"));
        assert!(!Zone::is_system_zone("example.com"));
    }

    fn record(name: &str, rrtype: RecordType) -> Record {
        Record {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rrtype,
            value: "1.2.3.4".to_string(),
            ttl: 0,
            priority: None,
            comment: None,
        }
    }

    #[test]
    fn test_cname_conflict_detection() {
        let mut zone = Zone {
            domain: "example.com".to_string(),
            file_path: PathBuf::from("/tmp/example.com.zone"),
            allow_query: "any".to_string(),
            comment: None,
            soa: Soa::malformed_default("2026073101".to_string()),
            records: vec![record("@", RecordType::A)],
        };
        assert!(zone.has_cname_conflict().is_none());
        zone.records.push(record("@", RecordType::CNAME));
        assert_eq!(zone.has_cname_conflict(), Some("@".to_string()));
    }
}
