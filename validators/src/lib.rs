//! Shared regexes used by the zone file codec and the config file editor.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref CAA_TAG_VALIDATOR: Regex =
        Regex::new(r"[a-zA-Z0-9]").expect("Failed to parse an internal regex!");
    pub static ref URI_RECORD: Regex =
        Regex::new(r"^(?P<priority>\d+) (?P<weight>\d+) (?P<target>.*)")
            .expect("Failed to parse an internal regex!");
    /// Matches a zone block's opening line in the main nameserver config,
    /// e.g. `zone "example.com" IN {`.
    pub static ref ZONE_BLOCK_OPEN: Regex =
        Regex::new(r#"zone\s+"(?P<domain>[^"]+)"\s+IN"#)
            .expect("Failed to parse an internal regex!");
    /// A leading `//` or `#` comment line, used to find/extract a zone
    /// block's attached comment lines.
    pub static ref COMMENT_LINE: Regex =
        Regex::new(r"^\s*(//|#)(.*)$").expect("Failed to parse an internal regex!");
}
