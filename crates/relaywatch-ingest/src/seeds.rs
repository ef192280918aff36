//! Seed relay list loading.
//!
//! Accepted file formats:
//! - one host or URL per line, `#` starts a comment
//! - a JSON array of strings
//! - a JSON object with a `functioning_relays` array

use std::path::Path;

use serde_json::Value;

use crate::{Error, Result};

/// Used when no seed file is given.
pub const DEFAULT_SEEDS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.snort.social",
    "wss://purplepag.es",
    "wss://relay.primal.net",
    "wss://nostr.wine",
    "wss://relay.nostr.band",
    "wss://nostr.mom",
];

/// Read seed entries from `path`. Entries are returned as written.
pub fn load_seed_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    parse_seeds(&contents)
}

/// Parse seed file contents.
pub fn parse_seeds(contents: &str) -> Result<Vec<String>> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let json: Value = serde_json::from_str(trimmed)?;
        let list = match &json {
            Value::Array(items) => items,
            Value::Object(obj) => obj
                .get("functioning_relays")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::Config("seed JSON missing 'functioning_relays' array".into()))?,
            _ => return Err(Error::Config("seed JSON must be an array or object".into())),
        };
        return Ok(list
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect());
    }

    Ok(contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Default seeds as owned strings.
pub fn default_seeds() -> Vec<String> {
    DEFAULT_SEEDS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_lines_with_comments() {
        let seeds = parse_seeds(
            "# curated list\nrelay.damus.io\n\n  wss://nos.lol  # fast\n#wss://dead.example\n",
        )
        .unwrap();
        assert_eq!(seeds, vec!["relay.damus.io", "wss://nos.lol"]);
    }

    #[test]
    fn test_parse_json_array() {
        let seeds = parse_seeds(r#"["wss://a.example.com", 5, " b.example.com "]"#).unwrap();
        assert_eq!(seeds, vec!["wss://a.example.com", "b.example.com"]);
    }

    #[test]
    fn test_parse_functioning_relays_object() {
        let seeds =
            parse_seeds(r#"{"functioning_relays": ["wss://a.example.com"], "count": 1}"#).unwrap();
        assert_eq!(seeds, vec!["wss://a.example.com"]);

        assert!(matches!(
            parse_seeds(r#"{"relays": []}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(parse_seeds("[broken"), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relay.example.com").unwrap();
        writeln!(file, "wss://other.example.com").unwrap();

        let seeds = load_seed_file(file.path()).unwrap();
        assert_eq!(seeds.len(), 2);
        assert!(load_seed_file(Path::new("/nonexistent/seeds.txt")).is_err());
    }
}
