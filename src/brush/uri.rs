//! Brush URI grammar: `scheme://name[?k=v(&k=v)*]`.
//!
//! Reserved schemes are `local` and `remote`. Query values are
//! percent-decoded, so `start=%23ff0000` carries a literal `#ff0000`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CacheError, CacheResult};

/// A parsed brush configuration URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrushUri {
    pub scheme: String,
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl BrushUri {
    pub fn parse(uri: &str) -> CacheResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| CacheError::invalid_uri(uri, "missing '://'"))?;
        if scheme.is_empty() {
            return Err(CacheError::invalid_uri(uri, "empty scheme"));
        }

        let (name, query) = match rest.split_once('?') {
            Some((n, q)) => (n, Some(q)),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(CacheError::invalid_uri(uri, "empty brush name"));
        }

        let mut params = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| CacheError::invalid_uri(uri, "query pair without '='"))?;
                params.insert(percent_decode(k, uri)?, percent_decode(v, uri)?);
            }
        }

        Ok(Self {
            scheme: scheme.to_string(),
            name: name.to_string(),
            params,
        })
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    /// `scheme://name` without the query, as listed by the factory.
    pub fn prefix(&self) -> String {
        format!("{}://{}", self.scheme, self.name)
    }

    /// Parse a `#rrggbb` query value into an RGB triple.
    pub fn color_param(&self, key: &str) -> CacheResult<Option<[u8; 3]>> {
        match self.param(key) {
            None => Ok(None),
            Some(v) => parse_hex_color(v)
                .map(Some)
                .map_err(|reason| CacheError::invalid_uri(self.prefix(), reason)),
        }
    }
}

// Display writes the canonical form back out; params iterate sorted, which
// keeps serialized brush specs stable across runs.
impl fmt::Display for BrushUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.name)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, k, percent_encode(v))?;
        }
        Ok(())
    }
}

fn percent_decode(s: &str, uri: &str) -> CacheResult<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| CacheError::invalid_uri(uri, "truncated percent escape"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| CacheError::invalid_uri(uri, "non-utf8 percent escape"))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'#' | b'%' | b'&' | b'=' | b'?' | b' ' => out.push_str(&format!("%{:02x}", b)),
            _ => out.push(b as char),
        }
    }
    out
}

/// `#rrggbb` → RGB triple.
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], String> {
    let hex = s
        .strip_prefix('#')
        .ok_or_else(|| format!("color '{}' must start with '#'", s))?;
    if hex.len() != 6 {
        return Err(format!("color '{}' must be #rrggbb", s));
    }
    let parse = |r: &str| u8::from_str_radix(r, 16).map_err(|_| format!("bad hex in '{}'", s));
    Ok([parse(&hex[0..2])?, parse(&hex[2..4])?, parse(&hex[4..6])?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_name_and_query() {
        let uri = BrushUri::parse("local://ramp?field=z&step=1&start=%23000000&end=%23ffffff")
            .unwrap();
        assert_eq!(uri.scheme, "local");
        assert_eq!(uri.name, "ramp");
        assert_eq!(uri.param("field"), Some("z"));
        assert_eq!(uri.param("start"), Some("#000000"));
        assert_eq!(uri.color_param("end").unwrap(), Some([255, 255, 255]));
        assert_eq!(uri.prefix(), "local://ramp");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(BrushUri::parse("ramp?field=z").is_err());
        assert!(BrushUri::parse("://ramp").is_err());
        assert!(BrushUri::parse("local://").is_err());
        assert!(BrushUri::parse("local://ramp?step").is_err());
        assert!(BrushUri::parse("local://ramp?start=%2").is_err());
    }

    #[test]
    fn hex_colors_validate() {
        assert_eq!(parse_hex_color("#ff8000").unwrap(), [255, 128, 0]);
        assert!(parse_hex_color("ff8000").is_err());
        assert!(parse_hex_color("#ff80").is_err());
        assert!(parse_hex_color("#gg8000").is_err());
    }

    #[test]
    fn display_round_trips() {
        let text = "local://ramp?end=%23ffffff&field=z";
        let uri = BrushUri::parse(text).unwrap();
        assert_eq!(BrushUri::parse(&uri.to_string()).unwrap(), uri);
    }
}
