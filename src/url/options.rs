//! Embedded-option parsing: `scheme,key=val,key=val,...://rest` (spec.md §4.2.3).

use crate::error::{Error, Result};
use crate::protocol::Options;

/// Splits a URL's embedded option list out of the filename, returning the
/// rewritten filename (`scheme,rest`, with the option list excised) and the
/// parsed options.
///
/// `scheme_end` is the byte offset of the end of the parsed scheme (the
/// first non-scheme character). If that character is not `,`, there is no
/// option list and the filename is returned unchanged.
///
/// The key/value grammar implemented here is `key=value` pairs separated by
/// commas, terminated by the first `:` that doesn't belong to a value (the
/// literal separator spec.md §4.2.3 calls `SEP` before `rest_of_filename`).
/// A conventional `//` immediately following that `:` is also swallowed, so
/// that a URL written in the natural `scheme,opt=val://host` style collapses
/// to `scheme,host` exactly as spec.md's S5 scenario requires, rather than
/// leaving a dangling `//` in the rewritten filename.
pub(crate) fn split_embedded_options(filename: &str, scheme_end: usize) -> Result<(String, Options)> {
    let scheme = &filename[..scheme_end];
    let Some(rest) = filename[scheme_end..].strip_prefix(',') else {
        return Ok((filename.to_string(), Options::new()));
    };

    let mut options = Options::new();
    let mut cursor = rest;

    loop {
        let key_len = cursor
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .unwrap_or(cursor.len());

        if key_len == 0 {
            break;
        }

        let (key, after_key) = cursor.split_at(key_len);
        let Some(value_region) = after_key.strip_prefix('=') else {
            return Err(Error::Invalid(format!(
                "malformed embedded option {key:?}: expected '=' after key"
            )));
        };

        let value_len = value_region
            .find([',', ':'])
            .unwrap_or(value_region.len());
        let (value, after_value) = value_region.split_at(value_len);

        options.insert(key.to_string(), value.to_string());

        match after_value.strip_prefix(',') {
            Some(next) => cursor = next,
            None => {
                cursor = after_value;
                break;
            }
        }
    }

    let tail = match cursor.strip_prefix(':') {
        Some(rest) => rest.strip_prefix("//").unwrap_or(rest),
        None if cursor.is_empty() => cursor,
        None => {
            return Err(Error::Invalid(format!(
                "malformed embedded option list: unexpected {cursor:?}"
            )))
        }
    };

    Ok((format!("{scheme},{tail}"), options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_options_and_rewrites_filename() {
        let url = "udp,ttl=7,pkt_size=1316://host:1234";
        let (rewritten, options) = split_embedded_options(url, 3).unwrap();
        assert_eq!(rewritten, "udp,host:1234");
        assert_eq!(options.get("ttl").map(String::as_str), Some("7"));
        assert_eq!(options.get("pkt_size").map(String::as_str), Some("1316"));
    }

    #[test]
    fn no_option_list_is_passthrough() {
        let url = "file:///tmp/foo";
        let (rewritten, options) = split_embedded_options(url, 4).unwrap();
        assert_eq!(rewritten, url);
        assert!(options.is_empty());
    }

    #[test]
    fn malformed_pair_is_invalid() {
        let url = "udp,ttl7,pkt_size=1316://host:1234";
        assert!(split_embedded_options(url, 3).is_err());
    }
}
