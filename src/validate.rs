// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::prelude::*;

/// Everything outside the RFC 3986 unreserved set is encoded; `/` is kept so
/// object keys keep their path shape.
const OBJECT_KEY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Strict form used for query parameters: `/` is encoded too.
const COMPONENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn uri_encode_key(key: &str) -> String {
    utf8_percent_encode(key, OBJECT_KEY_SET).to_string()
}

pub(crate) fn uri_encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT_SET).to_string()
}

/// DNS-compatible bucket name: 3-63 characters of lowercase letters, digits,
/// `-` and `.`, starting and ending alphanumeric, not shaped like an IPv4
/// address, no adjacent dots.
pub fn is_valid_bucket_name(bucket: &str) -> bool {
    if bucket.len() < 3 || bucket.len() > 63 {
        return false;
    }
    let bytes = bucket.as_bytes();
    if !bytes[0].is_ascii_lowercase() && !bytes[0].is_ascii_digit() {
        return false;
    }
    if !bytes[bytes.len() - 1].is_ascii_lowercase() && !bytes[bytes.len() - 1].is_ascii_digit() {
        return false;
    }
    if !bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
    {
        return false;
    }
    if bucket.contains("..") {
        return false;
    }
    !looks_like_ip_address(bucket)
}

fn looks_like_ip_address(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Object key rules: non-empty, at most 1024 bytes, no control characters.
/// UTF-8 validity is guaranteed by the `&str` type.
pub fn is_valid_object_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 1024 && !key.chars().any(|c| c.is_control())
}

/// Formats the canonical `s3://` URL for an object.
pub fn s3_url(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, uri_encode_key(key))
}

/// Parses `s3://<bucket>/<percent-encoded-key>` into bucket and key.
/// Query strings and fragments are rejected.
pub fn parse_s3_url(input: &str) -> KvResult<(String, String)> {
    let url = Url::parse(input)
        .map_err(|e| KvError::invalid_argument(format!("invalid S3 URL {input:?}: {e}")))?;
    if url.scheme() != "s3" {
        return Err(KvError::invalid_argument(format!(
            "expected s3:// URL, got scheme {:?}",
            url.scheme()
        )));
    }
    if url.query().is_some() {
        return Err(KvError::invalid_argument("query string not supported"));
    }
    if url.fragment().is_some() {
        return Err(KvError::invalid_argument("fragment identifier not supported"));
    }
    let bucket = url
        .host_str()
        .ok_or_else(|| KvError::invalid_argument("missing bucket in S3 URL"))?
        .to_string();
    if !is_valid_bucket_name(&bucket) {
        return Err(KvError::invalid_argument(format!(
            "invalid S3 bucket name: {bucket:?}"
        )));
    }
    let key = percent_decode_str(url.path().trim_start_matches('/'))
        .decode_utf8()
        .map_err(|_| KvError::invalid_argument("object key is not valid UTF-8"))?
        .into_owned();
    Ok((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names() {
        for ok in ["abc", "my-bucket", "my.bucket.2024", "0bucket9"] {
            assert!(is_valid_bucket_name(ok), "{ok} should be valid");
        }
        for bad in [
            "ab",
            "UPPER",
            "-leading",
            "trailing-",
            ".dot",
            "double..dot",
            "192.168.10.4",
            "under_score",
            &"x".repeat(64),
        ] {
            assert!(!is_valid_bucket_name(bad), "{bad} should be invalid");
        }
    }

    #[test]
    fn object_keys() {
        assert!(is_valid_object_key("a"));
        assert!(is_valid_object_key("nested/path/to/object.bin"));
        assert!(is_valid_object_key(&"k".repeat(1024)));
        assert!(!is_valid_object_key(""));
        assert!(!is_valid_object_key(&"k".repeat(1025)));
        assert!(!is_valid_object_key("with\ncontrol"));
        assert!(!is_valid_object_key("with\x7fdel"));
    }

    #[test]
    fn key_encoding_keeps_slashes() {
        assert_eq!(uri_encode_key("a/b c+d"), "a/b%20c%2Bd");
        assert_eq!(uri_encode_component("a/b"), "a%2Fb");
    }

    #[test]
    fn url_round_trip() {
        let url = s3_url("bucket", "path/to/key with space");
        assert_eq!(url, "s3://bucket/path/to/key%20with%20space");
        let (bucket, key) = parse_s3_url(&url).unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "path/to/key with space");
    }

    #[test]
    fn url_rejections() {
        assert!(parse_s3_url("http://bucket/key").is_err());
        assert!(parse_s3_url("s3://bucket/key?query=1").is_err());
        assert!(parse_s3_url("s3://bucket/key#frag").is_err());
        assert!(parse_s3_url("s3://UPPER/key").is_err());
    }

    #[test]
    fn url_with_empty_key() {
        let (bucket, key) = parse_s3_url("s3://bucket").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "");
    }
}
