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

//! Textual tag extraction for the ListObjectsV2 response subset. This is
//! deliberately string matching, not schema-aware parsing: tag ordering is
//! trusted and entities are not unescaped.

use crate::prelude::*;

/// Finds `tag` in `payload` at or after `pos`; returns the position just
/// past it.
pub fn find_tag(payload: &str, tag: &str, pos: usize) -> KvResult<usize> {
    payload
        .get(pos..)
        .and_then(|haystack| haystack.find(tag))
        .map(|at| pos + at + tag.len())
        .ok_or_else(|| KvError::MalformedResponse(format!("tag {tag} not found in list response")))
}

/// Extracts the text between `open` and `close`, searching from `pos`.
/// Returns the text and the position just past the close tag.
pub fn get_tag<'a>(
    payload: &'a str,
    open: &str,
    close: &str,
    pos: usize,
) -> KvResult<(&'a str, usize)> {
    let start = find_tag(payload, open, pos)?;
    let len = payload
        .get(start..)
        .and_then(|haystack| haystack.find(close))
        .ok_or_else(|| {
            KvError::MalformedResponse(format!("tag {close} not found in list response"))
        })?;
    Ok((&payload[start..start + len], start + len + close.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
        "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
        "<Name>bucket</Name><KeyCount>2</KeyCount>",
        "<Contents><Key>a/one</Key><Size>3</Size></Contents>",
        "<Contents><Key>a/two</Key><Size>5</Size></Contents>",
        "<IsTruncated>false</IsTruncated>",
        "</ListBucketResult>",
    );

    #[test]
    fn walks_contents_in_order() {
        let start = find_tag(PAGE, "<ListBucketResult", 0).unwrap();
        let (count, mut pos) = get_tag(PAGE, "<KeyCount>", "</KeyCount>", start).unwrap();
        assert_eq!(count, "2");

        let mut keys = Vec::new();
        for _ in 0..2 {
            let contents = find_tag(PAGE, "<Contents>", pos).unwrap();
            let (key, next) = get_tag(PAGE, "<Key>", "</Key>", contents).unwrap();
            keys.push(key);
            pos = next;
        }
        assert_eq!(keys, ["a/one", "a/two"]);

        let (truncated, _) = get_tag(PAGE, "<IsTruncated>", "</IsTruncated>", start).unwrap();
        assert_eq!(truncated, "false");
    }

    #[test]
    fn missing_tags_are_errors() {
        assert!(find_tag(PAGE, "<NextContinuationToken>", 0).is_err());
        assert!(get_tag(PAGE, "<KeyCount>", "</Nope>", 0).is_err());
        // searching past the end finds nothing
        assert!(find_tag(PAGE, "<KeyCount>", PAGE.len()).is_err());
    }
}
