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

//! AWS Signature Version 4 request construction.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::{
    auth::Credentials,
    http::HttpRequest,
    prelude::*,
    validate::uri_encode_component,
};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty payload, used for GET/HEAD/DELETE signing.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub fn payload_sha256(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Incrementally assembles one S3 request, then signs it. Anonymous
/// requests (no credentials) carry only host and date headers.
pub struct RequestBuilder {
    method: &'static str,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Bytes,
}

impl RequestBuilder {
    pub fn new(method: &'static str, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn maybe_requester_payer(self, requester_pays: bool) -> Self {
        if requester_pays {
            self.header("x-amz-request-payer", "requester")
        } else {
            self
        }
    }

    pub fn build(
        self,
        host: &str,
        credentials: Option<&Credentials>,
        region: &str,
        payload_sha256: &str,
        now: DateTime<Utc>,
    ) -> KvResult<HttpRequest> {
        let Self {
            method,
            url,
            mut headers,
            query,
            body,
        } = self;

        // the canonical query and the transmitted query must be the same
        // string, so both are derived from one sorted, encoded rendering
        let mut query = query;
        query.sort();
        let query_string = query
            .iter()
            .map(|(name, value)| {
                format!("{}={}", uri_encode_component(name), uri_encode_component(value))
            })
            .collect::<Vec<_>>()
            .join("&");
        let url = if query_string.is_empty() {
            url
        } else {
            format!("{url}?{query_string}")
        };

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        headers.push(("host".to_string(), host.to_string()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));

        let Some(credentials) = credentials else {
            return Ok(HttpRequest {
                method,
                url,
                headers,
                body,
            });
        };

        headers.push((
            "x-amz-content-sha256".to_string(),
            payload_sha256.to_string(),
        ));
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let parsed = url::Url::parse(&url)
            .map_err(|e| KvError::invalid_argument(format!("invalid request URL {url:?}: {e}")))?;
        let canonical_uri = match parsed.path() {
            "" => "/",
            path => path,
        };

        headers.sort();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n{query_string}\n{canonical_headers}\n{signed_headers}\n{payload_sha256}"
        );

        let date_stamp = now.format("%Y%m%d").to_string();
        let scope = format!("{date_stamp}/{region}/s3/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", credentials.secret_key).as_bytes(),
            date_stamp.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key
            ),
        ));

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn creds() -> Credentials {
        Credentials {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 21, 12, 0, 0).unwrap()
    }

    fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
        request
            .headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn empty_payload_constant_matches_digest() {
        assert_eq!(payload_sha256(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn signed_request_shape() {
        let request = RequestBuilder::new("GET", "https://bucket.s3.us-east-1.amazonaws.com/key")
            .build(
                "bucket.s3.us-east-1.amazonaws.com",
                Some(&creds()),
                "us-east-1",
                EMPTY_PAYLOAD_SHA256,
                timestamp(),
            )
            .unwrap();

        assert_eq!(header(&request, "x-amz-date"), Some("20240521T120000Z"));
        assert_eq!(
            header(&request, "x-amz-content-sha256"),
            Some(EMPTY_PAYLOAD_SHA256)
        );
        let auth = header(&request, "authorization").expect("authorization header");
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240521/us-east-1/s3/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(auth.contains("Signature="));
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let build = |secret: &str| {
            let mut credentials = creds();
            credentials.secret_key = secret.to_string();
            let request = RequestBuilder::new("PUT", "https://h/k")
                .header("content-type", "application/octet-stream")
                .build("h", Some(&credentials), "us-east-1", "abc123", timestamp())
                .unwrap();
            header(&request, "authorization").unwrap().to_string()
        };
        assert_eq!(build("secret-a"), build("secret-a"));
        assert_ne!(build("secret-a"), build("secret-b"));
    }

    #[test]
    fn query_parameters_are_sorted_and_encoded() {
        let request = RequestBuilder::new("GET", "https://h/")
            .query_param("prefix", "a/b")
            .query_param("continuation-token", "t+1=")
            .query_param("list-type", "2")
            .build("h", None, "us-east-1", EMPTY_PAYLOAD_SHA256, timestamp())
            .unwrap();
        assert_eq!(
            request.url,
            "https://h/?continuation-token=t%2B1%3D&list-type=2&prefix=a%2Fb"
        );
    }

    #[test]
    fn anonymous_requests_skip_signing() {
        let request = RequestBuilder::new("GET", "https://h/k")
            .build("h", None, "", EMPTY_PAYLOAD_SHA256, timestamp())
            .unwrap();
        assert_eq!(header(&request, "host"), Some("h"));
        assert!(header(&request, "x-amz-date").is_some());
        assert!(header(&request, "authorization").is_none());
        assert!(header(&request, "x-amz-content-sha256").is_none());
    }

    #[test]
    fn session_token_is_signed_in() {
        let mut credentials = creds();
        credentials.session_token = Some("TOKEN".to_string());
        let request = RequestBuilder::new("GET", "https://h/k")
            .build("h", Some(&credentials), "us-east-1", EMPTY_PAYLOAD_SHA256, timestamp())
            .unwrap();
        assert_eq!(header(&request, "x-amz-security-token"), Some("TOKEN"));
        let auth = header(&request, "authorization").unwrap();
        assert!(auth.contains("x-amz-security-token"));
    }
}
