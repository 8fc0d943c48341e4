//! AWS Signature Version 4
//!
//! DynamoDB Local ignores the signature but rejects requests without a
//! well-formed `Authorization` header.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Key pair used when none is configured
pub const LOCAL_CREDENTIAL: &str = "local";

/// Access key and secret
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    /// Empty values fall back to [`LOCAL_CREDENTIAL`]
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        let or_local = |value: String| {
            if value.trim().is_empty() {
                LOCAL_CREDENTIAL.to_string()
            } else {
                value
            }
        };
        Self {
            access_key: or_local(access_key.into()),
            secret_key: or_local(secret_key.into()),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// The parts of an HTTP request covered by the signature
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Already canonical: sorted and encoded
    pub query: &'a str,
    /// Header names and values; every one is signed
    pub headers: Vec<(&'a str, &'a str)>,
    pub payload: &'a [u8],
}

/// Signs requests for one region and service
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    region: String,
    service: String,
}

impl RequestSigner {
    pub fn new(credentials: Credentials, region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// `Authorization` header value for `request` made at `time`.
    ///
    /// `request.headers` must include `x-amz-date` set to [`amz_date`]`(time)`.
    pub fn authorization(&self, request: &SignableRequest<'_>, time: DateTime<Utc>) -> String {
        let (canonical, signed_headers) = canonical_request(request);
        let scope = self.scope(time);
        let to_sign = string_to_sign(time, &scope, &canonical);

        let key = signing_key(
            &self.credentials.secret_key,
            &time.format("%Y%m%d").to_string(),
            &self.region,
            &self.service,
        );
        let signature = hex::encode(hmac(&key, to_sign.as_bytes()));

        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key, scope, signed_headers, signature
        )
    }

    fn scope(&self, time: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            time.format("%Y%m%d"),
            self.region,
            self.service
        )
    }
}

/// Timestamp format for the `x-amz-date` header
pub fn amz_date(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Canonical request text and the signed header list
pub fn canonical_request(request: &SignableRequest<'_>) -> (String, String) {
    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), collapse_whitespace(value)))
        .collect();
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        request.query,
        canonical_headers,
        signed_headers,
        sha256_hex(request.payload)
    );
    (canonical, signed_headers)
}

pub fn string_to_sign(time: DateTime<Utc>, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date(time),
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

/// Derived key for one day, region and service
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 takes any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
