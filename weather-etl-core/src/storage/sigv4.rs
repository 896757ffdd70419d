//! AWS Signature Version 4 for single-object `PUT` requests.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::StorageError;
use crate::secrets::StorageCredentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `kSigning` derived from the secret key, date (`YYYYMMDD`), region and service.
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, StorageError> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// URI-encode each segment of an object key, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Inputs of one signed upload.
#[derive(Debug)]
pub struct PutRequest<'a> {
    /// `host[:port]` exactly as sent.
    pub host: &'a str,
    /// Already encoded absolute path.
    pub canonical_uri: &'a str,
    pub content_type: &'a str,
    pub payload: &'a [u8],
    pub region: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Headers to attach to the request, `authorization` included.
pub fn sign_put(
    req: &PutRequest<'_>,
    credentials: &StorageCredentials,
) -> Result<Vec<(&'static str, String)>, StorageError> {
    let amz_date = req.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date = req.timestamp.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(req.payload);

    // Sorted by header name.
    let mut canonical: Vec<(&'static str, String)> = vec![
        ("content-type", req.content_type.to_string()),
        ("host", req.host.to_string()),
        ("x-amz-content-sha256", payload_hash.clone()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        canonical.push(("x-amz-security-token", token.clone()));
    }

    let canonical_headers: String = canonical
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = canonical
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "PUT\n{}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        req.canonical_uri
    );

    let scope = format!("{date}/{}/{SERVICE}/aws4_request", req.region);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, req.region, SERVICE)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );

    let mut headers: Vec<(&'static str, String)> = canonical
        .into_iter()
        .filter(|(name, _)| *name != "host")
        .collect();
    headers.push(("authorization", authorization));
    Ok(headers)
}
