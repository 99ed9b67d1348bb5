use crate::payments::error::{GatewayError, GatewayResult};
use crate::payments::types::{GatewayParams, GatewayResponse};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

/// Thin reqwest wrapper for the gateway's form-encoded endpoints.
///
/// Redirects are never followed. 4xx answers are handed back as data;
/// 5xx answers become [`GatewayError::ServerError`].
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
    timeout: Duration,
}

impl GatewayHttpClient {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Configuration {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    pub async fn post_form(&self, url: &str, params: &GatewayParams) -> GatewayResult<GatewayResponse> {
        let timeout_secs = self.timeout.as_secs();
        let response = self
            .client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encode_form(params))
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(e, timeout_secs))?;

        if status.is_server_error() {
            warn!(status = %status, "gateway returned server error");
            return Err(GatewayError::ServerError {
                status: status.as_u16(),
                body: text.chars().take(512).collect(),
            });
        }
        if status.is_client_error() {
            warn!(status = %status, "gateway returned client error, parsing body as data");
        }

        let params = parse_form_response(&text)?;
        debug!(status = %status, fields = params.len(), "gateway response parsed");
        Ok(GatewayResponse {
            http_status: status.as_u16(),
            params,
        })
    }
}

/// `application/x-www-form-urlencoded` body with blank values dropped.
pub fn encode_form(params: &GatewayParams) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        if !value.trim().is_empty() {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Base URL with `params` appended as the query string.
pub fn build_url(base: &str, params: &GatewayParams) -> GatewayResult<String> {
    let mut url = Url::parse(base).map_err(|e| GatewayError::Configuration {
        message: format!("invalid gateway URL '{}': {}", base, e),
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}

/// Decodes a form-encoded gateway body. Anything that does not look like
/// `k=v&k=v` (HTML error pages, JSON, bare text) is rejected.
pub fn parse_form_response(body: &str) -> GatewayResult<GatewayParams> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidResponse {
            message: "empty response body".to_string(),
        });
    }
    if trimmed.starts_with('<') || trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Err(GatewayError::InvalidResponse {
            message: "response body is not form encoded".to_string(),
        });
    }
    if trimmed
        .split('&')
        .any(|segment| !segment.is_empty() && !segment.contains('='))
    {
        return Err(GatewayError::InvalidResponse {
            message: "response body is not form encoded".to_string(),
        });
    }

    let params: GatewayParams = form_urlencoded::parse(trimmed.as_bytes())
        .into_owned()
        .collect();
    if params.is_empty() {
        return Err(GatewayError::InvalidResponse {
            message: "response body has no fields".to_string(),
        });
    }
    Ok(params)
}

/// Numeric-looking strings become JSON numbers; everything else stays text.
/// Integers with leading zeros are left alone so no digits are lost.
pub fn coerce_value(value: &str) -> JsonValue {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if all_digits(digits) && (digits == "0" || !digits.starts_with('0')) {
        if let Ok(n) = value.parse::<i64>() {
            return JsonValue::from(n);
        }
    }
    if let Some((int_part, frac_part)) = digits.split_once('.') {
        if all_digits(int_part) && all_digits(frac_part) {
            if let Some(n) = value
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                return JsonValue::Number(n);
            }
        }
    }
    JsonValue::String(value.to_string())
}

/// Major units to the gateway's integer minor units (x100, half-up).
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount.clone() * BigDecimal::from(100))
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
}

/// HMAC-SHA256 of `payload` compared against a hex signature of either case.
pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_ascii_lowercase().as_bytes(),
    )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
