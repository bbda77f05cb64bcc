//! Aliyun (Alibaba Cloud) SMS.
//!
//! Calls the `SendSms` RPC action, signed with ACS3-HMAC-SHA256. Parameters
//! travel in the query string and the body is empty.
//!
//! Required keys: `accessKeyId`, `accessKeySecret`, `signName`, `templateCode`.
//! Optional: `endpoint`, `regionId`, `timeoutMs`, `dryRun`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::vendor::{self, VendorHttp};
use super::{params_json, validate_phone, SmsMessage, SmsProvider, SmsProviderFactory};
use crate::error::{DispatchError, Result};
use crate::notification::SenderConfiguration;
use crate::registry::Discoverable;

const DEFAULT_ENDPOINT: &str = "dysmsapi.aliyuncs.com";
const DEFAULT_REGION: &str = "cn-hangzhou";
const ACTION: &str = "SendSms";
const API_VERSION: &str = "2017-05-25";
const ALGORITHM: &str = "ACS3-HMAC-SHA256";

/// Business error codes that clear up on their own
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ServiceUnavailable",
    "InternalError",
    "isv.BUSINESS_LIMIT_CONTROL",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendSmsResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    biz_id: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AliyunSmsProvider {
    access_key_id: String,
    access_key_secret: String,
    sign_name: String,
    template_code: String,
    region_id: String,
    http: VendorHttp,
}

impl AliyunSmsProvider {
    pub fn from_config(config: &SenderConfiguration) -> Result<Self> {
        Ok(Self {
            access_key_id: config.require("accessKeyId")?.to_string(),
            access_key_secret: config.require("accessKeySecret")?.to_string(),
            sign_name: config.require("signName")?.to_string(),
            template_code: config.require("templateCode")?.to_string(),
            region_id: config.get("regionId").unwrap_or(DEFAULT_REGION).to_string(),
            http: VendorHttp::from_config(config, DEFAULT_ENDPOINT)?,
        })
    }

    /// Access key id with the tail masked, for logs
    fn masked_key(&self) -> String {
        let visible: String = self.access_key_id.chars().take(4).collect();
        format!("{}****", visible)
    }

    fn query(&self, message: &SmsMessage<'_>) -> BTreeMap<&'static str, String> {
        let mut query = BTreeMap::from([
            ("PhoneNumbers", message.phone.to_string()),
            ("SignName", self.sign_name.clone()),
            (
                "TemplateCode",
                message.template_code.unwrap_or(&self.template_code).to_string(),
            ),
        ]);
        if message.params.is_some() {
            query.insert("TemplateParam", params_json(message.params));
        }
        query
    }

    /// Signed headers for one request, including `Authorization`.
    fn signed_headers(
        &self,
        canonical_query: &str,
        date: &str,
        nonce: &str,
    ) -> BTreeMap<&'static str, String> {
        let mut headers = BTreeMap::from([
            ("host", self.http.host()),
            ("x-acs-action", ACTION.to_string()),
            ("x-acs-content-sha256", vendor::sha256_hex(b"")),
            ("x-acs-date", date.to_string()),
            ("x-acs-signature-nonce", nonce.to_string()),
            ("x-acs-version", API_VERSION.to_string()),
        ]);

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        let signed_names = headers.keys().copied().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "POST\n/\n{}\n{}\n{}\n{}",
            canonical_query,
            canonical_headers,
            signed_names,
            vendor::sha256_hex(b"")
        );
        let string_to_sign = format!(
            "{}\n{}",
            ALGORITHM,
            vendor::sha256_hex(canonical_request.as_bytes())
        );
        let signature = hex::encode(vendor::hmac_sha256(
            self.access_key_secret.as_bytes(),
            string_to_sign.as_bytes(),
        ));

        headers.insert(
            "authorization",
            format!(
                "{} Credential={},SignedHeaders={},Signature={}",
                ALGORITHM, self.access_key_id, signed_names, signature
            ),
        );
        headers
    }
}

/// RFC 3986 query string, keys sorted.
fn canonical_query(query: &BTreeMap<&'static str, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn business_error(response: SendSmsResponse) -> DispatchError {
    let message = format!(
        "aliyun rejected SendSms: {} {} (request {})",
        response.code,
        response.message.unwrap_or_default(),
        response.request_id.unwrap_or_default()
    );
    if TRANSIENT_CODES
        .iter()
        .any(|code| response.code.starts_with(code))
    {
        DispatchError::TransientProvider(message)
    } else {
        DispatchError::Provider(message)
    }
}

#[async_trait]
impl SmsProvider for AliyunSmsProvider {
    fn name(&self) -> &str {
        "aliyun"
    }

    async fn send(&self, message: &SmsMessage<'_>) -> Result<String> {
        validate_phone(message.phone)?;

        let query = self.query(message);
        let canonical_query = canonical_query(&query);

        if self.http.dry_run {
            let biz_id = Uuid::new_v4().simple().to_string();
            tracing::info!(
                provider = "aliyun",
                endpoint = %self.http.endpoint,
                access_key = %self.masked_key(),
                query = %canonical_query,
                biz_id = %biz_id,
                "Dry run, SendSms not sent"
            );
            return Ok(biz_id);
        }

        let date = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let headers = self.signed_headers(&canonical_query, &date, &nonce);

        let mut url = self.http.endpoint.clone();
        url.set_path("/");
        url.set_query(Some(&canonical_query));

        let mut request = self.http.client.post(url);
        for (name, value) in headers.iter().filter(|(name, _)| **name != "host") {
            request = request.header(*name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| vendor::transport_error("aliyun", &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| vendor::transport_error("aliyun", &e))?;

        if !status.is_success() {
            return Err(vendor::status_error("aliyun", status, &body));
        }

        let parsed: SendSmsResponse = serde_json::from_str(&body)
            .map_err(|e| DispatchError::Provider(format!("aliyun: unreadable response: {}", e)))?;
        if !parsed.code.eq_ignore_ascii_case("OK") {
            return Err(business_error(parsed));
        }

        let biz_id = parsed
            .biz_id
            .or(parsed.request_id)
            .unwrap_or_else(|| nonce.clone());
        tracing::info!(
            provider = "aliyun",
            region = %self.region_id,
            access_key = %self.masked_key(),
            phone = %message.phone,
            biz_id = %biz_id,
            "SendSms accepted"
        );
        Ok(biz_id)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AliyunSmsProviderFactory;

impl Discoverable for AliyunSmsProviderFactory {
    fn kind(&self) -> &str {
        "aliyun"
    }
}

impl SmsProviderFactory for AliyunSmsProviderFactory {
    fn build(&self, config: &SenderConfiguration) -> Result<Arc<dyn SmsProvider>> {
        Ok(Arc::new(AliyunSmsProvider::from_config(config)?))
    }
}
