//! Tencent Cloud SMS.
//!
//! Calls `SendSms` (API version 2021-01-11) with a JSON body signed with
//! TC3-HMAC-SHA256.
//!
//! Required keys: `secretId`, `secretKey`, `sdkAppId`, `signName`, `templateId`.
//! Optional: `region`, `endpoint`, `timeoutMs`, `dryRun`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::vendor::{self, VendorHttp};
use super::{validate_phone, SmsMessage, SmsProvider, SmsProviderFactory};
use crate::error::{DispatchError, Result};
use crate::notification::{SenderConfiguration, TemplateArgs};
use crate::registry::Discoverable;
use crate::template::value_to_text;

const DEFAULT_ENDPOINT: &str = "sms.tencentcloudapi.com";
const DEFAULT_REGION: &str = "ap-guangzhou";
const SERVICE: &str = "sms";
const ACTION: &str = "SendSms";
const API_VERSION: &str = "2021-01-11";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendSmsRequest<'a> {
    phone_number_set: Vec<String>,
    sms_sdk_app_id: &'a str,
    sign_name: &'a str,
    template_id: &'a str,
    template_param_set: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseBody {
    #[serde(default)]
    send_status_set: Vec<SendStatus>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendStatus {
    #[serde(default)]
    serial_no: Option<String>,
    code: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct TencentSmsProvider {
    secret_id: String,
    secret_key: String,
    sdk_app_id: String,
    sign_name: String,
    template_id: String,
    region: String,
    http: VendorHttp,
}

impl TencentSmsProvider {
    pub fn from_config(config: &SenderConfiguration) -> Result<Self> {
        let sdk_app_id = config.require("sdkAppId")?;
        if !sdk_app_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(DispatchError::Configuration(format!(
                "sdkAppId must be numeric, got '{}'",
                sdk_app_id
            )));
        }

        Ok(Self {
            secret_id: config.require("secretId")?.to_string(),
            secret_key: config.require("secretKey")?.to_string(),
            sdk_app_id: sdk_app_id.to_string(),
            sign_name: config.require("signName")?.to_string(),
            template_id: config.require("templateId")?.to_string(),
            region: config.get("region").unwrap_or(DEFAULT_REGION).to_string(),
            http: VendorHttp::from_config(config, DEFAULT_ENDPOINT)?,
        })
    }

    fn payload(&self, message: &SmsMessage<'_>) -> Result<String> {
        let request = SendSmsRequest {
            phone_number_set: vec![to_e164(message.phone)],
            sms_sdk_app_id: &self.sdk_app_id,
            sign_name: &self.sign_name,
            template_id: message.template_code.unwrap_or(&self.template_id),
            template_param_set: template_params(message.params),
        };
        Ok(serde_json::to_string(&request)?)
    }

    /// `Authorization` header value for `payload` sent at `timestamp`.
    fn authorization(&self, payload: &str, timestamp: i64) -> String {
        let date = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();

        let canonical_request = format!(
            "POST\n/\n\ncontent-type:{}\nhost:{}\n\ncontent-type;host\n{}",
            CONTENT_TYPE,
            self.http.host(),
            vendor::sha256_hex(payload.as_bytes())
        );
        let scope = format!("{}/{}/tc3_request", date, SERVICE);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            timestamp,
            scope,
            vendor::sha256_hex(canonical_request.as_bytes())
        );

        let secret_date = vendor::hmac_sha256(
            format!("TC3{}", self.secret_key).as_bytes(),
            date.as_bytes(),
        );
        let secret_service = vendor::hmac_sha256(&secret_date, SERVICE.as_bytes());
        let secret_signing = vendor::hmac_sha256(&secret_service, b"tc3_request");
        let signature = hex::encode(vendor::hmac_sha256(
            &secret_signing,
            string_to_sign.as_bytes(),
        ));

        format!(
            "{} Credential={}/{}, SignedHeaders=content-type;host, Signature={}",
            ALGORITHM, self.secret_id, scope, signature
        )
    }
}

/// Tencent expects E.164 numbers; bare mainland numbers get `+86`.
fn to_e164(phone: &str) -> String {
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+86{}", phone)
    }
}

/// Tencent templates take an ordered list of strings.
fn template_params(params: Option<&TemplateArgs>) -> Vec<String> {
    match params {
        Some(TemplateArgs::Positional(values)) => values.iter().map(value_to_text).collect(),
        Some(TemplateArgs::Named(map)) => map.values().map(value_to_text).collect(),
        None => Vec::new(),
    }
}

fn is_transient_code(code: &str) -> bool {
    code.starts_with("InternalError") || code.starts_with("RequestLimitExceeded")
}

fn rejected(code: &str, message: &str, request_id: Option<&str>) -> DispatchError {
    let text = format!(
        "tencent rejected SendSms: {} {} (request {})",
        code,
        message,
        request_id.unwrap_or_default()
    );
    if is_transient_code(code) {
        DispatchError::TransientProvider(text)
    } else {
        DispatchError::Provider(text)
    }
}

#[async_trait]
impl SmsProvider for TencentSmsProvider {
    fn name(&self) -> &str {
        "tencent"
    }

    async fn send(&self, message: &SmsMessage<'_>) -> Result<String> {
        validate_phone(message.phone)?;
        let payload = self.payload(message)?;

        if self.http.dry_run {
            let serial_no = Uuid::new_v4().to_string();
            tracing::info!(
                provider = "tencent",
                endpoint = %self.http.endpoint,
                secret_id = %self.secret_id,
                payload = %payload,
                serial_no = %serial_no,
                "Dry run, SendSms not sent"
            );
            return Ok(serial_no);
        }

        let timestamp = Utc::now().timestamp();
        let response = self
            .http
            .client
            .post(self.http.endpoint.clone())
            .header("authorization", self.authorization(&payload, timestamp))
            .header("content-type", CONTENT_TYPE)
            .header("x-tc-action", ACTION)
            .header("x-tc-version", API_VERSION)
            .header("x-tc-timestamp", timestamp.to_string())
            .header("x-tc-region", &self.region)
            .body(payload)
            .send()
            .await
            .map_err(|e| vendor::transport_error("tencent", &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| vendor::transport_error("tencent", &e))?;
        if !status.is_success() {
            return Err(vendor::status_error("tencent", status, &body));
        }

        let Envelope { response } = serde_json::from_str(&body)
            .map_err(|e| DispatchError::Provider(format!("tencent: unreadable response: {}", e)))?;
        let request_id = response.request_id.as_deref();

        if let Some(error) = &response.error {
            return Err(rejected(&error.code, &error.message, request_id));
        }

        let status = response.send_status_set.first().ok_or_else(|| {
            DispatchError::Provider("tencent: response carried no send status".into())
        })?;
        if !status.code.eq_ignore_ascii_case("Ok") {
            return Err(rejected(
                &status.code,
                status.message.as_deref().unwrap_or_default(),
                request_id,
            ));
        }

        let serial_no = status
            .serial_no
            .clone()
            .or_else(|| response.request_id.clone())
            .unwrap_or_default();
        tracing::info!(
            provider = "tencent",
            region = %self.region,
            phone = %to_e164(message.phone),
            serial_no = %serial_no,
            "SendSms accepted"
        );
        Ok(serial_no)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TencentSmsProviderFactory;

impl Discoverable for TencentSmsProviderFactory {
    fn kind(&self) -> &str {
        "tencent"
    }
}

impl SmsProviderFactory for TencentSmsProviderFactory {
    fn build(&self, config: &SenderConfiguration) -> Result<Arc<dyn SmsProvider>> {
        Ok(Arc::new(TencentSmsProvider::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::sms::vendor::mock;
    use serde_json::json;

    fn config() -> SenderConfiguration {
        SenderConfiguration::new()
            .with("secretId", "AKID")
            .with("secretKey", "key")
            .with("sdkAppId", "1400000000")
            .with("signName", "Acme")
            .with("templateId", "449739")
    }

    fn message<'a>(template_code: Option<&'a str>, params: Option<&'a TemplateArgs>) -> SmsMessage<'a> {
        SmsMessage {
            phone: "13800000000",
            body: "code 1234",
            template_code,
            params,
        }
    }

    #[test]
    fn test_required_keys() {
        assert!(TencentSmsProvider::from_config(&config()).is_ok());

        let partial: SenderConfiguration = config().iter().filter(|(k, _)| *k != "templateId").collect();
        assert!(matches!(
            TencentSmsProvider::from_config(&partial),
            Err(DispatchError::Configuration(_))
        ));

        let non_numeric = config().with("sdkAppId", "app");
        assert!(TencentSmsProvider::from_config(&non_numeric).is_err());
    }

    #[test]
    fn test_e164() {
        assert_eq!(to_e164("13800000000"), "+8613800000000");
        assert_eq!(to_e164("+15550001111"), "+15550001111");
    }

    #[test]
    fn test_payload_uses_override_template_and_ordered_params() {
        let provider = TencentSmsProvider::from_config(&config()).unwrap();
        let args = TemplateArgs::named(json!({"name": "Bob", "code": 1234})).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&provider.payload(&message(Some("123456"), Some(&args))).unwrap())
                .unwrap();

        assert_eq!(payload["TemplateId"], "123456");
        assert_eq!(payload["SmsSdkAppId"], "1400000000");
        assert_eq!(payload["PhoneNumberSet"], json!(["+8613800000000"]));
        assert_eq!(payload["TemplateParamSet"], json!(["Bob", "1234"]));
    }

    #[test]
    fn test_authorization_scope() {
        let provider = TencentSmsProvider::from_config(&config()).unwrap();
        // 2019-02-25T00:44:30Z
        let auth = provider.authorization("{}", 1_551_055_470);
        assert!(auth.starts_with(
            "TC3-HMAC-SHA256 Credential=AKID/2019-02-25/sms/tc3_request, \
             SignedHeaders=content-type;host, Signature="
        ));
        let signature = auth.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert_ne!(auth, provider.authorization("{\"a\":1}", 1_551_055_470));
    }

    #[tokio::test]
    async fn test_send_returns_serial_no() {
        let vendor = mock::serve(
            200,
            r#"{"Response":{"SendStatusSet":[{"SerialNo":"2019:123","PhoneNumber":"+8613800000000","Code":"Ok","Message":"send success"}],"RequestId":"r-1"}}"#,
        )
        .await;
        let provider =
            TencentSmsProvider::from_config(&config().with("endpoint", vendor.url.as_str())).unwrap();

        let id = provider.send(&message(None, None)).await.unwrap();
        assert_eq!(id, "2019:123");

        let requests = vendor.requests();
        assert_eq!(requests[0].headers["x-tc-action"], "SendSms");
        assert_eq!(requests[0].headers["x-tc-region"], DEFAULT_REGION);
        assert!(requests[0].body.contains("\"SignName\":\"Acme\""));
    }

    #[tokio::test]
    async fn test_vendor_failures_are_classified() {
        let cases = [
            (502, "bad gateway".to_string(), true),
            (403, "forbidden".to_string(), false),
            (
                200,
                json!({"Response": {"Error": {"Code": "InternalError.Timeout", "Message": "x"}, "RequestId": "r"}}).to_string(),
                true,
            ),
            (
                200,
                json!({"Response": {"Error": {"Code": "AuthFailure.SignatureFailure", "Message": "x"}, "RequestId": "r"}}).to_string(),
                false,
            ),
            (
                200,
                json!({"Response": {"SendStatusSet": [{"Code": "FailedOperation.PhoneNumberInBlacklist", "Message": "x"}], "RequestId": "r"}}).to_string(),
                false,
            ),
        ];

        for (status, body, transient) in cases {
            let vendor = mock::serve(status, &body).await;
            let provider =
                TencentSmsProvider::from_config(&config().with("endpoint", vendor.url.as_str()))
                    .unwrap();
            let err = provider.send(&message(None, None)).await.unwrap_err();
            assert_eq!(err.is_retryable(), transient, "{} {}", status, body);
        }
    }
}
