// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::{Request, Response, RpcResult, Status};
use crate::registry::unix_now;
use crate::request::ServiceHooks;
use crate::service::AuthConfig;
use crate::AppResult;

use super::{HmacSigner, Signer};

pub const DEFAULT_MAX_SKEW: i64 = 60;
pub const ERR_CODE_FORBIDDEN: i32 = 403;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("request carries no signature")]
    Missing,
    #[error("unknown appid {0}")]
    UnknownAppid(String),
    #[error("signature does not verify")]
    BadSignature,
    #[error("signature was issued for appid {0}")]
    AppidMismatch(String),
    #[error("signature time {0} outside the accepted window")]
    Stale(i64),
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Signs `{<random key>: <random value>, appid, time}` for `appid`.
///
/// The random pair makes two signatures issued in the same second differ.
pub fn make_sign(signer: &dyn Signer, appid: &str, secret: &str, now: i64) -> AppResult<String> {
    let mut payload = Map::new();
    payload.insert(random_string(8), Value::String(random_string(16)));
    payload.insert("appid".to_string(), Value::String(appid.to_string()));
    payload.insert("time".to_string(), Value::from(now));
    signer.encode(&Value::Object(payload).to_string(), secret)
}

/// Service authentication hook checking request signatures.
///
/// A signature is accepted when it decodes under the secret of the
/// request's `appid`, names that same appid, and was issued no more than
/// `max_skew` seconds away from now in either direction.
pub struct SignatureAuth {
    signer: Arc<dyn Signer>,
    secrets: HashMap<String, String>,
    max_skew: i64,
}

impl SignatureAuth {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        SignatureAuth {
            signer: Arc::new(HmacSigner),
            secrets,
            max_skew: DEFAULT_MAX_SKEW,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.secrets.clone()).with_max_skew(config.max_skew)
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_max_skew(mut self, max_skew: i64) -> Self {
        self.max_skew = max_skew;
        self
    }

    pub fn verify(&self, request: &Request) -> Result<(), SignError> {
        self.verify_at(request, unix_now())
    }

    pub fn verify_at(&self, request: &Request, now: i64) -> Result<(), SignError> {
        if request.sign.is_empty() {
            return Err(SignError::Missing);
        }
        let secret = self
            .secrets
            .get(&request.appid)
            .ok_or_else(|| SignError::UnknownAppid(request.appid.clone()))?;
        let plain = self
            .signer
            .decode(&request.sign, secret)
            .ok_or(SignError::BadSignature)?;
        let payload: Value = serde_json::from_str(&plain).map_err(|_| SignError::BadSignature)?;

        let signed_appid = payload.get("appid").and_then(Value::as_str).unwrap_or_default();
        if signed_appid != request.appid {
            return Err(SignError::AppidMismatch(signed_appid.to_string()));
        }
        let time = payload
            .get("time")
            .and_then(Value::as_i64)
            .ok_or(SignError::BadSignature)?;
        if now.abs_diff(time) > self.max_skew.max(0) as u64 {
            return Err(SignError::Stale(time));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceHooks for SignatureAuth {
    async fn on_request(&self, request: &Request, response: &mut Response) -> bool {
        match self.verify(request) {
            Ok(()) => true,
            Err(e) => {
                debug!(
                    "reject request {} from appid `{}`: {}",
                    request.request_uuid, request.appid, e
                );
                response.status = Status::Forbidden;
                response.result = serde_json::to_value(RpcResult::error(ERR_CODE_FORBIDDEN, e.to_string()))
                    .unwrap_or(Value::Null);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn auth() -> SignatureAuth {
        let mut secrets = HashMap::new();
        secrets.insert("app1".to_string(), "secret-1".to_string());
        secrets.insert("app2".to_string(), "secret-2".to_string());
        SignatureAuth::new(secrets)
    }

    fn signed_request(appid: &str, sign: String) -> Request {
        Request {
            service: "Echo".into(),
            module: "Core".into(),
            action: "ping".into(),
            arg: Value::Null,
            request_uuid: "u-1".into(),
            appid: appid.into(),
            client_ip: String::new(),
            sign,
            client_arg: Value::Null,
        }
    }

    #[rstest]
    #[case(NOW - 59, true)]
    #[case(NOW - 60, true)]
    #[case(NOW - 61, false)]
    #[case(NOW + 59, true)]
    #[case(NOW + 61, false)]
    #[case(i64::MIN, false)]
    #[case(i64::MAX, false)]
    fn test_freshness_window(#[case] issued_at: i64, #[case] accepted: bool) {
        let sign = make_sign(&HmacSigner, "app1", "secret-1", issued_at).unwrap();
        let result = auth().verify_at(&signed_request("app1", sign), NOW);
        assert_eq!(result.is_ok(), accepted, "{:?}", result);
    }

    #[test]
    fn test_missing_sign() {
        let result = auth().verify_at(&signed_request("app1", String::new()), NOW);
        assert_eq!(result, Err(SignError::Missing));
    }

    #[test]
    fn test_unknown_appid() {
        let sign = make_sign(&HmacSigner, "app9", "secret-9", NOW).unwrap();
        let result = auth().verify_at(&signed_request("app9", sign), NOW);
        assert_eq!(result, Err(SignError::UnknownAppid("app9".into())));
    }

    #[test]
    fn test_wrong_secret() {
        let sign = make_sign(&HmacSigner, "app1", "not-the-secret", NOW).unwrap();
        let result = auth().verify_at(&signed_request("app1", sign), NOW);
        assert_eq!(result, Err(SignError::BadSignature));
    }

    #[test]
    fn test_appid_mismatch() {
        // signed for app2 with app1's secret, then presented as app1
        let sign = make_sign(&HmacSigner, "app2", "secret-1", NOW).unwrap();
        let result = auth().verify_at(&signed_request("app1", sign), NOW);
        assert_eq!(result, Err(SignError::AppidMismatch("app2".into())));
    }

    #[test]
    fn test_signatures_are_unique() {
        let a = make_sign(&HmacSigner, "app1", "secret-1", NOW).unwrap();
        let b = make_sign(&HmacSigner, "app1", "secret-1", NOW).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_hook_sets_forbidden() {
        let auth = auth();
        let mut response = Response::new(Status::Ok);
        let request = signed_request("app1", "garbage".into());
        assert!(!auth.on_request(&request, &mut response).await);
        assert_eq!(response.status, Status::Forbidden);
        assert_eq!(response.result["errCode"], ERR_CODE_FORBIDDEN);

        let sign = make_sign(&HmacSigner, "app1", "secret-1", unix_now()).unwrap();
        let mut response = Response::new(Status::Ok);
        assert!(auth.on_request(&signed_request("app1", sign), &mut response).await);
        assert_eq!(response.status, Status::Ok);
    }
}
