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

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric string codec keyed by a shared secret.
///
/// `decode(encode(s, k), k) == Some(s)`; decoding with any other key, or a
/// tampered token, yields `None`.
pub trait Signer: Send + Sync {
    fn encode(&self, plain: &str, secret: &str) -> AppResult<String>;

    fn decode(&self, token: &str, secret: &str) -> Option<String>;
}

/// `base64url(payload) "." base64url(HMAC-SHA256(secret, base64url(payload)))`
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSigner;

fn new_mac(secret: &str) -> AppResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::InvalidValue(format!("signing secret: {}", e)))
}

impl Signer for HmacSigner {
    fn encode(&self, plain: &str, secret: &str) -> AppResult<String> {
        let payload = URL_SAFE_NO_PAD.encode(plain.as_bytes());
        let mut mac = new_mac(secret)?;
        mac.update(payload.as_bytes());
        let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, tag))
    }

    fn decode(&self, token: &str, secret: &str) -> Option<String> {
        let (payload, tag) = token.split_once('.')?;
        let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let mut mac = new_mac(secret).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&tag).ok()?;
        let plain = URL_SAFE_NO_PAD.decode(payload).ok()?;
        String::from_utf8(plain).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let signer = HmacSigner;
        let token = signer.encode(r#"{"appid":"app1"}"#, "k1").unwrap();
        assert_eq!(
            signer.decode(&token, "k1").as_deref(),
            Some(r#"{"appid":"app1"}"#)
        );
    }

    #[test]
    fn test_wrong_secret() {
        let signer = HmacSigner;
        let token = signer.encode("payload", "k1").unwrap();
        assert!(signer.decode(&token, "k2").is_none());
    }

    #[test]
    fn test_tampered_payload() {
        let signer = HmacSigner;
        let token = signer.encode("payload", "k1").unwrap();
        let (_, tag) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode("other"), tag);
        assert!(signer.decode(&forged, "k1").is_none());
        assert!(signer.decode("no-separator", "k1").is_none());
    }
}
