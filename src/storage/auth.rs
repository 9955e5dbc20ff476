//! Google 服务账号认证
//!
//! 用服务账号私钥签发 RS256 JWT，换取 OAuth 访问令牌并缓存到过期前。

use crate::error::{classify_status, SyncError, SyncResult};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// 令牌有效期（秒）
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// 提前刷新的余量
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// service_account.json 中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    /// 从文件加载，文件缺失或格式错误都属于配置错误
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                SyncError::Config(format!("找不到服务账号文件: {}", path.display()))
            }
            _ => SyncError::Config(format!("读取服务账号文件失败: {}", e)),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> SyncResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("服务账号文件无效，请检查内容: {}", e)))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// 访问令牌提供者
pub struct TokenProvider {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> SyncResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SyncError::Config(format!("服务账号私钥无效: {}", e)))?;

        Ok(Self {
            client,
            key,
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// 获取有效的访问令牌，必要时重新换取
    pub async fn access_token(&self) -> SyncResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.access_token.clone();
        *cached = Some(token);
        Ok(value)
    }

    fn signed_assertion(&self) -> SyncResult<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| SyncError::Fatal(format!("签发 JWT 失败: {}", e)))
    }

    async fn fetch_token(&self) -> SyncResult<CachedToken> {
        let assertion = self.signed_assertion()?;
        debug!("换取访问令牌: {}", self.key.client_email);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body).context("换取访问令牌"));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS as u64));

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        })
    }
}
