//! Avatar refresh after a federated login. Always runs as a background task.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// Largest avatar we are willing to download.
pub const MAX_AVATAR_BYTES: usize = 1024 * 1024;

const GRAVATAR_SIZE: u32 = 128;

#[async_trait]
pub trait AvatarService: Send + Sync {
    async fn update_from_url(&self, user_id: Uuid, url: &str) -> anyhow::Result<()>;

    /// Look the email up on Gravatar. A missing Gravatar is not an error.
    async fn update_from_gravatar(&self, user_id: Uuid, email: &str) -> anyhow::Result<()>;
}

/// Where downloaded avatars end up.
#[async_trait]
pub trait AvatarStore: Send + Sync {
    async fn save_avatar(&self, user_id: Uuid, content_type: &str, data: &[u8]) -> anyhow::Result<()>;
}

pub fn gravatar_url(email: &str) -> String {
    let hash = hex::encode(Sha256::digest(email.trim().to_lowercase().as_bytes()));
    format!(
        "https://www.gravatar.com/avatar/{}?s={}&d=404",
        hash, GRAVATAR_SIZE
    )
}

/// Avatar URLs come from third parties. Only hosts that resolve exclusively
/// to public addresses are fetched, and redirects are not followed since
/// their targets would skip that check.
pub struct HttpAvatarService {
    http: reqwest::Client,
    store: Arc<dyn AvatarStore>,
}

impl HttpAvatarService {
    pub fn new(timeout: Duration, store: Arc<dyn AvatarStore>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("login-service/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, store })
    }

    /// Download an image. `Ok(None)` when the server says there is none.
    async fn download(&self, url: &str) -> anyhow::Result<Option<(String, Vec<u8>)>> {
        let url = Url::parse(url)?;
        ensure_public_host(&url).await?;
        let mut response = self.http.get(url.clone()).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("avatar download from {} returned {}", url, status);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        check_content_type(&content_type)?;

        if let Some(len) = response.content_length() {
            if len as usize > MAX_AVATAR_BYTES {
                anyhow::bail!("avatar is {} bytes, limit is {}", len, MAX_AVATAR_BYTES);
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if data.len() + chunk.len() > MAX_AVATAR_BYTES {
                anyhow::bail!("avatar exceeds {} bytes", MAX_AVATAR_BYTES);
            }
            data.extend_from_slice(&chunk);
        }
        Ok(Some((content_type, data)))
    }
}

/// Fail unless every address `url`'s host resolves to is publicly routable.
pub async fn ensure_public_host(url: &Url) -> anyhow::Result<()> {
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("unsupported avatar URL scheme {}", url.scheme());
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<IpAddr> = match url.host() {
        Some(url::Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(url::Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(url::Host::Domain(name)) => tokio::net::lookup_host((name, port))
            .await?
            .map(|addr| addr.ip())
            .collect(),
        None => anyhow::bail!("avatar URL has no host"),
    };

    if addrs.is_empty() {
        anyhow::bail!("avatar host did not resolve");
    }
    if let Some(ip) = addrs.iter().find(|ip| !is_public_ip(**ip)) {
        anyhow::bail!("avatar host resolves to non-public address {}", ip);
    }
    Ok(())
}

fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_ipv4(v4),
            None => is_public_ipv6(v6),
        },
    }
}

fn is_public_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19))
        || a >= 240)
}

fn is_public_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8))
}

fn check_content_type(content_type: &str) -> anyhow::Result<()> {
    if content_type.trim().to_lowercase().starts_with("image/") {
        Ok(())
    } else {
        anyhow::bail!("unexpected avatar content type {:?}", content_type)
    }
}

#[async_trait]
impl AvatarService for HttpAvatarService {
    async fn update_from_url(&self, user_id: Uuid, url: &str) -> anyhow::Result<()> {
        match self.download(url).await? {
            Some((content_type, data)) => {
                self.store.save_avatar(user_id, &content_type, &data).await?;
                tracing::debug!(%user_id, bytes = data.len(), "Avatar updated");
                Ok(())
            }
            None => anyhow::bail!("avatar not found at {}", url),
        }
    }

    async fn update_from_gravatar(&self, user_id: Uuid, email: &str) -> anyhow::Result<()> {
        match self.download(&gravatar_url(email)).await? {
            Some((content_type, data)) => {
                self.store.save_avatar(user_id, &content_type, &data).await?;
                tracing::debug!(%user_id, "Gravatar avatar stored");
            }
            None => tracing::debug!(%user_id, "No Gravatar for user"),
        }
        Ok(())
    }
}
