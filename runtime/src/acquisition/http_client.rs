//! HTTP gateway wrapping reqwest.
//!
//! Every upstream call goes through [`HttpGateway`] so that proxy rotation,
//! browser-like headers, the cookie jar and the request timeout are applied
//! uniformly. Redirects are either followed or handed back to the caller,
//! because the login and claim flows read success out of `Location` headers.

use crate::acquisition::proxy::{ProxyEndpoint, ProxyProvider};
use crate::error::AcquireError;
use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, LOCATION, ORIGIN, REFERER,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Redirect limit when following.
const MAX_REDIRECTS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120.0.0.0 Safari/537.36";

/// Response from an upstream request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Requested URL.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Raw `Location` header, if any.
    pub location: Option<String>,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// The redirect target resolved against the requested URL.
    pub fn redirect_target(&self) -> Option<String> {
        if !self.is_redirect() {
            return None;
        }
        let location = self.location.as_deref()?.trim();
        if location.is_empty() {
            return None;
        }
        match url::Url::parse(&self.url).and_then(|base| base.join(location)) {
            Ok(resolved) => Some(resolved.to_string()),
            Err(_) => Some(location.to_string()),
        }
    }
}

/// Whether the gateway follows redirects for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Redirects {
    Follow,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<ProxyEndpoint>,
    redirects: Redirects,
}

/// Shared HTTP transport for one run.
///
/// reqwest binds proxies at client construction, so one client is built per
/// (proxy, redirect policy) pair. All of them share a single cookie jar.
pub struct HttpGateway {
    jar: Arc<Jar>,
    headers: HeaderMap,
    timeout: Duration,
    proxies: Mutex<Box<dyn ProxyProvider>>,
    clients: Mutex<HashMap<ClientKey, reqwest::Client>>,
}

impl HttpGateway {
    /// Create a gateway whose `Origin`/`Referer` headers point at `site_origin`.
    pub fn new(site_origin: &str, proxies: Box<dyn ProxyProvider>, timeout: Duration) -> Self {
        Self {
            jar: Arc::new(Jar::default()),
            headers: browser_headers(site_origin),
            timeout,
            proxies: Mutex::new(proxies),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// GET a URL.
    pub async fn get(&self, url: &str, redirects: Redirects) -> Result<HttpResponse, AcquireError> {
        let client = self.client_for(redirects)?;
        let r = client.get(url).send().await?;
        read_response(url, r).await
    }

    /// POST url-encoded form fields.
    pub async fn post_form(
        &self,
        url: &str,
        form_fields: &[(&str, String)],
        redirects: Redirects,
    ) -> Result<HttpResponse, AcquireError> {
        let client = self.client_for(redirects)?;
        let r = client.post(url).form(form_fields).send().await?;
        read_response(url, r).await
    }

    fn client_for(&self, redirects: Redirects) -> Result<reqwest::Client, AcquireError> {
        let proxy = lock(&self.proxies).next_proxy();
        if let Some(p) = &proxy {
            tracing::debug!("using proxy {p}");
        }

        let key = ClientKey { proxy, redirects };
        let mut clients = lock(&self.clients);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build_client(&key)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn build_client(&self, key: &ClientKey) -> Result<reqwest::Client, AcquireError> {
        let policy = match key.redirects {
            Redirects::Follow => reqwest::redirect::Policy::limited(MAX_REDIRECTS),
            Redirects::Manual => reqwest::redirect::Policy::none(),
        };

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(policy)
            .user_agent(USER_AGENT)
            .default_headers(self.headers.clone())
            .cookie_provider(Arc::clone(&self.jar));

        if let Some(proxy) = &key.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }

        Ok(builder.build()?)
    }
}

async fn read_response(url: &str, r: reqwest::Response) -> Result<HttpResponse, AcquireError> {
    let status = r.status().as_u16();
    let location = r
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let body = r.text().await?;

    tracing::debug!("{url} -> {status}");
    Ok(HttpResponse {
        url: url.to_string(),
        status,
        location,
        body,
    })
}

fn browser_headers(site_origin: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(origin) = HeaderValue::from_str(site_origin) {
        headers.insert(REFERER, origin.clone());
        headers.insert(ORIGIN, origin);
    }
    headers
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
