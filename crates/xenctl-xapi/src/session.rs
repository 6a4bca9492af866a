//! Authenticated XenAPI session.
//!
//! A [`Session`] owns the login token, the method catalog fetched at login
//! and the namespaces resolved from it. Every gated call made through the
//! session gets the token prepended as its first argument; callers never
//! pass it themselves. The token is never mutated after login, so a
//! `&Session` can be shared across concurrent calls.

use crate::catalog::MethodCatalog;
use crate::credentials::SecretPrompt;
use crate::error::{XenError, XenErrorKind, XenResult};
use crate::gateway::{Gateway, HttpTransport};
use crate::namespace::{Namespace, NamespaceResolver};
use crate::task::PollPolicy;
use crate::types::XenConfig;
use crate::value::XmlRpcValue;

use log::{debug, info};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const LOGIN_METHOD: &str = "session.login_with_password";

pub struct Session {
    endpoint: Url,
    username: String,
    token: String,
    gateway: Gateway,
    catalog: MethodCatalog,
    resolver: NamespaceResolver,
    bulk: Client,
    poll: PollPolicy,
}

impl Session {
    /// Connect over HTTP(S) and log in. Prompts for the password when
    /// `password` is `None`.
    pub async fn open(
        config: &XenConfig,
        password: Option<SecretString>,
        prompt: &dyn SecretPrompt,
    ) -> XenResult<Self> {
        let endpoint = normalize_endpoint(&config.endpoint)?;
        let transport = HttpTransport::new(endpoint.clone(), config)?;
        Self::open_with_gateway(endpoint, Gateway::new(Arc::new(transport)), config, password, prompt)
            .await
    }

    /// Log in through an already constructed gateway.
    pub async fn open_with_gateway(
        endpoint: Url,
        gateway: Gateway,
        config: &XenConfig,
        password: Option<SecretString>,
        prompt: &dyn SecretPrompt,
    ) -> XenResult<Self> {
        let password = match password {
            Some(p) => p,
            None => prompt.prompt_secret(&format!(
                "Password for {}@{}: ",
                config.username,
                endpoint.host_str().unwrap_or_default()
            ))?,
        };

        let token = login(&gateway, &config.username, &password).await?;
        drop(password);

        let catalog = MethodCatalog::fetch(&gateway).await?;
        let mut resolver = NamespaceResolver::new();
        resolver.resolve(&catalog);

        let bulk = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| XenError::connection(format!("Failed to build bulk HTTP client: {e}")))?;

        info!(
            "logged in to {} as {} ({} namespaces)",
            endpoint,
            config.username,
            resolver.len()
        );

        Ok(Self {
            endpoint,
            username: config.username.clone(),
            token,
            gateway,
            catalog,
            resolver,
            bulk,
            poll: PollPolicy::from(config),
        })
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn host(&self) -> &str {
        self.endpoint.host_str().unwrap_or_default()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Opaque session reference issued by the server.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn catalog(&self) -> &MethodCatalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &NamespaceResolver {
        &self.resolver
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub(crate) fn bulk_client(&self) -> &Client {
        &self.bulk
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Gated call: `method(token, args…)`.
    pub async fn call(&self, method: &str, args: Vec<XmlRpcValue>) -> XenResult<XmlRpcValue> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(XmlRpcValue::string(self.token.as_str()));
        full.extend(args);
        self.gateway.call(method, &full).await
    }

    /// Dispatcher for any namespace, advertised or not.
    pub fn ns<'a>(&'a self, name: &'a str) -> Namespace<'a> {
        Namespace::new(self, name)
    }

    /// `namespace.method(token, args…)` without a typed binding.
    pub async fn invoke(
        &self,
        namespace: &str,
        method: &str,
        args: Vec<XmlRpcValue>,
    ) -> XenResult<XmlRpcValue> {
        self.ns(namespace).call(method, args).await
    }
}

async fn login(gateway: &Gateway, username: &str, password: &SecretString) -> XenResult<String> {
    debug!("{} as {}", LOGIN_METHOD, username);
    let args = [
        XmlRpcValue::string(username),
        XmlRpcValue::string(password.expose_secret().as_str()),
    ];
    match gateway.call(LOGIN_METHOD, &args).await {
        Ok(token) => token.into_string(),
        Err(e) if e.kind == XenErrorKind::RemoteError => Err(XenError {
            kind: XenErrorKind::AuthenticationError,
            message: format!("login as '{username}' rejected"),
            ..e
        }),
        Err(e) => Err(e),
    }
}

/// Turn `xen01`, `xen01:8080` or `https://xen01/` into a base URL.
/// Without a scheme, plain HTTP is assumed.
pub fn normalize_endpoint(raw: &str) -> XenResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(XenError::invalid_input("no server endpoint given"));
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| XenError::invalid_input(format!("invalid endpoint '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(XenError::invalid_input(format!(
            "unsupported scheme '{}' in endpoint '{raw}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(XenError::invalid_input(format!("endpoint '{raw}' has no host")));
    }
    if url.path().is_empty() {
        url.set_path("/");
    }
    Ok(url)
}
