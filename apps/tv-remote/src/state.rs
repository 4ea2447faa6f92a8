use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use adb_broker::DeviceBroker;
use axum::http::HeaderMap;
use tracing::debug;

use crate::auth::{
    cookie::{read_cookie, SESSION_COOKIE},
    CookieSigner, EmailAllowList, OidcClient, OidcConfig, UserIdentity,
};
use crate::config::AppConfig;
use crate::device::{Dispatcher, SessionManager};

const JWKS_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    dispatcher: Dispatcher,
    oidc: Option<Arc<OidcClient>>,
    cookies: CookieSigner,
    allow_list: Arc<EmailAllowList>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(cfg: &AppConfig, broker: Arc<dyn DeviceBroker>) -> Self {
        let oidc = match (&cfg.google_client_id, &cfg.google_client_secret) {
            (Some(client_id), Some(client_secret)) => Some(Arc::new(OidcClient::new(OidcConfig {
                discovery_url: cfg.google_discovery_url.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                redirect_uri: cfg.redirect_uri(),
                cache_ttl: JWKS_CACHE_TTL,
            }))),
            _ => None,
        };
        Self {
            start: Instant::now(),
            dispatcher: Dispatcher::new(SessionManager::new(cfg.device_endpoint(), broker)),
            oidc,
            cookies: CookieSigner::new(&cfg.secret_key, cfg.secure_cookies()),
            allow_list: Arc::new(cfg.allow_list()),
            session_ttl: cfg.session_ttl(),
        }
    }

    /// Replace the identity provider client, e.g. one built with fixed metadata.
    pub fn with_oidc(mut self, oidc: OidcClient) -> Self {
        self.oidc = Some(Arc::new(oidc));
        self
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &SessionManager {
        self.dispatcher.sessions()
    }

    pub fn oidc(&self) -> Option<&OidcClient> {
        self.oidc.as_deref()
    }

    pub fn cookies(&self) -> &CookieSigner {
        &self.cookies
    }

    pub fn allow_list(&self) -> &EmailAllowList {
        &self.allow_list
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Identity from the session cookie, if present and validly signed.
    /// Does not consult the allow-list.
    pub fn identify(&self, headers: &HeaderMap) -> Option<UserIdentity> {
        let raw = read_cookie(headers, SESSION_COOKIE)?;
        match self.cookies.open_session(raw, self.session_ttl) {
            Ok(user) => Some(user),
            Err(err) => {
                debug!(error = %err, "ignoring session cookie");
                None
            }
        }
    }
}
