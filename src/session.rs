//! Session facade bridging the token manager to the request layer

use crate::refresh_service::RefreshService;
use crate::token_manager::TokenManager;
use crate::token_store::TokenStore;
use crate::types::SessionConfig;
use async_singleflight::Group;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    LoggedOut,
}

/// The three operations the authenticated request layer needs
///
/// Request interception depends on this facade rather than on
/// [`TokenManager`] directly.
pub trait AuthContext: Send + Sync + 'static {
    /// Get a token guaranteed valid at return time, refreshing first if the
    /// manager deems a refresh due
    fn ensure_valid_token(&self) -> impl Future<Output = Option<String>> + Send;

    /// Run a refresh after a server-side rejection and report whether the
    /// session remains usable; on `false` the caller must not retry
    fn refresh_if_needed(&self) -> impl Future<Output = bool> + Send;

    /// Clear tokens and signal the surrounding session layer; idempotent
    fn logout(&self) -> impl Future<Output = ()> + Send;
}

/// Session context with deduplicated refresh and a logout signal
///
/// Concurrent refresh attempts collapse into one in-flight exchange via
/// singleflight; late callers wait for and share the leader's outcome.
/// Logout transitions are broadcast on a watch channel so the embedding
/// application can react (e.g. navigate to a sign-in surface).
pub struct SessionContext<S, R> {
    manager: TokenManager<S, R>,
    config: SessionConfig,
    /// Singleflight group so concurrent callers share one refresh exchange.
    /// Error type is String because singleflight requires a shared error type
    refresh_group: Group<String, String>,
    state_tx: watch::Sender<SessionState>,
}

impl<S: TokenStore, R: RefreshService> SessionContext<S, R> {
    /// Create a session context with default configuration
    pub fn new(store: S, refresh_service: R) -> Arc<Self> {
        Self::with_config(store, refresh_service, SessionConfig::default())
    }

    /// Create a session context
    ///
    /// Returns an `Arc` because the context is shared between the request
    /// layer and the optional background refresh task.
    pub fn with_config(store: S, refresh_service: R, config: SessionConfig) -> Arc<Self> {
        let manager = TokenManager::new(store, refresh_service)
            .with_refresh_before_expiry(config.refresh_before_expiry_secs);
        let (state_tx, _) = watch::channel(SessionState::Active);

        Arc::new(Self {
            manager,
            config,
            refresh_group: Group::new(),
            state_tx,
        })
    }

    /// Get the underlying token manager
    pub fn manager(&self) -> &TokenManager<S, R> {
        &self.manager
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to session state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Spawn the background auto-refresh task
    ///
    /// The task wakes on the configured interval and refreshes proactively
    /// while the access token is inside the refresh buffer and a refresh
    /// token is held. It stops on logout. The caller owns the handle;
    /// aborting it is the teardown path when the application exits without
    /// logging out.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            ctx.run_refresh_task().await;
        })
    }

    async fn run_refresh_task(&self) {
        info!(
            check_interval_secs = %self.config.refresh_check_interval_secs,
            refresh_before_expiry_secs = %self.config.refresh_before_expiry_secs,
            "Started auto-refresh task"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.refresh_check_interval_secs));
        let mut state = self.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.manager.has_refresh_token() || !self.manager.needs_refresh() {
                        continue;
                    }

                    debug!("Access token inside refresh buffer");
                    match self.refresh_singleflight().await {
                        Ok(_) => info!("Auto-refresh successful"),
                        Err(err) => {
                            // Next authenticated request surfaces the failure
                            warn!(error = %err, "Auto-refresh failed");
                        }
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow() == SessionState::LoggedOut {
                        break;
                    }
                }
            }
        }

        debug!("Auto-refresh task stopped");
    }

    /// Run one refresh, deduplicating concurrent callers
    ///
    /// Returns the fresh access token.
    async fn refresh_singleflight(&self) -> std::result::Result<String, String> {
        let key = "session".to_string();
        let (token, error, _shared) = self
            .refresh_group
            .work(&key, async {
                match self.manager.refresh().await {
                    Ok(refreshed) => Ok(refreshed.access_token),
                    Err(err) => Err(err.to_string()),
                }
            })
            .await;

        match (token, error) {
            (Some(token), None) => Ok(token),
            (None, Some(err)) => Err(err),
            _ => Err("unknown error during token refresh".to_string()),
        }
    }
}

impl<S: TokenStore, R: RefreshService> AuthContext for SessionContext<S, R> {
    async fn ensure_valid_token(&self) -> Option<String> {
        if !self.manager.needs_refresh() {
            return self.manager.current_valid_token();
        }

        match self.refresh_singleflight().await {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(error = %err, "Could not obtain a valid token");
                None
            }
        }
    }

    async fn refresh_if_needed(&self) -> bool {
        // Only invoked after a 401: the server has already asserted the
        // current token is bad even if local validation still passes, so
        // always run one (deduplicated) refresh.
        match self.refresh_singleflight().await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "Session is no longer usable");
                false
            }
        }
    }

    async fn logout(&self) {
        self.manager.clear();
        let previous = self.state_tx.send_replace(SessionState::LoggedOut);
        if previous != SessionState::LoggedOut {
            info!("Session logged out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, Result};
    use crate::test_support::make_jwt;
    use crate::token_store::MemoryTokenStore;
    use crate::types::{now_unix_seconds, RefreshedTokens};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingRefresh {
        calls: Arc<AtomicUsize>,
        delay_ms: u64,
        outcome: std::result::Result<String, bool>, // Ok(access) | Err(terminal)
    }

    impl CountingRefresh {
        fn succeeding(access: &str) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay_ms: 0,
                outcome: Ok(access.to_string()),
            }
        }

        fn failing(terminal: bool) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay_ms: 0,
                outcome: Err(terminal),
            }
        }

        fn with_delay(mut self, delay_ms: u64) -> Self {
            self.delay_ms = delay_ms;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RefreshService for CountingRefresh {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedTokens> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            match &self.outcome {
                Ok(access) => Ok(RefreshedTokens {
                    access_token: access.clone(),
                    refresh_token: Some("refresh_next".to_string()),
                }),
                Err(true) => Err(ClientError::RefreshTokenExpired("rejected".to_string())),
                Err(false) => Err(ClientError::RefreshTransport("unreachable".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_ensure_valid_token_skips_refresh_when_fresh() {
        let store = MemoryTokenStore::new();
        let live = make_jwt(now_unix_seconds() + 7200);
        store.set_tokens(&live, "refresh_1").unwrap();

        let service = CountingRefresh::succeeding("unused");
        let ctx = SessionContext::new(store, service.clone());

        assert_eq!(ctx.ensure_valid_token().await.unwrap(), live);
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_valid_token_refreshes_expired_token() {
        let store = MemoryTokenStore::new();
        let expired = make_jwt(now_unix_seconds() - 3600);
        store.set_tokens(&expired, "refresh_1").unwrap();

        let fresh = make_jwt(now_unix_seconds() + 7200);
        let service = CountingRefresh::succeeding(&fresh);
        let ctx = SessionContext::new(store.clone(), service.clone());

        assert_eq!(ctx.ensure_valid_token().await.unwrap(), fresh);
        assert_eq!(service.call_count(), 1);
        assert_eq!(store.access_token().unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_ensure_valid_token_refreshes_inside_buffer() {
        let store = MemoryTokenStore::new();
        // Valid, but within the 300 second refresh buffer
        let closing = make_jwt(now_unix_seconds() + 120);
        store.set_tokens(&closing, "refresh_1").unwrap();

        let fresh = make_jwt(now_unix_seconds() + 7200);
        let service = CountingRefresh::succeeding(&fresh);
        let ctx = SessionContext::new(store, service.clone());

        assert_eq!(ctx.ensure_valid_token().await.unwrap(), fresh);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_valid_token_returns_none_when_refresh_fails() {
        let store = MemoryTokenStore::new();
        store
            .set_tokens(&make_jwt(now_unix_seconds() - 10), "refresh_1")
            .unwrap();

        let ctx = SessionContext::new(store.clone(), CountingRefresh::failing(false));
        assert!(ctx.ensure_valid_token().await.is_none());
        // Failed refresh never leaves the stale token behind
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_storm_collapses_to_one_call() {
        let store = MemoryTokenStore::new();
        store
            .set_tokens(&make_jwt(now_unix_seconds() - 10), "refresh_1")
            .unwrap();

        let fresh = make_jwt(now_unix_seconds() + 7200);
        let service = CountingRefresh::succeeding(&fresh).with_delay(50);
        let ctx = SessionContext::new(store, service.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(
                async move { ctx.ensure_valid_token().await },
            ));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), fresh);
        }
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_needed_runs_even_when_token_looks_valid() {
        // Server-side early expiry: local validation passes but a 401 arrived
        let store = MemoryTokenStore::new();
        store
            .set_tokens(&make_jwt(now_unix_seconds() + 7200), "refresh_1")
            .unwrap();

        let fresh = make_jwt(now_unix_seconds() + 7200);
        let service = CountingRefresh::succeeding(&fresh);
        let ctx = SessionContext::new(store, service.clone());

        assert!(ctx.refresh_if_needed().await);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_if_needed_false_when_refresh_token_missing() {
        let store = MemoryTokenStore::new();
        store.set_access_only(&make_jwt(now_unix_seconds() + 7200));

        let service = CountingRefresh::succeeding("unused");
        let ctx = SessionContext::new(store.clone(), service.clone());

        assert!(!ctx.refresh_if_needed().await);
        // The manager never reached the service; it failed terminally first
        assert_eq!(service.call_count(), 0);
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_broadcasts() {
        let store = MemoryTokenStore::new();
        store.set_tokens("a", "r").unwrap();

        let ctx = SessionContext::new(store.clone(), CountingRefresh::succeeding("unused"));
        let mut state = ctx.subscribe();
        assert_eq!(*state.borrow(), SessionState::Active);

        ctx.logout().await;
        ctx.logout().await;

        assert_eq!(ctx.state(), SessionState::LoggedOut);
        assert!(store.access_token().is_none());
        assert!(state.changed().await.is_ok());
        assert_eq!(*state.borrow(), SessionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_task_refreshes_and_stops_on_logout() {
        let store = MemoryTokenStore::new();
        // Inside the refresh buffer from the start
        store
            .set_tokens(&make_jwt(now_unix_seconds() + 60), "refresh_1")
            .unwrap();

        let fresh = make_jwt(now_unix_seconds() + 7200);
        let service = CountingRefresh::succeeding(&fresh);
        let ctx = SessionContext::with_config(
            store.clone(),
            service.clone(),
            SessionConfig {
                refresh_before_expiry_secs: 300,
                refresh_check_interval_secs: 1,
            },
        );

        let handle = ctx.spawn_auto_refresh();

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.call_count(), 1);
        assert_eq!(store.access_token().unwrap(), fresh);

        ctx.logout().await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_task_idles_without_refresh_token() {
        let store = MemoryTokenStore::new();
        let service = CountingRefresh::succeeding("unused");
        let ctx = SessionContext::with_config(
            store,
            service.clone(),
            SessionConfig {
                refresh_before_expiry_secs: 300,
                refresh_check_interval_secs: 1,
            },
        );

        let handle = ctx.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(service.call_count(), 0);

        ctx.logout().await;
        handle.await.unwrap();
    }
}
