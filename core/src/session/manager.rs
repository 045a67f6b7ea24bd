//! Request signing and the refresh-and-retry protocol.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};

use crate::error::{GymError, GymResult};
use crate::network::http::{AUTHORIZATION, ApiRequest, ApiResponse, HttpTransport};
use crate::network::protocol::{
    LOGIN_PATH, LoginRequest, LoginResponse, REFRESH_PATH, RefreshRequest, RefreshResponse,
};

use super::store::SessionRecords;
use super::{CredentialStore, LOGIN_ROUTE, Role, Session, SessionEvent, TerminationReason};

const EVENT_CAPACITY: usize = 32;

/// Owns the [`Session`] and wraps every authenticated call.
///
/// Only [`login`](Self::login), the refresh path inside
/// [`execute`](Self::execute) and [`logout`](Self::logout) write the session.
/// Refreshes are serialized: a request that hits 401 while another request
/// is refreshing waits for that refresh and reuses the new token.
pub struct SessionManager {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    session: RwLock<Session>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager, restoring any credentials found in `store`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> GymResult<Self> {
        let session = store.load_session()?;
        if session.is_authenticated() {
            tracing::info!(role = ?session.role(), "Restored persisted session");
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            transport,
            store,
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
            events,
        })
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.session.read().role()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Exchange credentials for a session.
    ///
    /// On failure the current session is left as it was.
    pub async fn login(&self, identifier: &str, secret: &str) -> GymResult<Session> {
        let request = ApiRequest::post(LOGIN_PATH).with_json(&LoginRequest {
            identifier: identifier.trim(),
            secret,
        })?;

        let response = self.transport.send(&request).await?;

        if !response.is_success() {
            let message = response
                .detail()
                .unwrap_or_else(|| format!("Login failed with status {}", response.status));
            tracing::warn!(status = response.status, "Login rejected");
            return Err(GymError::Authentication(message));
        }

        let login: LoginResponse = match response.json() {
            Ok(login) => login,
            Err(_) => {
                let message = response
                    .detail()
                    .unwrap_or_else(|| "Malformed login response".to_string());
                tracing::warn!("Login response carried no access token");
                return Err(GymError::Authentication(message));
            }
        };

        let session = Session::from_login(login);
        *self.session.write() = session.clone();
        self.persist(&session);

        tracing::info!(role = ?session.role(), "Logged in");
        let _ = self.events.send(SessionEvent::LoggedIn {
            role: session.role(),
        });
        Ok(session)
    }

    /// Attach the current access token, if there is one.
    pub fn sign_request(&self, request: ApiRequest) -> ApiRequest {
        match self.session.read().authorization() {
            Some(value) => request.with_header(AUTHORIZATION, value),
            None => request,
        }
    }

    /// Sign, send and run the response through [`handle_response`](Self::handle_response).
    pub async fn execute(&self, request: ApiRequest) -> GymResult<ApiResponse> {
        let signed = self.sign_request(request);
        let response = self.transport.send(&signed).await?;
        self.handle_response(signed, response).await
    }

    /// Recover from an expired access token with one refresh and one retry.
    ///
    /// Anything other than 401 is returned untouched. A 401 that cannot be
    /// recovered clears the session, broadcasts
    /// [`SessionEvent::Terminated`] and comes back as
    /// [`GymError::SessionTerminated`] carrying the last unauthorized response.
    pub async fn handle_response(
        &self,
        request: ApiRequest,
        response: ApiResponse,
    ) -> GymResult<ApiResponse> {
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if request.is_retry() {
            return Err(self.terminate(TerminationReason::RetryUnauthorized, &response));
        }

        {
            let _guard = self.refresh_lock.lock().await;

            let (current, refresh_token) = {
                let session = self.session.read();
                (
                    session.access_token().map(str::to_string),
                    session.refresh_token().map(str::to_string),
                )
            };

            let already_refreshed =
                current.is_some() && current.as_deref() != request.bearer_token();

            if already_refreshed {
                tracing::debug!(path = %request.path, "Reusing token from a concurrent refresh");
            } else {
                let Some(refresh_token) = refresh_token else {
                    return Err(self.terminate(TerminationReason::NoRefreshToken, &response));
                };

                match self.refresh(&refresh_token).await {
                    Ok(access_token) => self.store_refreshed(access_token),
                    Err(e) => {
                        tracing::warn!(error = %e, "Access token refresh failed");
                        return Err(self.terminate(TerminationReason::RefreshFailed, &response));
                    }
                }
            }
        }

        let retry = self.sign_request(request.retried());
        tracing::debug!(path = %retry.path, "Retrying request with refreshed token");
        let second = self.transport.send(&retry).await?;

        if second.is_unauthorized() {
            return Err(self.terminate(TerminationReason::RetryUnauthorized, &second));
        }
        Ok(second)
    }

    /// Ask the backend for a new access token.
    ///
    /// Transport failures are reported as [`GymError::Refresh`] too. The
    /// stored refresh token is never replaced. Callers must hold
    /// `refresh_lock`.
    pub(crate) async fn refresh(&self, refresh_token: &str) -> GymResult<String> {
        let request = ApiRequest::post(REFRESH_PATH).with_json(&RefreshRequest {
            token: refresh_token,
        })?;

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| GymError::Refresh(e.message()))?;

        if !response.is_success() {
            return Err(GymError::Refresh(
                response
                    .detail()
                    .unwrap_or_else(|| format!("status {}", response.status)),
            ));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| GymError::Refresh(format!("Malformed refresh response: {}", e.message())))?;
        Ok(body.access_token)
    }

    /// Clear every session attribute. Calling it again is a no-op.
    pub fn logout(&self) {
        let was_authenticated = self.clear();
        if was_authenticated {
            tracing::info!("Logged out");
            let _ = self.events.send(SessionEvent::LoggedOut);
        }
    }

    fn store_refreshed(&self, access_token: String) {
        let session = {
            let mut session = self.session.write();
            session.replace_access_token(access_token);
            session.clone()
        };
        self.persist(&session);
        tracing::info!("Access token refreshed");
        let _ = self.events.send(SessionEvent::Refreshed);
    }

    fn terminate(&self, reason: TerminationReason, response: &ApiResponse) -> GymError {
        self.clear();
        tracing::warn!(%reason, "Session terminated");
        let _ = self.events.send(SessionEvent::Terminated {
            reason,
            redirect_to: LOGIN_ROUTE,
        });

        GymError::SessionTerminated {
            status: response.status,
            detail: response.detail(),
        }
    }

    /// Returns whether there was anything to clear.
    fn clear(&self) -> bool {
        let was_authenticated = {
            let mut session = self.session.write();
            let was = session.is_authenticated();
            *session = Session::default();
            was
        };

        if let Err(e) = self.store.clear_session() {
            tracing::warn!(error = %e, "Failed to clear persisted credentials");
        }
        was_authenticated
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save_session(session) {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::http::Method;
    use crate::session::MemoryStore;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    fn manager_with(transport: &Arc<ScriptedTransport>, store: Arc<MemoryStore>) -> SessionManager {
        SessionManager::new(transport.clone(), store).unwrap()
    }

    fn logged_in_store(refresh: Option<&str>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let session = Session::from_parts(
            Some("expired".into()),
            refresh.map(str::to_string),
            Some(Role::Admin),
            None,
            false,
        );
        store.save_session(&session).unwrap();
        store
    }

    fn ok(body: serde_json::Value) -> ApiResponse {
        ApiResponse::json_body(200, &body)
    }

    fn unauthorized(detail: &str) -> ApiResponse {
        ApiResponse::json_body(401, &json!({ "detail": detail }))
    }

    #[tokio::test]
    async fn test_login_stores_session() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ok(json!({
                "access_token": "acc-1",
                "refresh_token": "ref-1",
                "token_type": "bearer",
                "role": "admin",
                "is_superuser": false
            })),
        );
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(&transport, store.clone());
        let mut events = manager.subscribe();

        let session = manager.login("+998901234567", "secret123").await.unwrap();

        assert_eq!(session.role(), Some(Role::Admin));
        assert_eq!(manager.session().access_token(), Some("acc-1"));
        assert_eq!(store.get("refresh_token").unwrap().as_deref(), Some("ref-1"));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::LoggedIn {
                role: Some(Role::Admin)
            }
        );

        let sent = transport.requests();
        assert_eq!(
            sent[0].body,
            Some(crate::network::http::RequestBody::Json(json!({
                "identifier": "+998901234567",
                "secret": "secret123"
            })))
        );
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_untouched() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ApiResponse::json_body(401, &json!({"detail": "Invalid phone number or password"})),
        );
        let manager = manager_with(&transport, logged_in_store(Some("keep")));
        let before = manager.session();

        let err = manager.login("+998900000000", "nope").await.unwrap_err();

        assert_eq!(
            err,
            GymError::Authentication("Invalid phone number or password".into())
        );
        assert_eq!(manager.session(), before);
    }

    #[tokio::test]
    async fn test_login_success_status_without_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ok(json!({"status_code": 401, "detail": "Account is inactive"})),
        );
        let manager = manager_with(&transport, Arc::new(MemoryStore::new()));

        let err = manager.login("+998901111111", "pw").await.unwrap_err();
        assert_eq!(err, GymError::Authentication("Account is inactive".into()));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_accepts_mixed_case_role() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ok(json!({"access_token": "a", "refresh_token": "r", "role": "Admin"})),
        );
        let manager = manager_with(&transport, Arc::new(MemoryStore::new()));

        let session = manager.login("+998901234567", "secret123").await.unwrap();
        assert_eq!(session.role(), Some(Role::Admin));
        assert_eq!(session.home_route(), "/dashboard");
    }

    #[tokio::test]
    async fn test_login_with_unknown_role_keeps_tokens() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ok(json!({"access_token": "a", "refresh_token": "r", "role": "manager"})),
        );
        let store = Arc::new(MemoryStore::new());
        let manager = manager_with(&transport, store.clone());

        let session = manager.login("+998901234567", "secret123").await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.role(), None);
        assert_eq!(store.get("refresh_token").unwrap().as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_login_network_error_is_not_an_authentication_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_error(
            Method::Post,
            LOGIN_PATH,
            GymError::Network("connection refused".into()),
        );
        let manager = manager_with(&transport, Arc::new(MemoryStore::new()));

        let err = manager.login("+998901234567", "secret123").await.unwrap_err();
        assert_eq!(err, GymError::Network("connection refused".into()));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_is_durable_when_temp_file_is_blocked() {
        use crate::session::FileStore;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.save_session(&Session::from_parts(
                Some("acc".into()),
                Some("ref".into()),
                Some(Role::Admin),
                None,
                false,
            ))
            .unwrap();
        }
        std::fs::create_dir(dir.path().join("credentials.tmp")).unwrap();

        let store = Arc::new(FileStore::open(&path).unwrap());
        let transport = Arc::new(ScriptedTransport::new());
        let manager = SessionManager::new(transport, store.clone()).unwrap();
        assert!(manager.is_authenticated());

        manager.logout();

        assert!(!manager.is_authenticated());
        assert_eq!(store.get("refresh_token").unwrap(), None);
        let reopened = FileStore::open(&path).unwrap();
        assert!(!reopened.load_session().unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let manager = manager_with(&transport, logged_in_store(Some("r")));
        let signed = manager.sign_request(ApiRequest::get("/users"));
        assert_eq!(signed.bearer_token(), Some("expired"));

        manager.logout();
        let unsigned = manager.sign_request(ApiRequest::get("/users"));
        assert_eq!(unsigned.header(AUTHORIZATION), None);
    }

    #[tokio::test]
    async fn test_single_unauthorized_refreshes_and_retries_once() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/users", unauthorized("Token expired"));
        transport.push(Method::Post, REFRESH_PATH, ok(json!({"access_token": "fresh"})));
        transport.push(Method::Get, "/users", ok(json!([{"id": 1}])));
        let store = logged_in_store(Some("refresh-me"));
        let manager = manager_with(&transport, store.clone());

        let response = manager.execute(ApiRequest::get("/users")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 1);
        assert_eq!(transport.count(Method::Get, "/users"), 2);

        let sent = transport.requests();
        assert_eq!(
            sent[1].body,
            Some(crate::network::http::RequestBody::Json(json!({"token": "refresh-me"})))
        );
        assert_eq!(sent[2].bearer_token(), Some("fresh"));
        assert!(sent[2].is_retry());

        // refresh token is not rotated; new access token is persisted
        assert_eq!(manager.session().refresh_token(), Some("refresh-me"));
        assert_eq!(store.get("access_token").unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_double_unauthorized_terminates_with_second_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/admin/gyms", unauthorized("first"));
        transport.push(Method::Post, REFRESH_PATH, ok(json!({"access_token": "fresh"})));
        transport.push(Method::Get, "/admin/gyms", unauthorized("second"));
        let store = logged_in_store(Some("r"));
        let manager = manager_with(&transport, store.clone());
        let mut events = manager.subscribe();

        let err = manager.execute(ApiRequest::get("/admin/gyms")).await.unwrap_err();

        assert_eq!(
            err,
            GymError::SessionTerminated {
                status: 401,
                detail: Some("second".into())
            }
        );
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 1);
        assert_eq!(transport.count(Method::Get, "/admin/gyms"), 2);
        assert!(!manager.is_authenticated());
        assert!(store.is_empty());

        assert_eq!(events.recv().await.unwrap(), SessionEvent::Refreshed);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Terminated {
                reason: TerminationReason::RetryUnauthorized,
                redirect_to: LOGIN_ROUTE
            }
        );
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token_terminates_immediately() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/auth/me", unauthorized("Not authenticated"));
        let manager = manager_with(&transport, logged_in_store(None));

        let err = manager.execute(ApiRequest::get("/auth/me")).await.unwrap_err();

        assert!(err.requires_login());
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 0);
        assert_eq!(transport.count(Method::Get, "/auth/me"), 1);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_failure_terminates_without_retry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/users", unauthorized("expired"));
        transport.push(
            Method::Post,
            REFRESH_PATH,
            ApiResponse::json_body(403, &json!({"detail": "Invalid refresh token"})),
        );
        let manager = manager_with(&transport, logged_in_store(Some("stale")));
        let mut events = manager.subscribe();

        let err = manager.execute(ApiRequest::get("/users")).await.unwrap_err();

        assert_eq!(
            err,
            GymError::SessionTerminated {
                status: 401,
                detail: Some("expired".into())
            }
        );
        assert_eq!(transport.count(Method::Get, "/users"), 1);
        assert_eq!(manager.session(), Session::default());
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Terminated {
                reason: TerminationReason::RefreshFailed,
                redirect_to: LOGIN_ROUTE
            }
        );
    }

    #[tokio::test]
    async fn test_network_error_during_refresh_is_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/users", unauthorized("expired"));
        transport.push_error(
            Method::Post,
            REFRESH_PATH,
            GymError::Network("connection reset".into()),
        );
        let manager = manager_with(&transport, logged_in_store(Some("r")));

        let err = manager.execute(ApiRequest::get("/users")).await.unwrap_err();

        assert!(err.requires_login());
        assert!(!manager.is_authenticated());
        assert_eq!(transport.count(Method::Get, "/users"), 1);
    }

    #[tokio::test]
    async fn test_non_auth_errors_pass_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            "/admin/subscription_plans",
            ApiResponse::json_body(422, &json!({"detail": "price must be positive"})),
        );
        let manager = manager_with(&transport, logged_in_store(Some("r")));
        let before = manager.session();

        let response = manager
            .execute(ApiRequest::post("/admin/subscription_plans"))
            .await
            .unwrap();

        assert_eq!(response.status, 422);
        assert_eq!(manager.session(), before);
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_retry_flag_on_request_blocks_second_refresh() {
        let transport = Arc::new(ScriptedTransport::new());
        let manager = manager_with(&transport, logged_in_store(Some("r")));

        let already_retried = ApiRequest::get("/users").retried();
        let err = manager
            .handle_response(already_retried, unauthorized("again"))
            .await
            .unwrap_err();

        assert!(err.requires_login());
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_unauthorized_share_one_refresh() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Get, "/users", unauthorized("expired"));
        transport.push(Method::Get, "/admin/gyms", unauthorized("expired"));
        transport.push_delayed(
            Method::Post,
            REFRESH_PATH,
            std::time::Duration::from_millis(200),
            ok(json!({"access_token": "fresh"})),
        );
        transport.push(Method::Get, "/users", ok(json!([])));
        transport.push(Method::Get, "/admin/gyms", ok(json!([])));
        let manager = manager_with(&transport, logged_in_store(Some("r")));

        let (users, gyms) = tokio::join!(
            manager.execute(ApiRequest::get("/users")),
            manager.execute(ApiRequest::get("/admin/gyms")),
        );

        assert_eq!(users.unwrap().status, 200);
        assert_eq!(gyms.unwrap().status, 200);
        assert_eq!(transport.count(Method::Post, REFRESH_PATH), 1);

        let retries: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.is_retry())
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().all(|r| r.bearer_token() == Some("fresh")));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = logged_in_store(Some("r"));
        let manager = manager_with(&transport, store.clone());
        let mut events = manager.subscribe();

        manager.logout();
        let once = manager.session();
        manager.logout();

        assert_eq!(manager.session(), once);
        assert_eq!(once, Session::default());
        assert!(store.is_empty());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_token_scenario() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            LOGIN_PATH,
            ok(json!({
                "access_token": "short-lived",
                "refresh_token": "long-lived",
                "token_type": "bearer",
                "role": "admin",
                "is_superuser": false
            })),
        );
        transport.push(Method::Get, "/dashboard/user-stats", unauthorized("Token has expired"));
        transport.push(Method::Post, REFRESH_PATH, ok(json!({"access_token": "renewed"})));
        transport.push(Method::Get, "/dashboard/user-stats", ok(json!({"total_users": 42})));
        let manager = manager_with(&transport, Arc::new(MemoryStore::new()));

        let session = manager.login("+998901234567", "secret123").await.unwrap();
        assert_eq!(session.role(), Some(Role::Admin));

        let response = manager
            .execute(ApiRequest::get("/dashboard/user-stats"))
            .await
            .unwrap();
        let stats: serde_json::Value = response.json().unwrap();
        assert_eq!(stats["total_users"], 42);
        assert_eq!(manager.session().access_token(), Some("renewed"));
    }
}
