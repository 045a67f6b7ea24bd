//! Typed client for the GymDesk backend.
//!
//! [`GymDriver`] routes every call through the session manager, so expired
//! access tokens are refreshed without the caller noticing.
//! [`BlockingGymDriver`] wraps it for synchronous callers such as the console.

pub mod models;
mod roster;

pub use models::*;
pub use roster::{RefreshPath, RosterFeed};
pub use uuid::Uuid;

use std::sync::Arc;
use std::time::Duration;

use gym_core::network::protocol::ME_PATH;
use gym_core::network::{ApiRequest, HttpTransport, ReqwestTransport};
use gym_core::realtime::{Roster, RosterChannel, RosterConnector, WsConnector};
use gym_core::{
    ClientConfig, CredentialStore, FileStore, GymError, GymResult, Session, SessionEvent,
    SessionManager,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{
    Acknowledgement, DailySubscription, NewPlan, SaleRequest, SubscriptionAssignment,
};

pub struct GymDriver {
    session: Arc<SessionManager>,
    connector: Arc<dyn RosterConnector>,
    ws_base: String,
    retry_delay: Duration,
}

impl GymDriver {
    /// Driver talking to the configured backend, with credentials kept on disk.
    pub fn new(config: &ClientConfig) -> GymResult<Self> {
        let transport = ReqwestTransport::new(&config.api.base_url, config.request_timeout())?;
        let store = FileStore::open(&config.storage.credentials_path)?;

        Self::with_parts(
            Arc::new(transport),
            Arc::new(store),
            Arc::new(WsConnector),
            config.ws_base_url(),
            config.reconnect_delay(),
        )
    }

    pub fn with_parts(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn RosterConnector>,
        ws_base: impl Into<String>,
        retry_delay: Duration,
    ) -> GymResult<Self> {
        Ok(Self {
            session: Arc::new(SessionManager::new(transport, store)?),
            connector,
            ws_base: ws_base.into(),
            retry_delay,
        })
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn session(&self) -> Session {
        self.session.session()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    // Auth

    pub async fn login(&self, identifier: &str, secret: &str) -> GymResult<Session> {
        self.session.login(identifier, secret).await
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    /// Profile of the logged-in account.
    pub async fn me(&self) -> GymResult<Value> {
        self.call(ApiRequest::get(ME_PATH)).await
    }

    // Users

    pub async fn list_users(&self, page: u32, limit: u32) -> GymResult<Vec<User>> {
        self.call(
            ApiRequest::get("/users")
                .with_query("page", page)
                .with_query("limit", limit),
        )
        .await
    }

    /// Users whose name or phone number contains `query`.
    pub async fn search_users(&self, query: &str) -> GymResult<Vec<User>> {
        self.call(ApiRequest::get("/users").with_query("q", query))
            .await
    }

    pub async fn get_user(&self, id: Uuid) -> GymResult<UserDetail> {
        self.call(ApiRequest::get(format!("/users/{id}"))).await
    }

    pub async fn create_user(&self, user: &NewUser) -> GymResult<Value> {
        self.call(ApiRequest::post("/users").with_json(user)?).await
    }

    pub async fn update_user(&self, id: Uuid, update: &UserUpdate) -> GymResult<Value> {
        self.call(ApiRequest::put(format!("/users/{id}")).with_json(update)?)
            .await
    }

    pub async fn delete_user(&self, id: Uuid) -> GymResult<String> {
        self.acknowledge(ApiRequest::delete(format!("/users/{id}")))
            .await
    }

    // Gyms

    pub async fn list_gyms(&self) -> GymResult<Vec<Gym>> {
        self.call(ApiRequest::get("/admin/gyms")).await
    }

    pub async fn create_gym(&self, gym: &NewGym) -> GymResult<Value> {
        self.call(ApiRequest::post("/admin/gyms").with_json(gym)?)
            .await
    }

    pub async fn delete_gym(&self, id: Uuid) -> GymResult<String> {
        self.acknowledge(ApiRequest::delete(format!("/admin/gyms/{id}")))
            .await
    }

    // Pricing plans

    pub async fn list_plans(&self) -> GymResult<Vec<Plan>> {
        self.call(ApiRequest::get("/admin/subscription_plans"))
            .await
    }

    pub async fn create_plan(&self, name: &str, price: i64, duration_days: i64) -> GymResult<Plan> {
        if price <= 0 || duration_days <= 0 {
            return Err(GymError::Request {
                status: 422,
                message: "Price and duration must be positive".to_string(),
            });
        }

        let body = NewPlan {
            name,
            price,
            duration_days,
        };
        self.call(ApiRequest::post("/admin/subscription_plans").with_json(&body)?)
            .await
    }

    pub async fn deactivate_plan(&self, id: Uuid) -> GymResult<String> {
        self.acknowledge(ApiRequest::put(format!(
            "/admin/subscription_plans/deactivate/{id}"
        )))
        .await
    }

    pub async fn delete_plan(&self, id: Uuid) -> GymResult<String> {
        self.acknowledge(ApiRequest::delete(format!("/admin/subscription_plans/{id}")))
            .await
    }

    // Subscriptions

    pub async fn assign_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        payment_method: PaymentMethod,
    ) -> GymResult<Value> {
        let body = SubscriptionAssignment {
            user_id,
            plan_id,
            payment_method,
        };
        self.call(ApiRequest::post("/admin/subscriptions/assign").with_json(&body)?)
            .await
    }

    pub async fn assign_daily_subscription(
        &self,
        user_id: Uuid,
        amount: i64,
        payment_method: PaymentMethod,
    ) -> GymResult<Value> {
        let body = DailySubscription {
            user_id,
            amount,
            payment_method,
        };
        self.call(ApiRequest::post("/admin/subscriptions/assign/daily").with_json(&body)?)
            .await
    }

    // Market

    pub async fn market_status(&self) -> GymResult<MarketStatus> {
        self.call(ApiRequest::get("/market/status")).await
    }

    pub async fn list_products(&self) -> GymResult<Vec<Product>> {
        self.call(ApiRequest::get("/market/products")).await
    }

    pub async fn create_product(&self, product: NewProduct) -> GymResult<Product> {
        self.call(ApiRequest::post("/market/products").with_form(product.into_form()))
            .await
    }

    pub async fn update_product(&self, id: Uuid, update: ProductUpdate) -> GymResult<Product> {
        self.call(ApiRequest::put(format!("/market/products/{id}")).with_form(update.into_form()))
            .await
    }

    pub async fn delete_product(&self, id: Uuid) -> GymResult<String> {
        self.acknowledge(ApiRequest::delete(format!("/market/products/{id}")))
            .await
    }

    pub async fn sell_product(
        &self,
        product_id: Uuid,
        quantity: i64,
        payment_method: PaymentMethod,
    ) -> GymResult<Value> {
        let body = SaleRequest {
            product_id,
            quantity,
            payment_method,
        };
        self.call(ApiRequest::post("/market/products/sell").with_json(&body)?)
            .await
    }

    pub async fn restock_product(&self, id: Uuid, amount: i64) -> GymResult<Product> {
        self.call(
            ApiRequest::post(format!("/market/products/{id}/restock")).with_query("amount", amount),
        )
        .await
    }

    pub async fn list_sales(&self) -> GymResult<Vec<Sale>> {
        self.call(ApiRequest::get("/market/sales")).await
    }

    // Dashboard

    pub async fn user_stats(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/user-stats")).await
    }

    pub async fn subscription_stats(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/subscription/stats"))
            .await
    }

    pub async fn profit(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/profit")).await
    }

    pub async fn payment_history(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/payments/history"))
            .await
    }

    pub async fn monthly_payment(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/monthly/payment"))
            .await
    }

    pub async fn subscription_payment(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/subscription/payment"))
            .await
    }

    pub async fn notifications(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/dashboard/notifications"))
            .await
    }

    pub async fn subscription_pie_chart(&self) -> GymResult<Value> {
        self.call(ApiRequest::get("/admin/subscription/pie-chart"))
            .await
    }

    // Rosters

    /// Start a live subscription. Must be called inside a tokio runtime.
    pub fn watch_roster(&self, roster: Roster) -> RosterFeed {
        let config = roster.channel_config(&self.ws_base, self.retry_delay);
        tracing::info!(%roster, url = %config.url, "Watching roster");
        let channel = RosterChannel::open(self.connector.clone(), config);
        RosterFeed::new(roster, channel, self.session.clone())
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> GymResult<T> {
        let method = request.method;
        let path = request.path.clone();

        let response = self.session.execute(request).await?;
        tracing::debug!(method = method.as_str(), %path, status = response.status, "Response received");
        response.error_for_status()?.json()
    }

    async fn acknowledge(&self, request: ApiRequest) -> GymResult<String> {
        let ack: Option<Acknowledgement> = self.call(request).await?;
        Ok(ack.map(|a| a.message).unwrap_or_default())
    }
}

/// Synchronous facade over [`GymDriver`] with its own runtime.
pub struct BlockingGymDriver {
    driver: GymDriver,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGymDriver {
    pub fn new(config: &ClientConfig) -> GymResult<Self> {
        Ok(Self {
            driver: GymDriver::new(config)?,
            runtime: build_runtime()?,
        })
    }

    pub fn from_driver(driver: GymDriver) -> GymResult<Self> {
        Ok(Self {
            driver,
            runtime: build_runtime()?,
        })
    }

    pub fn driver(&self) -> &GymDriver {
        &self.driver
    }

    /// Run any driver future to completion.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn session(&self) -> Session {
        self.driver.session()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.driver.subscribe()
    }

    pub fn login(&self, identifier: &str, secret: &str) -> GymResult<Session> {
        self.runtime.block_on(self.driver.login(identifier, secret))
    }

    pub fn logout(&self) {
        self.driver.logout()
    }

    pub fn me(&self) -> GymResult<Value> {
        self.runtime.block_on(self.driver.me())
    }

    pub fn list_users(&self, page: u32, limit: u32) -> GymResult<Vec<User>> {
        self.runtime.block_on(self.driver.list_users(page, limit))
    }

    pub fn get_user(&self, id: Uuid) -> GymResult<UserDetail> {
        self.runtime.block_on(self.driver.get_user(id))
    }

    pub fn delete_user(&self, id: Uuid) -> GymResult<String> {
        self.runtime.block_on(self.driver.delete_user(id))
    }

    pub fn list_gyms(&self) -> GymResult<Vec<Gym>> {
        self.runtime.block_on(self.driver.list_gyms())
    }

    pub fn list_plans(&self) -> GymResult<Vec<Plan>> {
        self.runtime.block_on(self.driver.list_plans())
    }

    pub fn list_products(&self) -> GymResult<Vec<Product>> {
        self.runtime.block_on(self.driver.list_products())
    }

    pub fn list_sales(&self) -> GymResult<Vec<Sale>> {
        self.runtime.block_on(self.driver.list_sales())
    }

    pub fn user_stats(&self) -> GymResult<Value> {
        self.runtime.block_on(self.driver.user_stats())
    }

    pub fn notifications(&self) -> GymResult<Value> {
        self.runtime.block_on(self.driver.notifications())
    }

    pub fn watch_roster(&self, roster: Roster) -> RosterFeed {
        let _guard = self.runtime.enter();
        self.driver.watch_roster(roster)
    }

    pub fn refresh_roster(&self, feed: &RosterFeed) -> GymResult<RefreshPath> {
        self.runtime.block_on(feed.refresh())
    }

    pub fn dispose_roster(&self, feed: RosterFeed) {
        self.runtime.block_on(feed.dispose())
    }
}

fn build_runtime() -> GymResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GymError::Io(format!("Failed to create async runtime: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gym_core::MemoryStore;
    use gym_core::network::{ApiResponse, Method, RequestBody};
    use gym_core::testing::{ScriptedConnector, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn driver_with(transport: &Arc<ScriptedTransport>) -> GymDriver {
        let (connector, _servers) = ScriptedConnector::new();
        GymDriver::with_parts(
            transport.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(connector),
            "ws://localhost:8000/api",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn login_reply() -> ApiResponse {
        ApiResponse::json_body(
            200,
            &json!({
                "access_token": "acc",
                "refresh_token": "ref",
                "token_type": "bearer",
                "role": "admin",
                "is_superuser": false
            }),
        )
    }

    #[tokio::test]
    async fn test_list_users_sends_pagination_and_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Post, "/auth/login", login_reply());
        transport.push(
            Method::Get,
            "/users",
            ApiResponse::json_body(
                200,
                &json!([{
                    "id": "6c2f1f8e-8d7e-4a7f-9a51-0e3c2b6a9d10",
                    "first_name": "Sardor",
                    "last_name": "Usmonov",
                    "phone_number": "+998900000003",
                    "role": "client"
                }]),
            ),
        );
        let driver = driver_with(&transport);
        driver.login("+998901234567", "secret123").await.unwrap();

        let users = driver.list_users(2, 25).await.unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].first_name, "Sardor");
        let sent = &transport.requests()[1];
        assert_eq!(
            sent.query,
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "25".to_string())
            ]
        );
        assert_eq!(sent.bearer_token(), Some("acc"));
    }

    #[tokio::test]
    async fn test_server_detail_becomes_request_error() {
        let transport = Arc::new(ScriptedTransport::new());
        let id = Uuid::new_v4();
        transport.push(
            Method::Delete,
            &format!("/users/{id}"),
            ApiResponse::json_body(400, &json!({"detail": "Cannot delete user with active subscription"})),
        );
        let driver = driver_with(&transport);

        let err = driver.delete_user(id).await.unwrap_err();
        assert_eq!(
            err,
            GymError::Request {
                status: 400,
                message: "Cannot delete user with active subscription".into()
            }
        );
    }

    #[tokio::test]
    async fn test_delete_returns_server_message() {
        let transport = Arc::new(ScriptedTransport::new());
        let id = Uuid::new_v4();
        transport.push(
            Method::Delete,
            &format!("/admin/subscription_plans/{id}"),
            ApiResponse::json_body(200, &json!({"message": "Subscription plan deleted successfully"})),
        );
        let driver = driver_with(&transport);

        let message = driver.delete_plan(id).await.unwrap();
        assert_eq!(message, "Subscription plan deleted successfully");
    }

    #[tokio::test]
    async fn test_create_plan_rejects_non_positive_values() {
        let transport = Arc::new(ScriptedTransport::new());
        let driver = driver_with(&transport);

        let err = driver.create_plan("Monthly", 0, 30).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_create_product_sends_multipart_fields() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            Method::Post,
            "/market/products",
            ApiResponse::json_body(
                201,
                &json!({
                    "id": "0d9c7f5e-1a2b-4c3d-8e9f-a0b1c2d3e4f5",
                    "name": "Water",
                    "selling_price": 5000,
                    "purchase_price": 3000,
                    "total_amount": 100,
                    "current_amount": 100,
                    "created_at": "2025-03-01"
                }),
            ),
        );
        let driver = driver_with(&transport);

        let product = driver
            .create_product(NewProduct {
                name: "Water".into(),
                selling_price: 5000,
                purchase_price: 3000,
                total_amount: 100,
                supplier_name: None,
            })
            .await
            .unwrap();

        assert_eq!(product.current_amount, 100);
        match &transport.requests()[0].body {
            Some(RequestBody::Form(fields)) => assert_eq!(fields.len(), 4),
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sell_and_restock_payloads() {
        let transport = Arc::new(ScriptedTransport::new());
        let id = Uuid::new_v4();
        transport.push(
            Method::Post,
            "/market/products/sell",
            ApiResponse::json_body(201, &json!({"message": "Product sold"})),
        );
        transport.push(
            Method::Post,
            &format!("/market/products/{id}/restock"),
            ApiResponse::json_body(
                200,
                &json!({
                    "id": id.to_string(),
                    "name": "Water",
                    "selling_price": 5000,
                    "purchase_price": 3000,
                    "total_amount": 120,
                    "current_amount": 50,
                    "created_at": "2025-03-01"
                }),
            ),
        );
        let driver = driver_with(&transport);

        driver.sell_product(id, 3, PaymentMethod::Cash).await.unwrap();
        let restocked = driver.restock_product(id, 20).await.unwrap();

        let sent = transport.requests();
        assert_eq!(
            sent[0].body,
            Some(RequestBody::Json(json!({
                "product_id": id.to_string(),
                "quantity": 3,
                "payment_method": "cash"
            })))
        );
        assert_eq!(sent[1].query, vec![("amount".to_string(), "20".to_string())]);
        assert_eq!(restocked.total_amount, 120);
    }

    #[tokio::test]
    async fn test_expired_token_is_invisible_to_resource_calls() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Post, "/auth/login", login_reply());
        transport.push(
            Method::Get,
            "/admin/gyms",
            ApiResponse::json_body(401, &json!({"detail": "Token expired"})),
        );
        transport.push(
            Method::Post,
            "/auth/refresh",
            ApiResponse::json_body(200, &json!({"access_token": "acc-2"})),
        );
        transport.push(
            Method::Get,
            "/admin/gyms",
            ApiResponse::json_body(
                200,
                &json!([{"id": "11111111-2222-3333-4444-555555555555", "name": "Iron Gym", "is_active": true}]),
            ),
        );
        let driver = driver_with(&transport);
        driver.login("+998901234567", "secret123").await.unwrap();

        let gyms = driver.list_gyms().await.unwrap();
        assert_eq!(gyms[0].name, "Iron Gym");
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 1);
    }

    #[test]
    fn test_blocking_driver_login() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(Method::Post, "/auth/login", login_reply());
        let driver = BlockingGymDriver::from_driver(driver_with(&transport)).unwrap();

        let session = driver.login("+998901234567", "secret123").unwrap();
        assert_eq!(session.role(), Some(gym_core::Role::Admin));
        assert_eq!(session.home_route(), "/dashboard");

        driver.logout();
        assert!(!driver.session().is_authenticated());
    }
}
