use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::DomainError;

use crate::models::{Order, OrderItem};
use crate::service::{self, CreateOrderInput, OrderItemInput};

type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        let status = match &e {
            DomainError::Validation(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict(_)
            | DomainError::InsufficientStock(_)
            | DomainError::InvalidStateTransition(_)
            | DomainError::OptimisticLock(_) => StatusCode::CONFLICT,
            DomainError::Serialization(_) | DomainError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub saga_status: String,
    pub total_amount: i32,
    pub currency: String,
    pub reservation_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    fn new(order: Order, items: Vec<OrderItem>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            saga_status: order.saga_status,
            total_amount: order.total_amount,
            currency: order.currency,
            reservation_id: order.reservation_id,
            payment_id: order.payment_id,
            failure_reason: order.failure_reason,
            items,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub order_id: Uuid,
    pub status: String,
    pub saga_status: String,
    pub message: String,
}

impl OrderStatusResponse {
    fn new(order: &Order, message: &str) -> Self {
        Self {
            order_id: order.id,
            status: order.status.clone(),
            saga_status: order.saga_status.clone(),
            message: message.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundOrderRequest {
    #[serde(default)]
    pub amount: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", get(get_order_status))
        .route("/orders/:id/items", post(add_item))
        .route("/orders/:id/items/:item_id", put(update_item).delete(remove_item))
        .route("/orders/:id/checkout", post(checkout))
        .route("/orders/:id/approve", post(approve))
        .route("/orders/:id/cancel", post(cancel))
        .route("/orders/:id/refund", post(refund))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move { service::create_order(conn, input).await })
        })
        .await?;
    Ok(Json(OrderResponse::new(order, Vec::new())))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = service::find_order(&mut conn, id).await?;
    let items = service::load_items(&mut conn, id).await?;
    Ok(Json(OrderResponse::new(order, items)))
}

async fn get_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = service::find_order(&mut conn, id).await?;
    Ok(Json(OrderStatusResponse::new(&order, "OK")))
}

async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<OrderItemInput>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let (order, items) = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                let order = service::add_item(conn, id, input).await?;
                let items = service::load_items(conn, id).await?;
                Ok((order, items))
            })
        })
        .await?;
    Ok(Json(OrderResponse::new(order, items)))
}

async fn update_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<OrderItemInput>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let (order, items) = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                let order = service::update_item(conn, id, item_id, input).await?;
                let items = service::load_items(conn, id).await?;
                Ok((order, items))
            })
        })
        .await?;
    Ok(Json(OrderResponse::new(order, items)))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let (order, items) = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                let order = service::remove_item(conn, id, item_id).await?;
                let items = service::load_items(conn, id).await?;
                Ok((order, items))
            })
        })
        .await?;
    Ok(Json(OrderResponse::new(order, items)))
}

async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move { service::checkout(conn, id).await })
        })
        .await?;
    Ok(Json(OrderStatusResponse::new(&order, "Order is ready for approval")))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move { service::approve(conn, id).await })
        })
        .await?;
    Ok(Json(OrderStatusResponse::new(
        &order,
        "Saga started: inventory reservation requested",
    )))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move { service::cancel(conn, id, request.reason).await })
        })
        .await?;
    Ok(Json(OrderStatusResponse::new(&order, "Order cancelled")))
}

async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundOrderRequest>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(ApiError::internal)?;
    let order = conn
        .transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move { service::refund(conn, id, request.amount, request.reason).await })
        })
        .await?;
    Ok(Json(OrderStatusResponse::new(&order, "Refund requested")))
}

async fn health_check() -> &'static str {
    "OK"
}
