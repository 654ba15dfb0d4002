//! Order HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::{csv_attachment, PageQuery, YearQuery};
use crate::services::expense::{current_year, OrderExpenseSummary, ProrationSummary};
use crate::services::order::{IndividualExpenseInput, OrderFilter, OrderInput, OrderListItem};
use crate::services::{export, ExpenseService, OrderService};
use crate::AppState;
use shared::models::{IndividualExpense, Order, OrderStatistics};
use shared::types::PaginatedResponse;

#[derive(Deserialize, Default)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub include_expense_allocations: bool,
}

#[derive(Deserialize, Default)]
pub struct ProrationRequest {
    pub year: Option<i32>,
}

fn expense_service(state: &AppState) -> ExpenseService {
    ExpenseService::new(state.db.clone(), state.config.expense.default_annual_target)
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<OrderFilter>,
    Query(options): Query<ListOrdersQuery>,
) -> AppResult<Json<PaginatedResponse<OrderListItem>>> {
    let service = OrderService::new(state.db.clone());
    let orders = service
        .list(&filter, &page.pagination(), options.include_expense_allocations)
        .await?;
    Ok(Json(orders))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<OrderInput>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let service = OrderService::new(state.db.clone());
    Ok((StatusCode::CREATED, Json(service.create(input).await?)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let service = OrderService::new(state.db.clone());
    Ok(Json(service.get(order_id).await?))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(input): Json<OrderInput>,
) -> AppResult<Json<Order>> {
    let service = OrderService::new(state.db.clone());
    Ok(Json(service.update(order_id, input).await?))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let service = OrderService::new(state.db.clone());
    service.delete(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn order_statistics(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> AppResult<Json<OrderStatistics>> {
    let service = OrderService::new(state.db.clone());
    Ok(Json(service.statistics(&filter).await?))
}

/// Orders as a CSV download
pub async fn export_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> AppResult<Response> {
    let service = OrderService::new(state.db.clone());
    let orders = service.export(&filter).await?;
    let body = export::orders_csv(&orders)?;
    Ok(csv_attachment("orders", body).into_response())
}

pub async fn order_expense_summary(
    State(state): State<AppState>,
    Query(query): Query<YearQuery>,
) -> AppResult<Json<OrderExpenseSummary>> {
    let year = query.year.unwrap_or_else(current_year);
    Ok(Json(expense_service(&state).order_expense_summary(year).await?))
}

/// Spread the year's expenses over its orders
pub async fn update_proportionate_cost(
    State(state): State<AppState>,
    body: Option<Json<ProrationRequest>>,
) -> AppResult<Json<ProrationSummary>> {
    let year = body.and_then(|Json(b)| b.year).unwrap_or_else(current_year);
    Ok(Json(expense_service(&state).calculate(year).await?))
}

// ============================================================================
// Individual expenses
// ============================================================================

pub async fn list_individual_expenses(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Vec<IndividualExpense>>> {
    let service = OrderService::new(state.db.clone());
    Ok(Json(service.list_individual_expenses(order_id).await?))
}

pub async fn add_individual_expense(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(input): Json<IndividualExpenseInput>,
) -> AppResult<(StatusCode, Json<IndividualExpense>)> {
    let service = OrderService::new(state.db.clone());
    let expense = service.add_individual_expense(order_id, input).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn update_individual_expense(
    State(state): State<AppState>,
    Path((order_id, expense_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<IndividualExpenseInput>,
) -> AppResult<Json<IndividualExpense>> {
    let service = OrderService::new(state.db.clone());
    Ok(Json(service.update_individual_expense(order_id, expense_id, input).await?))
}

pub async fn delete_individual_expense(
    State(state): State<AppState>,
    Path((order_id, expense_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let service = OrderService::new(state.db.clone());
    service.delete_individual_expense(order_id, expense_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
