//! Expense and proration HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::PageQuery;
use crate::services::expense::{
    current_year, AllocationFilter, AllocationView, AnnualTargetView, CalculationFilter,
    ExpenseFilter, ExpenseInput, ExpenseSummary, ProrationSummary,
};
use crate::services::ExpenseService;
use crate::AppState;
use shared::models::{CalculationRecord, Expense};
use shared::types::PaginatedResponse;

#[derive(Deserialize, Default)]
pub struct CalculateRequest {
    pub target_year: Option<i32>,
}

#[derive(Deserialize)]
pub struct AnnualTargetRequest {
    pub target_amount: Decimal,
}

fn service(state: &AppState) -> ExpenseService {
    ExpenseService::new(state.db.clone(), state.config.expense.default_annual_target)
}

pub async fn list_expenses(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ExpenseFilter>,
) -> AppResult<Json<PaginatedResponse<Expense>>> {
    Ok(Json(service(&state).list(&filter, &page.pagination()).await?))
}

pub async fn create_expense(
    State(state): State<AppState>,
    Json(input): Json<ExpenseInput>,
) -> AppResult<(StatusCode, Json<Expense>)> {
    Ok((StatusCode::CREATED, Json(service(&state).create(input).await?)))
}

pub async fn get_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
) -> AppResult<Json<Expense>> {
    Ok(Json(service(&state).get(expense_id).await?))
}

pub async fn update_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    Json(input): Json<ExpenseInput>,
) -> AppResult<Json<Expense>> {
    Ok(Json(service(&state).update(expense_id, input).await?))
}

pub async fn delete_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    service(&state).delete(expense_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_allocations(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<AllocationFilter>,
) -> AppResult<Json<PaginatedResponse<AllocationView>>> {
    Ok(Json(service(&state).list_allocations(&filter, &page.pagination()).await?))
}

pub async fn list_calculation_records(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<CalculationFilter>,
) -> AppResult<Json<PaginatedResponse<CalculationRecord>>> {
    Ok(Json(service(&state).calculation_records(&filter, &page.pagination()).await?))
}

/// Run the proration for a year (defaults to the current one)
pub async fn calculate(
    State(state): State<AppState>,
    body: Option<Json<CalculateRequest>>,
) -> AppResult<Json<ProrationSummary>> {
    let year = body
        .and_then(|Json(b)| b.target_year)
        .unwrap_or_else(current_year);
    Ok(Json(service(&state).calculate(year).await?))
}

pub async fn expense_summary(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> AppResult<Json<ExpenseSummary>> {
    Ok(Json(service(&state).summary(year).await?))
}

pub async fn get_annual_target(
    State(state): State<AppState>,
    Path(year): Path<i32>,
) -> AppResult<Json<AnnualTargetView>> {
    Ok(Json(service(&state).annual_target(year).await?))
}

pub async fn set_annual_target(
    State(state): State<AppState>,
    Path(year): Path<i32>,
    Json(body): Json<AnnualTargetRequest>,
) -> AppResult<Json<AnnualTargetView>> {
    Ok(Json(service(&state).set_annual_target(year, body.target_amount).await?))
}
