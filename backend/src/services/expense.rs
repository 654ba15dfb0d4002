//! Shared expenses, annual targets and the proration run

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::models::{
    allocation_base, plan_proration, summarize_expense_amounts, CalculationRecord,
    CalculationStatus, Expense, ExpenseTotals, ExpenseType, ProrationExpense, ProrationOrder,
    ProrationSkip,
};
use shared::types::{PaginatedResponse, Pagination};
use shared::validation::{validate_non_negative, validate_year};

const EXPENSE_COLUMNS: &str =
    "id, name, amount, expense_type, target_year, remark, created_at, updated_at";

const CALCULATION_COLUMNS: &str = "id, calculation_time, target_year, status, remark";

/// Orders counted for year `$1` are those created in it, in UTC
fn order_year_filter(created_at: &str) -> String {
    format!("EXTRACT(YEAR FROM {} AT TIME ZONE 'UTC')::int = $1", created_at)
}

/// Expense service
#[derive(Clone)]
pub struct ExpenseService {
    db: PgPool,
    default_target: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseInput {
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub expense_type: Option<ExpenseType>,
    pub target_year: Option<i32>,
    pub remark: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseFilter {
    pub target_year: Option<i32>,
    pub name: Option<String>,
    pub expense_type: Option<ExpenseType>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AllocationFilter {
    pub expense_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub target_year: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalculationFilter {
    pub target_year: Option<i32>,
    pub status: Option<CalculationStatus>,
}

/// Allocation row with its expense and order labels
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AllocationView {
    pub id: Uuid,
    pub expense_id: Uuid,
    pub order_id: Uuid,
    pub allocated_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub expense_name: String,
    pub target_year: i32,
    pub contract_no: Option<String>,
    pub customer_name: Option<String>,
}

/// Outcome of a proration run
#[derive(Debug, Serialize)]
pub struct ProrationSummary {
    pub target_year: i32,
    pub total_order_amount: Decimal,
    pub annual_target: Decimal,
    pub allocation_base: Decimal,
    pub total_expense_amount: Decimal,
    pub total_allocated: Decimal,
    pub unallocated: Decimal,
    pub total_direct_cost: Decimal,
    pub total_gross_profit: Decimal,
    pub total_net_profit: Decimal,
    pub orders_updated: u64,
    pub allocations_created: usize,
    pub skipped: Option<ProrationSkip>,
    pub remark: String,
    pub calculation: CalculationRecord,
}

#[derive(Debug, Serialize)]
pub struct AnnualTargetView {
    pub target_year: i32,
    pub target_amount: Decimal,
    pub is_default: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-year expense overview
#[derive(Debug, Serialize)]
pub struct ExpenseSummary {
    pub target_year: i32,
    #[serde(flatten)]
    pub totals: ExpenseTotals,
    pub expense_count: i64,
    pub total_orders: i64,
    pub total_order_amount: Decimal,
    pub annual_target: AnnualTargetView,
    pub allocation_base: Decimal,
    pub calculation_status: &'static str,
    pub latest_calculation: Option<CalculationRecord>,
}

/// Per-year order profitability after allocation
#[derive(Debug, Serialize)]
pub struct OrderExpenseSummary {
    pub year: i32,
    pub total_orders: i64,
    pub total_contract_amount: Decimal,
    pub total_gross_profit: Decimal,
    pub total_allocated_expense: Decimal,
    pub total_individual_cost: Decimal,
    pub net_profit_estimate: Decimal,
    pub annual_target: AnnualTargetView,
    pub allocation_base: Decimal,
    pub calculation_status: &'static str,
    pub latest_calculation: Option<CalculationRecord>,
}

fn calculation_status(record: Option<&CalculationRecord>) -> &'static str {
    match record.map(|r| r.status) {
        Some(CalculationStatus::Completed) => "completed",
        Some(CalculationStatus::Failed) => "failed",
        None => "not_calculated",
    }
}

fn check_year(year: i32) -> AppResult<()> {
    validate_year(year).map_err(|msg| AppError::validation("target_year", msg, "年份无效"))
}

/// Current calendar year
pub fn current_year() -> i32 {
    Utc::now().year()
}

impl ExpenseService {
    pub fn new(db: PgPool, default_target: Decimal) -> Self {
        Self { db, default_target }
    }

    // ========================================================================
    // Expenses
    // ========================================================================

    pub async fn list(
        &self,
        filter: &ExpenseFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Expense>> {
        const WHERE: &str = r#"
            WHERE ($1::int IS NULL OR target_year = $1)
              AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
              AND ($3::expense_type IS NULL OR expense_type = $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM expenses {}", WHERE))
            .bind(filter.target_year)
            .bind(&filter.name)
            .bind(filter.expense_type)
            .fetch_one(&self.db)
            .await?;

        let expenses = sqlx::query_as::<_, Expense>(&format!(
            "SELECT {} FROM expenses {} ORDER BY target_year DESC, created_at DESC LIMIT $4 OFFSET $5",
            EXPENSE_COLUMNS, WHERE
        ))
        .bind(filter.target_year)
        .bind(&filter.name)
        .bind(filter.expense_type)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(expenses, pagination, total))
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Expense> {
        sqlx::query_as::<_, Expense>(&format!("SELECT {} FROM expenses WHERE id = $1", EXPENSE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Expense".to_string()))
    }

    pub async fn create(&self, input: ExpenseInput) -> AppResult<Expense> {
        let name = match input.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(AppError::validation("name", "Name is required", "费用名称不能为空")),
        };
        let amount = input
            .amount
            .ok_or_else(|| AppError::validation("amount", "Amount is required", "金额不能为空"))?;
        let target_year = input.target_year.unwrap_or_else(current_year);
        check_year(target_year)?;

        let expense = sqlx::query_as::<_, Expense>(&format!(
            r#"
            INSERT INTO expenses (name, amount, expense_type, target_year, remark)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            EXPENSE_COLUMNS
        ))
        .bind(&name)
        .bind(amount)
        .bind(input.expense_type.unwrap_or_default())
        .bind(target_year)
        .bind(&input.remark)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(expense_id = %expense.id, year = target_year, "Expense created");
        Ok(expense)
    }

    pub async fn update(&self, id: Uuid, input: ExpenseInput) -> AppResult<Expense> {
        let existing = self.get(id).await?;
        let name = match input.name.as_deref().map(str::trim) {
            None => existing.name,
            Some("") => {
                return Err(AppError::validation("name", "Name is required", "费用名称不能为空"))
            }
            Some(name) => name.to_string(),
        };
        let target_year = input.target_year.unwrap_or(existing.target_year);
        check_year(target_year)?;

        let expense = sqlx::query_as::<_, Expense>(&format!(
            r#"
            UPDATE expenses
            SET name = $2, amount = $3, expense_type = $4, target_year = $5, remark = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EXPENSE_COLUMNS
        ))
        .bind(id)
        .bind(&name)
        .bind(input.amount.unwrap_or(existing.amount))
        .bind(input.expense_type.unwrap_or(existing.expense_type))
        .bind(target_year)
        .bind(input.remark.or(existing.remark))
        .fetch_one(&self.db)
        .await?;

        Ok(expense)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Expense".to_string()));
        }
        Ok(())
    }

    pub async fn list_allocations(
        &self,
        filter: &AllocationFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<AllocationView>> {
        const FROM: &str = r#"
            FROM expense_allocations a
            JOIN expenses e ON e.id = a.expense_id
            JOIN orders o ON o.id = a.order_id
            WHERE ($1::uuid IS NULL OR a.expense_id = $1)
              AND ($2::uuid IS NULL OR a.order_id = $2)
              AND ($3::int IS NULL OR e.target_year = $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) {}", FROM))
            .bind(filter.expense_id)
            .bind(filter.order_id)
            .bind(filter.target_year)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, AllocationView>(&format!(
            r#"
            SELECT a.id, a.expense_id, a.order_id, a.allocated_amount, a.created_at,
                   e.name AS expense_name, e.target_year, o.contract_no, o.customer_name
            {}
            ORDER BY a.created_at DESC, e.name
            LIMIT $4 OFFSET $5
            "#,
            FROM
        ))
        .bind(filter.expense_id)
        .bind(filter.order_id)
        .bind(filter.target_year)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(rows, pagination, total))
    }

    pub async fn calculation_records(
        &self,
        filter: &CalculationFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<CalculationRecord>> {
        const WHERE: &str = r#"
            WHERE ($1::int IS NULL OR target_year = $1)
              AND ($2::calculation_status IS NULL OR status = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM calculation_records {}",
            WHERE
        ))
        .bind(filter.target_year)
        .bind(filter.status)
        .fetch_one(&self.db)
        .await?;

        let records = sqlx::query_as::<_, CalculationRecord>(&format!(
            "SELECT {} FROM calculation_records {} ORDER BY calculation_time DESC LIMIT $3 OFFSET $4",
            CALCULATION_COLUMNS, WHERE
        ))
        .bind(filter.target_year)
        .bind(filter.status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(records, pagination, total))
    }

    // ========================================================================
    // Annual targets
    // ========================================================================

    pub async fn annual_target(&self, year: i32) -> AppResult<AnnualTargetView> {
        check_year(year)?;
        let row = sqlx::query_as::<_, (Decimal, DateTime<Utc>)>(
            "SELECT target_amount, updated_at FROM annual_targets WHERE target_year = $1",
        )
        .bind(year)
        .fetch_optional(&self.db)
        .await?;

        Ok(match row {
            Some((target_amount, updated_at)) => AnnualTargetView {
                target_year: year,
                target_amount,
                is_default: false,
                updated_at: Some(updated_at),
            },
            None => AnnualTargetView {
                target_year: year,
                target_amount: self.default_target,
                is_default: true,
                updated_at: None,
            },
        })
    }

    pub async fn set_annual_target(&self, year: i32, amount: Decimal) -> AppResult<AnnualTargetView> {
        check_year(year)?;
        validate_non_negative(amount)
            .map_err(|msg| AppError::validation("target_amount", msg, "目标金额不能为负数"))?;

        let (target_amount, updated_at) = sqlx::query_as::<_, (Decimal, DateTime<Utc>)>(
            r#"
            INSERT INTO annual_targets (target_year, target_amount)
            VALUES ($1, $2)
            ON CONFLICT (target_year)
            DO UPDATE SET target_amount = EXCLUDED.target_amount, updated_at = NOW()
            RETURNING target_amount, updated_at
            "#,
        )
        .bind(year)
        .bind(amount)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(year, target = %target_amount, "Annual target updated");
        Ok(AnnualTargetView {
            target_year: year,
            target_amount,
            is_default: false,
            updated_at: Some(updated_at),
        })
    }

    /// Stored target for a year, creating it from the default when missing
    async fn ensure_annual_target(&self, year: i32) -> AppResult<Decimal> {
        sqlx::query(
            r#"
            INSERT INTO annual_targets (target_year, target_amount)
            VALUES ($1, $2)
            ON CONFLICT (target_year) DO NOTHING
            "#,
        )
        .bind(year)
        .bind(self.default_target)
        .execute(&self.db)
        .await?;

        let target = sqlx::query_scalar::<_, Decimal>(
            "SELECT target_amount FROM annual_targets WHERE target_year = $1",
        )
        .bind(year)
        .fetch_one(&self.db)
        .await?;

        Ok(target)
    }

    // ========================================================================
    // Proration
    // ========================================================================

    /// Spread the year's prorated expenses over its orders
    ///
    /// A failed run is recorded with the error text before the error is returned.
    pub async fn calculate(&self, year: i32) -> AppResult<ProrationSummary> {
        check_year(year)?;

        match self.run_proration(year).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!(year, error = %e, "Proration run failed");
                let recorded = sqlx::query(
                    "INSERT INTO calculation_records (target_year, status, remark) VALUES ($1, 'failed', $2)",
                )
                .bind(year)
                .bind(e.to_string())
                .execute(&self.db)
                .await;
                if let Err(record_err) = recorded {
                    tracing::error!(year, error = %record_err, "Could not record failed proration run");
                }
                Err(e)
            }
        }
    }

    async fn run_proration(&self, year: i32) -> AppResult<ProrationSummary> {
        let annual_target = self.ensure_annual_target(year).await?;

        let orders = sqlx::query_as::<_, (Uuid, Decimal, Decimal)>(&format!(
            "SELECT id, contract_amount, machine_cost FROM orders WHERE {} ORDER BY created_at",
            order_year_filter("created_at")
        ))
        .bind(year)
        .fetch_all(&self.db)
        .await?;

        let expenses = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT id, amount FROM expenses
            WHERE target_year = $1 AND expense_type = 'full_proration'
            ORDER BY created_at
            "#,
        )
        .bind(year)
        .fetch_all(&self.db)
        .await?;

        let proration_orders: Vec<ProrationOrder> = orders
            .iter()
            .map(|(order_id, contract_amount, _)| ProrationOrder {
                order_id: *order_id,
                contract_amount: *contract_amount,
            })
            .collect();
        let proration_expenses: Vec<ProrationExpense> = expenses
            .iter()
            .map(|(expense_id, amount)| ProrationExpense {
                expense_id: *expense_id,
                amount: *amount,
            })
            .collect();

        let plan = plan_proration(annual_target, &proration_orders, &proration_expenses);

        let remark = match plan.skipped {
            Some(skip) => skip.remark(year),
            None => format!(
                "Allocated {} of {} across {} orders (base {})",
                plan.total_allocated,
                plan.total_expense_amount,
                plan.order_costs.len(),
                plan.allocation_base
            ),
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM expense_allocations a
            USING expenses e
            WHERE a.expense_id = e.id AND e.target_year = $1
            "#,
        )
        .bind(year)
        .execute(&mut *tx)
        .await?;

        if !plan.lines.is_empty() {
            let expense_ids: Vec<Uuid> = plan.lines.iter().map(|l| l.expense_id).collect();
            let order_ids: Vec<Uuid> = plan.lines.iter().map(|l| l.order_id).collect();
            let amounts: Vec<Decimal> = plan.lines.iter().map(|l| l.allocated_amount).collect();

            sqlx::query(
                r#"
                INSERT INTO expense_allocations (expense_id, order_id, allocated_amount)
                SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::numeric[])
                "#,
            )
            .bind(&expense_ids)
            .bind(&order_ids)
            .bind(&amounts)
            .execute(&mut *tx)
            .await?;
        }

        let cost_ids: Vec<Uuid> = plan.order_costs.iter().map(|(id, _)| *id).collect();
        let costs: Vec<Decimal> = plan.order_costs.iter().map(|(_, cost)| *cost).collect();
        let orders_updated = sqlx::query(
            r#"
            UPDATE orders o
            SET proportionate_cost = v.cost,
                net_profit = o.gross_profit - v.cost - o.individual_cost,
                updated_at = NOW()
            FROM UNNEST($1::uuid[], $2::numeric[]) AS v(id, cost)
            WHERE o.id = v.id
            "#,
        )
        .bind(&cost_ids)
        .bind(&costs)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let calculation = sqlx::query_as::<_, CalculationRecord>(&format!(
            r#"
            INSERT INTO calculation_records (target_year, status, remark)
            VALUES ($1, 'completed', $2)
            RETURNING {}
            "#,
            CALCULATION_COLUMNS
        ))
        .bind(year)
        .bind(&remark)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let total_direct_cost: Decimal = orders.iter().map(|(_, _, cost)| *cost).sum();
        let total_gross_profit = plan.total_order_amount - total_direct_cost;

        tracing::info!(
            year,
            orders = orders_updated,
            allocated = %plan.total_allocated,
            base = %plan.allocation_base,
            "Proration run completed"
        );

        Ok(ProrationSummary {
            target_year: year,
            total_order_amount: plan.total_order_amount,
            annual_target: plan.annual_target,
            allocation_base: plan.allocation_base,
            total_expense_amount: plan.total_expense_amount,
            total_allocated: plan.total_allocated,
            unallocated: plan.unallocated,
            total_direct_cost,
            total_gross_profit,
            total_net_profit: total_gross_profit - plan.total_expense_amount,
            orders_updated,
            allocations_created: plan.lines.len(),
            skipped: plan.skipped,
            remark,
            calculation,
        })
    }

    // ========================================================================
    // Summaries
    // ========================================================================

    async fn latest_calculation(&self, year: i32) -> AppResult<Option<CalculationRecord>> {
        let record = sqlx::query_as::<_, CalculationRecord>(&format!(
            r#"
            SELECT {} FROM calculation_records
            WHERE target_year = $1
            ORDER BY calculation_time DESC
            LIMIT 1
            "#,
            CALCULATION_COLUMNS
        ))
        .bind(year)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    pub async fn summary(&self, year: i32) -> AppResult<ExpenseSummary> {
        check_year(year)?;

        let amounts = sqlx::query_scalar::<_, Decimal>("SELECT amount FROM expenses WHERE target_year = $1")
            .bind(year)
            .fetch_all(&self.db)
            .await?;

        let (total_orders, total_order_amount) = sqlx::query_as::<_, (i64, Decimal)>(&format!(
            "SELECT COUNT(*), COALESCE(SUM(contract_amount), 0) FROM orders WHERE {}",
            order_year_filter("created_at")
        ))
        .bind(year)
        .fetch_one(&self.db)
        .await?;

        let annual_target = self.annual_target(year).await?;
        let latest = self.latest_calculation(year).await?;

        Ok(ExpenseSummary {
            target_year: year,
            totals: summarize_expense_amounts(&amounts),
            expense_count: amounts.len() as i64,
            total_orders,
            total_order_amount,
            allocation_base: allocation_base(annual_target.target_amount, total_order_amount),
            annual_target,
            calculation_status: calculation_status(latest.as_ref()),
            latest_calculation: latest,
        })
    }

    pub async fn order_expense_summary(&self, year: i32) -> AppResult<OrderExpenseSummary> {
        check_year(year)?;

        let (total_orders, total_contract_amount, total_gross_profit, total_individual_cost, net_profit_estimate) =
            sqlx::query_as::<_, (i64, Decimal, Decimal, Decimal, Decimal)>(&format!(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(contract_amount), 0),
                       COALESCE(SUM(gross_profit), 0),
                       COALESCE(SUM(individual_cost), 0),
                       COALESCE(SUM(net_profit), 0)
                FROM orders WHERE {}
                "#,
                order_year_filter("created_at")
            ))
            .bind(year)
            .fetch_one(&self.db)
            .await?;

        let total_allocated_expense = sqlx::query_scalar::<_, Decimal>(&format!(
            r#"
            SELECT COALESCE(SUM(a.allocated_amount), 0)
            FROM expense_allocations a
            JOIN orders o ON o.id = a.order_id
            WHERE {}
            "#,
            order_year_filter("o.created_at")
        ))
        .bind(year)
        .fetch_one(&self.db)
        .await?;

        let annual_target = self.annual_target(year).await?;
        let latest = self.latest_calculation(year).await?;

        Ok(OrderExpenseSummary {
            year,
            total_orders,
            total_contract_amount,
            total_gross_profit,
            total_allocated_expense,
            total_individual_cost,
            net_profit_estimate,
            allocation_base: allocation_base(annual_target.target_amount, total_contract_amount),
            annual_target,
            calculation_status: calculation_status(latest.as_ref()),
            latest_calculation: latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: CalculationStatus) -> CalculationRecord {
        CalculationRecord {
            id: Uuid::new_v4(),
            calculation_time: Utc::now(),
            target_year: 2025,
            status,
            remark: None,
        }
    }

    #[test]
    fn test_calculation_status_labels() {
        assert_eq!(calculation_status(None), "not_calculated");
        assert_eq!(
            calculation_status(Some(&record(CalculationStatus::Completed))),
            "completed"
        );
        assert_eq!(
            calculation_status(Some(&record(CalculationStatus::Failed))),
            "failed"
        );
    }

    #[test]
    fn test_order_year_is_taken_in_utc() {
        assert_eq!(
            order_year_filter("o.created_at"),
            "EXTRACT(YEAR FROM o.created_at AT TIME ZONE 'UTC')::int = $1"
        );
        assert!(order_year_filter("created_at").contains("AT TIME ZONE 'UTC'"));
    }

    #[test]
    fn test_year_bounds() {
        assert!(check_year(2025).is_ok());
        assert!(matches!(check_year(1899), Err(AppError::Validation { .. })));
    }
}
