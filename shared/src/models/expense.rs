//! Shared expenses, annual targets and proration across orders
//!
//! Company-wide expenses are spread over a year's orders in proportion to
//! each order's contract amount. The divisor is the proration base: the
//! larger of the annual revenue target and the actual order total, so a
//! year that falls short of its target only absorbs its share of the costs.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Annual revenue target used when none has been configured for a year
pub fn default_annual_target() -> Decimal {
    Decimal::new(10_000_000_00, 2)
}

/// A company-wide expense (negative amounts are income or refunds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Expense {
    pub id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub expense_type: ExpenseType,
    pub target_year: i32,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How an expense is distributed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "expense_type", rename_all = "snake_case"))]
pub enum ExpenseType {
    /// Spread over every order of the year by contract amount
    #[default]
    FullProration,
}

/// One expense's share assigned to one order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ExpenseAllocation {
    pub id: Uuid,
    pub expense_id: Uuid,
    pub order_id: Uuid,
    pub allocated_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Revenue target for a year
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AnnualTarget {
    pub id: Uuid,
    pub target_year: i32,
    pub target_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit row for each proration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CalculationRecord {
    pub id: Uuid,
    pub calculation_time: DateTime<Utc>,
    pub target_year: i32,
    pub status: CalculationStatus,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "calculation_status", rename_all = "snake_case")
)]
pub enum CalculationStatus {
    Completed,
    Failed,
}

// ============================================================================
// Proration
// ============================================================================

/// Order input to a proration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationOrder {
    pub order_id: Uuid,
    pub contract_amount: Decimal,
}

/// Expense input to a proration run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProrationExpense {
    pub expense_id: Uuid,
    pub amount: Decimal,
}

/// Allocated share of one expense for one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationLine {
    pub expense_id: Uuid,
    pub order_id: Uuid,
    pub allocated_amount: Decimal,
}

/// Reason a proration run allocated nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationSkip {
    NoExpenses,
    NoOrders,
    NonPositiveBase,
}

impl ProrationSkip {
    pub fn remark(&self, year: i32) -> String {
        match self {
            ProrationSkip::NoExpenses => format!("No prorated expenses recorded for {}", year),
            ProrationSkip::NoOrders => format!("No orders recorded for {}", year),
            ProrationSkip::NonPositiveBase => {
                format!("Proration base for {} is not positive", year)
            }
        }
    }
}

/// Result of planning a proration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProrationPlan {
    pub total_order_amount: Decimal,
    pub annual_target: Decimal,
    pub allocation_base: Decimal,
    pub total_expense_amount: Decimal,
    pub total_allocated: Decimal,
    /// Part of the expenses that falls on unsold target capacity
    pub unallocated: Decimal,
    pub lines: Vec<AllocationLine>,
    /// Proportionate cost per order, including zero for orders that receive nothing
    pub order_costs: Vec<(Uuid, Decimal)>,
    pub skipped: Option<ProrationSkip>,
}

/// The divisor used to spread expenses
pub fn allocation_base(annual_target: Decimal, total_order_amount: Decimal) -> Decimal {
    annual_target.max(total_order_amount)
}

/// Round a monetary amount to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Share of `expense_amount` carried by an order of `order_amount`
pub fn allocate_amount(order_amount: Decimal, base: Decimal, expense_amount: Decimal) -> Decimal {
    if base <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_money(order_amount * expense_amount / base)
}

/// Plan a proration run over a year's orders and expenses
pub fn plan_proration(
    annual_target: Decimal,
    orders: &[ProrationOrder],
    expenses: &[ProrationExpense],
) -> ProrationPlan {
    let total_order_amount: Decimal = orders.iter().map(|o| o.contract_amount).sum();
    let total_expense_amount: Decimal = expenses.iter().map(|e| e.amount).sum();
    let base = allocation_base(annual_target, total_order_amount);

    let skipped = if expenses.is_empty() {
        Some(ProrationSkip::NoExpenses)
    } else if orders.is_empty() {
        Some(ProrationSkip::NoOrders)
    } else if base <= Decimal::ZERO {
        Some(ProrationSkip::NonPositiveBase)
    } else {
        None
    };

    let mut lines = Vec::new();
    let mut order_costs = Vec::with_capacity(orders.len());

    for order in orders {
        let mut cost = Decimal::ZERO;
        if skipped.is_none() && order.contract_amount > Decimal::ZERO {
            for expense in expenses {
                let allocated = allocate_amount(order.contract_amount, base, expense.amount);
                cost += allocated;
                lines.push(AllocationLine {
                    expense_id: expense.expense_id,
                    order_id: order.order_id,
                    allocated_amount: allocated,
                });
            }
        }
        order_costs.push((order.order_id, cost));
    }

    let total_allocated: Decimal = lines.iter().map(|l| l.allocated_amount).sum();

    ProrationPlan {
        total_order_amount,
        annual_target,
        allocation_base: base,
        total_expense_amount,
        total_allocated,
        unallocated: total_expense_amount - total_allocated,
        lines,
        order_costs,
        skipped,
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Expense totals split by sign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ExpenseTotals {
    /// Net sum of all amounts
    pub total_expenses: Decimal,
    /// Sum of positive amounts
    pub total_expenditure: Decimal,
    /// Sum of the absolute values of negative amounts
    pub total_income: Decimal,
}

pub fn summarize_expense_amounts(amounts: &[Decimal]) -> ExpenseTotals {
    amounts
        .iter()
        .fold(ExpenseTotals::default(), |mut totals, amount| {
            totals.total_expenses += *amount;
            if *amount >= Decimal::ZERO {
                totals.total_expenditure += *amount;
            } else {
                totals.total_income += amount.abs();
            }
            totals
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn order(amount: &str) -> ProrationOrder {
        ProrationOrder {
            order_id: Uuid::new_v4(),
            contract_amount: dec(amount),
        }
    }

    fn expense(amount: &str) -> ProrationExpense {
        ProrationExpense {
            expense_id: Uuid::new_v4(),
            amount: dec(amount),
        }
    }

    #[test]
    fn test_base_uses_target_when_sales_fall_short() {
        assert_eq!(
            allocation_base(dec("10000000"), dec("2500000")),
            dec("10000000")
        );
        assert_eq!(
            allocation_base(dec("10000000"), dec("12000000")),
            dec("12000000")
        );
    }

    #[test]
    fn test_allocation_below_target() {
        let orders = vec![order("2000000"), order("3000000")];
        let expenses = vec![expense("100000")];
        let plan = plan_proration(dec("10000000"), &orders, &expenses);

        assert_eq!(plan.skipped, None);
        assert_eq!(plan.allocation_base, dec("10000000"));
        assert_eq!(plan.order_costs[0].1, dec("20000.00"));
        assert_eq!(plan.order_costs[1].1, dec("30000.00"));
        assert_eq!(plan.total_allocated, dec("50000.00"));
        assert_eq!(plan.unallocated, dec("50000.00"));
    }

    #[test]
    fn test_allocation_above_target_spreads_everything() {
        let orders = vec![order("6000000"), order("6000000")];
        let expenses = vec![expense("90000"), expense("-10000")];
        let plan = plan_proration(dec("10000000"), &orders, &expenses);

        assert_eq!(plan.allocation_base, dec("12000000"));
        assert_eq!(plan.lines.len(), 4);
        assert_eq!(plan.total_allocated, dec("80000.00"));
        assert_eq!(plan.unallocated, Decimal::ZERO);
    }

    #[test]
    fn test_zero_amount_orders_get_nothing() {
        let orders = vec![order("0"), order("1000000")];
        let plan = plan_proration(dec("1000000"), &orders, &[expense("1000")]);
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.order_costs[0].1, Decimal::ZERO);
        assert_eq!(plan.order_costs[1].1, dec("1000.00"));
    }

    #[test]
    fn test_skips() {
        let plan = plan_proration(dec("100"), &[order("10")], &[]);
        assert_eq!(plan.skipped, Some(ProrationSkip::NoExpenses));

        let plan = plan_proration(dec("100"), &[], &[expense("10")]);
        assert_eq!(plan.skipped, Some(ProrationSkip::NoOrders));

        let plan = plan_proration(dec("0"), &[order("0")], &[expense("10")]);
        assert_eq!(plan.skipped, Some(ProrationSkip::NonPositiveBase));
        assert!(plan.lines.is_empty());
        assert_eq!(plan.order_costs.len(), 1);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(round_money(dec("0.125")), dec("0.13"));
        assert_eq!(round_money(dec("-0.125")), dec("-0.13"));
        assert_eq!(allocate_amount(dec("1"), dec("3"), dec("1")), dec("0.33"));
    }

    #[test]
    fn test_expense_totals() {
        let totals = summarize_expense_amounts(&[dec("500"), dec("-120"), dec("80")]);
        assert_eq!(totals.total_expenses, dec("460"));
        assert_eq!(totals.total_expenditure, dec("580"));
        assert_eq!(totals.total_income, dec("120"));
    }
}
