//! Sales order models and derived amounts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default product name for a new order line
pub const DEFAULT_MACHINE_NAME: &str = "Packing machine";
/// Default unit of measure
pub const DEFAULT_UNIT: &str = "set";
/// Default payment method
pub const DEFAULT_PAY_TYPE: &str = "T/T";

/// Default VAT rate in percent
pub fn default_tax_rate() -> Decimal {
    Decimal::new(1300, 2)
}

/// A customer order for one or more machines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Order {
    pub id: Uuid,
    pub is_new: bool,
    pub area: Option<String>,
    pub customer_name: Option<String>,
    pub customer_type: Option<String>,
    pub order_time: Option<NaiveDate>,
    pub ship_time: Option<NaiveDate>,
    pub ship_country: Option<String>,
    pub contract_no: Option<String>,
    pub order_no: Option<String>,
    pub machine_no: Option<String>,
    pub machine_name: String,
    pub machine_model: Option<String>,
    pub machine_count: i32,
    pub unit: String,
    pub contract_amount: Decimal,
    pub deposit: Decimal,
    pub balance: Decimal,
    pub tax_rate: Decimal,
    pub tax_refund_amount: Decimal,
    pub currency_amount: Decimal,
    pub payment_received: Decimal,
    pub machine_cost: Decimal,
    pub gross_profit: Decimal,
    /// Share of company-wide expenses assigned by proration
    pub proportionate_cost: Decimal,
    /// Sum of order-specific expenses
    pub individual_cost: Decimal,
    pub net_profit: Decimal,
    pub pay_type: String,
    pub commission: Decimal,
    pub latest_ship_date: Option<NaiveDate>,
    pub expected_delivery: Option<NaiveDate>,
    pub order_dept: Option<String>,
    pub check_requirement: Option<String>,
    pub attachment_imgs: Vec<String>,
    pub attachment_videos: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Recompute balance and profit figures from their inputs
    pub fn recompute_derived(&mut self) {
        let derived = DerivedAmounts::compute(
            self.contract_amount,
            self.deposit,
            self.machine_cost,
            self.proportionate_cost,
            self.individual_cost,
        );
        self.balance = derived.balance;
        self.gross_profit = derived.gross_profit;
        self.net_profit = derived.net_profit;
    }
}

/// Amounts that are always derived, never entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedAmounts {
    pub balance: Decimal,
    pub gross_profit: Decimal,
    pub net_profit: Decimal,
}

impl DerivedAmounts {
    pub fn compute(
        contract_amount: Decimal,
        deposit: Decimal,
        machine_cost: Decimal,
        proportionate_cost: Decimal,
        individual_cost: Decimal,
    ) -> Self {
        let gross_profit = contract_amount - machine_cost;
        Self {
            balance: contract_amount - deposit,
            gross_profit,
            net_profit: gross_profit - proportionate_cost - individual_cost,
        }
    }
}

/// Order with expense allocation totals attached
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithExpenses {
    #[serde(flatten)]
    pub order: Order,
    pub total_expense_allocation: Decimal,
    pub net_profit_with_expense: Decimal,
}

impl OrderWithExpenses {
    pub fn new(order: Order, total_expense_allocation: Decimal) -> Self {
        let net_profit_with_expense =
            order.gross_profit - order.proportionate_cost - order.individual_cost;
        Self {
            order,
            total_expense_allocation,
            net_profit_with_expense,
        }
    }
}

/// Aggregate order figures
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderStatistics {
    pub total_orders: i64,
    pub total_contract_amount: Decimal,
    pub total_gross_profit: Decimal,
    pub total_net_profit: Decimal,
}

/// Expense assigned directly to a single order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct IndividualExpense {
    pub id: Uuid,
    pub order_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_derived_amounts() {
        let d = DerivedAmounts::compute(
            dec("100000.00"),
            dec("30000.00"),
            dec("60000.00"),
            dec("5000.00"),
            dec("1200.50"),
        );
        assert_eq!(d.balance, dec("70000.00"));
        assert_eq!(d.gross_profit, dec("40000.00"));
        assert_eq!(d.net_profit, dec("33799.50"));
    }

    #[test]
    fn test_default_tax_rate() {
        assert_eq!(default_tax_rate(), dec("13.00"));
    }
}
