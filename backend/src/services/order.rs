//! Order bookkeeping and order-specific expenses

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::models::{
    default_tax_rate, IndividualExpense, Order, OrderStatistics, OrderWithExpenses,
    DEFAULT_MACHINE_NAME, DEFAULT_PAY_TYPE, DEFAULT_UNIT,
};
use shared::types::{PaginatedResponse, Pagination};
use shared::validation::validate_non_negative;

/// Column list matching [`Order`]'s field order
pub(crate) const ORDER_COLUMNS: &str = "id, is_new, area, customer_name, customer_type, order_time, \
     ship_time, ship_country, contract_no, order_no, machine_no, machine_name, machine_model, \
     machine_count, unit, contract_amount, deposit, balance, tax_rate, tax_refund_amount, \
     currency_amount, payment_received, machine_cost, gross_profit, proportionate_cost, \
     individual_cost, net_profit, pay_type, commission, latest_ship_date, expected_delivery, \
     order_dept, check_requirement, attachment_imgs, attachment_videos, created_at, updated_at";

const INDIVIDUAL_COLUMNS: &str = "id, order_id, name, amount, remark, created_at, updated_at";

const ORDER_FILTER: &str = r#"
    WHERE ($1::text IS NULL OR customer_name ILIKE '%' || $1 || '%')
      AND ($2::text IS NULL OR contract_no ILIKE '%' || $2 || '%')
      AND ($3::text IS NULL OR order_no ILIKE '%' || $3 || '%')
      AND ($4::text IS NULL OR area ILIKE '%' || $4 || '%')
      AND ($5::text IS NULL OR machine_model ILIKE '%' || $5 || '%')
      AND ($6::date IS NULL OR order_time >= $6)
      AND ($7::date IS NULL OR order_time <= $7)
"#;

/// Order service
#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
}

/// Editable order fields; absent fields keep their current value
#[derive(Debug, Default, Deserialize)]
pub struct OrderInput {
    pub is_new: Option<bool>,
    pub area: Option<String>,
    pub customer_name: Option<String>,
    pub customer_type: Option<String>,
    pub order_time: Option<NaiveDate>,
    pub ship_time: Option<NaiveDate>,
    pub ship_country: Option<String>,
    pub contract_no: Option<String>,
    pub order_no: Option<String>,
    pub machine_no: Option<String>,
    pub machine_name: Option<String>,
    pub machine_model: Option<String>,
    pub machine_count: Option<i32>,
    pub unit: Option<String>,
    pub contract_amount: Option<Decimal>,
    pub deposit: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
    pub tax_refund_amount: Option<Decimal>,
    pub currency_amount: Option<Decimal>,
    pub payment_received: Option<Decimal>,
    pub machine_cost: Option<Decimal>,
    pub pay_type: Option<String>,
    pub commission: Option<Decimal>,
    pub latest_ship_date: Option<NaiveDate>,
    pub expected_delivery: Option<NaiveDate>,
    pub order_dept: Option<String>,
    pub check_requirement: Option<String>,
    pub attachment_imgs: Option<Vec<String>>,
    pub attachment_videos: Option<Vec<String>>,
}

/// Query filters for orders
#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub customer_name: Option<String>,
    pub contract_no: Option<String>,
    pub order_no: Option<String>,
    pub area: Option<String>,
    pub machine_model: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Row in an order listing
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OrderListItem {
    Plain(Order),
    WithExpenses(OrderWithExpenses),
}

#[derive(Debug, Deserialize)]
pub struct IndividualExpenseInput {
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub remark: Option<String>,
}

/// A blank order with catalogue defaults
pub fn new_order() -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        is_new: true,
        area: None,
        customer_name: None,
        customer_type: None,
        order_time: None,
        ship_time: None,
        ship_country: None,
        contract_no: None,
        order_no: None,
        machine_no: None,
        machine_name: DEFAULT_MACHINE_NAME.to_string(),
        machine_model: None,
        machine_count: 1,
        unit: DEFAULT_UNIT.to_string(),
        contract_amount: Decimal::ZERO,
        deposit: Decimal::ZERO,
        balance: Decimal::ZERO,
        tax_rate: default_tax_rate(),
        tax_refund_amount: Decimal::ZERO,
        currency_amount: Decimal::ZERO,
        payment_received: Decimal::ZERO,
        machine_cost: Decimal::ZERO,
        gross_profit: Decimal::ZERO,
        proportionate_cost: Decimal::ZERO,
        individual_cost: Decimal::ZERO,
        net_profit: Decimal::ZERO,
        pay_type: DEFAULT_PAY_TYPE.to_string(),
        commission: Decimal::ZERO,
        latest_ship_date: None,
        expected_delivery: None,
        order_dept: None,
        check_requirement: None,
        attachment_imgs: Vec::new(),
        attachment_videos: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Merge input into an order, recompute derived amounts and validate
pub fn apply_order_input(order: &mut Order, input: OrderInput) -> AppResult<()> {
    macro_rules! merge {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = input.$field { order.$field = value; })*
        };
    }
    macro_rules! merge_opt {
        ($($field:ident),* $(,)?) => {
            $(if input.$field.is_some() { order.$field = input.$field; })*
        };
    }

    merge!(
        is_new, machine_name, machine_count, unit, contract_amount, deposit, tax_rate,
        tax_refund_amount, currency_amount, payment_received, machine_cost, pay_type,
        commission, attachment_imgs, attachment_videos,
    );
    merge_opt!(
        area, customer_name, customer_type, order_time, ship_time, ship_country, contract_no,
        order_no, machine_no, machine_model, latest_ship_date, expected_delivery, order_dept,
        check_requirement,
    );

    validate_order(order)?;
    order.recompute_derived();
    Ok(())
}

fn validate_order(order: &Order) -> AppResult<()> {
    let amounts = [
        ("contract_amount", order.contract_amount, "合同金额不能为负数"),
        ("deposit", order.deposit, "定金不能为负数"),
        ("machine_cost", order.machine_cost, "机器成本不能为负数"),
        ("tax_rate", order.tax_rate, "税率不能为负数"),
    ];
    for (field, amount, message_zh) in amounts {
        validate_non_negative(amount)
            .map_err(|msg| AppError::validation(field, msg, message_zh))?;
    }
    if order.machine_count < 0 {
        return Err(AppError::validation(
            "machine_count",
            "Machine count cannot be negative",
            "机器数量不能为负数",
        ));
    }
    if order.machine_name.trim().is_empty() {
        return Err(AppError::validation(
            "machine_name",
            "Machine name is required",
            "机器名称不能为空",
        ));
    }
    Ok(())
}

impl OrderService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        filter: &OrderFilter,
        pagination: &Pagination,
        include_expense_allocations: bool,
    ) -> AppResult<PaginatedResponse<OrderListItem>> {
        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM orders {}", ORDER_FILTER))
            .bind(&filter.customer_name)
            .bind(&filter.contract_no)
            .bind(&filter.order_no)
            .bind(&filter.area)
            .bind(&filter.machine_model)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_one(&self.db)
            .await?;

        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders {} ORDER BY created_at DESC LIMIT $8 OFFSET $9",
            ORDER_COLUMNS, ORDER_FILTER
        ))
        .bind(&filter.customer_name)
        .bind(&filter.contract_no)
        .bind(&filter.order_no)
        .bind(&filter.area)
        .bind(&filter.machine_model)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let items = if include_expense_allocations {
            let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
            let totals = sqlx::query_as::<_, (Uuid, Decimal)>(
                r#"
                SELECT order_id, COALESCE(SUM(allocated_amount), 0)
                FROM expense_allocations
                WHERE order_id = ANY($1)
                GROUP BY order_id
                "#,
            )
            .bind(&ids)
            .fetch_all(&self.db)
            .await?;

            orders
                .into_iter()
                .map(|order| {
                    let allocated = totals
                        .iter()
                        .find(|(id, _)| *id == order.id)
                        .map(|(_, sum)| *sum)
                        .unwrap_or(Decimal::ZERO);
                    OrderListItem::WithExpenses(OrderWithExpenses::new(order, allocated))
                })
                .collect()
        } else {
            orders.into_iter().map(OrderListItem::Plain).collect()
        };

        Ok(PaginatedResponse::new(items, pagination, total))
    }

    /// Every order matching the filter, for export
    pub async fn export(&self, filter: &OrderFilter) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders {} ORDER BY created_at DESC",
            ORDER_COLUMNS, ORDER_FILTER
        ))
        .bind(&filter.customer_name)
        .bind(&filter.contract_no)
        .bind(&filter.order_no)
        .bind(&filter.area)
        .bind(&filter.machine_model)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.db)
        .await?;

        Ok(orders)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Order> {
        sqlx::query_as::<_, Order>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))
    }

    pub async fn create(&self, input: OrderInput) -> AppResult<Order> {
        let mut order = new_order();
        apply_order_input(&mut order, input)?;

        let created = bind_order(
            sqlx::query_as::<_, Order>(&format!(
                r#"
                INSERT INTO orders ({cols})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                        $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30,
                        $31, $32, $33, $34, $35, NOW(), NOW())
                RETURNING {cols}
                "#,
                cols = ORDER_COLUMNS
            )),
            &order,
        )
        .fetch_one(&self.db)
        .await?;

        tracing::info!(order_id = %created.id, contract_no = ?created.contract_no, "Order created");
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, input: OrderInput) -> AppResult<Order> {
        let mut order = self.get(id).await?;
        apply_order_input(&mut order, input)?;

        let updated = bind_order(
            sqlx::query_as::<_, Order>(&format!(
                r#"
                UPDATE orders SET
                    is_new = $2, area = $3, customer_name = $4, customer_type = $5,
                    order_time = $6, ship_time = $7, ship_country = $8, contract_no = $9,
                    order_no = $10, machine_no = $11, machine_name = $12, machine_model = $13,
                    machine_count = $14, unit = $15, contract_amount = $16, deposit = $17,
                    balance = $18, tax_rate = $19, tax_refund_amount = $20,
                    currency_amount = $21, payment_received = $22, machine_cost = $23,
                    gross_profit = $24, proportionate_cost = $25, individual_cost = $26,
                    net_profit = $27, pay_type = $28, commission = $29,
                    latest_ship_date = $30, expected_delivery = $31, order_dept = $32,
                    check_requirement = $33, attachment_imgs = $34, attachment_videos = $35,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING {}
                "#,
                ORDER_COLUMNS
            )),
            &order,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Order".to_string()));
        }

        tracing::info!(order_id = %id, "Order deleted");
        Ok(())
    }

    pub async fn statistics(&self, filter: &OrderFilter) -> AppResult<OrderStatistics> {
        let (total_orders, total_contract_amount, total_gross_profit, total_net_profit) =
            sqlx::query_as::<_, (i64, Decimal, Decimal, Decimal)>(&format!(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(contract_amount), 0),
                       COALESCE(SUM(gross_profit), 0),
                       COALESCE(SUM(net_profit), 0)
                FROM orders {}
                "#,
                ORDER_FILTER
            ))
            .bind(&filter.customer_name)
            .bind(&filter.contract_no)
            .bind(&filter.order_no)
            .bind(&filter.area)
            .bind(&filter.machine_model)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_one(&self.db)
            .await?;

        Ok(OrderStatistics {
            total_orders,
            total_contract_amount,
            total_gross_profit,
            total_net_profit,
        })
    }

    // ========================================================================
    // Individual expenses
    // ========================================================================

    pub async fn list_individual_expenses(&self, order_id: Uuid) -> AppResult<Vec<IndividualExpense>> {
        self.get(order_id).await?;

        let expenses = sqlx::query_as::<_, IndividualExpense>(&format!(
            "SELECT {} FROM order_individual_expenses WHERE order_id = $1 ORDER BY created_at",
            INDIVIDUAL_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(expenses)
    }

    pub async fn add_individual_expense(
        &self,
        order_id: Uuid,
        input: IndividualExpenseInput,
    ) -> AppResult<IndividualExpense> {
        self.get(order_id).await?;
        let name = required_name(input.name.as_deref())?;
        let amount = input.amount.unwrap_or(Decimal::ZERO);
        validate_individual_amount(amount)?;

        let mut tx = self.db.begin().await?;
        let expense = sqlx::query_as::<_, IndividualExpense>(&format!(
            r#"
            INSERT INTO order_individual_expenses (order_id, name, amount, remark)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            INDIVIDUAL_COLUMNS
        ))
        .bind(order_id)
        .bind(name)
        .bind(amount)
        .bind(&input.remark)
        .fetch_one(&mut *tx)
        .await?;

        refresh_individual_cost(&mut tx, order_id).await?;
        tx.commit().await?;

        Ok(expense)
    }

    pub async fn update_individual_expense(
        &self,
        order_id: Uuid,
        expense_id: Uuid,
        input: IndividualExpenseInput,
    ) -> AppResult<IndividualExpense> {
        let existing = self.individual_expense(order_id, expense_id).await?;
        let name = match input.name.as_deref() {
            Some(name) => required_name(Some(name))?.to_string(),
            None => existing.name,
        };
        let amount = input.amount.unwrap_or(existing.amount);
        validate_individual_amount(amount)?;

        let mut tx = self.db.begin().await?;
        let expense = sqlx::query_as::<_, IndividualExpense>(&format!(
            r#"
            UPDATE order_individual_expenses
            SET name = $2, amount = $3, remark = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INDIVIDUAL_COLUMNS
        ))
        .bind(expense_id)
        .bind(&name)
        .bind(amount)
        .bind(input.remark.or(existing.remark))
        .fetch_one(&mut *tx)
        .await?;

        refresh_individual_cost(&mut tx, order_id).await?;
        tx.commit().await?;

        Ok(expense)
    }

    pub async fn delete_individual_expense(&self, order_id: Uuid, expense_id: Uuid) -> AppResult<()> {
        self.individual_expense(order_id, expense_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM order_individual_expenses WHERE id = $1")
            .bind(expense_id)
            .execute(&mut *tx)
            .await?;
        refresh_individual_cost(&mut tx, order_id).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn individual_expense(&self, order_id: Uuid, expense_id: Uuid) -> AppResult<IndividualExpense> {
        sqlx::query_as::<_, IndividualExpense>(&format!(
            "SELECT {} FROM order_individual_expenses WHERE id = $1 AND order_id = $2",
            INDIVIDUAL_COLUMNS
        ))
        .bind(expense_id)
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Individual expense".to_string()))
    }
}

/// Bind every column of [`Order`] except the timestamps, in declaration order
fn bind_order<'q>(
    query: sqlx::query::QueryAs<'q, Postgres, Order, sqlx::postgres::PgArguments>,
    order: &'q Order,
) -> sqlx::query::QueryAs<'q, Postgres, Order, sqlx::postgres::PgArguments> {
    query
        .bind(order.id)
        .bind(order.is_new)
        .bind(&order.area)
        .bind(&order.customer_name)
        .bind(&order.customer_type)
        .bind(order.order_time)
        .bind(order.ship_time)
        .bind(&order.ship_country)
        .bind(&order.contract_no)
        .bind(&order.order_no)
        .bind(&order.machine_no)
        .bind(&order.machine_name)
        .bind(&order.machine_model)
        .bind(order.machine_count)
        .bind(&order.unit)
        .bind(order.contract_amount)
        .bind(order.deposit)
        .bind(order.balance)
        .bind(order.tax_rate)
        .bind(order.tax_refund_amount)
        .bind(order.currency_amount)
        .bind(order.payment_received)
        .bind(order.machine_cost)
        .bind(order.gross_profit)
        .bind(order.proportionate_cost)
        .bind(order.individual_cost)
        .bind(order.net_profit)
        .bind(&order.pay_type)
        .bind(order.commission)
        .bind(order.latest_ship_date)
        .bind(order.expected_delivery)
        .bind(&order.order_dept)
        .bind(&order.check_requirement)
        .bind(&order.attachment_imgs)
        .bind(&order.attachment_videos)
}

/// Recompute an order's individual cost and net profit from its expense rows
async fn refresh_individual_cost(tx: &mut Transaction<'_, Postgres>, order_id: Uuid) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE orders o
        SET individual_cost = s.total,
            net_profit = o.gross_profit - o.proportionate_cost - s.total,
            updated_at = NOW()
        FROM (
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM order_individual_expenses WHERE order_id = $1
        ) s
        WHERE o.id = $1
        "#,
    )
    .bind(order_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn required_name(name: Option<&str>) -> AppResult<&str> {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(AppError::validation("name", "Name is required", "名称不能为空")),
    }
}

fn validate_individual_amount(amount: Decimal) -> AppResult<()> {
    validate_non_negative(amount).map_err(|msg| AppError::validation("amount", msg, "金额不能为负数"))
}
