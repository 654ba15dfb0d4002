//! CSV exports for punch records and orders

use chrono::FixedOffset;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use shared::models::{Order, PunchRecord, PunchStatus};

/// Byte-order mark so spreadsheet tools detect UTF-8
const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Serialize)]
pub struct PunchRecordRow<'a> {
    #[serde(rename = "工号")]
    pub emp_id: &'a str,
    #[serde(rename = "姓名")]
    pub name: &'a str,
    #[serde(rename = "打卡类型")]
    pub punch_type: &'static str,
    #[serde(rename = "打卡时间")]
    pub punch_time: String,
    #[serde(rename = "IP地址")]
    pub client_ip: &'a str,
    #[serde(rename = "设备标识")]
    pub device_mac: &'a str,
    #[serde(rename = "设备来源")]
    pub device_source: &'static str,
    #[serde(rename = "登录设备")]
    pub login_device: &'a str,
    #[serde(rename = "状态")]
    pub status: &'static str,
}

impl<'a> PunchRecordRow<'a> {
    pub fn new(record: &'a PunchRecord, offset: FixedOffset) -> Self {
        Self {
            emp_id: &record.emp_id,
            name: &record.name,
            punch_type: record.punch_type.display_name_zh(),
            punch_time: record
                .punch_time
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            client_ip: record.client_ip.as_deref().unwrap_or(""),
            device_mac: record.device_mac.as_deref().unwrap_or(""),
            device_source: record.device_source.map(|s| s.as_str()).unwrap_or(""),
            login_device: record.login_device.as_deref().unwrap_or(""),
            status: match record.status {
                PunchStatus::Recorded => "已记录",
                PunchStatus::Pending => "待审批",
                PunchStatus::Approved => "已批准",
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderRow<'a> {
    #[serde(rename = "区域")]
    pub area: &'a str,
    #[serde(rename = "客户名称")]
    pub customer_name: &'a str,
    #[serde(rename = "合同号")]
    pub contract_no: &'a str,
    #[serde(rename = "订单号")]
    pub order_no: &'a str,
    #[serde(rename = "下单时间")]
    pub order_time: String,
    #[serde(rename = "发货时间")]
    pub ship_time: String,
    #[serde(rename = "机器名称")]
    pub machine_name: &'a str,
    #[serde(rename = "机器型号")]
    pub machine_model: &'a str,
    #[serde(rename = "数量")]
    pub machine_count: i32,
    #[serde(rename = "合同金额")]
    pub contract_amount: Decimal,
    #[serde(rename = "定金")]
    pub deposit: Decimal,
    #[serde(rename = "尾款")]
    pub balance: Decimal,
    #[serde(rename = "机器成本")]
    pub machine_cost: Decimal,
    #[serde(rename = "毛利")]
    pub gross_profit: Decimal,
    #[serde(rename = "分摊费用")]
    pub proportionate_cost: Decimal,
    #[serde(rename = "单独费用")]
    pub individual_cost: Decimal,
    #[serde(rename = "净利润")]
    pub net_profit: Decimal,
}

impl<'a> From<&'a Order> for OrderRow<'a> {
    fn from(order: &'a Order) -> Self {
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        Self {
            area: order.area.as_deref().unwrap_or(""),
            customer_name: order.customer_name.as_deref().unwrap_or(""),
            contract_no: order.contract_no.as_deref().unwrap_or(""),
            order_no: order.order_no.as_deref().unwrap_or(""),
            order_time: date(order.order_time),
            ship_time: date(order.ship_time),
            machine_name: &order.machine_name,
            machine_model: order.machine_model.as_deref().unwrap_or(""),
            machine_count: order.machine_count,
            contract_amount: order.contract_amount,
            deposit: order.deposit,
            balance: order.balance,
            machine_cost: order.machine_cost,
            gross_profit: order.gross_profit,
            proportionate_cost: order.proportionate_cost,
            individual_cost: order.individual_cost,
            net_profit: order.net_profit,
        }
    }
}

/// Serialize rows as CSV, prefixed with a UTF-8 BOM
pub fn to_csv<T: Serialize>(rows: &[T]) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
    let body = String::from_utf8(bytes)
        .map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))?;
    Ok(format!("{}{}", UTF8_BOM, body))
}

pub fn punch_records_csv(records: &[PunchRecord], offset: FixedOffset) -> AppResult<String> {
    let rows: Vec<_> = records.iter().map(|r| PunchRecordRow::new(r, offset)).collect();
    to_csv(&rows)
}

pub fn orders_csv(orders: &[Order]) -> AppResult<String> {
    let rows: Vec<OrderRow<'_>> = orders.iter().map(OrderRow::from).collect();
    to_csv(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::models::{DeviceSource, PunchType};
    use uuid::Uuid;

    fn record() -> PunchRecord {
        let at = Utc.with_ymd_and_hms(2025, 5, 6, 1, 30, 0).unwrap();
        PunchRecord {
            id: Uuid::new_v4(),
            emp_id: "E001".to_string(),
            name: "Li, Wei".to_string(),
            punch_type: PunchType::ClockIn,
            punch_time: at,
            client_ip: Some("192.168.1.20".to_string()),
            device_mac: Some("02:AB:CD:EF:01:23".to_string()),
            device_source: Some(DeviceSource::Fingerprint),
            login_device: None,
            status: PunchStatus::Recorded,
            created_at: at,
        }
    }

    #[test]
    fn test_punch_csv_has_bom_header_and_local_time() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let csv = punch_records_csv(&[record()], offset).unwrap();

        assert!(csv.starts_with(UTF8_BOM));
        let mut lines = csv.trim_start_matches(UTF8_BOM).lines();
        assert!(lines.next().unwrap().starts_with("工号,姓名,打卡类型"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Li, Wei\""));
        assert!(row.contains("2025-05-06 09:30:00"));
        assert!(row.contains("fingerprint"));
    }

    #[test]
    fn test_empty_export_is_just_bom() {
        let csv = orders_csv(&[]).unwrap();
        assert_eq!(csv, UTF8_BOM);
    }
}
