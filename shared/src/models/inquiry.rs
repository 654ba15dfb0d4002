//! Sales inquiries (leads) and their follow-up history

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::employee::UserRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Inquiry {
    pub id: Uuid,
    pub area: Option<String>,
    pub inquiry_date: Option<NaiveDate>,
    pub inquiry_source: Option<String>,
    pub company_name: Option<String>,
    pub contact_person: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub packaging_product: String,
    pub machine_type: String,
    pub creator_emp_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InquiryCommunication {
    pub id: Uuid,
    pub inquiry_id: Uuid,
    pub subject: String,
    pub content: Option<String>,
    pub communication_date: Option<NaiveDate>,
    pub creator_emp_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InquiryLog {
    pub id: Uuid,
    /// Kept after the inquiry itself is deleted
    pub inquiry_id: Uuid,
    pub operation: InquiryOperation,
    pub operator_emp_id: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "inquiry_operation", rename_all = "snake_case")
)]
pub enum InquiryOperation {
    Create,
    Update,
    Delete,
}

/// Admins manage every inquiry; everyone else only their own
pub fn can_access_inquiry(role: UserRole, viewer_emp_id: &str, creator_emp_id: &str) -> bool {
    role == UserRole::Admin || viewer_emp_id == creator_emp_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inquiry_visibility() {
        assert!(can_access_inquiry(UserRole::Admin, "A1", "S1"));
        assert!(can_access_inquiry(UserRole::Sales, "S1", "S1"));
        assert!(!can_access_inquiry(UserRole::Sales, "S2", "S1"));
    }
}
