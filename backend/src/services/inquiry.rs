//! Sales inquiries, follow-up communications and the audit log

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use shared::models::{
    can_access_inquiry, Inquiry, InquiryCommunication, InquiryLog, InquiryOperation,
};
use shared::types::{PaginatedResponse, Pagination};
use shared::validation::validate_email;

const INQUIRY_COLUMNS: &str = "id, area, inquiry_date, inquiry_source, company_name, contact_person, \
     phone, email, packaging_product, machine_type, creator_emp_id, created_at, updated_at";

const COMMUNICATION_COLUMNS: &str =
    "id, inquiry_id, subject, content, communication_date, creator_emp_id, created_at, updated_at";

const LOG_COLUMNS: &str = "id, inquiry_id, operation, operator_emp_id, details, created_at";

/// `$1` is the viewer's emp_id, or NULL for admins
const VISIBLE: &str = "($1::text IS NULL OR creator_emp_id = $1)";

const INQUIRY_FILTER: &str = r#"
      AND ($2::text IS NULL OR area ILIKE '%' || $2 || '%')
      AND ($3::text IS NULL OR contact_person ILIKE '%' || $3 || '%')
      AND ($4::text IS NULL OR company_name ILIKE '%' || $4 || '%')
      AND ($5::text IS NULL OR packaging_product ILIKE '%' || $5 || '%')
      AND ($6::text IS NULL OR machine_type ILIKE '%' || $6 || '%')
      AND ($7::text IS NULL OR inquiry_source ILIKE '%' || $7 || '%')
      AND ($8::date IS NULL OR inquiry_date >= $8)
      AND ($9::date IS NULL OR inquiry_date <= $9)
"#;

#[derive(Clone)]
pub struct InquiryService {
    db: PgPool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InquiryInput {
    pub area: Option<String>,
    pub inquiry_date: Option<NaiveDate>,
    pub inquiry_source: Option<String>,
    pub company_name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Contact person is required"))]
    pub contact_person: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Packaging product is required"))]
    pub packaging_product: String,
    #[validate(length(min = 1, max = 200, message = "Machine type is required"))]
    pub machine_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct InquiryFilter {
    pub area: Option<String>,
    pub contact_person: Option<String>,
    pub company_name: Option<String>,
    pub packaging_product: Option<String>,
    pub machine_type: Option<String>,
    pub inquiry_source: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommunicationInput {
    #[validate(length(min = 1, max = 200, message = "Subject is required"))]
    pub subject: String,
    pub content: Option<String>,
    pub communication_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InquiryLogFilter {
    pub operation: Option<InquiryOperation>,
    pub operator: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct InquiryStats {
    pub total: i64,
    pub by_source: Vec<LabelCount>,
    pub by_area: Vec<LabelCount>,
}

/// Inquiry with its communications
#[derive(Debug, Serialize)]
pub struct InquiryDetail {
    #[serde(flatten)]
    pub inquiry: Inquiry,
    pub communications: Vec<InquiryCommunication>,
}

impl InquiryInput {
    /// Trim strings, drop empty optionals and check the email
    fn normalized(mut self) -> AppResult<Self> {
        self.validate()?;
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }
        self.area = clean(self.area);
        self.inquiry_source = clean(self.inquiry_source);
        self.company_name = clean(self.company_name);
        self.phone = clean(self.phone);
        self.email = clean(self.email);
        self.contact_person = self.contact_person.trim().to_string();
        self.packaging_product = self.packaging_product.trim().to_string();
        self.machine_type = self.machine_type.trim().to_string();

        for (field, value) in [
            ("contact_person", &self.contact_person),
            ("packaging_product", &self.packaging_product),
            ("machine_type", &self.machine_type),
        ] {
            if value.is_empty() {
                return Err(AppError::validation(field, &format!("{} is required", field), "必填字段不能为空"));
            }
        }
        if let Some(email) = &self.email {
            validate_email(email).map_err(|msg| AppError::validation("email", msg, "邮箱格式不正确"))?;
        }
        Ok(self)
    }
}

/// Summary of changed fields for the audit log
pub fn describe_changes(before: &Inquiry, after: &InquiryInput) -> String {
    let mut changes = Vec::new();
    let mut diff = |field: &str, old: Option<&str>, new: Option<&str>| {
        if old != new {
            changes.push(format!("{}: {} -> {}", field, old.unwrap_or(""), new.unwrap_or("")));
        }
    };
    diff("area", before.area.as_deref(), after.area.as_deref());
    diff("inquiry_source", before.inquiry_source.as_deref(), after.inquiry_source.as_deref());
    diff("company_name", before.company_name.as_deref(), after.company_name.as_deref());
    diff("contact_person", Some(&before.contact_person), Some(&after.contact_person));
    diff("phone", before.phone.as_deref(), after.phone.as_deref());
    diff("email", before.email.as_deref(), after.email.as_deref());
    diff("packaging_product", Some(&before.packaging_product), Some(&after.packaging_product));
    diff("machine_type", Some(&before.machine_type), Some(&after.machine_type));

    let old_date = before.inquiry_date.map(|d| d.to_string());
    let new_date = after.inquiry_date.map(|d| d.to_string());
    diff("inquiry_date", old_date.as_deref(), new_date.as_deref());

    if changes.is_empty() {
        "no field changes".to_string()
    } else {
        changes.join("; ")
    }
}

fn scope(user: &AuthUser) -> Option<&str> {
    if user.is_admin() {
        None
    } else {
        Some(user.emp_id.as_str())
    }
}

async fn write_log(
    conn: &mut PgConnection,
    inquiry_id: Uuid,
    operation: InquiryOperation,
    operator: &str,
    details: &str,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO inquiry_logs (inquiry_id, operation, operator_emp_id, details) VALUES ($1, $2, $3, $4)",
    )
    .bind(inquiry_id)
    .bind(operation)
    .bind(operator)
    .bind(details)
    .execute(conn)
    .await?;
    Ok(())
}

impl InquiryService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        user: &AuthUser,
        filter: &InquiryFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Inquiry>> {
        let where_clause = format!("WHERE {} {}", VISIBLE, INQUIRY_FILTER);

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM inquiries {}", where_clause))
            .bind(scope(user))
            .bind(&filter.area)
            .bind(&filter.contact_person)
            .bind(&filter.company_name)
            .bind(&filter.packaging_product)
            .bind(&filter.machine_type)
            .bind(&filter.inquiry_source)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_one(&self.db)
            .await?;

        let inquiries = sqlx::query_as::<_, Inquiry>(&format!(
            "SELECT {} FROM inquiries {} ORDER BY inquiry_date DESC NULLS LAST, created_at DESC LIMIT $10 OFFSET $11",
            INQUIRY_COLUMNS, where_clause
        ))
        .bind(scope(user))
        .bind(&filter.area)
        .bind(&filter.contact_person)
        .bind(&filter.company_name)
        .bind(&filter.packaging_product)
        .bind(&filter.machine_type)
        .bind(&filter.inquiry_source)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(inquiries, pagination, total))
    }

    /// Load an inquiry the user may access
    pub async fn get(&self, user: &AuthUser, id: Uuid) -> AppResult<Inquiry> {
        let inquiry = sqlx::query_as::<_, Inquiry>(&format!(
            "SELECT {} FROM inquiries WHERE id = $1",
            INQUIRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inquiry".to_string()))?;

        if !can_access_inquiry(user.role, &user.emp_id, &inquiry.creator_emp_id) {
            return Err(AppError::Forbidden {
                message: "You can only access inquiries you created".to_string(),
                message_zh: "只能访问自己创建的询盘".to_string(),
            });
        }
        Ok(inquiry)
    }

    pub async fn detail(&self, user: &AuthUser, id: Uuid) -> AppResult<InquiryDetail> {
        let inquiry = self.get(user, id).await?;
        let communications = self.fetch_communications(id).await?;
        Ok(InquiryDetail {
            inquiry,
            communications,
        })
    }

    pub async fn create(&self, user: &AuthUser, input: InquiryInput) -> AppResult<Inquiry> {
        let input = input.normalized()?;
        let mut tx = self.db.begin().await?;

        let inquiry = sqlx::query_as::<_, Inquiry>(&format!(
            r#"
            INSERT INTO inquiries (area, inquiry_date, inquiry_source, company_name, contact_person,
                                   phone, email, packaging_product, machine_type, creator_emp_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            INQUIRY_COLUMNS
        ))
        .bind(&input.area)
        .bind(input.inquiry_date)
        .bind(&input.inquiry_source)
        .bind(&input.company_name)
        .bind(&input.contact_person)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.packaging_product)
        .bind(&input.machine_type)
        .bind(&user.emp_id)
        .fetch_one(&mut *tx)
        .await?;

        let details = format!(
            "created inquiry from {} ({})",
            inquiry.contact_person,
            inquiry.company_name.as_deref().unwrap_or("-")
        );
        write_log(&mut tx, inquiry.id, InquiryOperation::Create, &user.emp_id, &details).await?;
        tx.commit().await?;

        tracing::info!(id = %inquiry.id, creator = %user.emp_id, "Inquiry created");
        Ok(inquiry)
    }

    pub async fn update(&self, user: &AuthUser, id: Uuid, input: InquiryInput) -> AppResult<Inquiry> {
        let before = self.get(user, id).await?;
        let input = input.normalized()?;
        let details = describe_changes(&before, &input);

        let mut tx = self.db.begin().await?;
        let inquiry = sqlx::query_as::<_, Inquiry>(&format!(
            r#"
            UPDATE inquiries SET
                area = $2, inquiry_date = $3, inquiry_source = $4, company_name = $5,
                contact_person = $6, phone = $7, email = $8, packaging_product = $9,
                machine_type = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INQUIRY_COLUMNS
        ))
        .bind(id)
        .bind(&input.area)
        .bind(input.inquiry_date)
        .bind(&input.inquiry_source)
        .bind(&input.company_name)
        .bind(&input.contact_person)
        .bind(&input.phone)
        .bind(&input.email)
        .bind(&input.packaging_product)
        .bind(&input.machine_type)
        .fetch_one(&mut *tx)
        .await?;

        write_log(&mut tx, id, InquiryOperation::Update, &user.emp_id, &details).await?;
        tx.commit().await?;

        Ok(inquiry)
    }

    pub async fn delete(&self, user: &AuthUser, id: Uuid) -> AppResult<()> {
        let inquiry = self.get(user, id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM inquiries WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let details = format!(
            "deleted inquiry from {} ({})",
            inquiry.contact_person,
            inquiry.company_name.as_deref().unwrap_or("-")
        );
        write_log(&mut tx, id, InquiryOperation::Delete, &user.emp_id, &details).await?;
        tx.commit().await?;

        tracing::info!(id = %id, operator = %user.emp_id, "Inquiry deleted");
        Ok(())
    }

    pub async fn stats(&self, user: &AuthUser) -> AppResult<InquiryStats> {
        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM inquiries WHERE {}", VISIBLE))
            .bind(scope(user))
            .fetch_one(&self.db)
            .await?;

        let grouped = |column: &str| {
            format!(
                r#"
                SELECT COALESCE(NULLIF({col}, ''), 'unknown') AS label, COUNT(*) AS count
                FROM inquiries WHERE {vis}
                GROUP BY 1 ORDER BY count DESC, label
                "#,
                col = column,
                vis = VISIBLE
            )
        };

        let by_source = sqlx::query_as::<_, LabelCount>(&grouped("inquiry_source"))
            .bind(scope(user))
            .fetch_all(&self.db)
            .await?;
        let by_area = sqlx::query_as::<_, LabelCount>(&grouped("area"))
            .bind(scope(user))
            .fetch_all(&self.db)
            .await?;

        Ok(InquiryStats {
            total,
            by_source,
            by_area,
        })
    }

    // ========================================================================
    // Communications
    // ========================================================================

    async fn fetch_communications(&self, inquiry_id: Uuid) -> AppResult<Vec<InquiryCommunication>> {
        let rows = sqlx::query_as::<_, InquiryCommunication>(&format!(
            "SELECT {} FROM inquiry_communications WHERE inquiry_id = $1 \
             ORDER BY communication_date DESC NULLS LAST, created_at DESC",
            COMMUNICATION_COLUMNS
        ))
        .bind(inquiry_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn list_communications(
        &self,
        user: &AuthUser,
        inquiry_id: Uuid,
    ) -> AppResult<Vec<InquiryCommunication>> {
        self.get(user, inquiry_id).await?;
        self.fetch_communications(inquiry_id).await
    }

    pub async fn add_communication(
        &self,
        user: &AuthUser,
        inquiry_id: Uuid,
        input: CommunicationInput,
    ) -> AppResult<InquiryCommunication> {
        input.validate()?;
        self.get(user, inquiry_id).await?;

        let row = sqlx::query_as::<_, InquiryCommunication>(&format!(
            r#"
            INSERT INTO inquiry_communications (inquiry_id, subject, content, communication_date, creator_emp_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            COMMUNICATION_COLUMNS
        ))
        .bind(inquiry_id)
        .bind(input.subject.trim())
        .bind(&input.content)
        .bind(input.communication_date)
        .bind(&user.emp_id)
        .fetch_one(&self.db)
        .await?;

        Ok(row)
    }

    pub async fn update_communication(
        &self,
        user: &AuthUser,
        inquiry_id: Uuid,
        communication_id: Uuid,
        input: CommunicationInput,
    ) -> AppResult<InquiryCommunication> {
        input.validate()?;
        self.get(user, inquiry_id).await?;

        sqlx::query_as::<_, InquiryCommunication>(&format!(
            r#"
            UPDATE inquiry_communications
            SET subject = $3, content = $4, communication_date = $5, updated_at = NOW()
            WHERE id = $1 AND inquiry_id = $2
            RETURNING {}
            "#,
            COMMUNICATION_COLUMNS
        ))
        .bind(communication_id)
        .bind(inquiry_id)
        .bind(input.subject.trim())
        .bind(&input.content)
        .bind(input.communication_date)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Communication".to_string()))
    }

    pub async fn delete_communication(
        &self,
        user: &AuthUser,
        inquiry_id: Uuid,
        communication_id: Uuid,
    ) -> AppResult<()> {
        self.get(user, inquiry_id).await?;

        let result = sqlx::query("DELETE FROM inquiry_communications WHERE id = $1 AND inquiry_id = $2")
            .bind(communication_id)
            .bind(inquiry_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Communication".to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Audit log
    // ========================================================================

    pub async fn logs(
        &self,
        filter: &InquiryLogFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<InquiryLog>> {
        const WHERE: &str = r#"
            WHERE ($1::inquiry_operation IS NULL OR operation = $1)
              AND ($2::text IS NULL OR operator_emp_id ILIKE '%' || $2 || '%')
              AND ($3::date IS NULL OR created_at >= $3::date)
              AND ($4::date IS NULL OR created_at < $4::date + 1)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM inquiry_logs {}", WHERE))
            .bind(filter.operation)
            .bind(&filter.operator)
            .bind(filter.start_date)
            .bind(filter.end_date)
            .fetch_one(&self.db)
            .await?;

        let logs = sqlx::query_as::<_, InquiryLog>(&format!(
            "SELECT {} FROM inquiry_logs {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
            LOG_COLUMNS, WHERE
        ))
        .bind(filter.operation)
        .bind(&filter.operator)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(logs, pagination, total))
    }
}
