//! Order acceptance inspections and checklist items

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::models::{
    build_item_tree, compute_progress, plan_batch, BatchItemInput, BatchPlanError,
    InspectionItem, InspectionProgress, InspectionResult, InspectionStageLog, InspectionStatus,
    ItemTree, ItemType, OrderInspection, OrderStage,
};
use shared::types::{PaginatedResponse, Pagination};

const INSPECTION_COLUMNS: &str = "id, order_id, inspection_status, progress, total_items, \
     completed_items, remarks, current_stage, stage_time, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, inspection_id, parent_id, item_category, item_name, item_type, \
     inspection_result, photo_paths, description, sort_order, created_at, updated_at";

/// Inspection service
#[derive(Clone)]
pub struct InspectionService {
    db: PgPool,
}

#[derive(Debug, Default, Deserialize)]
pub struct InspectionFilter {
    pub inspection_status: Option<InspectionStatus>,
    pub contract_no: Option<String>,
    pub customer_name: Option<String>,
}

/// Inspection joined with its order's identifying fields
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InspectionListRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub inspection_status: InspectionStatus,
    pub progress: i32,
    pub total_items: i32,
    pub completed_items: i32,
    pub remarks: Option<String>,
    pub current_stage: i16,
    pub stage_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub contract_no: Option<String>,
    pub order_no: Option<String>,
    pub customer_name: Option<String>,
    pub machine_model: Option<String>,
}

/// Order fields shown alongside an inspection
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct OrderBrief {
    pub id: Uuid,
    pub contract_no: Option<String>,
    pub order_no: Option<String>,
    pub customer_name: Option<String>,
    pub machine_name: String,
    pub machine_model: Option<String>,
    pub machine_count: i32,
    pub ship_time: Option<NaiveDate>,
    pub expected_delivery: Option<NaiveDate>,
    pub check_requirement: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InspectionDetail {
    pub inspection: OrderInspection,
    pub order: OrderBrief,
    pub items: ItemTree,
}

#[derive(Debug, Serialize)]
pub struct StageLogView {
    pub stage: i16,
    pub stage_name: &'static str,
    pub stage_name_zh: &'static str,
    pub stage_time: DateTime<Utc>,
}

impl From<InspectionStageLog> for StageLogView {
    fn from(log: InspectionStageLog) -> Self {
        let stage = OrderStage::try_from(log.stage).ok();
        Self {
            stage: log.stage,
            stage_name: stage.map(|s| s.display_name()).unwrap_or("Unknown"),
            stage_name_zh: stage.map(|s| s.display_name_zh()).unwrap_or("未知"),
            stage_time: log.stage_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportCategory {
    pub category: String,
    pub items: Vec<InspectionItem>,
}

/// Printable inspection report
#[derive(Debug, Serialize)]
pub struct InspectionReport {
    pub inspection: OrderInspection,
    pub order: OrderBrief,
    pub result_counts: BTreeMap<&'static str, usize>,
    pub categories: Vec<ReportCategory>,
    pub defects: Vec<InspectionItem>,
    pub stage_history: Vec<StageLogView>,
}

/// Fields for creating or editing a single item
#[derive(Debug, Default, Deserialize)]
pub struct ItemInput {
    pub parent_id: Option<Uuid>,
    pub item_category: Option<String>,
    pub item_name: Option<String>,
    pub item_type: Option<ItemType>,
    pub inspection_result: Option<InspectionResult>,
    pub photo_paths: Option<Vec<String>>,
    pub description: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub created: Vec<Uuid>,
    pub updated: Vec<Uuid>,
    pub deleted: Vec<Uuid>,
    /// Rows sent for update that no longer exist
    pub skipped: Vec<Uuid>,
    pub created_count: usize,
    pub updated_count: usize,
    pub deleted_count: u64,
    pub id_map: HashMap<String, Uuid>,
    pub progress: InspectionProgress,
}

fn result_label(result: InspectionResult) -> &'static str {
    match result {
        InspectionResult::Pending => "pending",
        InspectionResult::Normal => "normal",
        InspectionResult::Defect => "defect",
        InspectionResult::NotApplicable => "not_applicable",
    }
}

/// Sub items grouped by category in checklist order, plus result counts and defects
pub fn summarize_items(
    items: &[InspectionItem],
) -> (BTreeMap<&'static str, usize>, Vec<ReportCategory>, Vec<InspectionItem>) {
    let mut sorted: Vec<&InspectionItem> = items
        .iter()
        .filter(|i| i.item_type == ItemType::Sub)
        .collect();
    sorted.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.created_at.cmp(&b.created_at))
    });

    let mut counts: BTreeMap<&'static str, usize> = [
        InspectionResult::Pending,
        InspectionResult::Normal,
        InspectionResult::Defect,
        InspectionResult::NotApplicable,
    ]
    .into_iter()
    .map(|r| (result_label(r), 0))
    .collect();

    let mut categories: Vec<ReportCategory> = Vec::new();
    let mut defects = Vec::new();

    for item in sorted {
        *counts.entry(result_label(item.inspection_result)).or_default() += 1;
        if item.inspection_result == InspectionResult::Defect {
            defects.push(item.clone());
        }
        match categories.iter_mut().find(|c| c.category == item.item_category) {
            Some(category) => category.items.push(item.clone()),
            None => categories.push(ReportCategory {
                category: item.item_category.clone(),
                items: vec![item.clone()],
            }),
        }
    }

    (counts, categories, defects)
}

fn batch_error(err: BatchPlanError) -> AppError {
    match err {
        BatchPlanError::UnknownParent(id) => AppError::Validation {
            field: "parent_id".to_string(),
            message: format!("Unknown parent item {}", id),
            message_zh: format!("父级项目 {} 不存在", id),
        },
        BatchPlanError::IncompleteItem(id) => AppError::Validation {
            field: "item_name".to_string(),
            message: format!("Item {} needs a name and a category", id),
            message_zh: "项目名称和类别不能为空".to_string(),
        },
    }
}

fn required_text(value: Option<&str>, field: &str, message_zh: &str) -> AppResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::validation(field, &format!("{} is required", field), message_zh)),
    }
}

impl InspectionService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        filter: &InspectionFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<InspectionListRow>> {
        const FROM: &str = r#"
            FROM order_inspections i
            JOIN orders o ON o.id = i.order_id
            WHERE ($1::inspection_status IS NULL OR i.inspection_status = $1)
              AND ($2::text IS NULL OR o.contract_no ILIKE '%' || $2 || '%')
              AND ($3::text IS NULL OR o.customer_name ILIKE '%' || $3 || '%')
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) {}", FROM))
            .bind(filter.inspection_status)
            .bind(&filter.contract_no)
            .bind(&filter.customer_name)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, InspectionListRow>(&format!(
            r#"
            SELECT i.id, i.order_id, i.inspection_status, i.progress, i.total_items,
                   i.completed_items, i.remarks, i.current_stage, i.stage_time,
                   i.created_at, i.updated_at,
                   o.contract_no, o.order_no, o.customer_name, o.machine_model
            {}
            ORDER BY i.created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            FROM
        ))
        .bind(filter.inspection_status)
        .bind(&filter.contract_no)
        .bind(&filter.customer_name)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(rows, pagination, total))
    }

    /// Open an inspection for an order, starting at the first stage
    pub async fn create(&self, order_id: Uuid) -> AppResult<OrderInspection> {
        self.order_brief(order_id).await?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM order_inspections WHERE order_id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.db)
        .await?;
        if exists {
            return Err(AppError::Conflict {
                resource: "order_id".to_string(),
                message: "An inspection already exists for this order".to_string(),
                message_zh: "该订单已有验收记录".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        let inspection = sqlx::query_as::<_, OrderInspection>(&format!(
            r#"
            INSERT INTO order_inspections (order_id, current_stage, stage_time)
            VALUES ($1, $2, NOW())
            RETURNING {}
            "#,
            INSPECTION_COLUMNS
        ))
        .bind(order_id)
        .bind(OrderStage::Ordered.code())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO inspection_stage_logs (inspection_id, stage, stage_time) VALUES ($1, $2, $3)")
            .bind(inspection.id)
            .bind(inspection.current_stage)
            .bind(inspection.stage_time.unwrap_or(inspection.created_at))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(inspection_id = %inspection.id, order_id = %order_id, "Inspection created");
        Ok(inspection)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<OrderInspection> {
        sqlx::query_as::<_, OrderInspection>(&format!(
            "SELECT {} FROM order_inspections WHERE id = $1",
            INSPECTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inspection".to_string()))
    }

    pub async fn detail(&self, id: Uuid) -> AppResult<InspectionDetail> {
        let inspection = self.get(id).await?;
        let order = self.order_brief(inspection.order_id).await?;
        let items = self.items(id).await?;

        Ok(InspectionDetail {
            inspection,
            order,
            items: build_item_tree(items),
        })
    }

    pub async fn update_remarks(&self, id: Uuid, remarks: Option<String>) -> AppResult<OrderInspection> {
        sqlx::query_as::<_, OrderInspection>(&format!(
            "UPDATE order_inspections SET remarks = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            INSPECTION_COLUMNS
        ))
        .bind(id)
        .bind(remarks)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inspection".to_string()))
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM order_inspections WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Inspection".to_string()));
        }
        tracing::info!(inspection_id = %id, "Inspection deleted");
        Ok(())
    }

    /// Recompute progress from the items and store it
    pub async fn refresh_progress(&self, id: Uuid) -> AppResult<OrderInspection> {
        self.get(id).await?;
        let mut conn = self.db.acquire().await?;
        persist_progress(&mut conn, id).await
    }

    pub async fn report(&self, id: Uuid) -> AppResult<InspectionReport> {
        let inspection = self.get(id).await?;
        let order = self.order_brief(inspection.order_id).await?;
        let items = self.items(id).await?;
        let (result_counts, categories, defects) = summarize_items(&items);
        let stage_history = self
            .stage_logs(id)
            .await?
            .into_iter()
            .map(StageLogView::from)
            .collect();

        Ok(InspectionReport {
            inspection,
            order,
            result_counts,
            categories,
            defects,
            stage_history,
        })
    }

    /// Move the order to a production stage and log it
    pub async fn set_stage(&self, id: Uuid, stage: i16) -> AppResult<OrderInspection> {
        let stage = OrderStage::try_from(stage)
            .map_err(|msg| AppError::validation("stage", msg, "阶段必须在 1 到 5 之间"))?;
        self.get(id).await?;

        let mut tx = self.db.begin().await?;
        let inspection = sqlx::query_as::<_, OrderInspection>(&format!(
            r#"
            UPDATE order_inspections
            SET current_stage = $2, stage_time = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INSPECTION_COLUMNS
        ))
        .bind(id)
        .bind(stage.code())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO inspection_stage_logs (inspection_id, stage, stage_time) VALUES ($1, $2, NOW())")
            .bind(id)
            .bind(stage.code())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(inspection_id = %id, stage = stage.display_name(), "Inspection stage changed");
        Ok(inspection)
    }

    pub async fn stage_logs(&self, id: Uuid) -> AppResult<Vec<InspectionStageLog>> {
        let logs = sqlx::query_as::<_, InspectionStageLog>(
            r#"
            SELECT id, inspection_id, stage, stage_time FROM inspection_stage_logs
            WHERE inspection_id = $1
            ORDER BY stage_time, stage
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(logs)
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub async fn create_item(&self, id: Uuid, input: ItemInput) -> AppResult<InspectionItem> {
        self.get(id).await?;
        let item_category = required_text(input.item_category.as_deref(), "item_category", "项目类别不能为空")?;
        let item_name = required_text(input.item_name.as_deref(), "item_name", "项目名称不能为空")?;
        let item_type = input.item_type.unwrap_or_default();
        self.check_parent(id, item_type, input.parent_id, None).await?;

        let mut tx = self.db.begin().await?;
        let item = sqlx::query_as::<_, InspectionItem>(&format!(
            r#"
            INSERT INTO inspection_items
                (inspection_id, parent_id, item_category, item_name, item_type,
                 inspection_result, photo_paths, description, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(id)
        .bind(input.parent_id)
        .bind(&item_category)
        .bind(&item_name)
        .bind(item_type)
        .bind(input.inspection_result.unwrap_or_default())
        .bind(input.photo_paths.unwrap_or_default())
        .bind(&input.description)
        .bind(input.sort_order.unwrap_or(0))
        .fetch_one(&mut *tx)
        .await?;

        persist_progress(&mut tx, id).await?;
        tx.commit().await?;

        Ok(item)
    }

    pub async fn update_item(&self, id: Uuid, item_id: Uuid, input: ItemInput) -> AppResult<InspectionItem> {
        let existing = self.item(id, item_id).await?;
        let item_type = input.item_type.unwrap_or(existing.item_type);
        let parent_id = input.parent_id.or(existing.parent_id);
        if input.parent_id.is_some() || input.item_type.is_some() {
            self.check_parent(id, item_type, parent_id, Some(item_id)).await?;
        }
        let item_category = match input.item_category.as_deref() {
            Some(v) => required_text(Some(v), "item_category", "项目类别不能为空")?,
            None => existing.item_category,
        };
        let item_name = match input.item_name.as_deref() {
            Some(v) => required_text(Some(v), "item_name", "项目名称不能为空")?,
            None => existing.item_name,
        };

        let mut tx = self.db.begin().await?;
        let item = sqlx::query_as::<_, InspectionItem>(&format!(
            r#"
            UPDATE inspection_items
            SET parent_id = $2, item_category = $3, item_name = $4, item_type = $5,
                inspection_result = $6, photo_paths = $7, description = $8, sort_order = $9,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(parent_id)
        .bind(&item_category)
        .bind(&item_name)
        .bind(item_type)
        .bind(input.inspection_result.unwrap_or(existing.inspection_result))
        .bind(input.photo_paths.unwrap_or(existing.photo_paths))
        .bind(input.description.or(existing.description))
        .bind(input.sort_order.unwrap_or(existing.sort_order))
        .fetch_one(&mut *tx)
        .await?;

        persist_progress(&mut tx, id).await?;
        tx.commit().await?;

        Ok(item)
    }

    /// Delete an item; a parent takes its children with it
    pub async fn delete_item(&self, id: Uuid, item_id: Uuid) -> AppResult<()> {
        self.item(id, item_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM inspection_items WHERE id = $1")
            .bind(item_id)
            .execute(&mut *tx)
            .await?;
        persist_progress(&mut tx, id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Apply a checklist editor save in one transaction
    pub async fn batch(&self, id: Uuid, items: Vec<BatchItemInput>) -> AppResult<BatchResult> {
        self.get(id).await?;
        let plan = plan_batch(items, Uuid::new_v4).map_err(batch_error)?;

        let mut tx = self.db.begin().await?;

        let deleted_count = if plan.deletes.is_empty() {
            0
        } else {
            sqlx::query("DELETE FROM inspection_items WHERE inspection_id = $1 AND id = ANY($2)")
                .bind(id)
                .bind(&plan.deletes)
                .execute(&mut *tx)
                .await?
                .rows_affected()
        };

        let mut created = Vec::with_capacity(plan.creates.len());
        for item in &plan.creates {
            sqlx::query(
                r#"
                INSERT INTO inspection_items
                    (id, inspection_id, parent_id, item_category, item_name, item_type,
                     inspection_result, photo_paths, description, sort_order)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(item.id)
            .bind(id)
            .bind(item.parent_id)
            .bind(item.item_category.as_deref().map(str::trim))
            .bind(item.item_name.as_deref().map(str::trim))
            .bind(item.item_type.unwrap_or_default())
            .bind(item.inspection_result.unwrap_or_default())
            .bind(item.photo_paths.clone().unwrap_or_default())
            .bind(&item.description)
            .bind(item.sort_order.unwrap_or(0))
            .execute(&mut *tx)
            .await?;
            created.push(item.id);
        }

        let mut updated = Vec::with_capacity(plan.updates.len());
        let mut skipped = Vec::new();
        for item in &plan.updates {
            let affected = sqlx::query(
                r#"
                UPDATE inspection_items SET
                    parent_id = COALESCE($3, parent_id),
                    item_category = COALESCE(NULLIF(TRIM($4), ''), item_category),
                    item_name = COALESCE(NULLIF(TRIM($5), ''), item_name),
                    item_type = COALESCE($6, item_type),
                    inspection_result = COALESCE($7, inspection_result),
                    photo_paths = COALESCE($8, photo_paths),
                    description = COALESCE($9, description),
                    sort_order = COALESCE($10, sort_order),
                    updated_at = NOW()
                WHERE id = $1 AND inspection_id = $2
                "#,
            )
            .bind(item.id)
            .bind(id)
            .bind(item.parent_id)
            .bind(&item.item_category)
            .bind(&item.item_name)
            .bind(item.item_type)
            .bind(item.inspection_result)
            .bind(&item.photo_paths)
            .bind(&item.description)
            .bind(item.sort_order)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if affected == 0 {
                skipped.push(item.id);
            } else {
                updated.push(item.id);
            }
        }

        let bad_parents = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM inspection_items c
            LEFT JOIN inspection_items p ON p.id = c.parent_id
            WHERE c.inspection_id = $1 AND c.parent_id IS NOT NULL
              AND (p.id IS NULL OR p.inspection_id <> $1 OR p.item_type <> 'parent'
                   OR c.item_type = 'parent')
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if bad_parents > 0 {
            return Err(AppError::validation(
                "parent_id",
                "Parent items must be parent rows of the same inspection",
                "父级项目必须属于同一验收记录",
            ));
        }

        let inspection = persist_progress(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(
            inspection_id = %id,
            created = created.len(),
            updated = updated.len(),
            deleted = deleted_count,
            "Inspection items saved"
        );

        Ok(BatchResult {
            created_count: created.len(),
            updated_count: updated.len(),
            created,
            updated,
            deleted: plan.deletes,
            skipped,
            deleted_count,
            id_map: plan.id_map,
            progress: InspectionProgress::from_counts(
                inspection.total_items.max(0) as usize,
                inspection.completed_items.max(0) as usize,
            ),
        })
    }

    async fn items(&self, id: Uuid) -> AppResult<Vec<InspectionItem>> {
        let items = sqlx::query_as::<_, InspectionItem>(&format!(
            "SELECT {} FROM inspection_items WHERE inspection_id = $1 ORDER BY sort_order, created_at",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        Ok(items)
    }

    async fn item(&self, id: Uuid, item_id: Uuid) -> AppResult<InspectionItem> {
        sqlx::query_as::<_, InspectionItem>(&format!(
            "SELECT {} FROM inspection_items WHERE id = $1 AND inspection_id = $2",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inspection item".to_string()))
    }

    async fn order_brief(&self, order_id: Uuid) -> AppResult<OrderBrief> {
        sqlx::query_as::<_, OrderBrief>(
            r#"
            SELECT id, contract_no, order_no, customer_name, machine_name, machine_model,
                   machine_count, ship_time, expected_delivery, check_requirement
            FROM orders WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".to_string()))
    }

    /// A parent must be a parent row of the same inspection; parent rows have no parent
    async fn check_parent(
        &self,
        id: Uuid,
        item_type: ItemType,
        parent_id: Option<Uuid>,
        item_id: Option<Uuid>,
    ) -> AppResult<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        if item_type == ItemType::Parent || Some(parent_id) == item_id {
            return Err(AppError::validation(
                "parent_id",
                "Parent rows cannot be nested",
                "父级项目不能再有父级",
            ));
        }

        let parent = self.item(id, parent_id).await.map_err(|_| {
            AppError::validation(
                "parent_id",
                "Parent item does not belong to this inspection",
                "父级项目不属于该验收记录",
            )
        })?;
        if parent.item_type != ItemType::Parent {
            return Err(AppError::validation(
                "parent_id",
                "Referenced item is not a parent row",
                "所选父级不是分类项目",
            ));
        }
        Ok(())
    }
}

/// Recompute and store progress for an inspection
async fn persist_progress(conn: &mut PgConnection, id: Uuid) -> AppResult<OrderInspection> {
    let rows = sqlx::query_as::<_, (ItemType, InspectionResult)>(
        "SELECT item_type, inspection_result FROM inspection_items WHERE inspection_id = $1",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let progress = compute_progress(rows.iter().map(|(t, r)| (t, r)));

    let inspection = sqlx::query_as::<_, OrderInspection>(&format!(
        r#"
        UPDATE order_inspections
        SET progress = $2, total_items = $3, completed_items = $4, inspection_status = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        INSPECTION_COLUMNS
    ))
    .bind(id)
    .bind(progress.progress)
    .bind(progress.total_items)
    .bind(progress.completed_items)
    .bind(progress.status)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Inspection".to_string()))?;

    Ok(inspection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(category: &str, item_type: ItemType, result: InspectionResult, sort: i32) -> InspectionItem {
        InspectionItem {
            id: Uuid::new_v4(),
            inspection_id: Uuid::nil(),
            parent_id: None,
            item_category: category.to_string(),
            item_name: format!("{} check", category),
            item_type,
            inspection_result: result,
            photo_paths: Vec::new(),
            description: None,
            sort_order: sort,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_summarize_groups_subs_by_category() {
        let items = vec![
            item("Electrical", ItemType::Sub, InspectionResult::Defect, 2),
            item("Frame", ItemType::Sub, InspectionResult::Normal, 1),
            item("Frame", ItemType::Parent, InspectionResult::Pending, 0),
            item("Electrical", ItemType::Sub, InspectionResult::NotApplicable, 3),
        ];

        let (counts, categories, defects) = summarize_items(&items);

        assert_eq!(counts["normal"], 1);
        assert_eq!(counts["defect"], 1);
        assert_eq!(counts["not_applicable"], 1);
        assert_eq!(counts["pending"], 0);
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].category, "Frame");
        assert_eq!(categories[1].items.len(), 2);
        assert_eq!(defects.len(), 1);
    }

    #[test]
    fn test_stage_log_view_labels() {
        let view = StageLogView::from(InspectionStageLog {
            id: Uuid::nil(),
            inspection_id: Uuid::nil(),
            stage: 5,
            stage_time: Utc::now(),
        });
        assert_eq!(view.stage_name, "Shipped");
        assert_eq!(view.stage_name_zh, "发货");
    }

    #[test]
    fn test_batch_errors_map_to_validation() {
        assert!(matches!(
            batch_error(BatchPlanError::UnknownParent("tmp-1".into())),
            AppError::Validation { ref field, .. } if field == "parent_id"
        ));
    }
}
