//! Order acceptance inspections and checklist items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Inspection record for an order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderInspection {
    pub id: Uuid,
    pub order_id: Uuid,
    pub inspection_status: InspectionStatus,
    /// Percentage of completed sub items (0-100)
    pub progress: i32,
    pub total_items: i32,
    pub completed_items: i32,
    pub remarks: Option<String>,
    pub current_stage: i16,
    pub stage_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "inspection_status", rename_all = "snake_case")
)]
pub enum InspectionStatus {
    Pending,
    InProgress,
    Completed,
}

/// Production stage of the inspected order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OrderStage {
    Ordered = 1,
    Scheduled = 2,
    Produced = 3,
    Inspecting = 4,
    Shipped = 5,
}

impl OrderStage {
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OrderStage::Ordered => "Ordered",
            OrderStage::Scheduled => "Production scheduled",
            OrderStage::Produced => "Production finished",
            OrderStage::Inspecting => "Inspecting",
            OrderStage::Shipped => "Shipped",
        }
    }

    pub fn display_name_zh(&self) -> &'static str {
        match self {
            OrderStage::Ordered => "下单",
            OrderStage::Scheduled => "排产",
            OrderStage::Produced => "完成生产",
            OrderStage::Inspecting => "验收阶段",
            OrderStage::Shipped => "发货",
        }
    }
}

impl TryFrom<i16> for OrderStage {
    type Error = &'static str;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OrderStage::Ordered),
            2 => Ok(OrderStage::Scheduled),
            3 => Ok(OrderStage::Produced),
            4 => Ok(OrderStage::Inspecting),
            5 => Ok(OrderStage::Shipped),
            _ => Err("Stage must be between 1 and 5"),
        }
    }
}

/// History row written on every stage change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InspectionStageLog {
    pub id: Uuid,
    pub inspection_id: Uuid,
    pub stage: i16,
    pub stage_time: DateTime<Utc>,
}

/// A checklist row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InspectionItem {
    pub id: Uuid,
    pub inspection_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub item_category: String,
    pub item_name: String,
    pub item_type: ItemType,
    pub inspection_result: InspectionResult,
    pub photo_paths: Vec<String>,
    pub description: Option<String>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "item_type", rename_all = "snake_case"))]
pub enum ItemType {
    /// Category heading
    Parent,
    /// Checkable row
    #[default]
    Sub,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "inspection_result", rename_all = "snake_case")
)]
pub enum InspectionResult {
    #[default]
    Pending,
    Normal,
    Defect,
    NotApplicable,
}

impl InspectionResult {
    /// Whether the result closes out the checklist row
    pub fn is_settled(&self) -> bool {
        matches!(self, InspectionResult::Normal | InspectionResult::NotApplicable)
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Progress figures derived from a set of items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InspectionProgress {
    pub total_items: i32,
    pub completed_items: i32,
    pub progress: i32,
    pub status: InspectionStatus,
}

impl InspectionProgress {
    pub fn from_counts(total: usize, completed: usize) -> Self {
        let progress = if total == 0 {
            0
        } else {
            (completed * 100 / total) as i32
        };
        let status = if progress >= 100 {
            InspectionStatus::Completed
        } else if completed > 0 {
            InspectionStatus::InProgress
        } else {
            InspectionStatus::Pending
        };
        Self {
            total_items: total as i32,
            completed_items: completed as i32,
            progress,
            status,
        }
    }
}

/// Compute progress over sub items; parent rows are headings and never count
pub fn compute_progress<'a, I>(items: I) -> InspectionProgress
where
    I: IntoIterator<Item = (&'a ItemType, &'a InspectionResult)>,
{
    let (total, completed) = items
        .into_iter()
        .filter(|(item_type, _)| **item_type == ItemType::Sub)
        .fold((0usize, 0usize), |(total, completed), (_, result)| {
            (total + 1, completed + usize::from(result.is_settled()))
        });
    InspectionProgress::from_counts(total, completed)
}

/// Progress of a list of items
pub fn progress_of(items: &[InspectionItem]) -> InspectionProgress {
    compute_progress(items.iter().map(|i| (&i.item_type, &i.inspection_result)))
}

// ============================================================================
// Item tree
// ============================================================================

/// A parent row and its children
#[derive(Debug, Clone, Serialize)]
pub struct ItemNode {
    #[serde(flatten)]
    pub item: InspectionItem,
    pub children: Vec<InspectionItem>,
    pub progress: InspectionProgress,
}

/// Checklist grouped by parent
#[derive(Debug, Clone, Serialize)]
pub struct ItemTree {
    pub parents: Vec<ItemNode>,
    /// Sub items whose parent is missing
    pub orphans: Vec<InspectionItem>,
}

/// Group items under their parents, ordered by `sort_order` then creation
pub fn build_item_tree(mut items: Vec<InspectionItem>) -> ItemTree {
    items.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then(a.created_at.cmp(&b.created_at))
    });

    let (parents, subs): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.item_type == ItemType::Parent);

    let mut children: HashMap<Uuid, Vec<InspectionItem>> = HashMap::new();
    let mut orphans = Vec::new();
    let parent_ids: std::collections::HashSet<Uuid> = parents.iter().map(|p| p.id).collect();

    for sub in subs {
        match sub.parent_id {
            Some(pid) if parent_ids.contains(&pid) => children.entry(pid).or_default().push(sub),
            _ => orphans.push(sub),
        }
    }

    let parents = parents
        .into_iter()
        .map(|parent| {
            let kids = children.remove(&parent.id).unwrap_or_default();
            let progress = progress_of(&kids);
            ItemNode {
                item: parent,
                children: kids,
                progress,
            }
        })
        .collect();

    ItemTree { parents, orphans }
}

// ============================================================================
// Batch editing
// ============================================================================

/// One row of a batch save from the checklist editor
///
/// Rows created in the browser carry a client-side temporary id that other
/// rows may use as `parent_id` before the row exists on the server.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemInput {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub item_category: Option<String>,
    pub item_name: Option<String>,
    pub item_type: Option<ItemType>,
    pub inspection_result: Option<InspectionResult>,
    pub photo_paths: Option<Vec<String>>,
    pub description: Option<String>,
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub is_local_new: bool,
    #[serde(default, rename = "_toBeDeleted", alias = "to_be_deleted")]
    pub to_be_deleted: bool,
}

/// Field values for a row after parent ids are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub item_category: Option<String>,
    pub item_name: Option<String>,
    pub item_type: Option<ItemType>,
    pub inspection_result: Option<InspectionResult>,
    pub photo_paths: Option<Vec<String>>,
    pub description: Option<String>,
    pub sort_order: Option<i32>,
}

/// Ordered set of operations for a batch save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub deletes: Vec<Uuid>,
    /// Parents first, so children can reference them
    pub creates: Vec<PlannedItem>,
    pub updates: Vec<PlannedItem>,
    /// Client temporary id to server id
    pub id_map: HashMap<String, Uuid>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchPlanError {
    #[error("parent reference {0} does not match any item")]
    UnknownParent(String),
    #[error("new item {0} is missing item_name or item_category")]
    IncompleteItem(String),
}

fn parse_server_id(id: Option<&str>) -> Option<Uuid> {
    id.and_then(|s| Uuid::parse_str(s).ok())
}

/// Split a batch into deletes, creates and updates
///
/// `new_id` supplies ids for created rows.
pub fn plan_batch<F>(inputs: Vec<BatchItemInput>, mut new_id: F) -> Result<BatchPlan, BatchPlanError>
where
    F: FnMut() -> Uuid,
{
    let mut plan = BatchPlan::default();
    let mut pending_creates = Vec::new();
    let mut pending_updates = Vec::new();

    for input in inputs {
        let server_id = parse_server_id(input.id.as_deref());

        if input.to_be_deleted {
            // Unsaved rows flagged for deletion never reached the server
            if let (Some(id), false) = (server_id, input.is_local_new) {
                plan.deletes.push(id);
            }
            continue;
        }

        match server_id {
            Some(id) if !input.is_local_new => pending_updates.push((id, input)),
            _ => {
                let id = new_id();
                let key = input.id.clone().unwrap_or_else(|| id.to_string());
                plan.id_map.insert(key.clone(), id);
                pending_creates.push((id, key, input));
            }
        }
    }

    let resolve_parent = |parent: Option<&str>, map: &HashMap<String, Uuid>| {
        match parent.map(str::trim).filter(|p| !p.is_empty()) {
            None => Ok(None),
            Some(p) => map
                .get(p)
                .copied()
                .or_else(|| Uuid::parse_str(p).ok())
                .map(Some)
                .ok_or_else(|| BatchPlanError::UnknownParent(p.to_string())),
        }
    };

    for (id, key, input) in pending_creates {
        if input.item_name.as_deref().map_or(true, str::is_empty)
            || input.item_category.as_deref().map_or(true, str::is_empty)
        {
            return Err(BatchPlanError::IncompleteItem(key));
        }
        let parent_id = resolve_parent(input.parent_id.as_deref(), &plan.id_map)?;
        plan.creates.push(planned(id, parent_id, input));
    }

    // Stable sort keeps client order within each group
    plan.creates
        .sort_by_key(|item| item.item_type.unwrap_or_default() != ItemType::Parent);

    for (id, input) in pending_updates {
        let parent_id = resolve_parent(input.parent_id.as_deref(), &plan.id_map)?;
        plan.updates.push(planned(id, parent_id, input));
    }

    Ok(plan)
}

fn planned(id: Uuid, parent_id: Option<Uuid>, input: BatchItemInput) -> PlannedItem {
    PlannedItem {
        id,
        parent_id,
        item_category: input.item_category,
        item_name: input.item_name,
        item_type: input.item_type,
        inspection_result: input.inspection_result,
        photo_paths: input.photo_paths,
        description: input.description,
        sort_order: input.sort_order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(item_type: ItemType, result: InspectionResult, parent: Option<Uuid>) -> InspectionItem {
        InspectionItem {
            id: Uuid::new_v4(),
            inspection_id: Uuid::nil(),
            parent_id: parent,
            item_category: "Electrical".to_string(),
            item_name: "Wiring".to_string(),
            item_type,
            inspection_result: result,
            photo_paths: vec![],
            description: None,
            sort_order: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_progress_ignores_parents() {
        let parent = item(ItemType::Parent, InspectionResult::Pending, None);
        let items = vec![
            item(ItemType::Sub, InspectionResult::Normal, Some(parent.id)),
            item(ItemType::Sub, InspectionResult::Defect, Some(parent.id)),
            item(ItemType::Sub, InspectionResult::NotApplicable, Some(parent.id)),
            parent,
        ];
        let p = progress_of(&items);
        assert_eq!(p.total_items, 3);
        assert_eq!(p.completed_items, 2);
        assert_eq!(p.progress, 66);
        assert_eq!(p.status, InspectionStatus::InProgress);
    }

    #[test]
    fn test_progress_empty_and_complete() {
        assert_eq!(progress_of(&[]).status, InspectionStatus::Pending);
        let items = vec![item(ItemType::Sub, InspectionResult::Normal, None)];
        let p = progress_of(&items);
        assert_eq!(p.progress, 100);
        assert_eq!(p.status, InspectionStatus::Completed);
    }

    #[test]
    fn test_stage_codes() {
        assert_eq!(OrderStage::try_from(3), Ok(OrderStage::Produced));
        assert!(OrderStage::try_from(6).is_err());
        assert_eq!(OrderStage::Shipped.code(), 5);
    }

    #[test]
    fn test_tree_groups_children_and_orphans() {
        let parent = item(ItemType::Parent, InspectionResult::Pending, None);
        let child = item(ItemType::Sub, InspectionResult::Normal, Some(parent.id));
        let orphan = item(ItemType::Sub, InspectionResult::Pending, Some(Uuid::new_v4()));
        let tree = build_item_tree(vec![orphan.clone(), child.clone(), parent.clone()]);

        assert_eq!(tree.parents.len(), 1);
        assert_eq!(tree.parents[0].item.id, parent.id);
        assert_eq!(tree.parents[0].children[0].id, child.id);
        assert_eq!(tree.parents[0].progress.progress, 100);
        assert_eq!(tree.orphans.len(), 1);
        assert_eq!(tree.orphans[0].id, orphan.id);
    }

    #[test]
    fn test_batch_item_deserializes_delete_flag() {
        let input: BatchItemInput =
            serde_json::from_str(r#"{"id":"tmp-1","_toBeDeleted":true}"#).unwrap();
        assert!(input.to_be_deleted);
        assert!(!input.is_local_new);
    }
}
