//! Inspection checklist tests
//!
//! Tests for:
//! - Progress and status derived from sub items
//! - Grouping items into a parent/child tree
//! - Planning batch saves with client-side temporary ids
//! - Report summaries

use chrono::{Duration, Utc};
use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use factory_oa_backend::services::inspection::summarize_items;
use shared::models::{
    build_item_tree, compute_progress, plan_batch, progress_of, BatchItemInput, BatchPlanError,
    InspectionItem, InspectionProgress, InspectionResult, InspectionStatus, ItemType, OrderStage,
};

fn item(
    item_type: ItemType,
    result: InspectionResult,
    parent_id: Option<Uuid>,
    category: &str,
    sort_order: i32,
) -> InspectionItem {
    let now = Utc::now();
    InspectionItem {
        id: Uuid::new_v4(),
        inspection_id: Uuid::nil(),
        parent_id,
        item_category: category.to_string(),
        item_name: format!("{} {}", category, sort_order),
        item_type,
        inspection_result: result,
        photo_paths: Vec::new(),
        description: None,
        sort_order,
        created_at: now,
        updated_at: now,
    }
}

fn batch(rows: serde_json::Value) -> Vec<BatchItemInput> {
    serde_json::from_value(rows).unwrap()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_progress_from_counts() {
        let empty = InspectionProgress::from_counts(0, 0);
        assert_eq!(empty.progress, 0);
        assert_eq!(empty.status, InspectionStatus::Pending);

        let quarter = InspectionProgress::from_counts(4, 1);
        assert_eq!(quarter.progress, 25);
        assert_eq!(quarter.status, InspectionStatus::InProgress);

        // Integer percentage rounds down
        assert_eq!(InspectionProgress::from_counts(3, 2).progress, 66);

        let done = InspectionProgress::from_counts(3, 3);
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, InspectionStatus::Completed);
    }

    #[test]
    fn test_progress_counts_sub_items_only() {
        let parent = item(ItemType::Parent, InspectionResult::Pending, None, "Frame", 1);
        let items = vec![
            item(ItemType::Sub, InspectionResult::Normal, Some(parent.id), "Frame", 2),
            item(ItemType::Sub, InspectionResult::NotApplicable, Some(parent.id), "Frame", 3),
            item(ItemType::Sub, InspectionResult::Defect, Some(parent.id), "Frame", 4),
            item(ItemType::Sub, InspectionResult::Pending, Some(parent.id), "Frame", 5),
            parent,
        ];

        let progress = progress_of(&items);
        assert_eq!(progress.total_items, 4);
        assert_eq!(progress.completed_items, 2);
        assert_eq!(progress.progress, 50);
        assert_eq!(progress.status, InspectionStatus::InProgress);
    }

    #[test]
    fn test_defects_are_not_settled() {
        assert!(InspectionResult::Normal.is_settled());
        assert!(InspectionResult::NotApplicable.is_settled());
        assert!(!InspectionResult::Defect.is_settled());
        assert!(!InspectionResult::Pending.is_settled());
    }

    #[test]
    fn test_item_tree_groups_and_orders() {
        let frame = item(ItemType::Parent, InspectionResult::Pending, None, "Frame", 2);
        let electrics = item(ItemType::Parent, InspectionResult::Pending, None, "Electrics", 1);
        let mut late = item(ItemType::Sub, InspectionResult::Normal, Some(frame.id), "Frame", 5);
        late.created_at = late.created_at + Duration::seconds(5);
        let early = item(ItemType::Sub, InspectionResult::Defect, Some(frame.id), "Frame", 5);
        let wiring = item(ItemType::Sub, InspectionResult::Normal, Some(electrics.id), "Electrics", 1);
        let orphan = item(ItemType::Sub, InspectionResult::Pending, Some(Uuid::new_v4()), "Misc", 1);

        let tree = build_item_tree(vec![
            late.clone(),
            orphan.clone(),
            frame.clone(),
            wiring.clone(),
            electrics.clone(),
            early.clone(),
        ]);

        assert_eq!(tree.parents.len(), 2);
        assert_eq!(tree.parents[0].item.id, electrics.id);
        assert_eq!(tree.parents[1].item.id, frame.id);

        let frame_children: Vec<Uuid> = tree.parents[1].children.iter().map(|c| c.id).collect();
        assert_eq!(frame_children, vec![early.id, late.id]);
        assert_eq!(tree.parents[1].progress.progress, 50);
        assert_eq!(tree.parents[0].progress.status, InspectionStatus::Completed);

        assert_eq!(tree.orphans.len(), 1);
        assert_eq!(tree.orphans[0].id, orphan.id);
    }

    #[test]
    fn test_batch_resolves_temporary_parent_ids() {
        let inputs = batch(json!([
            { "id": "tmp-child", "parent_id": "tmp-parent", "item_name": "Weld seams",
              "item_category": "Frame", "is_local_new": true },
            { "id": "tmp-parent", "item_name": "Frame", "item_category": "Frame",
              "item_type": "parent", "is_local_new": true },
        ]));

        let plan = plan_batch(inputs, Uuid::new_v4).unwrap();
        let parent_id = plan.id_map["tmp-parent"];
        let child_id = plan.id_map["tmp-child"];

        assert_eq!(plan.creates.len(), 2);
        assert_eq!(plan.creates[0].id, parent_id);
        assert_eq!(plan.creates[1].id, child_id);
        assert_eq!(plan.creates[1].parent_id, Some(parent_id));
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_batch_splits_deletes_and_updates() {
        let existing = Uuid::new_v4();
        let removed = Uuid::new_v4();
        let parent = Uuid::new_v4();

        let inputs = batch(json!([
            { "id": existing.to_string(), "parent_id": parent.to_string(),
              "inspection_result": "defect", "description": "Scratch on panel" },
            { "id": removed.to_string(), "_toBeDeleted": true },
            { "id": "tmp-9", "is_local_new": true, "to_be_deleted": true },
        ]));

        let plan = plan_batch(inputs, Uuid::new_v4).unwrap();
        assert_eq!(plan.deletes, vec![removed]);
        assert!(plan.creates.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, existing);
        assert_eq!(plan.updates[0].parent_id, Some(parent));
        assert_eq!(plan.updates[0].inspection_result, Some(InspectionResult::Defect));
    }

    #[test]
    fn test_batch_rejects_incomplete_new_items() {
        let inputs = batch(json!([
            { "id": "tmp-1", "item_name": "Motor", "is_local_new": true },
        ]));
        assert_eq!(
            plan_batch(inputs, Uuid::new_v4),
            Err(BatchPlanError::IncompleteItem("tmp-1".to_string()))
        );
    }

    #[test]
    fn test_batch_rejects_unknown_parent() {
        let inputs = batch(json!([
            { "id": "tmp-1", "parent_id": "tmp-missing", "item_name": "Motor",
              "item_category": "Drive", "is_local_new": true },
        ]));
        assert_eq!(
            plan_batch(inputs, Uuid::new_v4),
            Err(BatchPlanError::UnknownParent("tmp-missing".to_string()))
        );
    }

    #[test]
    fn test_report_summary() {
        let items = vec![
            item(ItemType::Parent, InspectionResult::Pending, None, "Frame", 0),
            item(ItemType::Sub, InspectionResult::Normal, None, "Frame", 1),
            item(ItemType::Sub, InspectionResult::Defect, None, "Electrics", 2),
            item(ItemType::Sub, InspectionResult::Normal, None, "Frame", 3),
        ];

        let (counts, categories, defects) = summarize_items(&items);
        assert_eq!(counts["normal"], 2);
        assert_eq!(counts["defect"], 1);
        assert_eq!(counts["pending"], 0);
        assert_eq!(counts["not_applicable"], 0);

        let names: Vec<&str> = categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, vec!["Frame", "Electrics"]);
        assert_eq!(categories[0].items.len(), 2);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].item_category, "Electrics");
    }

    #[test]
    fn test_stage_codes() {
        for code in 1..=5i16 {
            assert_eq!(OrderStage::try_from(code).unwrap().code(), code);
        }
        assert!(OrderStage::try_from(0).is_err());
        assert!(OrderStage::try_from(6).is_err());
        assert_eq!(OrderStage::Inspecting.display_name_zh(), "验收阶段");
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    fn result_strategy() -> impl Strategy<Value = InspectionResult> {
        prop_oneof![
            Just(InspectionResult::Pending),
            Just(InspectionResult::Normal),
            Just(InspectionResult::Defect),
            Just(InspectionResult::NotApplicable),
        ]
    }

    fn type_strategy() -> impl Strategy<Value = ItemType> {
        prop_oneof![Just(ItemType::Parent), Just(ItemType::Sub)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Progress stays within 0-100 and agrees with the status
        #[test]
        fn prop_progress_bounds(
            rows in prop::collection::vec((type_strategy(), result_strategy()), 0..40),
        ) {
            let progress = compute_progress(rows.iter().map(|(t, r)| (t, r)));
            let subs = rows.iter().filter(|(t, _)| *t == ItemType::Sub).count();

            prop_assert_eq!(progress.total_items as usize, subs);
            prop_assert!(progress.completed_items <= progress.total_items);
            prop_assert!((0..=100).contains(&progress.progress));

            match progress.status {
                InspectionStatus::Completed => {
                    prop_assert!(subs > 0);
                    prop_assert_eq!(progress.completed_items, progress.total_items);
                }
                InspectionStatus::InProgress => prop_assert!(progress.completed_items > 0),
                InspectionStatus::Pending => prop_assert_eq!(progress.completed_items, 0),
            }
        }

        /// Parent rows never change progress
        #[test]
        fn prop_parents_do_not_count(
            rows in prop::collection::vec(result_strategy(), 0..20),
            parent_results in prop::collection::vec(result_strategy(), 0..5),
        ) {
            let subs: Vec<_> = rows.iter().map(|r| (ItemType::Sub, *r)).collect();
            let mut with_parents = subs.clone();
            with_parents.extend(parent_results.iter().map(|r| (ItemType::Parent, *r)));

            prop_assert_eq!(
                compute_progress(subs.iter().map(|(t, r)| (t, r))),
                compute_progress(with_parents.iter().map(|(t, r)| (t, r)))
            );
        }

        /// Every surviving row lands in exactly one bucket
        #[test]
        fn prop_batch_partitions_rows(
            flags in prop::collection::vec((any::<bool>(), any::<bool>()), 0..20),
        ) {
            let rows: Vec<serde_json::Value> = flags
                .iter()
                .enumerate()
                .map(|(i, (is_new, deleted))| {
                    let id = if *is_new { format!("tmp-{}", i) } else { Uuid::new_v4().to_string() };
                    json!({
                        "id": id,
                        "item_name": "Check",
                        "item_category": "General",
                        "is_local_new": is_new,
                        "_toBeDeleted": deleted,
                    })
                })
                .collect();

            let plan = plan_batch(batch(serde_json::Value::Array(rows)), Uuid::new_v4).unwrap();

            let expected_deletes = flags.iter().filter(|(n, d)| !*n && *d).count();
            let expected_creates = flags.iter().filter(|(n, d)| *n && !*d).count();
            let expected_updates = flags.iter().filter(|(n, d)| !*n && !*d).count();

            prop_assert_eq!(plan.deletes.len(), expected_deletes);
            prop_assert_eq!(plan.creates.len(), expected_creates);
            prop_assert_eq!(plan.updates.len(), expected_updates);
            prop_assert_eq!(plan.id_map.len(), expected_creates);
        }
    }
}
