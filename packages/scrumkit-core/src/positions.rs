/// Position reconciliation for drag-and-drop.
///
/// Every function here is pure: it reads the current column contents and
/// returns the `PositionUpdate`s that realize the new order. Items whose
/// position does not change are never part of the result, so the batch a
/// caller persists is the minimal one. Unknown ids and degenerate input
/// produce empty batches instead of errors.
use serde::{Deserialize, Serialize};

use crate::types::{Item, ItemRelocation, PositionUpdate};

/// Anything that has an id and an optional ordinal.
pub trait Positioned {
    fn item_id(&self) -> &str;
    fn raw_position(&self) -> Option<i32>;

    /// Missing positions count as slot 0.
    fn position(&self) -> i32 {
        self.raw_position().unwrap_or(0)
    }
}

impl Positioned for Item {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn raw_position(&self) -> Option<i32> {
        self.position
    }
}

impl<T: Positioned + ?Sized> Positioned for &T {
    fn item_id(&self) -> &str {
        (**self).item_id()
    }

    fn raw_position(&self) -> Option<i32> {
        (**self).raw_position()
    }
}

/// Minimal `{id, position}` view, handy when only ordering data is at hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSlot {
    pub id: String,
    pub position: Option<i32>,
}

impl ItemSlot {
    pub fn new(id: impl Into<String>, position: Option<i32>) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

impl Positioned for ItemSlot {
    fn item_id(&self) -> &str {
        &self.id
    }

    fn raw_position(&self) -> Option<i32> {
        self.position
    }
}

/// Reorder within one column.
///
/// Moving down shifts every other item in `(current, new]` up the list by one
/// slot; moving up shifts every other item in `[new, current)` down the list
/// by one slot. The moved item's own update comes first.
pub fn calculate_reorder_positions<T: Positioned>(
    items: &[T],
    item_id: &str,
    new_position: i32,
) -> Vec<PositionUpdate> {
    let Some(moved) = items.iter().find(|i| i.item_id() == item_id) else {
        return Vec::new();
    };
    let current = moved.position();
    if current == new_position {
        return Vec::new();
    }

    let mut updates = vec![PositionUpdate::new(item_id, new_position)];
    let others = items.iter().filter(|i| i.item_id() != item_id);

    if new_position > current {
        for item in others {
            let pos = item.position();
            if pos > current && pos <= new_position {
                updates.push(PositionUpdate::new(item.item_id(), pos.saturating_sub(1)));
            }
        }
    } else {
        for item in others {
            let pos = item.position();
            if pos >= new_position && pos < current {
                updates.push(PositionUpdate::new(item.item_id(), pos.saturating_add(1)));
            }
        }
    }

    updates
}

/// Make room in a destination column for an incoming item.
///
/// Only existing occupants at or after `new_position` are shifted; the moved
/// item's own update is the caller's to produce.
pub fn calculate_cross_column_positions<T: Positioned>(
    destination_items: &[T],
    new_position: i32,
) -> Vec<PositionUpdate> {
    destination_items
        .iter()
        .filter(|i| i.position() >= new_position)
        .map(|i| PositionUpdate::new(i.item_id(), i.position().saturating_add(1)))
        .collect()
}

/// Rewrite positions as `0..n` in current order, skipping items already in
/// place. Ties keep the order they were supplied in.
pub fn reindex_positions<T: Positioned>(items: &[T]) -> Vec<PositionUpdate> {
    let mut ordered: Vec<&T> = items.iter().collect();
    ordered.sort_by_key(|i| i.position());

    ordered
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let target = i32::try_from(index).unwrap_or(i32::MAX);
            (item.position() != target).then(|| PositionUpdate::new(item.item_id(), target))
        })
        .collect()
}

/// Append slot for a new item in `column_id`.
pub fn get_next_position(items: &[Item], column_id: &str) -> i32 {
    items
        .iter()
        .filter(|i| i.column_id == column_id)
        .map(Item::effective_position)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

/// Translate a list-index drop target into a position.
///
/// Within the same column an item dragged from above the target is removed
/// before the target is measured, so the target index moves up by one.
pub fn calculate_drop_position(
    active_index: usize,
    over_index: usize,
    is_same_column: bool,
) -> usize {
    if is_same_column && active_index < over_index {
        over_index - 1
    } else {
        over_index
    }
}

/// Apply a batch to an in-memory list. Ids not present are ignored.
pub fn apply_position_updates(items: &mut [Item], updates: &[PositionUpdate]) {
    for update in updates {
        if let Some(item) = items.iter_mut().find(|i| i.id == update.id) {
            item.position = Some(update.position);
        }
    }
}

/// Items of one column in render order.
pub fn column_items<'a>(items: &'a [Item], column_id: &str) -> Vec<&'a Item> {
    let mut column: Vec<&Item> = items.iter().filter(|i| i.column_id == column_id).collect();
    column.sort_by_key(|i| i.effective_position());
    column
}

/// A drag-and-drop outcome as reported by the board UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragOutcome {
    pub item_id: String,
    pub target_column_id: String,
    pub active_index: usize,
    pub over_index: usize,
}

/// Everything one drag changes, written as a single batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePlan {
    pub updates: Vec<PositionUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relocation: Option<ItemRelocation>,
}

impl MovePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.relocation.is_none()
    }
}

/// Build the write batch for a drag over the full board item list.
pub fn plan_move(items: &[Item], outcome: &DragOutcome) -> MovePlan {
    let Some(moved) = items.iter().find(|i| i.id == outcome.item_id) else {
        return MovePlan::default();
    };
    let same_column = moved.column_id == outcome.target_column_id;
    // Indexes past i32 range clamp to the last slot.
    let target = i32::try_from(calculate_drop_position(
        outcome.active_index,
        outcome.over_index,
        same_column,
    ))
    .unwrap_or(i32::MAX);

    let column: Vec<Item> = column_items(items, &outcome.target_column_id)
        .into_iter()
        .cloned()
        .collect();

    if same_column {
        return MovePlan {
            updates: calculate_reorder_positions(&column, &outcome.item_id, target),
            relocation: None,
        };
    }

    let destination: Vec<Item> = column
        .into_iter()
        .filter(|i| i.id != outcome.item_id)
        .collect();
    MovePlan {
        updates: calculate_cross_column_positions(&destination, target),
        relocation: Some(ItemRelocation {
            id: outcome.item_id.clone(),
            column_id: outcome.target_column_id.clone(),
            position: target,
        }),
    }
}

/// Apply a plan to an in-memory list, including the relocation.
pub fn apply_move_plan(items: &mut [Item], plan: &MovePlan) {
    apply_position_updates(items, &plan.updates);
    if let Some(relocation) = &plan.relocation {
        if let Some(item) = items.iter_mut().find(|i| i.id == relocation.id) {
            item.column_id = relocation.column_id.clone();
            item.position = Some(relocation.position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn slots(pairs: &[(&str, i32)]) -> Vec<ItemSlot> {
        pairs
            .iter()
            .map(|(id, pos)| ItemSlot::new(*id, Some(*pos)))
            .collect()
    }

    fn item(id: &str, column: &str, position: Option<i32>) -> Item {
        Item {
            id: id.to_string(),
            column_id: column.to_string(),
            position,
            content: format!("card {}", id),
            author_id: None,
            author_name: None,
        }
    }

    fn as_map(updates: &[PositionUpdate]) -> BTreeMap<String, i32> {
        updates
            .iter()
            .map(|u| (u.id.clone(), u.position))
            .collect()
    }

    fn apply(slots: &[ItemSlot], updates: &[PositionUpdate]) -> Vec<ItemSlot> {
        let map = as_map(updates);
        slots
            .iter()
            .map(|s| ItemSlot::new(s.id.clone(), map.get(&s.id).copied().or(s.position)))
            .collect()
    }

    #[test]
    fn test_move_first_to_last() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2)]);
        let updates = calculate_reorder_positions(&items, "A", 2);
        let expected: BTreeMap<String, i32> =
            [("A".into(), 2), ("B".into(), 0), ("C".into(), 1)].into();
        assert_eq!(as_map(&updates), expected);
        assert_eq!(updates[0], PositionUpdate::new("A", 2));
    }

    #[test]
    fn test_move_last_to_first() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2)]);
        let updates = calculate_reorder_positions(&items, "C", 0);
        let expected: BTreeMap<String, i32> =
            [("C".into(), 0), ("A".into(), 1), ("B".into(), 2)].into();
        assert_eq!(as_map(&updates), expected);
    }

    #[test]
    fn test_reorder_to_same_position_is_noop() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2)]);
        assert!(calculate_reorder_positions(&items, "B", 1).is_empty());
    }

    #[test]
    fn test_reorder_unknown_item_is_noop() {
        let items = slots(&[("A", 0), ("B", 1)]);
        assert!(calculate_reorder_positions(&items, "Z", 0).is_empty());
    }

    #[test]
    fn test_reorder_degenerate_lists() {
        let empty: Vec<ItemSlot> = Vec::new();
        assert!(calculate_reorder_positions(&empty, "A", 3).is_empty());
        let single = slots(&[("A", 0)]);
        assert!(calculate_reorder_positions(&single, "A", 0).is_empty());
    }

    #[test]
    fn test_reorder_middle_leaves_outside_items_alone() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2), ("D", 3), ("E", 4)]);
        let updates = calculate_reorder_positions(&items, "B", 3);
        let expected: BTreeMap<String, i32> =
            [("B".into(), 3), ("C".into(), 1), ("D".into(), 2)].into();
        assert_eq!(as_map(&updates), expected);
    }

    #[test]
    fn test_reorder_always_yields_permutation() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2), ("D", 3), ("E", 4), ("F", 5)]);
        for moved in &items {
            for target in 0..items.len() as i32 {
                let updates = calculate_reorder_positions(&items, &moved.id, target);
                let after = apply(&items, &updates);
                let positions: HashSet<i32> = after.iter().map(|s| s.position()).collect();
                assert_eq!(positions.len(), items.len(), "duplicate after {} -> {}", moved.id, target);
                assert_eq!(positions, (0..items.len() as i32).collect::<HashSet<_>>());
                let landed = after.iter().find(|s| s.id == moved.id).unwrap();
                assert_eq!(landed.position(), target);
            }
        }
    }

    #[test]
    fn test_reorder_null_positions_treated_as_zero() {
        let items = vec![
            ItemSlot::new("A", None),
            ItemSlot::new("B", Some(1)),
            ItemSlot::new("C", Some(2)),
        ];
        let updates = calculate_reorder_positions(&items, "C", 0);
        let expected: BTreeMap<String, i32> =
            [("C".into(), 0), ("A".into(), 1), ("B".into(), 2)].into();
        assert_eq!(as_map(&updates), expected);
    }

    #[test]
    fn test_cross_column_shifts_tail() {
        let dest = slots(&[("X", 0), ("Y", 1), ("Z", 2)]);
        let updates = calculate_cross_column_positions(&dest, 1);
        let expected: BTreeMap<String, i32> = [("Y".into(), 2), ("Z".into(), 3)].into();
        assert_eq!(as_map(&updates), expected);
    }

    #[test]
    fn test_cross_column_append_shifts_nothing() {
        let dest = slots(&[("X", 0), ("Y", 1)]);
        assert!(calculate_cross_column_positions(&dest, 2).is_empty());
        let empty: Vec<ItemSlot> = Vec::new();
        assert!(calculate_cross_column_positions(&empty, 0).is_empty());
    }

    #[test]
    fn test_reindex_repairs_gaps_and_duplicates() {
        let items = slots(&[("A", 4), ("B", 4), ("C", 0), ("D", 9)]);
        let updates = reindex_positions(&items);
        let expected: BTreeMap<String, i32> =
            [("A".into(), 1), ("B".into(), 2), ("D".into(), 3)].into();
        assert_eq!(as_map(&updates), expected);
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let items = slots(&[("A", 7), ("B", 3), ("C", 3), ("D", -1)]);
        let first = reindex_positions(&items);
        assert!(!first.is_empty());
        let repaired = apply(&items, &first);
        assert!(reindex_positions(&repaired).is_empty());
    }

    #[test]
    fn test_reindex_dense_list_has_no_updates() {
        let items = slots(&[("A", 0), ("B", 1), ("C", 2)]);
        assert!(reindex_positions(&items).is_empty());
    }

    #[test]
    fn test_next_position() {
        let items = vec![
            item("a", "c1", Some(0)),
            item("b", "c1", Some(4)),
            item("c", "c2", Some(9)),
        ];
        assert_eq!(get_next_position(&items, "c1"), 5);
        assert_eq!(get_next_position(&items, "empty"), 0);
        assert_eq!(get_next_position(&[], "c1"), 0);
    }

    #[test]
    fn test_next_position_with_null_only() {
        let items = vec![item("a", "c1", None)];
        assert_eq!(get_next_position(&items, "c1"), 1);
    }

    #[test]
    fn test_drop_position() {
        assert_eq!(calculate_drop_position(2, 0, true), 0);
        assert_eq!(calculate_drop_position(0, 2, true), 1);
        assert_eq!(calculate_drop_position(0, 2, false), 2);
        assert_eq!(calculate_drop_position(3, 3, true), 3);
    }

    #[test]
    fn test_plan_same_column_move() {
        let items = vec![
            item("a", "c1", Some(0)),
            item("b", "c1", Some(1)),
            item("c", "c1", Some(2)),
            item("x", "c2", Some(0)),
        ];
        let plan = plan_move(
            &items,
            &DragOutcome {
                item_id: "c".into(),
                target_column_id: "c1".into(),
                active_index: 2,
                over_index: 0,
            },
        );
        assert!(plan.relocation.is_none());
        let expected: BTreeMap<String, i32> =
            [("c".into(), 0), ("a".into(), 1), ("b".into(), 2)].into();
        assert_eq!(as_map(&plan.updates), expected);
    }

    #[test]
    fn test_plan_cross_column_move() {
        let mut items = vec![
            item("a", "c1", Some(0)),
            item("b", "c1", Some(1)),
            item("x", "c2", Some(0)),
            item("y", "c2", Some(1)),
        ];
        let plan = plan_move(
            &items,
            &DragOutcome {
                item_id: "a".into(),
                target_column_id: "c2".into(),
                active_index: 0,
                over_index: 1,
            },
        );
        assert_eq!(
            plan.relocation,
            Some(ItemRelocation {
                id: "a".into(),
                column_id: "c2".into(),
                position: 1,
            })
        );
        assert_eq!(plan.updates, vec![PositionUpdate::new("y", 2)]);

        apply_move_plan(&mut items, &plan);
        let order: Vec<&str> = column_items(&items, "c2").iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["x", "a", "y"]);
    }

    #[test]
    fn test_shifts_saturate_at_upper_bound() {
        let column = slots(&[("x", 5), ("y", i32::MAX)]);
        let updates = calculate_cross_column_positions(&column, 5);
        assert_eq!(as_map(&updates)["y"], i32::MAX);

        let items = vec![item("a", "c1", Some(i32::MAX))];
        assert_eq!(get_next_position(&items, "c1"), i32::MAX);
    }

    #[test]
    fn test_plan_clamps_oversized_drop_index() {
        let items = vec![item("a", "c1", Some(0)), item("x", "c2", Some(0))];
        let plan = plan_move(
            &items,
            &DragOutcome {
                item_id: "a".into(),
                target_column_id: "c2".into(),
                active_index: 0,
                over_index: usize::MAX,
            },
        );
        assert_eq!(plan.relocation.map(|r| r.position), Some(i32::MAX));
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn test_plan_unknown_item_is_empty() {
        let items = vec![item("a", "c1", Some(0))];
        let plan = plan_move(
            &items,
            &DragOutcome {
                item_id: "nope".into(),
                target_column_id: "c1".into(),
                active_index: 0,
                over_index: 0,
            },
        );
        assert!(plan.is_empty());
    }
}
