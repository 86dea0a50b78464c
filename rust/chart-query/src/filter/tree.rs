//! Copy-on-write edits over a filter tree, addressed by group and condition id.
//!
//! Every helper leaves its input untouched and returns a rebuilt tree, so the
//! builder can hold on to the previous version.

use super::{FilterCondition, FilterGroup, LogicalOperator};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("filter group '{0}' not found")]
    GroupNotFound(String),
    #[error("condition '{0}' not found")]
    ConditionNotFound(String),
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;

/// Rewrites the group with `group_id` wherever it sits in the tree.
pub fn update_group<F>(groups: &[FilterGroup], group_id: &str, edit: F) -> Result<Vec<FilterGroup>>
where
    F: FnOnce(&mut FilterGroup) -> Result<()>,
{
    let mut edit = Some(edit);
    let rebuilt = rewrite(groups, group_id, &mut edit)?;
    match edit {
        None => Ok(rebuilt),
        Some(_) => Err(TreeError::GroupNotFound(group_id.to_string())),
    }
}

fn rewrite<F>(
    groups: &[FilterGroup],
    group_id: &str,
    edit: &mut Option<F>,
) -> Result<Vec<FilterGroup>>
where
    F: FnOnce(&mut FilterGroup) -> Result<()>,
{
    let mut rebuilt = Vec::with_capacity(groups.len());
    for group in groups {
        let mut group = group.clone();
        if edit.is_some() {
            if group.id == group_id {
                if let Some(apply) = edit.take() {
                    apply(&mut group)?;
                }
            } else {
                group.subgroups = rewrite(&group.subgroups, group_id, edit)?;
            }
        }
        rebuilt.push(group);
    }
    Ok(rebuilt)
}

pub fn add_condition(
    groups: &[FilterGroup],
    group_id: &str,
    condition: FilterCondition,
) -> Result<Vec<FilterGroup>> {
    update_group(groups, group_id, |group| {
        group.conditions.push(condition);
        Ok(())
    })
}

pub fn remove_condition(
    groups: &[FilterGroup],
    group_id: &str,
    condition_id: &str,
) -> Result<Vec<FilterGroup>> {
    update_group(groups, group_id, |group| {
        let before = group.conditions.len();
        group.conditions.retain(|condition| condition.id != condition_id);
        if group.conditions.len() == before {
            return Err(TreeError::ConditionNotFound(condition_id.to_string()));
        }
        Ok(())
    })
}

pub fn update_condition<F>(
    groups: &[FilterGroup],
    group_id: &str,
    condition_id: &str,
    edit: F,
) -> Result<Vec<FilterGroup>>
where
    F: FnOnce(&mut FilterCondition),
{
    update_group(groups, group_id, |group| {
        let condition = group
            .conditions
            .iter_mut()
            .find(|condition| condition.id == condition_id)
            .ok_or_else(|| TreeError::ConditionNotFound(condition_id.to_string()))?;
        edit(condition);
        Ok(())
    })
}

pub fn add_subgroup(
    groups: &[FilterGroup],
    parent_id: &str,
    subgroup: FilterGroup,
) -> Result<Vec<FilterGroup>> {
    update_group(groups, parent_id, |group| {
        group.subgroups.push(subgroup);
        Ok(())
    })
}

/// Removes a group at any depth, including top-level groups.
pub fn remove_group(groups: &[FilterGroup], group_id: &str) -> Result<Vec<FilterGroup>> {
    fn prune(groups: &[FilterGroup], group_id: &str, removed: &mut bool) -> Vec<FilterGroup> {
        let mut kept = Vec::with_capacity(groups.len());
        for group in groups {
            if !*removed && group.id == group_id {
                *removed = true;
                continue;
            }
            let mut group = group.clone();
            if !*removed {
                group.subgroups = prune(&group.subgroups, group_id, removed);
            }
            kept.push(group);
        }
        kept
    }

    let mut removed = false;
    let rebuilt = prune(groups, group_id, &mut removed);
    if removed {
        Ok(rebuilt)
    } else {
        Err(TreeError::GroupNotFound(group_id.to_string()))
    }
}

pub fn set_logical_operator(
    groups: &[FilterGroup],
    group_id: &str,
    operator: LogicalOperator,
) -> Result<Vec<FilterGroup>> {
    update_group(groups, group_id, |group| {
        group.logical_operator = operator;
        Ok(())
    })
}

/// Drops every group with no condition anywhere beneath it.
pub fn compact(groups: &[FilterGroup]) -> Vec<FilterGroup> {
    groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| FilterGroup {
            subgroups: compact(&group.subgroups),
            ..group.clone()
        })
        .collect()
}
