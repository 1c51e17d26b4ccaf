//! Groups tasks into (location, month) merge units.

use crate::models::Task;
use chrono::Datelike;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// Identifies one monthly partition of one location
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub location: String,
    /// Calendar month as `YYYYMM`
    pub year_month: String,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.location, self.year_month)
    }
}

/// Raw inputs and the single structured output of a merge unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGroup {
    pub raw_paths: BTreeSet<PathBuf>,
    pub structured_path: PathBuf,
}

/// Group tasks by location and calendar month of their date.
///
/// The first structured path seen for a group is kept; tasks planned from
/// one workload always agree on it.
pub fn group_tasks(tasks: &[Task]) -> BTreeMap<GroupKey, MonthGroup> {
    let mut groups: BTreeMap<GroupKey, MonthGroup> = BTreeMap::new();

    for task in tasks {
        let key = GroupKey {
            location: task.location.clone(),
            year_month: format!("{:04}{:02}", task.date.year(), task.date.month()),
        };

        let group = groups.entry(key).or_insert_with(|| MonthGroup {
            raw_paths: BTreeSet::new(),
            structured_path: task.structured_path.clone(),
        });
        if group.structured_path != task.structured_path {
            warn!(
                "Task {} {} disagrees on structured path ({} vs {}); keeping the first",
                task.location,
                task.date,
                task.structured_path.display(),
                group.structured_path.display()
            );
        }
        group.raw_paths.insert(task.raw_path.clone());
    }

    groups
}
