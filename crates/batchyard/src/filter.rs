/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Tenant, owner and system/queue selection filters.
//!
//! A scheduler process can be dedicated to a slice of the workload. Filters
//! are written as plain strings:
//!
//! - tenant: `""` matches any tenant, `"acme"` only acme, `"!acme"` all but acme
//! - owners: `["alice", "bob"]` only those owners; if any entry carries a `!`
//!   the whole list becomes an exclusion list
//! - systems: `"hpc-1"` a whole system, `"hpc-1#debug"` one queue on it, with
//!   the same list-wide `!` negation as owners
//!
//! ```rust,ignore
//! let filter = SelectionFilter::parse(Some("!sandbox"), &["!bot"], &["hpc-1#normal"]);
//! assert!(filter.matches(&item));
//! ```

use std::collections::HashSet;

use crate::models::WorkItem;

const NEGATION: char = '!';
const QUEUE_SEPARATOR: char = '#';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TenantFilter {
    #[default]
    Any,
    Include(String),
    Exclude(String),
}

impl TenantFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") => return TenantFilter::Any,
            Some(raw) => raw,
        };
        match raw.strip_prefix(NEGATION) {
            Some(rest) if rest.trim().is_empty() => TenantFilter::Any,
            Some(rest) => TenantFilter::Exclude(rest.trim().to_string()),
            None => TenantFilter::Include(raw.to_string()),
        }
    }

    pub fn matches(&self, tenant_id: &str) -> bool {
        match self {
            TenantFilter::Any => true,
            TenantFilter::Include(t) => t == tenant_id,
            TenantFilter::Exclude(t) => t != tenant_id,
        }
    }
}

/// Splits a filter list into its cleaned entries and whether it negates.
fn normalize<S: AsRef<str>>(raw: &[S]) -> (Vec<String>, bool) {
    let negated = raw.iter().any(|s| s.as_ref().contains(NEGATION));
    let entries = raw
        .iter()
        .map(|s| s.as_ref().replace(NEGATION, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (entries, negated)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OwnerFilter {
    #[default]
    Any,
    Include(HashSet<String>),
    Exclude(HashSet<String>),
}

impl OwnerFilter {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        let (entries, negated) = normalize(raw);
        if entries.is_empty() {
            return OwnerFilter::Any;
        }
        let set = entries.into_iter().collect();
        if negated {
            OwnerFilter::Exclude(set)
        } else {
            OwnerFilter::Include(set)
        }
    }

    pub fn matches(&self, owner: &str) -> bool {
        match self {
            OwnerFilter::Any => true,
            OwnerFilter::Include(set) => set.contains(owner),
            OwnerFilter::Exclude(set) => !set.contains(owner),
        }
    }
}

/// One `system` or `system#queue` entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemQueue {
    pub system_id: String,
    pub queue_name: Option<String>,
}

impl SystemQueue {
    fn parse(entry: &str) -> Self {
        match entry.split_once(QUEUE_SEPARATOR) {
            Some((system, queue)) if !queue.trim().is_empty() => SystemQueue {
                system_id: system.trim().to_string(),
                queue_name: Some(queue.trim().to_string()),
            },
            Some((system, _)) => SystemQueue {
                system_id: system.trim().to_string(),
                queue_name: None,
            },
            None => SystemQueue {
                system_id: entry.to_string(),
                queue_name: None,
            },
        }
    }

    fn matches(&self, system_id: &str, queue_name: &str) -> bool {
        self.system_id == system_id
            && self.queue_name.as_deref().map_or(true, |q| q == queue_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SystemQueueFilter {
    #[default]
    Any,
    Include(Vec<SystemQueue>),
    Exclude(Vec<SystemQueue>),
}

impl SystemQueueFilter {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        let (entries, negated) = normalize(raw);
        if entries.is_empty() {
            return SystemQueueFilter::Any;
        }
        let entries = entries.iter().map(|e| SystemQueue::parse(e)).collect();
        if negated {
            SystemQueueFilter::Exclude(entries)
        } else {
            SystemQueueFilter::Include(entries)
        }
    }

    pub fn matches(&self, system_id: &str, queue_name: &str) -> bool {
        match self {
            SystemQueueFilter::Any => true,
            SystemQueueFilter::Include(entries) => {
                entries.iter().any(|e| e.matches(system_id, queue_name))
            }
            SystemQueueFilter::Exclude(entries) => {
                !entries.iter().any(|e| e.matches(system_id, queue_name))
            }
        }
    }
}

/// Combined filter applied by every selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionFilter {
    pub tenant: TenantFilter,
    pub owners: OwnerFilter,
    pub systems: SystemQueueFilter,
}

impl SelectionFilter {
    /// A filter that matches everything.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn parse<S: AsRef<str>, T: AsRef<str>>(
        tenant: Option<&str>,
        owners: &[S],
        systems: &[T],
    ) -> Self {
        Self {
            tenant: TenantFilter::parse(tenant),
            owners: OwnerFilter::parse(owners),
            systems: SystemQueueFilter::parse(systems),
        }
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        self.tenant.matches(&item.tenant_id)
            && self.owners.matches(&item.owner)
            && self
                .systems
                .matches(&item.execution_system_id, &item.queue_name)
    }
}
