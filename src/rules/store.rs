use super::MaskingRule;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent table -> rules mapping shared by the proxy and the interceptor.
///
/// Each table's rule list lives behind its own `Arc`, so a write swaps the
/// whole list in one step and readers keep whatever snapshot they cloned.
/// `DashMap` shards its locks, so writes to different tables do not contend.
#[derive(Debug, Default)]
pub struct RuleStore {
    tables: DashMap<String, Arc<[MaskingRule]>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn key(table: &str) -> String {
        table.trim().to_lowercase()
    }

    /// Snapshot of every rule stored for `table`, active or not.
    pub fn get_rules(&self, table: &str) -> Arc<[MaskingRule]> {
        self.tables
            .get(&Self::key(table))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Rules that should actually be applied to queries against `table`.
    pub fn active_rules(&self, table: &str) -> Vec<MaskingRule> {
        let key = Self::key(table);
        self.tables
            .get(&key)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|rule| rule.applies_to(&key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_active_rules(&self, table: &str) -> bool {
        let key = Self::key(table);
        self.tables
            .get(&key)
            .is_some_and(|entry| entry.value().iter().any(|rule| rule.applies_to(&key)))
    }

    /// Replace the rule list for `table`. An empty list removes the table.
    pub fn set_rules(&self, table: &str, rules: Vec<MaskingRule>) {
        let key = Self::key(table);
        if rules.is_empty() {
            self.tables.remove(&key);
            tracing::debug!(table = %key, "Cleared masking rules (empty update)");
            return;
        }

        let count = rules.len();
        self.tables.insert(key.clone(), Arc::from(rules));
        tracing::debug!(table = %key, rules = count, "Replaced masking rules");
    }

    pub fn clear_table(&self, table: &str) {
        if self.tables.remove(&Self::key(table)).is_some() {
            tracing::debug!(table = %Self::key(table), "Removed masking rules");
        }
    }

    pub fn clear_all(&self) {
        self.tables.clear();
        tracing::debug!("Cleared all masking rules");
    }

    /// Number of tables that currently carry at least one rule.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Group a flat rule list by table and install each group.
    pub fn load(&self, rules: &[MaskingRule]) {
        let mut grouped: std::collections::BTreeMap<String, Vec<MaskingRule>> =
            std::collections::BTreeMap::new();
        for rule in rules {
            grouped
                .entry(Self::key(&rule.table))
                .or_default()
                .push(rule.clone());
        }
        for (table, rules) in grouped {
            self.set_rules(&table, rules);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MaskingType;

    #[test]
    fn test_unknown_table_is_empty() {
        let store = RuleStore::new();
        assert!(store.get_rules("users").is_empty());
        assert!(store.active_rules("users").is_empty());
        assert!(!store.has_active_rules("users"));
    }

    #[test]
    fn test_set_rules_replaces_not_merges() {
        let store = RuleStore::new();
        store.set_rules(
            "users",
            vec![
                MaskingRule::new("users", "phone", MaskingType::FullMask),
                MaskingRule::new("users", "email", MaskingType::Hash),
            ],
        );
        store.set_rules(
            "users",
            vec![MaskingRule::new("users", "ssn", MaskingType::Replace)],
        );

        let rules = store.get_rules("users");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].column, "ssn");
    }

    #[test]
    fn test_inactive_rules_are_not_applied() {
        let store = RuleStore::new();
        store.set_rules(
            "users",
            vec![
                MaskingRule::new("users", "phone", MaskingType::FullMask).inactive(),
                MaskingRule::new("users", "email", MaskingType::Hash),
            ],
        );

        assert_eq!(store.get_rules("users").len(), 2);
        let active = store.active_rules("users");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].column, "email");
    }

    #[test]
    fn test_table_names_are_case_insensitive() {
        let store = RuleStore::new();
        store.set_rules(
            "Users",
            vec![MaskingRule::new("Users", "phone", MaskingType::FullMask)],
        );
        assert_eq!(store.active_rules("users").len(), 1);
        assert_eq!(store.tables(), vec!["users".to_string()]);
    }

    #[test]
    fn test_clear_table_and_all() {
        let store = RuleStore::new();
        store.set_rules("users", vec![MaskingRule::new("users", "phone", MaskingType::Hash)]);
        store.set_rules("orders", vec![MaskingRule::new("orders", "card", MaskingType::Hash)]);
        assert_eq!(store.table_count(), 2);

        store.clear_table("users");
        assert_eq!(store.table_count(), 1);
        assert!(store.get_rules("users").is_empty());

        store.clear_all();
        assert_eq!(store.table_count(), 0);
    }

    #[test]
    fn test_load_groups_by_table() {
        let store = RuleStore::new();
        store.load(&[
            MaskingRule::new("users", "phone", MaskingType::FullMask),
            MaskingRule::new("orders", "card", MaskingType::PartialMask),
            MaskingRule::new("USERS", "email", MaskingType::Hash),
        ]);

        assert_eq!(store.table_count(), 2);
        assert_eq!(store.get_rules("users").len(), 2);
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let store = RuleStore::new();
        store.set_rules("users", vec![MaskingRule::new("users", "phone", MaskingType::Hash)]);
        let snapshot = store.get_rules("users");

        store.set_rules("users", vec![MaskingRule::new("users", "email", MaskingType::Hash)]);

        assert_eq!(snapshot[0].column, "phone");
        assert_eq!(store.get_rules("users")[0].column, "email");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_to_different_tables() {
        let store = RuleStore::shared();
        let mut handles = Vec::new();

        for i in 0..50 {
            let users = store.clone();
            handles.push(tokio::spawn(async move {
                users.set_rules(
                    "users",
                    vec![MaskingRule::new("users", format!("col_{i}"), MaskingType::FullMask)],
                );
            }));
            let orders = store.clone();
            handles.push(tokio::spawn(async move {
                orders.set_rules(
                    "orders",
                    vec![
                        MaskingRule::new("orders", format!("a_{i}"), MaskingType::Hash),
                        MaskingRule::new("orders", format!("b_{i}"), MaskingType::Hash),
                    ],
                );
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        // Neither table lost its update, and each holds exactly one writer's list.
        let users = store.get_rules("users");
        let orders = store.get_rules("orders");
        assert_eq!(users.len(), 1);
        assert_eq!(orders.len(), 2);
        let suffix = orders[0].column.trim_start_matches("a_");
        assert_eq!(orders[1].column, format!("b_{suffix}"));
    }
}
