//! In-process entry point for callers that execute SQL themselves.
//!
//! The caller decides which statements pass through here; statements that
//! must see raw data simply never call [`StatementInterceptor::rewrite`].

use crate::rewrite::SqlRewriter;
use crate::rules::RuleStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatementInterceptor {
    rules: Arc<RuleStore>,
    rewriter: Arc<SqlRewriter>,
}

impl StatementInterceptor {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self::with_rewriter(rules, Arc::new(SqlRewriter::new()))
    }

    pub fn with_rewriter(rules: Arc<RuleStore>, rewriter: Arc<SqlRewriter>) -> Self {
        Self { rules, rewriter }
    }

    /// Rewrite `sql` against the current rules for the table it reads from.
    /// Returns the input unchanged when no active rule applies.
    pub fn rewrite(&self, sql: &str) -> String {
        let outcome = self.rewriter.rewrite_with_store(sql, &self.rules);
        if outcome.is_masked() {
            tracing::debug!(
                table = ?outcome.table,
                rules_applied = outcome.rules_applied,
                "Intercepted statement rewritten"
            );
        }
        outcome.sql
    }
}
