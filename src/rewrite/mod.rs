//! Rule-driven SQL rewriting shared by the proxy and the statement interceptor.

use crate::error::RuleError;
use crate::rules::{MaskingRule, MaskingType, RuleStore};
use dashmap::DashMap;
use regex::{NoExpand, Regex};
use serde::Serialize;

mod parser;

pub use parser::{extract_table_name, find_table_alias};

use parser::AliasPatterns;
use std::sync::Arc;

/// Literal substituted for fully masked columns.
pub const FULL_MASK_LITERAL: &str = "'******'";
/// Literal substituted for replaced columns.
pub const REPLACE_LITERAL: &str = "'***'";

/// Upper bound on cached column patterns before the cache is reset.
const PATTERN_CACHE_LIMIT: usize = 4096;

/// Table information derived from a query. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuery {
    pub table_name: Option<String>,
    pub table_alias: Option<String>,
    pub sql: String,
}

impl ParsedQuery {
    pub fn parse(sql: &str) -> Self {
        let table_name = extract_table_name(sql);
        let table_alias = table_name
            .as_deref()
            .and_then(|table| find_table_alias(sql, table));

        Self {
            table_name,
            table_alias,
            sql: sql.to_string(),
        }
    }
}

/// Result of rewriting one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub sql: String,
    pub table: Option<String>,
    pub rules_applied: usize,
    /// Masked columns still referenced without the table alias, which the
    /// rewrite leaves in clear text.
    pub unmasked_columns: Vec<String>,
}

impl RewriteOutcome {
    fn unchanged(sql: &str, table: Option<String>) -> Self {
        Self {
            sql: sql.to_string(),
            table,
            rules_applied: 0,
            unmasked_columns: Vec::new(),
        }
    }

    pub fn is_masked(&self) -> bool {
        self.rules_applied > 0
    }
}

/// Rewrites column references into masking expressions.
///
/// The rewriter is stateless apart from caches of compiled column and alias
/// patterns, so one instance is shared by every connection.
#[derive(Debug, Default)]
pub struct SqlRewriter {
    patterns: DashMap<String, Regex>,
    aliases: DashMap<String, Arc<AliasPatterns>>,
}

impl SqlRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&self, sql: &str) -> ParsedQuery {
        self.parse_with_table(sql, extract_table_name(sql))
    }

    fn parse_with_table(&self, sql: &str, table_name: Option<String>) -> ParsedQuery {
        let table_alias = table_name
            .as_deref()
            .and_then(|table| self.alias_for(sql, table));

        ParsedQuery {
            table_name,
            table_alias,
            sql: sql.to_string(),
        }
    }

    /// Rewrite `sql` with the given rules. Rules that do not target the
    /// extracted table, or are inactive, are ignored.
    pub fn rewrite(&self, sql: &str, rules: &[MaskingRule]) -> String {
        let Some(table) = extract_table_name(sql) else {
            return sql.to_string();
        };
        let applicable: Vec<MaskingRule> = rules
            .iter()
            .filter(|rule| rule.applies_to(&table))
            .cloned()
            .collect();
        if applicable.is_empty() {
            return sql.to_string();
        }

        let parsed = self.parse_with_table(sql, Some(table));
        self.rewrite_parsed(&parsed, &applicable).sql
    }

    /// Look up the active rules for the statement's table and rewrite it.
    /// Alias resolution only runs for tables that have active rules.
    pub fn rewrite_with_store(&self, sql: &str, store: &RuleStore) -> RewriteOutcome {
        let Some(table) = extract_table_name(sql) else {
            return RewriteOutcome::unchanged(sql, None);
        };

        let rules = store.active_rules(&table);
        if rules.is_empty() {
            return RewriteOutcome::unchanged(sql, Some(table));
        }

        let parsed = self.parse_with_table(sql, Some(table));
        self.rewrite_parsed(&parsed, &rules)
    }

    fn alias_for(&self, sql: &str, table: &str) -> Option<String> {
        let cached = self.aliases.get(table).map(|entry| entry.value().clone());
        let patterns = match cached {
            Some(patterns) => patterns,
            None => {
                let patterns = Arc::new(AliasPatterns::new(table)?);
                if self.aliases.len() >= PATTERN_CACHE_LIMIT {
                    self.aliases.clear();
                }
                self.aliases.insert(table.to_string(), patterns.clone());
                patterns
            }
        };
        patterns.find(sql)
    }

    /// Best-effort rewrite: per-rule failures are skipped, and a failure of
    /// the whole rewrite falls back to the original statement.
    fn rewrite_parsed(&self, parsed: &ParsedQuery, rules: &[MaskingRule]) -> RewriteOutcome {
        match self.try_rewrite(parsed, rules) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    table = ?parsed.table_name,
                    error = %e,
                    "Rewrite failed; statement forwarded unmasked (data exposure risk)"
                );
                RewriteOutcome::unchanged(&parsed.sql, parsed.table_name.clone())
            }
        }
    }

    fn try_rewrite(
        &self,
        parsed: &ParsedQuery,
        rules: &[MaskingRule],
    ) -> Result<RewriteOutcome, RuleError> {
        let table = parsed
            .table_name
            .clone()
            .ok_or(RuleError::EmptyField("table"))?;

        let alias = parsed.table_alias.as_deref();
        let mut sql = parsed.sql.clone();
        let mut applied = 0;
        let mut unmasked_columns = Vec::new();

        for rule in rules {
            match self.apply_rule(&sql, rule, alias) {
                Ok(Some(rewritten)) => {
                    sql = rewritten;
                    applied += 1;
                }
                Ok(None) => {
                    tracing::trace!(table = %table, column = %rule.column, "Column not referenced");
                }
                Err(e) => {
                    tracing::warn!(
                        table = %table,
                        column = %rule.column,
                        error = %e,
                        "Skipping masking rule"
                    );
                    continue;
                }
            }

            if let Some(alias) = alias {
                if self.has_unqualified_reference(&sql, rule.column.trim()) {
                    tracing::warn!(
                        table = %table,
                        column = %rule.column,
                        alias,
                        "Column referenced without alias forwarded unmasked (data exposure risk)"
                    );
                    unmasked_columns.push(rule.column.clone());
                }
            }
        }

        if applied > 0 {
            tracing::debug!(table = %table, rules_applied = applied, "Masked query");
        } else if parser::selects_wildcard(&parsed.sql) {
            tracing::warn!(
                table = %table,
                "Wildcard projection on a masked table forwarded unmasked"
            );
        }

        Ok(RewriteOutcome {
            sql,
            table: Some(table),
            rules_applied: applied,
            unmasked_columns,
        })
    }

    /// Whether `column` occurs in `sql` without any `qualifier.` in front.
    fn has_unqualified_reference(&self, sql: &str, column: &str) -> bool {
        let Ok(pattern) = self.pattern_for(column) else {
            return false;
        };
        let found = pattern
            .find_iter(sql)
            .any(|m| m.start() == 0 || sql.as_bytes()[m.start() - 1] != b'.');
        found
    }

    /// Returns `Ok(None)` when the column reference does not occur.
    fn apply_rule(
        &self,
        sql: &str,
        rule: &MaskingRule,
        alias: Option<&str>,
    ) -> Result<Option<String>, RuleError> {
        let column = rule.column.trim();
        if !parser::is_identifier(column) {
            return Err(RuleError::InvalidPattern {
                column: rule.column.clone(),
                reason: "not a bare column identifier".to_string(),
            });
        }

        let reference = match alias {
            Some(alias) => format!("{alias}.{column}"),
            None => column.to_string(),
        };

        let pattern = self.pattern_for(&reference)?;
        if !pattern.is_match(sql) {
            return Ok(None);
        }

        let replacement = masking_expression(rule.masking_type, &reference);
        Ok(Some(
            pattern
                .replace_all(sql, NoExpand(&replacement))
                .into_owned(),
        ))
    }

    fn pattern_for(&self, reference: &str) -> Result<Regex, RuleError> {
        let key = reference.to_lowercase();
        if let Some(pattern) = self.patterns.get(&key) {
            return Ok(pattern.clone());
        }

        let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(reference))).map_err(
            |e| RuleError::InvalidPattern {
                column: reference.to_string(),
                reason: e.to_string(),
            },
        )?;

        if self.patterns.len() >= PATTERN_CACHE_LIMIT {
            self.patterns.clear();
        }
        self.patterns.insert(key, pattern.clone());
        Ok(pattern)
    }
}

/// SQL expression that replaces `reference` for the given masking type.
pub fn masking_expression(masking_type: MaskingType, reference: &str) -> String {
    match masking_type {
        MaskingType::FullMask => FULL_MASK_LITERAL.to_string(),
        MaskingType::PartialMask => {
            format!("CONCAT(SUBSTRING({reference}, 1, 3), '****', SUBSTRING({reference}, -4))")
        }
        MaskingType::Replace => REPLACE_LITERAL.to_string(),
        MaskingType::Hash => format!("MD5({reference})"),
        MaskingType::Randomize => {
            let token = uuid::Uuid::new_v4().simple().to_string();
            format!("'{}'", &token[..8])
        }
    }
}
