//! Single-table SQL heuristics.
//!
//! These are deliberately not a SQL parser. Only the first `FROM` target is
//! considered, so joins, subqueries and CTEs resolve to whatever table the
//! first `FROM` names (or to nothing when it names a subquery).

use regex::Regex;
use std::sync::OnceLock;

/// Words that can follow a table name without being its alias.
const RESERVED: &[&str] = &[
    "as", "where", "join", "inner", "left", "right", "full", "outer", "cross", "natural",
    "straight_join", "on", "using", "group", "order", "having", "limit", "offset", "union",
    "except", "intersect", "set", "values", "value", "for", "lock", "select", "from", "into",
    "and", "or", "not", "window", "procedure", "partition", "force", "ignore", "use",
    "returning", "with",
];

fn from_pattern() -> &'static Regex {
    static FROM: OnceLock<Regex> = OnceLock::new();
    FROM.get_or_init(|| Regex::new(r"\bfrom\s+(\S+)").expect("static FROM pattern"))
}

fn wildcard_pattern() -> &'static Regex {
    static WILDCARD: OnceLock<Regex> = OnceLock::new();
    WILDCARD.get_or_init(|| {
        Regex::new(r"(?i)\bselect\s+(?:distinct\s+)?(?:[\w$`]+\.)?\*").expect("static wildcard pattern")
    })
}

/// `SELECT *` / `SELECT t.*` projections expand columns server-side, where
/// no textual rewrite can reach them.
pub(crate) fn selects_wildcard(sql: &str) -> bool {
    wildcard_pattern().is_match(sql)
}

pub(crate) fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_reserved(token: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(token))
}

fn strip_quotes(token: &str) -> String {
    token.chars().filter(|c| *c != '`' && *c != '"').collect()
}

/// Name of the table targeted by the first `FROM` clause, lower-cased and
/// without any schema qualifier.
///
/// ```
/// use sqlmask_proxy::rewrite::extract_table_name;
/// assert_eq!(extract_table_name("SELECT * FROM shop.Users u"), Some("users".to_string()));
/// ```
pub fn extract_table_name(sql: &str) -> Option<String> {
    let lowered = sql.to_lowercase();
    let token = from_pattern().captures(&lowered)?.get(1)?.as_str();

    let token = token.trim_end_matches([';', ',', ')']);
    let unquoted = strip_quotes(token);
    let table = unquoted.rsplit('.').next().unwrap_or_default();

    if is_identifier(table) {
        Some(table.to_string())
    } else {
        None
    }
}

/// Alias bound to `table`, if any.
///
/// Looks for `from|join [schema.]table [as] alias` first, then falls back to
/// the token right after the table name's first occurrence.
pub fn find_table_alias(sql: &str, table: &str) -> Option<String> {
    AliasPatterns::new(table)?.find(sql)
}

/// Compiled alias lookup for one table, reusable across statements.
#[derive(Debug)]
pub(crate) struct AliasPatterns {
    clause: Regex,
    occurrence: Regex,
}

impl AliasPatterns {
    pub(crate) fn new(table: &str) -> Option<Self> {
        let escaped = regex::escape(table);
        let clause = Regex::new(&format!(
            r#"(?i)\b(?:from|join)\s+(?:[\w$`"]+\.)?[`"]?{escaped}[`"]?\s+(?:as\s+)?([A-Za-z_][\w$]*)"#
        ))
        .ok()?;
        let occurrence = Regex::new(&format!(r"(?i)\b{escaped}\b")).ok()?;
        Some(Self { clause, occurrence })
    }

    pub(crate) fn find(&self, sql: &str) -> Option<String> {
        if let Some(alias) = self
            .clause
            .captures_iter(sql)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .find(|candidate| !is_reserved(candidate))
        {
            return Some(alias.to_string());
        }

        let found = self.occurrence.find(sql)?;
        let rest = &sql[found.end()..];
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }

        let candidate = rest
            .trim_start()
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')'))
            .next()?;

        if is_identifier(candidate) && !is_reserved(candidate) {
            Some(candidate.to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_wildcard() {
        assert!(selects_wildcard("SELECT * FROM users"));
        assert!(selects_wildcard("select distinct u.* from users u"));
        assert!(!selects_wildcard("SELECT phone FROM users"));
        assert!(!selects_wildcard("SELECT COUNT(*) FROM users"));
    }

    #[test]
    fn test_extract_simple_table() {
        assert_eq!(
            extract_table_name("SELECT * FROM users WHERE id=1"),
            Some("users".to_string())
        );
    }

    #[test]
    fn test_extract_first_table_of_join() {
        let sql = "select a.* from orders o join users u on o.uid=u.id";
        assert_eq!(extract_table_name(sql), Some("orders".to_string()));
        assert_eq!(find_table_alias(sql, "orders"), Some("o".to_string()));
        assert_eq!(find_table_alias(sql, "users"), Some("u".to_string()));
    }

    #[test]
    fn test_extract_strips_schema_and_quotes() {
        assert_eq!(
            extract_table_name("SELECT name FROM `crm`.`Customer_Info`;"),
            Some("customer_info".to_string())
        );
        assert_eq!(
            extract_table_name("select * from public.users,"),
            Some("users".to_string())
        );
    }

    #[test]
    fn test_extract_without_from() {
        assert_eq!(extract_table_name("SELECT 1"), None);
        assert_eq!(extract_table_name("SHOW DATABASES"), None);
        assert_eq!(extract_table_name("select * from"), None);
    }

    #[test]
    fn test_extract_subquery_has_no_table() {
        assert_eq!(
            extract_table_name("select * from (select phone from users) t"),
            None
        );
    }

    #[test]
    fn test_alias_with_as_keyword() {
        assert_eq!(
            find_table_alias("SELECT c.phone FROM customer AS c", "customer"),
            Some("c".to_string())
        );
    }

    #[test]
    fn test_keyword_is_not_an_alias() {
        assert_eq!(find_table_alias("SELECT * FROM users WHERE id=1", "users"), None);
        assert_eq!(find_table_alias("SELECT * FROM users", "users"), None);
        assert_eq!(
            find_table_alias("SELECT * FROM users ORDER BY id", "users"),
            None
        );
    }

    #[test]
    fn test_alias_fallback_after_first_occurrence() {
        assert_eq!(
            find_table_alias("UPDATE users x SET x.phone = NULL", "users"),
            Some("x".to_string())
        );
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("phone"));
        assert!(is_identifier("_tmp$1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
