//! SQL template resolution for batched stored-data lookups.
//!
//! A single bid request can reference any number of stored requests and
//! imps, so fetch queries are configured as templates carrying two list
//! markers instead of a fixed placeholder count. Resolution turns each
//! marker into a parenthesized run of positional placeholders sharing one
//! contiguous numbering, which keeps placeholder index and bind-parameter
//! index coupled.

pub const REQUEST_ID_LIST: &str = "%REQUEST_ID_LIST%";
pub const IMP_ID_LIST: &str = "%IMP_ID_LIST%";

/// A resolved template. The resolver is pure and never fails; anything
/// suspicious about the inputs comes back as a diagnostic for the caller to
/// log.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedQuery {
    pub sql: String,
    pub diagnostics: Vec<String>,
}

/// Substitutes both ID-list markers. The request marker receives
/// `($1..$num_requests)`, the imp marker continues the numbering from
/// there. Markers absent from the template are simply not substituted;
/// repeated markers all get the same list.
pub fn resolve(template: &str, num_requests: i64, num_imps: i64) -> ResolvedQuery {
    let mut diagnostics = Vec::new();
    let num_requests = ensure_non_negative("request", num_requests, &mut diagnostics);
    let num_imps = ensure_non_negative("imp", num_imps, &mut diagnostics);

    let sql = template
        .replace(REQUEST_ID_LIST, &id_list(0, num_requests))
        .replace(IMP_ID_LIST, &id_list(num_requests, num_imps));

    ResolvedQuery { sql, diagnostics }
}

// A negative count can only come from a caller bug; zero of a batch is
// always legal, so clamp rather than fail the whole query build.
fn ensure_non_negative(kind: &str, count: i64, diagnostics: &mut Vec<String>) -> i64 {
    if count < 0 {
        diagnostics.push(format!(
            "cannot build an ID list for {count} stored {kind}s, using 0"
        ));
        return 0;
    }
    count
}

// An empty "()" is illegal in Postgres. "(NULL)" is valid for any id column
// type and evaluates to an empty match, and the planner folds it to a
// one-time false filter.
fn id_list(offset: i64, count: i64) -> String {
    if count == 0 {
        return "(NULL)".to_string();
    }

    let placeholders: Vec<String> = (offset + 1..=offset + count)
        .map(|n| format!("${n}"))
        .collect();
    format!("({})", placeholders.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "SELECT id, requestData, 'request' AS type FROM stored_requests \
         WHERE id IN %REQUEST_ID_LIST% \
         UNION ALL \
         SELECT id, impData, 'imp' AS type FROM stored_imps \
         WHERE id IN %IMP_ID_LIST%";

    #[test]
    fn numbers_placeholders_contiguously() {
        let resolved = resolve(TEMPLATE, 2, 3);
        assert!(resolved.sql.contains("WHERE id IN ($1, $2) "));
        assert!(resolved.sql.contains("WHERE id IN ($3, $4, $5)"));
        assert!(resolved.diagnostics.is_empty());
    }

    #[test]
    fn single_ids_produce_single_placeholders() {
        let resolved = resolve(TEMPLATE, 1, 1);
        assert!(resolved.sql.contains("($1)"));
        assert!(resolved.sql.contains("($2)"));
    }

    #[test]
    fn zero_counts_substitute_null_lists() {
        let resolved = resolve(TEMPLATE, 0, 2);
        assert!(resolved.sql.contains("WHERE id IN (NULL) "));
        assert!(resolved.sql.contains("WHERE id IN ($1, $2)"));

        let resolved = resolve(TEMPLATE, 2, 0);
        assert!(resolved.sql.contains("WHERE id IN ($1, $2) "));
        assert!(resolved.sql.contains("WHERE id IN (NULL)"));
    }

    #[test]
    fn negative_counts_clamp_to_zero_with_a_diagnostic() {
        let resolved = resolve(TEMPLATE, -3, 1);
        assert_eq!(resolved.sql, resolve(TEMPLATE, 0, 1).sql);
        assert_eq!(resolved.diagnostics.len(), 1);
        assert!(resolved.diagnostics[0].contains("-3"));

        let resolved = resolve(TEMPLATE, -1, -1);
        assert_eq!(resolved.diagnostics.len(), 2);
    }

    #[test]
    fn repeated_markers_are_all_replaced() {
        let resolved = resolve(
            "WHERE id IN %REQUEST_ID_LIST% OR alias IN %REQUEST_ID_LIST%",
            2,
            0,
        );
        assert_eq!(resolved.sql, "WHERE id IN ($1, $2) OR alias IN ($1, $2)");
    }

    #[test]
    fn absent_markers_leave_the_template_unchanged() {
        let resolved = resolve("SELECT 1", 4, 4);
        assert_eq!(resolved.sql, "SELECT 1");
    }
}
