//! Remote SQL construction
//!
//! Every query sent to the remote server is assembled here from escaped
//! identifiers; user input never reaches the wire un-escaped.

/// Quote an identifier, doubling embedded `"`.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded `'`. Only used by the
/// `information_schema` fallback queries.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified_name(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => {
            format!("{}.{}", quote_identifier(schema), quote_identifier(table))
        }
        _ => quote_identifier(table),
    }
}

/// Build a query that returns only the result schema. `WHERE 1=0`
/// guarantees the remote sends metadata without fetching rows.
pub fn build_schema_query(schema: Option<&str>, table: &str) -> String {
    format!("SELECT * FROM {} WHERE 1=0", qualified_name(schema, table))
}

/// Build the projected scan query.
///
/// An empty projection, or one that is exactly the identity permutation of
/// the full column set, emits `*`. A full-length projection in any other
/// order emits the explicit list so the remote preserves that order.
pub fn build_projected_query(
    schema: Option<&str>,
    table: &str,
    column_names: &[String],
    projection: &[usize],
) -> String {
    let is_identity = projection.len() == column_names.len()
        && projection.iter().enumerate().all(|(i, &col)| i == col);

    let column_list = if projection.is_empty() || is_identity {
        "*".to_string()
    } else {
        projection
            .iter()
            .filter(|&&col| col < column_names.len())
            .map(|&col| quote_identifier(&column_names[col]))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!("SELECT {column_list} FROM {}", qualified_name(schema, table))
}

/// Extract the unescaped table name from a query of the form
/// `SELECT * FROM "table"` (the shape the replacement scan synthesizes).
/// Doubled quotes inside the identifier are unescaped; an unquoted
/// trailing token is accepted as a fallback.
pub fn extract_table_name(query: &str) -> Option<String> {
    let rest = strip_keyword(query.trim(), "SELECT")?;
    let rest = rest.trim_start().strip_prefix('*')?;
    let rest = strip_keyword(rest.trim_start(), "FROM")?;
    let rest = rest.trim_start();

    if let Some(inner) = rest.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = inner.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    return Some(name);
                }
            } else {
                name.push(c);
            }
        }
        // Unterminated quoted identifier.
        None
    } else {
        let token: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// Strip a leading keyword (case-insensitive) that must be followed by
/// whitespace.
fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let head = input.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let tail = &input[keyword.len()..];
    if tail.starts_with(char::is_whitespace) {
        Some(tail)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn projected_query_single_column() {
        let sql = build_projected_query(None, "Order", &names(&["id"]), &[0]);
        assert_eq!(sql, r#"SELECT "id" FROM "Order""#);
    }

    #[test]
    fn projected_query_subset_preserves_order() {
        let sql = build_projected_query(None, "Order", &names(&["id", "name", "status"]), &[0, 2]);
        assert_eq!(sql, r#"SELECT "id", "status" FROM "Order""#);
    }

    #[test]
    fn projected_query_empty_projection_is_star() {
        let sql = build_projected_query(None, "Order", &names(&["id", "name"]), &[]);
        assert_eq!(sql, r#"SELECT * FROM "Order""#);
    }

    #[test]
    fn projected_query_identity_projection_is_star() {
        let sql = build_projected_query(None, "Order", &names(&["id", "name"]), &[0, 1]);
        assert_eq!(sql, r#"SELECT * FROM "Order""#);
    }

    #[test]
    fn projected_query_full_reorder_is_explicit() {
        let sql = build_projected_query(None, "Order", &names(&["id", "name"]), &[1, 0]);
        assert_eq!(sql, r#"SELECT "name", "id" FROM "Order""#);
    }

    #[test]
    fn projected_query_escapes_quotes() {
        let sql = build_projected_query(None, "My\"Table", &names(&["col1"]), &[0]);
        assert_eq!(sql, r#"SELECT "col1" FROM "My""Table""#);

        let sql = build_projected_query(None, "Order", &names(&["col\"1", "col2"]), &[0, 1, 99]);
        // Out-of-range indices are dropped; the rest keep their order.
        assert_eq!(sql, r#"SELECT "col""1", "col2" FROM "Order""#);
    }

    #[test]
    fn projected_query_with_schema() {
        let sql = build_projected_query(Some("sales"), "Order", &names(&["id", "x"]), &[0]);
        assert_eq!(sql, r#"SELECT "id" FROM "sales"."Order""#);
    }

    #[test]
    fn schema_query_shapes() {
        assert_eq!(
            build_schema_query(None, "Order"),
            r#"SELECT * FROM "Order" WHERE 1=0"#
        );
        assert_eq!(
            build_schema_query(Some("s"), "My\"Table"),
            r#"SELECT * FROM "s"."My""Table" WHERE 1=0"#
        );
        assert_eq!(
            build_schema_query(Some(""), "t"),
            r#"SELECT * FROM "t" WHERE 1=0"#
        );
    }

    #[test]
    fn extract_simple_table_name() {
        assert_eq!(
            extract_table_name(r#"SELECT * FROM "Order""#).as_deref(),
            Some("Order")
        );
        assert_eq!(
            extract_table_name(r#"select * from "MyTable""#).as_deref(),
            Some("MyTable")
        );
        assert_eq!(
            extract_table_name(r#"SELECT  *  FROM  "TestTable""#).as_deref(),
            Some("TestTable")
        );
    }

    #[test]
    fn extract_unescapes_doubled_quotes() {
        assert_eq!(
            extract_table_name(r#"SELECT * FROM "table""name""#).as_deref(),
            Some("table\"name")
        );
        assert_eq!(
            extract_table_name(r#"SELECT * FROM "a""b""c""#).as_deref(),
            Some("a\"b\"c")
        );
    }

    #[test]
    fn extract_round_trips_builder_output() {
        for table in ["Order", "My\"Table", "a\"\"b", "with space"] {
            let sql = format!("SELECT * FROM {}", quote_identifier(table));
            assert_eq!(extract_table_name(&sql).as_deref(), Some(table), "{sql}");
        }
    }

    #[test]
    fn extract_rejects_other_statements() {
        assert_eq!(extract_table_name(""), None);
        assert_eq!(extract_table_name("INSERT INTO t VALUES (1)"), None);
        assert_eq!(extract_table_name("SELECT id FROM t"), None);
        assert_eq!(extract_table_name(r#"SELECT * FROM "unterminated"#), None);
    }

    #[test]
    fn extract_accepts_unquoted_fallback() {
        assert_eq!(
            extract_table_name("SELECT * FROM orders").as_deref(),
            Some("orders")
        );
    }

    #[test]
    fn literal_quoting_doubles_single_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("plain"), "'plain'");
    }
}
