//! SQL extraction from model output
//!
//! Never fails: an empty completion becomes an empty string, which then fails
//! loudly when executed.

use crate::llm::Completion;

const SQL_QUERY_MARKER: &str = "SQLQuery:";
const SQL_RESULT_MARKER: &str = "SQLResult:";
const FENCE: &str = "```";

/// Pull the SQL statement out of a text-to-SQL completion.
pub fn parse_response_to_sql(completion: &Completion) -> String {
    match completion.content.as_deref() {
        Some(content) if !content.is_empty() => extract_sql(content),
        _ => String::new(),
    }
}

/// Same as [`parse_response_to_sql`] for raw text.
pub fn extract_sql(response: &str) -> String {
    let mut response = match response.find(SQL_QUERY_MARKER) {
        Some(start) => &response[start + SQL_QUERY_MARKER.len()..],
        None => response,
    };
    if let Some(end) = response.find(SQL_RESULT_MARKER) {
        response = &response[..end];
    }

    strip_language_tag(strip_fences(response)).trim().to_string()
}

/// Remove one surrounding ``` fence; single backticks belong to the SQL.
fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text.strip_prefix(FENCE).unwrap_or(text);
    text.strip_suffix(FENCE).unwrap_or(text).trim()
}

/// Drop a `sql` fence tag at either end; `sql` inside an identifier is kept.
fn strip_language_tag(text: &str) -> &str {
    let mut text = text.trim();

    let leading = text.get(..3).map_or(false, |p| p.eq_ignore_ascii_case("sql"))
        && text[3..].chars().next().map_or(true, char::is_whitespace);
    if leading {
        text = text[3..].trim_start();
    }

    if let Some(cut) = text.len().checked_sub(3) {
        let trailing = text.get(cut..).map_or(false, |s| s.eq_ignore_ascii_case("sql"))
            && text[..cut].chars().last().map_or(true, char::is_whitespace);
        if trailing {
            text = text[..cut].trim_end();
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_section_is_extracted() {
        let completion = Completion::new("m", "Question: q\nSQLQuery: SELECT 1; SQLResult: [(1,)]\nAnswer: 1");
        assert_eq!(parse_response_to_sql(&completion), "SELECT 1;");
    }

    #[test]
    fn test_without_marker_whole_text_is_used() {
        assert_eq!(extract_sql("   SELECT name FROM users  \n"), "SELECT name FROM users");
        assert_eq!(extract_sql("SELECT 1 SQLResult: ignored"), "SELECT 1");
    }

    #[test]
    fn test_fences_and_language_tag_are_removed() {
        assert_eq!(extract_sql("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(extract_sql("SQLQuery: ```SQL\nSELECT 2;```"), "SELECT 2;");
    }

    #[test]
    fn test_backtick_identifiers_survive() {
        assert_eq!(
            extract_sql("SQLQuery: SELECT COUNT(*) FROM `orders`"),
            "SELECT COUNT(*) FROM `orders`"
        );
        assert_eq!(extract_sql("```sql\nSELECT `id` FROM `orders`\n```"), "SELECT `id` FROM `orders`");
    }

    #[test]
    fn test_sql_inside_identifiers_is_kept() {
        assert_eq!(extract_sql("SELECT name FROM sqlite_master"), "SELECT name FROM sqlite_master");
        assert_eq!(extract_sql("SELECT * FROM nosql"), "SELECT * FROM nosql");
    }

    #[test]
    fn test_empty_completion_yields_empty_string() {
        assert_eq!(parse_response_to_sql(&Completion::empty("m")), "");
        assert_eq!(parse_response_to_sql(&Completion::new("m", "")), "");
    }
}
