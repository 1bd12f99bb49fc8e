//! Typed predicate builder for the `logs` table.
//!
//! Filters are turned into an ordered list of `(column, operator, value)`
//! conditions. Rendering only ever emits `?` placeholders; values travel
//! separately and are bound positionally by the store, so caller input never
//! reaches the SQL text.
//!
//! The WHERE clause is rendered once and shared by the page query and the
//! count query. Only the page query carries `LIMIT ? OFFSET ?`.

use crate::log_record::{LogFilter, Pagination};

/// Selected columns, in `LogRow` order.
pub const LOG_COLUMNS: &str = "id, logLevel, source, message, createdAt, updatedAt";

/// Columns a predicate may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    LogLevel,
    CreatedAt,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::LogLevel => "logLevel",
            Column::CreatedAt => "createdAt",
        }
    }
}

/// Comparison operators. Values are always bound, never inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gte,
    Lte,
}

impl Operator {
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
        }
    }
}

/// Value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Text(String),
    Int(i64),
}

/// One `column op ?` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub column: Column,
    pub op: Operator,
    pub value: BindValue,
}

impl Condition {
    fn render(&self) -> String {
        format!("{} {} ?", self.column.name(), self.op.sql())
    }
}

/// How the conditions inside one group are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Any,
    All,
}

impl Join {
    fn sql(&self) -> &'static str {
        match self {
            Join::Any => " OR ",
            Join::All => " AND ",
        }
    }
}

/// A parenthesised group of conditions. Groups are always AND-ed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateGroup {
    pub join: Join,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    groups: Vec<PredicateGroup>,
}

impl Predicate {
    /// Levels become one OR group, the date range one AND group.
    pub fn from_filter(filter: &LogFilter) -> Self {
        let mut predicate = Predicate::default();

        if !filter.level_filter.is_empty() {
            predicate.groups.push(PredicateGroup {
                join: Join::Any,
                conditions: filter
                    .level_filter
                    .iter()
                    .map(|level| Condition {
                        column: Column::LogLevel,
                        op: Operator::Eq,
                        value: BindValue::Text(level.trim().to_uppercase()),
                    })
                    .collect(),
            });
        }

        if let Some(range) = &filter.date_filter {
            predicate.groups.push(PredicateGroup {
                join: Join::All,
                conditions: vec![
                    Condition {
                        column: Column::CreatedAt,
                        op: Operator::Gte,
                        value: BindValue::Text(range.from.trim().to_string()),
                    },
                    Condition {
                        column: Column::CreatedAt,
                        op: Operator::Lte,
                        value: BindValue::Text(range.to.trim().to_string()),
                    },
                ],
            });
        }

        predicate
    }

    pub fn groups(&self) -> &[PredicateGroup] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// ` WHERE (...) AND (...)`, or an empty string when there is nothing to filter.
    pub fn where_clause(&self) -> String {
        if self.groups.is_empty() {
            return String::new();
        }
        let rendered: Vec<String> = self
            .groups
            .iter()
            .map(|group| {
                let parts: Vec<String> = group.conditions.iter().map(Condition::render).collect();
                format!("({})", parts.join(group.join.sql()))
            })
            .collect();
        format!(" WHERE {}", rendered.join(" AND "))
    }

    /// Bound values in placeholder order.
    pub fn values(&self) -> Vec<BindValue> {
        self.groups
            .iter()
            .flat_map(|group| group.conditions.iter().map(|c| c.value.clone()))
            .collect()
    }
}

/// The page query and the count query for one `(filter, pagination)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    where_clause: String,
    values: Vec<BindValue>,
    limit: i64,
    offset: i64,
}

impl LogQuery {
    pub fn new(filter: &LogFilter, pagination: &Pagination) -> Self {
        let predicate = Predicate::from_filter(filter);
        Self {
            where_clause: predicate.where_clause(),
            values: predicate.values(),
            limit: i64::from(pagination.limit),
            offset: i64::try_from(pagination.row_offset()).unwrap_or(i64::MAX),
        }
    }

    /// Page query. Bind `values()` then limit and offset.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT {LOG_COLUMNS} FROM logs{} ORDER BY id ASC LIMIT ? OFFSET ?",
            self.where_clause
        )
    }

    /// Total count under the same predicate, without paging.
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM logs{}", self.where_clause)
    }

    /// Predicate values, shared by both queries.
    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    /// Predicate values followed by limit and offset, for the page query.
    pub fn page_values(&self) -> Vec<BindValue> {
        let mut values = self.values.clone();
        values.push(BindValue::Int(self.limit));
        values.push(BindValue::Int(self.offset));
        values
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_record::DateRange;

    fn text(s: &str) -> BindValue {
        BindValue::Text(s.to_string())
    }

    #[test]
    fn no_filter_means_no_where_clause() {
        let query = LogQuery::new(&LogFilter::default(), &Pagination::default());
        assert_eq!(
            query.select_sql(),
            "SELECT id, logLevel, source, message, createdAt, updatedAt FROM logs ORDER BY id ASC LIMIT ? OFFSET ?"
        );
        assert_eq!(query.count_sql(), "SELECT COUNT(*) FROM logs");
        assert!(query.values().is_empty());
        assert_eq!(query.page_values(), vec![BindValue::Int(10), BindValue::Int(0)]);
    }

    #[test]
    fn level_filter_is_or_combined_and_upper_cased() {
        let filter = LogFilter {
            level_filter: vec!["info".into(), " Error".into()],
            date_filter: None,
        };
        let query = LogQuery::new(&filter, &Pagination::default());
        assert_eq!(
            query.count_sql(),
            "SELECT COUNT(*) FROM logs WHERE (logLevel = ? OR logLevel = ?)"
        );
        assert_eq!(query.values(), &[text("INFO"), text("ERROR")]);
    }

    #[test]
    fn date_filter_alone_gets_its_own_where() {
        let filter = LogFilter {
            level_filter: vec![],
            date_filter: Some(DateRange {
                from: "2024-01-01".into(),
                to: "2024-02-01".into(),
            }),
        };
        let query = LogQuery::new(&filter, &Pagination::default());
        assert_eq!(
            query.count_sql(),
            "SELECT COUNT(*) FROM logs WHERE (createdAt >= ? AND createdAt <= ?)"
        );
        assert_eq!(query.values(), &[text("2024-01-01"), text("2024-02-01")]);
    }

    #[test]
    fn both_filters_are_and_combined() {
        let filter = LogFilter {
            level_filter: vec!["warn".into()],
            date_filter: Some(DateRange {
                from: "a".into(),
                to: "b".into(),
            }),
        };
        let query = LogQuery::new(&filter, &Pagination::new(5, 1));
        assert_eq!(
            query.select_sql(),
            "SELECT id, logLevel, source, message, createdAt, updatedAt FROM logs \
             WHERE (logLevel = ?) AND (createdAt >= ? AND createdAt <= ?) ORDER BY id ASC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            query.page_values(),
            vec![text("WARN"), text("a"), text("b"), BindValue::Int(5), BindValue::Int(5)]
        );
    }

    #[test]
    fn page_index_becomes_row_offset() {
        let query = LogQuery::new(&LogFilter::default(), &Pagination::new(10, 2));
        assert_eq!(query.limit(), 10);
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn hostile_input_never_reaches_sql_text() {
        let filter = LogFilter {
            level_filter: vec!["info' OR 1=1 --".into()],
            date_filter: Some(DateRange {
                from: "'; DROP TABLE logs; --".into(),
                to: "x".into(),
            }),
        };
        let query = LogQuery::new(&filter, &Pagination::default());
        assert!(!query.select_sql().contains("DROP"));
        assert!(!query.count_sql().contains("1=1"));
        assert_eq!(query.values()[0], text("INFO' OR 1=1 --"));
    }
}
