use std::fmt;

use rowbind_core::{EntityType, SqlValue};

use crate::error::QueryError;

/// Empty argument list for clauses without placeholders.
pub const NO_ARGS: [SqlValue; 0] = [];

#[derive(Debug, Clone, PartialEq)]
enum Base {
    Select { distinct: bool, columns: Vec<String> },
    Delete,
}

impl Base {
    fn render(&self, sql: &mut String) {
        match self {
            Self::Select { distinct, columns } => {
                sql.push_str("SELECT ");
                if *distinct {
                    sql.push_str("DISTINCT ");
                }
                if columns.is_empty() {
                    sql.push('*');
                } else {
                    sql.push_str(&columns.join(", "));
                }
                sql.push(' ');
            }
            Self::Delete => sql.push_str("DELETE "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Plain,
    Left,
    Outer,
    Inner,
    Cross,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Plain => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Outer => "OUTER JOIN",
            Self::Inner => "INNER JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JoinConstraint {
    None,
    On(String),
    Using(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
struct Join {
    kind: JoinKind,
    table: String,
    alias: Option<String>,
    constraint: JoinConstraint,
    args: Vec<SqlValue>,
}

impl Join {
    fn render(&self, sql: &mut String) {
        sql.push_str(self.kind.as_sql());
        sql.push(' ');
        sql.push_str(&self.table);
        sql.push(' ');
        if let Some(alias) = &self.alias {
            sql.push_str("AS ");
            sql.push_str(alias);
            sql.push(' ');
        }
        match &self.constraint {
            JoinConstraint::None => {}
            JoinConstraint::On(condition) => {
                sql.push_str("ON ");
                sql.push_str(condition);
                sql.push(' ');
            }
            JoinConstraint::Using(columns) => {
                sql.push_str("USING (");
                sql.push_str(&columns.join(", "));
                sql.push_str(") ");
            }
        }
    }
}

/// A pending join; finish it with [`JoinBuilder::on`], [`JoinBuilder::using`] or
/// [`JoinBuilder::unconstrained`] to get the query back.
#[must_use]
pub struct JoinBuilder {
    query: Query,
    join: Join,
}

impl JoinBuilder {
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.join.alias = Some(alias.into());
        self
    }

    pub fn on<I, V>(mut self, condition: impl Into<String>, args: I) -> Query
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.join.constraint = JoinConstraint::On(condition.into());
        self.join.args = args.into_iter().map(Into::into).collect();
        self.finish()
    }

    pub fn using<I, C>(mut self, columns: I) -> Query
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.join.constraint = JoinConstraint::Using(columns.into_iter().map(Into::into).collect());
        self.finish()
    }

    /// Joins without a constraint, as a cross join usually is.
    pub fn unconstrained(self) -> Query {
        self.finish()
    }

    fn finish(mut self) -> Query {
        self.query.joins.push(self.join);
        self.query
    }
}

/// A finalized statement: SQL text plus the arguments for its `?` placeholders in
/// emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    arguments: Vec<SqlValue>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn arguments(&self) -> &[SqlValue] {
        &self.arguments
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.arguments)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.arguments.is_empty() {
            let args: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", args.join(","))?;
        }
        Ok(())
    }
}

/// Fluent SELECT/DELETE builder.
///
/// Clauses are emitted in a fixed order regardless of call order:
/// base, FROM, joins, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT, OFFSET.
/// Construction errors (a group closed while empty, or closed without being
/// opened) are recorded and reported when the query is finalized.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Query {
    base: Base,
    entity: Option<EntityType>,
    table: Option<String>,
    alias: Option<String>,
    joins: Vec<Join>,
    filter: String,
    filter_args: Vec<SqlValue>,
    group_by: Option<String>,
    having: Option<String>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    open_groups: usize,
    group_start: bool,
    error: Option<QueryError>,
}

impl Query {
    fn with_base(base: Base) -> Self {
        Self {
            base,
            entity: None,
            table: None,
            alias: None,
            joins: Vec::new(),
            filter: String::new(),
            filter_args: Vec::new(),
            group_by: None,
            having: None,
            order_by: None,
            limit: None,
            offset: None,
            open_groups: 0,
            group_start: false,
            error: None,
        }
    }

    pub fn select<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self::with_base(Base::Select {
            distinct: false,
            columns: columns.into_iter().map(Into::into).collect(),
        })
    }

    pub fn select_all() -> Self {
        Self::with_base(Base::Select {
            distinct: false,
            columns: Vec::new(),
        })
    }

    pub fn select_distinct<I, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self::with_base(Base::Select {
            distinct: true,
            columns: columns.into_iter().map(Into::into).collect(),
        })
    }

    pub fn delete() -> Self {
        Self::with_base(Base::Delete)
    }

    pub fn is_select(&self) -> bool {
        matches!(self.base, Base::Select { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.base, Base::Delete)
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// The entity type rows of this query map to, when it was built for one.
    pub fn entity(&self) -> Option<&EntityType> {
        self.entity.as_ref()
    }

    pub fn for_entity(mut self, entity: EntityType) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn join_with(self, kind: JoinKind, table: impl Into<String>) -> JoinBuilder {
        JoinBuilder {
            query: self,
            join: Join {
                kind,
                table: table.into(),
                alias: None,
                constraint: JoinConstraint::None,
                args: Vec::new(),
            },
        }
    }

    pub fn join(self, table: impl Into<String>) -> JoinBuilder {
        self.join_with(JoinKind::Plain, table)
    }

    pub fn inner_join(self, table: impl Into<String>) -> JoinBuilder {
        self.join_with(JoinKind::Inner, table)
    }

    pub fn left_join(self, table: impl Into<String>) -> JoinBuilder {
        self.join_with(JoinKind::Left, table)
    }

    pub fn outer_join(self, table: impl Into<String>) -> JoinBuilder {
        self.join_with(JoinKind::Outer, table)
    }

    pub fn cross_join(self, table: impl Into<String>) -> JoinBuilder {
        self.join_with(JoinKind::Cross, table)
    }

    fn push_condition(&mut self, glue: &str, clause: &str) {
        if !self.filter.is_empty() && !self.group_start {
            self.filter.push_str(glue);
        }
        self.filter.push_str(clause);
        self.group_start = false;
    }

    fn push_args<I, V>(&mut self, args: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.filter_args.extend(args.into_iter().map(Into::into));
    }

    /// Adds a condition, joined to the previous one with `AND`.
    pub fn filter<I, V>(mut self, clause: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_condition(" AND ", clause.as_ref());
        self.push_args(args);
        self
    }

    pub fn and<I, V>(self, clause: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.filter(clause, args)
    }

    pub fn or<I, V>(mut self, clause: impl AsRef<str>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_condition(" OR ", clause.as_ref());
        self.push_args(args);
        self
    }

    fn start_group(mut self, glue: &str) -> Self {
        if !self.filter.is_empty() && !self.group_start {
            self.filter.push_str(glue);
        }
        self.filter.push('(');
        self.open_groups += 1;
        self.group_start = true;
        self
    }

    pub fn start_group_and(self) -> Self {
        self.start_group(" AND ")
    }

    pub fn start_group_or(self) -> Self {
        self.start_group(" OR ")
    }

    pub fn end_group(mut self) -> Self {
        if self.group_start {
            self.record(QueryError::EmptyGroup);
        } else if self.open_groups == 0 {
            self.record(QueryError::UnbalancedGroup);
        } else {
            self.filter.push(')');
            self.open_groups -= 1;
        }
        self.group_start = false;
        self
    }

    fn record(&mut self, error: QueryError) {
        self.error.get_or_insert(error);
    }

    fn push_list<I, V>(&mut self, glue: &str, column: &str, operator: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();
        let placeholders = vec!["?"; values.len()].join(",");
        self.push_condition(glue, &format!("{column} {operator} ({placeholders})"));
        self.filter_args.extend(values);
    }

    /// `column IN (?,?,...)` with one placeholder per value, joined with `AND`.
    pub fn in_list<I, V>(mut self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_list(" AND ", column.as_ref(), "IN", values);
        self
    }

    pub fn and_in<I, V>(self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.in_list(column, values)
    }

    pub fn or_in<I, V>(mut self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_list(" OR ", column.as_ref(), "IN", values);
        self
    }

    pub fn not_in<I, V>(mut self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_list(" AND ", column.as_ref(), "NOT IN", values);
        self
    }

    pub fn and_not_in<I, V>(self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.not_in(column, values)
    }

    pub fn or_not_in<I, V>(mut self, column: impl AsRef<str>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.push_list(" OR ", column.as_ref(), "NOT IN", values);
        self
    }

    pub fn group_by(mut self, columns: impl Into<String>) -> Self {
        self.group_by = Some(columns.into());
        self
    }

    pub fn having(mut self, condition: impl Into<String>) -> Self {
        self.having = Some(condition.into());
        self
    }

    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The same filters as a `SELECT *`, used to find the row a single-row delete
    /// would remove.
    pub(crate) fn as_select(&self) -> Query {
        self.projected(Vec::new())
    }

    /// The same filters selecting only `columns`.
    pub(crate) fn projected(&self, columns: Vec<String>) -> Query {
        let mut select = self.clone();
        select.base = Base::Select {
            distinct: false,
            columns,
        };
        select
    }

    fn arguments(&self) -> Vec<SqlValue> {
        self.joins
            .iter()
            .flat_map(|join| join.args.iter().cloned())
            .chain(self.filter_args.iter().cloned())
            .collect()
    }

    fn render_body(&self, sql: &mut String, table: &str, ordered: bool) {
        sql.push_str("FROM ");
        sql.push_str(table);
        sql.push(' ');
        if let Some(alias) = &self.alias {
            sql.push_str("AS ");
            sql.push_str(alias);
            sql.push(' ');
        }
        for join in &self.joins {
            join.render(sql);
        }
        if !self.filter.is_empty() {
            sql.push_str("WHERE ");
            sql.push_str(&self.filter);
            sql.push(' ');
        }
        push_clause(sql, "GROUP BY", self.group_by.as_deref());
        push_clause(sql, "HAVING", self.having.as_deref());
        if ordered {
            push_clause(sql, "ORDER BY", self.order_by.as_deref());
        }
        // SQLite only accepts OFFSET after a LIMIT; -1 means no limit
        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!("LIMIT {limit} ")),
            (None, Some(_)) => sql.push_str("LIMIT -1 "),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!("OFFSET {offset} "));
        }
    }

    fn finalize(&self, render: impl FnOnce(&mut String, &str)) -> Result<Statement, QueryError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let table = self.table.as_deref().ok_or(QueryError::MissingTable)?;

        let mut sql = String::new();
        render(&mut sql, table);
        let sql = sql.trim_end().to_string();

        if self.open_groups > 0 {
            return Err(QueryError::UnclosedGroup {
                open: self.open_groups,
                sql,
            });
        }
        Ok(Statement {
            sql,
            arguments: self.arguments(),
        })
    }

    pub fn to_sql(&self) -> Result<Statement, QueryError> {
        self.finalize(|sql, table| {
            self.base.render(sql);
            self.render_body(sql, table, true);
        })
    }

    /// `SELECT EXISTS(SELECT 1 ...)` over the same rows, without ORDER BY.
    pub fn to_exists_sql(&self) -> Result<Statement, QueryError> {
        self.finalize(|sql, table| {
            sql.push_str("SELECT EXISTS(SELECT 1 ");
            self.render_body(sql, table, false);
            let trimmed = sql.trim_end().len();
            sql.truncate(trimmed);
            sql.push(')');
        })
    }

    /// `SELECT COUNT(*) ...` over the same rows, without ORDER BY.
    pub fn to_count_sql(&self) -> Result<Statement, QueryError> {
        self.finalize(|sql, table| {
            sql.push_str("SELECT COUNT(*) ");
            self.render_body(sql, table, false);
        })
    }
}

fn push_clause(sql: &mut String, keyword: &str, clause: Option<&str>) {
    if let Some(clause) = clause {
        sql.push_str(keyword);
        sql.push(' ');
        sql.push_str(clause);
        sql.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<SqlValue> {
        values.iter().copied().map(SqlValue::Integer).collect()
    }

    #[test]
    fn or_group_nests_and_conditions() {
        let stmt = Query::select_all()
            .from("t")
            .filter("a=?", [1])
            .start_group_or()
            .and("b=?", [2])
            .and("c=?", [3])
            .end_group()
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM t WHERE a=? OR (b=? AND c=?)");
        assert_eq!(stmt.arguments(), ints(&[1, 2, 3]).as_slice());
    }

    #[test]
    fn finalizing_with_open_group_fails() {
        let query = Query::select_all()
            .from("t")
            .filter("a=?", [1])
            .start_group_or()
            .and("b=?", [2]);
        assert!(matches!(query.to_sql(), Err(QueryError::UnclosedGroup { open: 1, .. })));
        assert!(query.to_count_sql().is_err());
    }

    #[test]
    fn empty_group_is_an_error() {
        let query = Query::select_all().from("t").start_group_and().end_group();
        assert_eq!(query.to_sql(), Err(QueryError::EmptyGroup));
    }

    #[test]
    fn closing_without_opening_is_an_error() {
        let query = Query::select_all().from("t").filter("a=?", [1]).end_group();
        assert_eq!(query.to_sql(), Err(QueryError::UnbalancedGroup));
    }

    #[test]
    fn in_list_expands_placeholders() {
        let stmt = Query::select_all().from("t").in_list("x", [1, 2, 3]).to_sql().unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM t WHERE x IN (?,?,?)");
        assert_eq!(stmt.arguments(), ints(&[1, 2, 3]).as_slice());
    }

    #[test]
    fn not_in_and_or_in_glue() {
        let stmt = Query::select(["name"])
            .from("t")
            .not_in("x", [1, 2])
            .or_in("y", ["a"])
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql(), "SELECT name FROM t WHERE x NOT IN (?,?) OR y IN (?)");
        assert_eq!(
            stmt.arguments(),
            &[SqlValue::Integer(1), SqlValue::Integer(2), SqlValue::Text("a".into())]
        );
    }

    #[test]
    fn booleans_bind_as_integers() {
        let stmt = Query::select_all().from("t").filter("done=?", [true]).to_sql().unwrap();
        assert_eq!(stmt.arguments(), ints(&[1]).as_slice());
    }

    #[test]
    fn clauses_emit_in_fixed_order() {
        let stmt = Query::select_distinct(["a.name", "COUNT(b.Id)"])
            .offset(20)
            .limit(10)
            .order_by("a.name DESC")
            .having("COUNT(b.Id) > 1")
            .group_by("a.name")
            .filter("a.active=?", [true])
            .from("Authors")
            .alias("a")
            .left_join("Books")
            .alias("b")
            .on("b.author = a.Id AND b.year > ?", [1990])
            .to_sql()
            .unwrap();
        assert_eq!(
            stmt.sql(),
            "SELECT DISTINCT a.name, COUNT(b.Id) FROM Authors AS a \
             LEFT JOIN Books AS b ON b.author = a.Id AND b.year > ? \
             WHERE a.active=? GROUP BY a.name HAVING COUNT(b.Id) > 1 \
             ORDER BY a.name DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.arguments(), ints(&[1990, 1]).as_slice());
    }

    #[test]
    fn offset_without_limit_gets_unbounded_limit() {
        let query = Query::select_all().from("t").order_by("a").offset(5);
        assert_eq!(query.to_sql().unwrap().sql(), "SELECT * FROM t ORDER BY a LIMIT -1 OFFSET 5");
        assert_eq!(
            query.to_exists_sql().unwrap().sql(),
            "SELECT EXISTS(SELECT 1 FROM t LIMIT -1 OFFSET 5)"
        );
        assert_eq!(query.to_count_sql().unwrap().sql(), "SELECT COUNT(*) FROM t LIMIT -1 OFFSET 5");
    }

    #[test]
    fn projection_keeps_filters() {
        let query = Query::delete().from("t").filter("a=?", [1]);
        let ids = query.projected(vec!["Id".into()]);
        assert!(ids.is_select());
        assert_eq!(ids.to_sql().unwrap().sql(), "SELECT Id FROM t WHERE a=?");
    }

    #[test]
    fn join_kinds_and_using() {
        let stmt = Query::select_all()
            .from("a")
            .join("b")
            .using(["k"])
            .inner_join("c")
            .on("c.k = a.k", NO_ARGS)
            .outer_join("d")
            .on("d.k = a.k", NO_ARGS)
            .cross_join("e")
            .unconstrained()
            .to_sql()
            .unwrap();
        assert_eq!(
            stmt.sql(),
            "SELECT * FROM a JOIN b USING (k) INNER JOIN c ON c.k = a.k \
             OUTER JOIN d ON d.k = a.k CROSS JOIN e"
        );
    }

    #[test]
    fn exists_and_count_drop_order_by() {
        let query = Query::select_all()
            .from("t")
            .filter("a=?", [5])
            .order_by("a")
            .limit(3);
        let exists = query.to_exists_sql().unwrap();
        assert_eq!(exists.sql(), "SELECT EXISTS(SELECT 1 FROM t WHERE a=? LIMIT 3)");
        assert_eq!(exists.arguments(), ints(&[5]).as_slice());

        let count = query.to_count_sql().unwrap();
        assert_eq!(count.sql(), "SELECT COUNT(*) FROM t WHERE a=? LIMIT 3");
    }

    #[test]
    fn delete_statement() {
        let stmt = Query::delete().from("t").filter("Id=?", [4]).to_sql().unwrap();
        assert_eq!(stmt.sql(), "DELETE FROM t WHERE Id=?");
        assert!(Query::delete().is_delete());
    }

    #[test]
    fn missing_table_is_an_error() {
        assert_eq!(Query::select_all().to_sql(), Err(QueryError::MissingTable));
    }

    #[test]
    fn groups_at_start_and_nested() {
        let stmt = Query::select_all()
            .from("t")
            .start_group_and()
            .start_group_or()
            .filter("a=?", [1])
            .or("b=?", [2])
            .end_group()
            .and("c=?", [3])
            .end_group()
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM t WHERE ((a=? OR b=?) AND c=?)");
    }

    #[test]
    fn finalizing_does_not_consume_the_query() {
        let query = Query::select_all().from("t").filter("a=?", [1]);
        assert_eq!(query.to_sql().unwrap(), query.to_sql().unwrap());
        assert_eq!(
            query.to_sql().unwrap().to_string(),
            "SELECT * FROM t WHERE a=? [1]"
        );
    }
}
