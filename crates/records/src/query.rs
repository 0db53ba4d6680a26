//! The filter/sort/search compiler.
//!
//! This turns the list options a caller hands us into a `WHERE` fragment, an `ORDER BY` fragment, and positional
//! arguments.  Values are always bound as arguments, never spliced into the SQL; that includes the JSON path used to
//! reach into the cells.
//!
//! The one part that differs between engines is how to address a cell inside the stored JSON.  That is what a
//! [Dialect] provides.  Everything else, including the semantics of each operator, lives here so that every engine
//! agrees.
//!
//! Filters referencing fields which aren't in the supplied field list are dropped rather than failing the query:
//! views are saved separately from fields, and a stale view should still list records.  The same goes for filters
//! whose value doesn't make sense for the operator (e.g. `between` without two bounds).
use log::*;
use serde_json::Value;

use crate::{Field, FieldType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    In,
    NotIn,
    IsBefore,
    IsAfter,
    IsChecked,
    IsUnchecked,
}

/// One predicate on one field.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Filter {
    pub field_id: String,
    pub operator: Operator,
    /// Scalar, a two-element array for `between`, or an array for `in`/`not_in`.
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(field_id: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Filter {
            field_id: field_id.into(),
            operator,
            value: value.into(),
        }
    }
}

/// How the filters of a query combine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SortSpec {
    pub field_id: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field_id: impl Into<String>) -> Self {
        SortSpec {
            field_id: field_id.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field_id: impl Into<String>) -> Self {
        SortSpec {
            field_id: field_id.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A positional argument.  Adapters convert these to their engine's value type.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlArg {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlArg {
    fn from(x: i64) -> Self {
        SqlArg::Int(x)
    }
}

impl From<f64> for SqlArg {
    fn from(x: f64) -> Self {
        SqlArg::Real(x)
    }
}

impl From<String> for SqlArg {
    fn from(x: String) -> Self {
        SqlArg::Text(x)
    }
}

impl From<&str> for SqlArg {
    fn from(x: &str) -> Self {
        SqlArg::Text(x.to_string())
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(x: Option<T>) -> Self {
        x.map(Into::into).unwrap_or(SqlArg::Null)
    }
}

/// The engine-specific half of the compiler: how to address a cell.
///
/// Every method receives `path`, a placeholder already bound to the cell's JSON path (see [json_path]).  Expressions
/// must read from a column called `cells` and evaluate to SQL NULL when the cell is absent.
pub trait Dialect {
    /// The placeholder for the 1-based argument `index`.
    fn placeholder(&self, index: usize) -> String;

    /// The cell as text.  Arrays and objects come back as their JSON text.
    fn cell_text(&self, path: &str) -> String;

    /// The cell as a number, or NULL if it isn't one.  Must never raise a cast error.
    fn cell_number(&self, path: &str) -> String;

    /// 1 for JSON true, 0 for JSON false, NULL otherwise.
    fn cell_bool(&self, path: &str) -> String;

    /// Lower-case a text expression.  Must fold the same characters as Rust's [str::to_lowercase], since search text
    /// is lowered on our side before it is bound.
    fn lower(&self, expr: &str) -> String {
        format!("LOWER({})", expr)
    }
}

/// The JSON path of a field's cell.
pub fn json_path(field_id: &str) -> String {
    format!("$.\"{}\"", field_id)
}

/// Whether a field id can be expressed as a quoted JSON path key.
pub fn is_addressable(field_id: &str) -> bool {
    !field_id.is_empty() && !field_id.contains('"') && !field_id.contains('\\')
}

/// Accumulates arguments, handing out the placeholder for each.
///
/// Adapters bind their own arguments (the table id, limit and offset) through the same accumulator, so that numbering
/// stays consistent across the whole statement.
pub struct Params<'a> {
    dialect: &'a dyn Dialect,
    args: Vec<SqlArg>,
}

impl<'a> Params<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Params {
            dialect,
            args: vec![],
        }
    }

    /// Bind an argument, returning its placeholder.
    pub fn push(&mut self, arg: impl Into<SqlArg>) -> String {
        self.args.push(arg.into());
        self.dialect.placeholder(self.args.len())
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn args(&self) -> &[SqlArg] {
        &self.args[..]
    }

    pub fn into_args(self) -> Vec<SqlArg> {
        self.args
    }
}

/// Output of [compile].
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// None if nothing constrains the query.
    pub where_sql: Option<String>,
    pub order_sql: String,
    pub args: Vec<SqlArg>,
}

/// Compile a whole query, numbering arguments from 1.
pub fn compile(
    dialect: &dyn Dialect,
    fields: &[Field],
    filters: &[Filter],
    logic: FilterLogic,
    sorts: &[SortSpec],
    search: &str,
) -> CompiledQuery {
    let mut params = Params::new(dialect);
    let where_sql = compile_where(&mut params, fields, filters, logic, search);
    let order_sql = compile_order(&mut params, fields, sorts);
    CompiledQuery {
        where_sql,
        order_sql,
        args: params.into_args(),
    }
}

/// Compile filters and search into a boolean expression.
pub fn compile_where(
    params: &mut Params,
    fields: &[Field],
    filters: &[Filter],
    logic: FilterLogic,
    search: &str,
) -> Option<String> {
    let mut clauses = vec![];
    for filter in filters.iter() {
        let field = match find_field(fields, &filter.field_id) {
            Some(f) => f,
            None => {
                debug!("Dropping filter on unknown field {}", filter.field_id);
                continue;
            }
        };

        match compile_filter(params, field, filter) {
            Some(c) => clauses.push(c),
            None => debug!(
                "Dropping {:?} filter on {}: value {} doesn't apply",
                filter.operator, filter.field_id, filter.value
            ),
        }
    }

    let joiner = match logic {
        FilterLogic::And => " AND ",
        FilterLogic::Or => " OR ",
    };
    let filtered = if clauses.is_empty() {
        None
    } else {
        Some(
            clauses
                .iter()
                .map(|c| format!("({})", c))
                .collect::<Vec<_>>()
                .join(joiner),
        )
    };

    match (filtered, compile_search(params, fields, search)) {
        (None, None) => None,
        (Some(f), None) => Some(f),
        (None, Some(s)) => Some(s),
        (Some(f), Some(s)) => Some(format!("({}) AND ({})", f, s)),
    }
}

/// Compile sorts into an `ORDER BY` list (without the keywords).
///
/// The list always ends with `position` and then `id`, so the order is total even with no sorts or with ties.
pub fn compile_order(params: &mut Params, fields: &[Field], sorts: &[SortSpec]) -> String {
    let dialect = params.dialect();
    let mut keys = vec![];

    for sort in sorts.iter() {
        let field = match find_field(fields, &sort.field_id) {
            Some(f) => f,
            None => {
                debug!("Dropping sort on unknown field {}", sort.field_id);
                continue;
            }
        };

        let path = params.push(json_path(&field.id));
        let expr = if field.field_type.is_numeric() {
            dialect.cell_number(&path)
        } else if field.field_type == FieldType::Checkbox {
            dialect.cell_bool(&path)
        } else {
            dialect.cell_text(&path)
        };
        let direction = match sort.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        keys.push(format!("{} {} NULLS LAST", expr, direction));
    }

    keys.push("position ASC".to_string());
    keys.push("id ASC".to_string());
    keys.join(", ")
}

fn find_field<'f>(fields: &'f [Field], id: &str) -> Option<&'f Field> {
    fields
        .iter()
        .find(|f| f.id == id)
        .filter(|f| is_addressable(&f.id))
}

/// Case-insensitive substring match over every text-like field.
fn compile_search(params: &mut Params, fields: &[Field], search: &str) -> Option<String> {
    let needle = search.trim();
    if needle.is_empty() {
        return None;
    }

    let text_fields = fields
        .iter()
        .filter(|f| f.field_type.is_text_like() && is_addressable(&f.id))
        .collect::<Vec<_>>();
    if text_fields.is_empty() {
        return Some("1 = 0".to_string());
    }

    let dialect = params.dialect();
    let pattern = params.push(format!("%{}%", escape_like(&needle.to_lowercase())));
    let matches = text_fields
        .iter()
        .map(|f| {
            let path = params.push(json_path(&f.id));
            format!("{} LIKE {} ESCAPE '\\'", lowered(dialect, &path), pattern)
        })
        .collect::<Vec<_>>();
    Some(matches.join(" OR "))
}

fn lowered(dialect: &dyn Dialect, path: &str) -> String {
    dialect.lower(&dialect.cell_text(path))
}

/// Escape `LIKE` wildcards; the statement declares `\` as the escape character.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse text as a number, the way numeric filters and sorts read text cells.
///
/// Surrounding whitespace is ignored.  Anything else which isn't a finite float is not a number, so `"555-1234"` is
/// None rather than 555.
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|x| x.is_finite())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// The shape of the comparison an equality filter needs.
enum Comparand {
    Text(String),
    Number(f64),
    Bool(bool),
}

fn comparand(field: &Field, value: &Value) -> Option<Comparand> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Comparand::Bool(*b)),
        Value::Number(_) => as_number(value).map(Comparand::Number),
        Value::String(s) if field.field_type.is_numeric() => match as_number(value) {
            Some(n) => Some(Comparand::Number(n)),
            None => Some(Comparand::Text(s.clone())),
        },
        _ => as_text(value).map(Comparand::Text),
    }
}

/// Compile one filter.  Returns None if the filter should be dropped.
///
/// All validation happens before the first argument is pushed, so a dropped filter never leaves arguments behind.
fn compile_filter(params: &mut Params, field: &Field, filter: &Filter) -> Option<String> {
    use Operator::*;

    let dialect = params.dialect();
    let value = &filter.value;

    let sql = match filter.operator {
        Equals | NotEquals => {
            let negate = filter.operator == NotEquals;
            let comparand = match comparand(field, value) {
                Some(c) => c,
                // Comparing against nothing is an emptiness check.
                None => return Some(emptiness(params, field, !negate)),
            };

            let path = params.push(json_path(&field.id));
            let (expr, arg) = match comparand {
                Comparand::Text(s) => (dialect.cell_text(&path), params.push(s)),
                Comparand::Number(n) => (dialect.cell_number(&path), params.push(n)),
                Comparand::Bool(b) => (dialect.cell_bool(&path), params.push(b as i64)),
            };

            if negate {
                format!("({e} IS NULL OR {e} <> {a})", e = expr, a = arg)
            } else {
                format!("{} = {}", expr, arg)
            }
        }
        Contains | NotContains | StartsWith | EndsWith => {
            let needle = as_text(value).filter(|x| !x.is_empty())?;
            let needle = escape_like(&needle.to_lowercase());
            let pattern = match filter.operator {
                StartsWith => format!("{}%", needle),
                EndsWith => format!("%{}", needle),
                _ => format!("%{}%", needle),
            };

            let path = params.push(json_path(&field.id));
            let expr = lowered(dialect, &path);
            let pattern = params.push(pattern);
            if filter.operator == NotContains {
                format!(
                    "({e} IS NULL OR {e} NOT LIKE {p} ESCAPE '\\')",
                    e = expr,
                    p = pattern
                )
            } else {
                format!("{} LIKE {} ESCAPE '\\'", expr, pattern)
            }
        }
        IsEmpty => emptiness(params, field, true),
        IsNotEmpty => emptiness(params, field, false),
        GreaterThan | GreaterThanOrEqual | LessThan | LessThanOrEqual => {
            let bound = as_number(value)?;
            let cmp = match filter.operator {
                GreaterThan => ">",
                GreaterThanOrEqual => ">=",
                LessThan => "<",
                _ => "<=",
            };

            let path = params.push(json_path(&field.id));
            let expr = dialect.cell_number(&path);
            let arg = params.push(bound);
            format!("{} {} {}", expr, cmp, arg)
        }
        Between => {
            let bounds = value.as_array().filter(|a| a.len() == 2)?;
            match (as_number(&bounds[0]), as_number(&bounds[1])) {
                (Some(lo), Some(hi)) if !field.field_type.is_date() => {
                    let path = params.push(json_path(&field.id));
                    let expr = dialect.cell_number(&path);
                    let lo = params.push(lo);
                    let hi = params.push(hi);
                    format!("{} BETWEEN {} AND {}", expr, lo, hi)
                }
                _ => {
                    // Dates are ISO 8601 strings, which order correctly as text.
                    let lo = bounds[0].as_str()?.to_string();
                    let hi = bounds[1].as_str()?.to_string();
                    let path = params.push(json_path(&field.id));
                    let expr = dialect.cell_text(&path);
                    let lo = params.push(lo);
                    let hi = params.push(hi);
                    format!("{} BETWEEN {} AND {}", expr, lo, hi)
                }
            }
        }
        In | NotIn => {
            let items = match value {
                Value::Array(items) => &items[..],
                other => std::slice::from_ref(other),
            };
            // Numeric cells compare by value, so that 3 and 3.0 are the same.  Candidates which aren't numbers can't
            // equal one.
            let candidates = if field.field_type.is_numeric() {
                items
                    .iter()
                    .filter_map(as_number)
                    .map(SqlArg::Real)
                    .collect::<Vec<_>>()
            } else {
                items
                    .iter()
                    .filter_map(as_text)
                    .map(SqlArg::Text)
                    .collect::<Vec<_>>()
            };

            if candidates.is_empty() {
                return match filter.operator {
                    // Nothing is in the empty set.
                    In => Some("1 = 0".to_string()),
                    _ => None,
                };
            }

            let path = params.push(json_path(&field.id));
            let expr = if field.field_type.is_numeric() {
                dialect.cell_number(&path)
            } else {
                dialect.cell_text(&path)
            };
            let placeholders = candidates
                .into_iter()
                .map(|c| params.push(c))
                .collect::<Vec<_>>()
                .join(", ");
            if filter.operator == In {
                format!("{} IN ({})", expr, placeholders)
            } else {
                format!("({e} IS NULL OR {e} NOT IN ({p}))", e = expr, p = placeholders)
            }
        }
        IsBefore | IsAfter => {
            let when = as_text(value).filter(|x| !x.is_empty())?;
            let cmp = if filter.operator == IsBefore { "<" } else { ">" };
            let path = params.push(json_path(&field.id));
            let expr = dialect.cell_text(&path);
            let arg = params.push(when);
            format!("{} {} {}", expr, cmp, arg)
        }
        IsChecked => {
            let path = params.push(json_path(&field.id));
            format!("{} = 1", dialect.cell_bool(&path))
        }
        IsUnchecked => {
            let path = params.push(json_path(&field.id));
            format!("({e} IS NULL OR {e} = 0)", e = dialect.cell_bool(&path))
        }
    };

    Some(sql)
}

/// NULL, the empty string, and the empty array all count as empty.
fn emptiness(params: &mut Params, field: &Field, empty: bool) -> String {
    let path = params.push(json_path(&field.id));
    let expr = params.dialect().cell_text(&path);
    if empty {
        format!("({e} IS NULL OR {e} = '' OR {e} = '[]')", e = expr)
    } else {
        format!("({e} IS NOT NULL AND {e} <> '' AND {e} <> '[]')", e = expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Renders accessors as pseudo-functions so the tests read easily.
    struct TestDialect;

    impl Dialect for TestDialect {
        fn placeholder(&self, index: usize) -> String {
            format!("?{}", index)
        }

        fn cell_text(&self, path: &str) -> String {
            format!("text({})", path)
        }

        fn cell_number(&self, path: &str) -> String {
            format!("num({})", path)
        }

        fn cell_bool(&self, path: &str) -> String {
            format!("bool({})", path)
        }
    }

    fn fields() -> Vec<Field> {
        vec![
            Field::new("name", "Name", FieldType::SingleLineText),
            Field::new("notes", "Notes", FieldType::LongText),
            Field::new("price", "Price", FieldType::Number),
            Field::new("done", "Done", FieldType::Checkbox),
            Field::new("due", "Due", FieldType::Date),
            Field::new("status", "Status", FieldType::SingleSelect),
        ]
    }

    fn compile_filters(filters: &[Filter], logic: FilterLogic) -> CompiledQuery {
        compile(&TestDialect, &fields(), filters, logic, &[], "")
    }

    fn text(s: &str) -> SqlArg {
        SqlArg::Text(s.to_string())
    }

    #[test]
    fn empty_query() {
        let q = compile(&TestDialect, &fields(), &[], FilterLogic::And, &[], "  ");
        assert_eq!(q.where_sql, None);
        assert_eq!(q.order_sql, "position ASC, id ASC");
        assert!(q.args.is_empty());
    }

    #[test]
    fn numeric_comparison_binds_values() {
        let q = compile_filters(
            &[Filter::new("price", Operator::GreaterThan, 10)],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(num(?1) > ?2)"));
        assert_eq!(q.args, vec![text("$.\"price\""), SqlArg::Real(10.0)]);
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let q = compile_filters(
            &[
                Filter::new("nope", Operator::Equals, "x"),
                Filter::new("name", Operator::Equals, "Bob"),
            ],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(text(?1) = ?2)"));
        assert_eq!(q.args, vec![text("$.\"name\""), text("Bob")]);
    }

    #[test]
    fn or_logic_and_search_combine() {
        let q = compile(
            &TestDialect,
            &fields(),
            &[
                Filter::new("price", Operator::LessThanOrEqual, 5),
                Filter::new("done", Operator::IsChecked, Value::Null),
            ],
            FilterLogic::Or,
            &[],
            "50%",
        );
        assert_eq!(
            q.where_sql.as_deref(),
            Some(
                "((num(?1) <= ?2) OR (bool(?3) = 1)) AND \
                 (LOWER(text(?5)) LIKE ?4 ESCAPE '\\' OR LOWER(text(?6)) LIKE ?4 ESCAPE '\\')"
            )
        );
        assert_eq!(q.args[3], text("%50\\%%"));
        assert_eq!(q.args.len(), 6);
    }

    #[test]
    fn search_without_text_fields_matches_nothing() {
        let q = compile(
            &TestDialect,
            &[Field::new("price", "Price", FieldType::Number)],
            &[],
            FilterLogic::And,
            &[],
            "abc",
        );
        assert_eq!(q.where_sql.as_deref(), Some("1 = 0"));
        assert!(q.args.is_empty());
    }

    #[test]
    fn text_operators_lowercase_both_sides() {
        let q = compile_filters(
            &[
                Filter::new("name", Operator::StartsWith, "AB_"),
                Filter::new("notes", Operator::NotContains, "x"),
            ],
            FilterLogic::And,
        );
        assert_eq!(
            q.where_sql.as_deref(),
            Some(
                "(LOWER(text(?1)) LIKE ?2 ESCAPE '\\') AND \
                 ((LOWER(text(?3)) IS NULL OR LOWER(text(?3)) NOT LIKE ?4 ESCAPE '\\'))"
            )
        );
        assert_eq!(q.args[1], text("ab\\_%"));
        assert_eq!(q.args[3], text("%x%"));
    }

    #[test]
    fn in_lists() {
        let q = compile_filters(
            &[Filter::new("status", Operator::In, json!(["a", "b", 3]))],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(text(?1) IN (?2, ?3, ?4))"));
        assert_eq!(q.args[3], text("3"));

        let q = compile_filters(
            &[Filter::new("status", Operator::In, json!([]))],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(1 = 0)"));
        assert!(q.args.is_empty());

        let q = compile_filters(
            &[Filter::new("status", Operator::NotIn, json!([]))],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql, None);
    }

    #[test]
    fn numeric_in_lists_compare_numbers() {
        let q = compile_filters(
            &[
                Filter::new("price", Operator::In, json!([3, "4.0", "many"])),
                Filter::new("price", Operator::NotIn, json!(["many"])),
            ],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(num(?1) IN (?2, ?3))"));
        assert_eq!(
            q.args,
            vec![text("$.\"price\""), SqlArg::Real(3.0), SqlArg::Real(4.0)]
        );
    }

    #[test]
    fn dialects_may_lower_differently() {
        struct Folding;

        impl Dialect for Folding {
            fn placeholder(&self, index: usize) -> String {
                format!("${}", index)
            }

            fn cell_text(&self, path: &str) -> String {
                format!("text({})", path)
            }

            fn cell_number(&self, path: &str) -> String {
                format!("num({})", path)
            }

            fn cell_bool(&self, path: &str) -> String {
                format!("bool({})", path)
            }

            fn lower(&self, expr: &str) -> String {
                format!("fold({})", expr)
            }
        }

        let q = compile(
            &Folding,
            &fields(),
            &[Filter::new("name", Operator::Contains, "ÉCOLE")],
            FilterLogic::And,
            &[],
            "",
        );
        assert_eq!(
            q.where_sql.as_deref(),
            Some("(fold(text($1)) LIKE $2 ESCAPE '\\')")
        );
        assert_eq!(q.args[1], text("%école%"));
    }

    #[test]
    fn numbers_parse_strictly() {
        assert_eq!(parse_number(" 7 "), Some(7.0));
        assert_eq!(parse_number("1e2"), Some(100.0));
        for junk in ["555-1234", "1.2.3", "--5", "", "inf", "NaN"] {
            assert_eq!(parse_number(junk), None, "{}", junk);
        }
    }

    #[test]
    fn malformed_values_drop_without_leaking_args() {
        let q = compile_filters(
            &[
                Filter::new("price", Operator::Between, json!([1])),
                Filter::new("price", Operator::GreaterThan, "lots"),
                Filter::new("name", Operator::Contains, ""),
                Filter::new("price", Operator::Between, json!([1, "9"])),
            ],
            FilterLogic::And,
        );
        assert_eq!(q.where_sql.as_deref(), Some("(num(?1) BETWEEN ?2 AND ?3)"));
        assert_eq!(
            q.args,
            vec![text("$.\"price\""), SqlArg::Real(1.0), SqlArg::Real(9.0)]
        );
    }

    #[test]
    fn equality_shapes() {
        let q = compile_filters(
            &[
                Filter::new("price", Operator::Equals, "12.5"),
                Filter::new("done", Operator::NotEquals, true),
                Filter::new("name", Operator::Equals, Value::Null),
            ],
            FilterLogic::And,
        );
        assert_eq!(
            q.where_sql.as_deref(),
            Some(
                "(num(?1) = ?2) AND ((bool(?3) IS NULL OR bool(?3) <> ?4)) AND \
                 ((text(?5) IS NULL OR text(?5) = '' OR text(?5) = '[]'))"
            )
        );
        assert_eq!(q.args[1], SqlArg::Real(12.5));
        assert_eq!(q.args[3], SqlArg::Int(1));
    }

    #[test]
    fn dates_compare_as_text() {
        let q = compile_filters(
            &[
                Filter::new("due", Operator::IsBefore, "2024-06-01"),
                Filter::new("due", Operator::Between, json!(["2024-01-01", "2024-12-31"])),
            ],
            FilterLogic::And,
        );
        assert_eq!(
            q.where_sql.as_deref(),
            Some("(text(?1) < ?2) AND (text(?3) BETWEEN ?4 AND ?5)")
        );
    }

    #[test]
    fn sorts_in_order_with_tiebreakers() {
        let q = compile(
            &TestDialect,
            &fields(),
            &[],
            FilterLogic::And,
            &[
                SortSpec::desc("price"),
                SortSpec::asc("missing"),
                SortSpec::asc("name"),
            ],
            "",
        );
        assert_eq!(
            q.order_sql,
            "num(?1) DESC NULLS LAST, text(?2) ASC NULLS LAST, position ASC, id ASC"
        );
        assert_eq!(q.args, vec![text("$.\"price\""), text("$.\"name\"")]);
    }

    #[test]
    fn unaddressable_field_ids_are_dropped() {
        let fields = vec![Field::new("bad\"id", "Bad", FieldType::SingleLineText)];
        let q = compile(
            &TestDialect,
            &fields,
            &[Filter::new("bad\"id", Operator::IsEmpty, Value::Null)],
            FilterLogic::And,
            &[SortSpec::asc("bad\"id")],
            "x",
        );
        assert_eq!(q.where_sql.as_deref(), Some("1 = 0"));
        assert!(q.args.is_empty());
    }

    #[test]
    fn filters_deserialize() {
        let filters: Vec<Filter> = serde_json::from_value(json!([
            {"field_id": "f1", "operator": "greater_than", "value": 10},
            {"field_id": "f2", "operator": "in", "value": ["a"]},
            {"field_id": "f3", "operator": "is_empty"},
        ]))
        .unwrap();
        assert_eq!(filters[0].operator, Operator::GreaterThan);
        assert_eq!(filters[1].operator, Operator::In);
        assert_eq!(filters[2].value, Value::Null);

        let sort: SortSpec = serde_json::from_value(json!({"field_id": "f1"})).unwrap();
        assert_eq!(sort.direction, SortDirection::Asc);
    }
}
