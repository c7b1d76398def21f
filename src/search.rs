//! Search Compiler: lowers a [`SearchRequest`] into one parameterized SQL
//! statement over the EAV tables, joining `property_values` once per
//! distinct property the request touches.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::{Database, OtherHasher};
use crate::datatype::{Comparison, PropertyType};
use crate::error::{CrmockError, Result};
use crate::filter::{ExpandNode, Expr};
use crate::page::{self, Page};
use crate::property::PropertyRules;
use crate::record::{self, Projection, Record};
use crate::registry::ObjectType;

pub const MAX_FILTER_GROUPS: usize = 5;
pub const MAX_FILTERS_PER_GROUP: usize = 6;
pub const MAX_SORTS: usize = 1;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 200;
/// No result past this position is ever reachable through paging.
pub const MAX_SEARCH_RESULTS: usize = 10_000;

const ASSOCIATIONS_PREFIX: &str = "associations.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
    NotIn,
    HasProperty,
    NotHasProperty,
    ContainsToken,
    NotContainsToken,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::HasProperty => "HAS_PROPERTY",
            Self::NotHasProperty => "NOT_HAS_PROPERTY",
            Self::ContainsToken => "CONTAINS_TOKEN",
            Self::NotContainsToken => "NOT_CONTAINS_TOKEN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CrmockError;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "EQ" => Self::Eq,
            "NEQ" => Self::Neq,
            "LT" => Self::Lt,
            "LTE" => Self::Lte,
            "GT" => Self::Gt,
            "GTE" => Self::Gte,
            "BETWEEN" => Self::Between,
            "IN" => Self::In,
            "NOT_IN" => Self::NotIn,
            "HAS_PROPERTY" => Self::HasProperty,
            "NOT_HAS_PROPERTY" => Self::NotHasProperty,
            "CONTAINS_TOKEN" => Self::ContainsToken,
            "NOT_CONTAINS_TOKEN" => Self::NotContainsToken,
            other => {
                return Err(CrmockError::validation(format!(
                    "unsupported filter operator '{other}'"
                )));
            }
        })
    }
}

/// The operator stays a literal until compilation, so that an unknown one
/// is reported as a validation error rather than a decoding failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(property_name: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            operator: operator.into(),
            ..Self::default()
        }
    }
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
    pub fn with_range(mut self, low: impl Into<String>, high: impl Into<String>) -> Self {
        self.value = Some(low.into());
        self.high_value = Some(high.into());
        self
    }
    pub fn with_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub property_name: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filter_groups: Vec<FilterGroup>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn filter_group(mut self, filters: Vec<Filter>) -> Self {
        self.filter_groups.push(FilterGroup { filters });
        self
    }
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
    pub fn sort(mut self, property_name: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(Sort {
            property_name: property_name.into(),
            direction,
        });
        self
    }
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = names.into_iter().map(Into::into).collect();
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    #[serde(flatten)]
    pub page: Page<Record>,
}

impl SearchResponse {
    pub fn results(&self) -> &[Record] {
        &self.page.results
    }
    pub fn next_cursor(&self) -> Option<&str> {
        self.page.next_cursor()
    }
}

/// The statements a request compiles to. Every caller-supplied value is in
/// `params`, never in the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSearch {
    pub sql: String,
    pub count_sql: String,
    pub params: Vec<Value>,
    pub joins: usize,
    pub limit: usize,
    pub offset: usize,
}

impl CompiledSearch {
    /// `params` followed by the bindings of `LIMIT ? OFFSET ?`.
    pub fn page_params(&self) -> Vec<Value> {
        let mut params = self.params.clone();
        params.push(Value::Integer(self.limit as i64));
        params.push(Value::Integer(self.offset as i64));
        params
    }
}

// ------------- Compilation -------------

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Compare {
        alias: usize,
        comparison: Comparison,
        op: &'static str,
        value: Value,
    },
    Present {
        alias: usize,
        present: bool,
    },
    Within {
        alias: usize,
        comparison: Comparison,
        values: Vec<Value>,
    },
    Like {
        alias: usize,
        pattern: String,
    },
    AssociatedWith {
        object_type_id: String,
        ids: Vec<i64>,
    },
    Nothing,
}

fn column(alias: usize, comparison: Comparison) -> String {
    match comparison {
        Comparison::Numeric => format!("CAST(pv{alias}.value AS REAL)"),
        Comparison::Temporal => format!("pv{alias}.value"),
        Comparison::Text => format!("pv{alias}.value COLLATE NOCASE"),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn render_predicate(predicate: &Predicate, out: &mut String, params: &mut Vec<Value>) -> Result<()> {
    match predicate {
        Predicate::Compare {
            alias,
            comparison,
            op,
            value,
        } => {
            out.push_str(&format!("{} {op} ?", column(*alias, *comparison)));
            params.push(value.clone());
        }
        Predicate::Present { alias, present } => {
            let test = if *present { "IS NOT NULL" } else { "IS NULL" };
            out.push_str(&format!("pv{alias}.value {test}"));
        }
        Predicate::Within {
            alias,
            comparison,
            values,
        } => {
            out.push_str(&format!(
                "{} IN ({})",
                column(*alias, *comparison),
                placeholders(values.len())
            ));
            params.extend(values.iter().cloned());
        }
        Predicate::Like { alias, pattern } => {
            out.push_str(&format!("pv{alias}.value LIKE ? ESCAPE '\\'"));
            params.push(Value::Text(pattern.clone()));
        }
        Predicate::AssociatedWith {
            object_type_id,
            ids,
        } => {
            out.push_str(&format!(
                "EXISTS (SELECT 1 FROM associations a JOIN objects t ON t.id = a.to_object_id \
                 WHERE a.from_object_id = o.id AND t.object_type_id = ? AND t.archived = 0 \
                 AND a.to_object_id IN ({}))",
                placeholders(ids.len())
            ));
            params.push(Value::Text(object_type_id.clone()));
            params.extend(ids.iter().map(|id| Value::Integer(*id)));
        }
        Predicate::Nothing => out.push('0'),
    }
    Ok(())
}

/// `*` anchors the pattern and matches anything; without it the token may
/// appear anywhere. LIKE metacharacters in the token match literally.
fn like_pattern(token: &str) -> String {
    let mut pattern = String::with_capacity(token.len() + 2);
    for c in token.chars() {
        match c {
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push('%'),
            c => pattern.push(c),
        }
    }
    if token.contains('*') {
        pattern
    } else {
        format!("%{pattern}%")
    }
}

fn bind(rules: &PropertyRules, property: &str, raw: &str) -> Result<(Comparison, Value)> {
    let Some(property_type) = rules.property_type(property) else {
        return Ok((Comparison::Text, Value::Text(raw.to_string())));
    };
    let invalid = || {
        CrmockError::validation(format!(
            "'{raw}' is not a valid {property_type} value for {property}"
        ))
    };
    match property_type {
        PropertyType::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| (Comparison::Numeric, Value::Real(n)))
            .ok_or_else(invalid),
        PropertyType::Date | PropertyType::Datetime | PropertyType::Bool => property_type
            .normalize(raw)
            .map(|v| (property_type.comparison(), Value::Text(v)))
            .ok_or_else(invalid),
        PropertyType::String | PropertyType::Enumeration => {
            Ok((Comparison::Text, Value::Text(raw.to_string())))
        }
    }
}

struct Compiler<'a> {
    rules: &'a PropertyRules,
    targets: &'a HashMap<String, String, OtherHasher>,
    joins: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn alias(&mut self, property: &str) -> usize {
        match self.joins.iter().position(|p| p == property) {
            Some(alias) => alias,
            None => {
                self.joins.push(property.to_string());
                self.joins.len() - 1
            }
        }
    }

    fn filter(&mut self, filter: &Filter) -> Result<Expr<Predicate>> {
        let operator: Operator = filter.operator.parse()?;
        if let Some(target) = filter.property_name.strip_prefix(ASSOCIATIONS_PREFIX) {
            return self.association_filter(target, operator, filter);
        }
        let property = filter.property_name.as_str();
        let value = || {
            filter.value.as_deref().ok_or_else(|| {
                CrmockError::validation(format!("{operator} on {property} needs a value"))
            })
        };
        let alias = self.alias(property);
        let rules = self.rules;
        let compare = |op: &'static str, raw: &str| -> Result<Expr<Predicate>> {
            let (comparison, value) = bind(rules, property, raw)?;
            Ok(Expr::val(Predicate::Compare {
                alias,
                comparison,
                op,
                value,
            }))
        };
        let missing = || Expr::val(Predicate::Present { alias, present: false });
        Ok(match operator {
            Operator::Eq => compare("=", value()?)?,
            Operator::Neq => Expr::or(missing(), Expr::is_not(compare("=", value()?)?)),
            Operator::Lt => compare("<", value()?)?,
            Operator::Lte => compare("<=", value()?)?,
            Operator::Gt => compare(">", value()?)?,
            Operator::Gte => compare(">=", value()?)?,
            Operator::Between => {
                let high = filter.high_value.as_deref().ok_or_else(|| {
                    CrmockError::validation(format!("BETWEEN on {property} needs a highValue"))
                })?;
                Expr::and(compare(">=", value()?)?, compare("<=", high)?)
            }
            Operator::In | Operator::NotIn => {
                if filter.values.is_empty() {
                    return Err(CrmockError::validation(format!(
                        "{operator} on {property} needs at least one value"
                    )));
                }
                let mut comparison = Comparison::Text;
                let mut values = Vec::with_capacity(filter.values.len());
                for raw in &filter.values {
                    let (c, v) = bind(rules, property, raw)?;
                    comparison = c;
                    values.push(v);
                }
                let within = Expr::val(Predicate::Within {
                    alias,
                    comparison,
                    values,
                });
                if operator == Operator::In {
                    within
                } else {
                    Expr::or(missing(), Expr::is_not(within))
                }
            }
            Operator::HasProperty => Expr::val(Predicate::Present {
                alias,
                present: true,
            }),
            Operator::NotHasProperty => missing(),
            Operator::ContainsToken | Operator::NotContainsToken => {
                let like = Expr::val(Predicate::Like {
                    alias,
                    pattern: like_pattern(value()?),
                });
                if operator == Operator::ContainsToken {
                    like
                } else {
                    Expr::or(missing(), Expr::is_not(like))
                }
            }
        })
    }

    fn association_filter(
        &mut self,
        target: &str,
        operator: Operator,
        filter: &Filter,
    ) -> Result<Expr<Predicate>> {
        let object_type_id = self
            .targets
            .get(target)
            .cloned()
            .ok_or_else(|| CrmockError::validation(format!("unknown association target '{target}'")))?;
        let raw: Vec<&str> = match operator {
            Operator::Eq => filter.value.as_deref().into_iter().collect(),
            Operator::In => filter.values.iter().map(String::as_str).collect(),
            other => {
                return Err(CrmockError::validation(format!(
                    "{other} is not supported on {}",
                    filter.property_name
                )));
            }
        };
        if raw.is_empty() {
            return Err(CrmockError::validation(format!(
                "{operator} on {} needs a value",
                filter.property_name
            )));
        }
        let ids = raw
            .into_iter()
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| CrmockError::validation(format!("'{v}' is not a record id")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::val(Predicate::AssociatedWith { object_type_id, ids }))
    }
}

fn check_shape(request: &SearchRequest) -> Result<()> {
    if request.filter_groups.len() > MAX_FILTER_GROUPS {
        return Err(CrmockError::validation(format!(
            "at most {MAX_FILTER_GROUPS} filter groups are allowed, got {}",
            request.filter_groups.len()
        )));
    }
    for group in &request.filter_groups {
        if group.filters.is_empty() {
            return Err(CrmockError::validation("filter groups must not be empty"));
        }
        if group.filters.len() > MAX_FILTERS_PER_GROUP {
            return Err(CrmockError::validation(format!(
                "at most {MAX_FILTERS_PER_GROUP} filters per group are allowed, got {}",
                group.filters.len()
            )));
        }
    }
    if request.sorts.len() > MAX_SORTS {
        return Err(CrmockError::validation(format!(
            "at most {MAX_SORTS} sort is allowed, got {}",
            request.sorts.len()
        )));
    }
    Ok(())
}

pub(crate) fn compile(
    object_type: &ObjectType,
    rules: &PropertyRules,
    targets: &HashMap<String, String, OtherHasher>,
    request: &SearchRequest,
) -> Result<CompiledSearch> {
    check_shape(request)?;
    let limit = page::check_limit(request.limit, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT)?;
    let offset = page::decode_offset(request.after.as_deref())?;
    if offset + limit > MAX_SEARCH_RESULTS {
        return Err(CrmockError::validation(format!(
            "offset {offset} with limit {limit} reaches past the first {MAX_SEARCH_RESULTS} results"
        )));
    }

    let mut compiler = Compiler {
        rules,
        targets,
        joins: Vec::new(),
    };
    let mut groups = Vec::with_capacity(request.filter_groups.len());
    for group in &request.filter_groups {
        let and = group
            .filters
            .iter()
            .expand(|f| compiler.filter(f), Expr::and)?;
        groups.extend(and);
    }
    let groups = groups.into_iter().expand::<Predicate, CrmockError>(Ok, Expr::or)?;

    let query = match request.query.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => {
            let pattern = like_pattern(text);
            let searchable: Vec<&str> = if object_type.searchable_properties.is_empty() {
                object_type.primary_display_property.as_deref().into_iter().collect()
            } else {
                object_type.searchable_properties.iter().map(String::as_str).collect()
            };
            let any = searchable.into_iter().expand::<Predicate, CrmockError>(
                |p| {
                    Ok(Expr::val(Predicate::Like {
                        alias: compiler.alias(p),
                        pattern: pattern.clone(),
                    }))
                },
                Expr::or,
            )?;
            Some(any.unwrap_or(Expr::val(Predicate::Nothing)))
        }
        _ => None,
    };

    let order = match request.sorts.first() {
        Some(sort) => {
            let alias = compiler.alias(&sort.property_name);
            let direction = match sort.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            format!(
                "ORDER BY (pv{alias}.value IS NULL), {} {direction}, o.id ASC",
                column(alias, rules.comparison(&sort.property_name))
            )
        }
        None => "ORDER BY o.id ASC".to_string(),
    };

    let mut params: Vec<Value> = Vec::new();
    let mut from = String::from("FROM objects o");
    for (alias, property) in compiler.joins.iter().enumerate() {
        from.push_str(&format!(
            " LEFT JOIN property_values pv{alias} ON pv{alias}.object_id = o.id AND pv{alias}.property_name = ?"
        ));
        params.push(Value::Text(property.clone()));
    }
    let mut filter = String::from("WHERE o.object_type_id = ? AND o.archived = 0");
    params.push(Value::Text(object_type.id.clone()));
    for expr in [groups, query].into_iter().flatten() {
        filter.push_str(" AND ");
        expr.render(&mut filter, &mut |p, out| render_predicate(p, out, &mut params))?;
    }

    Ok(CompiledSearch {
        sql: format!("SELECT o.id {from} {filter} {order} LIMIT ? OFFSET ?"),
        count_sql: format!("SELECT COUNT(*) {from} {filter}"),
        params,
        joins: compiler.joins.len(),
        limit,
        offset,
    })
}

// ------------- Execution -------------

/// Without an explicit projection a search returns the type's display and
/// searchable properties on top of the system defaults.
fn search_properties(object_type: &ObjectType, request: &SearchRequest) -> Vec<String> {
    if !request.properties.is_empty() {
        return request.properties.clone();
    }
    let mut names: Vec<String> = object_type.primary_display_property.iter().cloned().collect();
    for name in &object_type.searchable_properties {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

pub struct SearchCompiler<'db> {
    database: &'db Database,
}

impl<'db> SearchCompiler<'db> {
    pub fn new(database: &'db Database) -> Self {
        Self { database }
    }

    /// Target types named by `associations.{type}` filters, resolved up front.
    fn association_targets(
        &self,
        request: &SearchRequest,
    ) -> Result<HashMap<String, String, OtherHasher>> {
        let keeper = self.database.type_keeper();
        let keeper = keeper.lock()?;
        let mut targets = HashMap::default();
        for filter in request.filter_groups.iter().flat_map(|g| g.filters.iter()) {
            if let Some(target) = filter.property_name.strip_prefix(ASSOCIATIONS_PREFIX) {
                if let Some(object_type) = keeper.resolve_singular(target) {
                    targets.insert(target.to_string(), object_type.id.clone());
                }
            }
        }
        Ok(targets)
    }

    pub fn compile(&self, object_type: &str, request: &SearchRequest) -> Result<CompiledSearch> {
        let ty = self.database.resolve(object_type)?;
        let targets = self.association_targets(request)?;
        self.database.read(|conn| {
            let rules = PropertyRules::load(conn, &ty.id)?;
            compile(&ty, &rules, &targets, request)
        })
    }

    pub fn execute(&self, object_type: &str, request: &SearchRequest) -> Result<SearchResponse> {
        let ty = self.database.resolve(object_type)?;
        let targets = self.association_targets(request)?;
        self.database.read(|conn| {
            let rules = PropertyRules::load(conn, &ty.id)?;
            let compiled = compile(&ty, &rules, &targets, request)?;
            debug!(object_type = %ty.name, joins = compiled.joins, offset = compiled.offset, "search compiled");
            let total: i64 = conn.query_row(
                &compiled.count_sql,
                params_from_iter(compiled.params.iter()),
                |r| r.get(0),
            )?;
            let ids = conn
                .prepare(&compiled.sql)?
                .query_map(params_from_iter(compiled.page_params()), |r| r.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let rows = record::load_rows(conn, &ids)?;
            let projection = Projection::new(&search_properties(&ty, request), &[]);
            let results = record::load_records(conn, rows, &projection)?;
            let total = total.max(0) as usize;
            let end = compiled.offset + results.len();
            let next = (end < total && end < MAX_SEARCH_RESULTS).then(|| page::encode(end));
            Ok(SearchResponse {
                total,
                page: Page::new(results, next),
            })
        })
    }
}
