// System query options and their application to an entity collection.

use super::evaluator::{compare_operands, DataProvider, ExpressionEvaluator, QueryContext};
use super::expression::{Expression, OrderByItem, SortDirection};
use super::operand::TypedOperand;
use super::parser::{parse_filter, parse_orderby};
use crate::data::Entity;
use crate::edm::EdmModel;
use crate::error::{ODataError, ODataResult};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use std::cmp::Ordering;
use tracing::debug;

/// Decoded query string of a resource request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriInfo {
    filter: Option<String>,
    orderby: Option<String>,
    top: Option<usize>,
    skip: Option<usize>,
    count: bool,
    aliases: IndexMap<String, String>,
}

fn decode(text: &str) -> ODataResult<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ODataError::bad_request(format!("Query string is not valid UTF-8: {}", text)))
}

fn parse_count(value: &str) -> ODataResult<usize> {
    value
        .parse()
        .map_err(|_| ODataError::bad_request(format!("'{}' is not a non-negative integer", value)))
}

impl UriInfo {
    /// Parse a raw query string, with or without the leading `?`.
    ///
    /// Values are percent-decoded; `+` is kept literally. Custom query
    /// options and unsupported system options are ignored.
    pub fn from_query(query: &str) -> ODataResult<Self> {
        let mut info = UriInfo::default();
        let query = query.strip_prefix('?').unwrap_or(query);

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode(raw_key)?;
            let value = decode(raw_value)?;

            let slot = match key.as_str() {
                "$filter" => &mut info.filter,
                "$orderby" => &mut info.orderby,
                "$top" => {
                    info.top = Some(parse_count(&value)?);
                    continue;
                }
                "$skip" => {
                    info.skip = Some(parse_count(&value)?);
                    continue;
                }
                "$count" => {
                    info.count = match value.as_str() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(ODataError::bad_request(format!(
                                "Invalid $count value '{}'",
                                other
                            )))
                        }
                    };
                    continue;
                }
                k if k.starts_with('@') => {
                    info.aliases.insert(k[1..].to_string(), value);
                    continue;
                }
                other => {
                    debug!(option = other, "ignoring query option");
                    continue;
                }
            };
            if slot.is_some() {
                return Err(ODataError::bad_request(format!(
                    "Query option {} is specified more than once",
                    key
                )));
            }
            *slot = Some(value);
        }
        Ok(info)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_orderby(mut self, orderby: impl Into<String>) -> Self {
        self.orderby = Some(orderby.into());
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }

    /// Register `@name=value`; `name` is given without the `@`.
    pub fn with_alias(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.aliases.insert(name.into(), value.into());
        self
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn orderby(&self) -> Option<&str> {
        self.orderby.as_deref()
    }

    pub fn top(&self) -> Option<usize> {
        self.top
    }

    pub fn skip(&self) -> Option<usize> {
        self.skip
    }

    pub fn count(&self) -> bool {
        self.count
    }
}

/// Parsed `$filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOption {
    pub expression: Expression,
}

impl FilterOption {
    pub fn parse(text: &str) -> ODataResult<Self> {
        Ok(Self {
            expression: parse_filter(text)?,
        })
    }

    /// Keep the entities the predicate holds for. The first failing
    /// evaluation fails the whole read.
    pub fn apply(&self, entities: Vec<Entity>, ctx: QueryContext<'_>) -> ODataResult<Vec<Entity>> {
        let mut kept = Vec::with_capacity(entities.len());
        for entity in entities {
            if ExpressionEvaluator::for_entity(&entity, ctx).evaluate_filter(&self.expression)? {
                kept.push(entity);
            }
        }
        Ok(kept)
    }
}

/// Parsed `$orderby`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByOption {
    pub items: Vec<OrderByItem>,
}

impl OrderByOption {
    pub fn parse(text: &str) -> ODataResult<Self> {
        Ok(Self {
            items: parse_orderby(text)?,
        })
    }

    /// Stable sort by the order keys; nulls sort first when ascending.
    pub fn apply(&self, entities: Vec<Entity>, ctx: QueryContext<'_>) -> ODataResult<Vec<Entity>> {
        let mut keyed = Vec::with_capacity(entities.len());
        for entity in entities {
            let evaluator = ExpressionEvaluator::for_entity(&entity, ctx);
            let keys = self
                .items
                .iter()
                .map(|item| evaluator.evaluate(&item.expression))
                .collect::<ODataResult<Vec<_>>>()?;
            keyed.push((keys, entity));
        }

        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            for (item, (ka, kb)) in self.items.iter().zip(a.iter().zip(b)) {
                let ordering = match compare_keys(ka, kb) {
                    Ok(ordering) => ordering,
                    Err(err) => {
                        failure.get_or_insert(err);
                        return Ordering::Equal;
                    }
                };
                let ordering = match item.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(keyed.into_iter().map(|(_, entity)| entity).collect()),
        }
    }
}

fn compare_keys(a: &TypedOperand, b: &TypedOperand) -> ODataResult<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => return Ok(Ordering::Less),
        (false, true) => return Ok(Ordering::Greater),
        (false, false) => {}
    }
    let a = a.cast_to_common_type(b)?;
    let b = b.cast_to_common_type(&a)?;
    Ok(compare_operands(&a, &b)?.unwrap_or(Ordering::Equal))
}

/// Outcome of a collection read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub entities: Vec<Entity>,
    /// Filtered size before paging, when `$count=true`.
    pub count: Option<usize>,
}

/// Apply `$filter`, `$count`, `$orderby`, `$skip` and `$top` in that order.
pub fn apply_query_options(
    entities: Vec<Entity>,
    uri_info: &UriInfo,
    edm: &EdmModel,
    provider: Option<&dyn DataProvider>,
) -> ODataResult<QueryResult> {
    let mut ctx = QueryContext::new(uri_info, edm);
    if let Some(provider) = provider {
        ctx = ctx.with_provider(provider);
    }

    let total = entities.len();
    let mut entities = match uri_info.filter() {
        Some(text) => FilterOption::parse(text)?.apply(entities, ctx)?,
        None => entities,
    };
    let count = uri_info.count().then_some(entities.len());

    if let Some(text) = uri_info.orderby() {
        entities = OrderByOption::parse(text)?.apply(entities, ctx)?;
    }
    let entities: Vec<Entity> = entities
        .into_iter()
        .skip(uri_info.skip().unwrap_or(0))
        .take(uri_info.top().unwrap_or(usize::MAX))
        .collect();

    debug!(total, matched = ?count, returned = entities.len(), "applied query options");
    Ok(QueryResult { entities, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PropertyValue;
    use crate::edm::{EdmPrimitiveKind, EdmProperty, EdmStructuredType, TypeRegistry};
    use std::sync::Arc;

    fn model() -> EdmModel {
        EdmModel::new("Demo", Arc::new(TypeRegistry::standard())).with_entity_type(
            EdmStructuredType::new("Person")
                .key("ID")
                .property(EdmProperty::primitive("ID", EdmPrimitiveKind::Int32))
                .property(EdmProperty::primitive("Name", EdmPrimitiveKind::String))
                .property(EdmProperty::primitive("Age", EdmPrimitiveKind::Int32)),
        )
    }

    fn people() -> Vec<Entity> {
        vec![
            Entity::new("Demo.Person").with("ID", 1).with("Name", "Carol").with("Age", 41),
            Entity::new("Demo.Person").with("ID", 2).with("Name", "Alice").with("Age", PropertyValue::null()),
            Entity::new("Demo.Person").with("ID", 3).with("Name", "Bob").with("Age", 29),
            Entity::new("Demo.Person").with("ID", 4).with("Name", "Dave").with("Age", 29),
        ]
    }

    fn ids(entities: &[Entity]) -> Vec<i32> {
        entities
            .iter()
            .filter_map(|e| match e.property("ID") {
                Some(PropertyValue::Primitive(crate::edm::PrimitiveValue::Int32(id))) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_from_query_decodes_values() {
        let info = UriInfo::from_query("?$filter=Name%20eq%20'a+b'&$top=2&$skip=1&$count=true&@p=5&x=y")
            .unwrap();
        assert_eq!(info.filter(), Some("Name eq 'a+b'"));
        assert_eq!(info.top(), Some(2));
        assert_eq!(info.skip(), Some(1));
        assert!(info.count());
        assert_eq!(info.alias("p"), Some("5"));
        assert_eq!(info.alias("x"), None);
    }

    #[test]
    fn test_from_query_rejects_bad_values() {
        assert!(UriInfo::from_query("$top=-1").is_err());
        assert!(UriInfo::from_query("$count=yes").is_err());
        assert!(UriInfo::from_query("$filter=a&$filter=b").is_err());
        assert!(UriInfo::from_query("$filter=%FF").is_err());
        assert_eq!(UriInfo::from_query("").unwrap(), UriInfo::default());
    }

    #[test]
    fn test_filter_count_and_paging() {
        let edm = model();
        let info = UriInfo::default()
            .with_filter("Age ge 29")
            .with_orderby("Name")
            .with_count(true)
            .with_skip(1)
            .with_top(1);
        let result = apply_query_options(people(), &info, &edm, None).unwrap();
        assert_eq!(result.count, Some(3));
        assert_eq!(ids(&result.entities), vec![1]);
    }

    #[test]
    fn test_orderby_nulls_first_and_stable() {
        let edm = model();
        let info = UriInfo::default().with_orderby("Age");
        let result = apply_query_options(people(), &info, &edm, None).unwrap();
        assert_eq!(ids(&result.entities), vec![2, 3, 4, 1]);
        assert_eq!(result.count, None);

        let info = UriInfo::default().with_orderby("Age desc,Name desc");
        let result = apply_query_options(people(), &info, &edm, None).unwrap();
        assert_eq!(ids(&result.entities), vec![1, 4, 3, 2]);
    }

    #[test]
    fn test_filter_error_fails_read() {
        let edm = model();
        let info = UriInfo::default().with_filter("Name add 1 eq 2");
        let err = apply_query_options(people(), &info, &edm, None).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let info = UriInfo::default().with_filter("Name eq");
        assert!(apply_query_options(people(), &info, &edm, None).is_err());
    }

    #[test]
    fn test_orderby_error_fails_read() {
        let edm = model();
        let info = UriInfo::default().with_orderby("Name mul 2");
        assert!(apply_query_options(people(), &info, &edm, None).is_err());
    }
}
