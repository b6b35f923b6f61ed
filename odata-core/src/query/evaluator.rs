// Expression evaluator
// Walks a parsed expression against an entity, a complex value or a single
// collection element and produces a typed operand.

use super::expression::{
    BinaryOperator, Expression, Lambda, MemberPath, MemberSegment, MethodKind, UnaryOperator,
};
use super::methods;
use super::operand::{type_pair, Operand, OperandType, TypedOperand};
use super::options::UriInfo;
use crate::data::{ComplexValue, Entity, Property, PropertyValue};
use crate::edm::{
    EdmFunction, EdmModel, EdmPrimitiveKind, EdmProperty, EdmStructuredType, EdmTypeRef,
    PrimitiveValue,
};
use crate::error::{ODataError, ODataResult};
use bigdecimal::BigDecimal;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Executes bound functions referenced from member paths.
pub trait DataProvider: Send + Sync {
    fn call_function(
        &self,
        function: &EdmFunction,
        binding: &Entity,
        parameters: &[(String, TypedOperand)],
    ) -> ODataResult<PropertyValue>;
}

/// Everything an evaluation needs besides the value under test.
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    pub uri_info: &'a UriInfo,
    pub edm: &'a EdmModel,
    pub provider: Option<&'a dyn DataProvider>,
}

impl<'a> QueryContext<'a> {
    pub fn new(uri_info: &'a UriInfo, edm: &'a EdmModel) -> Self {
        Self {
            uri_info,
            edm,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn DataProvider) -> Self {
        self.provider = Some(provider);
        self
    }
}

impl fmt::Debug for QueryContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("uri_info", self.uri_info)
            .field("namespace", &self.edm.namespace())
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Scope<'a> {
    Entity(&'a Entity),
    Complex {
        value: &'a ComplexValue,
        ty: Option<Arc<EdmStructuredType>>,
    },
    Element {
        value: &'a PropertyValue,
        property: Option<Arc<EdmProperty>>,
    },
}

/// Position reached while walking a member path.
#[derive(Debug)]
enum Cursor<'a> {
    Structured {
        properties: &'a [Property],
        ty: Option<Arc<EdmStructuredType>>,
        entity: Option<&'a Entity>,
    },
    Value {
        value: &'a PropertyValue,
        property: Option<Arc<EdmProperty>>,
    },
    Null {
        property: Option<Arc<EdmProperty>>,
    },
}

#[derive(Debug)]
pub struct ExpressionEvaluator<'a> {
    scope: Scope<'a>,
    ctx: QueryContext<'a>,
    lambdas: Vec<(String, Scope<'a>)>,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn for_entity(entity: &'a Entity, ctx: QueryContext<'a>) -> Self {
        Self {
            scope: Scope::Entity(entity),
            ctx,
            lambdas: Vec::new(),
        }
    }

    pub fn for_complex(value: &'a ComplexValue, ctx: QueryContext<'a>) -> Self {
        let ty = value
            .type_name
            .as_deref()
            .and_then(|name| ctx.edm.complex_type(name))
            .cloned();
        Self {
            scope: Scope::Complex { value, ty },
            ctx,
            lambdas: Vec::new(),
        }
    }

    /// Fresh evaluator for one lambda element, sharing root and bindings.
    fn nested(&self, variable: &str, element: Scope<'a>) -> Self {
        let mut lambdas = self.lambdas.clone();
        lambdas.push((variable.to_string(), element));
        Self {
            scope: self.scope.clone(),
            ctx: self.ctx,
            lambdas,
        }
    }

    pub fn evaluate(&self, expr: &Expression) -> ODataResult<TypedOperand> {
        self.visit(expr)?.into_typed()
    }

    /// Evaluate a `$filter` predicate; a null result does not match.
    pub fn evaluate_filter(&self, expr: &Expression) -> ODataResult<bool> {
        let result = self.evaluate(expr)?;
        if !result.is(EdmPrimitiveKind::Boolean) {
            return Err(ODataError::bad_request(format!(
                "The filter expression must be of type Edm.Boolean, found {}",
                result.ty()
            )));
        }
        Ok(result.value().as_bool().unwrap_or(false))
    }

    fn visit(&self, expr: &Expression) -> ODataResult<Operand> {
        match expr {
            Expression::Binary { op, left, right } => {
                let left = self.visit(left)?;
                let right = self.visit(right)?;
                binary(*op, left, right).map(Operand::Typed)
            }
            Expression::Unary { op, operand } => {
                let operand = self.visit(operand)?.into_typed()?;
                unary(*op, &operand).map(Operand::Typed)
            }
            Expression::MethodCall { method, args } => self.method_call(*method, args).map(Operand::Typed),
            Expression::Member(path) => self.member(path).map(Operand::Typed),
            Expression::Literal(text) => Ok(Operand::untyped(text.as_str())),
            Expression::Alias(name) => self.alias(name),
            Expression::Enum { type_name, members } => self.enum_literal(type_name, members).map(Operand::Typed),
            Expression::TypeLiteral(name) => Err(ODataError::not_implemented(format!(
                "Type literal '{}' is not supported in this position",
                name
            ))),
            Expression::LambdaReference(name) => Err(ODataError::not_implemented(format!(
                "Reference '{}' is not supported",
                name
            ))),
        }
    }

    fn method_call(&self, method: MethodKind, args: &[Expression]) -> ODataResult<TypedOperand> {
        if matches!(method, MethodKind::Cast | MethodKind::IsOf) {
            return self.cast_or_isof(method, args);
        }
        let operands = args
            .iter()
            .map(|arg| self.visit(arg)?.into_typed())
            .collect::<ODataResult<Vec<_>>>()?;
        methods::invoke(method, &operands)
    }

    fn cast_or_isof(&self, method: MethodKind, args: &[Expression]) -> ODataResult<TypedOperand> {
        let (subject, target) = match args {
            [Expression::TypeLiteral(target)] => (None, target),
            [subject, Expression::TypeLiteral(target)] => (Some(subject), target),
            _ => {
                return Err(ODataError::bad_request(format!(
                    "{} expects a type name as its last argument",
                    method
                )))
            }
        };
        let ty = self
            .ctx
            .edm
            .resolve_type(target)
            .ok_or_else(|| ODataError::bad_request(format!("Unknown type '{}'", target)))?;
        let is_cast = method == MethodKind::Cast;

        let Some(subject) = subject else {
            if is_cast {
                return Err(ODataError::not_implemented("Casting the current instance is not supported"));
            }
            let own = match &self.scope {
                Scope::Entity(entity) => Some(self.ctx.edm.qualify(&entity.type_name)),
                Scope::Complex { ty, .. } => ty.as_ref().map(|t| t.name.clone()),
                Scope::Element { .. } => None,
            };
            return Ok(TypedOperand::boolean(Some(own.as_deref() == Some(ty.name()))));
        };

        let operand = self.visit(subject)?;
        match ty {
            EdmTypeRef::Primitive(kind) if is_cast => {
                // A failing cast yields null rather than an error.
                Ok(operand.cast_to(kind).unwrap_or_else(|_| TypedOperand::null_of(kind)))
            }
            EdmTypeRef::Primitive(kind) => {
                let matches = match operand {
                    Operand::Untyped(u) => !u.is_null_literal() && u.cast_to(kind).is_ok(),
                    Operand::Typed(t) => t.kind() == Some(kind),
                };
                Ok(TypedOperand::boolean(Some(matches)))
            }
            EdmTypeRef::Enum(name) if !is_cast => {
                let matches = match operand {
                    Operand::Typed(t) => t.enum_type().is_some_and(|e| e.name == name),
                    Operand::Untyped(_) => false,
                };
                Ok(TypedOperand::boolean(Some(matches)))
            }
            other => Err(ODataError::not_implemented(format!(
                "{} to {} is not supported",
                method,
                other.name()
            ))),
        }
    }

    fn alias(&self, name: &str) -> ODataResult<Operand> {
        let shadowed = self
            .root_properties()
            .and_then(|props| props.iter().find(|p| p.name == name))
            .is_some_and(|p| !p.value.is_null());
        if shadowed {
            let path = MemberPath::new(vec![MemberSegment::Property(name.to_string())]);
            return self.member(&path).map(Operand::Typed);
        }
        match self.ctx.uri_info.alias(name) {
            Some(value) => Ok(Operand::untyped(value)),
            None => Ok(Operand::Typed(TypedOperand::null_literal())),
        }
    }

    fn root_properties(&self) -> Option<&'a [Property]> {
        match &self.scope {
            Scope::Entity(entity) => Some(&entity.properties),
            Scope::Complex { value, .. } => Some(&value.properties),
            Scope::Element { .. } => None,
        }
    }

    fn enum_literal(&self, type_name: &str, members: &[String]) -> ODataResult<TypedOperand> {
        let ty = self
            .ctx
            .edm
            .enum_type(type_name)
            .ok_or_else(|| ODataError::bad_request(format!("Unknown enum type '{}'", type_name)))?;
        if members.len() > 1 && !ty.is_flags {
            return Err(ODataError::bad_request(format!(
                "Enum type {} does not allow multiple members",
                ty.name
            )));
        }
        let mut value = 0i64;
        for member in members {
            let member_value = ty
                .value_of(member)
                .or_else(|| member.parse::<i64>().ok())
                .ok_or_else(|| {
                    ODataError::bad_request(format!("'{}' is not a member of {}", member, ty.name))
                })?;
            value |= member_value;
        }
        Ok(TypedOperand::enum_value(value, ty.clone()))
    }

    fn member(&self, path: &MemberPath) -> ODataResult<TypedOperand> {
        let (mut cursor, rest) = match path.segments.split_first() {
            Some((MemberSegment::LambdaVariable(name), rest)) => (self.lambda_cursor(name)?, rest),
            Some(_) => (self.scope_cursor(&self.scope), path.segments.as_slice()),
            None => return Err(ODataError::bad_request("Empty member path")),
        };

        for (index, segment) in rest.iter().enumerate() {
            let last = index + 1 == rest.len();
            match segment {
                MemberSegment::Property(name) => cursor = self.step(cursor, name)?,
                MemberSegment::LambdaVariable(name) => {
                    return Err(ODataError::bad_request(format!(
                        "Lambda variable '{}' must start a member path",
                        name
                    )))
                }
                MemberSegment::Any(lambda) | MemberSegment::All(lambda) => {
                    if !last {
                        return Err(ODataError::not_implemented("Navigation after a lambda is not supported"));
                    }
                    let all = matches!(segment, MemberSegment::All(_));
                    return self.lambda(cursor, lambda, all);
                }
                MemberSegment::Function { name, parameters } => {
                    if !last {
                        return Err(ODataError::not_implemented(
                            "Navigation after a function call is not supported",
                        ));
                    }
                    return self.bound_function(cursor, name, parameters);
                }
            }
        }
        self.cursor_operand(cursor)
    }

    fn lambda_cursor(&self, name: &str) -> ODataResult<Cursor<'a>> {
        self.lambdas
            .iter()
            .rev()
            .find(|(variable, _)| variable == name)
            .map(|(_, scope)| self.scope_cursor(scope))
            .ok_or_else(|| ODataError::bad_request(format!("Unknown lambda variable '{}'", name)))
    }

    fn scope_cursor(&self, scope: &Scope<'a>) -> Cursor<'a> {
        match scope {
            Scope::Entity(entity) => Cursor::Structured {
                properties: &entity.properties,
                ty: self.ctx.edm.entity_type(&entity.type_name).cloned(),
                entity: Some(*entity),
            },
            Scope::Complex { value, ty } => Cursor::Structured {
                properties: &value.properties,
                ty: ty.clone(),
                entity: None,
            },
            Scope::Element { value, property } => self.value_cursor(value, property.clone()),
        }
    }

    fn element_type(&self, value: &ComplexValue, property: Option<&EdmProperty>) -> Option<Arc<EdmStructuredType>> {
        value
            .type_name
            .as_deref()
            .and_then(|name| self.ctx.edm.complex_type(name))
            .or_else(|| match property.map(|p| &p.ty) {
                Some(EdmTypeRef::Complex(name)) => self.ctx.edm.complex_type(name),
                _ => None,
            })
            .cloned()
    }

    fn value_cursor(&self, value: &'a PropertyValue, property: Option<Arc<EdmProperty>>) -> Cursor<'a> {
        match value {
            PropertyValue::Complex(complex) => Cursor::Structured {
                properties: &complex.properties,
                ty: self.element_type(complex, property.as_deref()),
                entity: None,
            },
            v if v.is_null() => Cursor::Null { property },
            _ => Cursor::Value { value, property },
        }
    }

    fn step(&self, cursor: Cursor<'a>, name: &str) -> ODataResult<Cursor<'a>> {
        match cursor {
            Cursor::Structured { properties, ty, .. } => {
                let declared = ty.as_ref().and_then(|t| t.get(name)).cloned();
                match properties.iter().find(|p| p.name == name) {
                    Some(p) => Ok(self.value_cursor(&p.value, declared)),
                    None if declared.is_some() || ty.is_none() => Ok(Cursor::Null { property: declared }),
                    None => Err(ODataError::bad_request(format!("Property '{}' not found", name))),
                }
            }
            // Null propagates through complex properties.
            Cursor::Null { property } => {
                let nested = match property.as_ref().map(|p| &p.ty) {
                    Some(EdmTypeRef::Complex(ty)) => self
                        .ctx
                        .edm
                        .complex_type(ty)
                        .and_then(|t| t.get(name))
                        .cloned(),
                    _ => None,
                };
                Ok(Cursor::Null { property: nested })
            }
            Cursor::Value { .. } => Err(ODataError::bad_request(format!(
                "Property '{}' cannot be read from a primitive or collection value",
                name
            ))),
        }
    }

    fn lambda(&self, cursor: Cursor<'a>, lambda: &Lambda, all: bool) -> ODataResult<TypedOperand> {
        let (items, property) = match cursor {
            Cursor::Value {
                value: PropertyValue::Collection(items),
                property,
            } => (items.as_slice(), property),
            Cursor::Null { .. } => return Ok(TypedOperand::boolean(Some(all))),
            _ => return Err(ODataError::bad_request("any/all can only be applied to a collection")),
        };
        let Some(predicate) = lambda.predicate.as_deref() else {
            return Ok(TypedOperand::boolean(Some(all || !items.is_empty())));
        };

        for item in items {
            let scope = match item {
                PropertyValue::Complex(value) => Scope::Complex {
                    value,
                    ty: self.element_type(value, property.as_deref()),
                },
                other => Scope::Element {
                    value: other,
                    property: property.clone(),
                },
            };
            let matched = self.nested(&lambda.variable, scope).evaluate_filter(predicate)?;
            if matched != all {
                trace!(variable = %lambda.variable, all, "lambda decided early");
                return Ok(TypedOperand::boolean(Some(matched)));
            }
        }
        Ok(TypedOperand::boolean(Some(all)))
    }

    fn bound_function(
        &self,
        cursor: Cursor<'a>,
        name: &str,
        parameters: &[(String, Expression)],
    ) -> ODataResult<TypedOperand> {
        let Cursor::Structured { entity: Some(entity), .. } = cursor else {
            return Err(ODataError::not_implemented("Bound functions are only supported on entities"));
        };
        let edm = self.ctx.edm;
        let function = edm
            .function(name)
            .ok_or_else(|| ODataError::bad_request(format!("Unknown function '{}'", name)))?;
        if edm.qualify(&entity.type_name) != function.binding_type {
            return Err(ODataError::bad_request(format!(
                "Function {} is not bound to {}",
                function.name, entity.type_name
            )));
        }
        let provider = self
            .ctx
            .provider
            .ok_or_else(|| ODataError::not_implemented("No data provider is available for bound functions"))?;

        let mut args = Vec::with_capacity(parameters.len());
        for (parameter, expr) in parameters {
            let declared = function
                .parameters
                .iter()
                .find(|p| p.name == *parameter)
                .ok_or_else(|| {
                    ODataError::bad_request(format!("Unknown parameter '{}' of {}", parameter, function.name))
                })?;
            let value = self.visit(expr)?.into_typed_as(declared.ty.as_primitive())?;
            args.push((parameter.clone(), value));
        }

        let result = provider.call_function(function, entity, &args)?;
        if function.returns_collection {
            return Err(ODataError::not_implemented("Collection-valued functions are not supported in expressions"));
        }
        match (&function.return_type, result) {
            (EdmTypeRef::Primitive(kind), PropertyValue::Primitive(PrimitiveValue::Null)) => {
                Ok(TypedOperand::null_of(*kind))
            }
            (EdmTypeRef::Primitive(kind), PropertyValue::Primitive(value)) => {
                TypedOperand::from_value(value).cast_to(*kind)
            }
            (EdmTypeRef::Enum(ty), PropertyValue::Enum { value, .. }) => {
                let ty = edm
                    .enum_type(ty)
                    .ok_or_else(|| ODataError::internal(format!("Unknown enum type '{}'", ty)))?;
                Ok(TypedOperand::enum_value(value, ty.clone()))
            }
            (ty, _) => Err(ODataError::not_implemented(format!(
                "Function results of type {} are not supported in expressions",
                ty.name()
            ))),
        }
    }

    fn cursor_operand(&self, cursor: Cursor<'a>) -> ODataResult<TypedOperand> {
        match cursor {
            Cursor::Value {
                value: PropertyValue::Primitive(value),
                property,
            } => {
                let operand = TypedOperand::from_value(value.clone());
                Ok(match property {
                    Some(property) => operand.with_property(property),
                    None => operand,
                })
            }
            Cursor::Value {
                value: PropertyValue::Enum { type_name, value },
                ..
            } => {
                let ty = self
                    .ctx
                    .edm
                    .enum_type(type_name)
                    .ok_or_else(|| ODataError::bad_request(format!("Unknown enum type '{}'", type_name)))?;
                Ok(TypedOperand::enum_value(*value, ty.clone()))
            }
            Cursor::Null { property } => {
                let Some(property) = property else {
                    return Ok(TypedOperand::null_literal());
                };
                let operand = match &property.ty {
                    EdmTypeRef::Primitive(kind) => TypedOperand::null_of(*kind),
                    EdmTypeRef::Enum(name) => match self.ctx.edm.enum_type(name) {
                        Some(ty) => TypedOperand::new(PrimitiveValue::Null, OperandType::Enum(ty.clone())),
                        None => TypedOperand::null_literal(),
                    },
                    _ => TypedOperand::null_literal(),
                };
                Ok(operand.with_property(property))
            }
            Cursor::Value { .. } | Cursor::Structured { .. } => Err(ODataError::not_implemented(
                "Complex or collection-valued members are not supported as operands",
            )),
        }
    }
}

fn binary(op: BinaryOperator, left: Operand, right: Operand) -> ODataResult<TypedOperand> {
    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let l = boolean_operand(op, &left.into_typed()?)?;
            let r = boolean_operand(op, &right.into_typed()?)?;
            let result = if op == BinaryOperator::And {
                and3(l, r)
            } else {
                or3(l, r)
            };
            Ok(TypedOperand::boolean(result))
        }
        BinaryOperator::Has => has(&left.into_typed()?, &right.into_typed()?),
        _ => {
            let (left, right) = type_pair(left, right)?;
            let left = left.cast_to_common_type(&right)?;
            let right = right.cast_to_common_type(&left)?;
            if op.is_comparison() {
                comparison(op, &left, &right)
            } else {
                arithmetic(op, &left, &right)
            }
        }
    }
}

fn boolean_operand(op: BinaryOperator, operand: &TypedOperand) -> ODataResult<Option<bool>> {
    if operand.is_null_literal() {
        return Ok(None);
    }
    if !operand.is(EdmPrimitiveKind::Boolean) {
        return Err(ODataError::bad_request(format!(
            "Operator {} expects Edm.Boolean operands, found {}",
            op,
            operand.ty()
        )));
    }
    Ok(operand.value().as_bool())
}

fn and3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or3(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn has(left: &TypedOperand, right: &TypedOperand) -> ODataResult<TypedOperand> {
    let (Some(lt), Some(rt)) = (left.enum_type(), right.enum_type()) else {
        return Err(ODataError::bad_request("Operator has expects enum operands"));
    };
    if lt.name != rt.name {
        return Err(ODataError::bad_request(format!(
            "Operator has cannot combine {} and {}",
            lt.name, rt.name
        )));
    }
    match (left.value(), right.value()) {
        (PrimitiveValue::Int64(l), PrimitiveValue::Int64(r)) => Ok(TypedOperand::boolean(Some(l & r == *r))),
        _ => Ok(TypedOperand::boolean(None)),
    }
}

fn comparison(op: BinaryOperator, left: &TypedOperand, right: &TypedOperand) -> ODataResult<TypedOperand> {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        let result = match op {
            BinaryOperator::Eq => Some(both),
            BinaryOperator::Ne => Some(!both),
            _ => None,
        };
        return Ok(TypedOperand::boolean(result));
    }

    let ordering = compare_operands(left, right)?;
    let result = match op {
        BinaryOperator::Eq => ordering == Some(Ordering::Equal),
        BinaryOperator::Ne => ordering != Some(Ordering::Equal),
        BinaryOperator::Gt => ordering == Some(Ordering::Greater),
        BinaryOperator::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        BinaryOperator::Lt => ordering == Some(Ordering::Less),
        BinaryOperator::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        _ => return Err(ODataError::internal(format!("{} is not a comparison", op))),
    };
    Ok(TypedOperand::boolean(Some(result)))
}

/// Natural ordering of two non-null operands of compatible type. `None`
/// when the values are unordered (NaN).
pub(crate) fn compare_operands(left: &TypedOperand, right: &TypedOperand) -> ODataResult<Option<Ordering>> {
    if let (Some(lt), Some(rt)) = (left.enum_type(), right.enum_type()) {
        if lt.name != rt.name {
            return Err(incompatible(left, right));
        }
    }
    use PrimitiveValue as V;
    let ordering = match (left.value(), right.value()) {
        (a, b) if a.as_i128().is_some() && b.as_i128().is_some() => Some(a.as_i128().cmp(&b.as_i128())),
        (V::Decimal(a), V::Decimal(b)) => Some(a.cmp(b)),
        (V::Single(a), V::Single(b)) => a.partial_cmp(b),
        (V::Double(a), V::Double(b)) => a.partial_cmp(b),
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        (V::Boolean(a), V::Boolean(b)) => Some(a.cmp(b)),
        (V::Date(a), V::Date(b)) => Some(a.cmp(b)),
        (V::DateTimeOffset(a), V::DateTimeOffset(b)) => Some(a.cmp(b)),
        (V::TimeOfDay(a), V::TimeOfDay(b)) => Some(a.cmp(b)),
        (V::Duration(a), V::Duration(b)) => Some(a.cmp(b)),
        (V::Guid(a), V::Guid(b)) => Some(a.cmp(b)),
        (V::Binary(a), V::Binary(b)) => Some(a.cmp(b)),
        _ => return Err(incompatible(left, right)),
    };
    Ok(ordering)
}

fn incompatible(left: &TypedOperand, right: &TypedOperand) -> ODataError {
    ODataError::bad_request(format!("Cannot compare {} with {}", left.ty(), right.ty()))
}

fn division_by_zero() -> ODataError {
    ODataError::bad_request("Division by zero")
}

fn overflow() -> ODataError {
    ODataError::bad_request("Arithmetic overflow")
}

/// Smallest integer kind that holds `value`.
fn narrowest_integer(value: i128) -> ODataResult<TypedOperand> {
    let value = if let Ok(v) = i8::try_from(value) {
        PrimitiveValue::SByte(v)
    } else if let Ok(v) = u8::try_from(value) {
        PrimitiveValue::Byte(v)
    } else if let Ok(v) = i16::try_from(value) {
        PrimitiveValue::Int16(v)
    } else if let Ok(v) = i32::try_from(value) {
        PrimitiveValue::Int32(v)
    } else if let Ok(v) = i64::try_from(value) {
        PrimitiveValue::Int64(v)
    } else {
        return Err(overflow());
    };
    Ok(TypedOperand::from_value(value))
}

fn arithmetic(op: BinaryOperator, left: &TypedOperand, right: &TypedOperand) -> ODataResult<TypedOperand> {
    if left.is_null() || right.is_null() {
        let ty = if left.is_null_literal() {
            right.ty().clone()
        } else {
            left.ty().clone()
        };
        return Ok(TypedOperand::new(PrimitiveValue::Null, ty));
    }

    use PrimitiveValue as V;
    if let (Some(a), Some(b)) = (left.value().as_i128(), right.value().as_i128()) {
        let result = match op {
            BinaryOperator::Add => a.checked_add(b),
            BinaryOperator::Sub => a.checked_sub(b),
            BinaryOperator::Mul => a.checked_mul(b),
            BinaryOperator::Div if b == 0 => return Err(division_by_zero()),
            BinaryOperator::Div => a.checked_div(b),
            BinaryOperator::Mod if b == 0 => return Err(division_by_zero()),
            BinaryOperator::Mod => a.checked_rem(b),
            _ => None,
        };
        return narrowest_integer(result.ok_or_else(overflow)?);
    }

    let value = match (left.value(), right.value()) {
        (V::Decimal(a), V::Decimal(b)) => {
            let zero = BigDecimal::from(0);
            match op {
                BinaryOperator::Add => V::Decimal(a.clone() + b.clone()),
                BinaryOperator::Sub => V::Decimal(a.clone() - b.clone()),
                BinaryOperator::Mul => V::Decimal(a.clone() * b.clone()),
                BinaryOperator::Div | BinaryOperator::Mod if *b == zero => return Err(division_by_zero()),
                BinaryOperator::Div => V::Decimal(a.clone() / b.clone()),
                _ => V::Decimal(a.clone() % b.clone()),
            }
        }
        (V::Double(a), V::Double(b)) => V::Double(float_op(op, *a, *b)?),
        (V::Single(a), V::Single(b)) => V::Single(float_op(op, f64::from(*a), f64::from(*b))? as f32),
        (l, r) => temporal(op, l, r)?.ok_or_else(|| {
            ODataError::bad_request(format!(
                "Operator {} is not defined for {} and {}",
                op,
                left.ty(),
                right.ty()
            ))
        })?,
    };
    Ok(TypedOperand::from_value(value))
}

fn float_op(op: BinaryOperator, a: f64, b: f64) -> ODataResult<f64> {
    match op {
        BinaryOperator::Add => Ok(a + b),
        BinaryOperator::Sub => Ok(a - b),
        BinaryOperator::Mul => Ok(a * b),
        BinaryOperator::Div | BinaryOperator::Mod if b == 0.0 => Err(division_by_zero()),
        BinaryOperator::Div => Ok(a / b),
        _ => Ok(a % b),
    }
}

/// Date and duration arithmetic; `None` when the combination is undefined.
fn temporal(op: BinaryOperator, left: &PrimitiveValue, right: &PrimitiveValue) -> ODataResult<Option<PrimitiveValue>> {
    use PrimitiveValue as V;
    let value = match (op, left, right) {
        (BinaryOperator::Add, V::DateTimeOffset(dt), V::Duration(d)) => {
            V::DateTimeOffset(dt.checked_add_signed(*d).ok_or_else(overflow)?)
        }
        (BinaryOperator::Sub, V::DateTimeOffset(dt), V::Duration(d)) => {
            V::DateTimeOffset(dt.checked_sub_signed(*d).ok_or_else(overflow)?)
        }
        (BinaryOperator::Add, V::Date(date), V::Duration(d)) => V::Date(date.checked_add_signed(*d).ok_or_else(overflow)?),
        (BinaryOperator::Sub, V::Date(date), V::Duration(d)) => V::Date(date.checked_sub_signed(*d).ok_or_else(overflow)?),
        (BinaryOperator::Add, V::Duration(a), V::Duration(b)) => V::Duration(a.checked_add(b).ok_or_else(overflow)?),
        (BinaryOperator::Sub, V::Duration(a), V::Duration(b)) => V::Duration(a.checked_sub(b).ok_or_else(overflow)?),
        (BinaryOperator::Sub, V::DateTimeOffset(a), V::DateTimeOffset(b)) => V::Duration(a.signed_duration_since(*b)),
        (BinaryOperator::Sub, V::Date(a), V::Date(b)) => V::Duration(a.signed_duration_since(*b)),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn unary(op: UnaryOperator, operand: &TypedOperand) -> ODataResult<TypedOperand> {
    match op {
        UnaryOperator::Not => {
            if !operand.is_null_literal() && !operand.is(EdmPrimitiveKind::Boolean) {
                return Err(ODataError::bad_request(format!(
                    "Operator not expects an Edm.Boolean operand, found {}",
                    operand.ty()
                )));
            }
            Ok(TypedOperand::boolean(operand.value().as_bool().map(|b| !b)))
        }
        UnaryOperator::Minus => {
            use PrimitiveValue as V;
            if operand.is_null() {
                return Ok(operand.clone());
            }
            if let Some(v) = operand.value().as_i128() {
                return narrowest_integer(-v);
            }
            let value = match operand.value() {
                V::Decimal(d) => V::Decimal(-d.clone()),
                V::Double(f) => V::Double(-*f),
                V::Single(f) => V::Single(-*f),
                V::Duration(d) => V::Duration(-*d),
                _ => {
                    return Err(ODataError::bad_request(format!(
                        "Operator - is not defined for {}",
                        operand.ty()
                    )))
                }
            };
            Ok(TypedOperand::from_value(value))
        }
    }
}
