// Parsed `$filter` / `$orderby` expression tree.

use std::fmt;

/// Node kinds of a filter or orderby expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    MethodCall {
        method: MethodKind,
        args: Vec<Expression>,
    },
    Member(MemberPath),
    /// Raw URI literal text, e.g. `'abc'`, `42`, `duration'PT1H'`.
    Literal(String),
    /// Parameter alias without the leading `@`.
    Alias(String),
    /// Enum literal `Ns.Type'A,B'`.
    Enum {
        type_name: String,
        members: Vec<String>,
    },
    /// Qualified type name, only meaningful as a `cast`/`isof` argument.
    TypeLiteral(String),
    /// `$it` or `$root` outside of a member path.
    LambdaReference(String),
}

impl Expression {
    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Expression::Literal(text.into())
    }

    /// Single-segment property path.
    pub fn property(name: impl Into<String>) -> Self {
        Expression::Member(MemberPath::new(vec![MemberSegment::Property(name.into())]))
    }

    /// Height of the tree; a leaf is 1.
    pub fn depth(&self) -> usize {
        match self {
            Expression::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expression::Unary { operand, .. } => 1 + operand.depth(),
            Expression::MethodCall { args, .. } => 1 + args.iter().map(Expression::depth).max().unwrap_or(0),
            Expression::Member(path) => 1 + path.segments.iter().map(MemberSegment::depth).max().unwrap_or(0),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Has,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOperator {
    pub fn from_keyword(word: &str) -> Option<Self> {
        let op = match word {
            "or" => BinaryOperator::Or,
            "and" => BinaryOperator::And,
            "eq" => BinaryOperator::Eq,
            "ne" => BinaryOperator::Ne,
            "gt" => BinaryOperator::Gt,
            "ge" => BinaryOperator::Ge,
            "lt" => BinaryOperator::Lt,
            "le" => BinaryOperator::Le,
            "has" => BinaryOperator::Has,
            "add" => BinaryOperator::Add,
            "sub" => BinaryOperator::Sub,
            "mul" => BinaryOperator::Mul,
            "div" => BinaryOperator::Div,
            "mod" => BinaryOperator::Mod,
            _ => return None,
        };
        Some(op)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Eq => "eq",
            BinaryOperator::Ne => "ne",
            BinaryOperator::Gt => "gt",
            BinaryOperator::Ge => "ge",
            BinaryOperator::Lt => "lt",
            BinaryOperator::Le => "le",
            BinaryOperator::Has => "has",
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
            BinaryOperator::Mod => "mod",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Gt
                | BinaryOperator::Ge
                | BinaryOperator::Lt
                | BinaryOperator::Le
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Sub
                | BinaryOperator::Mul
                | BinaryOperator::Div
                | BinaryOperator::Mod
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// Built-in query functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    EndsWith,
    StartsWith,
    Contains,
    IndexOf,
    ToLower,
    ToUpper,
    Trim,
    Substring,
    Concat,
    Length,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    FractionalSeconds,
    TotalSeconds,
    Date,
    Time,
    TotalOffsetMinutes,
    Now,
    MaxDateTime,
    MinDateTime,
    Round,
    Floor,
    Ceiling,
    Cast,
    IsOf,
}

impl MethodKind {
    const NAMES: [(&'static str, MethodKind); 29] = [
        ("endswith", MethodKind::EndsWith),
        ("startswith", MethodKind::StartsWith),
        ("contains", MethodKind::Contains),
        ("indexof", MethodKind::IndexOf),
        ("tolower", MethodKind::ToLower),
        ("toupper", MethodKind::ToUpper),
        ("trim", MethodKind::Trim),
        ("substring", MethodKind::Substring),
        ("concat", MethodKind::Concat),
        ("length", MethodKind::Length),
        ("year", MethodKind::Year),
        ("month", MethodKind::Month),
        ("day", MethodKind::Day),
        ("hour", MethodKind::Hour),
        ("minute", MethodKind::Minute),
        ("second", MethodKind::Second),
        ("fractionalseconds", MethodKind::FractionalSeconds),
        ("totalseconds", MethodKind::TotalSeconds),
        ("date", MethodKind::Date),
        ("time", MethodKind::Time),
        ("totaloffsetminutes", MethodKind::TotalOffsetMinutes),
        ("now", MethodKind::Now),
        ("maxdatetime", MethodKind::MaxDateTime),
        ("mindatetime", MethodKind::MinDateTime),
        ("round", MethodKind::Round),
        ("floor", MethodKind::Floor),
        ("ceiling", MethodKind::Ceiling),
        ("cast", MethodKind::Cast),
        ("isof", MethodKind::IsOf),
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    /// Accepted argument count as an inclusive range.
    pub fn arity(&self) -> (usize, usize) {
        match self {
            MethodKind::Now | MethodKind::MaxDateTime | MethodKind::MinDateTime => (0, 0),
            MethodKind::EndsWith
            | MethodKind::StartsWith
            | MethodKind::Contains
            | MethodKind::IndexOf
            | MethodKind::Concat => (2, 2),
            MethodKind::Substring => (2, 3),
            MethodKind::Cast | MethodKind::IsOf => (1, 2),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body of an `any` / `all` lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub variable: String,
    /// `None` for the parameterless `any()`.
    pub predicate: Option<Box<Expression>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberSegment {
    Property(String),
    /// Leading reference to an enclosing lambda variable.
    LambdaVariable(String),
    Any(Lambda),
    All(Lambda),
    /// Bound function call, parameters as `name=expression` pairs.
    Function {
        name: String,
        parameters: Vec<(String, Expression)>,
    },
}

impl MemberSegment {
    fn depth(&self) -> usize {
        match self {
            MemberSegment::Any(lambda) | MemberSegment::All(lambda) => {
                lambda.predicate.as_ref().map_or(0, |p| p.depth())
            }
            MemberSegment::Function { parameters, .. } => {
                parameters.iter().map(|(_, expr)| expr.depth()).max().unwrap_or(0)
            }
            MemberSegment::Property(_) | MemberSegment::LambdaVariable(_) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemberPath {
    pub segments: Vec<MemberSegment>,
}

impl MemberPath {
    pub fn new(segments: Vec<MemberSegment>) -> Self {
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One `$orderby` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: Expression,
    pub direction: SortDirection,
}
