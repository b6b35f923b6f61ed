// $filter / $orderby: expression tree, parser, typed operands and evaluation.

pub mod evaluator;
pub mod expression;
pub mod methods;
pub mod operand;
pub mod options;
pub mod parser;

pub use evaluator::{DataProvider, ExpressionEvaluator, QueryContext};
pub use expression::{
    BinaryOperator, Expression, Lambda, MemberPath, MemberSegment, MethodKind, OrderByItem,
    SortDirection, UnaryOperator,
};
pub use operand::{type_pair, Operand, OperandType, TypedOperand, UntypedOperand};
pub use options::{apply_query_options, FilterOption, OrderByOption, QueryResult, UriInfo};
pub use parser::{parse_filter, parse_orderby, ParseError, MAX_NESTING_DEPTH};
