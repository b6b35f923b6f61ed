// Protocol-level building blocks shared by the server and client crates.
pub mod data;
pub mod edm;
pub mod error;
pub mod etag;
pub mod query;

pub use data::{ComplexValue, Entity, Property, PropertyValue};
pub use edm::{EdmModel, EdmPrimitiveKind, PrimitiveValue, TypeRegistry};
pub use error::{ErrorCode, ODataError, ODataResult};
pub use etag::{EtagInformation, PreconditionError};

// Evaluation entry points
pub use query::{
    apply_query_options, parse_filter, parse_orderby, DataProvider, ExpressionEvaluator, QueryContext,
    QueryResult, TypedOperand, UriInfo,
};
