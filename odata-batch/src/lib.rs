pub mod changeset;
pub mod coordinator;
pub mod error;
pub mod multipart;
pub mod request;

pub use changeset::{reference_of, substitute_content_id, ChangesetSorter};
pub use coordinator::{BatchConfig, BatchCoordinator, RequestHandler};
pub use error::{BatchError, BatchResult, MessageKey};
pub use multipart::{
    boundary_from_content_type, generate_boundary, parse_batch_request, parse_batch_response,
    write_batch_request, write_batch_response, MultipartBody, ServiceRoot,
};
pub use request::{
    BatchRequestPart, ODataRequest, ODataResponse, ODataResponsePart, JSON_CONTENT_TYPE,
    ODATA_ENTITY_ID, ODATA_VERSION,
};
