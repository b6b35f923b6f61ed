// Client side of OData `$batch`: build parts and changesets, post them with
// reqwest and decode the multipart response.
pub mod batch;
pub mod client;
pub mod error;

pub use batch::{BatchBuilder, ChangesetBuilder, ContentIdRef};
pub use client::{ClientConfig, ODataClient};
pub use error::{ClientError, ClientResult};

pub use odata_batch::{BatchRequestPart, ODataRequest, ODataResponse, ODataResponsePart};
