//! Single requests: descriptor, response record, lifecycle and validation

pub mod descriptor;
pub mod lifecycle;
pub mod record;
pub mod validator;

pub use descriptor::{
    ArgumentFilter, Arguments, BasicAuth, CachePolicy, RequestDescriptor, RequestPriority,
    RequestSerializer, ResponseFormat, StatusCodeSet,
};
pub use lifecycle::{Callback, Request, RequestState};
pub use record::{RequestRecord, TaskHandle, TaskId};
pub use validator::{JsonShapeValidator, ResponseValidator};
