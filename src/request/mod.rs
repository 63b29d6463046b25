pub mod model;
pub mod status;
pub mod workflow;

pub use model::{Court, Document, Role, Signature, SigningRequest, User};
pub use status::{Actor, RequestStatus, SignStatus};
pub use workflow::RequestWorkflow;
