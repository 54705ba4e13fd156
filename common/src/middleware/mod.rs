//! Middleware components shared by the service binaries.

pub mod invocation_id;

pub use invocation_id::{invocation_id_middleware, InvocationId, INVOCATION_ID_HEADER};
