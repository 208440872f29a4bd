//! Backend abstraction layer (`spec.md` §4.1–§4.3): the capability interface
//! concrete drivers implement, plus the pieces shared by every driver
//! (naming, username resolution, component unit conversion).

pub mod client;
pub mod driver;
pub mod mapper;
pub mod username;

pub use client::{Association, BackendClient, UnknownClient};
pub use driver::{
    generate_backend_id, sanitize_backend_id, BackendDriver, BaseBackendDriver,
    CreateResourcePipeline, OrderDecision, UserContext,
};
pub use mapper::{convert_limits_to_backend, convert_usage_to_control};
pub use username::{PassthroughUsernameManager, UsernameManager, UsernameResult};
