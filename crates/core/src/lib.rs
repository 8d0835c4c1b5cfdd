pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod policy;

pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat};
pub use domain::approval::{
    ApprovalId, ApprovalRequest, ApprovalStatus, ApproverScope, NewApprovalRequest,
};
pub use domain::quotation::{Quotation, QuotationId};
pub use domain::user::{Role, User, UserId};
pub use errors::{EntityKind, PolicyViolation, WorkflowError};
pub use events::{ApprovalEvent, EventSink, InMemoryEventSink};
pub use policy::{ApprovalLevel, DiscountPolicy, RequiredApproval};
