pub mod workflow;

pub use workflow::{
    ApprovalWorkflow, BulkApproval, Decision, Escalation, RequestApproval, Resubmission,
};
