pub mod assessment;
pub mod document;
pub mod plugin;
pub mod user;

pub use assessment::{Assessment, Narrative, Verdict};
pub use document::{
    Document, DocumentState, DocumentType, ExtractedField, FailureReason, FieldProvenance,
    FieldSet,
};
pub use plugin::{ExecutionStatus, PluginDescriptor, PluginResult, ValidationOutcome};
pub use user::UserProfile;
