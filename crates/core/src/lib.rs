pub mod allocator;
pub mod attachments;
pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod notifications;
pub mod policy;
pub mod projection;
pub mod store;

pub use allocator::{Clock, DocumentIdAllocator, ManualClock, SystemClock};
pub use attachments::{
    AttachmentReconciler, FileStore, InMemoryFileStore, ReconcileRequest,
};
pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use directory::{ActorRef, ActorResolver, Employee, InMemoryDirectory, PeopleDirectory};
pub use domain::attachment::{AttachmentId, AttachmentRef, UploadedFile};
pub use domain::document::{ApprovalDocument, DocType, DocumentId, DocumentStatus};
pub use domain::step::{ApproverStep, StepDecision};
pub use engine::{
    ApprovalInput, NewDocument, ResubmitRequest, SubmitRequest, WorkflowEngine, OVERRIDE_MARKER,
};
pub use errors::{InterfaceError, WorkflowError};
pub use notifications::{
    ApprovalCompleteNote, ApprovalRequestNote, NoopProjectTrigger, Notifier, NotifyError,
    ProjectTrigger, RecordingNotifier, RecordingProjectTrigger, RejectNote, SentNote,
};
pub use policy::{
    ApprovalPolicy, DepartmentRef, InMemoryPolicyStore, ManualStep, PolicyResolver, PolicyStep,
    PolicyStore,
};
pub use projection::DocumentView;
pub use store::{
    DocumentCountQuery, DocumentStore, InMemoryDocumentStore, Page, PageRequest, StoreError,
};
