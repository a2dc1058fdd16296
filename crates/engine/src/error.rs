use formkeep_core::CoreError;
use formkeep_storage::StorageError;
use thiserror::Error;

use crate::backend::SaveRejection;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no schema loaded for entity type: {0}")]
    SchemaUnavailable(String),

    #[error("section not registered: {0}")]
    UnknownSection(String),

    #[error("section already registered: {0}")]
    DuplicateSection(String),

    #[error("section name is reserved: {0}")]
    ReservedSectionName(String),

    #[error("snapshot scheduler already running")]
    SchedulerAlreadyRunning,

    #[error("page is not in edit mode")]
    NotEditing,

    #[error("page is already in edit mode")]
    AlreadyEditing,

    #[error("editing {0} is not permitted")]
    EditNotPermitted(String),

    #[error("no entity mounted")]
    NotMounted,

    #[error("a restore decision is pending")]
    RestorePending,

    #[error("no restore decision is pending")]
    NoPendingRestore,

    #[error("sections are invalid: {0:?}")]
    InvalidSections(Vec<String>),

    #[error("save rejected by backend")]
    SaveRejected(SaveRejection),
}
