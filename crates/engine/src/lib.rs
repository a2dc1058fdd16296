pub mod backend;
pub mod config;
pub mod error;
pub mod field;
pub mod page;
pub mod resolver;
pub mod restore;
pub mod scheduler;
pub mod schema_store;
pub mod section;
pub mod validate;

pub use backend::{Backend, EntityRecord, SaveRejection, SaveResponse};
pub use config::{AutosaveConfig, EngineConfig, StorageConfig};
pub use error::EngineError;
pub use field::FieldBinding;
pub use page::{FormPage, PageMode, SaveOutcome, SectionLayout};
pub use resolver::{EffectiveFieldConfig, EntityAffordances, Resolution, resolve};
pub use restore::{PendingSnapshot, RestoreFlow, RestoreState};
pub use scheduler::{
    DirtySectionSource, PersistenceFailure, SchedulerHandle, SectionState, SnapshotScheduler,
    TickReport, TickSummary, TickTicket,
};
pub use schema_store::{EntitySchema, SchemaStore};
pub use section::{DirtyState, PageAggregate, Section, SectionArena, SectionView, WriteOutcome};
pub use validate::{DATE_FORMAT, FieldError, validate_field};
