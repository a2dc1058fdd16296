use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use formkeep_core::{Attributes, Clock, CoreError, EntityId, EntityType, FieldPath, FieldValue, Methods, SectionName};
use formkeep_engine::{EngineConfig, EngineError, FormPage, RestoreState, SectionLayout, TickReport};
use formkeep_storage::MemoryStore;
use serde_json::json;

use crate::FakeBackend;

/// Install a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Clock the test advances by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) -> u64 {
        let now = self.now_ms.get() + ms;
        self.now_ms.set(now);
        now
    }

    pub fn get(&self) -> u64 {
        self.now_ms.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Result<u64, CoreError> {
        Ok(self.now_ms.get())
    }
}

pub fn lease() -> EntityType {
    EntityType::new("lease")
}

pub fn basic() -> SectionName {
    SectionName::new("basic")
}

pub fn rent() -> SectionName {
    SectionName::new("rent")
}

pub fn tenants() -> SectionName {
    SectionName::new("tenants")
}

pub fn path(raw: &str) -> Result<FieldPath, CoreError> {
    FieldPath::parse(raw)
}

/// Lease schema in the backend's metadata format.
pub fn lease_attributes() -> Result<Attributes, CoreError> {
    Attributes::from_json(&json!({
        "id": {"type": "integer", "read_only": true, "label": "Id"},
        "start_date": {"type": "date", "required": true, "label": "Start date"},
        "end_date": {"type": "date", "label": "End date"},
        "type": {
            "type": "choice",
            "required": true,
            "label": "Type",
            "choices": [
                {"value": "lease", "display_name": "Lease"},
                {"value": "reservation", "display_name": "Reservation"}
            ]
        },
        "note": {"type": "string", "max_length": 200, "label": "Note"},
        "rent": {
            "type": "nested object",
            "label": "Rent",
            "children": {
                "amount": {"type": "decimal", "decimal_places": 2, "required": true, "label": "Amount"},
                "due_day": {"type": "integer", "label": "Due day"}
            }
        },
        "tenants": {
            "type": "list",
            "label": "Tenants",
            "child": {
                "type": "nested object",
                "children": {
                    "name": {"type": "string", "required": true, "label": "Name"},
                    "share": {"type": "decimal", "decimal_places": 2, "label": "Share"}
                }
            }
        }
    }))
}

pub fn lease_methods() -> Result<Methods, CoreError> {
    Methods::from_json(&json!({"GET": true, "POST": true, "PATCH": true, "DELETE": false}))
}

/// A lease with an empty start date, the state a page starts from.
pub fn lease_entity(id: u64) -> FieldValue {
    FieldValue::from_json(&json!({
        "id": id,
        "start_date": null,
        "end_date": null,
        "type": "lease",
        "note": "",
        "rent": {"amount": 1200, "due_day": 1},
        "tenants": [{"name": "Aino", "share": 1}]
    }))
}

pub fn lease_layout() -> Vec<SectionLayout> {
    vec![
        SectionLayout::new("basic", ["id", "start_date", "end_date", "type", "note"]),
        SectionLayout::new("rent", ["rent"]),
        SectionLayout::new("tenants", ["tenants"]),
    ]
}

/// A lease page over a fake backend with leases 7, 8 and 42.
pub struct TestPage {
    page: FormPage<FakeBackend, MemoryStore>,
    pub clock: ManualClock,
}

impl TestPage {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut backend = FakeBackend::new();
        backend.register_type(&lease(), lease_attributes()?, lease_methods()?);
        for id in [7, 8, 42] {
            backend.insert_entity(&lease(), EntityId::new(id), lease_entity(id));
        }
        Ok(Self::from_parts(backend, MemoryStore::new(), config))
    }

    pub fn from_parts(backend: FakeBackend, store: MemoryStore, config: EngineConfig) -> Self {
        init_test_logging();
        Self {
            page: FormPage::new(backend, store, config),
            clock: ManualClock::new(1_000),
        }
    }

    pub fn mount(&mut self, id: u64) -> Result<RestoreState, EngineError> {
        self.page.mount(lease(), EntityId::new(id), lease_layout())
    }

    pub fn enter_edit(&mut self) -> Result<(), EngineError> {
        let now = self.clock.get();
        self.page.enter_edit(now)
    }

    pub fn restore(&mut self) -> Result<(), EngineError> {
        let now = self.clock.get();
        self.page.restore(now)
    }

    /// Move the clock forward and run whatever autosave tick is due.
    pub fn advance(&mut self, ms: u64) -> Result<Option<TickReport>, EngineError> {
        self.clock.advance(ms);
        self.page.tick(&self.clock)
    }

    /// Simulate a reload: a new page over the same backend and storage.
    pub fn reload(self) -> Self {
        let config = self.page.config().clone();
        let clock_ms = self.clock.get();
        let (backend, store) = self.page.into_parts();
        let mut reloaded = Self::from_parts(backend, store, config);
        reloaded.clock = ManualClock::new(clock_ms);
        reloaded
    }
}

impl Deref for TestPage {
    type Target = FormPage<FakeBackend, MemoryStore>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl DerefMut for TestPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}
