mod backend;
mod fixtures;

pub use backend::FakeBackend;
pub use fixtures::{
    ManualClock, TestPage, basic, init_test_logging, lease, lease_attributes, lease_entity,
    lease_layout, lease_methods, path, rent, tenants,
};
