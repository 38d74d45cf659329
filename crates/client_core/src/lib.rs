mod form;
mod persistence;

pub use form::{FormChange, FormModel, LiveForm};
pub use persistence::{
    ObserveHandle, PersistenceController, PersistenceOptions, RestoreReport, DEFAULT_DEBOUNCE,
};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
