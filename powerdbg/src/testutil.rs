//! Helpers shared by the unit tests.

use crate::backend::fake::{FakeBackend, FakeHandle};
use crate::config::Registry;
use crate::{BackendKind, System};

/// The built-in fake system with a scripted backend, plus the handle to
/// script it.
pub(crate) fn fake_system() -> (System, FakeHandle) {
    let registry = Registry::from_builtin_systems().unwrap();
    let desc = registry.for_backend(BackendKind::Fake).unwrap();
    let backend = FakeBackend::new();
    let handle = backend.handle();
    let system = System::with_backend(desc.to_tree(), Box::new(backend)).unwrap();
    (system, handle)
}
