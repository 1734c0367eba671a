// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Named component registry with a start/stop lifecycle for services.

use serde::Serialize;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Started,
    Stopped,
    Error,
}

/// A component with a lifecycle: `init` once when registered, then any
/// number of `start`/`stop` cycles.
pub trait ServiceComponent: Send + Sync {
    fn name(&self) -> String;
    fn status(&self) -> ServiceStatus;
    fn init(&self, name: &str, registry: &ComponentRegistry);
    fn start(&self);
    fn stop(&self);
}

type AnyComponent = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct ComponentEntry {
    name: String,
    type_name: &'static str,
    component: AnyComponent,
    service: Option<Arc<dyn ServiceComponent>>,
}

#[derive(Default)]
pub struct ComponentRegistry {
    components: Mutex<Vec<ComponentEntry>>,
    running: AtomicBool,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.entries())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ComponentEntry>> {
        self.components.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> Vec<ComponentEntry> {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a plain component. Several components may share a name.
    pub fn register_component<T: Any + Send + Sync>(&self, name: &str, component: Arc<T>) {
        self.lock().push(ComponentEntry {
            name: name.to_string(),
            type_name: std::any::type_name::<T>(),
            component,
            service: None,
        });
    }

    /// Registers and initialises a service. It is started right away when the
    /// registry is already running.
    pub fn register_service<T: ServiceComponent + 'static>(&self, name: &str, service: Arc<T>) {
        let as_service: Arc<dyn ServiceComponent> = service.clone();
        self.lock().push(ComponentEntry {
            name: name.to_string(),
            type_name: std::any::type_name::<T>(),
            component: service,
            service: Some(as_service.clone()),
        });
        // Called without the lock so the service may look up its peers
        as_service.init(name, self);
        if self.is_running() {
            as_service.start();
        }
    }

    pub fn remove_component(&self, name: &str) -> bool {
        let mut components = self.lock();
        match components.iter().position(|e| e.name == name) {
            Some(idx) => {
                components.remove(idx);
                true
            }
            None => false,
        }
    }

    /// First component registered under `name` with type `T`.
    pub fn component<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.name == name)
            .find_map(|e| e.component.downcast::<T>().ok())
    }

    /// First component of type `T`, whatever its name.
    pub fn component_of<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.snapshot()
            .into_iter()
            .find_map(|e| e.component.downcast::<T>().ok())
    }

    pub fn components_of<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| e.component.downcast::<T>().ok())
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn ServiceComponent>> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.name == name)
            .find_map(|e| e.service)
    }

    /// (name, type) of every registered component in registration order.
    pub fn entries(&self) -> Vec<(String, &'static str)> {
        self.lock()
            .iter()
            .map(|e| (e.name.clone(), e.type_name))
            .collect()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        for service in self.snapshot().into_iter().filter_map(|e| e.service) {
            if service.status() != ServiceStatus::Started {
                service.start();
            }
        }
        tracing::debug!("Component registry started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for service in self.snapshot().into_iter().filter_map(|e| e.service) {
            if service.status() == ServiceStatus::Started {
                service.stop();
            }
        }
        tracing::debug!("Component registry stopped");
    }
}
