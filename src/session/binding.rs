//! Rebindable resource cell
//!
//! Request handlers never hold on to a primary directly. They ask
//! [`BoundResources`] for the current binding, and when a call on it fails
//! with a retryable error they ask for a rebind, passing the generation
//! they were using. Concurrent handlers that saw the same failure get the
//! same new binding.

use crate::common::Result;
use crate::session::{LoginGuard, ResourceFactory, SessionStore};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A resource plus the generation it was bound in
#[derive(Debug)]
pub struct Binding<T> {
    resource: Arc<T>,
    generation: u64,
}

impl<T> Binding<T> {
    fn new(resource: T, generation: u64) -> Self {
        Self {
            resource: Arc::new(resource),
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            generation: self.generation,
        }
    }
}

impl<T> Deref for Binding<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

#[derive(Default)]
struct Slots {
    generation: u64,
    session: Option<Binding<SessionStore>>,
    guard: Option<Binding<LoginGuard>>,
}

pub struct BoundResources {
    factory: ResourceFactory,
    slots: Mutex<Slots>,
}

impl BoundResources {
    pub fn new(factory: ResourceFactory) -> Self {
        Self {
            factory,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    /// Generation of the current session binding (0 before the first bind)
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Current session binding, binding on first use
    pub fn session(&self) -> Result<Binding<SessionStore>> {
        let mut slots = self.lock();
        match &slots.session {
            Some(binding) => Ok(binding.clone()),
            None => self.bind_session(&mut slots),
        }
    }

    /// Replace the session binding if `stale` is still the current
    /// generation; otherwise someone already rebound and that binding is
    /// returned.
    pub fn rebind_session(&self, stale: u64) -> Result<Binding<SessionStore>> {
        let mut slots = self.lock();
        if let Some(binding) = &slots.session {
            if binding.generation() != stale {
                return Ok(binding.clone());
            }
        }
        slots.session = None;
        self.bind_session(&mut slots)
    }

    /// Current login guard. Rebuilt whenever the session has been rebound
    /// since the guard was made.
    pub fn login_guard(&self) -> Result<Binding<LoginGuard>> {
        let mut slots = self.lock();
        if slots.session.is_none() {
            self.bind_session(&mut slots)?;
        }
        let generation = slots.generation;

        if let Some(guard) = &slots.guard {
            if guard.generation() >= generation {
                return Ok(guard.clone());
            }
        }

        let guard = Binding::new(self.factory.login_guard_resource()?, generation);
        tracing::info!(generation, "login guard rebound to {}", guard.node().label());
        slots.guard = Some(guard.clone());
        Ok(guard)
    }

    fn bind_session(&self, slots: &mut Slots) -> Result<Binding<SessionStore>> {
        let store = self.factory.session_resource()?;
        slots.generation += 1;
        let binding = Binding::new(store, slots.generation);
        tracing::info!(
            generation = slots.generation,
            "session store bound to {}",
            binding.node().label()
        );
        slots.session = Some(binding.clone());
        Ok(binding)
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
