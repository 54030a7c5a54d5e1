// SPDX-License-Identifier: CEPL-1.0
use tracing::trace;

/// LIFO list of release actions. Every object is pushed right after it is
/// created, so flushing releases in exact reverse creation order.
///
/// Dropping a stack flushes it, which also covers the partial state left
/// behind by a failed init.
#[derive(Default)]
pub struct DeletionStack {
    stack: Vec<(&'static str, Box<dyn FnOnce()>)>,
}

impl DeletionStack {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push<F>(&mut self, label: &'static str, release: F)
    where
        F: FnOnce() + 'static,
    {
        self.stack.push((label, Box::new(release)));
    }

    /// Runs every pending release, newest first. Each runs at most once.
    pub fn flush(&mut self) {
        while let Some((label, release)) = self.stack.pop() {
            trace!("release {label}");
            release();
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Labels of pending releases in the order a flush would run them.
    pub fn pending(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stack.iter().rev().map(|(label, _)| *label)
    }
}

impl Drop for DeletionStack {
    fn drop(&mut self) {
        self.flush();
    }
}
