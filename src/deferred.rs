//! Lazily computed values.

use std::cell::{Cell, OnceCell};
use std::fmt;

/// A value computed on first access and memoized afterwards.
///
/// Unlike [`std::cell::LazyCell`] it can report whether the value was ever needed and
/// hand back the computed value by ownership.
pub struct Deferred<T, F = Box<dyn FnOnce() -> T + Send>> {
    value: OnceCell<T>,
    init: Cell<Option<F>>,
}

impl<T, F: FnOnce() -> T> Deferred<T, F> {
    pub fn new(init: F) -> Self {
        Self {
            value: OnceCell::new(),
            init: Cell::new(Some(init)),
        }
    }

    pub fn force(&self) -> &T {
        self.value.get_or_init(|| match self.init.take() {
            Some(init) => init(),
            None => panic!("Deferred value forced while it was being computed"),
        })
    }

    pub fn is_evaluated(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn into_inner(self) -> T {
        self.force();
        match self.value.into_inner() {
            Some(value) => value,
            None => panic!("Deferred value missing after evaluation"),
        }
    }
}

impl<T: fmt::Debug, F> fmt::Debug for Deferred<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => f.debug_tuple("Deferred").field(value).finish(),
            None => f.write_str("Deferred(<pending>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluated_once() {
        let calls = Cell::new(0);
        let deferred = Deferred::new(|| {
            calls.set(calls.get() + 1);
            vec!["a", "b"]
        });

        assert!(!deferred.is_evaluated());
        assert_eq!(deferred.force().len(), 2);
        assert_eq!(deferred.force().len(), 2);
        assert!(deferred.is_evaluated());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_never_forced_never_runs() {
        let calls = Cell::new(0);
        let deferred = Deferred::new(|| calls.set(calls.get() + 1));
        drop(deferred);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_into_inner() {
        let deferred: Deferred<String> = Deferred::new(Box::new(|| "x".to_string()));
        assert_eq!(format!("{:?}", deferred), "Deferred(<pending>)");
        assert_eq!(deferred.into_inner(), "x");
    }
}
