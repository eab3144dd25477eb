/// Ordered multi-subscriber callbacks

/// A list of subscribers invoked synchronously in registration order
pub struct CallbackManager<A> {
    callbacks: Vec<Box<dyn FnMut(A) + Send>>,
}

impl<A: Clone> CallbackManager<A> {
    pub fn new() -> Self {
        Self { callbacks: Vec::new() }
    }

    /// Register a subscriber
    pub fn add<F>(&mut self, callback: F)
    where
        F: FnMut(A) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Deliver `arg` to every subscriber before returning
    pub fn call(&mut self, arg: A) {
        for callback in self.callbacks.iter_mut() {
            callback(arg.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<A: Clone> Default for CallbackManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for CallbackManager<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("subscribers", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_called_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = CallbackManager::new();

        for id in 0..3 {
            let log = log.clone();
            manager.add(move |value: u32| log.lock().unwrap().push((id, value)));
        }
        assert_eq!(manager.len(), 3);

        manager.call(7);
        manager.call(8);

        assert_eq!(
            *log.lock().unwrap(),
            vec![(0, 7), (1, 7), (2, 7), (0, 8), (1, 8), (2, 8)]
        );
    }

    #[test]
    fn test_no_subscribers() {
        let mut manager: CallbackManager<()> = CallbackManager::default();
        assert!(manager.is_empty());
        manager.call(());
    }

    #[test]
    fn test_stateful_subscriber() {
        let total = Arc::new(Mutex::new(0));
        let mut manager = CallbackManager::new();

        let mut seen = 0;
        let sink = total.clone();
        manager.add(move |()| {
            seen += 1;
            *sink.lock().unwrap() = seen;
        });

        manager.call(());
        manager.call(());
        assert_eq!(*total.lock().unwrap(), 2);
    }
}
