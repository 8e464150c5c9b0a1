//! Listener lists for session and device notifications

/// Handle returned by [`Signal::add`], used to detach a listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&T)>;

/// Ordered multicast notification
///
/// Listeners run synchronously in registration order on every `emit`.
pub struct Signal<T> {
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 1,
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener
    pub fn add<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&T) + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Detach a listener. Returns false if it was not attached.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, value: &T) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_emit_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut signal = Signal::<u32>::new();

        let o = order.clone();
        signal.add(move |v| o.borrow_mut().push(("first", *v)));
        let o = order.clone();
        signal.add(move |v| o.borrow_mut().push(("second", *v)));

        signal.emit(&3);
        assert_eq!(*order.borrow(), vec![("first", 3), ("second", 3)]);
    }

    #[test]
    fn test_remove_listener() {
        let hits = Rc::new(RefCell::new(0));
        let mut signal = Signal::<()>::new();

        let h = hits.clone();
        let id = signal.add(move |_| *h.borrow_mut() += 1);
        assert!(signal.remove(id));
        assert!(!signal.remove(id));

        signal.emit(&());
        assert_eq!(*hits.borrow(), 0);
        assert!(signal.is_empty());
    }
}
