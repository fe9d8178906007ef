/// Events - Lifecycle Notifications for LiveGrid
///
/// Stores announce structural changes (a column was added, renamed, patched
/// or deleted) through an `EventChannel`. Listeners run synchronously inside
/// `emit`, so anything a listener does before returning is visible to the
/// emitter's next statement. Long-running reactions are expected to be queued
/// by the listener, not awaited.
///
/// # Usage Pattern
///
/// 1. A store owns an `EventChannel<E>` and calls `emit` after a change settles
/// 2. Interested parties `subscribe` and keep the returned `Subscription`
/// 3. On teardown, subscribers unsubscribe and the owner calls `clear`

use crate::column::ColumnId;
use crate::observable::Subscription;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Column lifecycle events emitted by `ColumnsDataStore`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnEvent {
    /// A column was created
    Added,
    /// A column's name changed
    Renamed,
    /// A column's type or other properties changed
    Patched,
    /// A column was removed. Carries the removed id.
    Deleted(ColumnId),
}

impl ColumnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnEvent::Added => "columnAdded",
            ColumnEvent::Renamed => "columnRenamed",
            ColumnEvent::Patched => "columnPatched",
            ColumnEvent::Deleted(_) => "columnDeleted",
        }
    }
}

type Listener<E> = Rc<dyn Fn(&E)>;

struct Listeners<E> {
    entries: RefCell<Vec<(u64, Listener<E>)>>,
    next_id: Cell<u64>,
    /// Incremented on every emit
    generation: Cell<u64>,
}

/// Synchronous multi-listener event channel
pub struct EventChannel<E> {
    listeners: Rc<Listeners<E>>,
}

impl<E: 'static> Default for EventChannel<E> {
    fn default() -> Self {
        EventChannel::new()
    }
}

impl<E: 'static> EventChannel<E> {
    pub fn new() -> Self {
        EventChannel {
            listeners: Rc::new(Listeners {
                entries: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                generation: Cell::new(0),
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + 'static,
    {
        let id = self.listeners.next_id.get();
        self.listeners.next_id.set(id + 1);
        self.listeners
            .entries
            .borrow_mut()
            .push((id, Rc::new(listener)));

        let weak = Rc::downgrade(&self.listeners);
        Subscription::from_fn(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.entries.borrow_mut().retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `event` to every listener registered at the time of the call
    pub fn emit(&self, event: E) {
        self.listeners
            .generation
            .set(self.listeners.generation.get() + 1);

        let snapshot: Vec<Listener<E>> = self
            .listeners
            .entries
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            listener(&event);
        }
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.entries.borrow_mut().clear();
    }

    /// Returns the number of events emitted so far
    pub fn generation(&self) -> u64 {
        self.listeners.generation.get()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let channel = EventChannel::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = seen.clone();
        let _a = channel.subscribe(move |e: &ColumnEvent| s1.borrow_mut().push(("a", *e)));
        let s2 = seen.clone();
        let _b = channel.subscribe(move |e: &ColumnEvent| s2.borrow_mut().push(("b", *e)));

        channel.emit(ColumnEvent::Deleted(ColumnId(4)));

        assert_eq!(
            *seen.borrow(),
            vec![("a", ColumnEvent::Deleted(ColumnId(4))), ("b", ColumnEvent::Deleted(ColumnId(4)))]
        );
        assert_eq!(channel.generation(), 1);
    }

    #[test]
    fn test_unsubscribed_listener_is_skipped() {
        let channel = EventChannel::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let sub = channel.subscribe(move |_: &ColumnEvent| c.set(c.get() + 1));

        channel.emit(ColumnEvent::Added);
        sub.unsubscribe();
        channel.emit(ColumnEvent::Added);

        assert_eq!(count.get(), 1);
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn test_clear_drops_listeners() {
        let channel: EventChannel<ColumnEvent> = EventChannel::new();
        let _sub = channel.subscribe(|_| {});
        channel.clear();
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(ColumnEvent::Renamed.name(), "columnRenamed");
    }
}
