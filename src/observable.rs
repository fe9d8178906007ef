/// Observable - Reactive Value Cells for LiveGrid
///
/// An `Observable<T>` holds one value and a list of subscribers. Values are
/// replaced wholesale: `set` and `update` swap in a new `Rc<T>` and then notify
/// every subscriber, so a reader never sees a half-edited structure.
///
/// # Design
///
/// - Values live behind `Rc<T>`, so `get()` is a pointer clone
/// - A version counter is bumped on every replacement
/// - Subscribers are called after the internal borrow is released, so a
///   subscriber may freely read this observable or write other ones
/// - Derived observables (`derived2`, `derived3`) recompute from their sources
///   on every source change and never need manual resynchronisation

use std::cell::{Cell, RefCell};
use std::ops::Deref;
use std::rc::{Rc, Weak};

type Callback<T> = Rc<dyn Fn(&Rc<T>)>;

struct Inner<T> {
    value: RefCell<Rc<T>>,
    subscribers: RefCell<Vec<(u64, Callback<T>)>>,
    next_id: Cell<u64>,
    version: Cell<u64>,
}

/// A shared, observable value cell.
///
/// Cloning an `Observable` produces another handle to the same cell.
///
/// # Examples
///
/// ```
/// use livegrid::Observable;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = Observable::new(1);
/// let seen = Rc::new(Cell::new(0));
/// let seen_in_callback = seen.clone();
/// let sub = count.subscribe(move |v| seen_in_callback.set(**v));
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
///
/// sub.unsubscribe();
/// count.set(7);
/// assert_eq!(seen.get(), 5);
/// ```
pub struct Observable<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Default + 'static> Default for Observable<T> {
    fn default() -> Self {
        Observable::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Observable {
            inner: Rc::new(Inner {
                value: RefCell::new(Rc::new(value)),
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                version: Cell::new(0),
            }),
        }
    }

    /// Returns the current value
    pub fn get(&self) -> Rc<T> {
        self.inner.value.borrow().clone()
    }

    /// Replace the value and notify subscribers
    pub fn set(&self, value: T) {
        self.replace(Rc::new(value));
    }

    /// Replace the value with an already shared one and notify subscribers
    pub fn replace(&self, value: Rc<T>) {
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.version.set(self.inner.version.get() + 1);
        self.notify(&value);
    }

    /// Compute a new value from the current one and store it wholesale
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get();
        self.set(f(&current));
    }

    /// Register a callback invoked after every replacement
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Rc<T>) + 'static,
    {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(callback)));

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.borrow_mut().retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }

    /// Number of replacements since construction
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn notify(&self, value: &Rc<T>) {
        // Snapshot so callbacks can subscribe/unsubscribe while we iterate
        let callbacks: Vec<Callback<T>> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            callback(value);
        }
    }
}

/// Non-owning handle to an observable, used by derived stores so that a
/// source never keeps its dependents' inputs alive.
pub struct WeakObservable<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakObservable<T> {
    fn clone(&self) -> Self {
        WeakObservable {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WeakObservable<T> {
    pub fn upgrade(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }
}

/// Handle returned by `Observable::subscribe`.
///
/// Unsubscribing is explicit; dropping the handle leaves the callback
/// registered.
pub struct Subscription {
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    fn new<F: FnOnce() + 'static>(release: F) -> Self {
        Subscription {
            release: RefCell::new(Some(Box::new(release))),
        }
    }

    /// Build a subscription around an arbitrary release action
    pub fn from_fn<F: FnOnce() + 'static>(release: F) -> Self {
        Subscription::new(release)
    }

    /// Remove the callback. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        let release = self.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.borrow().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// An observable whose value is a pure function of other observables.
///
/// Dereferences to the underlying `Observable<T>` for reading and
/// subscribing. `dispose` detaches it from its sources.
pub struct Derived<T> {
    value: Observable<T>,
    sources: Vec<Subscription>,
}

impl<T> Deref for Derived<T> {
    type Target = Observable<T>;

    fn deref(&self) -> &Observable<T> {
        &self.value
    }
}

impl<T: 'static> Derived<T> {
    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        for sub in &self.sources {
            sub.unsubscribe();
        }
    }

    pub fn observable(&self) -> Observable<T> {
        self.value.clone()
    }
}

/// Derive an observable from two sources
pub fn derived2<A, B, T, F>(a: &Observable<A>, b: &Observable<B>, compute: F) -> Derived<T>
where
    A: 'static,
    B: 'static,
    T: 'static,
    F: Fn(&A, &B) -> T + 'static,
{
    let compute = Rc::new(compute);
    let value = Observable::new(compute(&a.get(), &b.get()));

    let recompute: Rc<dyn Fn()> = {
        let (wa, wb, target) = (a.downgrade(), b.downgrade(), value.downgrade());
        let compute = compute.clone();
        Rc::new(move || {
            if let (Some(a), Some(b), Some(target)) = (wa.upgrade(), wb.upgrade(), target.upgrade()) {
                target.set(compute(&a.get(), &b.get()));
            }
        })
    };

    let sources = vec![
        {
            let r = recompute.clone();
            a.subscribe(move |_| r())
        },
        {
            let r = recompute.clone();
            b.subscribe(move |_| r())
        },
    ];

    Derived { value, sources }
}

/// Derive an observable from three sources
pub fn derived3<A, B, C, T, F>(
    a: &Observable<A>,
    b: &Observable<B>,
    c: &Observable<C>,
    compute: F,
) -> Derived<T>
where
    A: 'static,
    B: 'static,
    C: 'static,
    T: 'static,
    F: Fn(&A, &B, &C) -> T + 'static,
{
    let compute = Rc::new(compute);
    let value = Observable::new(compute(&a.get(), &b.get(), &c.get()));

    let recompute: Rc<dyn Fn()> = {
        let (wa, wb, wc) = (a.downgrade(), b.downgrade(), c.downgrade());
        let target = value.downgrade();
        let compute = compute.clone();
        Rc::new(move || {
            if let (Some(a), Some(b), Some(c), Some(target)) =
                (wa.upgrade(), wb.upgrade(), wc.upgrade(), target.upgrade())
            {
                target.set(compute(&a.get(), &b.get(), &c.get()));
            }
        })
    };

    let sources = vec![
        {
            let r = recompute.clone();
            a.subscribe(move |_| r())
        },
        {
            let r = recompute.clone();
            b.subscribe(move |_| r())
        },
        {
            let r = recompute.clone();
            c.subscribe(move |_| r())
        },
    ];

    Derived { value, sources }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bumps_version_and_notifies() {
        let obs = Observable::new(vec![1, 2]);
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let _sub = obs.subscribe(move |_| c.set(c.get() + 1));

        assert_eq!(obs.version(), 0);
        obs.set(vec![3]);
        obs.update(|v| v.iter().map(|x| x * 2).collect());

        assert_eq!(*obs.get(), vec![6]);
        assert_eq!(obs.version(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let obs = Observable::new(0);
        let sub = obs.subscribe(|_| {});
        assert_eq!(obs.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(obs.subscriber_count(), 0);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_subscriber_may_write_other_observable() {
        let source = Observable::new(1);
        let mirror = Observable::new(0);
        let m = mirror.clone();
        let _sub = source.subscribe(move |v| m.set(**v * 10));

        source.set(4);
        assert_eq!(*mirror.get(), 40);
    }

    #[test]
    fn test_derived2_tracks_both_sources() {
        let a = Observable::new(2);
        let b = Observable::new(3);
        let sum = derived2(&a, &b, |a, b| a + b);
        assert_eq!(*sum.get(), 5);

        a.set(10);
        assert_eq!(*sum.get(), 13);
        b.set(0);
        assert_eq!(*sum.get(), 10);
        assert_eq!(sum.version(), 2);
    }

    #[test]
    fn test_derived_dispose_stops_recompute() {
        let a = Observable::new(1);
        let b = Observable::new(1);
        let c = Observable::new(1);
        let product = derived3(&a, &b, &c, |a, b, c| a * b * c);

        product.dispose();
        a.set(5);
        assert_eq!(*product.get(), 1);
        assert_eq!(a.subscriber_count(), 0);
    }
}
