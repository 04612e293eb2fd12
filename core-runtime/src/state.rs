//! # Observable State
//!
//! [`StateCell`] is a last-value cache with change notification, built on
//! `tokio::sync::watch`. Publishing replaces the cached value and wakes every
//! subscriber without blocking the publisher; a new subscriber sees the
//! current value immediately.
//!
//! Unlike the [`EventBus`](crate::events::EventBus), which carries
//! transitions, a state cell carries snapshots: slow observers skip
//! intermediate values and always land on the latest one.
//!
//! ```rust
//! use core_runtime::state::StateCell;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let downloads = StateCell::new(Vec::<String>::new());
//! let mut rx = downloads.subscribe();
//!
//! downloads.update(|list| list.push("job-1".to_string()));
//!
//! rx.changed().await.unwrap();
//! assert_eq!(rx.borrow().len(), 1);
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub use tokio::sync::watch::Receiver as StateReceiver;

/// Shared, observable value. Clones share the same underlying cell.
pub struct StateCell<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> StateCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Run `f` against the current value without cloning it.
    ///
    /// The cell is read-locked for the duration of `f`; keep it short and
    /// never publish from inside it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.sender.borrow())
    }

    /// Subscribe to changes. The receiver starts out holding the current value.
    pub fn subscribe(&self) -> StateReceiver<T> {
        self.sender.subscribe()
    }

    /// Replace the value and notify subscribers.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Mutate the value in place and notify subscribers.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.sender.send_modify(f);
    }

    /// Mutate the value in place; subscribers are only notified when `f`
    /// returns `true`.
    pub fn update_if<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.sender.send_if_modified(f)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Default for StateCell<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for StateCell<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.sender.borrow())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_and_publish() {
        let cell = StateCell::new(1u32);
        assert_eq!(cell.get(), 1);

        cell.publish(2);
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let cell = StateCell::new(String::new());
        cell.publish("ready".to_string());
        assert_eq!(cell.get(), "ready");
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_replays_current_value() {
        let cell = StateCell::new(vec![1, 2]);
        cell.update(|v| v.push(3));

        let rx = cell.subscribe();
        assert_eq!(*rx.borrow(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_subscriber_notified_on_update() {
        let cell = StateCell::new(0u64);
        let mut rx = cell.subscribe();

        let publisher = cell.clone();
        tokio::spawn(async move {
            publisher.update(|v| *v += 5);
        });

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow_and_update(), 5);
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_latest() {
        let cell = StateCell::new(0u32);
        let mut rx = cell.subscribe();

        for i in 1..=10 {
            cell.publish(i);
        }

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 10);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_update_if_skips_notification() {
        let cell = StateCell::new(Some("boom".to_string()));
        let rx = cell.subscribe();

        let changed = cell.update_if(|v| {
            if v.is_none() {
                return false;
            }
            *v = None;
            true
        });
        assert!(changed);
        assert!(rx.has_changed().unwrap());

        let rx = cell.subscribe();
        assert!(!cell.update_if(|v| v.take().is_some()));
        assert!(!rx.has_changed().unwrap());
    }
}
