use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::sync::RwLockReadGuard;
use tokio::sync::RwLockWriteGuard;

/// write guards held longer than this are logged at warn level on release
const SLOW_WRITE_LOCK_THRESHOLD: Duration = Duration::from_millis(100);

/// An `Arc<RwLock<T>>` wrapper to make data thread-safe and easy to work with.
///
/// The optional name shows up in the warning logged when a write guard is
/// held for suspiciously long.
///
/// # Examples
/// ```
/// # use lyndrix_core::application::locks::tokio::AtomicRw;
/// # use lyndrix_core::state::vault::lifecycle::ConnectionState;
/// # use lyndrix_core::state::vault::lifecycle::LifecycleState;
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let lifecycle: AtomicRw<LifecycleState> =
///     AtomicRw::from((LifecycleState::default(), Some("vault-lifecycle")));
///
/// let moved = lifecycle
///     .lock_mut(|s| s.transition(ConnectionState::Probing))
///     .await;
/// assert_eq!(Ok(true), moved);
/// assert_eq!(
///     ConnectionState::Probing,
///     lifecycle.lock(|s| s.connection_state()).await
/// );
/// # })
/// ```
#[derive(Debug)]
pub struct AtomicRw<T> {
    inner: Arc<RwLock<T>>,
    name: Option<Arc<str>>,
}

impl<T> From<T> for AtomicRw<T> {
    #[inline]
    fn from(t: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(t)),
            name: None,
        }
    }
}

impl<T> From<(T, Option<&str>)> for AtomicRw<T> {
    /// Create from an optional name
    #[inline]
    fn from(v: (T, Option<&str>)) -> Self {
        Self {
            inner: Arc::new(RwLock::new(v.0)),
            name: v.1.map(Arc::from),
        }
    }
}

impl<T> Clone for AtomicRw<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T> AtomicRw<T> {
    /// Acquire read lock and return an `RwLockReadGuard`
    ///
    /// # Examples
    /// ```
    /// # use std::collections::BTreeMap;
    /// # use lyndrix_core::application::locks::tokio::AtomicRw;
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let locks = AtomicRw::from(BTreeMap::from([("vault", "offline")]));
    /// let held = locks.lock_guard().await.len();
    /// assert_eq!(1, held);
    /// # })
    /// ```
    pub async fn lock_guard(&self) -> AtomicRwReadGuard<'_, T> {
        AtomicRwReadGuard {
            guard: self.inner.read().await,
        }
    }

    /// Acquire write lock and return an `RwLockWriteGuard`
    ///
    /// # Examples
    /// ```
    /// # use std::collections::BTreeMap;
    /// # use lyndrix_core::application::locks::tokio::AtomicRw;
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let locks = AtomicRw::from(BTreeMap::from([("vault", "offline")]));
    /// locks.lock_guard_mut().await.remove("vault");
    /// assert!(locks.lock(|l| l.is_empty()).await);
    /// # })
    /// ```
    pub async fn lock_guard_mut(&self) -> AtomicRwWriteGuard<'_, T> {
        let guard = self.inner.write().await;
        AtomicRwWriteGuard {
            guard,
            name: self.name.as_deref(),
            acquired_at: Instant::now(),
        }
    }

    /// Immutably access the data of type `T` in a closure and possibly return a result of type `R`
    pub async fn lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.lock_guard().await;
        f(&guard)
    }

    /// Mutably access the data of type `T` in a closure and possibly return a result of type `R`
    pub async fn lock_mut<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.lock_guard_mut().await;
        f(&mut guard)
    }
}

/// A wrapper for [RwLockReadGuard](tokio::sync::RwLockReadGuard)
pub struct AtomicRwReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Deref for AtomicRwReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// A wrapper for [RwLockWriteGuard](tokio::sync::RwLockWriteGuard) that
/// reports guards held for too long.
pub struct AtomicRwWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    name: Option<&'a str>,
    acquired_at: Instant,
}

impl<T> Drop for AtomicRwWriteGuard<'_, T> {
    fn drop(&mut self) {
        let held = self.acquired_at.elapsed();
        if held > SLOW_WRITE_LOCK_THRESHOLD {
            tracing::warn!(
                lock = self.name.unwrap_or("?"),
                "write lock held for {:?}",
                held
            );
        }
    }
}

impl<T> Deref for AtomicRwWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for AtomicRwWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
