//! # The Published Model and Write Transactions
//!
//! [`ResourceTree`] owns the *published* root of the management model. Readers take a
//! snapshot (an `Arc` of the root) and never block writers; a snapshot stays valid and
//! unchanged for as long as the reader holds it.
//!
//! Writers go through a [`ModelTransaction`]:
//!
//! 1. The transaction starts on the current snapshot and serves reads from it.
//! 2. Acquiring *write intent* takes the controller-wide write lock (bounded wait) and
//!    re-bases the transaction on the latest published root.
//! 3. Writes copy the path from the root to the touched node (`Arc::make_mut`), so siblings
//!    stay shared with the published tree. Each write is also logged by address.
//! 4. When the MODEL stage ends the lock is released; the staged root stays with the
//!    transaction until it is resolved.
//! 5. `commit` swaps the published root for the staged one. If another writer published in
//!    the meantime, the logged writes are replayed onto the newer root instead, and any
//!    attribute or resource both writers touched fails the commit with
//!    [`OperationError::ConcurrentModification`]. `rollback` drops the staged copy.
//!
//! Because the published root is only ever replaced whole, a reader observes either the
//! complete result of a committed operation or none of it.

use crate::address::PathAddress;
use crate::error::OperationError;
use crate::resource::Resource;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

pub struct ResourceTree {
    root: RwLock<Arc<Resource>>,
    write_lock: Arc<Mutex<()>>,
    version: AtomicU64,
}

impl ResourceTree {
    pub fn new(root: Resource) -> Self {
        Self {
            root: RwLock::new(Arc::new(root)),
            write_lock: Arc::new(Mutex::new(())),
            version: AtomicU64::new(0),
        }
    }

    /// The currently published root.
    pub fn snapshot(&self) -> Arc<Resource> {
        self.root.read().clone()
    }

    /// Number of commits that changed the published root.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Reads the resource at `address` from the current snapshot.
    pub fn read(&self, address: &PathAddress) -> Result<Resource, OperationError> {
        self.snapshot()
            .navigate(address)
            .cloned()
            .ok_or_else(|| OperationError::ResourceNotFound(address.clone()))
    }

    /// Starts a transaction on the current snapshot.
    pub fn begin(self: &Arc<Self>, lock_timeout: Duration) -> ModelTransaction {
        ModelTransaction {
            tree: self.clone(),
            base: self.snapshot(),
            staged: None,
            guard: None,
            changes: Vec::new(),
            lock_timeout,
        }
    }

    /// Publishes `staged`, which was built on `base`. Returns the new root.
    fn publish(
        &self,
        base: &Arc<Resource>,
        staged: Arc<Resource>,
        changes: &[Change],
    ) -> Result<Arc<Resource>, OperationError> {
        let mut root = self.root.write();
        let next = if Arc::ptr_eq(&*root, base) {
            staged
        } else {
            debug!(changes = changes.len(), "Model changed since this write began; replaying");
            Arc::new(replay(&root, base, &staged, changes)?)
        };
        *root = next.clone();
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(version, "Published model");
        Ok(next)
    }
}

/// One logged write.
#[derive(Debug, Clone, PartialEq)]
enum Change {
    Update(PathAddress),
    Create(PathAddress),
    Remove(PathAddress),
}

impl Change {
    fn address(&self) -> &PathAddress {
        match self {
            Change::Update(a) | Change::Create(a) | Change::Remove(a) => a,
        }
    }

    fn is_structural(&self) -> bool {
        !matches!(self, Change::Update(_))
    }
}

fn conflict(address: &PathAddress) -> OperationError {
    OperationError::ConcurrentModification(address.clone())
}

/// Applies the writes that turned `base` into `staged` on top of `current`.
///
/// A write is skipped when a structural write (create or remove) at an ancestor already
/// carries it; an update is also skipped when its own resource was created or removed.
fn replay(
    current: &Resource,
    base: &Resource,
    staged: &Resource,
    changes: &[Change],
) -> Result<Resource, OperationError> {
    let covered = |change: &Change| {
        let address = change.address();
        changes.iter().any(|other| {
            other.is_structural()
                && other.address().contains(address)
                && (other.address().len() < address.len() || !change.is_structural())
        })
    };

    let mut merged = current.clone();
    for change in changes.iter().filter(|c| !covered(*c)) {
        match change {
            Change::Update(address) => {
                let (Some(before), Some(after)) = (base.navigate(address), staged.navigate(address))
                else {
                    continue;
                };
                let node = merged.navigate_mut(address).ok_or_else(|| conflict(address))?;
                let names = before
                    .model()
                    .keys()
                    .chain(after.model().keys().filter(|k| !before.model().contains_key(*k)));
                for name in names {
                    let (old, new) = (before.attribute(name), after.attribute(name));
                    if old == new {
                        continue;
                    }
                    if node.attribute(name) != old {
                        return Err(conflict(address));
                    }
                    match new {
                        Some(value) => node.set_attribute(name, value.clone()),
                        None => node.remove_attribute(name),
                    };
                }
            }
            Change::Create(address) => {
                let Some(created) = staged.navigate(address) else {
                    continue;
                };
                let element = address.last().ok_or_else(|| conflict(address))?;
                merged
                    .navigate_mut(&address.parent())
                    .ok_or_else(|| conflict(address))?
                    .add_child(element, created.clone())
                    .map_err(|_| conflict(address))?;
            }
            Change::Remove(address) => {
                let Some(removed) = base.navigate(address) else {
                    continue;
                };
                let element = address.last().ok_or_else(|| conflict(address))?;
                let parent = merged
                    .navigate_mut(&address.parent())
                    .ok_or_else(|| conflict(address))?;
                let unchanged = matches!(parent.child(element), Some(now) if now.as_ref() == removed);
                if !unchanged {
                    return Err(conflict(address));
                }
                parent.remove_child(element);
            }
        }
    }
    Ok(merged)
}

/// A single operation's view of the model, with optional staged writes.
pub struct ModelTransaction {
    tree: Arc<ResourceTree>,
    base: Arc<Resource>,
    staged: Option<Arc<Resource>>,
    guard: Option<OwnedMutexGuard<()>>,
    changes: Vec<Change>,
    lock_timeout: Duration,
}

impl ModelTransaction {
    /// True once write intent was acquired, even after the lock itself was released.
    pub fn has_write_intent(&self) -> bool {
        self.staged.is_some()
    }

    /// True while this transaction holds the controller write lock.
    pub fn holds_write_lock(&self) -> bool {
        self.guard.is_some()
    }

    /// True when writes have been staged.
    pub fn is_dirty(&self) -> bool {
        self.staged
            .as_ref()
            .map(|staged| !Arc::ptr_eq(staged, &self.base))
            .unwrap_or(false)
    }

    /// Takes the controller write lock and re-bases on the latest published root.
    pub async fn acquire_write_intent(&mut self) -> Result<(), OperationError> {
        if self.staged.is_some() {
            return Ok(());
        }
        let guard = tokio::time::timeout(self.lock_timeout, self.tree.write_lock.clone().lock_owned())
            .await
            .map_err(|_| OperationError::Timeout {
                timeout: self.lock_timeout,
                what: "the controller write lock".to_string(),
            })?;
        trace!("Acquired controller write lock");
        self.guard = Some(guard);
        self.base = self.tree.snapshot();
        self.staged = Some(self.base.clone());
        Ok(())
    }

    /// Lets other writers in. Staged writes are kept until commit or rollback.
    pub fn release_write_lock(&mut self) {
        if self.guard.take().is_some() {
            trace!("Released controller write lock");
        }
    }

    /// The root this transaction reads from: staged writes if any, else the snapshot.
    pub fn root(&self) -> &Arc<Resource> {
        self.staged.as_ref().unwrap_or(&self.base)
    }

    pub fn read(&self, address: &PathAddress) -> Result<&Resource, OperationError> {
        self.root()
            .navigate(address)
            .ok_or_else(|| OperationError::ResourceNotFound(address.clone()))
    }

    fn node_mut(&mut self, address: &PathAddress) -> Result<&mut Resource, OperationError> {
        let root = match self.staged.as_mut() {
            Some(root) => Arc::make_mut(root),
            None => {
                return Err(OperationError::ContractViolation(
                    "the model was modified by an operation that does not hold write intent"
                        .to_string(),
                ))
            }
        };
        root.navigate_mut(address)
            .ok_or_else(|| OperationError::ResourceNotFound(address.clone()))
    }

    fn log(&mut self, change: Change) {
        if !self.changes.contains(&change) {
            self.changes.push(change);
        }
    }

    /// Mutable access to the resource at `address`, copying the path on first touch.
    pub fn read_for_update(&mut self, address: &PathAddress) -> Result<&mut Resource, OperationError> {
        self.node_mut(address)?;
        self.log(Change::Update(address.clone()));
        self.node_mut(address)
    }

    /// Adds `resource` at `address`. The parent must exist and the name must be free.
    pub fn create(&mut self, address: &PathAddress, resource: Resource) -> Result<(), OperationError> {
        let element = address.last().cloned().ok_or_else(|| {
            OperationError::DuplicateResource(PathAddress::root())
        })?;
        self.node_mut(&address.parent())?
            .add_child(&element, resource)
            .map_err(|_| OperationError::DuplicateResource(address.clone()))?;
        self.log(Change::Create(address.clone()));
        Ok(())
    }

    /// Removes the resource at `address` together with its subtree.
    pub fn remove(&mut self, address: &PathAddress) -> Result<Arc<Resource>, OperationError> {
        let element = address.last().cloned().ok_or_else(|| {
            OperationError::ContractViolation("the root resource cannot be removed".to_string())
        })?;
        let removed = self
            .node_mut(&address.parent())?
            .remove_child(&element)
            .ok_or_else(|| OperationError::ResourceNotFound(address.clone()))?;
        self.log(Change::Remove(address.clone()));
        Ok(removed)
    }

    /// Publishes staged writes and releases the write lock.
    ///
    /// Fails only when another writer changed what this transaction changed; nothing is
    /// published then.
    pub fn commit(&mut self) -> Result<(), OperationError> {
        let result = match self.staged.take() {
            Some(staged) if !Arc::ptr_eq(&staged, &self.base) => self
                .tree
                .publish(&self.base, staged, &self.changes)
                .map(|published| self.base = published),
            _ => Ok(()),
        };
        self.release();
        result
    }

    /// Discards staged writes and releases the write lock.
    pub fn rollback(&mut self) {
        if self.is_dirty() {
            debug!("Discarded staged model changes");
        }
        self.release();
    }

    fn release(&mut self) {
        self.staged = None;
        self.changes.clear();
        self.release_write_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PathElement;
    use crate::value::Value;

    fn tree() -> Arc<ResourceTree> {
        let mut root = Resource::new();
        root.add_child(
            &PathElement::new("child", "a"),
            Resource::with_attributes([("value", "one")]),
        )
        .unwrap();
        Arc::new(ResourceTree::new(root))
    }

    fn child_a() -> PathAddress {
        PathAddress::pairs(&[("child", "a")])
    }

    #[tokio::test]
    async fn test_commit_publishes_and_snapshots_are_stable() {
        let tree = tree();
        let before = tree.snapshot();

        let mut tx = tree.begin(Duration::from_secs(1));
        tx.acquire_write_intent().await.unwrap();
        tx.read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "two".into());
        assert_eq!(
            tree.read(&child_a()).unwrap().attribute("value"),
            Some(&Value::from("one"))
        );
        tx.commit().unwrap();

        assert_eq!(tree.version(), 1);
        assert_eq!(
            tree.read(&child_a()).unwrap().attribute("value"),
            Some(&Value::from("two"))
        );
        assert_eq!(
            before.navigate(&child_a()).unwrap().attribute("value"),
            Some(&Value::from("one"))
        );
    }

    #[tokio::test]
    async fn test_rollback_leaves_tree_untouched() {
        let tree = tree();
        let mut tx = tree.begin(Duration::from_secs(1));
        tx.acquire_write_intent().await.unwrap();
        tx.create(&PathAddress::pairs(&[("child", "b")]), Resource::new())
            .unwrap();
        tx.remove(&child_a()).unwrap();
        tx.rollback();

        assert_eq!(tree.version(), 0);
        assert_eq!(tree.snapshot().children_names("child"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let tree = tree();
        let mut tx = tree.begin(Duration::from_secs(1));
        tx.acquire_write_intent().await.unwrap();
        assert_eq!(
            tx.create(&child_a(), Resource::new()),
            Err(OperationError::DuplicateResource(child_a()))
        );
        let missing = PathAddress::pairs(&[("child", "zz")]);
        assert!(matches!(
            tx.remove(&missing),
            Err(OperationError::ResourceNotFound(_))
        ));
        let orphan = PathAddress::pairs(&[("child", "zz"), ("leaf", "x")]);
        assert!(matches!(
            tx.create(&orphan, Resource::new()),
            Err(OperationError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_require_intent() {
        let tree = tree();
        let mut tx = tree.begin(Duration::from_secs(1));
        assert!(tx.read_for_update(&child_a()).unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_write_lock_is_exclusive() {
        let tree = tree();
        let mut first = tree.begin(Duration::from_secs(1));
        first.acquire_write_intent().await.unwrap();

        let mut second = tree.begin(Duration::from_millis(20));
        assert!(matches!(
            second.acquire_write_intent().await,
            Err(OperationError::Timeout { .. })
        ));

        first.rollback();
        second.acquire_write_intent().await.unwrap();
    }

    /// Two writers that both finished staging: `first` still pending, `second` committed.
    async fn interleaved(tree: &Arc<ResourceTree>) -> (ModelTransaction, ModelTransaction) {
        let mut first = tree.begin(Duration::from_millis(20));
        first.acquire_write_intent().await.unwrap();
        first.release_write_lock();
        let mut second = tree.begin(Duration::from_millis(20));
        second.acquire_write_intent().await.unwrap();
        second.release_write_lock();
        (first, second)
    }

    #[tokio::test]
    async fn test_released_lock_keeps_staged_writes() {
        let tree = tree();
        let mut first = tree.begin(Duration::from_millis(20));
        first.acquire_write_intent().await.unwrap();
        first
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "two".into());
        first.release_write_lock();

        assert!(first.has_write_intent());
        assert!(!first.holds_write_lock());
        let mut second = tree.begin(Duration::from_millis(20));
        second.acquire_write_intent().await.unwrap();
        assert_eq!(
            first.read(&child_a()).unwrap().attribute("value"),
            Some(&Value::from("two"))
        );
    }

    #[tokio::test]
    async fn test_disjoint_writes_are_replayed_onto_newer_root() {
        let tree = tree();
        let (mut first, mut second) = interleaved(&tree).await;
        first
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "two".into());
        first
            .create(&PathAddress::pairs(&[("child", "b")]), Resource::new())
            .unwrap();
        second
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("size", 3.into());
        second
            .create(&PathAddress::pairs(&[("child", "c")]), Resource::new())
            .unwrap();

        second.commit().unwrap();
        first.commit().unwrap();

        assert_eq!(tree.version(), 2);
        let a = tree.read(&child_a()).unwrap();
        assert_eq!(a.attribute("value"), Some(&Value::from("two")));
        assert_eq!(a.attribute("size"), Some(&Value::from(3)));
        assert_eq!(tree.snapshot().children_names("child"), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_overlapping_writes_conflict() {
        let tree = tree();
        let (mut first, mut second) = interleaved(&tree).await;
        first
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "first".into());
        second
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "second".into());

        second.commit().unwrap();

        assert_eq!(
            first.commit(),
            Err(OperationError::ConcurrentModification(child_a()))
        );
        assert_eq!(tree.version(), 1);
        assert_eq!(
            tree.read(&child_a()).unwrap().attribute("value"),
            Some(&Value::from("second"))
        );
    }

    #[tokio::test]
    async fn test_remove_of_concurrently_changed_resource_conflicts() {
        let tree = tree();
        let (mut first, mut second) = interleaved(&tree).await;
        first.remove(&child_a()).unwrap();
        second
            .read_for_update(&child_a())
            .unwrap()
            .set_attribute("value", "kept".into());

        second.commit().unwrap();

        assert!(matches!(
            first.commit(),
            Err(OperationError::ConcurrentModification(_))
        ));
        assert!(tree.read(&child_a()).is_ok());
    }
}
