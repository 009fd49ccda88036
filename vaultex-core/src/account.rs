//! Tracks the k-closest contact group holding this identity's account
//! record, refreshing it when it goes stale or its members keep failing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use vaultex_model::{AccountName, Pmid};

use crate::error::{Result, VaultError};
use crate::hash::{IdHasher, account_name};
use crate::net::{Contact, KadOps};
use crate::time::Clock;

/// Refresh thresholds for the account-holder group.
#[derive(Clone, Copy, Debug)]
pub struct AccountHolderOptions {
    /// Unconditional refresh after this many seconds.
    pub max_update_interval_secs: u32,
    /// Refresh once this many distinct members have failed.
    pub max_failed_nodes: usize,
    /// Refresh once one member has failed this many times.
    pub max_fails_per_node: usize,
}

impl Default for AccountHolderOptions {
    fn default() -> Self {
        Self {
            max_update_interval_secs: 600,
            max_failed_nodes: 10,
            max_fails_per_node: 3,
        }
    }
}

pub type GroupCallback = Box<dyn FnOnce(Result<Vec<Contact>>) + Send>;

#[derive(Default)]
struct GroupState {
    group: Vec<Contact>,
    /// Failure multiset: member pmid -> observed failure count.
    failed: HashMap<Pmid, usize>,
    last_update: u32,
    update_in_progress: bool,
}

/// The current account-holder contact set for a local identity.
///
/// Cheap to clone; clones share state. An update lookup runs at most one
/// callback per call, with the internal lock released while it does.
#[derive(Clone)]
pub struct AccountHolderGroup {
    pmid: Pmid,
    account_name: AccountName,
    kad_ops: Arc<dyn KadOps>,
    clock: Arc<dyn Clock>,
    options: AccountHolderOptions,
    state: Arc<Mutex<GroupState>>,
    idle: Arc<Notify>,
}

impl std::fmt::Debug for AccountHolderGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHolderGroup")
            .field("pmid", &self.pmid)
            .field("account_name", &self.account_name)
            .field("options", &self.options)
            .finish()
    }
}

impl AccountHolderGroup {
    pub fn new(
        pmid: Pmid,
        hasher: &dyn IdHasher,
        kad_ops: Arc<dyn KadOps>,
        clock: Arc<dyn Clock>,
        options: AccountHolderOptions,
    ) -> Self {
        let account_name = account_name(hasher, &pmid);
        Self {
            pmid,
            account_name,
            kad_ops,
            clock,
            options,
            state: Arc::new(Mutex::new(GroupState::default())),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn account_name(&self) -> &AccountName {
        &self.account_name
    }

    pub async fn group(&self) -> Vec<Contact> {
        self.state.lock().await.group.clone()
    }

    /// First population of the group; same machinery as any other refresh.
    pub async fn init(&self, callback: GroupCallback) {
        self.update_group(callback).await;
    }

    /// Refresh the group with one k-closest lookup for the account name.
    /// The callback fires exactly once: with the new group minus ourselves
    /// on success, with the lookup failure and an empty group otherwise.
    pub async fn update_group(&self, callback: GroupCallback) {
        {
            let mut state = self.state.lock().await;
            state.failed.clear();
            state.update_in_progress = true;
        }

        let result = self.kad_ops.find_k_closest(self.account_name.id()).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(contacts) => {
                // We cannot hold our own account.
                state.group = contacts
                    .into_iter()
                    .filter(|c| c.pmid != self.pmid)
                    .collect();
                state.last_update = self.clock.epoch_seconds();
                let group = state.group.clone();
                drop(state);
                callback(Ok(group));
            }
            Err(e) => {
                warn!(account = %self.account_name, error = %e, "account holder lookup failed");
                drop(state);
                callback(Err(e));
            }
        }

        let mut state = self.state.lock().await;
        state.update_in_progress = false;
        drop(state);
        self.idle.notify_waiters();
    }

    /// Record a failed interaction with a current group member. Ignored
    /// while an update is in flight or when the pmid is not in the group;
    /// otherwise, crossing any refresh threshold launches a background
    /// update.
    pub async fn report_failure(&self, failed_pmid: &Pmid) {
        {
            let mut state = self.state.lock().await;
            if state.update_in_progress {
                return;
            }
            if !state.group.iter().any(|c| c.pmid == *failed_pmid) {
                return;
            }
            *state.failed.entry(*failed_pmid).or_insert(0) += 1;
        }
        if self.update_required().await {
            debug!(pmid = %failed_pmid, "failure threshold crossed, refreshing account holders");
            let this = self.clone();
            tokio::spawn(async move {
                this.update_group(Box::new(|_| {})).await;
            });
        }
    }

    /// Whether the group is due a refresh: too old, too many distinct
    /// failed members, or one member failing repeatedly.
    pub async fn update_required(&self) -> bool {
        let now = self.clock.epoch_seconds();
        let state = self.state.lock().await;
        if now >= state.last_update.saturating_add(self.options.max_update_interval_secs) {
            return true;
        }
        if state.failed.len() >= self.options.max_failed_nodes {
            return true;
        }
        state
            .failed
            .values()
            .any(|count| *count >= self.options.max_fails_per_node)
    }

    /// Wait until no update lookup is in flight. The barrier the C++
    /// destructor provided, made explicit.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.state.lock().await.update_in_progress {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha512IdHasher;
    use crate::time::FrozenClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vaultex_model::{ID_SIZE, Id};

    struct ScriptedKadOps {
        lookups: AtomicUsize,
        contacts: Vec<Contact>,
        fail_with: Option<VaultError>,
    }

    #[async_trait]
    impl KadOps for ScriptedKadOps {
        async fn find_k_closest(&self, _target: &Id) -> Result<Vec<Contact>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(e) => Err(e),
                None => Ok(self.contacts.clone()),
            }
        }
    }

    fn pmid(seed: u8) -> Pmid {
        Pmid::new(Id::from_bytes([seed; ID_SIZE]))
    }

    fn group_with(
        contacts: Vec<Contact>,
        fail_with: Option<VaultError>,
    ) -> (Arc<ScriptedKadOps>, Arc<FrozenClock>, AccountHolderGroup) {
        let kad_ops = Arc::new(ScriptedKadOps {
            lookups: AtomicUsize::new(0),
            contacts,
            fail_with,
        });
        let clock = Arc::new(FrozenClock::at(1_000_000));
        let group = AccountHolderGroup::new(
            pmid(1),
            &Sha512IdHasher,
            kad_ops.clone(),
            clock.clone(),
            AccountHolderOptions::default(),
        );
        (kad_ops, clock, group)
    }

    #[tokio::test]
    async fn init_populates_group_minus_self() {
        let contacts = vec![
            Contact::new(pmid(1)),
            Contact::new(pmid(2)),
            Contact::new(pmid(3)),
        ];
        let (_, _, group) = group_with(contacts, None);
        let (tx, rx) = std::sync::mpsc::channel();
        group
            .init(Box::new(move |result| {
                let _ = tx.send(result);
            }))
            .await;
        let delivered = rx.try_recv().unwrap().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|c| c.pmid != pmid(1)));
        assert_eq!(group.group().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_lookup_reports_empty_group() {
        let (_, _, group) = group_with(Vec::new(), Some(VaultError::FindNodesFailure));
        let (tx, rx) = std::sync::mpsc::channel();
        group
            .update_group(Box::new(move |result| {
                let _ = tx.send(result);
            }))
            .await;
        assert_eq!(rx.try_recv().unwrap(), Err(VaultError::FindNodesFailure));
        assert!(group.group().await.is_empty());
    }

    #[tokio::test]
    async fn update_required_after_interval() {
        let (_, clock, group) = group_with(vec![Contact::new(pmid(2))], None);
        group.update_group(Box::new(|_| {})).await;
        assert!(!group.update_required().await);
        clock.advance(AccountHolderOptions::default().max_update_interval_secs);
        assert!(group.update_required().await);
    }

    #[tokio::test]
    async fn repeated_failures_of_one_node_trigger_refresh() {
        let (kad_ops, _, group) = group_with(vec![Contact::new(pmid(2))], None);
        group.update_group(Box::new(|_| {})).await;
        assert_eq!(kad_ops.lookups.load(Ordering::SeqCst), 1);

        for _ in 0..AccountHolderOptions::default().max_fails_per_node {
            group.report_failure(&pmid(2)).await;
        }
        // Let the spawned background refresh run before observing.
        tokio::task::yield_now().await;
        group.wait_idle().await;
        assert_eq!(kad_ops.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_of_unknown_nodes_are_ignored() {
        let (kad_ops, _, group) = group_with(vec![Contact::new(pmid(2))], None);
        group.update_group(Box::new(|_| {})).await;
        for _ in 0..10 {
            group.report_failure(&pmid(9)).await;
        }
        tokio::task::yield_now().await;
        group.wait_idle().await;
        assert_eq!(kad_ops.lookups.load(Ordering::SeqCst), 1);
    }
}
