use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::models::OfferLineModel;
use super::repository::OfferRepository;
use crate::profile::ItemStack;
use crate::shared::AppError;

/// One queued remote reconciliation step.
#[derive(Debug)]
enum OfferOp {
    Add {
        item_name: String,
        item_rarity: String,
    },
    Remove {
        item_name: String,
    },
}

/// Optimistic offer editing for one owner in one trade session.
///
/// Every edit applies to the local line list immediately (zero-latency
/// UI) and enqueues a remote read-modify-write onto a single worker
/// task. The worker executes steps strictly in submission order, so an
/// owner's rapid add/add/remove sequence can never interleave with
/// itself and lose writes. Cross-client interleaving is impossible by
/// construction: only a line's owner ever mutates it.
///
/// The queue deliberately outlives any UI surface: it is torn down by
/// dropping the reconciler (the worker drains what was already queued)
/// or by [`close`], which waits for the drain.
///
/// [`close`]: OfferReconciler::close
pub struct OfferReconciler {
    session_id: String,
    owner_nickname: String,
    local: Mutex<HashMap<String, ItemStack>>,
    local_tx: watch::Sender<Vec<ItemStack>>,
    ops_tx: mpsc::UnboundedSender<OfferOp>,
    worker: JoinHandle<()>,
}

impl OfferReconciler {
    pub fn new(
        session_id: &str,
        owner_nickname: &str,
        offers: Arc<dyn OfferRepository>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (local_tx, _) = watch::channel(Vec::new());

        let worker = tokio::spawn(run_worker(
            session_id.to_string(),
            owner_nickname.to_string(),
            offers,
            ops_rx,
        ));

        Self {
            session_id: session_id.to_string(),
            owner_nickname: owner_nickname.to_string(),
            local: Mutex::new(HashMap::new()),
            local_tx,
            ops_tx,
            worker,
        }
    }

    /// Adds one of an item to the offer: local list first, then the
    /// queued remote step.
    #[instrument(skip(self))]
    pub fn add_item(&self, item_name: &str, item_rarity: &str) {
        {
            let mut local = self.local.lock().unwrap();
            local
                .entry(item_name.to_string())
                .and_modify(|stack| stack.quantity += 1)
                .or_insert_with(|| ItemStack {
                    item_name: item_name.to_string(),
                    item_rarity: item_rarity.to_string(),
                    quantity: 1,
                });
            self.publish_local(&local);
        }

        let _ = self.ops_tx.send(OfferOp::Add {
            item_name: item_name.to_string(),
            item_rarity: item_rarity.to_string(),
        });
    }

    /// Removes one of an item from the offer. Removing an item that is
    /// not offered is a no-op, locally and remotely.
    #[instrument(skip(self))]
    pub fn remove_item(&self, item_name: &str) {
        let had_item = {
            let mut local = self.local.lock().unwrap();
            match local.get_mut(item_name) {
                Some(stack) => {
                    stack.quantity -= 1;
                    if stack.quantity == 0 {
                        local.remove(item_name);
                    }
                    self.publish_local(&local);
                    true
                }
                None => false,
            }
        };

        if had_item {
            let _ = self.ops_tx.send(OfferOp::Remove {
                item_name: item_name.to_string(),
            });
        } else {
            debug!(item = %item_name, "Nothing to remove from offer");
        }
    }

    /// The owner's optimistic offer lines, updated before any remote
    /// confirmation.
    pub fn local_lines(&self) -> watch::Receiver<Vec<ItemStack>> {
        self.local_tx.subscribe()
    }

    pub fn current_local(&self) -> Vec<ItemStack> {
        let local = self.local.lock().unwrap();
        Self::sorted(&local)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn owner_nickname(&self) -> &str {
        &self.owner_nickname
    }

    /// Waits until every queued remote step has been applied, then
    /// tears the worker down.
    pub async fn close(self) {
        drop(self.ops_tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Offer worker ended abnormally");
        }
    }

    fn publish_local(&self, local: &HashMap<String, ItemStack>) {
        let _ = self.local_tx.send(Self::sorted(local));
    }

    fn sorted(local: &HashMap<String, ItemStack>) -> Vec<ItemStack> {
        let mut lines: Vec<ItemStack> = local.values().cloned().collect();
        lines.sort_by(|a, b| a.item_name.cmp(&b.item_name));
        lines
    }
}

async fn run_worker(
    session_id: String,
    owner_nickname: String,
    offers: Arc<dyn OfferRepository>,
    mut ops_rx: mpsc::UnboundedReceiver<OfferOp>,
) {
    info!(session_id = %session_id, owner = %owner_nickname, "Offer worker started");

    // Each step awaits completion before the next begins; this loop is
    // the serialization.
    while let Some(op) = ops_rx.recv().await {
        if let Err(e) = apply_op(&session_id, &owner_nickname, offers.as_ref(), &op).await {
            // No retry: the local list and the store diverge until the
            // owner edits again, same as any other transient failure.
            warn!(
                session_id = %session_id,
                owner = %owner_nickname,
                op = ?op,
                error = %e,
                "Offer reconciliation step failed"
            );
        }
    }

    debug!(session_id = %session_id, owner = %owner_nickname, "Offer worker drained");
}

async fn apply_op(
    session_id: &str,
    owner_nickname: &str,
    offers: &dyn OfferRepository,
    op: &OfferOp,
) -> Result<(), AppError> {
    match op {
        OfferOp::Add {
            item_name,
            item_rarity,
        } => {
            match offers.get_line(session_id, owner_nickname, item_name).await? {
                Some(line) => {
                    offers.set_quantity(&line.id, line.quantity + 1).await?;
                }
                None => {
                    let line = OfferLineModel::new(
                        session_id.to_string(),
                        owner_nickname.to_string(),
                        item_name.to_string(),
                        item_rarity.to_string(),
                        1,
                    );
                    offers.insert_line(&line).await?;
                }
            }
        }
        OfferOp::Remove { item_name } => {
            match offers.get_line(session_id, owner_nickname, item_name).await? {
                Some(line) if line.quantity > 1 => {
                    offers.set_quantity(&line.id, line.quantity - 1).await?;
                }
                Some(line) => {
                    offers.delete_line(&line.id).await?;
                }
                None => {}
            }
        }
    }
    Ok(())
}
