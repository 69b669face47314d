//! Client-minted item ids.
//!
//! A created item lives under a `tmp-` id until the remote answers. Writes
//! aimed at it wait here for that answer and then go out under the server
//! id, or are dropped when the create failed.

use crate::domain::ItemId;
use crate::error::{Result, SyncError};
use crate::remote::RemoteCall;
use crate::sync::store::SharedStore;

/// What became of a provisional item id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisional {
    /// The create is still on its way
    Pending,
    /// The remote confirmed the create under this id
    Adopted(ItemId),
    /// The create failed; the item never existed remotely
    Abandoned,
}

impl SharedStore {
    /// Waits until the create behind `item_id` has settled and returns the
    /// id the remote knows the item by. Ids that were never provisional
    /// come back unchanged.
    pub async fn settled_item_id(&self, item_id: &ItemId) -> Result<ItemId> {
        // Subscribe before looking so a settlement in between is not missed.
        let mut settlements = self.settlements();
        loop {
            match self.read(|s| s.provisional_state(item_id).cloned()) {
                None => return Ok(item_id.clone()),
                Some(Provisional::Adopted(server_id)) => return Ok(server_id),
                Some(Provisional::Abandoned) => {
                    return Err(SyncError::ItemNotFound(item_id.to_string()))
                }
                Some(Provisional::Pending) => {
                    log::debug!("[boardsync.provisional] Holding write for {}", item_id);
                }
            }
            if settlements.changed().await.is_err() {
                return Err(SyncError::ItemNotFound(item_id.to_string()));
            }
        }
    }

    /// Rewrites every item id in `call` to the one the remote knows.
    ///
    /// A full item order silently loses entries whose create failed; any
    /// other call aimed at such an item fails with `ItemNotFound`.
    pub(crate) async fn settle_call(&self, call: RemoteCall) -> Result<RemoteCall> {
        let call = match call {
            RemoteCall::RenameItem { item_id, name } => RemoteCall::RenameItem {
                item_id: self.settled_item_id(&item_id).await?,
                name,
            },
            RemoteCall::SetColumnValue {
                item_id,
                column_key,
                value,
            } => RemoteCall::SetColumnValue {
                item_id: self.settled_item_id(&item_id).await?,
                column_key,
                value,
            },
            RemoteCall::MoveItem {
                item_id,
                target_group,
            } => RemoteCall::MoveItem {
                item_id: self.settled_item_id(&item_id).await?,
                target_group,
            },
            RemoteCall::DeleteItem { item_id } => RemoteCall::DeleteItem {
                item_id: self.settled_item_id(&item_id).await?,
            },
            RemoteCall::ReorderItems { group_id, order } => {
                let mut settled = Vec::with_capacity(order.len());
                for item_id in order {
                    match self.settled_item_id(&item_id).await {
                        Ok(item_id) => settled.push(item_id),
                        Err(_) => log::debug!(
                            "[boardsync.provisional] Dropping {} from order of {}",
                            item_id,
                            group_id
                        ),
                    }
                }
                RemoteCall::ReorderItems {
                    group_id,
                    order: settled,
                }
            }
            other => other,
        };
        Ok(call)
    }
}
