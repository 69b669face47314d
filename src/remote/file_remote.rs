use crate::{
    config::IndexPolicy,
    domain::{Board, BoardId, ColumnId, ColumnValue, GroupId, ItemId, StatusLabel},
    error::{Result, SyncError},
    remote::{RemoteBoard, RemoteCall},
    sync::store::BoardStateStore,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

/// Remote backed by JSON board files in a directory.
///
/// Useful for working offline against a board exported to disk. Each write
/// is a read-modify-write of the board file, serialized by an async mutex.
pub struct JsonFileRemote {
    root_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRemote {
    const BOARDS_DIR: &'static str = "boards";

    /// Creates a remote rooted at `root`; boards live in `root/boards/<id>.json`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root_path: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn boards_dir(&self) -> PathBuf {
        self.root_path.join(Self::BOARDS_DIR)
    }

    fn board_file(&self, id: &BoardId) -> PathBuf {
        self.boards_dir().join(format!("{}.json", id.as_str()))
    }

    async fn ensure_directory_exists(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    /// Writes a board file, creating the directory layout if needed
    pub async fn save_board(&self, board: &Board) -> Result<()> {
        self.ensure_directory_exists(&self.boards_dir()).await?;

        let json = serde_json::to_string_pretty(board)?;
        fs::write(self.board_file(&board.id), json).await?;
        Ok(())
    }

    async fn load_board(&self, board_id: &BoardId) -> Result<Board> {
        let file_path = self.board_file(board_id);

        if !file_path.exists() {
            return Err(SyncError::BoardNotFound(board_id.to_string()));
        }

        let contents = fs::read_to_string(&file_path).await?;
        let board: Board = serde_json::from_str(&contents)?;
        board.validate()?;
        Ok(board)
    }

    /// Board ids with a file on disk
    pub async fn list_board_ids(&self) -> Result<Vec<BoardId>> {
        let boards_dir = self.boards_dir();

        if !boards_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&boards_dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(BoardId::new(stem));
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Finds the board file owning an entity. Writes carry entity ids only,
    /// so the single-board case is by far the common one.
    async fn owning_board(&self) -> Result<BoardId> {
        let ids = self.list_board_ids().await?;
        match ids.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(SyncError::RemoteRejected("no board stored".to_string())),
            _ => Err(SyncError::RemoteRejected(
                "directory holds several boards; use one directory per board".to_string(),
            )),
        }
    }

    async fn write(&self, call: RemoteCall) -> Result<Option<ItemId>> {
        let _guard = self.write_lock.lock().await;
        let board_id = self.owning_board().await?;
        let board = self.load_board(&board_id).await?;

        let mut store = BoardStateStore::new(board, IndexPolicy::Clamp);
        let created =
            call.apply_authoritative(&mut store, || ItemId::new(Uuid::new_v4().to_string()))?;
        self.save_board(store.board()).await?;
        log::debug!("[boardsync.remote.file] Applied {} to board {}", call.kind(), board_id);
        Ok(created)
    }
}

#[async_trait]
impl RemoteBoard for JsonFileRemote {
    async fn fetch_board(&self, board_id: &BoardId) -> Result<Board> {
        self.load_board(board_id).await
    }

    async fn create_item(
        &self,
        group_id: &GroupId,
        name: &str,
        values: &HashMap<String, ColumnValue>,
    ) -> Result<ItemId> {
        let call = RemoteCall::CreateItem {
            group_id: group_id.clone(),
            name: name.to_string(),
            values: values.clone(),
        };
        self.write(call)
            .await?
            .ok_or_else(|| SyncError::RemoteRejected("create returned no id".to_string()))
    }

    async fn rename_item(&self, item_id: &ItemId, name: &str) -> Result<()> {
        self.write(RemoteCall::RenameItem {
            item_id: item_id.clone(),
            name: name.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn set_column_value(
        &self,
        item_id: &ItemId,
        column_key: &str,
        value: Option<&ColumnValue>,
    ) -> Result<()> {
        self.write(RemoteCall::SetColumnValue {
            item_id: item_id.clone(),
            column_key: column_key.to_string(),
            value: value.cloned(),
        })
        .await
        .map(|_| ())
    }

    async fn move_item(&self, item_id: &ItemId, target_group: &GroupId) -> Result<()> {
        self.write(RemoteCall::MoveItem {
            item_id: item_id.clone(),
            target_group: target_group.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_items(&self, group_id: &GroupId, ordered: &[ItemId]) -> Result<()> {
        self.write(RemoteCall::ReorderItems {
            group_id: group_id.clone(),
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_groups(&self, ordered: &[GroupId]) -> Result<()> {
        self.write(RemoteCall::ReorderGroups {
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn reorder_columns(&self, ordered: &[ColumnId]) -> Result<()> {
        self.write(RemoteCall::ReorderColumns {
            order: ordered.to_vec(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_item(&self, item_id: &ItemId) -> Result<()> {
        self.write(RemoteCall::DeleteItem {
            item_id: item_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_group(&self, group_id: &GroupId) -> Result<()> {
        self.write(RemoteCall::DeleteGroup {
            group_id: group_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn delete_column(&self, column_id: &ColumnId) -> Result<()> {
        self.write(RemoteCall::DeleteColumn {
            column_id: column_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn rename_group(&self, group_id: &GroupId, title: &str) -> Result<()> {
        self.write(RemoteCall::RenameGroup {
            group_id: group_id.clone(),
            title: title.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn add_status_label(&self, column_id: &ColumnId, label: &StatusLabel) -> Result<()> {
        self.write(RemoteCall::AddStatusLabel {
            column_id: column_id.clone(),
            label: label.clone(),
        })
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Group, Item};
    use tempfile::TempDir;

    fn board() -> Board {
        let mut board = Board::new(BoardId::new("team"), "Team");
        let mut group = Group::new(GroupId::new("g1"), "Todo", "#fff");
        group.items.push(Item::new(ItemId::new("i1"), GroupId::new("g1"), "Write docs"));
        group.items.push(Item::new(ItemId::new("i2"), GroupId::new("g1"), "Cut release"));
        board.groups.push(group);
        board
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::new(temp_dir.path());
        remote.save_board(&board()).await.unwrap();

        let loaded = remote.fetch_board(&BoardId::new("team")).await.unwrap();
        assert_eq!(loaded, board());
        assert_eq!(remote.list_board_ids().await.unwrap(), vec![BoardId::new("team")]);
    }

    #[tokio::test]
    async fn test_fetch_missing_board() {
        let temp_dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::new(temp_dir.path());
        let err = remote.fetch_board(&BoardId::new("nope")).await.unwrap_err();
        assert!(matches!(err, SyncError::BoardNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_file_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::new(temp_dir.path());
        fs::create_dir_all(remote.boards_dir()).await.unwrap();
        fs::write(remote.board_file(&BoardId::new("team")), "{\"id\": 3")
            .await
            .unwrap();

        let err = remote.fetch_board(&BoardId::new("team")).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[tokio::test]
    async fn test_writes_persist() {
        let temp_dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::new(temp_dir.path());
        remote.save_board(&board()).await.unwrap();

        remote.rename_item(&ItemId::new("i1"), "Write more docs").await.unwrap();
        remote
            .reorder_items(&GroupId::new("g1"), &[ItemId::new("i2"), ItemId::new("i1")])
            .await
            .unwrap();
        let created = remote
            .create_item(&GroupId::new("g1"), "Celebrate", &HashMap::new())
            .await
            .unwrap();

        let reopened = JsonFileRemote::new(temp_dir.path());
        let loaded = reopened.fetch_board(&BoardId::new("team")).await.unwrap();
        let names: Vec<_> = loaded.groups[0].items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Cut release", "Write more docs", "Celebrate"]);
        assert_eq!(loaded.groups[0].items[2].id, created);
    }

    #[tokio::test]
    async fn test_unknown_item_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::new(temp_dir.path());
        remote.save_board(&board()).await.unwrap();

        let err = remote.delete_item(&ItemId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteRejected(_)));
    }
}
