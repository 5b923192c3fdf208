/// Persistence collaborator interface.
///
/// Implementations: `MemoryBackend` (in-process), `RestStore` (hosted
/// backend over HTTP).
use async_trait::async_trait;
use scrumkit_core::positions::MovePlan;
use scrumkit_core::types::{BoardSettings, Column, Item, NewItem};

use crate::error::StoreError;

#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn list_columns(&self, board_id: &str) -> Result<Vec<Column>, StoreError>;

    /// Every item in every column of the board.
    async fn list_items(&self, board_id: &str) -> Result<Vec<Item>, StoreError>;

    /// Apply all position updates and the relocation of one drag as a
    /// single atomic write. Either everything lands or nothing does.
    async fn apply_move_plan(&self, plan: &MovePlan) -> Result<(), StoreError>;

    async fn insert_item(&self, item: &NewItem) -> Result<Item, StoreError>;

    async fn delete_item(&self, item_id: &str) -> Result<(), StoreError>;

    async fn read_settings(&self, board_id: &str) -> Result<BoardSettings, StoreError>;

    async fn write_settings(
        &self,
        board_id: &str,
        settings: &BoardSettings,
    ) -> Result<(), StoreError>;
}

/// Lightweight check that the auth session is still valid and the backend
/// reachable.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn check_session(&self) -> Result<(), StoreError>;
}
