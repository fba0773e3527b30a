mod auth;
mod db;
mod pubsub;
mod rooms;
mod util;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use auth::*;
pub use db::*;
pub use pubsub::*;
pub use rooms::*;

use marquee_core::Coordinator;

/// The marquee collab system, facilitating accounts, room management, and the coordinator they feed.
pub struct Collab<Db> {
    pub coordinator: Arc<Coordinator>,
    pub database: Arc<Db>,

    pub auth: Auth<Db>,
    pub rooms: RoomManager<Db>,
}

impl<Db> Collab<Db>
where
    Db: Database,
{
    /// Creates the collab system. The coordinator is expected to use `database` as its store.
    pub fn new(coordinator: Coordinator, database: Arc<Db>) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            auth: Auth::new(&database),
            rooms: RoomManager::new(&database),
            database,
        }
    }
}
