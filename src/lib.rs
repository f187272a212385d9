pub mod api;
pub mod brain;
pub mod cell_state;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod registration;
pub mod types;

pub use api::{create_control_router, create_router};
pub use brain::{BrainClient, BrainRegistry, HttpBrainClient};
pub use cell_state::{CellStateClient, HttpCellStateClient};
pub use config::AuctioneerConfig;
pub use coordinator::{Coordinator, MemoryCoordinator, RaftCoordinator};
pub use daemon::Auctioneer;
pub use dispatcher::{AuctionRunner, DispatchReceipt, DispatchSettings, Dispatcher};
pub use registration::create_registration_router;
pub use types::*;
