//! # VendHub Inventory
//! Ingredient bunkers (fill, install, remove, weigh, low stock) and the
//! machine fleet (registration and status changes).

pub mod bunkers;
pub mod machines;

pub use bunkers::InventoryService;
pub use machines::MachineService;
