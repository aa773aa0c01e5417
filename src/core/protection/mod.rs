// Core protection module - raid and spam detection plus the punishment workflow.
// Following the same pattern as the other core modules: models, ports, service.

pub mod protection_models;
pub mod protection_ports;
pub mod protection_registry;
pub mod protection_service;
pub mod punishment_coordinator;
pub mod raid_detector;
pub mod spam_detector;
pub mod windowed_counter;

pub use protection_models::*;
pub use protection_ports::*;
pub use protection_service::ProtectionService;
