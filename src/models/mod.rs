pub mod decision;
pub mod duplicate;
pub mod inventory;
pub mod job;
pub mod manifest;
pub mod plan;
pub mod version;
