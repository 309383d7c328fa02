//! Repository traits for metadata operations.

pub mod images;
pub mod settings;

pub use images::ImageRepo;
pub use settings::SettingsRepo;
