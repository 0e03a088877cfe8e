mod dirs;
mod settings;
mod validation;

pub use dirs::Directories;
pub use settings::{CacheSettings, ChannelSettings, Config, ConnectionSettings, UploadSettings};
pub use validation::{unknown_fields, warn_unknown_fields};
