pub mod settings;

pub use settings::{BusSettings, Settings, ENV_PREFIX};
