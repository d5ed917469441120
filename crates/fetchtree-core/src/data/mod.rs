//! Data layer: configuration, the property bag and the resource handle.

mod config;
mod properties;
mod resource;

pub use config::FetchConfig;
pub use properties::{
    PR_CONTENT_DISPOSITION, PR_CONTENT_TYPE, PR_SIZE, PR_URL, Properties, REQUEST_PREFIX,
};
pub use resource::Resource;
