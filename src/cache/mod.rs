//! Named cache regions for HTTP responses.
//!
//! One region per resource class (shell documents, images, map tiles).
//! Region names carry a version; activation drops every region whose
//! name is no longer current.

mod key;
mod regions;

pub use key::{image_key, request_key};
pub use regions::{CacheRegion, RegionInfo, RegionStorage};
