//! Domain types shared by every component: references, models, versions,
//! files and declared hashes.

mod model;
mod reference;

pub use model::*;
pub use reference::*;
