pub mod markers;
pub mod photos;
pub mod symbology;
pub mod tracks;
pub mod viewer;

pub use markers::*;
pub use photos::*;
pub use symbology::*;
pub use tracks::*;
pub use viewer::*;
