//! Repository implementations for database operations

pub mod challenges;
pub mod directory;
pub mod participants;
pub mod rollups;
pub mod steps;

pub use challenges::*;
pub use directory::*;
pub use participants::*;
pub use rollups::*;
pub use steps::*;
