pub mod placeable;

pub use self::placeable::*;
