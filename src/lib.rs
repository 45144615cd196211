pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::algo::prelude::*;
    pub use super::io::prelude::*;
}

pub mod core;
pub mod algo;
pub mod io;
