// Domain-layer modules and shared errors/models
pub mod loader {
    pub use crate::loader::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod errors {
    pub use crate::errors::*;
}
