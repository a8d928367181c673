//! External service integrations.

pub mod kayzen_client {
    pub use crate::kayzen_client::*;
}

pub mod bigquery {
    pub use crate::bigquery::*;
}

pub mod gcp_auth {
    pub use crate::gcp_auth::*;
}

pub mod warehouse {
    pub use crate::warehouse::*;
}
