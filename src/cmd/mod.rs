//! CLI command implementations.
//!
//! | Module     | Command handled                    |
//! |------------|------------------------------------|
//! | `deploy`   | run the full deployment workflow   |
//! | `validate` | parse and validate the stack file  |
//! | `tunnel`   | hold open a metrics tunnel         |

pub mod deploy;
pub mod tunnel;
pub mod validate;

pub use deploy::cmd_deploy;
pub use tunnel::cmd_tunnel;
pub use validate::cmd_validate;
