//! sushi-forms — application definitions to form schemas.
//!
//! Lists the `<Name>App` definitions in a directory, evaluates one inside a
//! restricted interpreter and extracts the parameter form a front end needs
//! to render it. Definitions are never handed to a general-purpose runtime.

pub mod cli;
pub mod core;
pub mod sandbox;
