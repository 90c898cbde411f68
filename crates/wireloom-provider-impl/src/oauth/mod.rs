//! PKCE Login Flow (C3) and the concrete OAuth refresh implementation.

pub mod login;
pub mod pkce;
pub mod refresher;
