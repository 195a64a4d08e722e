//! Built-in middleware
//!
//! | name                          | effect                                      |
//! |-------------------------------|---------------------------------------------|
//! | `authenticate`                | bearer token to `ctx.auth`, 401 otherwise   |
//! | `require_role:<role>`         | 401 anonymous, 403 other roles              |
//! | `parse_json`                  | body to `ctx.resource`, 400 if malformed    |
//! | `validate:<schema>`           | resource to `ctx.validated`, 400 if invalid |
//! | `authorize:<schema>:<action>` | principal check against schema permissions  |
//! | `observe`                     | request log line and `x-request-id` header  |

pub mod auth;
pub mod authorize;
pub mod observe;
pub mod parse;
pub mod validate;

pub use auth::{AuthenticateMiddleware, RequireRole};
pub use authorize::AuthorizeMiddleware;
pub use observe::ObserveMiddleware;
pub use parse::ParseJson;
pub use validate::ValidateMiddleware;
