//! Per-repository Git HTTP surface for Rowgit.
//!
//! Exposes one repository session over the dumb endpoints (HEAD, ref
//! listing, loose objects, pack listing) and the smart receive-pack pair
//! (`GET /info/refs?service=git-receive-pack`, `POST /git-receive-pack`).

mod error;
mod routes;

pub use error::WebError;
pub use routes::repo_router;
