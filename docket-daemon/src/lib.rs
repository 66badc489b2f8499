//! Docket daemon: one long-lived engine behind a Unix socket, plus the
//! blocking client the CLI uses to reach it.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    call, request_status, request_stop, send_request, DaemonRequest, DaemonResponse, FetchReply,
    ReleaseReply, VersionReply,
};
pub use runtime::{run, start_blocking, DaemonStatus};
