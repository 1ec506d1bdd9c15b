//! Control-flow middleware: composition, branching, fan-out, resilience.
//!
//! Everything in this module is an ordinary [`Handler`] and composes like
//! one. Handlers that must replay their input ([`Branch`], [`Retry`],
//! [`Fallback`], [`Batch`], and the inner links of a [`Chain`]) buffer it
//! in full; the rest stream.

mod batch;
mod branch;
mod chain;
mod fallback;
mod parallel;
mod pass_through;
mod rate_limit;
mod retry;
mod tee;
mod timeout;

pub use batch::{Batch, DEFAULT_BATCH_SEPARATOR};
pub use branch::Branch;
pub use chain::Chain;
pub use fallback::Fallback;
pub use parallel::{PARALLEL_SEPARATOR, Parallel};
pub use pass_through::PassThrough;
pub use rate_limit::RateLimit;
pub use retry::Retry;
pub use tee::Tee;
pub use timeout::Timeout;

use std::io::Cursor;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Attachments, Request, Response};
use crate::stream::{self, DEFAULT_PIPE_CAPACITY};

/// Run `handler` over an in-memory input, capturing its full output.
///
/// The handler writes into a bounded pipe that is drained concurrently in
/// the same task, so outputs larger than the pipe capacity cannot deadlock.
pub(crate) async fn run_buffered(
    handler: &Arc<dyn Handler>,
    ctx: &CancellationToken,
    attachments: &Attachments,
    input: Vec<u8>,
) -> Result<Vec<u8>, FlowError> {
    let (mut out_reader, out_writer) = stream::pipe(DEFAULT_PIPE_CAPACITY);
    let req = Request::with_attachments(
        ctx.clone(),
        Box::new(Cursor::new(input)),
        attachments.clone(),
    );
    let res = Response::new(Box::new(out_writer));
    let (served, drained) = tokio::join!(
        handler.serve(req, res),
        stream::read_all(ctx, &mut out_reader),
    );
    served?;
    drained
}
