#![deny(missing_docs)]
//! Streaming, composable middleware for AI-agent data flows.
//!
//! The central abstraction is a [`Handler`]: a unit that consumes a byte
//! stream and produces a byte stream. Handlers are appended to a [`Flow`],
//! which runs them as a concurrent pipeline connected by bounded,
//! backpressured pipes; typed values enter and leave through the
//! [`convert`] bindings. The [`middleware`] module supplies composable
//! control flow: sequencing, branching, fan-out, timeouts, retries, rate
//! limiting, circuit-broken fallback, and request batching.
//!
//! ```
//! use axon::{CancellationToken, Flow, FlowError, handler_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FlowError> {
//! let flow = Flow::new().then(handler_fn(|mut req, mut res| async move {
//!     let input = req.read_all().await?;
//!     res.write_all(&input.to_ascii_uppercase()).await?;
//!     Ok(())
//! }));
//!
//! let mut out = String::new();
//! flow.run(&CancellationToken::new(), "hello", &mut out).await?;
//! assert_eq!(out, "HELLO");
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod error;
pub mod flow;
pub mod handler;
pub mod middleware;
pub mod request;
pub mod store;
pub mod stream;

pub use convert::{InputSource, Json, OutputTarget, Reader, SchemaJson, Writer, Yaml};
pub use error::{FlowError, StoreError};
pub use flow::{Concurrency, Flow, FlowConfig};
pub use handler::{Handler, HandlerFn, handler_fn};
pub use request::{Attachments, Request, Response};
pub use store::Store;
pub use stream::{BoxReader, BoxWriter};

pub use tokio_util::sync::CancellationToken;
