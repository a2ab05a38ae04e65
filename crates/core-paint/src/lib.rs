//! Concurrent paint engine for the easel collaborative canvas.
//!
//! Ingests local and remote drawing commands, applies them to canvas
//! history on a dedicated paint thread (with batch coalescing for dab
//! bursts), composes a presentable view with local-only overlays each
//! tick, and fans dirty tiles out to a render worker pool.
//!
//! Pipeline at a glance:
//!
//! ```text
//! producers --handle_messages--> [ACL filter] --> local/remote queues
//!                                                        |
//!                                    paint thread <------+  (semaphore)
//!                                         |
//!                                         v
//!                                  canvas history
//!                                         |
//!                                         v  (compare_and_get)
//! tick thread --> view composer --> tile diff --> render worker pool
//! ```
//!
//! See `PaintEngine` for the thread contract.

mod dispatch;
mod engine;
mod observer;
mod preview;
mod render;
mod sync;
mod view;
mod worker;

pub use dispatch::{MAX_MULTIDAB_AREA, MAX_MULTIDAB_MESSAGES, message_dabs_area};
pub use engine::{MessageSource, PaintEngine};
pub use observer::{MetaObserver, NoopObserver, RenderTileFn, TickObserver};
pub use preview::{INSPECT_SUBLAYER_ID, PREVIEW_SUBLAYER_ID};
pub use sync::Semaphore;
pub use view::LayerViewMode;
pub use worker::WorkerPool;
