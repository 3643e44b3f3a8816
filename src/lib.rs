//! # quiesce
//!
//! **Quiesce** instruments an event-driven host so an external observer can
//! tell when all outstanding asynchronous work — timers, network calls,
//! animations, dynamically loaded resources — has settled.
//!
//! Automated interaction with a callback-driven program is racy by nature:
//! the program is "done" only when nothing it scheduled is still pending.
//! Quiesce wraps every asynchronous entry point the host exposes, opens one
//! task handle with an external counter per unit of pending work, closes it
//! exactly once when that work settles, and can be removed again without a
//! trace.
//!
//! ## Architecture
//! ```text
//!             install(host, wait, config)
//!                        │
//!        ┌───────────────┼──────────────────────┐
//!        ▼               ▼                      ▼
//!  PatchRegistry   entry-point wrappers   MutationWatcher
//!  (owns patches)  ┌─────────────────┐    (tree walking)
//!                  │ Timer Tracker   │          │
//!                  │ Network Tracker │          ▼
//!                  │ Resource Loads  │    MotionTracker
//!                  │ animate() wrap  │    (per-element listeners)
//!                  └────────┬────────┘
//!                           │ open / close, balanced per unit of work
//!                           ▼
//!                  WaitCounter::start() ──► TaskHandle::end()
//!                           │
//!                           ▼
//!              WaitPoint::ready() resolves at zero
//! ```
//!
//! ## Tracking rules
//! | Source            | Tracked when…                                               |
//! |-------------------|-------------------------------------------------------------|
//! | Deferred timers   | delay below `max_timeout` and not recursive self-reschedule |
//! | Immediate timers  | not recursive self-reschedule (never filtered by time)      |
//! | Promise requests  | target not blacklisted                                      |
//! | Request objects   | target not blacklisted; one handle per instance             |
//! | Motion            | iteration count finite (unbounded motion never settles)     |
//! | Script/style      | still loading when observed; loaded ones are accounted      |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use quiesce::{install, Config, Host, TimerCallback, WaitPoint};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Host::new();
//!     let wait = WaitPoint::new();
//!
//!     let session = install(&host, Arc::new(wait.clone()), Config::default())?;
//!
//!     // Host code keeps calling the entry points it always called.
//!     let cb: TimerCallback = Arc::new(|| Ok(()));
//!     let _id = host.set_timeout(cb, Duration::from_millis(50));
//!
//!     // The observer waits for quiescence instead of sleeping and hoping.
//!     wait.ready().await;
//!
//!     session.restore();
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pending;
mod track;
mod wait;

pub mod host;

// ---- Public re-exports ----

pub use config::{BlacklistRule, Config};
pub use error::{HostError, InstrumentError};
pub use track::{Instrumentation, install};
pub use wait::{TaskHandle, WaitCounter, WaitPoint};

pub use host::{
    AnimateOptions, Animation, AnimationSignal, Document, Element, FetchRequest, FetchResponse,
    Host, HostBuilder, HttpRequest, Iterations, LoadState, Method, MotionEventNames, MotionKind,
    MotionStyle, ReadyState, Tag, TimerCallback, TimerId, VendorFlavor,
};
