//! Observable lifecycle event stream
//!
//! The controller publishes every state change of the active session on a
//! broadcast bus. The presentation layer subscribes and renders.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Controller  │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Every event carries the generation of the session that produced it, so a
//! [`SessionReceiver`] can ignore anything from a superseded session.

pub mod bus;
pub mod types;

pub use bus::{EventBus, SessionReceiver, SharedEventBus};
pub use types::{Generation, LifecycleEvent};
