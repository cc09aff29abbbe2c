//! Event Sourcing Core
//!
//! - **`event`**: Replica and bid identities, auction events and the
//!   `EventEnvelope` replicated between logs.
//! - **`resolver`**: The deterministic total order used to rank concurrent bids.
//! - **`aggregate`**: The `Aggregate` trait and the auction state projector.

pub mod aggregate;
pub mod event;
pub mod resolver;

pub use aggregate::*;
pub use event::*;
pub use resolver::*;
