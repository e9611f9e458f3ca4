//! Routing layer: decide, bridge, deliver.
//!
//! - [`router`]: local-vs-remote decisions and group partitioning
//! - [`relay`]: bus subscription → dispatcher
//! - [`dispatcher`]: bounded queue → local connections

pub mod dispatcher;
pub mod errors;
pub mod relay;
pub mod router;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherHandle};
pub use errors::{DispatchError, RouteError};
pub use relay::{Relay, RelayOutcome};
pub use router::{Delivery, RoutePlan, RouteReport, Router};
