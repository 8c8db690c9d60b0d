//! Resilient request/reply invocation between services.
//!
//! Every outbound call goes through an [`RpcInvoker`], which resolves the
//! target service's [`RpcChannel`] from a [`ServiceRegistry`] and runs the
//! call under a circuit breaker keyed by `(service, action)`:
//!
//! ```text
//! Closed ──(failure % > threshold)──► Open ──(reset timeout)──► HalfOpen
//!   ▲                                  ▲                           │
//!   └────────────(trial succeeds)──────┼───────────────────────────┤
//!                                      └──────(trial fails)────────┘
//! ```
//!
//! Breakers are created lazily, shared by every caller in the process and
//! kept in a bounded [`BreakerRegistry`].

pub mod breaker;
pub mod channel;
pub mod error;
pub mod events;
pub mod invoker;
pub mod memory;
pub mod options;
pub mod registry;
pub mod services;

pub use breaker::{BreakerKey, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use channel::{ChannelError, RpcChannel};
pub use error::{InvokerError, Result};
pub use events::{BreakerEvent, BreakerEventKind};
pub use invoker::RpcInvoker;
pub use memory::{InMemoryChannel, RecordedCall};
pub use options::{InvokeOptions, RegistryConfig};
pub use registry::{BreakerRegistry, BreakerSummary};
pub use services::ServiceRegistry;
