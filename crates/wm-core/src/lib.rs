//! Worker machine lifecycle orchestration.
//!
//! Client calls go through [`MachineService`], which records the requested
//! state and queues the first message of a workflow. [`Worker`] consumes the
//! queue and hands each message to [`MachineRequestHandler`], which drives the
//! providers and queues whatever comes next.

pub mod config;
pub mod dispatcher;
pub mod factory;
pub mod handlers;
pub mod recorder;
pub mod request;
pub mod retry;
pub mod service;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use config::{ConfigError, WorkerConfig};
pub use dispatcher::{ChannelQueue, DispatchDelays, DispatchError, MessageQueue, RequestDispatcher};
pub use factory::RequestFactory;
pub use handlers::{HandlerContext, HandlerError, MachineRequestHandler};
pub use recorder::FailureRecorder;
pub use request::{MachineRequest, RequestAction};
pub use retry::{RetryDecider, RetryLimits};
pub use service::{MachineService, MachineStatus, ServiceError};
pub use worker::{Worker, spawn_message_pruner};
