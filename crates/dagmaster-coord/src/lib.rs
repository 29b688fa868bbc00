//! Cluster coordination for the dagmaster execution core: a typed client over
//! a ZooKeeper-class coordination store, a distributed mutex recipe built on
//! top of it, and the failover controller that uses both.

mod alerter;
mod circuit_breaker;
mod cluster_controller;
mod coord_service;
mod errors;
mod memory;
mod mutex;
mod stopper;
mod zk;

pub use alerter::LoggingAlerter;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cluster_controller::{ClusterController, ClusterControllerConfig, HeartbeatPayload, ZkNodeType};
pub use coord_service::{CoordService, WatchEvent};
pub use errors::{CoordError, CoordResult};
pub use memory::InMemoryCoordService;
pub use mutex::{DistributedMutex, DistributedMutexGuard};
pub use stopper::Stopper;
pub use zk::ZkCoordService;
