//! Local leader election for in-process candidates.
//!
//! Several logical candidates registered into one process often need exactly
//! one of them to act as coordinator. Two of them both believing they lead
//! (split-brain) is the failure this crate exists to prevent.
//!
//! - [`ElectionRegistry`] holds one arbitration state machine per namespace.
//! - [`elect_coordinator`] turns a batch of candidates into a single winner.
//! - [`Contender`] exposes one candidate's seat through the [`Election`] trait.
//! - [`IdentifierAllocator`] produces sortable, collision-resistant ids.
//! - [`ResourceGovernor`] optionally gates elections behind load limits.
//!
//! This is a local arbitration primitive, not a distributed consensus
//! protocol: candidates on separate machines need a quorum protocol such as
//! Raft or a leased lock service in front of it.
//!
//! ```
//! use evarbiter::{Candidate, ElectionRegistry, elect_coordinator};
//!
//! let registry = ElectionRegistry::default();
//! let batch = [Candidate::new("p1", 100, 5.0), Candidate::new("p2", 50, 9.0)];
//! let leader = elect_coordinator(&registry, &batch, "workers").unwrap();
//! assert_eq!(leader.as_deref(), Some("p2"));
//! ```

pub mod candidate;
pub mod config;
pub mod election;
pub mod error;
pub mod governor;
pub mod id;
pub mod registry;
pub mod selector;
mod timer;
pub mod vote;

pub use candidate::Candidate;
pub use config::{AllocatorConfig, GovernorConfig, RegistryConfig};
pub use election::{Contender, Election};
pub use error::ElectionError;
pub use governor::{LoadSampler, ResourceGovernor, SystemSampler, ThrottleDecision, ThrottleReason};
pub use id::{IdDetails, IdKind, IdValidation, IdentifierAllocator, detect_collisions};
pub use registry::{ElectionRegistry, ElectionResult};
pub use selector::elect_coordinator;
