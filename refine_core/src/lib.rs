//! `refine_core`: Iterative stitching of broken track fragments.
//!
//! # Module layout
//! - [`types`]: Hits, clusters and their identifiers
//! - [`cluster_store`]: Event-wide cluster arena and atomic re-partitioning
//! - [`config`]: Refinement thresholds
//! - [`working_set`]: Fitted candidate clusters and the curviness filter
//! - [`association`]: Connecting-line geometry, extrapolated hits, merge points
//! - [`continuity`]: Segment-by-segment gap check along a connecting line
//! - [`track_builder`]: Splitting at merge points, folding in donor hits
//! - [`remnants`]: Fragmentation and absorption of leftover pieces
//! - [`policy`]: Association policy trait
//! - [`endpoint_policy`]: Endpoint-to-endpoint policy
//! - [`refinement`]: Refinement loop orchestrator
//! - [`metrics`]: Batch statistics
//! - [`error`]: Error types

pub mod association;
pub mod cluster_store;
pub mod config;
pub mod continuity;
pub mod endpoint_policy;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod refinement;
pub mod remnants;
pub mod track_builder;
pub mod types;
pub mod working_set;

pub use association::{Association, ClusterAssociation, ExtrapolatedHitSet, MergePoint};
pub use cluster_store::{ClusterStore, Partition};
pub use config::RefinementConfig;
pub use endpoint_policy::{EndpointAssociation, EndpointPolicy, EndpointPolicyConfig};
pub use error::{RefinementError, RefinementResult};
pub use metrics::RefinementMetrics;
pub use policy::{AssociationPolicy, MainTrackOutcome, RefinementContext};
pub use refinement::{RefinementReport, Termination, TrackRefinement};
pub use types::{Cluster, ClusterId, Hit, HitId, Vec2};
pub use working_set::{TrackedCluster, WorkingSet};
