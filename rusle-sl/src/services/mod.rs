//! Service modules for the soil loss workflow
//!
//! Resolver, provider and composer are pure and synchronous. The job manager
//! and session store own the shared in-memory state. Everything remote goes
//! through [`ComputeService`].

pub mod aoi_resolver;
pub mod boundary_catalog;
pub mod composer;
pub mod compute_client;
pub mod factor_provider;
pub mod job_manager;
pub mod scale_policy;
pub mod session_store;
pub mod visualization;

pub use aoi_resolver::{AoiInput, AoiResolver, ResolvedUpload};
pub use boundary_catalog::BoundaryCatalog;
pub use composer::{compose, CompositeExpression};
pub use compute_client::{ComputeError, ComputeService, HttpComputeClient};
pub use factor_provider::FactorProvider;
pub use job_manager::{JobLimits, JobManager, JobTiles, RemotePolicies, SubmitRequest};
pub use scale_policy::{effective_scale, EffectiveScale};
pub use session_store::SessionStore;
pub use visualization::{legend, Legend, LegendClass, MapConfig, MapLayer, VisParams};
