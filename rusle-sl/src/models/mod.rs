//! Data models for rusle-sl (soil loss microservice)

pub mod aoi;
pub mod date_range;
pub mod export;
pub mod factor;
pub mod job;
pub mod session;

pub use aoi::{AoiSource, AreaOfInterest};
pub use date_range::DateRange;
pub use export::ExportRequest;
pub use factor::{DemSource, DerivationRecipe, Factor, FactorOverride, FactorSource, FactorSpec};
pub use job::{
    JobArtifacts, JobFailure, JobStatus, SoilLossJob, SoilLossStatistics, StateTransition,
    TileReference,
};
pub use session::UploadSession;
