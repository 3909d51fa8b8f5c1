pub mod battlecard;
pub mod geocode;
pub mod outcome;
pub mod tenant;

pub use battlecard::{Battlecard, Priority, Provenance, Section, Sections, StoredBattlecard, NOT_AVAILABLE};
pub use geocode::{Coordinates, GeocodeData, GeocodeStatus};
pub use outcome::{
    FailureKind, OutcomeKind, RunOutcome, SkipReason, TenantReport, TenantStage, TokenUsage,
};
pub use tenant::TenantRecord;
