//! Electrode models, trajectory assignments and contact placement.

pub mod assignment;
pub mod model;
pub mod placement;
pub mod session;

pub use assignment::{Assignment, AssignmentDocument, TipAnchor, ASSIGNMENT_SCHEMA_VERSION};
pub use model::{
    ElectrodeLibrary, ElectrodeModel, ElectrodeType, GapKind, Suggestion, SuggestionConfig,
};
pub use placement::{
    generate_contacts, place_contacts, tip_and_axis, Contact, ContactSet, SegmentKind,
    ShaftSegment,
};
pub use session::ContactSession;
