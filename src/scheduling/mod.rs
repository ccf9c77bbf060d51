pub mod conflicts;
pub mod templates;
pub mod shifts;
