pub mod authoring_flow;

pub use authoring_flow::{load_section_parts, ordinal_answers, strip_answers, AuthoringFlow, SectionSyncReport};
