pub mod answer_sync;
pub mod content_normalizer;
pub mod question_numbering;
pub mod session_timer;

pub use answer_sync::AnswerSyncQueue;
pub use content_normalizer::{normalize_content, parse_part_content};
pub use question_numbering::{
    compute_offset, extract_markers, recalculate_ranges, recalculate_section, NumberedPart,
    SectionRecalculation,
};
pub use session_timer::SessionTimer;
