pub mod answer;
pub mod content;
pub mod exam;

pub use answer::{AnswerValue, DeliveryState, PendingAnswer, SubmittedAnswer};
pub use content::{GroupType, PartContent, Question, QuestionGroup};
pub use exam::{
    EntityId, Part, PartContentEnvelope, PartContentResponse, QuestionRecord, Section,
    SectionType, SessionIds, Test,
};
