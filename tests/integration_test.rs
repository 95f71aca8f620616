use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use mock_exam_session::clients::{AuthoringApi, ContentApi, ExamClient, SessionApi};
use mock_exam_session::config::Config;
use mock_exam_session::error::{AppError, AppResult};
use mock_exam_session::infrastructure::{KeyValueStore, MemoryStore};
use mock_exam_session::models::{
    EntityId, GroupType, Part, PartContent, PartContentEnvelope, PartContentResponse, Question,
    QuestionGroup, QuestionRecord, SessionIds,
};
use mock_exam_session::orchestrator::{SessionPhase, TestSessionStore};
use mock_exam_session::services::content_normalizer::{normalize_content, parse_part_content};
use mock_exam_session::services::question_numbering::{
    extract_markers, recalculate_ranges, recalculate_section, NumberedPart,
};
use mock_exam_session::services::session_timer::timer_key;
use mock_exam_session::services::{AnswerSyncQueue, SessionTimer};
use mock_exam_session::workflow::AuthoringFlow;

const SECTION: EntityId = 9;
const IDS: SessionIds = SessionIds {
    mock_id: 1,
    section_id: SECTION,
};

/// 内存中的考试服务
#[derive(Default)]
struct MockExamServer {
    /// part_id → (ord, 原始内容)
    parts: Mutex<BTreeMap<EntityId, (u32, Option<Value>)>>,
    saved: Mutex<Vec<(EntityId, Value)>>,
    questions: Mutex<Vec<QuestionRecord>>,
    next_question_id: AtomicI64,
    sent: Mutex<Vec<(u32, String)>>,
    send_attempts: AtomicUsize,
    fail_answers: bool,
    finished: AtomicUsize,
}

impl MockExamServer {
    fn with_parts(parts: Vec<(EntityId, u32, Value)>) -> Self {
        let server = Self::default();
        {
            let mut stored = server.parts.lock().unwrap();
            for (id, ord, content) in parts {
                // 服务端保存的内容经过两次序列化
                let encoded = Value::String(Value::String(content.to_string()).to_string());
                stored.insert(id, (ord, Some(encoded)));
            }
        }
        server
    }

    fn seed_questions(&self, ords: impl IntoIterator<Item = u32>) {
        let mut questions = self.questions.lock().unwrap();
        for ord in ords {
            let id = self.next_question_id.fetch_add(1, Ordering::SeqCst) + 1;
            questions.push(QuestionRecord {
                id,
                ord,
                part_id: 0,
                answers: Vec::new(),
            });
        }
    }

    fn question_ords(&self) -> Vec<u32> {
        let mut ords: Vec<u32> = self.questions.lock().unwrap().iter().map(|q| q.ord).collect();
        ords.sort();
        ords
    }

    fn stored_content(&self, part_id: EntityId) -> PartContent {
        let parts = self.parts.lock().unwrap();
        let raw = parts[&part_id].1.clone().unwrap();
        parse_part_content(&raw).unwrap()
    }
}

#[async_trait]
impl ContentApi for MockExamServer {
    async fn get_part_content(&self, part_id: EntityId) -> AppResult<PartContentResponse> {
        let parts = self.parts.lock().unwrap();
        Ok(PartContentResponse {
            content: parts.get(&part_id).and_then(|(_, c)| c.clone()),
        })
    }

    async fn get_all_parts(&self, section_id: EntityId) -> AppResult<Vec<Part>> {
        let parts = self.parts.lock().unwrap();
        Ok(parts
            .iter()
            .map(|(id, (ord, _))| Part {
                id: *id,
                section_id: Some(section_id),
                ord: *ord,
                title: None,
                content: None,
                question_range: None,
            })
            .collect())
    }
}

#[async_trait]
impl AuthoringApi for MockExamServer {
    async fn save_part_content(&self, part_id: EntityId, envelope: &PartContentEnvelope) -> AppResult<()> {
        let value = serde_json::to_value(envelope)?;
        self.saved.lock().unwrap().push((part_id, value.clone()));
        if let Some(entry) = self.parts.lock().unwrap().get_mut(&part_id) {
            entry.1 = Some(Value::String(value.to_string()));
        }
        Ok(())
    }

    async fn get_all_questions(&self, _section_id: EntityId) -> AppResult<Vec<QuestionRecord>> {
        Ok(self.questions.lock().unwrap().clone())
    }

    async fn create_or_update_question(
        &self,
        _section_id: EntityId,
        part_id: EntityId,
        ord: u32,
        answers: &[String],
    ) -> AppResult<()> {
        let mut questions = self.questions.lock().unwrap();
        match questions.iter_mut().find(|q| q.ord == ord) {
            Some(record) => {
                record.part_id = part_id;
                record.answers = answers.to_vec();
            }
            None => {
                let id = self.next_question_id.fetch_add(1, Ordering::SeqCst) + 1;
                questions.push(QuestionRecord {
                    id,
                    ord,
                    part_id,
                    answers: answers.to_vec(),
                });
            }
        }
        Ok(())
    }

    async fn delete_question(&self, question_id: EntityId) -> AppResult<()> {
        self.questions.lock().unwrap().retain(|q| q.id != question_id);
        Ok(())
    }
}

#[async_trait]
impl SessionApi for MockExamServer {
    async fn send_answer(&self, _ids: SessionIds, question_ord: u32, answer: &str) -> AppResult<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_answers {
            return Err(AppError::api_bad_response("answers", 502, None));
        }
        self.sent.lock().unwrap().push((question_ord, answer.to_string()));
        Ok(())
    }

    async fn finish_section(&self, _ids: SessionIds) -> AppResult<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scenario_a_content() -> PartContent {
    PartContent::new(vec![
        QuestionGroup::new(GroupType::ShortAnswer, vec![Question::with_text("a [1] b [2] c [3]")]),
        QuestionGroup::new(
            GroupType::MultipleChoice,
            vec![Question::with_text("Q1"), Question::with_text("Q2")],
        ),
    ])
}

fn ranges(content: &PartContent) -> Vec<Option<String>> {
    content.question_groups.iter().map(|g| g.range.clone()).collect()
}

#[test]
fn test_scenario_a_mixed_groups() {
    let numbered = recalculate_ranges(&scenario_a_content(), 0);
    assert_eq!(ranges(&numbered), vec![Some("1-3".into()), Some("4-5".into())]);
}

#[test]
fn test_scenario_b_empty_group_gets_default_size() {
    let ten = QuestionGroup::new(
        GroupType::MultipleChoice,
        (1..=10).map(|i| Question::with_text(format!("Q{}", i))).collect(),
    );
    let empty = QuestionGroup::new(GroupType::MatchHeading, Vec::new());

    let result = recalculate_section(&[
        NumberedPart::new(1, 1, Some(PartContent::new(vec![ten]))),
        NumberedPart::new(2, 2, Some(PartContent::new(vec![empty]))),
    ]);

    let part2 = result.parts[1].content.as_ref().unwrap();
    assert_eq!(part2.question_groups[0].range.as_deref(), Some("11-15"));
    assert_eq!(result.total_questions, 15);
}

#[test]
fn test_scenario_d_deleting_first_group_renumbers() {
    let mut content = recalculate_ranges(&scenario_a_content(), 0);
    content.question_groups.remove(0);

    let renumbered = recalculate_ranges(&content, 0);
    assert_eq!(ranges(&renumbered), vec![Some("1-2".into())]);
}

#[test]
fn test_bracket_and_attribute_markers_count_the_same() {
    let brackets = "[3] and [4] and [5]";
    let html = r#"<input data-number="3"/> <span data-number='4'></span> <i data-number=&quot;5&quot;></i>"#;
    assert_eq!(extract_markers(brackets), extract_markers(html));
}

#[test]
fn test_normalizer_is_idempotent_on_server_payloads() {
    let admin = json!({ "questionGroups": { "0": { "type": "short-answer", "questions": "[\"[1] [2]\"]" } } });
    let raw = Value::String(json!({ "admin": admin.to_string(), "user": "{}" }).to_string());

    let once = normalize_content(&raw);
    assert_eq!(normalize_content(&once), once);
    assert_eq!(once["questionGroups"][0]["questions"][0]["text"], json!("[1] [2]"));
}

#[tokio::test]
async fn test_renumber_section_persists_changed_parts() {
    let ten = json!({
        "questionGroups": [{
            "type": "multiple-choice",
            "range": "1-10",
            "questions": (1..=10).map(|i| json!({ "text": format!("Q{}", i), "correctAnswer": "A" })).collect::<Vec<_>>()
        }]
    });
    let empty = json!([{ "type": "true-false-not-given", "questions": {} }]);
    let server = Arc::new(MockExamServer::with_parts(vec![(1, 1, ten), (2, 2, empty)]));

    let flow = AuthoringFlow::new(server.clone());
    let report = assert_ok!(flow.renumber_section(SECTION).await);

    assert_eq!(report.saved_part_ids, vec![2]);
    assert_eq!(report.total_questions, 15);
    assert_eq!(
        server.stored_content(2).question_groups[0].range.as_deref(),
        Some("11-15")
    );
}

#[tokio::test]
async fn test_save_part_cascades_and_deletes_vacated_records() {
    let part1 = recalculate_ranges(&scenario_a_content(), 0).to_value();
    let mut part2 = QuestionGroup::new(
        GroupType::MultipleChoice,
        vec![Question::with_text("Q6"), Question::with_text("Q7")],
    );
    part2.range = Some("6-7".into());
    let part2 = PartContent::new(vec![part2]).to_value();

    let server = Arc::new(MockExamServer::with_parts(vec![(1, 1, part1), (2, 2, part2)]));
    server.seed_questions(1..=7);

    // 编辑：删除第一个题组，并给剩下的题目加上答案
    let mut edited = server.stored_content(1);
    edited.question_groups.remove(0);
    edited.question_groups[0].questions[0].correct_answer = Some(json!("C"));

    let flow = AuthoringFlow::new(server.clone());
    let report = assert_ok!(flow.save_part(SECTION, 1, edited).await);

    assert_eq!(report.saved_part_ids, vec![1, 2]);
    assert_eq!(report.total_questions, 4);
    assert_eq!(report.deleted_questions, 3);
    assert_eq!(server.question_ords(), vec![1, 2, 3, 4]);

    assert_eq!(ranges(&server.stored_content(1)), vec![Some("1-2".into())]);
    assert_eq!(ranges(&server.stored_content(2)), vec![Some("3-4".into())]);

    let saved = server.saved.lock().unwrap();
    let (_, envelope) = saved.iter().find(|(id, _)| *id == 1).unwrap();
    assert_eq!(
        envelope["admin"]["questionGroups"][0]["questions"][0]["correctAnswer"],
        json!("C")
    );
    assert!(envelope["user"]["questionGroups"][0]["questions"][0]
        .get("correctAnswer")
        .is_none());

    let questions = server.questions.lock().unwrap();
    let first = questions.iter().find(|q| q.ord == 1).unwrap();
    assert_eq!(first.answers, vec!["C".to_string()]);
    assert_eq!(first.part_id, 1);
}

#[tokio::test]
async fn test_validation_failure_never_reaches_network() {
    let server = Arc::new(MockExamServer::default());
    let mut group = QuestionGroup::new(GroupType::MultipleChoice, vec![Question::with_text("Q")]);
    group.group_type = None;

    let flow = AuthoringFlow::new(server.clone());
    let err = assert_err!(flow.save_part(SECTION, 1, PartContent::new(vec![group])).await);

    assert!(matches!(err, AppError::Validation(_)));
    assert!(server.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scenario_c_answer_queued_until_ids_known() {
    let server = Arc::new(MockExamServer::default());
    let queue = AnswerSyncQueue::new(&Config::default(), server.clone(), Arc::new(MemoryStore::new()));

    queue.set_answer(7, "paris".into());
    tokio::task::yield_now().await;
    assert_eq!(queue.pending_count(), 1);
    assert_eq!(server.send_attempts.load(Ordering::SeqCst), 0);

    queue.set_session_ids(IDS);
    queue.flush().await;

    assert_eq!(queue.pending_count(), 0);
    assert_eq!(*server.sent.lock().unwrap(), vec![(7, "paris".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_drops_after_four_attempts() {
    let server = Arc::new(MockExamServer {
        fail_answers: true,
        ..Default::default()
    });
    let store = Arc::new(MemoryStore::new());
    let queue = AnswerSyncQueue::new(&Config::default(), server.clone(), store.clone());
    queue.set_session_ids(IDS);

    queue.set_answer(7, "paris".into());
    queue.flush().await;

    assert_eq!(server.send_attempts.load(Ordering::SeqCst), 4);
    assert_eq!(queue.pending_count(), 0);
    assert_eq!(queue.dropped_answers().len(), 1);
    assert_eq!(queue.get_answer(7), Some("paris".into()));
}

#[test]
fn test_timer_clamps_corrupted_value() {
    let store = Arc::new(MemoryStore::new());
    store.set(&timer_key(IDS), "100000").unwrap();

    let timer = SessionTimer::new(&Config::default(), store, IDS);
    assert_eq!(timer.restore_remaining(3600), 3600);
}

#[tokio::test]
async fn test_session_flow_with_review() {
    let part1 = recalculate_ranges(&scenario_a_content(), 0).to_value();
    let part2 = json!({ "questionGroups": [{ "type": "summary-completion", "questions": "<p data-number=\"1\"></p> [2]" }] });
    let server = Arc::new(MockExamServer::with_parts(vec![(1, 1, part1), (2, 2, part2)]));
    let store = Arc::new(MemoryStore::new());

    let mut session = TestSessionStore::new(Config::default(), server.clone(), store.clone());
    assert_ok!(session.load_section(server.as_ref(), SECTION).await);
    assert_eq!(session.go_to_question(7).map(|p| p.part_id), Some(2));
    assert_eq!(session.go_to_question(2).map(|p| p.part_id), Some(1));

    session.set_answer(6, "river").unwrap();
    assert_eq!(session.get_answer(6), Some("river".into()));

    session.set_session_ids(IDS);
    session.start(1800).unwrap();
    assert_eq!(session.phase(), SessionPhase::Active);

    session.set_answer(4, "B").unwrap();
    session.set_answer(5, "   ").unwrap();
    assert_ok!(session.finish_session().await);

    let mut sent = server.sent.lock().unwrap().clone();
    sent.sort();
    assert_eq!(sent, vec![(4, "B".to_string()), (6, "river".to_string())]);
    assert_eq!(server.finished.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(&timer_key(IDS)), None);

    session.load_review(vec![serde_json::from_value(json!({ "ordinal": 4, "answer": "B", "isCorrect": true })).unwrap()]);
    assert_eq!(session.answer_correctness(4), Some(Some(true)));
}

#[tokio::test]
#[ignore] // 需要真实服务：EXAM_API_BASE_URL / EXAM_API_TOKEN，cargo test -- --ignored
async fn test_live_exam_client_parts() {
    let config = Config::from_env();
    mock_exam_session::utils::logging::init(&config);

    let client = ExamClient::new(&config).expect("创建客户端失败");
    let parts = client.get_all_parts(SECTION).await.expect("读取 part 失败");

    for part in parts {
        let content = client.get_part_content(part.id).await.expect("读取内容失败");
        let normalized = content.content.as_ref().and_then(parse_part_content);
        println!("part {} (ord {}): {:?}", part.id, part.ord, normalized.map(|c| c.question_groups.len()));
    }
}
