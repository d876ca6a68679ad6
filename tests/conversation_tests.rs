use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use materials::conversation::{ConversationEngine, Event, ReplyKind, SessionId, StepTable};
use materials::conversation_errors::ServiceError;
use materials::dialogue::StepId;
use materials::localization::LocalizationManager;
use materials::record_store::{ReceiptRecord, RecordStore};

/// Record store keeping appended receipts in memory
#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<ReceiptRecord>>,
    failing: AtomicBool,
    /// Milliseconds each append takes
    delay_ms: AtomicU64,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append_record(&self, record: &ReceiptRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("spreadsheet unavailable"));
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

fn engine(store: Arc<MemoryStore>) -> ConversationEngine {
    let localization = Arc::new(LocalizationManager::new("pt").unwrap());
    ConversationEngine::new(StepTable::receipt().unwrap(), store, localization)
}

fn text(value: &str) -> Event {
    Event::TextInput(value.to_string())
}

/// Valid answers for every step, in conversation order
fn valid_answers() -> Vec<Event> {
    vec![
        text("01/02/2024"),
        text("GR 2024/118"),
        text("Acme Steel"),
        Event::ChoiceSelected("material_b".to_string()),
        text("Two boxes slightly damaged"),
        text("L-7781"),
        text("250 kg"),
        text("Ana Ribeiro"),
        text("Deliver to warehouse 3"),
        text("HU-0042"),
    ]
}

/// Open a session and return its id
async fn start(engine: &ConversationEngine, id: i64) -> Result<SessionId> {
    let session = SessionId(id);
    let reply = engine.handle_event(session, text("olá"), None).await?;
    assert_eq!(reply.kind, ReplyKind::Prompt);
    Ok(session)
}

#[tokio::test]
async fn test_first_event_opens_session_at_entry_step() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(store);
    let session = SessionId(1);

    let reply = engine.handle_event(session, text("hello"), None).await?;

    assert_eq!(reply.kind, ReplyKind::Prompt);
    assert!(reply.text.contains("Bem-vindo"));
    assert!(reply.text.contains("DD/MM/AAAA"));
    assert!(reply.menu.is_none());
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));
    // The opening message is not taken as an answer
    assert!(engine.collected_values(session).await.unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_date_keeps_step_until_valid() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 7).await?;

    for bad in ["31/02/2024", "2024-02-01", "tomorrow", "31/02/2024"] {
        let reply = engine.handle_event(session, text(bad), None).await?;
        assert_eq!(reply.kind, ReplyKind::InvalidInputFormat);
        assert!(reply.text.contains("Data inválida"));
        assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));
    }

    let reply = engine.handle_event(session, text("01/02/2024"), None).await?;
    assert_eq!(reply.kind, ReplyKind::Prompt);
    assert!(reply.text.contains("01/02/2024"));
    assert!(reply.text.contains("guia de remessa"));
    assert_eq!(engine.current_step(session).await, Some(StepId::DeliveryNote));

    Ok(())
}

#[tokio::test]
async fn test_date_is_normalized() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 8).await?;

    engine.handle_event(session, text(" 1/2/2024 "), None).await?;

    let values = engine.collected_values(session).await.unwrap();
    assert_eq!(values.get(&StepId::ReceptionDate).map(String::as_str), Some("01/02/2024"));

    Ok(())
}

#[tokio::test]
async fn test_choice_at_text_step_is_unexpected() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 9).await?;

    let reply = engine
        .handle_event(session, Event::ChoiceSelected("material_a".to_string()), None)
        .await?;

    assert_eq!(reply.kind, ReplyKind::UnexpectedEventType);
    assert!(reply.menu.is_none());
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));
    assert!(engine.collected_values(session).await.unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_menu_step_only_accepts_known_choices() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 10).await?;

    for event in valid_answers().into_iter().take(3) {
        engine.handle_event(session, event, None).await?;
    }
    assert_eq!(engine.current_step(session).await, Some(StepId::MaterialType));

    // Free text while the menu is pending
    let reply = engine.handle_event(session, text("Material A"), None).await?;
    assert_eq!(reply.kind, ReplyKind::UnexpectedEventType);
    let menu = reply.menu.expect("menu is sent again");
    let ids: Vec<_> = menu.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["material_a", "material_b"]);
    assert_eq!(engine.current_step(session).await, Some(StepId::MaterialType));

    // A choice that is not on the menu
    let reply = engine
        .handle_event(session, Event::ChoiceSelected("material_z".to_string()), None)
        .await?;
    assert_eq!(reply.kind, ReplyKind::InvalidInputFormat);
    assert!(reply.menu.is_some());
    assert_eq!(engine.current_step(session).await, Some(StepId::MaterialType));

    let reply = engine
        .handle_event(session, Event::ChoiceSelected("material_a".to_string()), None)
        .await?;
    assert_eq!(reply.kind, ReplyKind::Prompt);
    assert!(reply.text.contains("Material selecionado: Material A"));
    assert_eq!(
        engine.current_step(session).await,
        Some(StepId::MaterialObservations)
    );
    let values = engine.collected_values(session).await.unwrap();
    assert_eq!(values.get(&StepId::MaterialType).map(String::as_str), Some("material_a"));

    Ok(())
}

#[tokio::test]
async fn test_blank_text_is_rejected() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 11).await?;
    engine.handle_event(session, text("01/02/2024"), None).await?;

    let reply = engine.handle_event(session, text("   "), None).await?;

    assert_eq!(reply.kind, ReplyKind::InvalidInputFormat);
    assert_eq!(engine.current_step(session).await, Some(StepId::DeliveryNote));

    Ok(())
}

#[tokio::test]
async fn test_full_conversation_appends_one_record() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(store.clone());
    let session = start(&engine, 42).await?;

    let answers = valid_answers();
    let steps = answers.len();
    assert_eq!(steps, engine.steps().len());

    for (i, event) in answers.into_iter().enumerate() {
        let reply = engine.handle_event(session, event, None).await?;
        if i + 1 < steps {
            assert_eq!(reply.kind, ReplyKind::Prompt, "step {i}");
            assert!(engine.current_step(session).await.is_some());
        } else {
            assert_eq!(reply.kind, ReplyKind::Completed);
            assert!(reply.text.contains("Obrigado"));
        }
    }

    let records = store.records.lock().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.chat_id, 42);
    assert_eq!(record.fields.len(), 10);
    assert!(record.fields.iter().all(|(_, value)| !value.is_empty()));
    assert_eq!(record.get(StepId::ReceptionDate), Some("01/02/2024"));
    assert_eq!(record.get(StepId::MaterialType), Some("material_b"));
    assert_eq!(record.get(StepId::HandlingUnit), Some("HU-0042"));

    // The session is gone; the next message starts over
    assert_eq!(engine.current_step(session).await, None);
    assert_eq!(engine.session_count().await, 0);
    drop(records);

    let reply = engine.handle_event(session, text("again"), None).await?;
    assert!(reply.text.contains("Bem-vindo"));
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));

    Ok(())
}

#[tokio::test]
async fn test_cancel_resets_to_entry_and_discards_values() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(store.clone());
    let session = start(&engine, 5).await?;

    for event in valid_answers().into_iter().take(6) {
        engine.handle_event(session, event, None).await?;
    }
    assert_eq!(engine.current_step(session).await, Some(StepId::Quantity));
    assert_eq!(engine.collected_values(session).await.unwrap().len(), 6);

    let reply = engine.handle_event(session, Event::CancelRequested, None).await?;

    assert_eq!(reply.kind, ReplyKind::Cancelled);
    assert!(reply.text.contains("DD/MM/AAAA"));
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));
    assert!(engine.collected_values(session).await.unwrap().is_empty());
    assert!(store.records.lock().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cancel_at_menu_step() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = start(&engine, 6).await?;
    for event in valid_answers().into_iter().take(3) {
        engine.handle_event(session, event, None).await?;
    }

    let reply = engine.handle_event(session, Event::CancelRequested, None).await?;

    assert_eq!(reply.kind, ReplyKind::Cancelled);
    assert!(reply.menu.is_none());
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));

    Ok(())
}

#[tokio::test]
async fn test_sessions_progress_independently() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let a = start(&engine, 100).await?;
    let b = start(&engine, 200).await?;

    for event in valid_answers().into_iter().take(3) {
        engine.handle_event(a, event, None).await?;
    }

    assert_eq!(engine.current_step(a).await, Some(StepId::MaterialType));
    assert_eq!(engine.current_step(b).await, Some(StepId::ReceptionDate));
    assert!(engine.collected_values(b).await.unwrap().is_empty());

    engine.handle_event(b, Event::CancelRequested, None).await?;
    assert_eq!(engine.current_step(a).await, Some(StepId::MaterialType));
    assert_eq!(engine.session_count().await, 2);

    Ok(())
}

#[tokio::test]
async fn test_store_failure_keeps_last_step() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let engine = engine(store.clone());
    let session = start(&engine, 77).await?;

    let mut answers = valid_answers();
    let last = answers.pop().unwrap();
    for event in answers {
        engine.handle_event(session, event, None).await?;
    }

    store.failing.store(true, Ordering::SeqCst);
    let err = engine
        .handle_event(session, last.clone(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::RecordStore(_))
    ));
    assert_eq!(engine.current_step(session).await, Some(StepId::HandlingUnit));
    let values = engine.collected_values(session).await.unwrap();
    assert_eq!(values.len(), 9);
    assert!(!values.contains_key(&StepId::HandlingUnit));
    assert!(store.records.lock().await.is_empty());

    // Resending the last answer once the store recovers completes the receipt
    store.failing.store(false, Ordering::SeqCst);
    let reply = engine.handle_event(session, last, None).await?;
    assert_eq!(reply.kind, ReplyKind::Completed);
    assert_eq!(store.records.lock().await.len(), 1);
    assert_eq!(engine.current_step(session).await, None);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_for_one_session_advance_one_step_each() -> Result<()> {
    let engine = Arc::new(engine(Arc::new(MemoryStore::default())));
    let session = start(&engine, 300).await?;
    engine.handle_event(session, text("01/02/2024"), None).await?;

    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|answer| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_event(session, text(answer), None).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await??.kind, ReplyKind::Prompt);
    }

    assert_eq!(engine.current_step(session).await, Some(StepId::MaterialType));
    let values = engine.collected_values(session).await.unwrap();
    assert!(values.contains_key(&StepId::DeliveryNote));
    assert!(values.contains_key(&StepId::Supplier));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_waiting_on_completed_session_starts_a_new_one() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let engine = Arc::new(engine(store.clone()));
    let session = start(&engine, 400).await?;

    let mut answers = valid_answers();
    let last = answers.pop().unwrap();
    for event in answers {
        engine.handle_event(session, event, None).await?;
    }

    store.delay_ms.store(200, Ordering::SeqCst);
    let completing = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.handle_event(session, last, None).await })
    };

    // Arrives while the append above is still running
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.handle_event(session, text("01/03/2024"), None).await })
    };

    let first = completing.await??;
    let second = waiting.await??;

    assert_eq!(first.kind, ReplyKind::Completed);
    assert_eq!(second.kind, ReplyKind::Prompt);
    assert!(second.text.contains("Bem-vindo"));
    assert_eq!(store.records.lock().await.len(), 1);
    assert_eq!(engine.current_step(session).await, Some(StepId::ReceptionDate));
    assert!(engine.collected_values(session).await.unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_replies_follow_user_language() -> Result<()> {
    let engine = engine(Arc::new(MemoryStore::default()));
    let session = SessionId(500);

    let reply = engine.handle_event(session, text("hi"), Some("en-GB")).await?;
    assert!(reply.text.contains("Welcome"));

    let reply = engine.handle_event(session, text("31/02/2024"), Some("en-GB")).await?;
    assert_eq!(reply.kind, ReplyKind::InvalidInputFormat);
    assert!(reply.text.contains("DD/MM/YYYY"));

    Ok(())
}
