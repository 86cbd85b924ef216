use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{NewPollEntity, OptionEntity, PollEntity},
    dto::{
        poll::{CreatePollRequest, PollResponse, PollSnapshot},
        validation::MIN_POLL_OPTIONS,
    },
    error::ServiceError,
    state::AppState,
};

/// Create a poll with zeroed option counts.
///
/// The question and option texts are trimmed and blank options are dropped; at least
/// [`MIN_POLL_OPTIONS`] must remain.
pub async fn create_poll(
    state: &AppState,
    request: CreatePollRequest,
) -> Result<PollResponse, ServiceError> {
    let question = request.question.trim().to_string();
    if question.is_empty() {
        return Err(ServiceError::InvalidInput("question must not be blank".into()));
    }

    let texts: Vec<String> = request
        .options
        .iter()
        .map(|text| text.trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .collect();
    if texts.len() < MIN_POLL_OPTIONS {
        return Err(ServiceError::InvalidInput(format!(
            "a poll needs at least {MIN_POLL_OPTIONS} non-blank options"
        )));
    }

    let store = state.require_poll_store().await?;

    let poll = PollEntity {
        id: Uuid::new_v4(),
        question,
        created_at: SystemTime::now(),
    };
    let options: Vec<OptionEntity> = texts
        .into_iter()
        .enumerate()
        .map(|(position, text)| OptionEntity {
            id: Uuid::new_v4(),
            poll_id: poll.id,
            position: position as u32,
            text,
            votes: 0,
        })
        .collect();

    store
        .create_poll(NewPollEntity {
            poll: poll.clone(),
            options: options.clone(),
        })
        .await?;

    info!(poll_id = %poll.id, options = options.len(), "poll created");
    let snapshot = PollSnapshot::from_options(poll.id, options);
    Ok(PollResponse::new(poll, snapshot))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::poll_store::MemoryPollStore};

    #[tokio::test]
    async fn blank_options_are_dropped_and_counts_start_at_zero() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryPollStore::new())).await;

        let created = create_poll(
            &state,
            CreatePollRequest {
                question: "  Favourite colour?  ".into(),
                options: vec!["Red".into(), "   ".into(), " Blue ".into()],
            },
        )
        .await
        .unwrap();

        assert_eq!(created.question, "Favourite colour?");
        let texts: Vec<_> = created
            .snapshot
            .options
            .iter()
            .map(|option| option.text.as_str())
            .collect();
        assert_eq!(texts, ["Red", "Blue"]);
        assert_eq!(created.snapshot.total_votes, 0);
    }

    #[tokio::test]
    async fn too_few_options_are_rejected() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryPollStore::new())).await;

        let err = create_poll(
            &state,
            CreatePollRequest {
                question: "Yes?".into(),
                options: vec!["Yes".into(), "".into()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn degraded_mode_rejects_creation() {
        let state = AppState::new(AppConfig::default());
        let err = create_poll(
            &state,
            CreatePollRequest {
                question: "Yes?".into(),
                options: vec!["Yes".into(), "No".into()],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Degraded));
    }
}
