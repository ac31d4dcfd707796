use super::*;
use crate::models::AgentStatus;
use crate::store::agents::RegisterAgent;
use crate::store::{test_db, AgentStore, Database, TaskStore};

struct Fixture {
    db: Database,
    engine: TaskEngine,
    agents: AgentStore,
    tasks: TaskStore,
}

async fn fixture() -> Fixture {
    let db = test_db().await;
    Fixture {
        engine: TaskEngine::new(db.clone()),
        agents: AgentStore::new(db.clone()),
        tasks: TaskStore::new(db.clone()),
        db,
    }
}

impl Fixture {
    async fn agent(&self, name: &str, max_tasks: i64) -> String {
        self.agents
            .register(RegisterAgent {
                name: name.to_string(),
                max_tasks: Some(max_tasks),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn lead(&self, name: &str) -> String {
        self.agents
            .register(RegisterAgent {
                name: name.to_string(),
                is_lead: true,
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    /// Drive a task into `in_progress` through the real dispatch path.
    async fn dispatch(&self, task_id: &str, agent_id: &str) -> Task {
        let task_id = task_id.to_string();
        let agent_id = agent_id.to_string();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let now = chrono::Utc::now().timestamp();
                let task = claim_assigned(&tx, &agent_id, now)?;
                tx.commit()?;
                let task = task.expect("dispatch returned no task");
                assert_eq!(task.id, task_id);
                Ok(task)
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn creation_policy_pending_offered_unassigned() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("direct", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let direct = f.engine.create(args).await.unwrap();
    assert_eq!(direct.status, TaskStatus::Pending);
    assert_eq!(direct.agent_id.as_deref(), Some(worker.as_str()));

    let mut args = CreateTask::new("offered", TaskSource::Api);
    args.offered_to = Some(worker.clone());
    let offered = f.engine.create(args).await.unwrap();
    assert_eq!(offered.status, TaskStatus::Offered);
    assert!(offered.offered_at.is_some());

    let pool = f
        .engine
        .create(CreateTask::new("pool", TaskSource::Api))
        .await
        .unwrap();
    assert_eq!(pool.status, TaskStatus::Unassigned);

    let mut args = CreateTask::new("later", TaskSource::Api);
    args.backlog = true;
    let backlog = f.engine.create(args).await.unwrap();
    assert_eq!(backlog.status, TaskStatus::Backlog);
}

#[tokio::test]
async fn create_rejects_unknown_dependency() {
    let f = fixture().await;
    let mut args = CreateTask::new("dependent", TaskSource::Api);
    args.depends_on = vec!["missing".to_string()];
    let err = f.engine.create(args).await.unwrap_err();
    assert!(matches!(err, SwarmError::Validation(_)));
}

#[tokio::test]
async fn create_rejects_out_of_range_priority() {
    let f = fixture().await;
    let mut args = CreateTask::new("urgent", TaskSource::Api);
    args.priority = Some(101);
    assert!(f.engine.create(args).await.is_err());
}

#[tokio::test]
async fn claim_moves_pool_task_to_pending_exactly_once() {
    let f = fixture().await;
    let w1 = f.agent("w1", 1).await;
    let w2 = f.agent("w2", 1).await;

    let task = f
        .engine
        .create(CreateTask::new("race me", TaskSource::Api))
        .await
        .unwrap();

    let claimed = f.engine.claim(&task.id, &w1).await.unwrap();
    assert_eq!(claimed.status, TaskStatus::Pending);
    assert_eq!(claimed.agent_id.as_deref(), Some(w1.as_str()));

    // The loser of the race sees a state violation, not a double claim.
    let err = f.engine.claim(&task.id, &w2).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));
}

#[tokio::test]
async fn claim_respects_capacity() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let first = f
        .engine
        .create(CreateTask::new("one", TaskSource::Api))
        .await
        .unwrap();
    f.engine.claim(&first.id, &worker).await.unwrap();

    let second = f
        .engine
        .create(CreateTask::new("two", TaskSource::Api))
        .await
        .unwrap();
    let err = f.engine.claim(&second.id, &worker).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));
}

#[tokio::test]
async fn claim_blocks_on_unresolved_dependencies() {
    let f = fixture().await;
    let worker = f.agent("w1", 2).await;

    let dep = f
        .engine
        .create(CreateTask::new("first", TaskSource::Api))
        .await
        .unwrap();
    let mut args = CreateTask::new("second", TaskSource::Api);
    args.depends_on = vec![dep.id.clone()];
    let gated = f.engine.create(args).await.unwrap();

    let err = f.engine.claim(&gated.id, &worker).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));

    // Complete the dependency, then the claim goes through.
    f.engine.claim(&dep.id, &worker).await.unwrap();
    f.dispatch(&dep.id, &worker).await;
    f.engine
        .finish(&dep.id, &worker, FinishStatus::Completed, None, None)
        .await
        .unwrap();

    let claimed = f.engine.claim(&gated.id, &worker).await.unwrap();
    assert_eq!(claimed.status, TaskStatus::Pending);
}

#[tokio::test]
async fn accept_requires_offered_agent() {
    let f = fixture().await;
    let offered_to = f.agent("chosen", 1).await;
    let other = f.agent("other", 1).await;

    let mut args = CreateTask::new("take it", TaskSource::Api);
    args.offered_to = Some(offered_to.clone());
    let task = f.engine.create(args).await.unwrap();

    // Move to reviewing through the resolver's claim path.
    let task_id = task.id.clone();
    let agent = offered_to.clone();
    f.db
        .execute_mut(move |conn| {
            let tx = conn.transaction()?;
            let claimed = claim_offered(&tx, &agent, chrono::Utc::now().timestamp())?;
            tx.commit()?;
            assert_eq!(claimed.unwrap().id, task_id);
            Ok(())
        })
        .await
        .unwrap();

    let err = f.engine.accept(&task.id, &other).await.unwrap_err();
    assert!(matches!(err, SwarmError::Forbidden(_)));

    let accepted = f.engine.accept(&task.id, &offered_to).await.unwrap();
    assert_eq!(accepted.status, TaskStatus::Pending);
    assert_eq!(accepted.agent_id.as_deref(), Some(offered_to.as_str()));
    assert!(accepted.accepted_at.is_some());
}

#[tokio::test]
async fn reject_requeues_or_fails() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    for (requeue, expected) in [(true, TaskStatus::Unassigned), (false, TaskStatus::Failed)] {
        let mut args = CreateTask::new("offer", TaskSource::Api);
        args.offered_to = Some(worker.clone());
        let task = f.engine.create(args).await.unwrap();

        let agent = worker.clone();
        f.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                claim_offered(&tx, &agent, chrono::Utc::now().timestamp())?;
                tx.commit()?;
                Ok(())
            })
            .await
            .unwrap();

        let rejected = f
            .engine
            .reject(&task.id, &worker, Some("not my area".into()), requeue)
            .await
            .unwrap();
        assert_eq!(rejected.status, expected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("not my area"));
        if requeue {
            assert!(rejected.offered_to.is_none());
            assert!(rejected.agent_id.is_none());
        } else {
            assert!(rejected.finished_at.is_some());
        }
    }
}

#[tokio::test]
async fn finish_is_idempotent_and_preserves_first_outcome() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("work", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &worker).await;

    let first = f
        .engine
        .finish(
            &task.id,
            &worker,
            FinishStatus::Completed,
            Some("o".into()),
            None,
        )
        .await
        .unwrap();
    assert!(!first.already_finished);
    assert_eq!(first.task.status, TaskStatus::Completed);
    assert!(first.task.finished_at.is_some());

    // Second finish with a different outcome changes nothing.
    let second = f
        .engine
        .finish(
            &task.id,
            &worker,
            FinishStatus::Failed,
            None,
            Some("r".into()),
        )
        .await
        .unwrap();
    assert!(second.already_finished);
    assert_eq!(second.task.status, TaskStatus::Completed);
    assert_eq!(second.task.output.as_deref(), Some("o"));
    assert!(second.task.failure_reason.is_none());
}

#[tokio::test]
async fn finish_requires_owner() {
    let f = fixture().await;
    let owner = f.agent("owner", 1).await;
    let stranger = f.agent("stranger", 1).await;

    let mut args = CreateTask::new("mine", TaskSource::Api);
    args.agent_id = Some(owner.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &owner).await;

    let err = f
        .engine
        .finish(&task.id, &stranger, FinishStatus::Completed, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::Forbidden(_)));
}

#[tokio::test]
async fn creator_may_finish_unassigned_task() {
    let f = fixture().await;
    let creator = f.agent("creator", 1).await;

    let mut args = CreateTask::new("stale pool entry", TaskSource::Api);
    args.created_by = Some(creator.clone());
    let task = f.engine.create(args).await.unwrap();
    assert_eq!(task.status, TaskStatus::Unassigned);

    let outcome = f
        .engine
        .finish(
            &task.id,
            &creator,
            FinishStatus::Failed,
            None,
            Some("obsolete".into()),
        )
        .await
        .unwrap();
    assert_eq!(outcome.task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn finish_recomputes_agent_status() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("work", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &worker).await;

    assert_eq!(
        f.agents.get_required(&worker).await.unwrap().status,
        AgentStatus::Busy
    );

    f.engine
        .finish(&task.id, &worker, FinishStatus::Completed, None, None)
        .await
        .unwrap();
    assert_eq!(
        f.agents.get_required(&worker).await.unwrap().status,
        AgentStatus::Idle
    );
}

#[tokio::test]
async fn pause_resume_round_trip_preserves_progress() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("long haul", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &worker).await;

    let paused = f
        .engine
        .pause(&task.id, &worker, Some("step 3 of 7".into()))
        .await
        .unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.progress.as_deref(), Some("step 3 of 7"));

    let resumed = f.engine.resume(&task.id, &worker).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::InProgress);
    assert_eq!(resumed.progress.as_deref(), Some("step 3 of 7"));
}

#[tokio::test]
async fn pause_only_from_in_progress() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("not started", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();

    let err = f.engine.pause(&task.id, &worker, None).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));
}

#[tokio::test]
async fn paused_tasks_free_a_capacity_slot_for_dispatch() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("first", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let first = f.engine.create(args).await.unwrap();
    f.dispatch(&first.id, &worker).await;

    f.engine.pause(&first.id, &worker, None).await.unwrap();

    let mut args = CreateTask::new("second", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let second = f.engine.create(args).await.unwrap();
    let dispatched = f.dispatch(&second.id, &worker).await;
    assert_eq!(dispatched.status, TaskStatus::InProgress);

    // But resuming now exceeds capacity.
    let err = f.engine.resume(&first.id, &worker).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));
}

#[tokio::test]
async fn cancel_by_lead_then_finish_reports_already_finished() {
    let f = fixture().await;
    let lead = f.lead("lead").await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("doomed", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &worker).await;

    let cancelled = f
        .engine
        .cancel(&task.id, &lead, Some("scope changed".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.failure_reason.as_deref(), Some("scope changed"));

    // The reaping runner later calls finish; that is a tolerated no-op.
    let outcome = f
        .engine
        .finish(&task.id, &worker, FinishStatus::Failed, None, None)
        .await
        .unwrap();
    assert!(outcome.already_finished);
    assert_eq!(outcome.task.status, TaskStatus::Cancelled);

    // And the hook sees it.
    let cancelled_tasks = f.tasks.cancelled_among(vec![task.id.clone()]).await.unwrap();
    assert_eq!(cancelled_tasks.len(), 1);
}

#[tokio::test]
async fn cancel_forbidden_for_unrelated_worker() {
    let f = fixture().await;
    let creator = f.agent("creator", 1).await;
    let stranger = f.agent("stranger", 1).await;

    let mut args = CreateTask::new("protected", TaskSource::Api);
    args.created_by = Some(creator.clone());
    let task = f.engine.create(args).await.unwrap();

    let err = f.engine.cancel(&task.id, &stranger, None).await.unwrap_err();
    assert!(matches!(err, SwarmError::Forbidden(_)));

    // The creator may cancel.
    f.engine.cancel(&task.id, &creator, None).await.unwrap();
}

#[tokio::test]
async fn activate_promotes_backlog_when_deps_resolved() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let dep = f
        .engine
        .create(CreateTask::new("groundwork", TaskSource::Api))
        .await
        .unwrap();

    let mut args = CreateTask::new("follow-up", TaskSource::Api);
    args.backlog = true;
    args.depends_on = vec![dep.id.clone()];
    let parked = f.engine.create(args).await.unwrap();

    let err = f.engine.activate(&parked.id).await.unwrap_err();
    assert!(matches!(err, SwarmError::StateViolation(_)));

    f.engine.claim(&dep.id, &worker).await.unwrap();
    f.dispatch(&dep.id, &worker).await;
    f.engine
        .finish(&dep.id, &worker, FinishStatus::Completed, None, None)
        .await
        .unwrap();

    let activated = f.engine.activate(&parked.id).await.unwrap();
    assert_eq!(activated.status, TaskStatus::Unassigned);
}

#[tokio::test]
async fn timestamps_are_ordered() {
    let f = fixture().await;
    let worker = f.agent("w1", 1).await;

    let mut args = CreateTask::new("timed", TaskSource::Api);
    args.agent_id = Some(worker.clone());
    let task = f.engine.create(args).await.unwrap();
    f.dispatch(&task.id, &worker).await;

    let outcome = f
        .engine
        .finish(&task.id, &worker, FinishStatus::Completed, None, None)
        .await
        .unwrap();
    let task = outcome.task;
    assert!(task.created_at <= task.updated_at);
    assert!(task.updated_at <= task.finished_at.unwrap());
}
