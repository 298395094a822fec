use std::sync::Arc;
use std::time::Duration;

use agentloom::flow::{
    ExecutionHooks, FlowEventKind, HealthState, ManagerEvent, RestoreOptions, SortField,
    SortOrder,
};
use agentloom::{
    ContextOverrides, ExecutionQuery, ExecutionState, FlowBackup, FlowBuilder, FlowConfig,
    FlowContext, FlowExecutionResult, FlowManager, FlowManagerConfig, FlowStep, FlowStorage,
    LoomError, MemoryFlowStorage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

fn greeting_flow() -> anyhow::Result<FlowConfig> {
    Ok(FlowBuilder::new("greeting")
        .name("Greeting")
        .variable("salutation", json!("hello"))
        .step(
            FlowStep::new("compose", "transform")
                .with_input("who", json!("$input.name"))
                .with_input("word", json!("$variables.salutation")),
        )
        .build()?)
}

fn slow_flow(id: &str, millis: u64) -> anyhow::Result<FlowConfig> {
    Ok(FlowBuilder::new(id)
        .step(FlowStep::new("wait", "delay").with_config(json!({ "duration_ms": millis })))
        .step(FlowStep::new("after", "transform").depends_on("wait"))
        .build()?)
}

fn record_events(manager: &FlowManager) -> Arc<Mutex<Vec<FlowEventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.subscribe_all(Arc::new(move |event: &ManagerEvent| -> agentloom::Result<()> {
        sink.lock().push(event.kind);
        Ok(())
    }));
    seen
}

async fn wait_for_active(manager: &FlowManager) -> String {
    loop {
        if let Some(id) = manager.active_executions().into_iter().next() {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn execute_registered_flow_with_overrides() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;
    let events = record_events(&manager);
    manager.register_flow(greeting_flow()?).await?;

    let result = manager
        .execute_flow(
            "greeting",
            json!({ "name": "Ada" }),
            ContextOverrides::new().with_variable("salutation", json!("hi")),
        )
        .await?;

    assert_eq!(result.state, ExecutionState::Completed);
    assert_eq!(result.output["compose"], json!({ "who": "Ada", "word": "hi" }));
    assert!(result.started_at.is_some() && result.ended_at.is_some());
    assert!(!manager.is_active(&result.execution_id));
    assert_eq!(
        *events.lock(),
        vec![
            FlowEventKind::FlowRegistered,
            FlowEventKind::FlowStarted,
            FlowEventKind::FlowCompleted
        ]
    );

    let stored = manager.get_execution(&result.execution_id).await?;
    assert_eq!(stored, Some(result));
    Ok(())
}

#[tokio::test]
async fn invalid_and_duplicate_flows_are_rejected() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;

    let cyclic = FlowBuilder::new("loopy")
        .step(FlowStep::new("a", "transform").depends_on("b"))
        .step(FlowStep::new("b", "transform").depends_on("a"))
        .build_unchecked();
    match manager.register_flow(cyclic).await {
        Err(LoomError::Validation(issues)) => {
            assert!(issues
                .iter()
                .any(|issue| issue.message.starts_with("dependency cycle:")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(manager.get_flow("loopy").is_none());

    manager.register_flow(greeting_flow()?).await?;
    let err = manager.register_flow(greeting_flow()?).await.err();
    assert!(matches!(err, Some(LoomError::Configuration(_))));
    assert_eq!(manager.list_flows().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_flow_is_not_found() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;
    let err = manager
        .execute_flow("nope", json!({}), ContextOverrides::new())
        .await
        .err();
    assert!(matches!(err, Some(LoomError::NotFound { .. })));
    assert!(matches!(
        manager.get_flow_stats("nope"),
        Err(LoomError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn concurrency_ceiling_rejects_extra_executions() -> anyhow::Result<()> {
    let config = FlowManagerConfig::default().with_max_concurrent_executions(1);
    let manager = Arc::new(FlowManager::new(config)?);
    manager.register_flow(slow_flow("slow", 150)?).await?;

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute_flow("slow", json!({}), ContextOverrides::new())
                .await
        })
    };
    wait_for_active(&manager).await;
    assert_eq!(manager.get_health_status().status, HealthState::Unhealthy);

    let err = manager
        .execute_flow("slow", json!({}), ContextOverrides::new())
        .await
        .err();
    assert!(matches!(err, Some(LoomError::ResourceLimit(_))));

    let first = running.await??;
    assert!(first.is_success());
    assert!(manager.active_executions().is_empty());

    let again = manager
        .execute_flow("slow", json!({}), ContextOverrides::new())
        .await?;
    assert!(again.is_success());
    Ok(())
}

#[tokio::test]
async fn cancelled_execution_frees_slot_and_records_state() -> anyhow::Result<()> {
    let config = FlowManagerConfig::default().with_max_concurrent_executions(1);
    let manager = Arc::new(FlowManager::new(config)?);
    let events = record_events(&manager);
    manager.register_flow(slow_flow("slow", 80)?).await?;

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute_flow("slow", json!({}), ContextOverrides::new())
                .await
        })
    };
    let execution_id = wait_for_active(&manager).await;

    manager.cancel_execution(&execution_id)?;
    assert!(!manager.is_active(&execution_id));
    assert!(events.lock().contains(&FlowEventKind::FlowCancelled));
    assert!(matches!(
        manager.cancel_execution(&execution_id),
        Err(LoomError::NotFound { .. })
    ));

    let result = running.await??;
    assert_eq!(result.state, ExecutionState::Cancelled);
    assert!(result.step("after").is_none());

    let page = manager.list_executions(&ExecutionQuery::new().state(ExecutionState::Cancelled));
    assert_eq!(page.total, 1);
    assert_eq!(manager.get_flow_stats("slow")?.cancelled_count, 1);
    Ok(())
}

#[tokio::test]
async fn child_executions_are_linked_to_their_parent() -> anyhow::Result<()> {
    let manager = Arc::new(FlowManager::new(FlowManagerConfig::default())?);
    manager.register_flow(greeting_flow()?).await?;
    manager.register_flow(slow_flow("slow", 80)?).await?;

    // 父执行已结束：子执行写回历史记录
    let parent = manager
        .execute_flow("greeting", json!({ "name": "Ada" }), ContextOverrides::new())
        .await?;
    let child = manager
        .execute_flow(
            "greeting",
            json!({ "name": "Bob" }),
            ContextOverrides::new().with_parent(parent.execution_id.clone()),
        )
        .await?;
    assert_eq!(child.parent_execution_id.as_deref(), Some(parent.execution_id.as_str()));
    let stored = manager
        .get_execution(&parent.execution_id)
        .await?
        .expect("parent recorded");
    assert_eq!(stored.children, vec![child.execution_id.clone()]);

    // 父执行仍在运行：结束时带上子执行
    let running = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute_flow("slow", json!({}), ContextOverrides::new())
                .await
        })
    };
    let running_id = wait_for_active(&manager).await;
    let nested = manager
        .execute_flow(
            "greeting",
            json!({}),
            ContextOverrides::new().with_parent(running_id.clone()),
        )
        .await?;
    let finished = running.await??;
    assert_eq!(finished.execution_id, running_id);
    assert_eq!(finished.children, vec![nested.execution_id]);
    Ok(())
}

#[tokio::test]
async fn history_query_and_stats_reflect_executions() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default().with_max_history(3))?;
    manager.register_flow(greeting_flow()?).await?;
    manager
        .register_flow(
            FlowBuilder::new("broken")
                .step(FlowStep::new("ghost", "teleport"))
                .build()?,
        )
        .await?;

    for name in ["a", "b", "c"] {
        manager
            .execute_flow("greeting", json!({ "name": name }), ContextOverrides::new())
            .await?;
    }
    let failed = manager
        .execute_flow("broken", json!({}), ContextOverrides::new())
        .await?;
    assert_eq!(failed.state, ExecutionState::Failed);

    let everything = manager.list_executions(&ExecutionQuery::new());
    assert_eq!(everything.total, 3);
    assert_eq!(everything.items[0].execution_id, failed.execution_id);

    let page = manager.list_executions(
        &ExecutionQuery::new()
            .flow("greeting")
            .sort(SortField::StartedAt, SortOrder::Asc)
            .page(0, 1),
    );
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 2);
    assert!(page.has_more);

    let stats = manager.get_flow_stats("greeting")?;
    assert_eq!(stats.execution_count, 3);
    assert_eq!(stats.success_count, 3);
    assert_eq!(stats.error_rate, 0.0);
    assert_eq!(stats.throughput_per_minute, 3);
    assert!(stats.avg_duration_ms.is_some());

    let broken = manager.get_flow_stats("broken")?;
    assert_eq!(broken.failure_count, 1);
    assert_eq!(broken.error_rate, 1.0);

    let health = manager.get_health_status();
    assert_eq!(health.registered_flows, 2);
    assert_eq!(health.history_size, 3);
    assert_eq!(health.status, HealthState::Degraded);
    Ok(())
}

#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<String>>,
    reject: bool,
}

#[async_trait]
impl ExecutionHooks for RecordingHooks {
    async fn before_execution(&self, flow: &FlowConfig, ctx: &FlowContext) -> agentloom::Result<()> {
        self.calls
            .lock()
            .push(format!("before:{}:{}", flow.id, ctx.metadata["origin"]));
        if self.reject {
            return Err(LoomError::InvalidState("maintenance window".to_string()));
        }
        Ok(())
    }

    async fn after_execution(
        &self,
        _flow: &FlowConfig,
        result: &FlowExecutionResult,
    ) -> agentloom::Result<()> {
        self.calls.lock().push(format!("after:{}", result.state));
        Ok(())
    }

    async fn on_error(&self, _flow: &FlowConfig, result: &FlowExecutionResult) -> agentloom::Result<()> {
        self.calls.lock().push(format!("error:{}", result.state));
        Err(LoomError::InvalidState("hook failures are ignored".to_string()))
    }
}

#[tokio::test]
async fn hooks_wrap_executions() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;
    manager.register_flow(greeting_flow()?).await?;
    let hooks = Arc::new(RecordingHooks::default());
    manager.add_hooks(hooks.clone());

    let overrides = ContextOverrides::new().with_metadata("origin", json!("test"));
    manager
        .execute_flow("greeting", json!({ "name": "Ada" }), overrides)
        .await?;
    assert_eq!(
        *hooks.calls.lock(),
        vec![r#"before:greeting:"test""#, "after:COMPLETED"]
    );
    Ok(())
}

#[tokio::test]
async fn rejecting_hook_fails_execution() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;
    manager.register_flow(greeting_flow()?).await?;
    let hooks = Arc::new(RecordingHooks {
        reject: true,
        ..RecordingHooks::default()
    });
    manager.add_hooks(hooks.clone());

    let overrides = ContextOverrides::new().with_metadata("origin", json!("test"));
    let result = manager
        .execute_flow("greeting", json!({}), overrides)
        .await?;

    assert_eq!(result.state, ExecutionState::Failed);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("maintenance window"));
    assert!(result.steps.is_empty());
    assert_eq!(hooks.calls.lock().last().map(String::as_str), Some("error:FAILED"));
    Ok(())
}

#[tokio::test]
async fn unregister_removes_flow_and_storage_copy() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryFlowStorage::new());
    let manager =
        FlowManager::new(FlowManagerConfig::default())?.with_storage(storage.clone());
    manager.register_flow(greeting_flow()?).await?;
    assert!(storage.load_flow("greeting").await?.is_some());

    let removed = manager.unregister_flow("greeting").await?;
    assert_eq!(removed.id, "greeting");
    assert!(manager.get_flow("greeting").is_none());
    assert!(storage.load_flow("greeting").await?.is_none());
    assert!(matches!(
        manager.unregister_flow("greeting").await,
        Err(LoomError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn unregister_refuses_flow_with_active_execution() -> anyhow::Result<()> {
    let manager = Arc::new(FlowManager::new(FlowManagerConfig::default())?);
    manager.register_flow(slow_flow("slow", 100)?).await?;

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .execute_flow("slow", json!({}), ContextOverrides::new())
                .await
        })
    };
    wait_for_active(&manager).await;

    let err = manager.unregister_flow("slow").await.err();
    assert!(matches!(err, Some(LoomError::InvalidState(_))));
    running.await??;
    manager.unregister_flow("slow").await?;
    Ok(())
}

#[tokio::test]
async fn storage_persists_executions_and_reloads_flows() -> anyhow::Result<()> {
    let storage = Arc::new(MemoryFlowStorage::new());
    let first = FlowManager::new(FlowManagerConfig::default())?.with_storage(storage.clone());
    first.register_flow(greeting_flow()?).await?;
    let result = first
        .execute_flow("greeting", json!({ "name": "Ada" }), ContextOverrides::new())
        .await?;
    assert_eq!(storage.list_executions(Some("greeting")).await?.len(), 1);

    let second = FlowManager::new(FlowManagerConfig::default())?.with_storage(storage.clone());
    assert_eq!(second.load_from_storage().await?, 1);
    assert!(second.get_flow("greeting").is_some());
    let loaded = second.get_execution(&result.execution_id).await?;
    assert_eq!(loaded.map(|r| r.state), Some(ExecutionState::Completed));
    Ok(())
}

#[tokio::test]
async fn backup_restores_onto_fresh_manager() -> anyhow::Result<()> {
    let source = FlowManager::new(FlowManagerConfig::default())?;
    source.register_flow(greeting_flow()?).await?;
    source.register_flow(slow_flow("slow", 1)?).await?;
    source
        .execute_flow("greeting", json!({ "name": "Ada" }), ContextOverrides::new())
        .await?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flows.json");
    source.backup_flows().write_to(&path)?;
    let backup = FlowBackup::read_from(&path)?;
    assert_eq!(backup.flow_ids(), vec!["greeting", "slow"]);

    let target = FlowManager::new(FlowManagerConfig::default())?;
    let events = record_events(&target);
    let report = target.restore_flows(backup, RestoreOptions::default()).await?;

    assert!(report.is_clean());
    assert_eq!(report.restored, vec!["greeting".to_string(), "slow".to_string()]);
    assert_eq!(report.executions_restored, 1);
    for flow in source.list_flows() {
        assert_eq!(target.get_flow(&flow.id).as_deref(), Some(flow.as_ref()));
    }
    assert_eq!(target.list_executions(&ExecutionQuery::new()).total, 1);
    assert_eq!(*events.lock(), vec![FlowEventKind::FlowsRestored]);
    Ok(())
}

#[tokio::test]
async fn restore_skips_existing_flows_unless_overwriting() -> anyhow::Result<()> {
    let manager = FlowManager::new(FlowManagerConfig::default())?;
    manager.register_flow(greeting_flow()?).await?;

    let mut changed = greeting_flow()?;
    changed.version = "2.0.0".to_string();
    let mut invalid = slow_flow("bad", 1)?;
    invalid.version = "latest".to_string();
    let backup = FlowBackup::new(vec![changed, invalid], Vec::new());

    let report = manager
        .restore_flows(backup.clone(), RestoreOptions::default())
        .await?;
    assert_eq!(report.skipped, vec!["greeting".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].flow_id, "bad");
    assert_eq!(
        manager.get_flow("greeting").map(|f| f.version.clone()),
        Some("1.0.0".to_string())
    );

    let options = RestoreOptions {
        overwrite: true,
        backup: true,
        ..RestoreOptions::default()
    };
    let report = manager.restore_flows(backup, options).await?;
    assert_eq!(report.restored, vec!["greeting".to_string()]);
    let previous = report.previous.expect("snapshot taken");
    assert_eq!(previous.flows[0].version, "1.0.0");
    assert_eq!(
        manager.get_flow("greeting").map(|f| f.version.clone()),
        Some("2.0.0".to_string())
    );
    Ok(())
}
