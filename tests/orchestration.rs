//! End-to-end orchestration flows against a real SQLite database.

use chrono::{Duration, Utc};
use hashhive::campaign::{CampaignPatch, NewAttack, NewCampaign};
use hashhive::database::init_database;
use hashhive::database::models::{
    Agent, AgentStatus, CampaignStatus, CrackedHash, HashList, TaskProgress, TaskStatus, Wordlist,
};
use hashhive::events::{DomainEvent, EventType};
use hashhive::queue::worker::ParseWorker;
use hashhive::queue::{JobMessage, Lane};
use hashhive::store::ResourceAccess;
use hashhive::tasks::{ReportStatus, TaskReport};
use hashhive::{HiveCore, ServerConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

async fn setup() -> (HiveCore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.database_path = dir.path().join("hive.db");

    let pool = init_database(&config.database_path).await.unwrap();
    (HiveCore::with_pool(config, pool), dir)
}

async fn seed_agent(core: &HiveCore, id: &str, project_id: &str, status: AgentStatus) {
    core.agents
        .create(&Agent {
            id: id.to_string(),
            project_id: project_id.to_string(),
            name: format!("rig-{}", id),
            status,
            last_seen_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn subscribe(core: &HiveCore) -> mpsc::Receiver<DomainEvent> {
    let (tx, rx) = mpsc::channel(64);
    core.bus.subscribe("test-observer".to_string(), tx).await;
    rx
}

fn drain(rx: &mut mpsc::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn small_campaign_starts_inline_and_tiles_keyspace() {
    let (core, _dir) = setup().await;
    let mut rx = subscribe(&core).await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "office hashes".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();

    let attack_a = core
        .lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "rockyou".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("25000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();

    let attack_b = core
        .lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "rockyou + best64".to_string(),
            mode: "dictionary_rules".to_string(),
            keyspace: Some("0".to_string()),
            dependencies: vec![attack_a.id.clone()],
        })
        .await
        .unwrap();

    let running = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    assert_eq!(running.status, CampaignStatus::Running);
    assert!(running.started_at.is_some());
    assert_eq!(running.total_tasks, 4);

    // A's 25M keyspace tiles into three 10M chunks, the last truncated.
    let a_tasks = core.tasks.list_by_attack(&attack_a.id).await.unwrap();
    let ranges: Vec<(i64, i64)> = a_tasks
        .iter()
        .map(|t| (t.work_range.0.start, t.work_range.0.end))
        .collect();
    assert_eq!(
        ranges,
        vec![(0, 10_000_000), (10_000_000, 20_000_000), (20_000_000, 25_000_000)]
    );
    assert!(a_tasks.iter().all(|t| t.status == TaskStatus::Pending && t.agent_id.is_none()));

    // B has no usable keyspace: one indivisible size-unknown task.
    let b_tasks = core.tasks.list_by_attack(&attack_b.id).await.unwrap();
    assert_eq!(b_tasks.len(), 1);
    assert_eq!(b_tasks[0].work_range.0.start, 0);
    assert_eq!(b_tasks[0].work_range.0.end, 0);
    assert_eq!(b_tasks[0].work_range.0.total, 0);

    // The running status event fired, and only after the work existed:
    // at publish time the status row said running and tasks were in place.
    let events = drain(&mut rx);
    let status_events: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::CampaignStatus)
        .collect();
    assert_eq!(status_events.len(), 1);
    assert_eq!(status_events[0].payload["status"], "running");
}

#[tokio::test]
async fn start_requires_attacks_and_valid_graph() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "empty".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();

    let err = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no attacks"));

    // A dangling dependency is rejected at attack creation already.
    let err = core
        .lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "bad".to_string(),
            mode: "mask".to_string(),
            keyspace: Some("100".to_string()),
            dependencies: vec!["no-such-attack".to_string()],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("non-existent"));
}

#[tokio::test]
async fn invalid_transitions_name_both_states() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();

    let err = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Paused)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("draft"));
    assert!(message.contains("paused"));
}

#[tokio::test]
async fn oversized_campaign_is_generated_through_the_queue() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "big mask".to_string(),
            description: None,
            priority: 1,
            hash_list_id: None,
        })
        .await
        .unwrap();

    // 600M keyspace -> 60 estimated tasks, over the inline threshold of 50.
    let attack = core
        .lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "8 chars".to_string(),
            mode: "mask".to_string(),
            keyspace: Some("600000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();

    let mut generation_rx = core.queue.take_receiver(Lane::TaskGeneration).await.unwrap();
    let mut distribution_rx = core.queue.take_receiver(Lane::TasksHigh).await.unwrap();

    let running = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();
    assert_eq!(running.status, CampaignStatus::Running);

    // No inline generation happened; the job went onto the lane instead.
    assert_eq!(core.tasks.list_by_campaign(&campaign.id).await.unwrap().len(), 0);
    match generation_rx.recv().await.unwrap() {
        JobMessage::GenerateTasks { attack_ids, chunk_size } => {
            assert_eq!(attack_ids, vec![attack.id.clone()]);
            assert_eq!(chunk_size, 10_000_000);

            // The worker-side path partitions identically; run it by hand.
            let generator =
                hashhive::tasks::TaskGenerator::new(core.attacks.clone(), core.tasks.clone());
            for attack_id in &attack_ids {
                generator
                    .generate_for_attack(attack_id, chunk_size)
                    .await
                    .unwrap();
            }
        }
        other => panic!("unexpected queue message: {:?}", other),
    }
    assert_eq!(core.tasks.list_by_attack(&attack.id).await.unwrap().len(), 60);

    // Priority 1 routes the distribution wake-up onto the high lane.
    match distribution_rx.recv().await.unwrap() {
        JobMessage::DistributeCampaign { campaign_id } => assert_eq!(campaign_id, campaign.id),
        other => panic!("unexpected queue message: {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_claims_hand_out_each_task_exactly_once() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "contended".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();

    // Exactly one pending task.
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "tiny".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("1000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    let agent_ids: Vec<String> = (0..8).map(|i| format!("agent-{}", i)).collect();
    for id in &agent_ids {
        seed_agent(&core, id, "proj-1", AgentStatus::Active).await;
    }

    let dispatcher = Arc::new(core.dispatcher.clone());
    let mut handles = Vec::new();
    for id in agent_ids {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.assign_next(&id).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn offline_and_foreign_agents_get_nothing() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("1000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "offline-agent", "proj-1", AgentStatus::Offline).await;
    seed_agent(&core, "foreign-agent", "proj-2", AgentStatus::Active).await;

    assert!(core.dispatcher.assign_next("offline-agent").await.unwrap().is_none());
    assert!(core.dispatcher.assign_next("foreign-agent").await.unwrap().is_none());
    assert!(core.dispatcher.assign_next("ghost-agent").await.unwrap().is_none());

    // The pending task was not consumed by any of the refusals.
    let tasks = core.tasks.list_by_campaign(&campaign.id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn dispatch_prefers_urgent_campaigns_and_fifo_within() {
    let (core, _dir) = setup().await;

    let mut task_ids_by_priority = Vec::new();
    for (name, priority) in [("slow burn", 9), ("urgent", 1)] {
        let campaign = core
            .lifecycle
            .create_campaign(NewCampaign {
                project_id: "proj-1".to_string(),
                name: name.to_string(),
                description: None,
                priority,
                hash_list_id: None,
            })
            .await
            .unwrap();
        core.lifecycle
            .create_attack(NewAttack {
                campaign_id: campaign.id.clone(),
                name: "a".to_string(),
                mode: "dictionary".to_string(),
                keyspace: Some("2000".to_string()),
                dependencies: vec![],
            })
            .await
            .unwrap();
        core.lifecycle
            .transition(&campaign.id, CampaignStatus::Running)
            .await
            .unwrap();

        let ids: Vec<i64> = core
            .tasks
            .list_by_campaign(&campaign.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        task_ids_by_priority.push((priority, ids));
    }

    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;

    let first = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();
    let urgent_ids = &task_ids_by_priority.iter().find(|(p, _)| *p == 1).unwrap().1;
    // Priority 1 beats priority 9, and within the campaign the lowest id wins.
    assert_eq!(first.id, urgent_ids[0]);
    assert_eq!(first.status, TaskStatus::Assigned);
    assert!(first.assigned_at.is_some());
}

#[tokio::test]
async fn retry_budget_exhausts_into_permanent_failure() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "flaky".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("1000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    let task = core.tasks.list_by_campaign(&campaign.id).await.unwrap()[0].clone();
    let original_range = task.work_range.0;
    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;

    for attempt in 1..=3 {
        let claimed = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert!(core.failures.fail(task.id, "gpu fell off the bus").await.unwrap());
        let reloaded = core.tasks.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Pending);
        assert_eq!(reloaded.result_stats.0.retry_count, attempt);
        assert!(reloaded.agent_id.is_none());
        // Retries never change the work range.
        assert_eq!(reloaded.work_range.0, original_range);
    }

    let claimed = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);
    assert!(!core.failures.fail(task.id, "gpu fell off the bus").await.unwrap());
    let reloaded = core.tasks.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, TaskStatus::Failed);
    assert_eq!(reloaded.result_stats.0.retry_count, 3);
    assert!(reloaded.completed_at.is_some());
    assert_eq!(reloaded.failure_reason.as_deref(), Some("gpu fell off the bus"));

    // A task failing permanently does not fail the campaign.
    let campaign = core.campaigns.get_by_id(&campaign.id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Running);
}

#[tokio::test]
async fn fatal_agent_error_routes_each_held_task_individually() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("25000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;
    let t1 = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();
    let t2 = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();

    let routed = core
        .failures
        .handle_agent_fatal("agent-1", "driver crash")
        .await
        .unwrap();
    assert_eq!(routed, 2);

    for id in [t1.id, t2.id] {
        let task = core.tasks.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.result_stats.0.retry_count, 1);
    }

    let errors = core.agents.list_errors("agent-1").await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "driver crash");
}

#[tokio::test]
async fn reaper_reclaims_only_stale_agents_tasks() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("15000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "stale-agent", "proj-1", AgentStatus::Active).await;
    seed_agent(&core, "fresh-agent", "proj-1", AgentStatus::Active).await;

    let stale_task = core.dispatcher.assign_next("stale-agent").await.unwrap().unwrap();
    let fresh_task = core.dispatcher.assign_next("fresh-agent").await.unwrap().unwrap();

    // Age the first agent past the 5 minute threshold.
    core.agents
        .touch("stale-agent", Utc::now() - Duration::seconds(600))
        .await
        .unwrap();

    let stats_before = core
        .tasks
        .get_by_id(stale_task.id)
        .await
        .unwrap()
        .unwrap()
        .result_stats
        .0
        .clone();

    let reassigned = core.reaper.reap().await.unwrap();
    assert_eq!(reassigned, 1);

    let reclaimed = core.tasks.get_by_id(stale_task.id).await.unwrap().unwrap();
    assert_eq!(reclaimed.status, TaskStatus::Pending);
    assert!(reclaimed.agent_id.is_none());
    assert!(reclaimed.assigned_at.is_none());
    // Reaping bypasses the retry budget.
    assert_eq!(reclaimed.result_stats.0.retry_count, stats_before.retry_count);

    let untouched = core.tasks.get_by_id(fresh_task.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Assigned);
    assert_eq!(untouched.agent_id.as_deref(), Some("fresh-agent"));
}

#[tokio::test]
async fn reports_update_progress_and_reject_non_owners() {
    let (core, _dir) = setup().await;

    core.hash_lists
        .create(&HashList {
            id: "hl-1".to_string(),
            project_id: "proj-1".to_string(),
            name: "ntlm dump".to_string(),
            storage_ref: None,
        })
        .await
        .unwrap();

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: Some("hl-1".to_string()),
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("1000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;
    seed_agent(&core, "agent-2", "proj-1", AgentStatus::Active).await;
    let task = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();

    // A non-owning agent's report is rejected.
    let err = core
        .ingestor
        .report(task.id, "agent-2", ReportStatus::Running, TaskReport::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not owned"));

    let mut rx = subscribe(&core).await;

    let progress = TaskProgress {
        keyspace_progress: 0.5,
        speed: Some(1.2e9),
        temperature: Some(71.0),
    };
    let updated = core
        .ingestor
        .report(
            task.id,
            "agent-1",
            ReportStatus::Running,
            TaskReport {
                progress: Some(progress),
                cracked: vec![CrackedHash {
                    hash_value: "aabbcc".to_string(),
                    plaintext: "hunter2".to_string(),
                }],
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Running);
    let first_started_at = updated.started_at.unwrap();
    assert_eq!(updated.progress.0.keyspace_progress, 0.5);

    // Only one task: campaign progress mirrors the fractional report.
    let campaign_row = core.campaigns.get_by_id(&campaign.id).await.unwrap().unwrap();
    assert_eq!(campaign_row.overall_progress, 0.5);

    // Redelivered crack result is deduplicated; events carry counts only.
    let updated = core
        .ingestor
        .report(
            task.id,
            "agent-1",
            ReportStatus::Running,
            TaskReport {
                progress: Some(TaskProgress {
                    keyspace_progress: 0.8,
                    ..Default::default()
                }),
                cracked: vec![
                    CrackedHash {
                        hash_value: "aabbcc".to_string(),
                        plaintext: "hunter2".to_string(),
                    },
                    CrackedHash {
                        hash_value: "ddeeff".to_string(),
                        plaintext: "correcthorse".to_string(),
                    },
                ],
            },
        )
        .await
        .unwrap();
    // started_at was stamped by the first running report only.
    assert_eq!(updated.started_at.unwrap(), first_started_at);
    assert_eq!(core.hash_lists.cracked_count("hl-1").await.unwrap(), 2);

    let crack_events: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event_type == EventType::CrackResult)
        .collect();
    assert_eq!(crack_events.len(), 2);
    assert_eq!(crack_events[0].payload["cracked_count"], 1);
    assert_eq!(crack_events[1].payload["cracked_count"], 1);
    assert!(crack_events
        .iter()
        .all(|e| e.payload.get("plaintext").is_none()));

    // Completion stamps completed_at and finishes campaign progress.
    let done = core
        .ingestor
        .report(task.id, "agent-1", ReportStatus::Completed, TaskReport::default())
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());

    let campaign_row = core.campaigns.get_by_id(&campaign.id).await.unwrap().unwrap();
    assert_eq!(campaign_row.overall_progress, 1.0);
    assert_eq!(campaign_row.completed_tasks, 1);

    // The task is terminal now; even the owner's late report bounces.
    let err = core
        .ingestor
        .report(task.id, "agent-1", ReportStatus::Running, TaskReport::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not owned"));
}

#[tokio::test]
async fn stop_resets_campaign_and_cancels_in_flight_work() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("25000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;
    let assigned = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();

    let stopped = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Draft)
        .await
        .unwrap();
    assert_eq!(stopped.status, CampaignStatus::Draft);
    assert!(stopped.started_at.is_none());
    assert_eq!(stopped.total_tasks, 0);
    assert_eq!(stopped.overall_progress, 0.0);

    let tasks = core.tasks.list_by_campaign(&campaign.id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Cancelled));

    // The agent that kept working finds its next report rejected.
    let err = core
        .ingestor
        .report(assigned.id, "agent-1", ReportStatus::Running, TaskReport::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not owned"));

    // Restart replaces the stale rows and stamps a fresh started_at.
    let restarted = core
        .lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();
    assert!(restarted.started_at.is_some());
    assert_eq!(restarted.total_tasks, 3);
    let tasks = core.tasks.list_by_campaign(&campaign.id).await.unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn queue_outage_rolls_the_transition_back() {
    use async_trait::async_trait;
    use hashhive::queue::{JobQueueRouter, QueueBackend, QueueHealth};

    // Reports healthy but refuses every message: the health pre-check
    // passes, the status row flips, and only then does the enqueue fail.
    struct RefusingBackend;

    #[async_trait]
    impl QueueBackend for RefusingBackend {
        async fn push(&self, _lane: Lane, _message: JobMessage) -> bool {
            false
        }

        async fn health(&self) -> QueueHealth {
            QueueHealth::Healthy
        }
    }

    let (core, _dir) = setup().await;
    let mut rx = subscribe(&core).await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "stranded".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    // 600M keyspace puts the campaign over the inline threshold, so the
    // transition depends on the generation job being accepted.
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "mask".to_string(),
            keyspace: Some("600000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();

    let generator = hashhive::tasks::TaskGenerator::new(core.attacks.clone(), core.tasks.clone());
    let broken = hashhive::campaign::LifecycleController::new(
        core.campaigns.clone(),
        core.attacks.clone(),
        core.tasks.clone(),
        generator,
        JobQueueRouter::new(Arc::new(RefusingBackend)),
        core.bus.clone(),
        core.config.tasks.clone(),
    );

    let err = broken
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // Status, timestamps and progress all rolled back; no work exists and
    // observers never saw a running event.
    let reloaded = core.campaigns.get_by_id(&campaign.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, CampaignStatus::Draft);
    assert!(reloaded.started_at.is_none());
    assert_eq!(reloaded.total_tasks, 0);
    assert_eq!(core.tasks.list_by_campaign(&campaign.id).await.unwrap().len(), 0);
    assert!(drain(&mut rx)
        .iter()
        .all(|e| e.event_type != EventType::CampaignStatus));
}

#[tokio::test]
async fn sparse_patch_touches_only_provided_fields() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "before".to_string(),
            description: Some("keep me".to_string()),
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();

    let patched = core
        .lifecycle
        .update_campaign(
            &campaign.id,
            CampaignPatch {
                priority: Some(99),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(patched.name, "before");
    assert_eq!(patched.description.as_deref(), Some("keep me"));
    // Priority is clamped into 1-10.
    assert_eq!(patched.priority, 10);
}

#[tokio::test]
async fn cancelled_tasks_stay_cancelled_under_racing_writes() {
    let (core, _dir) = setup().await;

    let campaign = core
        .lifecycle
        .create_campaign(NewCampaign {
            project_id: "proj-1".to_string(),
            name: "c".to_string(),
            description: None,
            priority: 5,
            hash_list_id: None,
        })
        .await
        .unwrap();
    core.lifecycle
        .create_attack(NewAttack {
            campaign_id: campaign.id.clone(),
            name: "a".to_string(),
            mode: "dictionary".to_string(),
            keyspace: Some("10000000".to_string()),
            dependencies: vec![],
        })
        .await
        .unwrap();
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Running)
        .await
        .unwrap();

    seed_agent(&core, "agent-1", "proj-1", AgentStatus::Active).await;
    let task = core.dispatcher.assign_next("agent-1").await.unwrap().unwrap();

    // The campaign stops while the agent still believes it owns the task.
    core.lifecycle
        .transition(&campaign.id, CampaignStatus::Draft)
        .await
        .unwrap();
    let row = core.tasks.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Cancelled);

    // The writes a raced report would issue after its ownership check
    // passed must all match zero rows against the cancelled task.
    let progress = TaskProgress {
        keyspace_progress: 0.4,
        speed: None,
        temperature: None,
    };
    let now = Utc::now();
    assert!(!core
        .tasks
        .update_running(task.id, "agent-1", &progress, Some(now))
        .await
        .unwrap());
    assert!(!core
        .tasks
        .mark_terminal(task.id, TaskStatus::Completed, now, None, Some("agent-1"))
        .await
        .unwrap());
    assert!(!core
        .tasks
        .mark_terminal(task.id, TaskStatus::Failed, now, Some("late"), None)
        .await
        .unwrap());

    // The retry path cannot resurrect it to pending either.
    assert!(!core.failures.fail(task.id, "rig rebooted").await.unwrap());

    let err = core
        .ingestor
        .report(task.id, "agent-1", ReportStatus::Running, TaskReport::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not owned"));

    let row = core.tasks.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Cancelled);
    assert!(row.agent_id.is_none());
}

#[tokio::test]
async fn uploaded_hash_lists_are_parsed_into_items() {
    let (core, dir) = setup().await;

    core.hash_lists
        .create(&HashList {
            id: "hl-1".to_string(),
            project_id: "proj-1".to_string(),
            name: "ad dump".to_string(),
            storage_ref: None,
        })
        .await
        .unwrap();

    // Three distinct hashes, one duplicate line and some whitespace noise.
    let file = dir.path().join("dump.txt");
    std::fs::write(&file, "aabbcc\nddeeff\n\n  aabbcc  \n112233\n").unwrap();

    let mut rx = core.queue.take_receiver(Lane::HashlistParse).await.unwrap();
    core.record_hash_list_upload("hl-1", file.to_str().unwrap())
        .await
        .unwrap();

    let message = rx.try_recv().unwrap();
    let hash_list_id = match message {
        JobMessage::ParseHashList { hash_list_id } => hash_list_id,
        other => panic!("unexpected message on parse lane: {:?}", other),
    };
    assert_eq!(hash_list_id, "hl-1");

    let worker = ParseWorker::new(core.hash_lists.clone());
    assert_eq!(worker.parse(&hash_list_id).await.unwrap(), 3);
    assert_eq!(core.hash_lists.item_count("hl-1").await.unwrap(), 3);
    assert_eq!(core.hash_lists.cracked_count("hl-1").await.unwrap(), 0);

    // Redelivering the parse job is a no-op against the unique key.
    assert_eq!(worker.parse(&hash_list_id).await.unwrap(), 0);
    assert_eq!(core.hash_lists.item_count("hl-1").await.unwrap(), 3);
}

#[tokio::test]
async fn wordlist_store_round_trips_metadata() {
    let (core, _dir) = setup().await;

    for (id, name) in [("wl-2", "rockyou"), ("wl-1", "best64 candidates")] {
        core.wordlists
            .create(&Wordlist {
                id: id.to_string(),
                project_id: "proj-1".to_string(),
                name: name.to_string(),
                storage_ref: None,
            })
            .await
            .unwrap();
    }

    let listed = core.wordlists.list("proj-1").await.unwrap();
    let names: Vec<_> = listed.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["best64 candidates", "rockyou"]);
    assert!(core.wordlists.list("proj-2").await.unwrap().is_empty());

    core.wordlists
        .upload_file("wl-2", "/srv/files/rockyou.txt")
        .await
        .unwrap();
    let reloaded = core.wordlists.get_by_id("wl-2").await.unwrap().unwrap();
    assert_eq!(reloaded.storage_ref.as_deref(), Some("/srv/files/rockyou.txt"));
}
