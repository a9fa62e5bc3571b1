//! Integration tests for the audit read side: filtering, paging, projections.

use chrono::{DateTime, Duration, Utc};
use db::{
    AuditQueryRepository, AuditWriter, DBService,
    audit::{AuditQueryFilter, PagingOptions},
    models::audit_event::NewAuditEvent,
};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CORR_A: Uuid = Uuid::from_u128(0x11111111_1111_1111_1111_111111111111);
const CORR_B: Uuid = Uuid::from_u128(0x22222222_2222_2222_2222_222222222222);
const CORR_C: Uuid = Uuid::from_u128(0x33333333_3333_3333_3333_333333333333);

struct Seeded {
    db: DBService,
    repo: AuditQueryRepository,
    now: DateTime<Utc>,
    first_id: i64,
    _temp_dir: TempDir,
}

async fn seed() -> Seeded {
    let temp_dir = TempDir::new().unwrap();
    let db = DBService::open(&temp_dir.path().join("audit.db")).await.unwrap();

    for (code, name) in [(10, "Core"), (11, "Billing"), (12, "Files")] {
        sqlx::query("INSERT INTO system_types (id, code, display_name) VALUES ($1, $2, $3)")
            .bind(code)
            .bind(name.to_uppercase())
            .bind(name)
            .execute(&db.pool)
            .await
            .unwrap();
    }

    let now = Utc::now();
    let events = [
        ("Authn", CORR_A, 1, "User", 1, 10, 30),
        ("Authz", CORR_B, 2, "Project", 5, 11, 20),
        ("Authn", CORR_C, 1, "Project", 6, 10, 10),
        ("Authn", Uuid::new_v4(), 3, "File", 9, 12, 5),
    ];

    let writer = AuditWriter::new(db.pool.clone());
    let cancel = CancellationToken::new();
    let mut ids = Vec::new();
    for (event_type, corr, actor, target_type, target_id, system_type, minutes_ago) in events {
        let event = NewAuditEvent::new(event_type, corr)
            .actor(Some(actor))
            .target(target_type, Some(target_id))
            .system_type(Some(system_type))
            .occurred_at(now - Duration::minutes(minutes_ago))
            .payload(&json!({}))
            .metadata(&json!({}));
        ids.push(writer.write(&event, &cancel).await.unwrap().unwrap());
    }

    Seeded {
        repo: AuditQueryRepository::new(db.pool.clone()),
        db,
        now,
        first_id: ids[0],
        _temp_dir: temp_dir,
    }
}

#[tokio::test]
async fn no_filter_returns_paged_recent_events() {
    let s = seed().await;
    let paging = PagingOptions {
        page: 1,
        page_size: 2,
        ..Default::default()
    };

    let result = s.repo.query(None, &paging).await.unwrap();
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.total_count, 4);
    assert_eq!(result.page, 1);
    assert_eq!(result.page_size, 2);

    // Newest first by default
    assert_eq!(result.items[0].target_type.as_deref(), Some("File"));
    assert_eq!(result.items[1].correlation_id, CORR_C);

    let second = s
        .repo
        .query(None, &PagingOptions { page: 2, ..paging })
        .await
        .unwrap();
    let correlations: Vec<Uuid> = second.items.iter().map(|e| e.correlation_id).collect();
    assert_eq!(correlations, vec![CORR_B, CORR_A]);
}

#[tokio::test]
async fn correlation_lookup_returns_all_events_for_it() {
    let s = seed().await;

    let list = s.repo.query_by_correlation_id(CORR_A).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].event_type, "Authn");
    assert_eq!(list[0].correlation_id, CORR_A);

    assert!(
        s.repo
            .query_by_correlation_id(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn actor_filter_respects_paging_and_direction() {
    let s = seed().await;
    let paging = PagingOptions {
        page: 1,
        page_size: 10,
        sort_descending: false,
    };

    let result = s.repo.query_by_actor(1, None, &paging).await.unwrap();
    assert!(result.items.iter().all(|e| e.actor_id == Some(1)));
    assert_eq!(result.total_count, 2);
    assert!(result.items[0].occurred_at < result.items[1].occurred_at);

    // The actor argument wins over the filter's actor
    let filter = AuditQueryFilter {
        actor_id: Some(2),
        target_type: Some("Project".to_string()),
        ..Default::default()
    };
    let narrowed = s.repo.query_by_actor(1, Some(&filter), &paging).await.unwrap();
    assert_eq!(narrowed.total_count, 1);
    assert_eq!(narrowed.items[0].correlation_id, CORR_C);
}

#[tokio::test]
async fn get_by_id_loads_payload_only_on_request() {
    let s = seed().await;

    let bare = s.repo.get_by_id(s.first_id, false).await.unwrap().unwrap();
    assert_eq!(bare.id, s.first_id);
    assert!(bare.payload_json.is_none());
    assert!(bare.metadata_json.is_none());

    let full = s.repo.get_by_id(s.first_id, true).await.unwrap().unwrap();
    assert_eq!(full.payload_json.as_deref(), Some("{}"));
    assert_eq!(full.metadata_json.as_deref(), Some("{}"));

    assert!(s.repo.get_by_id(9_999, true).await.unwrap().is_none());
}

#[tokio::test]
async fn time_range_is_inclusive() {
    let s = seed().await;
    let boundary = s.repo.query_by_correlation_id(CORR_B).await.unwrap()[0].occurred_at;

    let filter = AuditQueryFilter {
        occurred_after: Some(boundary),
        occurred_before: Some(s.now),
        ..Default::default()
    };
    assert_eq!(s.repo.count(Some(&filter)).await.unwrap(), 3);

    let filter = AuditQueryFilter {
        occurred_before: Some(boundary),
        ..Default::default()
    };
    assert_eq!(s.repo.count(Some(&filter)).await.unwrap(), 2);
}

#[tokio::test]
async fn text_search_matches_event_or_target_type() {
    let s = seed().await;

    let by_target = AuditQueryFilter {
        text_search: Some("  Proj ".to_string()),
        ..Default::default()
    };
    assert_eq!(s.repo.count(Some(&by_target)).await.unwrap(), 2);

    let by_type = AuditQueryFilter {
        text_search: Some("Authz".to_string()),
        ..Default::default()
    };
    assert_eq!(s.repo.count(Some(&by_type)).await.unwrap(), 1);

    let case_sensitive = AuditQueryFilter {
        text_search: Some("authn".to_string()),
        ..Default::default()
    };
    let result = s
        .repo
        .query(Some(&case_sensitive), &PagingOptions::default())
        .await
        .unwrap();
    assert_eq!(result.total_count, 0);
    assert!(result.items.is_empty());

    let blank = AuditQueryFilter {
        event_type: Some("   ".to_string()),
        system_type_id: Some(10),
        ..Default::default()
    };
    assert_eq!(s.repo.count(Some(&blank)).await.unwrap(), 2);

    s.db.shutdown().await;
}

#[tokio::test]
async fn summaries_carry_version_and_created_at_but_no_json() {
    let s = seed().await;

    let page = s
        .repo
        .query(None, &PagingOptions::default())
        .await
        .unwrap();
    let first = serde_json::to_value(&page.items[0]).unwrap();
    let keys: Vec<&str> = first
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert!(keys.contains(&"version"));
    assert!(keys.contains(&"created_at"));
    assert!(!keys.contains(&"payload_json"));
    assert!(!keys.contains(&"metadata_json"));
    assert_eq!(page.items[0].version, 1);

    let by_correlation = s.repo.query_by_correlation_id(CORR_A).await.unwrap();
    assert_eq!(by_correlation[0].version, 1);
    assert!(by_correlation[0].created_at <= Utc::now());
}
