// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registry liveness tests: heartbeat-driven TTL, expiry, re-registration,
//! and capability-ranked discovery across the full key layout.

use std::sync::Arc;
use std::time::Duration;

use agromesh_swarm::{
    AgentCapability, AgentCard, AgentId, AgentRegistry, InMemoryKvStore, SwarmConfig, SwarmError,
};

fn registry() -> AgentRegistry {
    AgentRegistry::new(Arc::new(InMemoryKvStore::new()), SwarmConfig::default())
}

fn card(id: &str, caps: Vec<AgentCapability>, score: f64) -> AgentCard {
    AgentCard::new(id, id, caps).with_score(score)
}

#[tokio::test(start_paused = true)]
async fn card_expires_without_heartbeat_and_drops_out_of_discovery() {
    let registry = registry();
    registry
        .register(card("pest-scout", vec![AgentCapability::PestManagement], 0.8))
        .await
        .unwrap();

    let found = registry
        .discover(&[AgentCapability::PestManagement])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    // Default TTL is 60s; no heartbeat arrives.
    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(registry
        .discover(&[AgentCapability::PestManagement])
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        registry.get(&AgentId::new("pest-scout")).await.unwrap_err(),
        SwarmError::NotFound(_)
    ));
    assert!(matches!(
        registry.heartbeat(&AgentId::new("pest-scout")).await.unwrap_err(),
        SwarmError::NotFound(_)
    ));
    // The reconciled index no longer counts the expired agent.
    assert_eq!(registry.stats().await.unwrap().total_agents, 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_the_card_alive_across_ttl_windows() {
    let registry = registry();
    registry
        .register(card("irrigator", vec![AgentCapability::Irrigation], 0.6))
        .await
        .unwrap();

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(45)).await;
        registry.heartbeat(&AgentId::new("irrigator")).await.unwrap();
    }
    // 135s elapsed, more than two full TTLs, still discoverable.
    let found = registry.discover(&[AgentCapability::Irrigation]).await.unwrap();
    assert_eq!(found.len(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(registry
        .discover(&[AgentCapability::Irrigation])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_agent_can_reregister() {
    let registry = registry();
    registry
        .register(card("soil-lab", vec![AgentCapability::SoilScience], 0.7))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(registry
        .discover(&[AgentCapability::SoilScience])
        .await
        .unwrap()
        .is_empty());

    registry
        .register(card("soil-lab", vec![AgentCapability::SoilScience], 0.75))
        .await
        .unwrap();
    let found = registry.discover(&[AgentCapability::SoilScience]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert!((found[0].performance_score - 0.75).abs() < f64::EPSILON);
}

#[tokio::test]
async fn discovery_ranks_multi_capability_matches() {
    let registry = registry();
    registry
        .register(card(
            "generalist",
            vec![
                AgentCapability::Diagnosis,
                AgentCapability::Treatment,
                AgentCapability::PestManagement,
            ],
            0.55,
        ))
        .await
        .unwrap();
    registry
        .register(card(
            "specialist",
            vec![AgentCapability::Diagnosis, AgentCapability::Treatment],
            0.92,
        ))
        .await
        .unwrap();
    registry
        .register(card("diagnoser", vec![AgentCapability::Diagnosis], 0.99))
        .await
        .unwrap();

    let found = registry
        .discover(&[AgentCapability::Diagnosis, AgentCapability::Treatment])
        .await
        .unwrap();
    let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["specialist", "generalist"]);

    let best = registry
        .get_best(&[AgentCapability::Diagnosis, AgentCapability::Treatment])
        .await
        .unwrap();
    assert_eq!(best.id.as_str(), "specialist");

    let err = registry
        .get_best(&[AgentCapability::MarketAnalysis])
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn stats_skip_expired_cards() {
    let registry = registry();
    registry
        .register(card("short-lived", vec![AgentCapability::WeatherAnalysis], 0.5))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    registry
        .register(card("fresh", vec![AgentCapability::WeatherAnalysis], 0.9))
        .await
        .unwrap();

    let stats = registry.stats().await.unwrap();
    assert_eq!(stats.total_agents, 1);
    assert!((stats.mean_performance - 0.9).abs() < f64::EPSILON);
}
