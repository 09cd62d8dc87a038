//! Tests for the agent Directory.

use ccore::{AgentDescriptor, Endpoint, ErrorKind};
use chrono::{TimeDelta, Utc};
use compact_str::CompactString;
use conduit_team::Directory;
use std::{collections::BTreeSet, time::Duration};

fn agent(id: &str, capabilities: &[&str]) -> AgentDescriptor {
    capabilities
        .iter()
        .fold(AgentDescriptor::new(id), |d, c| d.with_capability(*c))
}

fn required(capabilities: &[&str]) -> BTreeSet<CompactString> {
    capabilities.iter().map(|c| CompactString::from(*c)).collect()
}

fn ids(found: &[AgentDescriptor]) -> Vec<&str> {
    found.iter().map(|d| d.agent_id.as_str()).collect()
}

#[test]
fn matching_requires_every_capability() {
    let directory = Directory::default();
    directory.register(agent("a", &["web_search"])).unwrap();
    directory
        .register(agent("b", &["web_search", "data_analysis"]))
        .unwrap();

    let found = directory.find_matching(&required(&["data_analysis"]));
    assert_eq!(ids(&found), ["b"]);

    let both = directory.find_matching(&required(&["web_search"]));
    assert_eq!(both.len(), 2);
    assert_eq!(ids(&directory.find_by_capability("data_analysis")), ["b"]);
    assert!(directory.find_by_capability("coding").is_empty());
}

#[test]
fn rejects_empty_registrations() {
    let directory = Directory::default();
    let err = directory.register(AgentDescriptor::new("bare")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Registration);
    assert!(directory.register(agent("", &["x"])).is_err());
    assert!(directory.is_empty());
}

#[test]
fn reregistering_replaces() {
    let directory = Directory::default();
    directory.register(agent("a", &["web_search"])).unwrap();
    directory.register(agent("a", &["coding"])).unwrap();

    assert_eq!(directory.len(), 1);
    assert!(directory.find_by_capability("web_search").is_empty());
    assert_eq!(ids(&directory.find_by_capability("coding")), ["a"]);
}

#[test]
fn ordering_is_recency_then_id() {
    let now = Utc::now();
    let stamp = |id: &str, age_secs: i64| {
        let mut d = agent(id, &["x"]);
        d.last_seen = now - TimeDelta::seconds(age_secs);
        d
    };
    let saved = serde_json::to_string(&vec![
        stamp("c", 10),
        stamp("b", 5),
        stamp("a", 10),
        stamp("d", 1),
    ])
    .unwrap();
    let directory = Directory::from_json(&saved, Duration::from_secs(60)).unwrap();

    let found = directory.find_by_capability("x");
    assert_eq!(ids(&found), ["d", "b", "a", "c"]);
}

#[test]
fn expired_entries_stop_matching() {
    let now = Utc::now();
    let mut stale = agent("stale", &["x"]);
    stale.last_seen = now - TimeDelta::seconds(120);
    let mut fresh = agent("fresh", &["x"]);
    fresh.last_seen = now;
    let saved = serde_json::to_string(&vec![stale, fresh]).unwrap();
    let directory = Directory::from_json(&saved, Duration::from_secs(60)).unwrap();

    assert_eq!(ids(&directory.find_by_capability("x")), ["fresh"]);
    assert!(directory.get("stale").is_some());
    assert!(!directory.is_live("stale"));

    // A heartbeat revives it.
    assert!(directory.heartbeat("stale"));
    assert!(directory.is_live("stale"));
    assert!(!directory.heartbeat("ghost"));
}

#[tokio::test]
async fn ttl_expiry_and_sweep() {
    let directory = Directory::new(Duration::from_millis(50));
    directory.register(agent("a", &["x"])).unwrap();
    assert!(directory.is_live("a"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(directory.find_by_capability("x").is_empty());
    assert_eq!(directory.sweep(), ["a"]);
    assert!(directory.get("a").is_none());
}

#[tokio::test]
async fn resident_entries_never_expire() {
    let directory = Directory::new(Duration::from_millis(50));
    directory.register_resident(agent("local", &["x"])).unwrap();
    directory.register(agent("remote", &["x"])).unwrap();
    assert!(directory.is_resident("local"));
    assert!(!directory.is_resident("remote"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(ids(&directory.find_by_capability("x")), ["local"]);
    assert_eq!(directory.sweep(), ["remote"]);
    assert!(directory.is_live("local"));

    // A plain registration under the same id is subject to the ttl again.
    directory.register(agent("local", &["x"])).unwrap();
    assert!(!directory.is_resident("local"));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!directory.is_live("local"));

    directory.register_resident(agent("again", &["x"])).unwrap();
    assert!(directory.deregister("again"));
    assert!(!directory.is_resident("again"));
}

#[test]
fn search_and_json_round_trip() {
    let directory = Directory::default();
    directory
        .register(
            agent("scout", &["web_search"])
                .with_name("Scout")
                .with_description("Finds things on the web"),
        )
        .unwrap();
    directory
        .register(
            agent("remote", &["coding"]).with_endpoint(Endpoint::Http {
                url: "http://remote.local".into(),
            }),
        )
        .unwrap();

    assert_eq!(ids(&directory.search("WEB")), ["scout"]);
    assert_eq!(ids(&directory.search("cod")), ["remote"]);
    assert!(directory.search("nothing").is_empty());

    let restored = Directory::from_json(&directory.to_json().unwrap(), Duration::from_secs(300)).unwrap();
    assert_eq!(restored.list(), directory.list());
    assert!(directory.deregister("scout"));
    assert!(!directory.deregister("scout"));
}
