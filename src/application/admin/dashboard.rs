//! Dashboard statistics.
//!
//! Spans servers, ads, sessions and feedback, so it is cached as an
//! aggregate: a short fixed lifetime, no invalidation on writes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::application::admin::{AdminError, Rfc3339Time, now};
use crate::application::repos::{Filter, RepoError, Repositories, SortKey};
use crate::cache::AggregateCache;
use crate::domain::entities::{ConnectivityRecord, FeedbackRecord, ServerRecord};
use crate::domain::types::{OsType, ServerMode};

const STATS_SCOPE: &str = "stats";
const MAX_RECENT_LIMIT: u32 = 100;
const TOP_REASONS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsCounts {
    pub android: u64,
    pub ios: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCounts {
    pub live: u64,
    pub test: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTotals {
    pub total: u64,
    pub by_os: OsCounts,
    pub by_mode: ModeCounts,
    pub pro: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Sessions not yet disconnected.
    pub active: u64,
    pub last_24h: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackTotals {
    pub last_7d: u64,
    /// Mean rating over the last 30 days, two decimals; `0` without ratings.
    pub avg_rating_30d: f64,
    pub top_reasons_7d: Vec<ReasonCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdTotals {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Server,
    Connectivity,
    Feedback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub when: OffsetDateTime,
    pub ref_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub servers: ServerTotals,
    pub connections: SessionTotals,
    pub feedback: FeedbackTotals,
    pub ads: AdTotals,
    pub recent_activity: Vec<Activity>,
}

#[derive(Serialize)]
struct StatsParams {
    #[serde(rename = "recentLimit")]
    recent_limit: u32,
}

#[derive(Clone)]
pub struct AdminDashboardService {
    repos: Repositories,
    stats: AggregateCache,
}

impl AdminDashboardService {
    pub fn new(repos: Repositories, stats: AggregateCache) -> Self {
        Self { repos, stats }
    }

    /// Headline counters plus the `recent_limit` most recent events across
    /// servers, sessions and feedback.
    pub async fn stats(&self, recent_limit: u32) -> Result<DashboardStats, AdminError> {
        let recent_limit = recent_limit.clamp(1, MAX_RECENT_LIMIT);
        let params = StatsParams { recent_limit };
        Ok(self
            .stats
            .read_through(STATS_SCOPE, &params, || self.compute(recent_limit))
            .await?)
    }

    async fn compute(&self, recent_limit: u32) -> Result<DashboardStats, RepoError> {
        let current = now();
        let since_24h = Rfc3339Time(current - Duration::days(1));
        let since_7d = Rfc3339Time(current - Duration::days(7));
        let since_30d = Rfc3339Time(current - Duration::days(30));
        let recent = u64::from(recent_limit);
        let everything = Filter::new();

        let servers = &self.repos.servers;
        let ads = &self.repos.ads;
        let sessions = &self.repos.connectivity;
        let feedback = &self.repos.feedback;

        let android_filter = Filter::new().eq("general.os_type", OsType::Android);
        let ios_filter = Filter::new().eq("general.os_type", OsType::Ios);
        let live_filter = Filter::new().eq("general.mode", ServerMode::Live);
        let test_filter = Filter::new().eq("general.mode", ServerMode::Test);
        let pro_filter = Filter::new().eq("general.is_pro", true);
        let (total_servers, android, ios, live, test, pro) = tokio::try_join!(
            servers.count(&everything),
            servers.count(&android_filter),
            servers.count(&ios_filter),
            servers.count(&live_filter),
            servers.count(&test_filter),
            servers.count(&pro_filter),
        )?;

        let active_ads_filter = Filter::new().eq("status", true);
        let open_filter = Filter::new().absent("disconnected_at");
        let sessions_24h_filter = Filter::new().gte("connected_at", &since_24h);
        let feedback_7d_filter = Filter::new().gte("datetime", &since_7d);
        let feedback_30d_filter = Filter::new().gte("datetime", &since_30d);
        let (active_ads, total_ads, active_sessions, sessions_24h, feedback_7d) = tokio::try_join!(
            ads.count(&active_ads_filter),
            ads.count(&everything),
            sessions.count(&open_filter),
            sessions.count(&sessions_24h_filter),
            feedback.count(&feedback_7d_filter),
        )?;

        let newest_servers = [SortKey::desc("created_at")];
        let newest_sessions = [SortKey::desc("connected_at")];
        let newest_feedback = [SortKey::desc("datetime")];
        let (feedback_30d, reasons_7d, recent_servers, recent_sessions, recent_feedback) = tokio::try_join!(
            feedback.find_page(&feedback_30d_filter, &[], 0, u64::MAX),
            feedback.find_page(&feedback_7d_filter, &[], 0, u64::MAX),
            servers.find_page(&everything, &newest_servers, 0, recent),
            sessions.find_page(&everything, &newest_sessions, 0, recent),
            feedback.find_page(&everything, &newest_feedback, 0, recent),
        )?;

        Ok(DashboardStats {
            servers: ServerTotals {
                total: total_servers,
                by_os: OsCounts { android, ios },
                by_mode: ModeCounts { live, test },
                pro,
            },
            connections: SessionTotals {
                active: active_sessions,
                last_24h: sessions_24h,
            },
            feedback: FeedbackTotals {
                last_7d: feedback_7d,
                avg_rating_30d: average_rating(&feedback_30d.items),
                top_reasons_7d: top_reasons(&reasons_7d.items),
            },
            ads: AdTotals {
                active: active_ads,
                total: total_ads,
            },
            recent_activity: merge_activity(
                &recent_servers.items,
                &recent_sessions.items,
                &recent_feedback.items,
                recent_limit as usize,
            ),
        })
    }
}

fn average_rating(entries: &[FeedbackRecord]) -> f64 {
    let ratings: Vec<f64> = entries
        .iter()
        .filter_map(|entry| entry.rating.map(f64::from))
        .collect();
    if ratings.is_empty() {
        return 0.0;
    }
    let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
    (mean * 100.0).round() / 100.0
}

fn top_reasons(entries: &[FeedbackRecord]) -> Vec<ReasonCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for entry in entries {
        *counts.entry(entry.reason.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<ReasonCount> = counts
        .into_iter()
        .map(|(reason, count)| ReasonCount {
            reason: reason.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));
    ranked.truncate(TOP_REASONS);
    ranked
}

fn merge_activity(
    servers: &[ServerRecord],
    sessions: &[ConnectivityRecord],
    feedback: &[FeedbackRecord],
    limit: usize,
) -> Vec<Activity> {
    let servers = servers.iter().map(|server| Activity {
        kind: ActivityKind::Server,
        title: format!(
            "New server: {} ({}, {})",
            server.general.name, server.general.city_id, server.general.country_id
        ),
        when: server.created_at,
        ref_id: server.id.clone(),
    });
    let sessions = sessions.iter().map(|session| Activity {
        kind: ActivityKind::Connectivity,
        title: format!("User connected (server {})", session.server_id),
        when: session.connected_at,
        ref_id: session.id.clone(),
    });
    let feedback = feedback.iter().map(|entry| Activity {
        kind: ActivityKind::Feedback,
        title: format!("Feedback received: {}", entry.reason),
        when: entry.datetime,
        ref_id: entry.id.clone(),
    });

    let mut merged: Vec<Activity> = servers.chain(sessions).chain(feedback).collect();
    merged.sort_by(|a, b| b.when.cmp(&a.when));
    merged.truncate(limit.max(1));
    merged
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::application::admin::DASHBOARD;
    use crate::cache::{CacheClient, MemoryStore};
    use crate::infra::db::memory_repositories;

    fn feedback(id: &str, reason: &str, rating: Option<u8>, at: OffsetDateTime) -> FeedbackRecord {
        FeedbackRecord {
            id: id.into(),
            reason: reason.into(),
            network_type: None,
            requested_server: None,
            server_id: None,
            rating,
            review: None,
            additional_data: None,
            os_type: OsType::Android,
            datetime: at,
            created_at: at,
            updated_at: at,
        }
    }

    fn session(id: &str, at: OffsetDateTime, open: bool) -> ConnectivityRecord {
        ConnectivityRecord {
            id: id.into(),
            user_id: "u1".into(),
            server_id: "s1".into(),
            connected_at: at,
            disconnected_at: (!open).then_some(at),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn average_rounds_and_skips_unrated() {
        let at = datetime!(2025-03-01 10:00 UTC);
        let entries = [
            feedback("f1", "slow", Some(5), at),
            feedback("f2", "slow", Some(4), at),
            feedback("f3", "slow", Some(4), at),
            feedback("f4", "slow", None, at),
        ];
        assert_eq!(average_rating(&entries), 4.33);
        assert_eq!(average_rating(&entries[3..]), 0.0);
    }

    #[test]
    fn top_reasons_rank_by_count_then_name() {
        let at = datetime!(2025-03-01 10:00 UTC);
        let entries = [
            feedback("f1", "slow", None, at),
            feedback("f2", "drops", None, at),
            feedback("f3", "slow", None, at),
            feedback("f4", "blocked", None, at),
            feedback("f5", "ads", None, at),
        ];
        let ranked = top_reasons(&entries);
        let names: Vec<_> = ranked.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(names, ["slow", "ads", "blocked"]);
        assert_eq!(ranked[0].count, 2);
    }

    #[test]
    fn activity_merges_newest_first() {
        let sessions = [
            session("c1", datetime!(2025-03-01 10:00 UTC), true),
            session("c2", datetime!(2025-03-03 10:00 UTC), true),
        ];
        let entries = [feedback("f1", "slow", None, datetime!(2025-03-02 10:00 UTC))];
        let merged = merge_activity(&[], &sessions, &entries, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].ref_id, "c2");
        assert_eq!(merged[1].title, "Feedback received: slow");
        assert_eq!(merge_activity(&[], &sessions, &entries, 0).len(), 1);
    }

    #[tokio::test]
    async fn stats_are_served_from_the_aggregate_cache() {
        let repos = memory_repositories();
        let current = now();
        repos.connectivity.insert(session("c1", current, true)).await.unwrap();
        repos
            .connectivity
            .insert(session("c2", current - Duration::days(3), false))
            .await
            .unwrap();
        repos
            .feedback
            .insert(feedback("f1", "slow", Some(3), current - Duration::days(2)))
            .await
            .unwrap();
        repos
            .feedback
            .insert(feedback("f2", "slow", Some(4), current - Duration::days(20)))
            .await
            .unwrap();

        let client = CacheClient::new(std::sync::Arc::new(MemoryStore::default()));
        let dashboard = AdminDashboardService::new(
            repos.clone(),
            AggregateCache::new(client, DASHBOARD, std::time::Duration::from_secs(15)),
        );

        let stats = dashboard.stats(5).await.unwrap();
        assert_eq!(stats.connections.active, 1);
        assert_eq!(stats.connections.last_24h, 1);
        assert_eq!(stats.feedback.last_7d, 1);
        assert_eq!(stats.feedback.avg_rating_30d, 3.5);
        assert_eq!(stats.feedback.top_reasons_7d, vec![ReasonCount { reason: "slow".into(), count: 1 }]);
        assert_eq!(stats.recent_activity.len(), 4);
        assert_eq!(stats.recent_activity[0].ref_id, "c1");
        assert_eq!(stats.servers.total, 0);

        // Writes do not retire aggregates; the entry lives out its lifetime.
        repos.connectivity.insert(session("c3", current, true)).await.unwrap();
        assert_eq!(dashboard.stats(5).await.unwrap().connections.active, 1);
        assert_eq!(dashboard.stats(6).await.unwrap().connections.active, 2);
    }
}
