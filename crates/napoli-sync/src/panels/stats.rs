use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::PanelError;
use crate::lock;
use crate::service::SyncService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::DashboardStats;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Points kept in the message-volume chart.
pub const SERIES_LEN: usize = 7;
/// How long the live marker stays lit after an update.
pub const LIVE_WINDOW_MS: i64 = 1500;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsState {
    pub stats: DashboardStats,
    pub series: VecDeque<(String, u64)>,
    pub live_at: Option<DateTime<Utc>>,
}

impl Default for StatsState {
    fn default() -> Self {
        let series = [
            ("08:00", 400),
            ("10:00", 300),
            ("12:00", 600),
            ("14:00", 800),
            ("16:00", 500),
            ("18:00", 900),
            ("20:00", 1000),
        ]
        .into_iter()
        .map(|(label, value)| (label.to_string(), value))
        .collect();
        Self {
            stats: DashboardStats::default(),
            series,
            live_at: None,
        }
    }
}

impl StatsState {
    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        if event.kind != EventKind::StatsUpdate {
            return false;
        }
        self.apply_at(event, Utc::now())
    }

    fn apply_at(&mut self, event: &PushEvent, now: DateTime<Utc>) -> bool {
        let payload = &event.payload;
        if let Some(active) = payload.get("active_users").and_then(Value::as_u64) {
            self.stats.active_users = active;
        }
        if let Some(leads) = payload.get("leads").and_then(Value::as_u64) {
            self.stats.leads = leads;
        }
        match payload.get("response_time") {
            Some(Value::String(text)) => self.stats.response_time = text.clone(),
            Some(Value::Number(secs)) => self.stats.response_time = format!("{secs}s"),
            _ => {}
        }
        let point = self.stats.active_users.saturating_mul(10);
        self.push_point(now.format("%H:%M").to_string(), point);
        self.live_at = Some(now);
        true
    }

    fn push_point(&mut self, label: String, value: u64) {
        while self.series.len() >= SERIES_LEN {
            self.series.pop_front();
        }
        self.series.push_back((label, value));
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.live_at
            .is_some_and(|at| now - at < ChronoDuration::milliseconds(LIVE_WINDOW_MS))
    }
}

pub struct StatsPanel {
    state: Arc<Mutex<StatsState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl StatsPanel {
    pub fn mount(service: &SyncService) -> Self {
        let state = Arc::new(Mutex::new(StatsState::default()));
        let subscription = attach(service.bus(), &state, StatsState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn snapshot(&self) -> StatsState {
        lock(&self.state).clone()
    }

    pub async fn refresh(&self) -> Result<DashboardStats, PanelError> {
        let stats = self.api.stats().await?;
        lock(&self.state).stats = stats.clone();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn update(data: Value) -> PushEvent {
        PushEvent::new(EventKind::StatsUpdate, data)
    }

    #[test]
    fn update_merges_present_keys_only() {
        let mut state = StatsState::default();
        state.stats.response_time = "1.2s".to_string();
        state.apply_event(&update(json!({"active_users": 42, "leads": 7})));
        assert_eq!(state.stats.active_users, 42);
        assert_eq!(state.stats.leads, 7);
        assert_eq!(state.stats.response_time, "1.2s");

        state.apply_event(&update(json!({"response_time": 0.8})));
        assert_eq!(state.stats.response_time, "0.8s");
        assert_eq!(state.stats.active_users, 42);
    }

    #[test]
    fn series_rolls_at_fixed_length() {
        let mut state = StatsState::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 21, 15, 0).unwrap();
        state.apply_at(&update(json!({"active_users": 12})), at);
        assert_eq!(state.series.len(), SERIES_LEN);
        assert_eq!(state.series.front().map(|p| p.0.as_str()), Some("10:00"));
        assert_eq!(state.series.back(), Some(&("21:15".to_string(), 120)));
    }

    #[test]
    fn live_marker_fades() {
        let mut state = StatsState::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 21, 15, 0).unwrap();
        assert!(!state.is_live(at));
        state.apply_at(&update(json!({"active_users": 1})), at);
        assert!(state.is_live(at + ChronoDuration::milliseconds(500)));
        assert!(!state.is_live(at + ChronoDuration::seconds(2)));
    }

    #[test]
    fn huge_active_user_count_saturates_the_point() {
        let mut state = StatsState::default();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 21, 15, 0).unwrap();
        state.apply_at(&update(json!({"active_users": u64::MAX})), at);
        assert_eq!(state.series.back(), Some(&("21:15".to_string(), u64::MAX)));
    }

    #[test]
    fn other_events_are_ignored() {
        let mut state = StatsState::default();
        assert!(!state.apply_event(&PushEvent::new(EventKind::LeadUpdate, json!({"id": 1}))));
        assert_eq!(state, StatsState::default());
    }
}
