//! In-memory station data behind the dashboard routes.
//!
//! Stands in for the monitoring backend: dashboard sections by priority, the
//! monitored radio stations, and a running play counter. Every read bumps a
//! counter so callers can tell whether a response came from here or from the
//! response cache.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tunewatch_core::{Priority, Timestamp};

/// A monitored radio station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Radio {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub updated_at: Timestamp,
}

/// Partial update for a radio station.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadioUpdate {
    pub name: Option<String>,
    pub online: Option<bool>,
}

#[derive(Debug, Default)]
pub struct StationData {
    sections: RwLock<BTreeMap<Priority, Value>>,
    radios: RwLock<BTreeMap<String, Radio>>,
    plays: AtomicU64,
    reads: AtomicU64,
}

impl StationData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A small fixture with three stations and one payload per section.
    pub fn sample() -> Self {
        let data = Self::empty();
        data.replace_section(
            Priority::Essential,
            json!({
                "songs_ranking": [
                    {"title": "Evidências", "artist": "Chitãozinho & Xororó", "plays": 41},
                    {"title": "Garota de Ipanema", "artist": "Tom Jobim", "plays": 37},
                ],
            }),
        );
        data.replace_section(
            Priority::Secondary,
            json!({"artists_ranking": ["Marília Mendonça", "Jorge & Mateus"]}),
        );
        data.replace_section(Priority::Optional, json!({"genre_distribution": {"sertanejo": 0.42, "pop": 0.31}}));

        let now = Utc::now();
        let mut radios = data.radios.write().unwrap_or_else(|e| e.into_inner());
        for (id, name) in [("1", "Rádio Atlântida"), ("2", "Jovem Pan"), ("3", "Band FM")] {
            radios.insert(
                id.to_string(),
                Radio {
                    id: id.to_string(),
                    name: name.to_string(),
                    online: true,
                    updated_at: now,
                },
            );
        }
        drop(radios);
        data
    }

    // ========================================================================
    // Dashboard sections
    // ========================================================================

    /// Section payload with the live play counter folded in.
    pub fn section(&self, priority: Priority) -> Value {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let sections = self.sections.read().unwrap_or_else(|e| e.into_inner());
        let mut payload = sections.get(&priority).cloned().unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut payload {
            map.insert("priority".to_string(), json!(priority));
            map.insert("plays_total".to_string(), json!(self.plays()));
        }
        payload
    }

    pub fn replace_section(&self, priority: Priority, payload: Value) {
        self.sections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(priority, payload);
    }

    // ========================================================================
    // Radios
    // ========================================================================

    pub fn radios(&self) -> Vec<Radio> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.radios
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn radio(&self, id: &str) -> Option<Radio> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.radios
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn update_radio(&self, id: &str, update: RadioUpdate) -> Option<Radio> {
        let mut radios = self.radios.write().unwrap_or_else(|e| e.into_inner());
        let radio = radios.get_mut(id)?;
        if let Some(name) = update.name {
            radio.name = name;
        }
        if let Some(online) = update.online {
            radio.online = online;
        }
        radio.updated_at = Utc::now();
        Some(radio.clone())
    }

    // ========================================================================
    // Plays
    // ========================================================================

    /// Record one detected play, returning the new total.
    pub fn record_play(&self) -> u64 {
        self.plays.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn plays(&self) -> u64 {
        self.plays.load(Ordering::Relaxed)
    }

    /// Backend reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_includes_play_counter() {
        let data = StationData::sample();
        data.record_play();
        data.record_play();
        let essential = data.section(Priority::Essential);
        assert_eq!(essential["plays_total"], 2);
        assert_eq!(essential["priority"], "essential");
        assert_eq!(data.reads(), 1);
    }

    #[test]
    fn test_update_radio() {
        let data = StationData::sample();
        let updated = data
            .update_radio(
                "2",
                RadioUpdate {
                    online: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!updated.online);
        assert_eq!(updated.name, "Jovem Pan");
        assert!(data.update_radio("99", RadioUpdate::default()).is_none());
    }
}
