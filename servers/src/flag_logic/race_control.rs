//! Race control collaborators: turns raw `RaceControlMessages` items into
//! records and folds them into the effective track flag.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lib_livetiming::signalr::{Attributes, Consumer, NormalizedRecord, RawItem, StateChange, Transform};
use serde_json::{Value, json};
use tokio::sync::Mutex;

/// Effective flags from most to least severe.
const FLAG_PRIORITY: [&str; 6] = ["RED", "SC", "VSC", "DOUBLE YELLOW", "YELLOW", "CHEQUERED"];

#[derive(Debug, Clone, PartialEq)]
pub struct RaceControlRecord {
    pub utc: DateTime<Utc>,
    pub category: String,
    pub flag: Option<String>,
    pub scope: Option<String>,
    pub sector: Option<u32>,
    pub status: Option<String>,
    pub mode: Option<String>,
    pub lap: Option<u32>,
    pub message: String,
}

impl NormalizedRecord for RaceControlRecord {
    fn timestamp(&self) -> Result<DateTime<Utc>> {
        Ok(self.utc)
    }
}

/// Keeps `Flag` and `SafetyCar` messages, drops everything else.
pub struct RaceControlTransform;

impl Transform for RaceControlTransform {
    type Record = RaceControlRecord;

    async fn transform(&self, raw: &RawItem, epoch_start: DateTime<Utc>) -> Result<Option<RaceControlRecord>> {
        let Some(fields) = raw.as_object() else {
            bail!("race control item is not an object");
        };

        let category = match fields.get("Category").and_then(Value::as_str) {
            Some(category @ ("Flag" | "SafetyCar")) => category.to_string(),
            _ => return Ok(None),
        };

        let utc = match fields.get("Utc").and_then(Value::as_str) {
            Some(raw_utc) => parse_utc(raw_utc)?,
            None => epoch_start,
        };

        let text = |key: &str| fields.get(key).and_then(Value::as_str).map(|s| s.trim().to_uppercase());
        let number = |key: &str| fields.get(key).and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok());

        Ok(Some(RaceControlRecord {
            utc,
            category,
            flag: text("Flag"),
            scope: text("Scope"),
            sector: number("Sector"),
            status: text("Status"),
            mode: text("Mode"),
            lap: number("Lap"),
            message: fields
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }
}

/// Parses feed timestamps. The hub sends them without a zone designator; they are UTC.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .with_context(|| format!("invalid Utc timestamp {:?}", raw))?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[derive(Debug)]
struct TrackState {
    track_flag: String,
    sectors: BTreeMap<u32, String>,
    safety_car: Option<&'static str>,
    published: Option<String>,
    last_message: String,
    last_utc: Option<DateTime<Utc>>,
    last_lap: Option<u32>,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            track_flag: "GREEN".to_string(),
            sectors: BTreeMap::new(),
            safety_car: None,
            published: None,
            last_message: String::new(),
            last_utc: None,
            last_lap: None,
        }
    }
}

impl TrackState {
    fn fold(&mut self, record: &RaceControlRecord) {
        match record.category.as_str() {
            "Flag" => self.fold_flag(record),
            "SafetyCar" => self.fold_safety_car(record),
            _ => {}
        }
        self.last_message = record.message.clone();
        self.last_utc = Some(record.utc);
        if record.lap.is_some() {
            self.last_lap = record.lap;
        }
    }

    fn fold_flag(&mut self, record: &RaceControlRecord) {
        let Some(flag) = record.flag.as_deref() else {
            return;
        };

        match (record.scope.as_deref(), record.sector) {
            (Some("SECTOR"), Some(sector)) => match flag {
                "CLEAR" | "GREEN" => {
                    self.sectors.remove(&sector);
                }
                _ => {
                    self.sectors.insert(sector, flag.to_string());
                }
            },
            // Blue and black-and-white flags are shown to a single driver.
            (Some("DRIVER"), _) => {}
            _ => match flag {
                "GREEN" | "CLEAR" => {
                    self.track_flag = "GREEN".to_string();
                    self.sectors.clear();
                }
                "RED" | "CHEQUERED" | "YELLOW" | "DOUBLE YELLOW" => {
                    self.track_flag = flag.to_string();
                }
                _ => {}
            },
        }
    }

    fn fold_safety_car(&mut self, record: &RaceControlRecord) {
        match record.status.as_deref() {
            Some("DEPLOYED") => {
                self.safety_car = Some(match record.mode.as_deref() {
                    Some("VIRTUAL SAFETY CAR") => "VSC",
                    _ => "SC",
                });
            }
            Some("ENDING") | Some("IN THIS LAP") => self.safety_car = None,
            _ => {}
        }
    }

    fn effective_flag(&self) -> &'static str {
        FLAG_PRIORITY
            .iter()
            .copied()
            .find(|candidate| {
                self.track_flag == *candidate
                    || self.safety_car == Some(*candidate)
                    || self.sectors.values().any(|flag| flag == candidate)
            })
            .unwrap_or("GREEN")
    }

    fn attributes(&self) -> Attributes {
        let sectors: serde_json::Map<String, Value> = self
            .sectors
            .iter()
            .map(|(sector, flag)| (sector.to_string(), json!(flag)))
            .collect();

        let mut attributes = Attributes::new();
        attributes.insert("track_flag".to_string(), json!(self.track_flag));
        attributes.insert("sector_flags".to_string(), Value::Object(sectors));
        attributes.insert("safety_car".to_string(), json!(self.safety_car));
        attributes.insert("message".to_string(), json!(self.last_message));
        attributes.insert("utc".to_string(), json!(self.last_utc.map(|t| t.to_rfc3339())));
        attributes.insert("lap".to_string(), json!(self.last_lap));
        attributes
    }
}

/// Tracks track-wide, per-sector and safety car state and reports the
/// effective flag whenever it changes.
#[derive(Debug, Default)]
pub struct FlagMachine {
    state: Mutex<TrackState>,
}

impl FlagMachine {
    pub async fn current(&self) -> &'static str {
        self.state.lock().await.effective_flag()
    }
}

impl Consumer<RaceControlRecord> for FlagMachine {
    async fn apply(&self, record: RaceControlRecord) -> Result<StateChange> {
        let mut state = self.state.lock().await;
        state.fold(&record);

        let effective = state.effective_flag();
        let attributes = state.attributes();

        if state.published.as_deref() == Some(effective) {
            return Ok(StateChange::unchanged(attributes));
        }
        log::debug!("Effective flag {:?} -> {}", state.published, effective);
        state.published = Some(effective.to_string());
        Ok(StateChange::changed(effective, attributes))
    }
}
