use std::fmt;

use clap::ValueEnum;
use serde_json::{Value, json};

use crate::crd::ScheduleSpec;
use crate::error::{Result, ToolkitError};

/* ============================= GRANULARITY ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    /// Driven by an RRULE; only used for replication schedules.
    #[value(skip)]
    Custom,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "custom" => Ok(Self::Custom),
            other => Err(ToolkitError::validation(format!(
                "'{other}' is not a known granularity"
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ============================= FIELDS ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Minute,
    Hour,
    DayOfWeek,
    DayOfMonth,
}

impl Field {
    fn flag(&self) -> &'static str {
        match self {
            Self::Minute => "-m / --minute",
            Self::Hour => "-H / --hour",
            Self::DayOfWeek => "-W / --dayOfWeek",
            Self::DayOfMonth => "-M / --dayOfMonth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Required,
    Forbidden,
}

/// Which cron-like fields each granularity takes.
#[rustfmt::skip]
fn rules(granularity: Granularity) -> [(Field, Rule); 4] {
    use Field::*;
    use Rule::*;
    match granularity {
        Granularity::Hourly => [(Minute, Required), (Hour, Forbidden), (DayOfWeek, Forbidden), (DayOfMonth, Forbidden)],
        Granularity::Daily => [(Minute, Required), (Hour, Required), (DayOfWeek, Forbidden), (DayOfMonth, Forbidden)],
        Granularity::Weekly => [(Minute, Required), (Hour, Required), (DayOfWeek, Required), (DayOfMonth, Forbidden)],
        Granularity::Monthly => [(Minute, Required), (Hour, Required), (DayOfWeek, Forbidden), (DayOfMonth, Required)],
        Granularity::Custom => [(Minute, Forbidden), (Hour, Forbidden), (DayOfWeek, Forbidden), (DayOfMonth, Forbidden)],
    }
}

/// Cron-like values as given on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleFields {
    pub minute: Option<u8>,
    pub hour: Option<u8>,
    pub day_of_week: Option<u8>,
    pub day_of_month: Option<u8>,
}

impl ScheduleFields {
    fn get(&self, field: Field) -> Option<u8> {
        match field {
            Field::Minute => self.minute,
            Field::Hour => self.hour,
            Field::DayOfWeek => self.day_of_week,
            Field::DayOfMonth => self.day_of_month,
        }
    }
}

/// Fully-populated schedule fields, `*` where the granularity leaves one open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_week: String,
    pub day_of_month: String,
}

impl CronFields {
    pub fn wildcard() -> Self {
        Self {
            minute: "*".into(),
            hour: "*".into(),
            day_of_week: "*".into(),
            day_of_month: "*".into(),
        }
    }
}

/// Check the fields against the granularity table and fill the rest with `*`.
pub fn validate_create(granularity: Granularity, fields: &ScheduleFields) -> Result<CronFields> {
    let g = granularity.as_str();
    for (field, rule) in rules(granularity) {
        match (rule, fields.get(field)) {
            (Rule::Required, None) => {
                return Err(ToolkitError::validation(format!(
                    "'{g}' granularity requires {}",
                    field.flag()
                )));
            }
            (Rule::Forbidden, Some(_)) => {
                return Err(ToolkitError::validation(format!(
                    "'{g}' granularity must not specify {}",
                    field.flag()
                )));
            }
            _ => {}
        }
    }
    let fill = |v: Option<u8>| v.map_or_else(|| "*".to_string(), |n| n.to_string());
    Ok(CronFields {
        minute: fill(fields.minute),
        hour: fill(fields.hour),
        day_of_week: fill(fields.day_of_week),
        day_of_month: fill(fields.day_of_month),
    })
}

/// Updates only name the fields that change; reject the ones the existing
/// schedule's granularity cannot carry.
pub fn validate_update(granularity: Granularity, fields: &ScheduleFields) -> Result<()> {
    let g = granularity.as_str();
    for (field, rule) in rules(granularity) {
        if rule == Rule::Forbidden && field != Field::Minute && fields.get(field).is_some() {
            return Err(ToolkitError::validation(format!(
                "'{g}' granularity must not specify {}",
                field.flag()
            )));
        }
    }
    Ok(())
}

/* ============================= RECURRENCE ============================= */

fn parse_offset(offset: &str) -> Result<(u32, u32)> {
    let invalid = || ToolkitError::validation(format!("offset '{offset}' must be HH:MM or MM"));
    let (hours, minutes) = match offset.split_once(':') {
        Some((h, m)) => (
            h.parse::<u32>().map_err(|_| invalid())?,
            m.parse::<u32>().map_err(|_| invalid())?,
        ),
        None => (0, offset.parse::<u32>().map_err(|_| invalid())?),
    };
    if hours > 23 {
        return Err(ToolkitError::validation(format!(
            "offset '{offset}' hours must be between 0 and 23, inclusive"
        )));
    }
    if minutes > 59 {
        return Err(ToolkitError::validation(format!(
            "offset '{offset}' minutes must be between 0 and 59, inclusive"
        )));
    }
    Ok((hours, minutes))
}

/// Replication frequency in minutes from `Nm` or `Nh`.
pub fn parse_interval(interval: &str) -> Result<u32> {
    let invalid = || {
        ToolkitError::validation(format!(
            "frequency '{interval}' must be a number of minutes or hours, e.g. '10m' or '2h'"
        ))
    };
    if let Some(m) = interval.strip_suffix('m') {
        m.parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(invalid)
    } else if let Some(h) = interval.strip_suffix('h') {
        h.parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .and_then(|n| n.checked_mul(60))
            .ok_or_else(invalid)
    } else {
        Err(invalid())
    }
}

/// RFC 5545 rule pinned to 2022-01-01 UTC at `offset`, repeating every `interval`.
pub fn recurrence_rule(offset: &str, interval: &str) -> Result<String> {
    let (hours, minutes) = parse_offset(offset)?;
    let every = parse_interval(interval)?;
    Ok(format!(
        "DTSTART:20220101T{hours:02}{minutes:02}00Z\nRRULE:FREQ=MINUTELY;INTERVAL={every}"
    ))
}

/* ============================= BODIES ============================= */

/// Retention and timing for one protection schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionPlan {
    pub granularity: Granularity,
    pub cron: CronFields,
    pub backup_retention: String,
    pub snapshot_retention: String,
    pub recurrence_rule: Option<String>,
}

impl ProtectionPlan {
    /// The custom schedule that drives a replication.
    pub fn replication(rule: String) -> Self {
        Self {
            granularity: Granularity::Custom,
            cron: CronFields::wildcard(),
            backup_retention: "0".into(),
            snapshot_retention: "0".into(),
            recurrence_rule: Some(rule),
        }
    }

    /// Body for `POST k8s/v1/apps/{id}/schedules`.
    pub fn rest_body(&self) -> Value {
        let mut body = json!({
            "backupRetention": self.backup_retention,
            "snapshotRetention": self.snapshot_retention,
            "enabled": "true",
            "granularity": self.granularity.as_str(),
            "name": format!("{} schedule", self.granularity),
        });
        match &self.recurrence_rule {
            Some(rule) => {
                body["recurrenceRule"] = json!(rule);
                body["replicate"] = json!("true");
            }
            None => {
                body["minute"] = json!(self.cron.minute);
                body["hour"] = json!(self.cron.hour);
                body["dayOfWeek"] = json!(self.cron.day_of_week);
                body["dayOfMonth"] = json!(self.cron.day_of_month);
            }
        }
        body
    }

    pub fn custom_resource_spec(&self, app: &str, app_vault: &str) -> ScheduleSpec {
        let field = |v: &str| (v != "*").then(|| v.to_string());
        ScheduleSpec {
            application_ref: app.to_string(),
            app_vault_ref: app_vault.to_string(),
            granularity: self.granularity.as_str().to_string(),
            backup_retention: self.backup_retention.clone(),
            snapshot_retention: self.snapshot_retention.clone(),
            minute: field(&self.cron.minute),
            hour: field(&self.cron.hour),
            day_of_week: field(&self.cron.day_of_week),
            day_of_month: field(&self.cron.day_of_month),
            recurrence_rule: self.recurrence_rule.clone(),
            enabled: true,
        }
    }
}

/* ============================= TESTS ============================= */
