//! Repeat-rule translation
//!
//! User intent (`frequency`, `anchorTo`, `skipMissed`) translates into the
//! host-internal parameter set through a fixed table. The table is the
//! contract; nothing here guesses.

use serde::Deserialize;

// ============================================================================
// USER INTENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AnchorTo {
    #[serde(rename = "when-due")]
    WhenDue,
    #[serde(rename = "when-deferred")]
    WhenDeferred,
    #[serde(rename = "when-marked-done")]
    WhenMarkedDone,
    #[serde(rename = "planned-date")]
    PlannedDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Either a structured frequency or a raw ICS rule string
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Frequency {
    Rule(String),
    Parts {
        unit: FrequencyUnit,
        #[serde(default = "default_interval")]
        interval: u32,
    },
}

fn default_interval() -> u32 {
    1
}

impl Frequency {
    /// The ICS rule string the host consumes
    pub fn rule_string(&self) -> String {
        match self {
            Frequency::Rule(raw) => raw.clone(),
            Frequency::Parts { unit, interval } => {
                let freq = match unit {
                    FrequencyUnit::Daily => "DAILY",
                    FrequencyUnit::Weekly => "WEEKLY",
                    FrequencyUnit::Monthly => "MONTHLY",
                    FrequencyUnit::Yearly => "YEARLY",
                };
                if *interval <= 1 {
                    format!("FREQ={freq}")
                } else {
                    format!("FREQ={freq};INTERVAL={interval}")
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepeatIntent {
    pub frequency: Frequency,
    pub anchor_to: AnchorTo,
    #[serde(default)]
    pub skip_missed: bool,
}

// ============================================================================
// HOST PARAMETERS
// ============================================================================

/// Host-internal repeat parameters, straight from the translation table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRepeatParams {
    pub anchor_date_key: &'static str,
    pub method: &'static str,
    pub schedule_type: &'static str,
    /// "catch up automatically" on the host side
    pub catch_up: bool,
    pub rule_string: String,
}

/// The fixed anchor table:
///
/// | anchorTo | anchor key | method | schedule type |
/// |---|---|---|---|
/// | when-due | DueDate | Fixed | Regularly |
/// | when-deferred | DeferDate | DeferUntilDate | FromCompletion |
/// | when-marked-done | DueDate | DueDate | FromCompletion |
/// | planned-date | PlannedDate | Fixed | Regularly |
pub fn translate(intent: &RepeatIntent) -> HostRepeatParams {
    let (anchor_date_key, method, schedule_type) = match intent.anchor_to {
        AnchorTo::WhenDue => ("DueDate", "Fixed", "Regularly"),
        AnchorTo::WhenDeferred => ("DeferDate", "DeferUntilDate", "FromCompletion"),
        AnchorTo::WhenMarkedDone => ("DueDate", "DueDate", "FromCompletion"),
        AnchorTo::PlannedDate => ("PlannedDate", "Fixed", "Regularly"),
    };
    HostRepeatParams {
        anchor_date_key,
        method,
        schedule_type,
        catch_up: intent.skip_missed,
        rule_string: intent.frequency.rule_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(anchor: AnchorTo) -> RepeatIntent {
        RepeatIntent {
            frequency: Frequency::Parts {
                unit: FrequencyUnit::Weekly,
                interval: 1,
            },
            anchor_to: anchor,
            skip_missed: false,
        }
    }

    #[test]
    fn anchor_table_rows() {
        let p = translate(&intent(AnchorTo::WhenDue));
        assert_eq!((p.anchor_date_key, p.method, p.schedule_type), ("DueDate", "Fixed", "Regularly"));

        let p = translate(&intent(AnchorTo::WhenDeferred));
        assert_eq!(
            (p.anchor_date_key, p.method, p.schedule_type),
            ("DeferDate", "DeferUntilDate", "FromCompletion")
        );

        let p = translate(&intent(AnchorTo::WhenMarkedDone));
        assert_eq!(
            (p.anchor_date_key, p.method, p.schedule_type),
            ("DueDate", "DueDate", "FromCompletion")
        );

        let p = translate(&intent(AnchorTo::PlannedDate));
        assert_eq!(
            (p.anchor_date_key, p.method, p.schedule_type),
            ("PlannedDate", "Fixed", "Regularly")
        );
    }

    #[test]
    fn skip_missed_maps_to_catch_up() {
        let mut i = intent(AnchorTo::WhenDue);
        i.skip_missed = true;
        assert!(translate(&i).catch_up);
    }

    #[test]
    fn frequency_rule_strings() {
        assert_eq!(
            Frequency::Parts {
                unit: FrequencyUnit::Daily,
                interval: 1
            }
            .rule_string(),
            "FREQ=DAILY"
        );
        assert_eq!(
            Frequency::Parts {
                unit: FrequencyUnit::Weekly,
                interval: 2
            }
            .rule_string(),
            "FREQ=WEEKLY;INTERVAL=2"
        );
        assert_eq!(
            Frequency::Rule("FREQ=MONTHLY;BYMONTHDAY=1".into()).rule_string(),
            "FREQ=MONTHLY;BYMONTHDAY=1"
        );
    }

    #[test]
    fn intent_deserializes_both_frequency_shapes() {
        let a: RepeatIntent = serde_json::from_value(json!({
            "frequency": {"unit": "weekly", "interval": 2},
            "anchorTo": "when-due",
            "skipMissed": true
        }))
        .unwrap();
        assert_eq!(a.frequency.rule_string(), "FREQ=WEEKLY;INTERVAL=2");
        assert!(a.skip_missed);

        let b: RepeatIntent = serde_json::from_value(json!({
            "frequency": "FREQ=YEARLY",
            "anchorTo": "planned-date"
        }))
        .unwrap();
        assert_eq!(b.frequency.rule_string(), "FREQ=YEARLY");
        assert!(!b.skip_missed);
    }
}
