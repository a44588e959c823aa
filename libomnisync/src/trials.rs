//! Trial records folded out of the behavioral controller's log messages.
//!
//! Both the legacy markers (`START OF TRIAL [...]`, `SUCCESS`, `END_TRIAL`) and the
//! mode-switch markers (`Switching to mode: Mode.START_TRIAL`, ...) are understood.
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CUES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]").expect("cue pattern is valid"));
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number pattern is valid"));
static CHAMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Left|Right) chamber selected.*?(\d+)").expect("chamber pattern is valid")
});

const MODE_PREFIX: &str = "Switching to mode: Mode.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialResult {
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChamberSide {
    Left,
    Right,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub start_time: f64,
    pub start_msg: String,
    pub left_cue: Option<String>,
    pub right_cue: Option<String>,
    pub floor_cue: Option<String>,
    pub trial_number: Option<u64>,
    pub result: Option<TrialResult>,
    /// Time of the result message.
    pub end_time: Option<f64>,
    pub choice: Option<String>,
    /// First number anywhere in the choice message.
    pub choice_chamber: Option<u64>,
    pub chamber_selected: Option<ChamberSide>,
    pub chamber_number: Option<u64>,
    pub cue_project_time: Option<f64>,
    pub gate_events: Vec<(f64, String)>,
    pub maze_rotation: Option<(f64, String)>,
    pub error_sound_time: Option<f64>,
    pub end_trial_time: Option<f64>,
}

impl TrialRecord {
    fn start(time: f64, msg: &str) -> Self {
        let mut record = TrialRecord {
            start_time: time,
            start_msg: msg.to_string(),
            ..Default::default()
        };
        if msg.starts_with("START OF TRIAL")
            && let Some(cues) = CUES_RE.captures(msg)
        {
            let parts: Vec<String> = cues[1]
                .replace('\'', "")
                .split(',')
                .map(|p| p.trim().to_string())
                .collect();
            if let [left, right, floor, ..] = parts.as_slice() {
                record.left_cue = Some(left.clone());
                record.right_cue = Some(right.clone());
                record.floor_cue = Some(floor.clone());
            }
        }
        record
    }

    fn close(&mut self, time: f64, result: TrialResult) {
        self.result = Some(result);
        self.end_time = Some(time);
    }
}

/// Fold state: either no trial has started yet, or one is open.
#[derive(Clone, Debug, Default)]
pub struct TrialFold {
    completed: Vec<TrialRecord>,
    open: Option<TrialRecord>,
}

impl TrialFold {
    /// Feeds one message. Messages before the first trial start are ignored.
    #[must_use]
    pub fn step(mut self, time: f64, msg: &str) -> Self {
        let mode = msg.strip_prefix(MODE_PREFIX);
        if msg.starts_with("START OF TRIAL") || mode.is_some_and(|m| m.starts_with("START_TRIAL")) {
            self.completed.extend(self.open.take());
            self.open = Some(TrialRecord::start(time, msg));
            return self;
        }
        let Some(trial) = self.open.as_mut() else {
            return self;
        };

        if msg.starts_with("Current trial number") {
            if let Some(n) = NUMBER_RE.find(msg).and_then(|m| m.as_str().parse().ok()) {
                trial.trial_number = Some(n);
            }
        } else if msg == "SUCCESS" || mode.is_some_and(|m| m.starts_with("SUCCESS")) {
            trial.close(time, TrialResult::Success);
        } else if msg == "ERROR" || mode.is_some_and(|m| m.starts_with("ERROR")) {
            trial.close(time, TrialResult::Error);
        } else if msg.starts_with("Left chamber selected") || msg.starts_with("Right chamber selected") {
            trial.choice = Some(msg.to_string());
            if let Some(n) = NUMBER_RE.find(msg).and_then(|m| m.as_str().parse().ok()) {
                trial.choice_chamber = Some(n);
            }
            match CHAMBER_RE.captures(msg) {
                Some(caps) => {
                    trial.chamber_selected = Some(if &caps[1] == "Left" {
                        ChamberSide::Left
                    } else {
                        ChamberSide::Right
                    });
                    trial.chamber_number = caps[2].parse().ok();
                }
                None => {
                    trial.chamber_selected = None;
                    trial.chamber_number = None;
                }
            }
        } else if msg == "Projecting images" || msg == "Projecting wall images" {
            trial.cue_project_time = Some(time);
        } else if msg.contains("Lowering") || msg.contains("Chamber") {
            if msg.contains("Lowering") {
                trial.gate_events.push((time, msg.to_string()));
            }
            if msg.contains("Chamber") && msg.contains("selected") {
                trial.maze_rotation = Some((time, msg.to_string()));
            }
        } else if msg == "Error sound played" {
            trial.error_sound_time = Some(time);
        } else if msg == "END_TRIAL" || mode.is_some_and(|m| m.starts_with("END_TRIAL")) {
            trial.end_trial_time = Some(time);
        }
        self
    }

    /// Completed trials, including one still open at the end of the stream.
    #[must_use]
    pub fn finish(mut self) -> Vec<TrialRecord> {
        self.completed.extend(self.open.take());
        self.completed
    }
}

/// Trial records of an ordered `(seconds, message)` stream.
pub fn extract_trials<'a>(messages: impl IntoIterator<Item = (f64, &'a str)>) -> Vec<TrialRecord> {
    messages
        .into_iter()
        .fold(TrialFold::default(), |fold, (time, msg)| fold.step(time, msg))
        .finish()
}
