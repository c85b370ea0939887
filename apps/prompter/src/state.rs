//! The shared session document and the partial updates applied to it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Top-level fields of the shared document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    ScrollPosition,
    IsPlaying,
    Speed,
    Settings,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::ScrollPosition,
        Field::IsPlaying,
        Field::Speed,
        Field::Settings,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::ScrollPosition => "scrollPosition",
            Field::IsPlaying => "isPlaying",
            Field::Speed => "speed",
            Field::Settings => "settings",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

pub const DEFAULT_SPEED: f64 = 1.0;

/// Clamps to `[0, 100]`; non-finite input becomes 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub font_size: u32,
    pub line_height: f64,
    pub background_color: String,
    pub text_color: String,
    pub guide_line_color: String,
    pub guide_line_thickness: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_size: 48,
            line_height: 1.6,
            background_color: "#000000".into(),
            text_color: "#ffffff".into(),
            guide_line_color: "#ff0000".into(),
            guide_line_thickness: 2,
        }
    }
}

impl Settings {
    pub const KEYS: [&'static str; 6] = [
        "fontSize",
        "lineHeight",
        "backgroundColor",
        "textColor",
        "guideLineColor",
        "guideLineThickness",
    ];

    /// Copies every populated field of `patch`. Returns whether anything changed.
    pub fn merge(&mut self, patch: &SettingsPatch) -> bool {
        let before = self.clone();
        if let Some(font_size) = patch.font_size {
            self.font_size = font_size;
        }
        if let Some(line_height) = patch.line_height {
            self.line_height = line_height;
        }
        if let Some(color) = &patch.background_color {
            self.background_color = color.clone();
        }
        if let Some(color) = &patch.text_color {
            self.text_color = color.clone();
        }
        if let Some(color) = &patch.guide_line_color {
            self.guide_line_color = color.clone();
        }
        if let Some(thickness) = patch.guide_line_thickness {
            self.guide_line_thickness = thickness;
        }
        *self != before
    }

    pub fn value_of(&self, key: &str) -> Option<Value> {
        Some(match key {
            "fontSize" => json!(self.font_size),
            "lineHeight" => json!(self.line_height),
            "backgroundColor" => json!(self.background_color),
            "textColor" => json!(self.text_color),
            "guideLineColor" => json!(self.guide_line_color),
            "guideLineThickness" => json!(self.guide_line_thickness),
            _ => return None,
        })
    }
}

/// A partial settings record. Absent fields leave the target untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_line_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_line_thickness: Option<u32>,
}

impl SettingsPatch {
    /// Reads whatever well-formed settings keys `value` carries; malformed
    /// entries are skipped rather than failing the whole record.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let pixels = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_f64)
                .filter(|px| px.is_finite() && *px >= 0.0)
                .map(|px| px.round() as u32)
        };
        let color = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .filter(|color| !color.trim().is_empty())
                .map(str::to_string)
        };
        Self {
            font_size: pixels("fontSize").filter(|px| *px > 0),
            line_height: object
                .get("lineHeight")
                .and_then(Value::as_f64)
                .filter(|lh| lh.is_finite() && *lh > 0.0),
            background_color: color("backgroundColor"),
            text_color: color("textColor"),
            guide_line_color: color("guideLineColor"),
            guide_line_thickness: pixels("guideLineThickness"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }

    /// Keys of the populated fields, in [`Settings::KEYS`] order.
    pub fn keys(&self) -> Vec<&'static str> {
        let present = [
            self.font_size.is_some(),
            self.line_height.is_some(),
            self.background_color.is_some(),
            self.text_color.is_some(),
            self.guide_line_color.is_some(),
            self.guide_line_thickness.is_some(),
        ];
        Settings::KEYS
            .iter()
            .zip(present)
            .filter_map(|(key, present)| present.then_some(*key))
            .collect()
    }

    /// Drops `key` from the patch. Unknown keys are ignored.
    pub fn clear(&mut self, key: &str) {
        match key {
            "fontSize" => self.font_size = None,
            "lineHeight" => self.line_height = None,
            "backgroundColor" => self.background_color = None,
            "textColor" => self.text_color = None,
            "guideLineColor" => self.guide_line_color = None,
            "guideLineThickness" => self.guide_line_thickness = None,
            _ => {}
        }
    }
}

impl From<Settings> for SettingsPatch {
    fn from(settings: Settings) -> Self {
        Self {
            font_size: Some(settings.font_size),
            line_height: Some(settings.line_height),
            background_color: Some(settings.background_color),
            text_color: Some(settings.text_color),
            guide_line_color: Some(settings.guide_line_color),
            guide_line_thickness: Some(settings.guide_line_thickness),
        }
    }
}

/// The per-session document shared by the display and the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub scroll_position: f64,
    pub is_playing: bool,
    pub speed: f64,
    pub settings: Settings,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            scroll_position: 0.0,
            is_playing: false,
            speed: DEFAULT_SPEED,
            settings: Settings::default(),
        }
    }
}

impl SharedState {
    pub fn to_value(&self) -> Value {
        json!({
            "scrollPosition": self.scroll_position,
            "isPlaying": self.is_playing,
            "speed": self.speed,
            "settings": self.settings,
        })
    }

    pub fn field_value(&self, field: Field) -> Value {
        match field {
            Field::ScrollPosition => json!(self.scroll_position),
            Field::IsPlaying => json!(self.is_playing),
            Field::Speed => json!(self.speed),
            Field::Settings => json!(self.settings),
        }
    }

    /// Merges `patch` into this state and returns the fields whose value changed.
    pub fn apply(&mut self, patch: &StatePatch) -> Vec<Field> {
        let mut changed = Vec::new();
        if let Some(position) = patch.scroll_position {
            let position = clamp_percent(position);
            if self.scroll_position != position {
                self.scroll_position = position;
                changed.push(Field::ScrollPosition);
            }
        }
        if let Some(playing) = patch.is_playing {
            if self.is_playing != playing {
                self.is_playing = playing;
                changed.push(Field::IsPlaying);
            }
        }
        if let Some(speed) = patch.speed {
            if self.speed != speed {
                self.speed = speed;
                changed.push(Field::Speed);
            }
        }
        if let Some(settings) = &patch.settings {
            if self.settings.merge(settings) {
                changed.push(Field::Settings);
            }
        }
        changed
    }
}

/// An inbound update: any subset of the document, settings possibly partial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub scroll_position: Option<f64>,
    pub is_playing: Option<bool>,
    pub speed: Option<f64>,
    pub settings: Option<SettingsPatch>,
}

impl StatePatch {
    /// Decodes a whole-document snapshot. Unknown or malformed fields are dropped.
    pub fn from_document(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let mut patch = Self::default();
        for field in Field::ALL {
            if let Some(value) = object.get(field.key()) {
                patch.merge(Self::from_field(field, value));
            }
        }
        patch
    }

    /// Decodes the value delivered by a single-field listener.
    pub fn from_field(field: Field, value: &Value) -> Self {
        let mut patch = Self::default();
        match field {
            Field::ScrollPosition => {
                patch.scroll_position = value.as_f64().filter(|p| p.is_finite()).map(clamp_percent);
            }
            Field::IsPlaying => patch.is_playing = value.as_bool(),
            Field::Speed => {
                patch.speed = value.as_f64().filter(|s| s.is_finite() && *s > 0.0);
            }
            Field::Settings => {
                patch.settings = Some(SettingsPatch::from_value(value)).filter(|s| !s.is_empty());
            }
        }
        patch
    }

    fn merge(&mut self, other: StatePatch) {
        self.scroll_position = other.scroll_position.or(self.scroll_position);
        self.is_playing = other.is_playing.or(self.is_playing);
        self.speed = other.speed.or(self.speed);
        self.settings = other.settings.or(self.settings.take());
    }

    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.scroll_position.is_some() {
            fields.push(Field::ScrollPosition);
        }
        if self.is_playing.is_some() {
            fields.push(Field::IsPlaying);
        }
        if self.speed.is_some() {
            fields.push(Field::Speed);
        }
        if self.settings.is_some() {
            fields.push(Field::Settings);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Drops every field `keep` rejects.
    pub fn retain(mut self, keep: impl Fn(Field) -> bool) -> Self {
        if !keep(Field::ScrollPosition) {
            self.scroll_position = None;
        }
        if !keep(Field::IsPlaying) {
            self.is_playing = None;
        }
        if !keep(Field::Speed) {
            self.speed = None;
        }
        if !keep(Field::Settings) {
            self.settings = None;
        }
        self
    }
}
