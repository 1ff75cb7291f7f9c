//! Scripting commands
//!
//! Commands are single lines of the form `Name:Key=Value,Key=Value` (or a
//! bare `Name`). The EOL marker is appended by the channel, so a command
//! itself may never contain a line break.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PubliCastError, Result};

/// One scripting command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    params: Vec<(String, String)>,
    raw: Option<String>,
}

impl Command {
    /// Start a command with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            raw: None,
        }
    }

    /// Use an already formatted line as-is
    pub fn raw(line: impl Into<String>) -> Result<Self> {
        let line = line.into();
        check_single_line(&line)?;
        let name = line
            .split(':')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(Self {
            name,
            params: Vec::new(),
            raw: Some(line),
        })
    }

    /// Append a parameter; the value is quoted when it needs to be
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), quote_if_needed(&value.to_string())));
        self
    }

    /// Append a parameter whose value is always quoted
    pub fn quoted_param(mut self, key: impl Into<String>, value: &str) -> Self {
        self.params.push((key.into(), quote(value)));
        self
    }

    /// `Import2:Filename="..."`
    pub fn import(path: &Path) -> Self {
        Self::new("Import2").quoted_param("Filename", &protocol_path(path))
    }

    /// `Export2:Filename="...",NumChannels=n`
    pub fn export(path: &Path, num_channels: usize) -> Self {
        Self::new("Export2")
            .quoted_param("Filename", &protocol_path(path))
            .param("NumChannels", num_channels)
    }

    pub fn select_all() -> Self {
        Self::new("SelectAll")
    }

    pub fn remove_tracks() -> Self {
        Self::new("RemoveTracks")
    }

    /// `GetInfo:Type=<kind>`
    pub fn get_info(kind: &str) -> Self {
        Self::new("GetInfo").param("Type", kind)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wire form, without EOL
    ///
    /// # Errors
    /// `InvalidCommand` if the command is empty or spans more than one line
    pub fn to_line(&self) -> Result<String> {
        let line = self.render();
        if line.trim().is_empty() {
            return Err(PubliCastError::InvalidCommand {
                command: line,
                reason: "command is empty".to_string(),
            });
        }
        check_single_line(&line)?;
        Ok(line)
    }

    fn render(&self) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        if self.params.is_empty() {
            return self.name.clone();
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}:{}", self.name, params.join(","))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn check_single_line(line: &str) -> Result<()> {
    if line.contains(['\n', '\r', '\0']) {
        return Err(PubliCastError::InvalidCommand {
            command: line.escape_debug().to_string(),
            reason: "commands must fit on a single line".to_string(),
        });
    }
    Ok(())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([' ', ',', '"', '\\']) {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Forward slashes only; the protocol treats backslashes as escapes
fn protocol_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ============================================================================
// Editor presets
// ============================================================================

/// Built-in compressor effect of the editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorCompressorSettings {
    pub threshold: f64,
    pub ratio: f64,
    pub attack: f64,
    pub release: f64,
    pub makeup: f64,
}

impl Default for EditorCompressorSettings {
    fn default() -> Self {
        Self {
            threshold: -18.0,
            ratio: 5.0,
            attack: 30.0,
            release: 100.0,
            makeup: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    pub peak_level: f64,
    pub remove_dc_offset: bool,
    /// Normalize stereo channels independently
    pub normalize_stereo: bool,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            peak_level: -1.0,
            remove_dc_offset: true,
            normalize_stereo: true,
        }
    }
}

/// Voice EQ curve as `(frequency Hz, gain dB)` points
pub const DEFAULT_EQ_POINTS: [(f64, f64); 14] = [
    (20.0, 14.0),
    (51.0, 14.0),
    (63.0, 12.0),
    (76.0, 11.0),
    (80.0, 10.0),
    (90.0, 9.0),
    (120.0, 7.0),
    (200.0, 4.0),
    (260.0, 3.0),
    (300.0, 2.0),
    (400.0, 1.0),
    (500.0, 0.0),
    (10000.0, 0.0),
    (13000.0, -5.0),
];

/// Editor-side processing applied before the offline compressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorPresets {
    pub compressor: EditorCompressorSettings,
    pub normalize: NormalizeSettings,
    pub eq_points: Vec<(f64, f64)>,
}

impl Default for EditorPresets {
    fn default() -> Self {
        Self {
            compressor: EditorCompressorSettings::default(),
            normalize: NormalizeSettings::default(),
            eq_points: DEFAULT_EQ_POINTS.to_vec(),
        }
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

impl EditorPresets {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PubliCastError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    pub fn compressor_command(&self) -> Command {
        let c = &self.compressor;
        Command::new("Compressor")
            .param("Threshold", c.threshold)
            .param("Ratio", c.ratio)
            .param("Attack", c.attack)
            .param("Release", c.release)
            .param("Makeup", c.makeup)
    }

    pub fn normalize_command(&self) -> Command {
        let n = &self.normalize;
        Command::new("Normalize")
            .param("RemoveDcOffset", py_bool(n.remove_dc_offset))
            .param("PeakLevel", n.peak_level)
            .param("NormalizeStereo", py_bool(n.normalize_stereo))
    }

    /// `FilterCurve:FilterType=Draw,Points="f g; f g; ..."`
    pub fn filter_curve_command(&self) -> Command {
        let points: Vec<String> = self
            .eq_points
            .iter()
            .map(|(freq, gain)| format!("{} {}", freq, gain))
            .collect();
        Command::new("FilterCurve")
            .param("FilterType", "Draw")
            .quoted_param("Points", &points.join("; "))
    }

    /// Selection, EQ, compressor and normalize, in the order they are applied
    pub fn commands(&self) -> Vec<Command> {
        vec![
            Command::select_all(),
            self.filter_curve_command(),
            self.compressor_command(),
            self.normalize_command(),
        ]
    }
}
